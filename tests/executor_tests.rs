#![cfg(unix)]

use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use grader_worker::{
    interpret::interpret,
    models::{OutcomeStatus, TestEntry},
    sandbox::{
        KILL_GRACE_PERIOD, LAUNCH_FAILURE_EXIT_CODE, ProcessSandbox, ScriptExecutor,
        ScriptRequest, ScriptResult, TIMEOUT_EXIT_CODE,
    },
};
use tempfile::TempDir;

fn sandbox() -> ProcessSandbox {
    ProcessSandbox::new("/bin/sh", 64 * 1024)
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

async fn run(body: &str, limit_secs: u64) -> (TempDir, ScriptResult) {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "test.sh", body);
    let result = sandbox()
        .execute(ScriptRequest::new(script, dir.path(), limit_secs))
        .await;
    (dir, result)
}

fn entry() -> TestEntry {
    TestEntry {
        tier: "public".into(),
        script: "test.sh".into(),
        time_limit_seconds: None,
    }
}

fn pid_alive(pid: &str) -> bool {
    std::process::Command::new("kill")
        .args(["-0", pid.trim()])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[tokio::test]
async fn test_passing_script_with_structured_result() {
    let (_dir, result) = run("echo ok\necho '{\"shortResult\":\"3/3 passed\"}'\n", 5).await;

    assert_eq!(result.exit_code, 0);
    assert!(!result.timed_out);
    assert!(result.stderr.is_empty());

    let outcome = interpret(&result, &entry(), 1);
    assert_eq!(outcome.status, OutcomeStatus::Pass);
    assert_eq!(outcome.short_result, "3/3 passed");
    assert_eq!(outcome.long_result, None);
    assert!(outcome.is_first_pass_success);
}

#[tokio::test]
async fn test_failing_script_reports_stderr() {
    let (_dir, result) = run("echo 'assertion failed at line 9' >&2\nexit 1\n", 5).await;

    let outcome = interpret(&result, &entry(), 1);
    assert_eq!(outcome.status, OutcomeStatus::Fail);
    assert_eq!(outcome.long_result.as_deref(), Some("assertion failed at line 9"));
    assert_eq!(outcome.short_result, "failed");
}

#[tokio::test]
async fn test_other_exit_code_is_error() {
    let (_dir, result) = run("exit 3\n", 5).await;
    assert_eq!(result.exit_code, 3);
    assert_eq!(interpret(&result, &entry(), 1).status, OutcomeStatus::Error);
}

#[tokio::test]
async fn test_streams_are_captured_separately() {
    let (_dir, result) = run("echo out1\necho err1 >&2\necho out2\necho err2 >&2\n", 5).await;
    assert_eq!(result.stdout, "out1\nout2\n");
    assert_eq!(result.stderr, "err1\nerr2\n");
}

#[tokio::test]
async fn test_runs_in_working_directory() {
    let (dir, result) = run("pwd\ntouch created.txt\n", 5).await;
    let reported = PathBuf::from(result.stdout.trim());
    assert_eq!(
        reported.canonicalize().unwrap(),
        dir.path().canonicalize().unwrap()
    );
    assert!(dir.path().join("created.txt").exists());
}

#[tokio::test]
async fn test_timeout_kills_script_and_its_children() {
    let started = Instant::now();
    let (dir, result) = run("sleep 30 &\necho $! > child.pid\nsleep 30\n", 1).await;

    assert!(result.timed_out);
    assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(result.duration_ms >= 1_000);
    assert!(result.duration_ms <= 1_000 + KILL_GRACE_PERIOD.as_millis() as u64 + 1_000);

    let outcome = interpret(&result, &entry(), 1);
    assert_eq!(outcome.status, OutcomeStatus::Timeout);
    assert!(outcome.timed_out);

    let child_pid = std::fs::read_to_string(dir.path().join("child.pid")).unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    while pid_alive(&child_pid) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!pid_alive(&child_pid), "background child {child_pid} survived");
}

#[tokio::test]
async fn test_term_ignoring_script_is_force_killed() {
    let (_dir, result) = run("trap '' TERM\nsleep 30\n", 1).await;

    assert!(result.timed_out);
    assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
    let grace = KILL_GRACE_PERIOD.as_millis() as u64;
    assert!(result.duration_ms >= 1_000 + grace - 50, "{}", result.duration_ms);
    assert!(result.duration_ms < 1_000 + grace + 1_000, "{}", result.duration_ms);
}

#[tokio::test]
async fn test_output_before_timeout_is_kept() {
    let (_dir, result) = run("echo progress\nsleep 30\n", 1).await;
    assert!(result.timed_out);
    assert_eq!(result.stdout, "progress\n");
}

#[tokio::test]
async fn test_launch_failure_is_a_result_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "test.sh", "exit 0\n");
    let result = ProcessSandbox::new("/nonexistent/interpreter", 1024)
        .execute(ScriptRequest::new(script, dir.path(), 5))
        .await;

    assert_eq!(result.exit_code, LAUNCH_FAILURE_EXIT_CODE);
    assert!(!result.timed_out);
    assert!(result.stderr.contains("failed to launch"), "{}", result.stderr);
    assert_eq!(interpret(&result, &entry(), 1).status, OutcomeStatus::Error);
}

#[tokio::test]
async fn test_output_is_capped() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "test.sh",
        "i=0\nwhile [ $i -lt 2000 ]; do echo 0123456789; i=$((i+1)); done\n",
    );
    let result = ProcessSandbox::new("/bin/sh", 1024)
        .execute(ScriptRequest::new(script, dir.path(), 10))
        .await;

    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout.len(), 1024);
}
