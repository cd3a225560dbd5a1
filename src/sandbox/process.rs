use std::{
    path::PathBuf,
    process::{ExitStatus, Stdio},
    time::Instant,
};

use async_trait::async_trait;
use tokio::{
    io::AsyncReadExt,
    process::{Child, Command},
    task::JoinHandle,
};

use crate::sandbox::{
    KILL_GRACE_PERIOD, LAUNCH_FAILURE_EXIT_CODE, ScriptExecutor, ScriptRequest, ScriptResult,
    TIMEOUT_EXIT_CODE, display_path, duration_ms,
};

pub struct ProcessSandbox {
    shell: PathBuf,
    max_output_bytes: usize,
}

impl ProcessSandbox {
    pub fn new(shell: impl Into<PathBuf>, max_output_bytes: usize) -> Self {
        Self {
            shell: shell.into(),
            max_output_bytes,
        }
    }
}

#[async_trait]
impl ScriptExecutor for ProcessSandbox {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn execute(&self, request: ScriptRequest) -> ScriptResult {
        let mut cmd = Command::new(&self.shell);
        cmd.arg(&request.script);
        run_command(cmd, &request, self.max_output_bytes).await
    }
}

pub(crate) async fn run_command(
    mut cmd: Command,
    request: &ScriptRequest,
    max_output_bytes: usize,
) -> ScriptResult {
    cmd.current_dir(&request.working_dir);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            return ScriptResult::launch_failure(
                format!(
                    "failed to launch {}: {err}",
                    display_path(&request.script)
                ),
                started.elapsed(),
            );
        }
    };
    let pid = child.id();

    let stdout_task = child
        .stdout
        .take()
        .map(|out| tokio::spawn(read_limited(out, max_output_bytes)));
    let stderr_task = child
        .stderr
        .take()
        .map(|err| tokio::spawn(read_limited(err, max_output_bytes)));

    let wait_result = tokio::time::timeout(request.time_limit(), child.wait()).await;

    let (exit_code, timed_out, wait_error) = match wait_result {
        Ok(Ok(status)) => (exit_code_of(status), false, None),
        Ok(Err(err)) => (LAUNCH_FAILURE_EXIT_CODE, false, Some(err)),
        Err(_) => {
            terminate(&mut child, pid).await;
            (TIMEOUT_EXIT_CODE, true, None)
        }
    };
    let elapsed = started.elapsed();

    // Stragglers left in the group would keep the pipes open and share the workspace.
    signal_group(pid, GroupSignal::Kill);

    let stdout = collect(stdout_task).await;
    let mut stderr = collect(stderr_task).await;
    if let Some(err) = wait_error {
        stderr.extend_from_slice(format!("\nfailed to wait for script: {err}").as_bytes());
    }

    ScriptResult {
        exit_code,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        duration_ms: duration_ms(elapsed),
        timed_out,
    }
}

async fn terminate(child: &mut Child, pid: Option<u32>) {
    signal_group(pid, GroupSignal::Term);
    if tokio::time::timeout(KILL_GRACE_PERIOD, child.wait())
        .await
        .is_ok()
    {
        return;
    }
    signal_group(pid, GroupSignal::Kill);
    let _ = child.kill().await;
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Term,
    Kill,
}

#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: GroupSignal) {
    let Some(pgid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    let signal = match signal {
        GroupSignal::Term => libc::SIGTERM,
        GroupSignal::Kill => libc::SIGKILL,
    };
    // The child was spawned with process_group(0), so its pid is the group id.
    unsafe {
        libc::kill(-pgid, signal);
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: Option<u32>, _signal: GroupSignal) {}

#[cfg(unix)]
fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(LAUNCH_FAILURE_EXIT_CODE)
}

#[cfg(not(unix))]
fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or(LAUNCH_FAILURE_EXIT_CODE)
}

async fn collect(task: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    let Some(mut task) = task else {
        return Vec::new();
    };
    match tokio::time::timeout(KILL_GRACE_PERIOD, &mut task).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(_)) => Vec::new(),
        Err(_) => {
            // A process outside the group still holds the pipe.
            task.abort();
            Vec::new()
        }
    }
}

async fn read_limited<R>(mut reader: R, limit: usize) -> Vec<u8>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut out = Vec::with_capacity(limit.min(8192));
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if out.len() < limit {
                    let remaining = limit - out.len();
                    out.extend_from_slice(&chunk[..remaining.min(n)]);
                }
            }
            Err(_) => break,
        }
    }
    out
}
