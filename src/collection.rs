use chrono::Utc;

use crate::models::{BuildStatus, Job, OutcomeCollection, OutcomeStatus, TestOutcome};

pub const RUNNER_VERSION: &str = concat!("grader-worker/", env!("CARGO_PKG_VERSION"));

pub fn assemble(outcomes: Vec<TestOutcome>, job: &Job) -> OutcomeCollection {
    if outcomes.is_empty() {
        return build_failed(job, "no test scripts could be run");
    }

    let count = |status: OutcomeStatus| outcomes.iter().filter(|o| o.status == status).count();
    let pass_count = count(OutcomeStatus::Pass);
    let fail_count = count(OutcomeStatus::Fail);
    let error_count = count(OutcomeStatus::Error);
    let timeout_count = count(OutcomeStatus::Timeout);
    let total_time_ms = outcomes
        .iter()
        .map(|o| o.execution_time_ms)
        .fold(0u64, u64::saturating_add);

    OutcomeCollection {
        submission_id: job.submission_id.clone(),
        test_setup_id: job.test_setup_id.clone(),
        attempt: job.attempt,
        build_status: BuildStatus::Passed,
        build_output: None,
        total_tests: outcomes.len(),
        outcomes,
        pass_count,
        fail_count,
        error_count,
        timeout_count,
        total_time_ms,
        runner_version: RUNNER_VERSION.to_string(),
        timestamp: Utc::now(),
    }
}

pub fn build_failed(job: &Job, diagnostic: impl Into<String>) -> OutcomeCollection {
    OutcomeCollection {
        submission_id: job.submission_id.clone(),
        test_setup_id: job.test_setup_id.clone(),
        attempt: job.attempt,
        build_status: BuildStatus::Failed,
        build_output: Some(diagnostic.into()),
        outcomes: Vec::new(),
        pass_count: 0,
        fail_count: 0,
        error_count: 0,
        timeout_count: 0,
        total_tests: 0,
        total_time_ms: 0,
        runner_version: RUNNER_VERSION.to_string(),
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Manifest;

    fn job() -> Job {
        Job {
            submission_id: "sub-7".into(),
            test_setup_id: "setup-3".into(),
            attempt: 2,
            submission_url: "/artifacts/sub-7".into(),
            test_setup_url: "/artifacts/setup-3".into(),
            manifest: serde_json::from_str::<Manifest>("{}").unwrap(),
            original_filename: None,
        }
    }

    fn outcome(name: &str, status: OutcomeStatus, ms: u64) -> TestOutcome {
        TestOutcome {
            test_name: name.into(),
            tier: "public".into(),
            status,
            short_result: status.default_short_result().into(),
            long_result: None,
            exit_code: 0,
            timed_out: status == OutcomeStatus::Timeout,
            execution_time_ms: ms,
            attempt: 2,
            is_first_pass_success: false,
        }
    }

    #[test]
    fn counts_partition_outcomes() {
        let collection = assemble(
            vec![
                outcome("a", OutcomeStatus::Pass, 10),
                outcome("b", OutcomeStatus::Fail, 20),
                outcome("c", OutcomeStatus::Pass, 5),
                outcome("d", OutcomeStatus::Error, 1),
                outcome("e", OutcomeStatus::Timeout, 1_500),
            ],
            &job(),
        );

        assert_eq!(collection.build_status, BuildStatus::Passed);
        assert_eq!(collection.pass_count, 2);
        assert_eq!(collection.fail_count, 1);
        assert_eq!(collection.error_count, 1);
        assert_eq!(collection.timeout_count, 1);
        assert_eq!(
            collection.pass_count + collection.fail_count + collection.error_count + collection.timeout_count,
            collection.total_tests
        );
        assert_eq!(collection.total_tests, collection.outcomes.len());
        assert_eq!(collection.total_time_ms, 1_536);
        assert_eq!(collection.build_output, None);
        assert_eq!(collection.submission_id, "sub-7");
        assert_eq!(collection.attempt, 2);
    }

    #[test]
    fn preserves_manifest_order() {
        let collection = assemble(
            vec![
                outcome("z", OutcomeStatus::Pass, 1),
                outcome("a", OutcomeStatus::Fail, 1),
                outcome("m", OutcomeStatus::Pass, 1),
            ],
            &job(),
        );
        let names: Vec<_> = collection.outcomes.iter().map(|o| o.test_name.as_str()).collect();
        assert_eq!(names, ["z", "a", "m"]);
    }

    #[test]
    fn empty_outcomes_force_failed_build() {
        let collection = assemble(Vec::new(), &job());
        assert_eq!(collection.build_status, BuildStatus::Failed);
        assert!(collection.outcomes.is_empty());
        assert_eq!(collection.total_tests, 0);
        assert!(collection.build_output.is_some());
    }

    #[test]
    fn build_failure_carries_diagnostic_only() {
        let collection = build_failed(&job(), "main.c:3: error: expected ';'");
        assert_eq!(collection.build_status, BuildStatus::Failed);
        assert!(collection.outcomes.is_empty());
        assert_eq!(collection.build_output.as_deref(), Some("main.c:3: error: expected ';'"));
        assert!(collection.runner_version.starts_with("grader-worker/"));
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let collection = assemble(vec![outcome("a", OutcomeStatus::Pass, 3)], &job());
        let json = serde_json::to_value(&collection).unwrap();
        assert_eq!(json["buildStatus"], "passed");
        assert_eq!(json["passCount"], 1);
        assert_eq!(json["outcomes"][0]["testName"], "a");
        assert_eq!(json["outcomes"][0]["isFirstPassSuccess"], false);
        assert!(json["buildOutput"].is_null());
    }
}
