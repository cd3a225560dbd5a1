use serde_json::Value;

use crate::{
    models::{OutcomeStatus, TestEntry, TestOutcome},
    sandbox::ScriptResult,
};

pub fn interpret(result: &ScriptResult, entry: &TestEntry, attempt: u32) -> TestOutcome {
    let status = status_of(result);
    let short_result = short_result(&result.stdout)
        .unwrap_or_else(|| status.default_short_result().to_string());
    let long_result = Some(result.stderr.trim())
        .filter(|stderr| !stderr.is_empty())
        .map(str::to_string);

    TestOutcome {
        test_name: entry.test_name(),
        tier: entry.tier.clone(),
        status,
        short_result,
        long_result,
        exit_code: result.exit_code,
        timed_out: result.timed_out,
        execution_time_ms: result.duration_ms,
        attempt,
        is_first_pass_success: attempt == 1 && status == OutcomeStatus::Pass,
    }
}

pub fn status_of(result: &ScriptResult) -> OutcomeStatus {
    if result.timed_out {
        return OutcomeStatus::Timeout;
    }
    match result.exit_code {
        0 => OutcomeStatus::Pass,
        1 => OutcomeStatus::Fail,
        _ => OutcomeStatus::Error,
    }
}

fn short_result(stdout: &str) -> Option<String> {
    let line = stdout
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())?;

    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(fields)) => match fields.get("shortResult") {
            Some(Value::String(short)) => Some(short.clone()),
            _ => None,
        },
        // Non-object JSON ("42", "true") reads as plain text too.
        _ => Some(line.to_string()),
    }
}
