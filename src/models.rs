use std::path::{Component, Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TIME_LIMIT_SECS: u64 = 10;
pub const DEFAULT_BUILD_TIME_LIMIT_SECS: u64 = 120;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub submission_id: String,
    pub test_setup_id: String,
    // 1-based.
    pub attempt: u32,
    pub submission_url: String,
    pub test_setup_url: String,
    pub manifest: Manifest,
    #[serde(default)]
    pub original_filename: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub required_files: Vec<String>,
    #[serde(default)]
    pub tests: Vec<TestEntry>,
    #[serde(default = "default_time_limit")]
    pub time_limit_seconds: u64,
    #[serde(default)]
    pub build: Option<BuildStep>,
}

impl Manifest {
    pub fn time_limit_for(&self, entry: &TestEntry) -> u64 {
        entry.time_limit_seconds.unwrap_or(self.time_limit_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestEntry {
    pub tier: String,
    pub script: String,
    #[serde(default)]
    pub time_limit_seconds: Option<u64>,
}

impl TestEntry {
    pub fn test_name(&self) -> String {
        Path::new(&self.script)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.script.clone())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStep {
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub time_limit_seconds: Option<u64>,
}

impl BuildStep {
    pub fn time_limit(&self) -> u64 {
        self.time_limit_seconds
            .unwrap_or(DEFAULT_BUILD_TIME_LIMIT_SECS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Pass,
    Fail,
    Error,
    Timeout,
}

impl OutcomeStatus {
    pub fn default_short_result(self) -> &'static str {
        match self {
            Self::Pass => "passed",
            Self::Fail => "failed",
            Self::Error => "error",
            Self::Timeout => "timed out",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Passed,
    Failed,
    // Never produced by this worker; part of the shared wire vocabulary.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestOutcome {
    pub test_name: String,
    pub tier: String,
    pub status: OutcomeStatus,
    pub short_result: String,
    pub long_result: Option<String>,
    pub exit_code: i32,
    pub timed_out: bool,
    pub execution_time_ms: u64,
    pub attempt: u32,
    pub is_first_pass_success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeCollection {
    pub submission_id: String,
    pub test_setup_id: String,
    pub attempt: u32,
    pub build_status: BuildStatus,
    pub build_output: Option<String>,
    pub outcomes: Vec<TestOutcome>,
    pub pass_count: usize,
    pub fail_count: usize,
    pub error_count: usize,
    pub timeout_count: usize,
    pub total_tests: usize,
    pub total_time_ms: u64,
    pub runner_version: String,
    pub timestamp: DateTime<Utc>,
}

pub fn is_contained_path(raw: &str) -> bool {
    let path = Path::new(raw);
    !raw.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

fn default_schema_version() -> u32 {
    1
}

fn default_time_limit() -> u64 {
    DEFAULT_TIME_LIMIT_SECS
}
