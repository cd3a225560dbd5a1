use std::{path::PathBuf, time::Duration};

use clap::{ArgAction, Parser};
use reqwest::Url;

use crate::error::WorkerError;

const MAX_SLOTS: usize = 256;

#[derive(Parser, Debug, Clone)]
#[command(name = "grader-worker")]
#[command(version)]
#[command(about = "Claims pending submissions, runs their test scripts in a sandbox and reports the results")]
pub struct WorkerConfig {
    /// Base URL of the job source
    #[arg(long, env = "GRADER_BASE_URL")]
    pub base_url: String,

    /// Identity this worker claims jobs under
    #[arg(long, env = "GRADER_WORKER_ID")]
    pub worker_id: String,

    /// Number of concurrent execution slots
    #[arg(long, env = "GRADER_MAX_SLOTS", default_value_t = 4)]
    pub max_slots: usize,

    /// Run scripts inside the platform sandbox
    #[arg(long, env = "GRADER_ISOLATE", default_value_t = true, action = ArgAction::Set)]
    pub isolate: bool,

    /// Single-instance lock file (defaults to one per worker id in the temp dir)
    #[arg(long, env = "GRADER_LOCK_FILE")]
    pub lock_file: Option<PathBuf>,

    /// Capability tags advertised when claiming jobs
    #[arg(long = "capability", env = "GRADER_CAPABILITIES", value_delimiter = ',', default_value = "sh")]
    pub capabilities: Vec<String>,

    /// Directory under which per-job workspaces are created
    #[arg(long, env = "GRADER_WORK_ROOT")]
    pub work_root: Option<PathBuf>,

    /// Interpreter used to run test scripts
    #[arg(long, env = "GRADER_SHELL", default_value = "/bin/sh")]
    pub shell: PathBuf,

    #[arg(long, default_value_t = 500)]
    pub backoff_initial_ms: u64,

    #[arg(long, default_value_t = 30_000)]
    pub backoff_max_ms: u64,

    #[arg(long, default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Cap on captured bytes per output stream
    #[arg(long, default_value_t = 1024 * 1024)]
    pub max_output_bytes: usize,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub base_url: Url,
    pub worker_id: String,
    pub capabilities: Vec<String>,
    pub max_slots: usize,
    pub isolate: bool,
    pub lock_file: PathBuf,
    pub work_root: PathBuf,
    pub shell: PathBuf,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub request_timeout: Duration,
    pub max_output_bytes: usize,
}

impl WorkerConfig {
    pub fn validate(self) -> Result<WorkerSettings, WorkerError> {
        let worker_id = self.worker_id.trim().to_string();
        if worker_id.is_empty() {
            return Err(WorkerError::Config("worker id must not be empty".into()));
        }

        let base_url = Url::parse(self.base_url.trim())
            .map_err(|err| WorkerError::Config(format!("invalid base url {}: {err}", self.base_url)))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(WorkerError::Config(format!(
                "base url must be http or https, got {}",
                base_url.scheme()
            )));
        }

        if !(1..=MAX_SLOTS).contains(&self.max_slots) {
            return Err(WorkerError::Config(format!(
                "max slots must be between 1 and {MAX_SLOTS}, got {}",
                self.max_slots
            )));
        }

        if self.backoff_initial_ms == 0 || self.backoff_initial_ms > self.backoff_max_ms {
            return Err(WorkerError::Config(format!(
                "backoff bounds must satisfy 0 < initial <= max, got {} and {}",
                self.backoff_initial_ms, self.backoff_max_ms
            )));
        }

        let capabilities = self
            .capabilities
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        let lock_file = self.lock_file.unwrap_or_else(|| {
            std::env::temp_dir().join(format!("grader-worker-{}.lock", sanitize(&worker_id)))
        });

        Ok(WorkerSettings {
            base_url,
            worker_id,
            capabilities,
            max_slots: self.max_slots,
            isolate: self.isolate,
            lock_file,
            work_root: self.work_root.unwrap_or_else(std::env::temp_dir),
            shell: self.shell,
            backoff_initial: Duration::from_millis(self.backoff_initial_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            max_output_bytes: self.max_output_bytes.max(1024),
        })
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
