mod isolated;
mod process;
pub mod profile;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;

use crate::{config::WorkerSettings, error::WorkerError};

pub use isolated::{NamespaceSandbox, SeatbeltSandbox};
pub use process::ProcessSandbox;
pub use profile::IsolationPlatform;

pub const TIMEOUT_EXIT_CODE: i32 = -1;
pub const LAUNCH_FAILURE_EXIT_CODE: i32 = -2;
pub const KILL_GRACE_PERIOD: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ScriptRequest {
    pub script: PathBuf,
    pub working_dir: PathBuf,
    pub time_limit_secs: u64,
}

impl ScriptRequest {
    pub fn new(script: impl Into<PathBuf>, working_dir: impl Into<PathBuf>, time_limit_secs: u64) -> Self {
        Self {
            script: script.into(),
            working_dir: working_dir.into(),
            time_limit_secs,
        }
    }

    pub fn time_limit(&self) -> Duration {
        Duration::from_secs(self.time_limit_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl ScriptResult {
    pub fn launch_failure(message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            exit_code: LAUNCH_FAILURE_EXIT_CODE,
            stdout: String::new(),
            stderr: message.into(),
            duration_ms: duration_ms(elapsed),
            timed_out: false,
        }
    }
}

/// Runs one script with a deadline. Never fails: launch problems come back as a
/// synthetic [`ScriptResult`].
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    fn name(&self) -> &'static str;
    async fn execute(&self, request: ScriptRequest) -> ScriptResult;
}

pub struct SandboxFactory;

impl SandboxFactory {
    pub async fn from_settings(
        settings: &WorkerSettings,
    ) -> Result<Arc<dyn ScriptExecutor>, WorkerError> {
        let shell = settings.shell.clone();
        let max_output = settings.max_output_bytes;

        if !settings.isolate {
            tracing::warn!("isolation disabled, scripts run without a sandbox");
            return Ok(Arc::new(ProcessSandbox::new(shell, max_output)));
        }

        match IsolationPlatform::current() {
            IsolationPlatform::Namespaces => {
                let sandbox = NamespaceSandbox::new(shell, max_output);
                sandbox.probe().await.map_err(|err| {
                    WorkerError::Config(format!("namespace isolation unavailable: {err}"))
                })?;
                Ok(Arc::new(sandbox))
            }
            IsolationPlatform::Seatbelt => {
                let sandbox = SeatbeltSandbox::new(shell, max_output);
                sandbox.probe().map_err(|err| {
                    WorkerError::Config(format!("seatbelt isolation unavailable: {err}"))
                })?;
                Ok(Arc::new(sandbox))
            }
            // Availability over strictness: an unknown target still grades, unsandboxed.
            IsolationPlatform::Unsupported => {
                tracing::warn!(
                    os = std::env::consts::OS,
                    "no isolation mechanism for this platform, falling back to unisolated execution"
                );
                Ok(Arc::new(ProcessSandbox::new(shell, max_output)))
            }
        }
    }
}

pub(crate) fn duration_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

pub(crate) fn display_path(path: &Path) -> String {
    path.display().to_string()
}
