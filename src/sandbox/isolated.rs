use std::{path::PathBuf, process::Stdio};

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;

use crate::sandbox::{
    ScriptExecutor, ScriptRequest, ScriptResult,
    process::run_command,
    profile::{self, SANDBOX_EXEC_PROGRAM, UNSHARE_PROGRAM},
};

pub struct NamespaceSandbox {
    shell: PathBuf,
    max_output_bytes: usize,
}

impl NamespaceSandbox {
    pub fn new(shell: impl Into<PathBuf>, max_output_bytes: usize) -> Self {
        Self {
            shell: shell.into(),
            max_output_bytes,
        }
    }

    pub async fn probe(&self) -> anyhow::Result<()> {
        let status = Command::new(UNSHARE_PROGRAM)
            .args(["--user", "--net", "--", "true"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .with_context(|| format!("failed to run {UNSHARE_PROGRAM}"))?;
        anyhow::ensure!(status.success(), "{UNSHARE_PROGRAM} probe exited with {status}");
        Ok(())
    }
}

#[async_trait]
impl ScriptExecutor for NamespaceSandbox {
    fn name(&self) -> &'static str {
        "namespace"
    }

    async fn execute(&self, request: ScriptRequest) -> ScriptResult {
        let mut cmd = Command::new(UNSHARE_PROGRAM);
        cmd.args(profile::namespace_args(&self.shell, &request.script));
        run_command(cmd, &request, self.max_output_bytes).await
    }
}

pub struct SeatbeltSandbox {
    shell: PathBuf,
    max_output_bytes: usize,
}

impl SeatbeltSandbox {
    pub fn new(shell: impl Into<PathBuf>, max_output_bytes: usize) -> Self {
        Self {
            shell: shell.into(),
            max_output_bytes,
        }
    }

    pub fn probe(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            std::path::Path::new(SANDBOX_EXEC_PROGRAM).exists(),
            "{SANDBOX_EXEC_PROGRAM} not found"
        );
        Ok(())
    }
}

#[async_trait]
impl ScriptExecutor for SeatbeltSandbox {
    fn name(&self) -> &'static str {
        "seatbelt"
    }

    async fn execute(&self, request: ScriptRequest) -> ScriptResult {
        let working_dir = profile::canonical_working_dir(&request.working_dir);
        let mut cmd = Command::new(SANDBOX_EXEC_PROGRAM);
        cmd.arg("-p")
            .arg(profile::seatbelt_profile(&working_dir))
            .arg(&self.shell)
            .arg(&request.script);
        run_command(cmd, &request, self.max_output_bytes).await
    }
}
