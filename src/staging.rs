use std::{
    io::{self, Cursor, ErrorKind},
    path::{Path, PathBuf},
};

use anyhow::Context;
use bytes::Bytes;
use tempfile::TempDir;

use crate::{
    models::{BuildStep, Job, Manifest, TestEntry, is_contained_path},
    sandbox::{ScriptExecutor, ScriptRequest},
    source::JobSource,
};

const BUILD_SCRIPT_NAME: &str = ".grader-build.sh";
const BUILD_COMMAND: &str = "make";

/// Freshly created per-job directory. Removed by [`Workspace::remove`]; dropping it
/// only makes a best-effort attempt that ignores errors.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn create(root: &Path, job: &Job) -> anyhow::Result<Self> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("failed to create work root {}", root.display()))?;
        let prefix = format!("job-{}-{}-", sanitize(&job.submission_id), job.attempt);
        let dir = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(root)
            .with_context(|| format!("failed to create workspace under {}", root.display()))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Deletes the directory tree, first giving the owner back access to any
    /// directory a script (or an archive's stored modes) made read-only. Blocking.
    pub fn remove(self) -> io::Result<()> {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                restore_owner_access(&path)?;
                std::fs::remove_dir_all(&path)
            }
            closed => closed,
        }
    }
}

#[cfg(unix)]
fn restore_owner_access(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::symlink_metadata(dir)?;
    if !metadata.is_dir() {
        return Ok(());
    }
    let mut permissions = metadata.permissions();
    permissions.set_mode(permissions.mode() | 0o700);
    std::fs::set_permissions(dir, permissions)?;

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            restore_owner_access(&entry.path())?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn restore_owner_access(_dir: &Path) -> io::Result<()> {
    Ok(())
}

pub async fn stage(workspace: &Workspace, job: &Job, source: &dyn JobSource) -> anyhow::Result<()> {
    let submission = source
        .fetch_artifact(&job.submission_url)
        .await
        .context("failed to download submission")?;

    match job.original_filename.as_deref() {
        Some(name) => write_single_file(workspace.path(), name, &submission)
            .await
            .context("failed to stage single-file submission")?,
        None => unpack_zip(workspace.path(), submission)
            .await
            .context("failed to unpack submission archive")?,
    }

    let test_setup = source
        .fetch_artifact(&job.test_setup_url)
        .await
        .context("failed to download test setup")?;
    unpack_zip(workspace.path(), test_setup)
        .await
        .context("failed to unpack test setup archive")?;

    Ok(())
}

pub fn missing_required_files(workspace: &Workspace, manifest: &Manifest) -> Vec<String> {
    manifest
        .required_files
        .iter()
        .filter(|name| !is_contained_path(name) || !workspace.path().join(name).exists())
        .cloned()
        .collect()
}

pub fn resolve_script(workspace: &Workspace, entry: &TestEntry) -> Option<PathBuf> {
    if !is_contained_path(&entry.script) {
        return None;
    }
    let path = workspace.path().join(&entry.script);
    path.is_file().then_some(path)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Passed,
    Failed(String),
}

pub async fn run_build(
    workspace: &Workspace,
    build: &BuildStep,
    executor: &dyn ScriptExecutor,
) -> anyhow::Result<BuildOutcome> {
    let script = workspace.path().join(BUILD_SCRIPT_NAME);
    tokio::fs::write(&script, build_script(build.target.as_deref()))
        .await
        .context("failed to write build script")?;

    let limit = build.time_limit();
    let result = executor
        .execute(ScriptRequest::new(&script, workspace.path(), limit))
        .await;

    if result.timed_out {
        return Ok(BuildOutcome::Failed(format!("build timed out after {limit}s")));
    }
    if result.exit_code == 0 {
        return Ok(BuildOutcome::Passed);
    }

    let diagnostic = [result.stderr.trim(), result.stdout.trim()]
        .into_iter()
        .find(|text| !text.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("build exited with code {}", result.exit_code));
    Ok(BuildOutcome::Failed(diagnostic))
}

fn build_script(target: Option<&str>) -> String {
    match target {
        Some(target) => format!("exec {BUILD_COMMAND} {}\n", shell_quote(target)),
        None => format!("exec {BUILD_COMMAND}\n"),
    }
}

fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

async fn write_single_file(dir: &Path, name: &str, contents: &Bytes) -> anyhow::Result<()> {
    let file_name = Path::new(name)
        .file_name()
        .filter(|file_name| file_name.len() == name.len())
        .with_context(|| format!("original filename {name:?} is not a plain file name"))?;
    tokio::fs::write(dir.join(file_name), contents).await?;
    Ok(())
}

async fn unpack_zip(dir: &Path, archive: Bytes) -> anyhow::Result<()> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut archive = zip::ZipArchive::new(Cursor::new(archive)).context("not a zip archive")?;
        // Refuses entries whose paths escape `dir`.
        archive.extract(&dir).context("failed to extract archive")?;
        Ok::<_, anyhow::Error>(())
    })
    .await
    .context("unpack task panicked")?
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .take(32)
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;

    fn job() -> Job {
        serde_json::from_value(serde_json::json!({
            "submissionId": "sub/../9",
            "testSetupId": "ts",
            "attempt": 3,
            "submissionUrl": "/a",
            "testSetupUrl": "/b",
            "manifest": {"requiredFiles": ["main.c", "../etc/passwd"]}
        }))
        .unwrap()
    }

    fn zip_of(entries: &[(&str, &str)]) -> Bytes {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        Bytes::from(writer.finish().unwrap().into_inner())
    }

    #[test]
    fn workspace_is_unique_and_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let first = Workspace::create(root.path(), &job()).unwrap();
        let second = Workspace::create(root.path(), &job()).unwrap();
        assert_ne!(first.path(), second.path());
        assert!(first.path().starts_with(root.path()));
        let name = first.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("job-sub____9-3-"), "{name}");

        let path = first.path().to_path_buf();
        drop(first);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn unpacks_nested_entries() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(root.path(), &job()).unwrap();
        unpack_zip(workspace.path(), zip_of(&[("main.c", "int main;"), ("tests/a.sh", "exit 0")]))
            .await
            .unwrap();
        assert!(workspace.path().join("tests/a.sh").is_file());
        assert_eq!(missing_required_files(&workspace, &job().manifest), vec!["../etc/passwd".to_string()]);
    }

    #[tokio::test]
    async fn corrupt_archive_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(root.path(), &job()).unwrap();
        let err = unpack_zip(workspace.path(), Bytes::from_static(b"definitely not a zip"))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("not a zip archive"));
    }

    #[tokio::test]
    async fn single_file_rejects_path_components() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(root.path(), &job()).unwrap();
        let body = Bytes::from_static(b"print(1)");
        write_single_file(workspace.path(), "solution.py", &body).await.unwrap();
        assert!(workspace.path().join("solution.py").is_file());
        assert!(write_single_file(workspace.path(), "../escape.py", &body).await.is_err());
        assert!(write_single_file(workspace.path(), "dir/x.py", &body).await.is_err());
    }

    #[test]
    fn resolves_only_contained_existing_scripts() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(root.path(), &job()).unwrap();
        std::fs::write(workspace.path().join("present.sh"), "exit 0").unwrap();

        let entry = |script: &str| TestEntry {
            tier: "public".into(),
            script: script.into(),
            time_limit_seconds: None,
        };
        assert!(resolve_script(&workspace, &entry("present.sh")).is_some());
        assert!(resolve_script(&workspace, &entry("absent.sh")).is_none());
        assert!(resolve_script(&workspace, &entry("../present.sh")).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn remove_clears_read_only_directories() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(root.path(), &job()).unwrap();
        let locked = workspace.path().join("d");
        let sealed = workspace.path().join("d2/inner");
        std::fs::create_dir(&locked).unwrap();
        std::fs::write(locked.join("f"), "x").unwrap();
        std::fs::create_dir_all(&sealed).unwrap();
        std::fs::write(sealed.join("g"), "y").unwrap();
        std::fs::set_permissions(&sealed, std::fs::Permissions::from_mode(0o000)).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555)).unwrap();

        let path = workspace.path().to_path_buf();
        workspace.remove().unwrap();
        assert!(!path.exists(), "workspace left behind: {}", path.display());
    }

    #[test]
    fn build_script_quotes_target() {
        assert_eq!(build_script(None), "exec make\n");
        assert_eq!(build_script(Some("test")), "exec make 'test'\n");
        assert_eq!(build_script(Some("a'; rm -rf /")), "exec make 'a'\\''; rm -rf /'\n");
    }
}
