use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

pub const UNSHARE_PROGRAM: &str = "unshare";
pub const SANDBOX_EXEC_PROGRAM: &str = "/usr/bin/sandbox-exec";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationPlatform {
    Namespaces,
    Seatbelt,
    Unsupported,
}

impl IsolationPlatform {
    pub fn current() -> Self {
        Self::for_os(std::env::consts::OS)
    }

    pub fn for_os(os: &str) -> Self {
        match os {
            "linux" => Self::Namespaces,
            "macos" => Self::Seatbelt,
            _ => Self::Unsupported,
        }
    }
}

pub fn namespace_args(shell: &Path, script: &Path) -> Vec<OsString> {
    vec![
        OsString::from("--user"),
        OsString::from("--net"),
        OsString::from("--"),
        shell.as_os_str().to_owned(),
        script.as_os_str().to_owned(),
    ]
}

pub fn seatbelt_profile(working_dir: &Path) -> String {
    let dir = escape_profile_string(&working_dir.to_string_lossy());
    format!(
        r##"(version 1)
(deny default)
(allow process-fork)
(allow process-exec)
(allow signal (target same-sandbox))
(allow sysctl-read)
(allow mach-lookup)
(allow ipc-posix-shm)
(allow file-read*)
(allow file-write*
    (subpath "{dir}")
    (literal "/dev/null")
    (literal "/dev/zero")
    (literal "/dev/stdout")
    (literal "/dev/stderr")
    (literal "/dev/tty")
    (regex #"^/dev/fd/[0-9]+$"))
(allow file-ioctl (literal "/dev/tty"))
(deny network*)
"##
    )
}

// `sandbox-exec` resolves symlinks before matching, so `/var/...` must be given as
// `/private/var/...`.
pub fn canonical_working_dir(working_dir: &Path) -> PathBuf {
    std::fs::canonicalize(working_dir).unwrap_or_else(|_| working_dir.to_path_buf())
}

fn escape_profile_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            _ => out.push(ch),
        }
    }
    out
}
