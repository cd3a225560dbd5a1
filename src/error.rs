use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to open lock file {path}: {source}")]
    LockFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("another worker already holds the lock at {path}")]
    AlreadyRunning { path: PathBuf },
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("job source unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("job source answered {status} on {endpoint}")]
    Status {
        endpoint: &'static str,
        status: StatusCode,
    },
    #[error("malformed response from {endpoint}: {message}")]
    Malformed {
        endpoint: &'static str,
        message: String,
    },
    #[error("invalid location {location}: {message}")]
    InvalidLocation { location: String, message: String },
}

impl SourceError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Status { .. } => "status",
            Self::Malformed { .. } => "malformed",
            Self::InvalidLocation { .. } => "invalid_location",
        }
    }
}
