//! Error taxonomy for the collector
//!
//! Only `FatalConfig` and `Config` abort a run. Everything else is scoped to
//! a single host and ends up in that host's outcome line.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    /// Fleet definition missing: the process must stop.
    #[error("fleet definition {} does not exist", .0.display())]
    FatalConfig(PathBuf),

    #[error("invalid configuration {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },

    #[error("authentication failed for {address}: {reason}")]
    Authentication { address: String, reason: String },

    #[error("transport error with {address}: {reason}")]
    Transport { address: String, reason: String },

    #[error("filesystem error on {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("archive error in {}: {reason}", path.display())]
    Archive { path: PathBuf, reason: String },

    #[error("cannot persist marker {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed marker date {value:?}: {reason}")]
    Parse { value: String, reason: String },

    #[error("no credentials for {host}: {reason}")]
    Credentials { host: String, reason: String },
}

impl CollectorError {
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem { path: path.into(), source }
    }

    pub fn archive(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Archive { path: path.into(), reason: reason.into() }
    }

    /// Short machine-friendly tag used in the run summary.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FatalConfig(_) => "fatal_config",
            Self::Config { .. } => "config",
            Self::Authentication { .. } => "authentication",
            Self::Transport { .. } => "transport",
            Self::Filesystem { .. } => "filesystem",
            Self::Archive { .. } => "archive",
            Self::Persistence { .. } => "persistence",
            Self::Parse { .. } => "parse",
            Self::Credentials { .. } => "credentials",
        }
    }
}

pub type Result<T> = std::result::Result<T, CollectorError>;
