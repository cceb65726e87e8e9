//! Error types and exit codes for livecell

use std::process::ExitCode;
use thiserror::Error;

use crate::schema::Key;

/// Main error type for livecell operations
#[derive(Error, Debug)]
pub enum LiveCellError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Watcher error: {message}")]
    Watch { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A parent key resolved through the binding map has no registered worker.
    /// The driver never produces this on its own; seeing it means the cache
    /// and registry disagree.
    #[error("Internal error: no worker registered for parent key {key}")]
    UnknownParent { key: Key },

    #[error("Aggregator is no longer running")]
    AggregatorClosed,

    #[error("Evaluation did not settle within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LiveCellError {
    /// Convert error to a process exit code:
    /// - 1: File not found / IO error
    /// - 2: Configuration or watcher setup error
    /// - 3: Evaluation did not settle in time
    /// - 4: Internal engine failure
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::FileNotFound { .. } => ExitCode::from(1),
            Self::Io(_) => ExitCode::from(1),
            Self::Config { .. } => ExitCode::from(2),
            Self::Watch { .. } => ExitCode::from(2),
            Self::Timeout { .. } => ExitCode::from(3),
            Self::UnknownParent { .. } => ExitCode::from(4),
            Self::AggregatorClosed => ExitCode::from(4),
            Self::Json(_) => ExitCode::from(4),
        }
    }
}

/// Result type alias for livecell operations
pub type Result<T> = std::result::Result<T, LiveCellError>;
