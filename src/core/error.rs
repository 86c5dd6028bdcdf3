//! Error types for scheduler operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Filesystem failure while touching a persisted file.
    #[error("io error on {path}: {source}")]
    Io {
        /// File being read or written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// JSON encode/decode failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Malformed job descriptor.
    #[error("invalid job: {0}")]
    Validation(String),
    /// Configuration rejected at startup.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
    /// Background task could not be joined.
    #[error("task join error: {0}")]
    Join(String),
    /// The scheduler is shutting down.
    #[error("scheduler is shutting down")]
    Cancelled,
}

impl SchedulerError {
    /// Wrap an I/O error together with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure reported by the implementation collaborator.
///
/// `error_type` is the short classification used for failure signatures
/// (for example `ModuleNotFoundError`); `message` is the raw text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{error_type}: {message}")]
pub struct ImplementError {
    /// Error classification.
    pub error_type: String,
    /// Human-readable error text.
    pub message: String,
}

impl ImplementError {
    /// Build an error with an explicit type.
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Build an error from raw collaborator output, splitting a leading
    /// `Type: message` prefix when present.
    pub fn from_message(raw: impl AsRef<str>) -> Self {
        let raw = raw.as_ref().trim();
        if let Some((head, tail)) = raw.split_once(':') {
            let head = head.trim();
            if !head.is_empty() && !head.contains(char::is_whitespace) {
                return Self::new(head, tail.trim());
            }
        }
        Self::new("UnknownError", raw)
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
