//! Error types for billsync.
//!
//! Library crates use [`BillSyncError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all billsync operations.
#[derive(Debug, thiserror::Error)]
pub enum BillSyncError {
    /// Configuration loading or validation error. Always fatal.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to the bill API.
    #[error("network error: {0}")]
    Network(String),

    /// JSON or XML payload did not have the expected shape.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Local database error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Remote feature store rejected or failed a request.
    #[error("feature store error: {0}")]
    Store(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BillSyncError>;

impl BillSyncError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error should halt the process rather than degrade.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::Io { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = BillSyncError::config("GOVINFO_API_KEY is not set");
        assert_eq!(err.to_string(), "config error: GOVINFO_API_KEY is not set");

        let err = BillSyncError::parse("missing <latestAction>");
        assert!(err.to_string().contains("latestAction"));
    }

    #[test]
    fn only_config_and_io_are_fatal() {
        assert!(BillSyncError::config("bad").is_fatal());
        assert!(BillSyncError::io("/tmp/x", std::io::Error::other("boom")).is_fatal());
        assert!(!BillSyncError::Network("timeout".into()).is_fatal());
        assert!(!BillSyncError::Store("applyEdits failed".into()).is_fatal());
    }
}
