//! Error types for Lectern.
//!
//! Library crates use [`LecternError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Lectern operations.
#[derive(Debug, thiserror::Error)]
pub enum LecternError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Connectivity failure or non-success HTTP status.
    #[error("transport error: {0}")]
    Transport(String),

    /// Login handshake or session validation failed.
    #[error("authentication error: {0}")]
    Auth(String),

    /// A remote response did not have the structure we expected.
    #[error("unexpected response shape: {message}")]
    Shape { message: String },

    /// A catalog lookup parsed successfully but yielded zero entries.
    #[error("catalog is empty: {0}")]
    CatalogEmpty(String),

    /// A download or conversion produced a zero-byte file.
    #[error("empty artifact: {path:?}")]
    EmptyArtifact { path: PathBuf },

    /// Document conversion did not produce a canonical output.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// Reading or writing a canonical document for merging failed.
    #[error("merge error: {0}")]
    Merge(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad identifiers, malformed persisted JSON, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LecternError>;

impl LecternError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a response-shape error from any displayable message.
    pub fn shape(msg: impl Into<String>) -> Self {
        Self::Shape {
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

    /// Whether a caller may reasonably retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
