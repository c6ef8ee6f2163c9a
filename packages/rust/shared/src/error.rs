//! Error types for ManualForge.
//!
//! Library crates use [`ManualForgeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! The first five variants form the per-record stage taxonomy; a record
//! that hits any of them settles as `Failed`. The rest are ambient errors
//! (config, storage bootstrap, filesystem) that abort the caller.

use std::path::PathBuf;

/// Top-level error type for all ManualForge operations.
#[derive(Debug, thiserror::Error)]
pub enum ManualForgeError {
    /// Network/transport error while retrieving a document or the catalog.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// The document is malformed and its structure cannot be read.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Page removal could not be performed on an accepted document.
    #[error("transform error: {0}")]
    Transform(String),

    /// Text could not be read out of the trimmed document.
    #[error("extraction error: {0}")]
    Extraction(String),

    /// Content write or record commit failed.
    ///
    /// `transient` marks store contention, which is worth a bounded retry.
    #[error("persist error: {message}")]
    Persist { message: String, transient: bool },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Database or storage layer error outside of a record commit.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad record shape, illegal state transition).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ManualForgeError>;

impl ManualForgeError {
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

    /// Create a persist error; `transient` is true for lock contention.
    pub fn persist(msg: impl Into<String>, transient: bool) -> Self {
        Self::Persist {
            message: msg.into(),
            transient,
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Persist { transient: true, .. })
    }

    /// Re-express any error as a persist failure, keeping transience.
    pub fn into_persist(self) -> Self {
        match self {
            err @ Self::Persist { .. } => err,
            other => Self::persist(other.to_string(), false),
        }
    }
}
