//! Error types for index operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading or mutating a blob index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The index has been closed and no longer accepts calls.
    #[error("index is closed")]
    Closed,

    /// An internal lock was poisoned by a panicking thread.
    #[error("index lock poisoned: {0}")]
    Poisoned(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The index log could not be opened at the given path.
    #[error("cannot open index log {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O error during file-based index operations.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for index operations.
pub type IndexResult<T> = std::result::Result<T, IndexError>;
