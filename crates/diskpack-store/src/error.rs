use std::path::PathBuf;

use diskpack_index::IndexError;
use diskpack_types::{BlobRef, TypeError};

/// Errors from storage engine operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested blob is not indexed.
    #[error("blob not found: {0}")]
    NotFound(BlobRef),

    /// I/O error reading or appending pack-file bytes.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A pack file could not be opened or created.
    #[error("cannot open pack {path}: {source}")]
    PackOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failure reported by the index backend.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// A ref could not be parsed or does not fit in a record header.
    #[error("invalid blob ref: {0}")]
    InvalidRef(#[from] TypeError),

    /// The record at an indexed location does not match its index entry.
    #[error("corrupt record for {blob_ref} in pack {pack} at offset {offset}: {reason}")]
    CorruptRecord {
        blob_ref: BlobRef,
        pack: u32,
        offset: u64,
        reason: String,
    },

    /// Invalid or unsupported configuration; the engine refuses to open.
    #[error("configuration error: {0}")]
    Config(String),

    /// A batch was cancelled between records.
    #[error("operation cancelled")]
    Cancelled,

    /// The engine has been closed.
    #[error("storage is closed")]
    Closed,

    /// The engine's write lock was poisoned by a panicking thread.
    #[error("storage lock poisoned: {0}")]
    Poisoned(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
