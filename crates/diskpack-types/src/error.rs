use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("blob ref is empty")]
    EmptyRef,

    #[error("blob ref too long: {len} bytes (max {max})")]
    RefTooLong { len: usize, max: usize },

    #[error("blob ref {0:?} contains whitespace or control characters")]
    InvalidRefChar(String),

    #[error("blob ref is not valid UTF-8")]
    InvalidUtf8,
}
