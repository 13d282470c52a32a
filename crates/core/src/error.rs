//! Error types for the data-access layer
//!
//! Three families of failures cross the store contract:
//!
//! | Family | Variants | Caller reaction |
//! |--------|----------|-----------------|
//! | Illegal state | `IllegalState`, `InvalidArgument`, `Unsupported` | Programming error, fix the call site |
//! | I/O | `Io`, `Backend`, `Interrupted` | Assume the transaction rolled back, maybe retry |
//! | Corruption | `Corrupted` | Unrecoverable backend state, never swallowed |

use thiserror::Error;

/// All errors raised by stores, transactions and their wrappers.
#[derive(Debug, Error)]
pub enum Error {
    /// Operation not allowed in the current lifecycle state
    /// (store not initialized or closed, transaction ended, write on a read-only transaction)
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Malformed argument (unknown record type, bad configuration value)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not implemented by the backend
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// A blocking wait was aborted before its permits could be acquired
    #[error("interrupted: {0}")]
    Interrupted(String),

    /// I/O error raised by the backend
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend failure that does not originate from `std::io`
    #[error("backend error: {0}")]
    Backend(String),

    /// Backend data is in an unrecoverable state
    #[error("data corrupted: {0}")]
    Corrupted(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for an [`Error::IllegalState`].
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Error::IllegalState(message.into())
    }

    /// Shorthand for an [`Error::InvalidArgument`].
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    /// Shorthand for an [`Error::Backend`].
    pub fn backend(message: impl Into<String>) -> Self {
        Error::Backend(message.into())
    }

    /// Check if this is a lifecycle / misuse error.
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, Error::IllegalState(_))
    }

    /// Check if this error comes from backend I/O.
    ///
    /// Callers should assume the enclosing transaction has been rolled back.
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Backend(_))
    }

    /// Check if a blocking wait was interrupted.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted(_))
    }

    /// Check if this is a serious/unrecoverable error.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corrupted(_))
    }
}
