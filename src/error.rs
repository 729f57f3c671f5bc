//! Error types for mirrorlock.
//!
//! Uses thiserror for derive macros. `Busy` and `Corrupt` are the two lock
//! outcomes callers are expected to branch on; the remaining variants cover
//! the ambient failures of the stores, the filesystem and the CLI.

use crate::exit_codes;
use thiserror::Error;

/// Main error type for mirrorlock operations.
#[derive(Error, Debug)]
pub enum LockError {
    /// The lock could not be acquired under the requested policy right now.
    ///
    /// Expected under contention and always recoverable by retrying later.
    #[error("Unable to acquire lock: {0}\nPlease try again later.")]
    Busy(String),

    /// The lock's persisted state is malformed or was mutated unexpectedly.
    ///
    /// Requires operator intervention to repair.
    #[error("Lock state corrupted: {0}")]
    Corrupt(String),

    /// An operation that requires a held lock was called without holding it.
    #[error("Lock not held: {0}")]
    NotHeld(String),

    /// The key/value service failed to answer.
    #[error("Key/value store failure: {0}")]
    Store(String),

    /// A local filesystem operation failed.
    #[error("I/O failure: {0}")]
    Io(String),

    /// Bad configuration or arguments.
    #[error("{0}")]
    UserError(String),
}

impl LockError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LockError::Busy(_) => exit_codes::LOCK_BUSY,
            LockError::Corrupt(_) => exit_codes::LOCK_CORRUPT,
            LockError::NotHeld(_) => exit_codes::USER_ERROR,
            LockError::Store(_) => exit_codes::IO_FAILURE,
            LockError::Io(_) => exit_codes::IO_FAILURE,
            LockError::UserError(_) => exit_codes::USER_ERROR,
        }
    }

    /// True for contention, which call sites treat as a normal outcome.
    pub fn is_busy(&self) -> bool {
        matches!(self, LockError::Busy(_))
    }
}

/// Result type alias for mirrorlock operations.
pub type Result<T> = std::result::Result<T, LockError>;
