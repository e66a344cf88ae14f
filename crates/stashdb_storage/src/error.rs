//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of a byte log.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// Persisted data failed validation.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// The engine is not open.
    #[error("storage engine is closed")]
    Closed,

    /// The engine was opened twice.
    #[error("storage engine is already open")]
    AlreadyOpen,

    /// Another engine instance holds the directory lock.
    #[error("storage directory is locked by another process: {}", path.display())]
    Locked {
        /// The locked directory.
        path: PathBuf,
    },

    /// The directory cannot be used as an engine location.
    #[error("invalid storage location: {0}")]
    InvalidLocation(String),

    /// A concurrently committed attempt invalidated this attempt's reads.
    #[error("write conflict: a key read by this transaction was modified concurrently")]
    Conflict,

    /// A failed commit could not be removed from the commit log, so the log
    /// accepts no further records until the engine is reopened.
    #[error("commit log is unusable after a failed write: {0}")]
    LogFailed(String),

    /// A write was issued on a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnly,
}

impl StorageError {
    /// Returns true if the failure is a commit-time conflict that may succeed on retry.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict)
    }

    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}
