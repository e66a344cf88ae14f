//! Error types for StashDB core.

use stashdb_storage::StorageError;
use std::any::Any;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in StashDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The storage engine could not be opened.
    #[error("failed to open storage engine: {source}")]
    EngineOpen {
        /// Underlying engine failure.
        source: StorageError,
    },

    /// The storage engine could not be closed cleanly.
    #[error("failed to close storage engine: {source}")]
    EngineClose {
        /// Underlying engine failure.
        source: StorageError,
    },

    /// Commit kept conflicting until the retry ceiling was reached.
    #[error("transaction conflict persisted after {attempts} attempts")]
    TransactionConflict {
        /// Number of attempts made.
        attempts: u32,
    },

    /// The key has never been written, or was deleted.
    #[error("key not found: {key}")]
    KeyNotFound {
        /// The key, lossily decoded as UTF-8.
        key: String,
    },

    /// A value could not be encoded.
    #[error("cannot serialize value for key {key}: {message}")]
    Serialization {
        /// The key being written.
        key: String,
        /// Encoder message.
        message: String,
    },

    /// Stored bytes do not decode as the requested type.
    #[error("cannot deserialize value for key {key}: {message}")]
    Deserialization {
        /// The key being read.
        key: String,
        /// Decoder message.
        message: String,
    },

    /// A snapshot could not be produced or written.
    #[error("export failed: {message}")]
    Export {
        /// Description of the failure.
        message: String,
    },

    /// A snapshot could not be read or parsed.
    #[error("import failed: {message}")]
    Import {
        /// Description of the failure.
        message: String,
    },

    /// The caller's context was cancelled or its deadline passed.
    #[error("operation cancelled")]
    Cancelled,

    /// A transaction closure panicked.
    #[error("transaction panicked: {message}")]
    Panicked {
        /// The panic payload, if it was a string.
        message: String,
    },

    /// The database is not started.
    #[error("database is closed")]
    DatabaseClosed,

    /// A write was attempted inside a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnlyTransaction,

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Transaction closure asked for its writes to be discarded.
    #[error("transaction aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },

    /// Storage engine error.
    #[error("storage error: {0}")]
    Storage(#[source] StorageError),

    /// Configuration could not be loaded.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates a key-not-found error.
    pub fn key_not_found(key: &[u8]) -> Self {
        Self::KeyNotFound {
            key: String::from_utf8_lossy(key).into_owned(),
        }
    }

    /// Creates an aborted error; return it from a closure to discard its writes.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an export error.
    pub fn export(message: impl Into<String>) -> Self {
        Self::Export {
            message: message.into(),
        }
    }

    /// Creates an import error.
    pub fn import(message: impl Into<String>) -> Self {
        Self::Import {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true for the "key not found" condition.
    #[must_use]
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound { .. })
    }

    /// Returns true if retries were exhausted on conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::TransactionConflict { .. })
    }

    /// Returns true if the operation stopped because of cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Closed => Self::DatabaseClosed,
            StorageError::ReadOnly => Self::ReadOnlyTransaction,
            other => Self::Storage(other),
        }
    }
}

/// Extracts a printable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
