//! Storage engine contract.

use crate::error::StorageResult;
use std::fmt;
use std::path::{Path, PathBuf};

/// Spelling of the in-memory location in configuration files.
pub const IN_MEMORY: &str = ":memory:";

/// Where an engine keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// Nothing is persisted; data is lost on close.
    InMemory,
    /// A directory holding the lock file and commit log.
    Path(PathBuf),
}

impl Location {
    /// Parses a configured location; `":memory:"` selects [`Location::InMemory`].
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if raw == IN_MEMORY {
            Self::InMemory
        } else {
            Self::Path(PathBuf::from(raw))
        }
    }

    /// Returns the directory for persistent locations.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::InMemory => None,
            Self::Path(path) => Some(path),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InMemory => f.write_str(IN_MEMORY),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Whether an attempt may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// Reads only; never conflicts and never takes the commit lock.
    ReadOnly,
    /// Reads and writes; validated at commit.
    ReadWrite,
}

/// A key/value pair as stored.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Entry {
    /// Key bytes.
    pub key: Vec<u8>,
    /// Value bytes.
    pub value: Vec<u8>,
}

impl Entry {
    /// Creates an entry.
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// The storage-provider boundary.
///
/// The database facade only ever talks to this trait, so another embedded
/// engine can be substituted without touching the facade or codec layers.
///
/// # Contract
///
/// - `open` acquires the engine resource at its location; `close` releases it,
///   is idempotent, and is a no-op on an engine that never opened
/// - every attempt from `begin` sees a consistent snapshot plus its own writes
/// - `commit` applies all writes or none; a lost race is reported as
///   [`crate::StorageError::Conflict`] and leaves no trace
/// - dropping an attempt without committing discards it
pub trait StorageEngine: Send + Sync {
    /// Opens the engine.
    ///
    /// # Errors
    ///
    /// Fails if the location is unusable (locked, corrupt, permission denied)
    /// or the engine is already open.
    fn open(&self) -> StorageResult<()>;

    /// Flushes and releases engine resources.
    ///
    /// # Errors
    ///
    /// Fails if pending data cannot be made durable.
    fn close(&self) -> StorageResult<()>;

    /// Returns true between a successful `open` and `close`.
    fn is_open(&self) -> bool;

    /// Begins a new atomic attempt.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Closed`] if the engine is not open.
    fn begin(&self, mode: TxMode) -> StorageResult<Box<dyn EngineTransaction + '_>>;
}

/// One atomic attempt against a [`StorageEngine`].
pub trait EngineTransaction {
    /// Returns the attempt's mode.
    fn mode(&self) -> TxMode;

    /// Reads a key; `None` means the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails to read.
    fn get(&mut self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Buffers a write.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadOnly`] on read-only attempts.
    fn set(&mut self, key: &[u8], value: &[u8]) -> StorageResult<()>;

    /// Buffers a removal. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadOnly`] on read-only attempts.
    fn delete(&mut self, key: &[u8]) -> StorageResult<()>;

    /// Returns every live entry visible to this attempt, sorted by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails to read.
    fn scan(&mut self) -> StorageResult<Vec<Entry>>;

    /// Validates and applies the buffered writes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::Conflict`] when a concurrently committed
    /// attempt modified a key this attempt read, or an I/O error from the
    /// commit log.
    fn commit(self: Box<Self>) -> StorageResult<()>;
}
