//! # StashDB Storage
//!
//! Storage engine contract and implementations for StashDB.
//!
//! This crate is the lowest layer of StashDB. It knows nothing about typed
//! values or snapshots: keys and values are opaque byte strings.
//!
//! ## Layers
//!
//! - [`StorageBackend`] - append-only byte log (read, append, flush, truncate)
//!   with the [`FileBackend`] implementation
//! - [`StorageEngine`] - the provider contract the database facade depends on:
//!   open, close, and begin an atomic attempt ([`EngineTransaction`])
//! - [`MvccEngine`] - the production engine: multi-version keyspace, optimistic
//!   read-set validation at commit, durable commit log on disk
//!
//! ## Example
//!
//! ```rust
//! use stashdb_storage::{EngineTransaction, Location, MvccEngine, StorageEngine, TxMode};
//!
//! let engine = MvccEngine::new(Location::InMemory);
//! engine.open().unwrap();
//!
//! let mut txn = engine.begin(TxMode::ReadWrite).unwrap();
//! txn.set(b"greeting", b"\"hello\"").unwrap();
//! txn.commit().unwrap();
//!
//! let mut txn = engine.begin(TxMode::ReadOnly).unwrap();
//! assert_eq!(txn.get(b"greeting").unwrap(), Some(b"\"hello\"".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod commit_log;
mod dir;
mod engine;
mod error;
mod file;
mod mvcc;
#[cfg(test)]
mod testing;

pub use backend::StorageBackend;
pub use commit_log::{CommitLog, CommitRecord, LogOp};
pub use dir::EngineDir;
pub use engine::{Entry, EngineTransaction, Location, StorageEngine, TxMode, IN_MEMORY};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use mvcc::{EngineOptions, MvccEngine};
