//! # StashDB Core
//!
//! Embedded transactional key-value store with typed JSON values.
//!
//! This crate provides:
//! - [`Database`]: start/stop lifecycle, atomic [`run`](Database::run)
//!   transactions with transparent retry on conflict, read-only
//!   [`view`](Database::view)s and point-in-time [`dump`](Database::dump)s
//! - [`Tx`]: byte-level and typed (`get_typed`, `get_typed_or`, `set_typed`)
//!   access inside a transaction
//! - [`snapshot`]: whole-keyspace export and import as one JSON object
//! - [`Context`]: cancellation and deadlines for waiting operations
//! - [`jobs`]: fault isolation for scheduled work that uses the database
//!
//! ## Example
//!
//! ```rust
//! use serde::{Deserialize, Serialize};
//! use stashdb_core::{Context, Database};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Profile {
//!     name: String,
//!     karma: i64,
//! }
//!
//! let db = Database::in_memory();
//! let ctx = Context::background();
//! db.start(&ctx).unwrap();
//!
//! db.run(&ctx, |tx| {
//!     tx.set_typed("profile:1", &Profile { name: "Ada".into(), karma: 3 })
//! })
//! .unwrap();
//!
//! let profile: Profile = db.view(&ctx, |tx| tx.get_typed("profile:1")).unwrap();
//! assert_eq!(profile.karma, 3);
//!
//! let missing = db.view(&ctx, |tx| tx.get_typed::<Profile>("profile:2"));
//! assert!(missing.unwrap_err().is_key_not_found());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

mod config;
mod context;
mod database;
mod error;
pub mod jobs;
pub mod snapshot;
mod store;
mod tx;

pub use config::{config_path_from_env, Config, CONFIG_ENV, DEFAULT_CONFIG_FILE};
pub use context::Context;
pub use database::Database;
pub use error::{CoreError, CoreResult};
pub use jobs::{run_job, JobOutcome, JobReport, JobRunner};
pub use snapshot::{export_json, import_json, ExportOptions, ImportStats};
pub use store::{RawStore, RetryPolicy};
pub use tx::Tx;

// Re-export storage types callers need without depending on the storage crate.
pub use stashdb_storage::{Entry, Location, StorageEngine, IN_MEMORY};
