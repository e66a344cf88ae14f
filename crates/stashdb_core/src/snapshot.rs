//! Whole-keyspace export and import.
//!
//! ## Format
//!
//! A snapshot is one JSON object. Each member name is a key and each member
//! value is the stored value embedded verbatim, not re-encoded as a string:
//!
//! ```json
//! {"counter":42,"user:1":{"name":"Ada","tags":["x"]}}
//! ```
//!
//! This only works because every stored value is itself a JSON document, which
//! holds for everything written through the typed methods of [`Tx`](crate::Tx).
//! Keys must be UTF-8. There is no version field or checksum.

use crate::context::Context;
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use serde_json::value::RawValue;
use stashdb_storage::Entry;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use tracing::info;

/// Snapshot output options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportOptions {
    /// Put each top-level member on its own line. Values are still embedded
    /// exactly as stored.
    pub pretty: bool,
}

impl ExportOptions {
    /// Creates compact options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets pretty output.
    #[must_use]
    pub const fn pretty(mut self, value: bool) -> Self {
        self.pretty = value;
        self
    }
}

/// Result of a successful import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportStats {
    /// Number of entries written.
    pub entries: usize,
}

/// Encodes entries as a snapshot document.
///
/// # Errors
///
/// Returns [`CoreError::Export`] if a key is not UTF-8 or a value is not a
/// JSON document.
pub fn encode_snapshot(entries: &[Entry], options: ExportOptions) -> CoreResult<Vec<u8>> {
    let mut document: BTreeMap<&str, Box<RawValue>> = BTreeMap::new();
    for entry in entries {
        let key = std::str::from_utf8(&entry.key).map_err(|_| {
            CoreError::export(format!(
                "key {} is not valid UTF-8",
                String::from_utf8_lossy(&entry.key)
            ))
        })?;
        let text = String::from_utf8(entry.value.clone())
            .map_err(|_| CoreError::export(format!("value of {key} is not valid UTF-8")))?;
        let raw = RawValue::from_string(text)
            .map_err(|e| CoreError::export(format!("value of {key} is not a JSON document: {e}")))?;
        document.insert(key, raw);
    }

    let encoded = if options.pretty {
        serde_json::to_vec_pretty(&document)
    } else {
        serde_json::to_vec(&document)
    };
    encoded.map_err(|e| CoreError::export(e.to_string()))
}

/// Parses a snapshot document into entries sorted by key.
///
/// # Errors
///
/// Returns [`CoreError::Import`] if `bytes` are not a JSON object.
pub fn decode_snapshot(bytes: &[u8]) -> CoreResult<Vec<Entry>> {
    let document: BTreeMap<String, Box<RawValue>> =
        serde_json::from_slice(bytes).map_err(|e| CoreError::import(e.to_string()))?;
    Ok(document
        .into_iter()
        .map(|(key, value)| Entry::new(key, value.get()))
        .collect())
}

/// Writes a snapshot of `db` to `writer`.
///
/// The snapshot reflects one instant; concurrent writers are not blocked.
/// Returns the number of entries written.
///
/// # Errors
///
/// Returns [`CoreError::Export`] if the keyspace cannot be encoded or the
/// writer fails, and the usual [`Database::dump`] errors.
pub fn export_json<W: Write>(
    ctx: &Context,
    db: &Database,
    mut writer: W,
    options: ExportOptions,
) -> CoreResult<usize> {
    let entries = db.dump(ctx)?;
    let bytes = encode_snapshot(&entries, options)?;
    writer
        .write_all(&bytes)
        .and_then(|()| writer.flush())
        .map_err(|e| CoreError::export(e.to_string()))?;
    info!(entries = entries.len(), bytes = bytes.len(), "snapshot exported");
    Ok(entries.len())
}

/// Reads a snapshot from `reader` and writes every entry into `db`.
///
/// The whole stream is parsed before anything is written, so malformed input
/// leaves `db` untouched. All entries are then written in a single
/// transaction. Existing keys absent from the snapshot are left alone.
///
/// # Errors
///
/// Returns [`CoreError::Import`] on read or parse failure, and the usual
/// [`Database::run`] errors for the write.
pub fn import_json<R: Read>(ctx: &Context, db: &Database, mut reader: R) -> CoreResult<ImportStats> {
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|e| CoreError::import(e.to_string()))?;
    let entries = decode_snapshot(&bytes)?;

    db.run(ctx, |tx| {
        for entry in &entries {
            tx.set(&entry.key, &entry.value)?;
        }
        Ok(())
    })?;

    info!(entries = entries.len(), "snapshot imported");
    Ok(ImportStats {
        entries: entries.len(),
    })
}
