//! Transaction handle and typed value access.

use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use stashdb_codec::{from_json, to_json};
use stashdb_storage::{EngineTransaction, Entry, TxMode};

/// Handle passed to transaction closures.
///
/// Reads see the snapshot the attempt started from plus this attempt's own
/// writes. Writes become visible to others only if the closure returns `Ok`
/// and the commit succeeds.
///
/// Typed methods encode values as JSON documents:
///
/// ```rust
/// use stashdb_core::{Context, Database};
///
/// let db = Database::in_memory();
/// let ctx = Context::background();
/// db.start(&ctx).unwrap();
///
/// db.run(&ctx, |tx| {
///     let visits: u64 = tx.get_typed_or("visits", 0)?;
///     tx.set_typed("visits", &(visits + 1))
/// })
/// .unwrap();
/// ```
pub struct Tx<'t> {
    raw: &'t mut dyn EngineTransaction,
}

impl<'t> Tx<'t> {
    pub(crate) fn new(raw: &'t mut dyn EngineTransaction) -> Self {
        Self { raw }
    }

    /// Returns true for transactions opened with [`Database::view`](crate::Database::view).
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.raw.mode() == TxMode::ReadOnly
    }

    /// Reads raw bytes; `None` means the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails to read.
    pub fn get(&mut self, key: impl AsRef<[u8]>) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.raw.get(key.as_ref())?)
    }

    /// Writes raw bytes.
    ///
    /// Values written as raw bytes should still be JSON documents if the
    /// database is going to be exported.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReadOnlyTransaction`] inside a read-only transaction.
    pub fn set(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> CoreResult<()> {
        Ok(self.raw.set(key.as_ref(), value.as_ref())?)
    }

    /// Removes a key. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ReadOnlyTransaction`] inside a read-only transaction.
    pub fn delete(&mut self, key: impl AsRef<[u8]>) -> CoreResult<()> {
        Ok(self.raw.delete(key.as_ref())?)
    }

    /// Returns true if the key exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails to read.
    pub fn contains(&mut self, key: impl AsRef<[u8]>) -> CoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Returns every entry visible to this transaction, sorted by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails to read.
    pub fn entries(&mut self) -> CoreResult<Vec<Entry>> {
        Ok(self.raw.scan()?)
    }

    /// Reads and decodes a value.
    ///
    /// # Errors
    ///
    /// - [`CoreError::KeyNotFound`] if the key does not exist
    /// - [`CoreError::Deserialization`] if the stored bytes are not a `T`
    pub fn get_typed<T: DeserializeOwned>(&mut self, key: impl AsRef<[u8]>) -> CoreResult<T> {
        let key = key.as_ref();
        let bytes = self
            .get(key)?
            .ok_or_else(|| CoreError::key_not_found(key))?;
        from_json(&bytes).map_err(|e| CoreError::Deserialization {
            key: String::from_utf8_lossy(key).into_owned(),
            message: e.message().to_string(),
        })
    }

    /// Like [`get_typed`](Self::get_typed), but returns `default` when the
    /// key does not exist. Other failures still propagate.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Deserialization`] or an engine error.
    pub fn get_typed_or<T: DeserializeOwned>(
        &mut self,
        key: impl AsRef<[u8]>,
        default: T,
    ) -> CoreResult<T> {
        match self.get_typed(key) {
            Err(CoreError::KeyNotFound { .. }) => Ok(default),
            other => other,
        }
    }

    /// Encodes and writes a value.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Serialization`] if `value` cannot be encoded
    /// - [`CoreError::ReadOnlyTransaction`] inside a read-only transaction
    pub fn set_typed<T: Serialize + ?Sized>(
        &mut self,
        key: impl AsRef<[u8]>,
        value: &T,
    ) -> CoreResult<()> {
        let key = key.as_ref();
        let bytes = to_json(value).map_err(|e| CoreError::Serialization {
            key: String::from_utf8_lossy(key).into_owned(),
            message: e.message().to_string(),
        })?;
        self.set(key, bytes)
    }
}

impl std::fmt::Debug for Tx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tx")
            .field("mode", &self.raw.mode())
            .finish_non_exhaustive()
    }
}
