//! Byte logs for exercising the commit log in tests.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A byte log in a plain vector.
#[derive(Debug, Default)]
pub(crate) struct MemoryLog {
    bytes: Vec<u8>,
}

impl MemoryLog {
    pub(crate) fn with_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl StorageBackend for MemoryLog {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = self.bytes.len() as u64;
        usize::try_from(offset)
            .ok()
            .and_then(|start| self.bytes.get(start..start.checked_add(len)?))
            .map(<[u8]>::to_vec)
            .ok_or(StorageError::ReadPastEnd { offset, len, size })
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.bytes.len() as u64;
        self.bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.bytes.len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let new_size = usize::try_from(new_size).unwrap_or(usize::MAX);
        if new_size > self.bytes.len() {
            return Err(injected("truncate past end"));
        }
        self.bytes.truncate(new_size);
        Ok(())
    }
}

/// Failure switches shared between a test and a [`FaultyBackend`].
///
/// Each counter is the number of upcoming calls that fail.
#[derive(Debug, Default)]
pub(crate) struct Faults {
    torn_appends: AtomicUsize,
    syncs: AtomicUsize,
    truncates: AtomicUsize,
}

impl Faults {
    /// The next append writes half its bytes, then fails.
    pub(crate) fn tear_next_append(&self) {
        self.torn_appends.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_sync(&self) {
        self.syncs.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_truncate(&self) {
        self.truncates.fetch_add(1, Ordering::SeqCst);
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Wraps a backend and fails calls on demand.
pub(crate) struct FaultyBackend<B> {
    inner: B,
    faults: Arc<Faults>,
}

impl<B: StorageBackend> FaultyBackend<B> {
    pub(crate) fn new(inner: B, faults: Arc<Faults>) -> Self {
        Self { inner, faults }
    }
}

fn injected(what: &str) -> StorageError {
    StorageError::Io(io::Error::new(io::ErrorKind::Other, format!("injected: {what}")))
}

impl<B: StorageBackend> StorageBackend for FaultyBackend<B> {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if Faults::take(&self.faults.torn_appends) {
            self.inner.append(&data[..data.len() / 2])?;
            return Err(injected("torn append"));
        }
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if Faults::take(&self.faults.syncs) {
            return Err(injected("sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if Faults::take(&self.faults.truncates) {
            return Err(injected("truncate"));
        }
        self.inner.truncate(new_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_log_reads_back_appends() {
        let mut log = MemoryLog::default();
        assert_eq!(log.append(b"hello").unwrap(), 0);
        assert_eq!(log.append(b" world").unwrap(), 5);
        assert_eq!(log.read_at(6, 5).unwrap(), b"world");
        assert!(matches!(
            log.read_at(8, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn faults_fire_once() {
        let faults = Arc::new(Faults::default());
        let mut log = FaultyBackend::new(MemoryLog::default(), Arc::clone(&faults));

        faults.fail_next_sync();
        assert!(log.sync().is_err());
        assert!(log.sync().is_ok());

        faults.tear_next_append();
        assert!(log.append(b"abcd").is_err());
        assert_eq!(log.size().unwrap(), 2);
        log.append(b"ef").unwrap();
        assert_eq!(log.read_at(0, 4).unwrap(), b"abef");
    }
}
