//! Multi-version engine with optimistic concurrency control.
//!
//! Every key holds a short list of versions tagged with the commit sequence
//! that produced them. An attempt reads at the sequence current when it
//! began (its snapshot) and buffers its writes. At commit, under the commit
//! lock, each key the attempt read is checked for a version newer than the
//! snapshot; if one exists the attempt lost a race and fails with
//! [`StorageError::Conflict`]. Otherwise its writes are appended to the
//! commit log and installed under the next sequence number.
//!
//! Validation and installation happen under one lock, so the committed
//! attempts are equivalent to running them one at a time in sequence order.

use crate::commit_log::{CommitLog, CommitRecord, LogOp};
use crate::dir::EngineDir;
use crate::engine::{EngineTransaction, Entry, Location, StorageEngine, TxMode};
use crate::error::{StorageError, StorageResult};
use crate::file::FileBackend;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Tuning knobs for [`MvccEngine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Sync the commit log to disk on every commit (safer but slower).
    pub sync_on_commit: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
        }
    }
}

#[derive(Debug, Clone)]
struct Version {
    seq: u64,
    /// `None` marks a deletion.
    value: Option<Vec<u8>>,
}

type Keyspace = BTreeMap<Vec<u8>, Vec<Version>>;

#[derive(Debug, Default)]
struct CommitState {
    log: Option<CommitLog>,
    dir: Option<EngineDir>,
}

/// The production [`StorageEngine`].
///
/// Thread-safe: one instance is shared by all concurrent attempts.
pub struct MvccEngine {
    location: Location,
    options: EngineOptions,
    open: AtomicBool,
    keyspace: RwLock<Keyspace>,
    committed_seq: AtomicU64,
    /// The commit lock; also owns the on-disk resources.
    commit: Mutex<CommitState>,
    /// Snapshot sequence -> number of live attempts reading at it.
    snapshots: Mutex<BTreeMap<u64, usize>>,
}

impl MvccEngine {
    /// Creates a closed engine for `location` with default options.
    #[must_use]
    pub fn new(location: Location) -> Self {
        Self::with_options(location, EngineOptions::default())
    }

    /// Creates a closed engine for `location`.
    #[must_use]
    pub fn with_options(location: Location, options: EngineOptions) -> Self {
        Self {
            location,
            options,
            open: AtomicBool::new(false),
            keyspace: RwLock::new(BTreeMap::new()),
            committed_seq: AtomicU64::new(0),
            commit: Mutex::new(CommitState::default()),
            snapshots: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns the engine location.
    #[must_use]
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Returns the sequence of the latest commit.
    #[must_use]
    pub fn committed_sequence(&self) -> u64 {
        self.committed_seq.load(Ordering::Acquire)
    }

    /// Returns the number of attempts currently holding a snapshot.
    #[must_use]
    pub fn active_attempts(&self) -> usize {
        self.snapshots.lock().values().sum()
    }

    fn register_snapshot(&self) -> u64 {
        let mut snapshots = self.snapshots.lock();
        let seq = self.committed_seq.load(Ordering::Acquire);
        *snapshots.entry(seq).or_insert(0) += 1;
        seq
    }

    fn release_snapshot(&self, seq: u64) {
        let mut snapshots = self.snapshots.lock();
        if let Some(count) = snapshots.get_mut(&seq) {
            *count -= 1;
            if *count == 0 {
                snapshots.remove(&seq);
            }
        }
    }

    fn read_at(&self, key: &[u8], snapshot: u64) -> Option<Vec<u8>> {
        let keyspace = self.keyspace.read();
        visible(keyspace.get(key)?, snapshot).cloned()
    }

    fn scan_at(&self, snapshot: u64) -> BTreeMap<Vec<u8>, Vec<u8>> {
        let keyspace = self.keyspace.read();
        keyspace
            .iter()
            .filter_map(|(key, versions)| {
                visible(versions, snapshot).map(|value| (key.clone(), value.clone()))
            })
            .collect()
    }

    fn commit_attempt(
        &self,
        snapshot: u64,
        reads: &HashSet<Vec<u8>>,
        writes: &BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    ) -> StorageResult<u64> {
        let mut commit = self.commit.lock();
        if !self.open.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }

        {
            let keyspace = self.keyspace.read();
            let stale = reads.iter().any(|key| {
                keyspace
                    .get(key)
                    .and_then(|versions| versions.last())
                    .is_some_and(|latest| latest.seq > snapshot)
            });
            if stale {
                return Err(StorageError::Conflict);
            }
        }

        let sequence = self.committed_seq.load(Ordering::Acquire) + 1;

        if let Some(log) = commit.log.as_mut() {
            let ops = writes
                .iter()
                .map(|(key, value)| match value {
                    Some(value) => LogOp::Put {
                        key: key.clone(),
                        value: value.clone(),
                    },
                    None => LogOp::Delete { key: key.clone() },
                })
                .collect();
            log.append(&CommitRecord { sequence, ops })?;
        }

        {
            let mut keyspace = self.keyspace.write();
            for (key, value) in writes {
                keyspace.entry(key.clone()).or_default().push(Version {
                    seq: sequence,
                    value: value.clone(),
                });
            }
        }

        self.committed_seq.store(sequence, Ordering::Release);
        drop(commit);

        self.prune(writes.keys());
        Ok(sequence)
    }

    /// Drops versions no live snapshot can observe.
    fn prune<'k>(&self, keys: impl Iterator<Item = &'k Vec<u8>>) {
        let horizon = {
            let snapshots = self.snapshots.lock();
            snapshots
                .keys()
                .next()
                .copied()
                .unwrap_or_else(|| self.committed_seq.load(Ordering::Acquire))
        };

        let mut keyspace = self.keyspace.write();
        for key in keys {
            let Some(versions) = keyspace.get_mut(key) else {
                continue;
            };
            if let Some(oldest_needed) = versions.iter().rposition(|v| v.seq <= horizon) {
                versions.drain(..oldest_needed);
            }
            let only_tombstone = versions.len() == 1
                && versions[0].value.is_none()
                && versions[0].seq <= horizon;
            if only_tombstone {
                keyspace.remove(key);
            }
        }
    }
}

/// Returns the value visible at `snapshot`, if the key is live there.
fn visible(versions: &[Version], snapshot: u64) -> Option<&Vec<u8>> {
    versions
        .iter()
        .rev()
        .find(|v| v.seq <= snapshot)
        .and_then(|v| v.value.as_ref())
}

impl StorageEngine for MvccEngine {
    fn open(&self) -> StorageResult<()> {
        let mut commit = self.commit.lock();
        if self.open.load(Ordering::Acquire) {
            return Err(StorageError::AlreadyOpen);
        }

        let mut keyspace = Keyspace::new();
        let mut last_sequence = 0;

        if let Location::Path(path) = &self.location {
            let dir = EngineDir::open(path)?;
            let backend = FileBackend::open(&dir.commit_log_path())?;
            let mut log = CommitLog::new(Box::new(backend), self.options.sync_on_commit);

            for record in log.replay()? {
                for op in record.ops {
                    match op {
                        LogOp::Put { key, value } => {
                            keyspace.insert(
                                key,
                                vec![Version {
                                    seq: record.sequence,
                                    value: Some(value),
                                }],
                            );
                        }
                        LogOp::Delete { key } => {
                            keyspace.remove(&key);
                        }
                    }
                }
                last_sequence = record.sequence;
            }

            commit.log = Some(log);
            commit.dir = Some(dir);
        }

        let keys = keyspace.len();
        *self.keyspace.write() = keyspace;
        self.committed_seq.store(last_sequence, Ordering::Release);
        self.open.store(true, Ordering::Release);

        tracing::debug!(
            location = %self.location,
            keys,
            sequence = last_sequence,
            "storage engine opened"
        );
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        let mut commit = self.commit.lock();
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let synced = match commit.log.as_mut() {
            Some(log) => log.sync(),
            None => Ok(()),
        };
        commit.log = None;
        commit.dir = None;

        self.keyspace.write().clear();
        self.committed_seq.store(0, Ordering::Release);

        tracing::debug!(location = %self.location, "storage engine closed");
        synced
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn begin(&self, mode: TxMode) -> StorageResult<Box<dyn EngineTransaction + '_>> {
        if !self.is_open() {
            return Err(StorageError::Closed);
        }
        let snapshot = self.register_snapshot();
        Ok(Box::new(MvccTransaction {
            engine: self,
            mode,
            snapshot,
            reads: HashSet::new(),
            writes: BTreeMap::new(),
        }))
    }
}

impl std::fmt::Debug for MvccEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MvccEngine")
            .field("location", &self.location)
            .field("open", &self.is_open())
            .field("committed_seq", &self.committed_sequence())
            .finish_non_exhaustive()
    }
}

/// An attempt against an [`MvccEngine`].
struct MvccTransaction<'a> {
    engine: &'a MvccEngine,
    mode: TxMode,
    snapshot: u64,
    /// Keys whose committed value this attempt observed.
    reads: HashSet<Vec<u8>>,
    /// Pending writes; `None` is a delete.
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl MvccTransaction<'_> {
    fn ensure_open(&self) -> StorageResult<()> {
        if self.engine.is_open() {
            Ok(())
        } else {
            Err(StorageError::Closed)
        }
    }

    fn ensure_writable(&self) -> StorageResult<()> {
        self.ensure_open()?;
        match self.mode {
            TxMode::ReadWrite => Ok(()),
            TxMode::ReadOnly => Err(StorageError::ReadOnly),
        }
    }
}

impl EngineTransaction for MvccTransaction<'_> {
    fn mode(&self) -> TxMode {
        self.mode
    }

    fn get(&mut self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        if let Some(pending) = self.writes.get(key) {
            return Ok(pending.clone());
        }
        if self.mode == TxMode::ReadWrite {
            self.reads.insert(key.to_vec());
        }
        Ok(self.engine.read_at(key, self.snapshot))
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.ensure_writable()?;
        self.writes.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> StorageResult<()> {
        self.ensure_writable()?;
        self.writes.insert(key.to_vec(), None);
        Ok(())
    }

    /// Scans the snapshot merged with pending writes.
    ///
    /// In read-write attempts every returned key joins the read set. Keys
    /// inserted concurrently after the snapshot are not detected.
    fn scan(&mut self) -> StorageResult<Vec<Entry>> {
        self.ensure_open()?;
        let mut merged = self.engine.scan_at(self.snapshot);
        if self.mode == TxMode::ReadWrite {
            self.reads.extend(merged.keys().cloned());
        }
        for (key, pending) in &self.writes {
            match pending {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged
            .into_iter()
            .map(|(key, value)| Entry { key, value })
            .collect())
    }

    fn commit(self: Box<Self>) -> StorageResult<()> {
        if self.writes.is_empty() {
            return self.ensure_open();
        }
        self.engine
            .commit_attempt(self.snapshot, &self.reads, &self.writes)
            .map(|_| ())
    }
}

impl Drop for MvccTransaction<'_> {
    fn drop(&mut self) {
        self.engine.release_snapshot(self.snapshot);
    }
}
