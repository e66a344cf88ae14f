//! Raw store adapter.
//!
//! [`RawStore`] owns one [`StorageEngine`] and turns its single-shot atomic
//! attempts into retried units of work: when a commit loses a race the whole
//! closure runs again against a fresh snapshot. Only conflicts are retried;
//! every other failure propagates unchanged.

use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use rand::Rng;
use stashdb_storage::{EngineTransaction, StorageEngine, StorageError, TxMode};
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded exponential backoff for conflicting attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before giving up with [`CoreError::TransactionConflict`].
    pub max_attempts: u32,
    /// Delay ceiling after the first conflict.
    pub backoff_base: Duration,
    /// Upper bound on any single delay.
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1000,
            backoff_base: Duration::from_micros(50),
            backoff_max: Duration::from_millis(5),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the attempt ceiling (at least one attempt is always made).
    #[must_use]
    pub const fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the first backoff delay.
    #[must_use]
    pub const fn backoff_base(mut self, delay: Duration) -> Self {
        self.backoff_base = delay;
        self
    }

    /// Sets the maximum backoff delay.
    #[must_use]
    pub const fn backoff_max(mut self, delay: Duration) -> Self {
        self.backoff_max = delay;
        self
    }

    /// Delay before retrying after `attempt` conflicts (1-based).
    ///
    /// The ceiling doubles per attempt up to `backoff_max`; the actual delay
    /// is drawn uniformly from the upper half of the ceiling.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(20);
        let ceiling = self
            .backoff_base
            .saturating_mul(1 << doublings)
            .min(self.backoff_max);
        let nanos = u64::try_from(ceiling.as_nanos()).unwrap_or(u64::MAX);
        if nanos == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(rand::thread_rng().gen_range(nanos / 2..=nanos))
    }
}

/// Adapter over one storage engine with retry-on-conflict.
pub struct RawStore {
    engine: Box<dyn StorageEngine>,
    retry: RetryPolicy,
}

impl RawStore {
    /// Wraps an engine.
    pub fn new(engine: Box<dyn StorageEngine>, retry: RetryPolicy) -> Self {
        Self { engine, retry }
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Opens the engine.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Cancelled`] if `ctx` is done,
    /// [`CoreError::InvalidOperation`] if the engine is already open, or
    /// [`CoreError::EngineOpen`] if the engine cannot open its location.
    pub fn open(&self, ctx: &Context) -> CoreResult<()> {
        ctx.check()?;
        self.engine.open().map_err(|source| match source {
            StorageError::AlreadyOpen => CoreError::invalid_operation("database already started"),
            source => CoreError::EngineOpen { source },
        })
    }

    /// Closes the engine. Safe to call when never opened.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EngineClose`] if pending data cannot be flushed.
    pub fn close(&self) -> CoreResult<()> {
        self.engine
            .close()
            .map_err(|source| CoreError::EngineClose { source })
    }

    /// Returns true while the engine is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.engine.is_open()
    }

    /// Runs `work` in an atomic attempt, retrying the whole closure on conflict.
    ///
    /// If `work` returns an error the attempt is discarded and the error is
    /// returned as-is. `ctx` is checked before every attempt and interrupts
    /// the backoff between attempts.
    ///
    /// # Errors
    ///
    /// - whatever `work` returns
    /// - [`CoreError::TransactionConflict`] once the retry ceiling is reached
    /// - [`CoreError::Cancelled`] if `ctx` is done before an attempt starts
    /// - [`CoreError::DatabaseClosed`] if the engine is not open
    pub fn attempt<T, F>(&self, ctx: &Context, mode: TxMode, mut work: F) -> CoreResult<T>
    where
        F: FnMut(&mut dyn EngineTransaction) -> CoreResult<T>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            ctx.check()?;
            attempt += 1;

            let mut txn = self.engine.begin(mode)?;
            let value = work(txn.as_mut())?;

            match txn.commit() {
                Ok(()) => return Ok(value),
                Err(err) if err.is_conflict() => {
                    if attempt >= max_attempts {
                        warn!(attempts = attempt, "giving up on conflicting transaction");
                        return Err(CoreError::TransactionConflict { attempts: attempt });
                    }
                    let delay = self.retry.backoff(attempt);
                    debug!(attempt, delay_us = delay.as_micros() as u64, "commit conflict, retrying");
                    ctx.sleep(delay)?;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl std::fmt::Debug for RawStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawStore")
            .field("open", &self.is_open())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stashdb_storage::{Location, MvccEngine, StorageResult};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn open_store(retry: RetryPolicy) -> RawStore {
        let store = RawStore::new(Box::new(MvccEngine::new(Location::InMemory)), retry);
        store.open(&Context::background()).unwrap();
        store
    }

    /// Engine whose commits conflict a fixed number of times.
    struct FlakyEngine {
        inner: MvccEngine,
        conflicts_left: AtomicU32,
    }

    struct FlakyTxn<'a> {
        inner: Box<dyn EngineTransaction + 'a>,
        conflict: bool,
    }

    impl StorageEngine for FlakyEngine {
        fn open(&self) -> StorageResult<()> {
            self.inner.open()
        }
        fn close(&self) -> StorageResult<()> {
            self.inner.close()
        }
        fn is_open(&self) -> bool {
            self.inner.is_open()
        }
        fn begin(&self, mode: TxMode) -> StorageResult<Box<dyn EngineTransaction + '_>> {
            let conflict = self
                .conflicts_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            Ok(Box::new(FlakyTxn {
                inner: self.inner.begin(mode)?,
                conflict,
            }))
        }
    }

    impl EngineTransaction for FlakyTxn<'_> {
        fn mode(&self) -> TxMode {
            self.inner.mode()
        }
        fn get(&mut self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
            self.inner.get(key)
        }
        fn set(&mut self, key: &[u8], value: &[u8]) -> StorageResult<()> {
            self.inner.set(key, value)
        }
        fn delete(&mut self, key: &[u8]) -> StorageResult<()> {
            self.inner.delete(key)
        }
        fn scan(&mut self) -> StorageResult<Vec<stashdb_storage::Entry>> {
            self.inner.scan()
        }
        fn commit(self: Box<Self>) -> StorageResult<()> {
            if self.conflict {
                Err(stashdb_storage::StorageError::Conflict)
            } else {
                self.inner.commit()
            }
        }
    }

    fn flaky(conflicts: u32, retry: RetryPolicy) -> RawStore {
        let engine = FlakyEngine {
            inner: MvccEngine::new(Location::InMemory),
            conflicts_left: AtomicU32::new(conflicts),
        };
        let store = RawStore::new(Box::new(engine), retry);
        store.open(&Context::background()).unwrap();
        store
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new()
            .backoff_base(Duration::from_micros(1))
            .backoff_max(Duration::from_micros(10))
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::new()
            .backoff_base(Duration::from_micros(100))
            .backoff_max(Duration::from_millis(1));

        let first = policy.backoff(1);
        assert!(first >= Duration::from_micros(50) && first <= Duration::from_micros(100));

        let third = policy.backoff(3);
        assert!(third >= Duration::from_micros(200) && third <= Duration::from_micros(400));

        for attempt in [10, 100, u32::MAX] {
            assert!(policy.backoff(attempt) <= Duration::from_millis(1));
        }
        assert_eq!(RetryPolicy::new().backoff_base(Duration::ZERO).backoff(5), Duration::ZERO);
    }

    #[test]
    fn retries_until_commit_succeeds() {
        let store = flaky(3, fast_retry());
        let runs = AtomicU32::new(0);

        store
            .attempt(&Context::background(), TxMode::ReadWrite, |txn| {
                runs.fetch_add(1, Ordering::SeqCst);
                txn.set(b"k", b"1")?;
                Ok(())
            })
            .unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn gives_up_at_ceiling() {
        let store = flaky(10, fast_retry().max_attempts(3));
        let err = store
            .attempt(&Context::background(), TxMode::ReadWrite, |txn| {
                txn.set(b"k", b"1")?;
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(err, CoreError::TransactionConflict { attempts: 3 }));
    }

    #[test]
    fn closure_errors_are_not_retried() {
        let store = open_store(fast_retry());
        let runs = AtomicU32::new(0);

        let err = store
            .attempt(&Context::background(), TxMode::ReadWrite, |txn| -> CoreResult<()> {
                runs.fetch_add(1, Ordering::SeqCst);
                txn.set(b"k", b"1")?;
                Err(CoreError::aborted("changed my mind"))
            })
            .unwrap_err();

        assert!(matches!(err, CoreError::Aborted { .. }));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let value = store
            .attempt(&Context::background(), TxMode::ReadOnly, |txn| Ok(txn.get(b"k")?))
            .unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn cancellation_stops_retries() {
        let ctx = Context::background();
        let store = flaky(u32::MAX, fast_retry());
        let runs = AtomicU32::new(0);

        let err = store
            .attempt(&ctx, TxMode::ReadWrite, |txn| {
                if runs.fetch_add(1, Ordering::SeqCst) == 2 {
                    ctx.cancel();
                }
                txn.set(b"k", b"1")?;
                Ok(())
            })
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn closed_engine_is_database_closed() {
        let store = RawStore::new(Box::new(MvccEngine::new(Location::InMemory)), fast_retry());
        let err = store
            .attempt(&Context::background(), TxMode::ReadOnly, |_| Ok(()))
            .unwrap_err();
        assert!(matches!(err, CoreError::DatabaseClosed));
    }

    #[test]
    fn opening_twice_is_invalid_operation() {
        let store = RawStore::new(Box::new(MvccEngine::new(Location::InMemory)), fast_retry());
        let ctx = Context::background();
        store.open(&ctx).unwrap();
        let err = store.open(&ctx).unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
        assert!(store.is_open());
    }
}
