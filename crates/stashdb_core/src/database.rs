//! Database facade.

use crate::config::Config;
use crate::context::Context;
use crate::error::{panic_message, CoreError, CoreResult};
use crate::store::RawStore;
use crate::tx::Tx;
use stashdb_storage::{EngineOptions, EngineTransaction, Entry, MvccEngine, StorageEngine, TxMode};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{info, warn};

/// The main database handle.
///
/// `Database` is the only object application code depends on. Create one at
/// process start, [`start`](Self::start) it, share it by reference or `Arc`
/// with everything that needs storage, and [`stop`](Self::stop) it at
/// shutdown.
///
/// # Transactions
///
/// [`run`](Self::run) executes a closure as one atomic unit. When the commit
/// loses a race with a concurrent transaction the closure is executed again
/// from scratch, so it must not have side effects outside the transaction.
///
/// ```rust
/// use stashdb_core::{Context, CoreError, Database};
///
/// let db = Database::in_memory();
/// let ctx = Context::background();
/// db.start(&ctx).unwrap();
///
/// db.run(&ctx, |tx| tx.set_typed("balance", &80)).unwrap();
///
/// // An error discards every write the closure made.
/// let result: Result<(), _> = db.run(&ctx, |tx| {
///     tx.set_typed("balance", &90)?;
///     Err(CoreError::aborted("insufficient funds"))
/// });
/// assert!(result.is_err());
///
/// let balance: i32 = db.view(&ctx, |tx| tx.get_typed("balance")).unwrap();
/// assert_eq!(balance, 80);
/// db.stop(&ctx).unwrap();
/// ```
pub struct Database {
    config: Config,
    store: RawStore,
}

impl Database {
    /// Creates a database over the production engine described by `config`.
    ///
    /// Nothing is opened until [`start`](Self::start).
    #[must_use]
    pub fn new(config: Config) -> Self {
        let engine = MvccEngine::with_options(
            config.location.clone(),
            EngineOptions {
                sync_on_commit: config.sync_on_commit,
            },
        );
        Self::with_engine(config, Box::new(engine))
    }

    /// Creates a database over a caller-supplied engine.
    ///
    /// `config.location` and `config.sync_on_commit` are ignored; the engine
    /// was already built with its own.
    #[must_use]
    pub fn with_engine(config: Config, engine: Box<dyn StorageEngine>) -> Self {
        let store = RawStore::new(engine, config.retry);
        Self { config, store }
    }

    /// Creates an in-memory database with default settings.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Config::default())
    }

    /// Returns database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Opens the underlying engine.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Cancelled`] if `ctx` is already done
    /// - [`CoreError::InvalidOperation`] if already started
    /// - [`CoreError::EngineOpen`] if the location is locked, corrupt, or
    ///   inaccessible
    pub fn start(&self, ctx: &Context) -> CoreResult<()> {
        if self.store.is_open() {
            return Err(CoreError::invalid_operation("database already started"));
        }
        self.store.open(ctx)?;
        info!(location = %self.config.location, "database started");
        Ok(())
    }

    /// Flushes and releases the engine.
    ///
    /// Idempotent, and a no-op when never started.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Cancelled`] if `ctx` is already done; the engine stays open
    /// - [`CoreError::EngineClose`] if pending data cannot be made durable
    pub fn stop(&self, ctx: &Context) -> CoreResult<()> {
        ctx.check()?;
        if !self.store.is_open() {
            return Ok(());
        }
        self.store.close()?;
        info!(location = %self.config.location, "database stopped");
        Ok(())
    }

    /// Returns true between [`start`](Self::start) and [`stop`](Self::stop).
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.store.is_open()
    }

    /// Runs `work` as one atomic read-write transaction.
    ///
    /// On `Ok` the writes are committed and the closure's value returned. On
    /// `Err` nothing is written and the error is returned unchanged. A panic
    /// inside `work` discards the attempt and is reported as
    /// [`CoreError::Panicked`]. Commit conflicts rerun `work` under the
    /// configured [`RetryPolicy`](crate::RetryPolicy).
    ///
    /// # Errors
    ///
    /// - whatever `work` returns
    /// - [`CoreError::TransactionConflict`] after the retry ceiling
    /// - [`CoreError::Panicked`] if `work` panicked
    /// - [`CoreError::Cancelled`] if `ctx` is done before an attempt starts
    /// - [`CoreError::DatabaseClosed`] if the database is not started
    pub fn run<T, F>(&self, ctx: &Context, mut work: F) -> CoreResult<T>
    where
        F: FnMut(&mut Tx<'_>) -> CoreResult<T>,
    {
        self.store
            .attempt(ctx, TxMode::ReadWrite, |raw| invoke(&mut work, raw))
    }

    /// Runs `work` in a read-only transaction over a consistent snapshot.
    ///
    /// Read-only transactions never conflict and never wait for writers.
    ///
    /// # Errors
    ///
    /// As [`run`](Self::run); writes fail with [`CoreError::ReadOnlyTransaction`].
    pub fn view<T, F>(&self, ctx: &Context, mut work: F) -> CoreResult<T>
    where
        F: FnMut(&mut Tx<'_>) -> CoreResult<T>,
    {
        self.store
            .attempt(ctx, TxMode::ReadOnly, |raw| invoke(&mut work, raw))
    }

    /// Returns every entry as of one instant, sorted by key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseClosed`] if not started, or
    /// [`CoreError::Cancelled`] if `ctx` is done.
    pub fn dump(&self, ctx: &Context) -> CoreResult<Vec<Entry>> {
        self.view(ctx, |tx| tx.entries())
    }
}

fn invoke<T, F>(work: &mut F, raw: &mut dyn EngineTransaction) -> CoreResult<T>
where
    F: FnMut(&mut Tx<'_>) -> CoreResult<T>,
{
    let mut tx = Tx::new(raw);
    match catch_unwind(AssertUnwindSafe(|| work(&mut tx))) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(panic = %message, "transaction closure panicked, attempt discarded");
            Err(CoreError::Panicked { message })
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("location", &self.config.location)
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.store.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RetryPolicy;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    fn started() -> (Database, Context) {
        let db = Database::in_memory();
        let ctx = Context::background();
        db.start(&ctx).unwrap();
        (db, ctx)
    }

    #[test]
    fn lifecycle() {
        let db = Database::in_memory();
        let ctx = Context::background();
        assert!(!db.is_started());

        // Stopping a database that never started is a no-op.
        db.stop(&ctx).unwrap();

        db.start(&ctx).unwrap();
        assert!(db.is_started());
        assert!(matches!(
            db.start(&ctx),
            Err(CoreError::InvalidOperation { .. })
        ));

        db.stop(&ctx).unwrap();
        db.stop(&ctx).unwrap();
        assert!(!db.is_started());
    }

    #[test]
    fn racing_starts_open_once() {
        let db = Arc::new(Database::in_memory());
        let ctx = Context::background();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = Arc::clone(&db);
                let ctx = ctx.clone();
                thread::spawn(move || db.start(&ctx))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for err in results.into_iter().filter_map(Result::err) {
            assert!(matches!(err, CoreError::InvalidOperation { .. }), "{err}");
        }
        assert!(db.is_started());
    }

    #[test]
    fn run_requires_start() {
        let db = Database::in_memory();
        let ctx = Context::background();
        let err = db.run(&ctx, |tx| tx.set("k", "1")).unwrap_err();
        assert!(matches!(err, CoreError::DatabaseClosed));

        db.start(&ctx).unwrap();
        db.stop(&ctx).unwrap();
        let err = db.dump(&ctx).unwrap_err();
        assert!(matches!(err, CoreError::DatabaseClosed));
    }

    #[test]
    fn cancelled_start_does_not_open() {
        let db = Database::in_memory();
        let ctx = Context::background();
        ctx.cancel();
        assert!(db.start(&ctx).unwrap_err().is_cancelled());
        assert!(!db.is_started());
    }

    #[test]
    fn run_returns_closure_value() {
        let (db, ctx) = started();
        let n = db
            .run(&ctx, |tx| {
                tx.set_typed("n", &41)?;
                Ok(tx.get_typed::<i32>("n")? + 1)
            })
            .unwrap();
        assert_eq!(n, 42);
    }

    #[test]
    fn view_rejects_writes() {
        let (db, ctx) = started();
        let err = db.view(&ctx, |tx| tx.set("k", "1")).unwrap_err();
        assert!(matches!(err, CoreError::ReadOnlyTransaction));
        assert!(db.view(&ctx, |tx| Ok(tx.is_read_only())).unwrap());
    }

    #[test]
    fn panic_is_contained() {
        let (db, ctx) = started();
        db.run(&ctx, |tx| tx.set_typed("k", &80)).unwrap();

        let err = db
            .run(&ctx, |tx| -> CoreResult<()> {
                tx.set_typed("k", &90)?;
                panic!("boom");
            })
            .unwrap_err();
        assert!(matches!(err, CoreError::Panicked { ref message } if message == "boom"));

        let value: i32 = db.view(&ctx, |tx| tx.get_typed("k")).unwrap();
        assert_eq!(value, 80);
    }

    #[test]
    fn dump_is_sorted_snapshot() {
        let (db, ctx) = started();
        db.run(&ctx, |tx| {
            tx.set_typed("b", &2)?;
            tx.set_typed("a", &1)?;
            tx.set_typed("c", &3)?;
            tx.delete("c")
        })
        .unwrap();

        let entries = db.dump(&ctx).unwrap();
        assert_eq!(
            entries,
            vec![Entry::new(b"a".to_vec(), b"1".to_vec()), Entry::new(b"b".to_vec(), b"2".to_vec())]
        );
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let (db, ctx) = started();
        let db = Arc::new(db);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = Arc::clone(&db);
                let ctx = ctx.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        db.run(&ctx, |tx| {
                            let n: u64 = tx.get_typed_or("counter", 0)?;
                            tx.set_typed("counter", &(n + 1))
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let n: u64 = db.view(&ctx, |tx| tx.get_typed("counter")).unwrap();
        assert_eq!(n, 400);
    }

    #[test]
    fn persistent_database_survives_restart() {
        let dir = tempdir().unwrap();
        let config = Config::new()
            .path(dir.path())
            .retry(RetryPolicy::new().max_attempts(10));
        let ctx = Context::background();

        {
            let db = Database::new(config.clone());
            db.start(&ctx).unwrap();
            db.run(&ctx, |tx| tx.set_typed("greeting", "hello")).unwrap();
            db.stop(&ctx).unwrap();
        }

        let db = Database::new(config);
        db.start(&ctx).unwrap();
        let greeting: String = db.view(&ctx, |tx| tx.get_typed("greeting")).unwrap();
        assert_eq!(greeting, "hello");
    }

    #[test]
    fn second_database_on_same_directory_fails_to_start() {
        let dir = tempdir().unwrap();
        let ctx = Context::background();

        let first = Database::new(Config::new().path(dir.path()));
        first.start(&ctx).unwrap();

        let second = Database::new(Config::new().path(dir.path()));
        let err = second.start(&ctx).unwrap_err();
        assert!(matches!(err, CoreError::EngineOpen { .. }));
    }
}
