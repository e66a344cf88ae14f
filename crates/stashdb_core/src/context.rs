//! Cancellation context.
//!
//! A [`Context`] is handed to every database operation that may wait: opening
//! the engine, backing off between conflicting attempts, and running jobs.
//! Cancelling it stops new work from starting; an attempt that already
//! reached commit is never rolled back.

use crate::error::{CoreError, CoreResult};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A cloneable cancellation signal with an optional deadline.
///
/// Clones share the same signal: cancelling one cancels all.
#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    cancelled: Mutex<bool>,
    wake: Condvar,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled unless [`cancel`](Self::cancel) is called.
    #[must_use]
    pub fn background() -> Self {
        Self::build(None)
    }

    /// A context that expires after `timeout`.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Instant::now().checked_add(timeout))
    }

    /// A context that expires at `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::build(Some(deadline))
    }

    fn build(deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: Mutex::new(false),
                wake: Condvar::new(),
                deadline,
            }),
        }
    }

    /// Returns the deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Cancels the context and wakes every [`sleep`](Self::sleep)er.
    pub fn cancel(&self) {
        let mut cancelled = self.inner.cancelled.lock();
        *cancelled = true;
        self.inner.wake.notify_all();
    }

    /// Returns true once cancelled or past the deadline.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock() || self.expired()
    }

    /// Fails with [`CoreError::Cancelled`] if the context is done.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Cancelled`] once cancelled or past the deadline.
    pub fn check(&self) -> CoreResult<()> {
        if self.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Waits for `duration`, returning early if the context is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Cancelled`] if the context was or became done
    /// before the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> CoreResult<()> {
        let wake_at = Instant::now().checked_add(duration);
        let until = match (wake_at, self.inner.deadline) {
            (Some(wake_at), Some(deadline)) => Some(wake_at.min(deadline)),
            (Some(wake_at), None) => Some(wake_at),
            (None, deadline) => deadline,
        };

        let mut cancelled = self.inner.cancelled.lock();
        loop {
            if *cancelled {
                return Err(CoreError::Cancelled);
            }
            match until {
                Some(until) => {
                    if Instant::now() >= until {
                        break;
                    }
                    self.inner.wake.wait_until(&mut cancelled, until);
                }
                None => self.inner.wake.wait(&mut cancelled),
            }
        }
        drop(cancelled);

        if self.expired() {
            return Err(CoreError::Cancelled);
        }
        Ok(())
    }

    fn expired(&self) -> bool {
        self.inner
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
