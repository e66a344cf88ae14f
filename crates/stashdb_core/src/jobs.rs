//! Per-invocation fault isolation for scheduled work.
//!
//! A scheduler calls [`run_job`] (inline) or [`JobRunner::spawn`] (on its own
//! thread) for each invocation. A job that fails or panics produces a
//! [`JobOutcome`] instead of unwinding into the scheduler, so one broken job
//! cannot take the others down.

use crate::context::Context;
use crate::error::{panic_message, CoreError, CoreResult};
use parking_lot::Mutex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info};

/// How one job invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job returned `Ok`.
    Succeeded,
    /// The job returned an error; holds its message.
    Failed(String),
    /// The job panicked; holds the panic message.
    Panicked(String),
    /// The context was done before the job started, or the job stopped
    /// because of it.
    Cancelled,
}

impl JobOutcome {
    /// Returns true for [`JobOutcome::Succeeded`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed(message) => write!(f, "failed: {message}"),
            Self::Panicked(message) => write!(f, "panicked: {message}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Report delivered to the supervisor for every spawned invocation.
#[derive(Debug, Clone)]
pub struct JobReport {
    /// Job name.
    pub name: String,
    /// How it ended.
    pub outcome: JobOutcome,
    /// Wall time spent in the job.
    pub elapsed: Duration,
}

/// Runs one invocation of `job`, containing any error or panic.
pub fn run_job<F>(name: &str, ctx: &Context, job: F) -> JobOutcome
where
    F: FnOnce(&Context) -> CoreResult<()>,
{
    if ctx.is_cancelled() {
        info!(job = name, "job skipped, context cancelled");
        return JobOutcome::Cancelled;
    }

    info!(job = name, "job started");
    let started = Instant::now();

    let outcome = match catch_unwind(AssertUnwindSafe(|| job(ctx))) {
        Ok(Ok(())) => JobOutcome::Succeeded,
        Ok(Err(CoreError::Cancelled)) => JobOutcome::Cancelled,
        Ok(Err(err)) => {
            error!(job = name, error = %err, "job failed");
            JobOutcome::Failed(err.to_string())
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(job = name, panic = %message, "job panicked");
            JobOutcome::Panicked(message)
        }
    };

    info!(
        job = name,
        outcome = %outcome,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "job finished"
    );
    outcome
}

/// Runs jobs on their own threads and reports each outcome to a supervisor.
///
/// ```rust
/// use stashdb_core::{Context, JobOutcome, JobRunner};
///
/// let (runner, reports) = JobRunner::new(Context::background());
/// runner.spawn("ok", |_| Ok(())).unwrap();
/// runner.spawn("broken", |_| panic!("bad data")).unwrap();
/// runner.join();
///
/// let mut outcomes: Vec<_> = reports.iter().map(|r| (r.name, r.outcome)).collect();
/// outcomes.sort_by(|a, b| a.0.cmp(&b.0));
/// assert_eq!(outcomes[0].1, JobOutcome::Panicked("bad data".into()));
/// assert_eq!(outcomes[1].1, JobOutcome::Succeeded);
/// ```
pub struct JobRunner {
    ctx: Context,
    reports: Sender<JobReport>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobRunner {
    /// Creates a runner whose jobs share `ctx`, and the supervisor's receiver.
    ///
    /// The receiver disconnects once the runner and every spawned job are gone.
    #[must_use]
    pub fn new(ctx: Context) -> (Self, Receiver<JobReport>) {
        let (reports, receiver) = mpsc::channel();
        let runner = Self {
            ctx,
            reports,
            handles: Mutex::new(Vec::new()),
        };
        (runner, receiver)
    }

    /// Returns the context shared by all jobs.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Starts one invocation of `job` on a new thread.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the thread cannot be spawned.
    pub fn spawn<F>(&self, name: impl Into<String>, job: F) -> CoreResult<()>
    where
        F: FnOnce(&Context) -> CoreResult<()> + Send + 'static,
    {
        let name = name.into();
        let ctx = self.ctx.clone();
        let reports = self.reports.clone();

        let handle = thread::Builder::new()
            .name(format!("job-{name}"))
            .spawn(move || {
                let started = Instant::now();
                let outcome = run_job(&name, &ctx, job);
                // The supervisor may have stopped listening.
                let _ = reports.send(JobReport {
                    name,
                    outcome,
                    elapsed: started.elapsed(),
                });
            })
            .map_err(|e| CoreError::invalid_operation(format!("cannot spawn job thread: {e}")))?;

        self.handles.lock().push(handle);
        Ok(())
    }

    /// Waits for every spawned job to finish.
    pub fn join(self) {
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            // Jobs catch their own panics; a join error would only come from
            // a panic while reporting.
            let _ = handle.join();
        }
    }

    /// Cancels the shared context, then waits for every job to finish.
    pub fn shutdown(self) {
        self.ctx.cancel();
        self.join();
    }
}

impl fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRunner")
            .field("pending", &self.handles.lock().len())
            .finish_non_exhaustive()
    }
}
