//! Deferred rotation work and the executors that run it.
//!
//! Chunked metrics hand the clearing of the next chunk to an [`Executor`] so
//! that writers do not pay for it.  Executors may refuse work; the
//! [`ResilientExecutor`] every metric holds then runs the job on the calling
//! thread, so deferred work is never lost.

pub mod actor;
pub(crate) mod worker;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub use actor::RotationActor;

/// Work that can be deferred.  Implementors are shared, so a job only carries
/// an `Arc` clone and an argument; nothing is allocated per submission.
pub trait Task: Send + Sync + 'static {
    /// Performs the work for `epoch`.
    fn run(&self, epoch: i64);
}

/// A unit of deferred work: a task plus the epoch it applies to.
pub struct Job {
    task: Arc<dyn Task>,
    epoch: i64,
}

impl Job {
    pub fn new(task: Arc<dyn Task>, epoch: i64) -> Self {
        Job { task, epoch }
    }

    #[inline]
    pub fn epoch(&self) -> i64 {
        self.epoch
    }

    /// Runs the job on the current thread.
    #[inline]
    pub fn run(self) {
        self.task.run(self.epoch);
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("epoch", &self.epoch).finish_non_exhaustive()
    }
}

/// Something that runs jobs, possibly on another thread.
pub trait Executor: Send + Sync + 'static {
    /// Accepts `job` for execution, or hands it back when it cannot take it.
    ///
    /// An executor must either run an accepted job exactly once or return it;
    /// it must never drop it.
    fn execute(&self, job: Job) -> Result<(), Job>;
}

/// Runs every job immediately on the caller's thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    #[inline]
    fn execute(&self, job: Job) -> Result<(), Job> {
        job.run();
        Ok(())
    }
}

/// Guarantees execution: jobs refused by the inner executor run inline.
pub struct ResilientExecutor {
    inner: Arc<dyn Executor>,
    fallbacks: AtomicU64,
}

impl ResilientExecutor {
    pub fn new(inner: Arc<dyn Executor>) -> Self {
        ResilientExecutor {
            inner,
            fallbacks: AtomicU64::new(0),
        }
    }

    /// Runs `job` on the inner executor, or on this thread if it refuses.
    pub fn execute(&self, job: Job) {
        if let Err(job) = self.inner.execute(job) {
            self.fallbacks.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(epoch = job.epoch(), "executor refused job, running inline");
            job.run();
        }
    }

    /// How many jobs had to run on the caller's thread.
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for ResilientExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientExecutor")
            .field("fallbacks", &self.fallback_count())
            .finish_non_exhaustive()
    }
}
