//! Bounded background actor performing chunk preparation off the hot path.
//!
//! ## Design
//!
//! The actor owns a fixed pool of reusable action slots and a bounded
//! lock-free queue of slot indices drained by a single worker thread.
//!
//! ```text
//!   submit ──claim FREE slot──▶ CLAIMED ──store job──▶ QUEUED ──push idx──▶ queue
//!                                                                 │
//!   worker ◀──────────────────────────── pop idx ─────────────────┘
//!      └─▶ RUNNING ──run job──▶ FREE
//! ```
//!
//! Slots are allocated once at construction, so submitting a job allocates
//! nothing.  When no slot is free or the queue is full the job is handed
//! back to the caller, which runs it synchronously: rotation work is never
//! dropped, only moved to the caller's thread.  `overflow_count` records how
//! often that happened.
//!
//! The worker starts on the first submission and stops via [`stop`], which
//! also runs any job still queued.
//!
//! [`stop`]: RotationActor::stop

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use crossbeam::utils::CachePadded;
use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;

use super::worker::{BackgroundTask, StopSignal};
use super::{Executor, Job};

/// Default number of reusable action slots.
pub const DEFAULT_SLOTS: usize = 128;

/// Default capacity of the pending-action queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// How long the worker parks when the queue is empty before re-checking.
const IDLE_PARK: Duration = Duration::from_millis(50);

/// Bounded join used by [`RotationActor::stop`].
const STOP_TIMEOUT: Duration = Duration::from_secs(1);

const FREE: u8 = 0;
const CLAIMED: u8 = 1;
const QUEUED: u8 = 2;
const RUNNING: u8 = 3;

static SHARED: OnceLock<Arc<RotationActor>> = OnceLock::new();

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

struct Slot {
    state: AtomicU8,
    /// Only touched by the claimer and then by the single runner, so the
    /// lock is never contended.
    job: Mutex<Option<Job>>,
}

impl Slot {
    fn new() -> Self {
        Slot {
            state: AtomicU8::new(FREE),
            job: Mutex::new(None),
        }
    }

    #[inline]
    fn try_claim(&self) -> bool {
        self.state
            .compare_exchange(FREE, CLAIMED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn release(&self) {
        self.state.store(FREE, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Shared interior
// ---------------------------------------------------------------------------

struct Shared {
    slots: Box<[Slot]>,
    queue: ArrayQueue<usize>,
    /// Rotating start point for the slot scan.
    cursor: CachePadded<AtomicUsize>,
    overflow: CachePadded<AtomicU64>,
    executed: AtomicU64,
}

impl Shared {
    fn claim_slot(&self) -> Option<usize> {
        let len = self.slots.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        (0..len)
            .map(|offset| (start + offset) % len)
            .find(|&idx| self.slots[idx].try_claim())
    }

    /// Runs the job parked in slot `idx` and frees the slot.
    fn run_slot(&self, idx: usize) {
        let slot = &self.slots[idx];
        slot.state.store(RUNNING, Ordering::Release);
        let job = slot.job.lock().take();
        if let Some(job) = job {
            let epoch = job.epoch();
            if panic::catch_unwind(AssertUnwindSafe(|| job.run())).is_err() {
                tracing::warn!(epoch, "rotation job panicked");
            }
            self.executed.fetch_add(1, Ordering::Relaxed);
        }
        slot.release();
    }

    /// Runs everything currently queued on the calling thread.
    fn drain(&self) {
        while let Some(idx) = self.queue.pop() {
            self.run_slot(idx);
        }
    }

    fn work(&self, signal: StopSignal) {
        while !signal.is_raised() {
            if let Some(idx) = self.queue.pop() {
                self.run_slot(idx);
                continue;
            }
            thread::park_timeout(IDLE_PARK);
        }
    }
}

// ---------------------------------------------------------------------------
// RotationActor
// ---------------------------------------------------------------------------

/// Single-worker background executor with a bounded slot pool.
pub struct RotationActor {
    shared: Arc<Shared>,
    worker: BackgroundTask,
}

impl RotationActor {
    /// Creates an actor with the default pool and queue sizes.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SLOTS, DEFAULT_QUEUE_CAPACITY)
    }

    /// Creates an actor with `slots` reusable actions and a queue of
    /// `queue_capacity` pending actions.  Both are raised to at least 1.
    pub fn with_capacity(slots: usize, queue_capacity: usize) -> Self {
        let slots = (0..slots.max(1))
            .map(|_| Slot::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        RotationActor {
            shared: Arc::new(Shared {
                slots,
                queue: ArrayQueue::new(queue_capacity.max(1)),
                cursor: CachePadded::new(AtomicUsize::new(0)),
                overflow: CachePadded::new(AtomicU64::new(0)),
                executed: AtomicU64::new(0),
            }),
            worker: BackgroundTask::new("rolling-metrics-rotation"),
        }
    }

    /// The process-wide actor used when a metric is built without an
    /// explicit executor.
    pub fn shared() -> Arc<RotationActor> {
        Arc::clone(SHARED.get_or_init(|| Arc::new(RotationActor::new())))
    }

    /// Queues `job` for the worker, or hands it back when the worker is
    /// unavailable, no slot is free or the queue is full.
    pub fn try_submit(&self, job: Job) -> Result<(), Job> {
        if !self.ensure_worker() {
            return Err(job);
        }
        let Some(idx) = self.shared.claim_slot() else {
            return Err(job);
        };

        let slot = &self.shared.slots[idx];
        *slot.job.lock() = Some(job);
        slot.state.store(QUEUED, Ordering::Release);

        if self.shared.queue.push(idx).is_err() {
            let job = slot.job.lock().take();
            slot.release();
            return match job {
                Some(job) => Err(job),
                None => Ok(()),
            };
        }
        self.worker.wake();

        // The worker may have stopped between the liveness check and the
        // push; nobody else would pick the job up.
        if self.worker.is_stopped() {
            self.shared.drain();
        }
        Ok(())
    }

    /// Queues `job`, or runs it on the calling thread if it cannot be queued.
    pub fn submit_or_run_inline(&self, job: Job) {
        if let Err(job) = self.try_submit(job) {
            self.shared.overflow.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(epoch = job.epoch(), "rotation actor saturated, running inline");
            job.run();
        }
    }

    /// How many jobs were refused by [`try_submit`](Self::try_submit) and
    /// ran on their caller's thread via [`submit_or_run_inline`](Self::submit_or_run_inline).
    pub fn overflow_count(&self) -> u64 {
        self.shared.overflow.load(Ordering::Relaxed)
    }

    /// How many jobs the actor itself has run.
    pub fn executed_count(&self) -> u64 {
        self.shared.executed.load(Ordering::Relaxed)
    }

    /// Returns `true` while the worker thread is alive.
    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    /// Stops the worker and runs whatever is still queued on this thread.
    ///
    /// Idempotent.  After stopping, every submission is refused.
    pub fn stop(&self) {
        self.worker.stop(STOP_TIMEOUT);
        self.shared.drain();
    }

    fn ensure_worker(&self) -> bool {
        if self.worker.is_running() {
            return true;
        }
        let shared = Arc::clone(&self.shared);
        self.worker.ensure_started(move |signal| shared.work(signal))
    }
}

impl Default for RotationActor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for RotationActor {
    #[inline]
    fn execute(&self, job: Job) -> Result<(), Job> {
        self.try_submit(job)
    }
}

impl Drop for RotationActor {
    fn drop(&mut self) {
        self.stop();
    }
}
