//! Explicitly-owned background thread with a start/stop lifecycle.
//!
//! The thread is spawned lazily by the first [`BackgroundTask::ensure_started`]
//! call and stopped by [`BackgroundTask::stop`]: the stop signal is raised,
//! the thread is unparked and joined with a bounded wait.  A task never
//! restarts once stopped; callers fall back to doing the work themselves.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, Thread};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// Cooperative stop flag shared with the thread body.
#[derive(Clone, Debug, Default)]
pub(crate) struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    #[inline]
    pub(crate) fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }
}

pub(crate) struct BackgroundTask {
    name: String,
    phase: AtomicU8,
    signal: StopSignal,
    thread: OnceLock<Thread>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundTask {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        BackgroundTask {
            name: name.into(),
            phase: AtomicU8::new(IDLE),
            signal: StopSignal::default(),
            thread: OnceLock::new(),
            handle: Mutex::new(None),
        }
    }

    /// Spawns the thread running `body` unless it already runs.
    ///
    /// Returns `false` when the task was stopped or the thread could not be
    /// spawned; the caller must then do the work inline.
    pub(crate) fn ensure_started<F>(&self, body: F) -> bool
    where
        F: FnOnce(StopSignal) + Send + 'static,
    {
        match self.phase.load(Ordering::Acquire) {
            RUNNING => return true,
            STOPPED => return false,
            _ => {}
        }

        let mut handle = self.handle.lock();
        // Re-check under the lock: another caller may have won the race.
        match self.phase.load(Ordering::Acquire) {
            RUNNING => return true,
            STOPPED => return false,
            _ => {}
        }

        let signal = self.signal.clone();
        match thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || body(signal))
        {
            Ok(spawned) => {
                let _ = self.thread.set(spawned.thread().clone());
                *handle = Some(spawned);
                self.phase.store(RUNNING, Ordering::Release);
                tracing::debug!(task = %self.name, "background thread started");
                true
            }
            Err(err) => {
                self.phase.store(STOPPED, Ordering::Release);
                tracing::warn!(task = %self.name, %err, "failed to spawn background thread");
                false
            }
        }
    }

    #[inline]
    pub(crate) fn is_running(&self) -> bool {
        self.phase.load(Ordering::Acquire) == RUNNING
    }

    #[inline]
    pub(crate) fn is_stopped(&self) -> bool {
        self.phase.load(Ordering::Acquire) == STOPPED
    }

    /// Wakes the thread if it is parked waiting for work.
    #[inline]
    pub(crate) fn wake(&self) {
        if let Some(thread) = self.thread.get() {
            thread.unpark();
        }
    }

    /// Raises the stop signal and joins the thread for at most `timeout`.
    ///
    /// Repeated calls are no-ops.  A thread that does not finish in time is
    /// detached.
    pub(crate) fn stop(&self, timeout: Duration) {
        // The phase flips under the handle lock so a concurrent
        // `ensure_started` cannot publish RUNNING over STOPPED.
        let handle = {
            let mut guard = self.handle.lock();
            if self.phase.swap(STOPPED, Ordering::AcqRel) == STOPPED {
                return;
            }
            self.signal.raise();
            guard.take()
        };
        let Some(handle) = handle else {
            return;
        };
        handle.thread().unpark();

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!(task = %self.name, ?timeout, "background thread did not stop in time, detaching");
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }

        if handle.join().is_err() {
            tracing::warn!(task = %self.name, "background thread panicked");
        } else {
            tracing::debug!(task = %self.name, "background thread stopped");
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.stop(Duration::from_secs(1));
    }
}
