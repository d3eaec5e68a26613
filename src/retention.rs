//! How long recorded data stays visible to readers.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::clock::as_millis;
use crate::error::{require_positive, Error, Result};

/// Smallest number of chunks a rolling window may be split into.
pub const MIN_CHUNKS: usize = 2;

/// Largest number of chunks a rolling window may be split into.
pub const MAX_CHUNKS: usize = 64;

/// Shortest chunk the ring rotates at.
pub const MIN_CHUNK_DURATION: Duration = Duration::from_millis(100);

/// Retention policy shared by every metric kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Retention {
    /// Data is never discarded.
    #[default]
    Uniform,
    /// Every read drains what it returns.
    ResetOnSnapshot,
    /// All data is discarded once per `period`.
    ResetPeriodically(Duration),
    /// Data ages out of a rolling `window` split into `chunks` slices.
    ResetByChunks {
        /// Total rolling window.
        window: Duration,
        /// Number of slices; each slice lasts `window / chunks`, rounded
        /// down to whole milliseconds.  The effective window is
        /// `chunks` slices long, so `1000 ms / 3` covers 999 ms.
        chunks: usize,
    },
}

impl Retention {
    /// Checks the parameters eagerly; invalid values are never clamped.
    pub fn validate(&self) -> Result<()> {
        match *self {
            Retention::Uniform | Retention::ResetOnSnapshot => Ok(()),
            Retention::ResetPeriodically(period) => require_positive("reset period", period),
            Retention::ResetByChunks { window, chunks } => {
                chunk_duration(window, chunks).map(|_| ())
            }
        }
    }

    /// Returns `true` for policies where caching a snapshot would break the
    /// drain-on-read contract.
    pub fn drains_on_read(&self) -> bool {
        matches!(self, Retention::ResetOnSnapshot)
    }
}

/// Computes `window / chunks` in whole milliseconds, validating both.
pub(crate) fn chunk_duration(window: Duration, chunks: usize) -> Result<Duration> {
    require_positive("rolling window", window)?;
    if !(MIN_CHUNKS..=MAX_CHUNKS).contains(&chunks) {
        return Err(Error::ChunkCount {
            value: chunks,
            min: MIN_CHUNKS,
            max: MAX_CHUNKS,
        });
    }
    // chunks <= MAX_CHUNKS, so the cast cannot truncate.
    let duration = Duration::from_millis(as_millis(window / chunks as u32) as u64);
    if duration < MIN_CHUNK_DURATION {
        return Err(Error::ChunkDuration {
            value: duration,
            min: MIN_CHUNK_DURATION,
        });
    }
    Ok(duration)
}

/// Next-reset timestamp for `ResetPeriodically` metrics.
///
/// [`poll`](ResetSchedule::poll) returns `true` to exactly one caller per
/// elapsed boundary; that caller performs the reset.  When several periods
/// elapsed unobserved the schedule catches up in one step.
#[derive(Debug)]
pub(crate) struct ResetSchedule {
    next_reset: AtomicI64,
    period_millis: i64,
}

impl ResetSchedule {
    pub(crate) fn new(period: Duration, now: i64) -> Result<Self> {
        require_positive("reset period", period)?;
        let period_millis = as_millis(period).max(1);
        Ok(ResetSchedule {
            next_reset: AtomicI64::new(now.saturating_add(period_millis)),
            period_millis,
        })
    }

    /// Returns `true` if the caller won the right to reset at `now`.
    #[inline]
    pub(crate) fn poll(&self, now: i64) -> bool {
        let next = self.next_reset.load(Ordering::Acquire);
        if now < next {
            return false;
        }
        let periods = (now - next) / self.period_millis + 1;
        let following = next.saturating_add(periods.saturating_mul(self.period_millis));
        self.next_reset
            .compare_exchange(next, following, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }
}
