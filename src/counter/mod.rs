//! Counters summed over a retention window.
//!
//! | Retention          | Type                          | `sum()` |
//! |--------------------|-------------------------------|---------|
//! | `Uniform`          | `UniformCounter`              | everything ever added |
//! | `ResetOnSnapshot`  | `ResetOnSnapshotCounter`      | added since the previous `sum()` |
//! | `ResetPeriodically`| `ResetPeriodicallyCounter`    | added since the last period boundary |
//! | `ResetByChunks`    | `SmoothlyDecayingCounter`     | added within the rolling window, trailing chunk weighted |

mod smooth;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::utils::CachePadded;

use crate::clock::Ticker;
use crate::error::Result;
use crate::retention::ResetSchedule;

pub(crate) use smooth::SmoothlyDecayingCounter;

/// A concurrent counter over a retention window.
///
/// Additions wrap on `i64` overflow.
pub trait WindowCounter: Send + Sync {
    /// Adds `delta`, which may be negative.
    fn add(&self, delta: i64);

    /// The sum visible under the counter's retention policy.
    fn sum(&self) -> i64;

    #[inline]
    fn increment(&self) {
        self.add(1);
    }
}

#[derive(Debug, Default)]
pub(crate) struct UniformCounter {
    value: CachePadded<AtomicI64>,
}

impl WindowCounter for UniformCounter {
    #[inline]
    fn add(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    fn sum(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }
}

/// Every `sum()` returns what was added since the previous one.
#[derive(Debug, Default)]
pub(crate) struct ResetOnSnapshotCounter {
    value: CachePadded<AtomicI64>,
}

impl WindowCounter for ResetOnSnapshotCounter {
    #[inline]
    fn add(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    fn sum(&self) -> i64 {
        // Subtracting what was read keeps additions racing with the read for
        // the next snapshot.
        let sum = self.value.load(Ordering::Acquire);
        self.value.fetch_sub(sum, Ordering::AcqRel);
        sum
    }
}

pub(crate) struct ResetPeriodicallyCounter {
    value: CachePadded<AtomicI64>,
    schedule: ResetSchedule,
    ticker: Arc<dyn Ticker>,
}

impl ResetPeriodicallyCounter {
    pub(crate) fn new(period: Duration, ticker: Arc<dyn Ticker>) -> Result<Self> {
        Ok(ResetPeriodicallyCounter {
            value: CachePadded::new(AtomicI64::new(0)),
            schedule: ResetSchedule::new(period, ticker.now_millis())?,
            ticker,
        })
    }

    #[inline]
    fn reset_if_due(&self) {
        if self.schedule.poll(self.ticker.now_millis()) {
            self.value.store(0, Ordering::Release);
        }
    }
}

impl WindowCounter for ResetPeriodicallyCounter {
    #[inline]
    fn add(&self, delta: i64) {
        self.reset_if_due();
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    fn sum(&self) -> i64 {
        self.reset_if_due();
        self.value.load(Ordering::Acquire)
    }
}
