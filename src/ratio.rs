//! Hit ratios over a retention window.
//!
//! Hits and totals are accumulated as a `(u64, u64)` pair inside one
//! [`AtomicCell`], so a reader never sees hits from one update paired with
//! the total of another.  Should the total ever approach `u64::MAX`, both
//! fields are halved before adding, which keeps the ratio.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::atomic::AtomicCell;

use crate::chunk::{ChunkPayload, ChunkRing};
use crate::clock::Ticker;
use crate::error::{Error, Result};
use crate::executor::ResilientExecutor;
use crate::retention::ResetSchedule;

/// A concurrent hit ratio over a retention window.
pub trait HitRatio: Send + Sync {
    /// Adds `hits` hits out of `total` attempts.
    ///
    /// Rejects negative counts and `hits > total` without changing anything.
    fn update(&self, hits: i32, total: i32) -> Result<()>;

    /// `hits / total` under the retention policy, or NaN when nothing was
    /// recorded.
    fn ratio(&self) -> f64;

    #[inline]
    fn increment_hit(&self) {
        // (1, 1) is always valid.
        let _ = self.update(1, 1);
    }

    #[inline]
    fn increment_miss(&self) {
        let _ = self.update(0, 1);
    }
}

fn validate(hits: i32, total: i32) -> Result<(u64, u64)> {
    if hits < 0 {
        return Err(Error::NegativeCount {
            name: "hits",
            value: hits,
        });
    }
    if total < 0 {
        return Err(Error::NegativeCount {
            name: "total",
            value: total,
        });
    }
    if hits > total {
        return Err(Error::HitsExceedTotal { hits, total });
    }
    Ok((hits as u64, total as u64))
}

#[inline]
fn ratio_of((hits, total): (u64, u64)) -> f64 {
    if total == 0 {
        return f64::NAN;
    }
    hits as f64 / total as f64
}

/// A `(hits, total)` pair updated atomically.
#[derive(Debug, Default)]
pub(crate) struct Tally {
    counts: AtomicCell<(u64, u64)>,
}

impl Tally {
    #[inline]
    pub(crate) fn add(&self, hits: u64, total: u64) {
        let _ = self.counts.fetch_update(|(mut h, mut t)| {
            while t.checked_add(total).is_none() {
                h /= 2;
                t /= 2;
            }
            Some((h + hits, t + total))
        });
    }

    #[inline]
    pub(crate) fn load(&self) -> (u64, u64) {
        self.counts.load()
    }

    #[inline]
    pub(crate) fn take(&self) -> (u64, u64) {
        self.counts.swap((0, 0))
    }
}

impl ChunkPayload for Tally {
    fn reset(&self) {
        self.counts.store((0, 0));
    }
}

#[derive(Debug, Default)]
pub(crate) struct UniformHitRatio {
    tally: Tally,
}

impl HitRatio for UniformHitRatio {
    fn update(&self, hits: i32, total: i32) -> Result<()> {
        let (hits, total) = validate(hits, total)?;
        self.tally.add(hits, total);
        Ok(())
    }

    fn ratio(&self) -> f64 {
        ratio_of(self.tally.load())
    }
}

#[derive(Debug, Default)]
pub(crate) struct ResetOnSnapshotHitRatio {
    tally: Tally,
}

impl HitRatio for ResetOnSnapshotHitRatio {
    fn update(&self, hits: i32, total: i32) -> Result<()> {
        let (hits, total) = validate(hits, total)?;
        self.tally.add(hits, total);
        Ok(())
    }

    fn ratio(&self) -> f64 {
        ratio_of(self.tally.take())
    }
}

pub(crate) struct ResetPeriodicallyHitRatio {
    tally: Tally,
    schedule: ResetSchedule,
    ticker: Arc<dyn Ticker>,
}

impl ResetPeriodicallyHitRatio {
    pub(crate) fn new(period: Duration, ticker: Arc<dyn Ticker>) -> Result<Self> {
        Ok(ResetPeriodicallyHitRatio {
            tally: Tally::default(),
            schedule: ResetSchedule::new(period, ticker.now_millis())?,
            ticker,
        })
    }

    #[inline]
    fn reset_if_due(&self) {
        if self.schedule.poll(self.ticker.now_millis()) {
            self.tally.reset();
        }
    }
}

impl HitRatio for ResetPeriodicallyHitRatio {
    fn update(&self, hits: i32, total: i32) -> Result<()> {
        let (hits, total) = validate(hits, total)?;
        self.reset_if_due();
        self.tally.add(hits, total);
        Ok(())
    }

    fn ratio(&self) -> f64 {
        self.reset_if_due();
        ratio_of(self.tally.load())
    }
}

/// Rolling-window hit ratio; live chunks are summed at unit weight.
pub(crate) struct ChunkedHitRatio {
    ring: ChunkRing<Tally>,
}

impl ChunkedHitRatio {
    pub(crate) fn new(
        window: Duration,
        chunks: usize,
        ticker: Arc<dyn Ticker>,
        executor: ResilientExecutor,
    ) -> Result<Self> {
        Ok(ChunkedHitRatio {
            ring: ChunkRing::new(window, chunks, ticker, executor, || Ok(Tally::default()))?,
        })
    }
}

impl HitRatio for ChunkedHitRatio {
    fn update(&self, hits: i32, total: i32) -> Result<()> {
        let (hits, total) = validate(hits, total)?;
        self.ring.write(|tally| tally.add(hits, total));
        Ok(())
    }

    fn ratio(&self) -> f64 {
        let merged = Tally::default();
        for chunk in self.ring.window().chunks() {
            let (hits, total) = chunk.payload.load();
            merged.add(hits, total);
        }
        ratio_of(merged.load())
    }
}
