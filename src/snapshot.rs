//! Time-bounded reuse of expensive snapshots.
//!
//! Merging every stripe of every chunk is far more expensive than recording,
//! so histogram and ranking snapshots are reused for a short while.  Readers
//! first try a non-blocking read of the cached entry; on a miss, a stale
//! entry or a contended lock they take the recompute lock, check again (a
//! concurrent reader may just have refreshed it) and only then recompute.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::clock::{as_millis, Ticker};
use crate::histogram::{HistogramSnapshot, Reservoir};
use crate::ranking::{Position, Ranking};

struct Entry<T> {
    value: T,
    computed_at: i64,
}

/// Caches the last computed `T` for a fixed duration.
///
/// A zero duration disables caching: every [`get`](SnapshotCache::get)
/// recomputes.
pub struct SnapshotCache<T> {
    entry: RwLock<Option<Entry<T>>>,
    recompute: Mutex<()>,
    caching_millis: i64,
    ticker: Arc<dyn Ticker>,
}

impl<T: Clone> SnapshotCache<T> {
    pub fn new(caching_duration: Duration, ticker: Arc<dyn Ticker>) -> Self {
        SnapshotCache {
            entry: RwLock::new(None),
            recompute: Mutex::new(()),
            caching_millis: as_millis(caching_duration),
            ticker,
        }
    }

    #[inline]
    fn fresh(&self, entry: &Entry<T>, now: i64) -> bool {
        now - entry.computed_at < self.caching_millis
    }

    /// The cached value if still fresh, otherwise `compute()`'s result.
    pub fn get(&self, compute: impl FnOnce() -> T) -> T {
        if self.caching_millis == 0 {
            return compute();
        }

        if let Some(guard) = self.entry.try_read() {
            if let Some(entry) = guard.as_ref() {
                if self.fresh(entry, self.ticker.now_millis()) {
                    return entry.value.clone();
                }
            }
        }

        let _recompute = self.recompute.lock();
        let now = self.ticker.now_millis();
        if let Some(entry) = self.entry.read().as_ref() {
            if self.fresh(entry, now) {
                return entry.value.clone();
            }
        }
        let value = compute();
        *self.entry.write() = Some(Entry {
            value: value.clone(),
            computed_at: now,
        });
        value
    }

    /// Drops the cached value.
    pub fn invalidate(&self) {
        *self.entry.write() = None;
    }
}

/// A [`Reservoir`] whose snapshots go through a [`SnapshotCache`].
pub(crate) struct CachingReservoir {
    inner: Box<dyn Reservoir>,
    cache: SnapshotCache<HistogramSnapshot>,
}

impl CachingReservoir {
    pub(crate) fn new(
        inner: Box<dyn Reservoir>,
        caching_duration: Duration,
        ticker: Arc<dyn Ticker>,
    ) -> Self {
        CachingReservoir {
            inner,
            cache: SnapshotCache::new(caching_duration, ticker),
        }
    }
}

impl Reservoir for CachingReservoir {
    #[inline]
    fn record(&self, value: i64) {
        self.inner.record(value);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        self.cache.get(|| self.inner.snapshot())
    }
}

/// A [`Ranking`] whose snapshots go through a [`SnapshotCache`].
pub(crate) struct CachingRanking {
    inner: Box<dyn Ranking>,
    cache: SnapshotCache<Vec<Position>>,
}

impl CachingRanking {
    pub(crate) fn new(
        inner: Box<dyn Ranking>,
        caching_duration: Duration,
        ticker: Arc<dyn Ticker>,
    ) -> Self {
        CachingRanking {
            inner,
            cache: SnapshotCache::new(caching_duration, ticker),
        }
    }
}

impl Ranking for CachingRanking {
    #[inline]
    fn offer(&self, weight: i64, identity: &mut dyn FnMut() -> String) -> bool {
        self.inner.offer(weight, identity)
    }

    fn positions_descending(&self) -> Vec<Position> {
        self.cache.get(|| self.inner.positions_descending())
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn threshold(&self) -> i64 {
        self.inner.threshold()
    }
}
