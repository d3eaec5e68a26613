use std::sync::Arc;
use std::time::Duration;

use hdrhistogram::Histogram;

use super::recorder::{IntervalRecorder, StripedRecorder};
use super::{HdrConfig, HistogramSnapshot, Reservoir};
use crate::chunk::ChunkRing;
use crate::clock::Ticker;
use crate::error::Result;
use crate::executor::ResilientExecutor;
use crate::retention::ResetSchedule;

pub(crate) struct UniformReservoir {
    recorder: StripedRecorder,
}

impl UniformReservoir {
    pub(crate) fn new(config: HdrConfig) -> Result<Self> {
        Ok(UniformReservoir {
            recorder: StripedRecorder::new(config)?,
        })
    }
}

impl Reservoir for UniformReservoir {
    #[inline]
    fn record(&self, value: i64) {
        self.recorder.record(value);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let mut histogram = self.recorder.empty();
        self.recorder.merge_into(&mut histogram);
        HistogramSnapshot::new(histogram)
    }
}

pub(crate) struct ResetOnSnapshotReservoir {
    recorder: IntervalRecorder,
}

impl ResetOnSnapshotReservoir {
    pub(crate) fn new(config: HdrConfig) -> Result<Self> {
        Ok(ResetOnSnapshotReservoir {
            recorder: IntervalRecorder::new(config)?,
        })
    }
}

impl Reservoir for ResetOnSnapshotReservoir {
    #[inline]
    fn record(&self, value: i64) {
        self.recorder.record(value);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot::new(self.recorder.interval())
    }
}

pub(crate) struct ResetPeriodicallyReservoir {
    recorder: StripedRecorder,
    schedule: ResetSchedule,
    ticker: Arc<dyn Ticker>,
}

impl ResetPeriodicallyReservoir {
    pub(crate) fn new(config: HdrConfig, period: Duration, ticker: Arc<dyn Ticker>) -> Result<Self> {
        Ok(ResetPeriodicallyReservoir {
            recorder: StripedRecorder::new(config)?,
            schedule: ResetSchedule::new(period, ticker.now_millis())?,
            ticker,
        })
    }

    #[inline]
    fn clear_if_due(&self) {
        if self.schedule.poll(self.ticker.now_millis()) {
            self.recorder.clear();
        }
    }
}

impl Reservoir for ResetPeriodicallyReservoir {
    #[inline]
    fn record(&self, value: i64) {
        self.clear_if_due();
        self.recorder.record(value);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        self.clear_if_due();
        let mut histogram = self.recorder.empty();
        self.recorder.merge_into(&mut histogram);
        HistogramSnapshot::new(histogram)
    }
}

/// Rolling-window reservoir.  Every live chunk is merged whole; a chunk
/// contributes nothing once it leaves the window.
pub(crate) struct ChunkedReservoir {
    ring: ChunkRing<StripedRecorder>,
    /// Empty histogram of the configured shape; cloned to start a merge.
    template: Histogram<u64>,
}

impl ChunkedReservoir {
    pub(crate) fn new(
        config: HdrConfig,
        window: Duration,
        chunks: usize,
        ticker: Arc<dyn Ticker>,
        executor: ResilientExecutor,
    ) -> Result<Self> {
        Ok(ChunkedReservoir {
            ring: ChunkRing::new(window, chunks, ticker, executor, || {
                StripedRecorder::new(config)
            })?,
            template: config.new_histogram()?,
        })
    }
}

impl Reservoir for ChunkedReservoir {
    #[inline]
    fn record(&self, value: i64) {
        self.ring.write(|recorder| recorder.record(value));
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let mut histogram = self.template.clone();
        for chunk in self.ring.window().chunks() {
            chunk.payload.merge_into(&mut histogram);
        }
        HistogramSnapshot::new(histogram)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTicker;
    use crate::executor::InlineExecutor;

    fn chunked(ticker: &ManualTicker) -> ChunkedReservoir {
        ChunkedReservoir::new(
            HdrConfig::default(),
            Duration::from_secs(3),
            3,
            Arc::new(ticker.clone()),
            ResilientExecutor::new(Arc::new(InlineExecutor)),
        )
        .unwrap()
    }

    #[test]
    fn uniform_reservoir_keeps_everything() {
        let reservoir = UniformReservoir::new(HdrConfig::default()).unwrap();
        for v in 1..=10 {
            reservoir.record(v);
        }
        assert_eq!(reservoir.snapshot().count(), 10);
        assert_eq!(reservoir.snapshot().count(), 10);
    }

    #[test]
    fn reset_on_snapshot_reservoir_drains() {
        let reservoir = ResetOnSnapshotReservoir::new(HdrConfig::default()).unwrap();
        reservoir.record(7);
        let first = reservoir.snapshot();
        assert_eq!((first.count(), first.max()), (1, 7));
        assert!(reservoir.snapshot().is_empty());
    }

    #[test]
    fn periodic_reservoir_clears_on_boundary() {
        let ticker = ManualTicker::new();
        let reservoir = ResetPeriodicallyReservoir::new(
            HdrConfig::default(),
            Duration::from_millis(500),
            Arc::new(ticker.clone()),
        )
        .unwrap();
        reservoir.record(1);
        reservoir.record(2);
        ticker.set_millis(499);
        assert_eq!(reservoir.snapshot().count(), 2);
        ticker.set_millis(500);
        assert!(reservoir.snapshot().is_empty());
    }

    #[test]
    fn chunked_reservoir_merges_live_chunks() {
        let ticker = ManualTicker::new();
        let reservoir = chunked(&ticker);
        reservoir.record(10);
        ticker.advance(Duration::from_secs(1));
        reservoir.record(20);
        ticker.advance(Duration::from_secs(1));
        reservoir.record(30);

        let snapshot = reservoir.snapshot();
        assert_eq!(snapshot.count(), 3);
        assert_eq!(snapshot.min(), 10);
        assert_eq!(snapshot.max(), 30);
    }

    #[test]
    fn chunked_reservoir_is_empty_after_a_full_rotation() {
        let ticker = ManualTicker::new();
        let reservoir = chunked(&ticker);
        for v in 1..=100 {
            reservoir.record(v);
        }
        ticker.set_millis(3_999);
        assert_eq!(reservoir.snapshot().count(), 100);

        ticker.set_millis(4_000);
        let snapshot = reservoir.snapshot();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.max(), 0);
        assert_eq!(snapshot.mean(), 0.0);
    }

    #[test]
    fn chunked_reservoir_reuses_cells_without_leaking_old_data() {
        let ticker = ManualTicker::new();
        let reservoir = chunked(&ticker);
        for second in 0..20 {
            ticker.set_millis(second * 1_000);
            reservoir.record(second + 1);
        }
        // Epochs 16..=19 are live at t = 19000.
        let snapshot = reservoir.snapshot();
        assert_eq!(snapshot.count(), 4);
        assert_eq!(snapshot.min(), 17);
        assert_eq!(snapshot.max(), 20);
    }
}
