use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use super::collector::{Collector, ConcurrentCollector};
use super::recorder::TwoPhaseRecorder;
use super::{Position, Ranking, RankingConfig};
use crate::chunk::ChunkRing;
use crate::clock::Ticker;
use crate::error::Result;
use crate::executor::ResilientExecutor;
use crate::retention::ResetSchedule;

pub(crate) struct UniformRanking {
    config: RankingConfig,
    collector: ConcurrentCollector,
    sequence: AtomicU64,
}

impl UniformRanking {
    pub(crate) fn new(config: RankingConfig) -> Self {
        UniformRanking {
            config,
            collector: ConcurrentCollector::new(config.size),
            sequence: AtomicU64::new(0),
        }
    }
}

impl Ranking for UniformRanking {
    fn offer(&self, weight: i64, identity: &mut dyn FnMut() -> String) -> bool {
        if !self.config.admits(weight) {
            return false;
        }
        self.collector.update(
            weight,
            &self.sequence,
            self.config.max_identity_length,
            identity,
        )
    }

    fn positions_descending(&self) -> Vec<Position> {
        self.collector.positions_descending()
    }

    fn size(&self) -> usize {
        self.config.size
    }

    fn threshold(&self) -> i64 {
        self.config.threshold
    }
}

pub(crate) struct ResetOnSnapshotRanking {
    config: RankingConfig,
    recorder: TwoPhaseRecorder,
    sequence: AtomicU64,
}

impl ResetOnSnapshotRanking {
    pub(crate) fn new(config: RankingConfig) -> Self {
        ResetOnSnapshotRanking {
            config,
            recorder: TwoPhaseRecorder::new(config.size),
            sequence: AtomicU64::new(0),
        }
    }
}

impl Ranking for ResetOnSnapshotRanking {
    fn offer(&self, weight: i64, identity: &mut dyn FnMut() -> String) -> bool {
        if !self.config.admits(weight) {
            return false;
        }
        self.recorder.update(
            weight,
            &self.sequence,
            self.config.max_identity_length,
            identity,
        )
    }

    fn positions_descending(&self) -> Vec<Position> {
        self.recorder.drain()
    }

    fn size(&self) -> usize {
        self.config.size
    }

    fn threshold(&self) -> i64 {
        self.config.threshold
    }
}

pub(crate) struct ResetPeriodicallyRanking {
    config: RankingConfig,
    collector: ConcurrentCollector,
    sequence: AtomicU64,
    schedule: ResetSchedule,
    ticker: Arc<dyn Ticker>,
}

impl ResetPeriodicallyRanking {
    pub(crate) fn new(
        config: RankingConfig,
        period: Duration,
        ticker: Arc<dyn Ticker>,
    ) -> Result<Self> {
        Ok(ResetPeriodicallyRanking {
            config,
            collector: ConcurrentCollector::new(config.size),
            sequence: AtomicU64::new(0),
            schedule: ResetSchedule::new(period, ticker.now_millis())?,
            ticker,
        })
    }

    #[inline]
    fn clear_if_due(&self) {
        if self.schedule.poll(self.ticker.now_millis()) {
            self.collector.clear();
        }
    }
}

impl Ranking for ResetPeriodicallyRanking {
    fn offer(&self, weight: i64, identity: &mut dyn FnMut() -> String) -> bool {
        if !self.config.admits(weight) {
            return false;
        }
        self.clear_if_due();
        self.collector.update(
            weight,
            &self.sequence,
            self.config.max_identity_length,
            identity,
        )
    }

    fn positions_descending(&self) -> Vec<Position> {
        self.clear_if_due();
        self.collector.positions_descending()
    }

    fn size(&self) -> usize {
        self.config.size
    }

    fn threshold(&self) -> i64 {
        self.config.threshold
    }
}

/// Rolling-window ranking: one collector per chunk, merged on read.
pub(crate) struct ChunkedRanking {
    config: RankingConfig,
    ring: ChunkRing<ConcurrentCollector>,
    /// Shared by every chunk so ties across chunks keep insertion order.
    sequence: AtomicU64,
}

impl ChunkedRanking {
    pub(crate) fn new(
        config: RankingConfig,
        window: Duration,
        chunks: usize,
        ticker: Arc<dyn Ticker>,
        executor: ResilientExecutor,
    ) -> Result<Self> {
        Ok(ChunkedRanking {
            config,
            ring: ChunkRing::new(window, chunks, ticker, executor, || {
                Ok(ConcurrentCollector::new(config.size))
            })?,
            sequence: AtomicU64::new(0),
        })
    }
}

impl Ranking for ChunkedRanking {
    fn offer(&self, weight: i64, identity: &mut dyn FnMut() -> String) -> bool {
        if !self.config.admits(weight) {
            return false;
        }
        self.ring.write(|collector| {
            collector.update(
                weight,
                &self.sequence,
                self.config.max_identity_length,
                identity,
            )
        })
    }

    fn positions_descending(&self) -> Vec<Position> {
        let mut scratch = Collector::new(self.config.size);
        for chunk in self.ring.window().chunks() {
            // An older chunk can still win ties, so only strictly lighter
            // chunks are skipped.
            if let (Some(floor), Some(max)) = (scratch.floor(), chunk.payload.max_weight()) {
                if max < floor {
                    continue;
                }
            }
            chunk.payload.merge_into(&mut scratch);
        }
        scratch.positions_descending()
    }

    fn size(&self) -> usize {
        self.config.size
    }

    fn threshold(&self) -> i64 {
        self.config.threshold
    }
}
