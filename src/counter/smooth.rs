use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::chunk::{ChunkPayload, ChunkRing};
use crate::clock::Ticker;
use crate::error::Result;
use crate::executor::ResilientExecutor;

use super::WindowCounter;

impl ChunkPayload for AtomicI64 {
    fn reset(&self) {
        self.store(0, Ordering::Relaxed);
    }
}

/// Counter over a rolling window whose oldest chunk fades out linearly.
///
/// `sum()` adds every chunk fully inside `[now − W, now]` plus the chunk
/// straddling `now − W`, weighted by the fraction of it still inside.  The
/// sum therefore decreases smoothly instead of dropping a whole chunk at once.
pub(crate) struct SmoothlyDecayingCounter {
    ring: ChunkRing<AtomicI64>,
}

impl SmoothlyDecayingCounter {
    pub(crate) fn new(
        window: Duration,
        chunks: usize,
        ticker: Arc<dyn Ticker>,
        executor: ResilientExecutor,
    ) -> Result<Self> {
        Ok(SmoothlyDecayingCounter {
            ring: ChunkRing::new(window, chunks, ticker, executor, || Ok(AtomicI64::new(0)))?,
        })
    }
}

impl WindowCounter for SmoothlyDecayingCounter {
    #[inline]
    fn add(&self, delta: i64) {
        self.ring.write(|cell| {
            cell.fetch_add(delta, Ordering::Relaxed);
        });
    }

    fn sum(&self) -> i64 {
        let window = self.ring.window();
        let sum: i128 = window
            .chunks()
            .map(|chunk| {
                let value = i128::from(chunk.payload.load(Ordering::Acquire));
                if chunk.overlap_millis == chunk.chunk_millis {
                    value
                } else {
                    value * i128::from(chunk.overlap_millis) / i128::from(chunk.chunk_millis)
                }
            })
            .sum();
        sum.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }
}
