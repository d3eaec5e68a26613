//! Chunk ring: the rotation primitive shared by every rolling metric.
//!
//! ## Algorithm
//!
//! Time since the ring's origin is cut into slices of `chunk_duration`; the
//! index of a slice is its **epoch**.  A window of `C` chunks covers
//! `W = C × chunk_duration`, and at any instant `C + 1` slices intersect
//! `[now − W, now]`: the current one, `C − 1` full ones, and the oldest one
//! straddling the trailing edge.  The ring holds `C + 2` cells so that one
//! more cell can be cleared ahead of time:
//!
//! ```text
//!   epoch:   e−C   e−C+1  …   e−1    e     e+1
//!           ┌─────┬──────┬───┬─────┬─────┬─────┐
//!           │edge │ full │ … │full │ cur │prep │   (len = C + 2, slot = epoch mod len)
//!           └─────┴──────┴───┴─────┴─────┴─────┘
//! ```
//!
//! Each cell is tagged with the epoch it accumulates.  A writer targeting
//! epoch `e` finds the cell `e mod len`:
//!
//! - tag == `e` → write;
//! - tag < `e`  → the cell is stale: CAS the tag to `RESETTING`, reset the
//!   payload, publish tag `e`, write;
//! - tag == `RESETTING` → someone else is resetting it; spin briefly.
//!
//! The ring-level `current_epoch` only moves forward through a CAS.  The
//! thread that wins moving it to `e` submits a job preparing epoch `e + 1`,
//! so in steady state writers find the next cell already clean and never
//! reset anything themselves.  If the job is late or refused the first
//! writer of `e + 1` resets the cell inline.
//!
//! Readers visit epochs `[e − C, e]` newest first and skip cells whose tag
//! does not match: stale data is never cleared eagerly, it is simply
//! ignored until the cell is reused.

use std::hint::spin_loop;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::utils::CachePadded;

use crate::clock::{as_millis, Ticker};
use crate::error::Result;
use crate::executor::{Job, ResilientExecutor, Task};
use crate::retention::chunk_duration;

/// Tag of a cell whose payload is being reset.
const RESETTING: i64 = i64::MIN;
/// Tag of a cell that never accumulated anything.
const UNUSED: i64 = -1;
/// Spins before yielding while another thread resets a cell.
const SPINS_BEFORE_YIELD: u32 = 64;

/// Accumulation state held by one chunk.
pub(crate) trait ChunkPayload: Send + Sync + 'static {
    /// Discards everything accumulated.  Called by exactly one thread at a
    /// time, while no writer targets the chunk.
    fn reset(&self);
}

struct Chunk<P> {
    epoch: CachePadded<AtomicI64>,
    payload: P,
}

struct RingCore<P> {
    chunks: Box<[Chunk<P>]>,
    /// Number of chunks in the window (`C`).
    window_chunks: i64,
    chunk_millis: i64,
    origin: i64,
    ticker: Arc<dyn Ticker>,
    current_epoch: CachePadded<AtomicI64>,
}

impl<P: ChunkPayload> RingCore<P> {
    #[inline]
    fn chunk(&self, epoch: i64) -> &Chunk<P> {
        // epoch >= 0 and len > 0, so rem_euclid is a plain modulo.
        let idx = epoch.rem_euclid(self.chunks.len() as i64) as usize;
        &self.chunks[idx]
    }

    #[inline]
    fn relative_now(&self) -> i64 {
        (self.ticker.now_millis() - self.origin).max(0)
    }

    /// Returns the chunk for `epoch`, resetting it first if it is stale.
    fn acquire(&self, epoch: i64) -> &Chunk<P> {
        let chunk = self.chunk(epoch);
        let mut spins = 0u32;
        loop {
            let tag = chunk.epoch.load(Ordering::Acquire);
            if tag == epoch {
                return chunk;
            }
            if tag == RESETTING {
                spins += 1;
                if spins % SPINS_BEFORE_YIELD == 0 {
                    thread::yield_now();
                } else {
                    spin_loop();
                }
                continue;
            }
            if tag > epoch {
                // The caller stalled for a whole ring revolution; its update
                // lands in the newer chunk.
                return chunk;
            }
            if chunk
                .epoch
                .compare_exchange(tag, RESETTING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                chunk.payload.reset();
                chunk.epoch.store(epoch, Ordering::Release);
                return chunk;
            }
        }
    }

    /// Clears the cell for `epoch` ahead of time if it still holds older data.
    fn prepare(&self, epoch: i64) {
        let chunk = self.chunk(epoch);
        let tag = chunk.epoch.load(Ordering::Acquire);
        if tag == RESETTING || tag >= epoch {
            return;
        }
        if chunk
            .epoch
            .compare_exchange(tag, RESETTING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            chunk.payload.reset();
            chunk.epoch.store(epoch, Ordering::Release);
        }
    }
}

impl<P: ChunkPayload> Task for RingCore<P> {
    fn run(&self, epoch: i64) {
        self.prepare(epoch);
    }
}

/// A fixed ring of epoch-tagged chunks covering a rolling window.
pub(crate) struct ChunkRing<P> {
    core: Arc<RingCore<P>>,
    executor: ResilientExecutor,
}

impl<P: ChunkPayload> ChunkRing<P> {
    /// Builds a ring of `chunks` chunks over `window`, validating both.
    pub(crate) fn new(
        window: Duration,
        chunks: usize,
        ticker: Arc<dyn Ticker>,
        executor: ResilientExecutor,
        mut make_payload: impl FnMut() -> Result<P>,
    ) -> Result<Self> {
        let chunk_millis = as_millis(chunk_duration(window, chunks)?);
        let cells = (0..chunks + 2)
            .map(|_| {
                Ok(Chunk {
                    epoch: CachePadded::new(AtomicI64::new(UNUSED)),
                    payload: make_payload()?,
                })
            })
            .collect::<Result<Vec<_>>>()?
            .into_boxed_slice();
        let origin = ticker.now_millis();

        Ok(ChunkRing {
            core: Arc::new(RingCore {
                chunks: cells,
                window_chunks: chunks as i64,
                chunk_millis,
                origin,
                ticker,
                current_epoch: CachePadded::new(AtomicI64::new(UNUSED)),
            }),
            executor,
        })
    }

    #[inline]
    fn epoch_at(&self, relative_now: i64) -> i64 {
        relative_now / self.core.chunk_millis
    }

    /// Moves `current_epoch` forward; the winner schedules preparation of
    /// the following chunk.
    fn advance(&self, epoch: i64) {
        let current = self.core.current_epoch.load(Ordering::Acquire);
        if epoch <= current {
            return;
        }
        if self
            .core
            .current_epoch
            .compare_exchange(current, epoch, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            let task: Arc<dyn Task> = self.core.clone();
            self.executor.execute(Job::new(task, epoch + 1));
        }
    }

    /// Runs `f` against the current chunk, rotating first if due.
    #[inline]
    pub(crate) fn write<R>(&self, f: impl FnOnce(&P) -> R) -> R {
        let epoch = self.epoch_at(self.core.relative_now());
        self.advance(epoch);
        f(&self.core.acquire(epoch).payload)
    }

    /// Captures the chunks currently inside the window.
    pub(crate) fn window(&self) -> Window<'_, P> {
        let now = self.core.relative_now();
        let epoch = self.epoch_at(now);
        self.advance(epoch);
        Window {
            core: &self.core,
            now,
            epoch,
        }
    }

    /// Number of chunks making up the window (`C`).
    #[cfg(test)]
    pub(crate) fn window_chunks(&self) -> usize {
        self.core.window_chunks as usize
    }
}

/// A reader's view of the ring at one instant.
pub(crate) struct Window<'a, P> {
    core: &'a RingCore<P>,
    /// Milliseconds since the ring origin.
    now: i64,
    epoch: i64,
}

/// A chunk visible to a reader.
pub(crate) struct LiveChunk<'a, P> {
    pub(crate) payload: &'a P,
    /// Fraction of the chunk still inside the window, as
    /// `overlap_millis / chunk_millis`.  Only the oldest chunk has
    /// `overlap_millis < chunk_millis`.
    pub(crate) overlap_millis: i64,
    pub(crate) chunk_millis: i64,
}

impl<'a, P: ChunkPayload> Window<'a, P> {
    /// Chunks intersecting `[now − W, now]`, newest first.
    pub(crate) fn chunks(&self) -> impl Iterator<Item = LiveChunk<'a, P>> + '_ {
        let oldest = (self.epoch - self.core.window_chunks).max(0);
        let core = self.core;
        let now = self.now;
        let window_start = now - core.window_chunks * core.chunk_millis;
        (oldest..=self.epoch).rev().filter_map(move |epoch| {
            let chunk = core.chunk(epoch);
            if chunk.epoch.load(Ordering::Acquire) != epoch {
                return None;
            }
            let chunk_end = (epoch + 1) * core.chunk_millis;
            let overlap_millis = (chunk_end - window_start).clamp(0, core.chunk_millis);
            if overlap_millis == 0 {
                return None;
            }
            Some(LiveChunk {
                payload: &chunk.payload,
                overlap_millis,
                chunk_millis: core.chunk_millis,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTicker;
    use crate::executor::{Executor, InlineExecutor};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Cell {
        value: AtomicI64,
        resets: AtomicUsize,
    }

    impl ChunkPayload for Cell {
        fn reset(&self) {
            self.value.store(0, Ordering::Relaxed);
            self.resets.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn ring(ticker: &ManualTicker, executor: Arc<dyn Executor>) -> ChunkRing<Cell> {
        ChunkRing::new(
            Duration::from_secs(3),
            3,
            Arc::new(ticker.clone()),
            ResilientExecutor::new(executor),
            || Ok(Cell::default()),
        )
        .unwrap()
    }

    /// Non-empty visible chunks, newest first.  Chunks prepared ahead of
    /// time are visible but empty.
    fn visible(ring: &ChunkRing<Cell>) -> Vec<i64> {
        ring.window()
            .chunks()
            .map(|c| c.payload.value.load(Ordering::Relaxed))
            .filter(|&v| v != 0)
            .collect()
    }

    #[test]
    fn ring_has_two_spare_cells() {
        let ticker = ManualTicker::new();
        let ring = ring(&ticker, Arc::new(InlineExecutor));
        assert_eq!(ring.window_chunks(), 3);
        assert_eq!(ring.core.chunks.len(), 5);
    }

    #[test]
    fn writes_land_in_the_chunk_of_their_epoch() {
        let ticker = ManualTicker::new();
        let ring = ring(&ticker, Arc::new(InlineExecutor));

        ring.write(|c| c.value.fetch_add(1, Ordering::Relaxed));
        ticker.advance(Duration::from_millis(1_000));
        ring.write(|c| c.value.fetch_add(10, Ordering::Relaxed));
        ticker.advance(Duration::from_millis(1_000));
        ring.write(|c| c.value.fetch_add(100, Ordering::Relaxed));

        assert_eq!(visible(&ring), vec![100, 10, 1]);
    }

    #[test]
    fn chunks_expire_once_fully_outside_the_window() {
        let ticker = ManualTicker::new();
        let ring = ring(&ticker, Arc::new(InlineExecutor));
        ring.write(|c| c.value.fetch_add(7, Ordering::Relaxed));

        ticker.set_millis(3_999);
        assert_eq!(visible(&ring), vec![7], "still straddling the trailing edge");

        ticker.set_millis(4_000);
        assert!(visible(&ring).is_empty());
    }

    #[test]
    fn trailing_chunk_reports_its_overlap() {
        let ticker = ManualTicker::new();
        let ring = ring(&ticker, Arc::new(InlineExecutor));
        ring.write(|c| c.value.fetch_add(1, Ordering::Relaxed));

        ticker.set_millis(3_250);
        let overlaps: Vec<i64> = ring
            .window()
            .chunks()
            .filter(|c| c.payload.value.load(Ordering::Relaxed) != 0)
            .map(|c| c.overlap_millis)
            .collect();
        assert_eq!(overlaps, vec![750]);
    }

    #[test]
    fn rotation_prepares_the_next_chunk_ahead_of_time() {
        let ticker = ManualTicker::new();
        let ring = ring(&ticker, Arc::new(InlineExecutor));

        // Fill every cell once.
        for _ in 0..5 {
            ring.write(|c| c.value.fetch_add(1, Ordering::Relaxed));
            ticker.advance(Duration::from_millis(1_000));
        }
        // Entering epoch 5 prepared epoch 6 (slot 1) through the executor.
        ring.write(|c| c.value.fetch_add(1, Ordering::Relaxed));
        let slot = &ring.core.chunks[1];
        assert_eq!(slot.epoch.load(Ordering::Relaxed), 6);
        assert_eq!(slot.payload.value.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn stale_cells_are_reset_inline_after_a_long_pause() {
        let ticker = ManualTicker::new();
        let ring = ring(&ticker, Arc::new(InlineExecutor));
        ring.write(|c| c.value.fetch_add(5, Ordering::Relaxed));

        ticker.set_millis(50_000);
        ring.write(|c| c.value.fetch_add(1, Ordering::Relaxed));
        assert_eq!(visible(&ring), vec![1]);
    }

    #[test]
    fn concurrent_writers_never_lose_updates_within_one_chunk() {
        let ticker = ManualTicker::new();
        let ring = ring(&ticker, Arc::new(InlineExecutor));

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..1_000 {
                        ring.write(|c| c.value.fetch_add(1, Ordering::Relaxed));
                    }
                });
            }
        });

        assert_eq!(visible(&ring), vec![8_000]);
    }
}
