//! Two-phase recorder backing `ResetOnSnapshot` rankings.
//!
//! Writers update whichever phase is active and announce themselves in that
//! phase's writer count.  A snapshot flips the active phase, waits until the
//! retired phase has no writers left, then drains it.  Writers never wait;
//! only concurrent snapshots serialize on each other.
//!
//! ```text
//!   writer: writers[i] += 1 ─▶ re-check active == i ─▶ update ─▶ writers[i] -= 1
//!                                   └─ changed: writers[i] -= 1, retry
//!   reader: active = i ^ 1 ─▶ wait writers[i] == 0 ─▶ drain phase i
//! ```

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;

use parking_lot::Mutex;

use super::collector::{Collector, ConcurrentCollector};
use super::Position;

/// Spins before yielding while waiting for writers of a retired phase.
const SPINS_BEFORE_YIELD: u32 = 64;

struct Phase {
    collector: ConcurrentCollector,
    writers: AtomicUsize,
}

pub(crate) struct TwoPhaseRecorder {
    phases: [Phase; 2],
    active: AtomicUsize,
    size: usize,
    snapshot_lock: Mutex<()>,
}

impl TwoPhaseRecorder {
    pub(crate) fn new(size: usize) -> Self {
        let phase = || Phase {
            collector: ConcurrentCollector::new(size),
            writers: AtomicUsize::new(0),
        };
        TwoPhaseRecorder {
            phases: [phase(), phase()],
            active: AtomicUsize::new(0),
            size,
            snapshot_lock: Mutex::new(()),
        }
    }

    pub(crate) fn update(
        &self,
        weight: i64,
        sequence: &AtomicU64,
        max_identity_length: usize,
        identity: &mut dyn FnMut() -> String,
    ) -> bool {
        loop {
            let idx = self.active.load(Ordering::SeqCst);
            let phase = &self.phases[idx];
            phase.writers.fetch_add(1, Ordering::SeqCst);
            if self.active.load(Ordering::SeqCst) != idx {
                // A snapshot retired this phase before we were counted.
                phase.writers.fetch_sub(1, Ordering::SeqCst);
                continue;
            }
            let accepted =
                phase
                    .collector
                    .update(weight, sequence, max_identity_length, identity);
            phase.writers.fetch_sub(1, Ordering::SeqCst);
            return accepted;
        }
    }

    /// Returns and clears everything recorded since the previous call.
    pub(crate) fn drain(&self) -> Vec<Position> {
        let _guard = self.snapshot_lock.lock();
        let retired = self.active.load(Ordering::SeqCst);
        let incoming = retired ^ 1;
        let mut result = Collector::new(self.size);

        // Leftovers in the incoming phase predate the swap; they belong to
        // this snapshot.
        self.phases[incoming].collector.drain_into(&mut result);

        self.active.store(incoming, Ordering::SeqCst);
        let phase = &self.phases[retired];
        let mut spins = 0u32;
        while phase.writers.load(Ordering::SeqCst) != 0 {
            spins += 1;
            if spins % SPINS_BEFORE_YIELD == 0 {
                thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
        phase.collector.drain_into(&mut result);
        if result.is_empty() {
            return Vec::new();
        }
        result.positions_descending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(recorder: &TwoPhaseRecorder, sequence: &AtomicU64, weight: i64) -> bool {
        recorder.update(weight, sequence, 100, &mut || format!("op-{weight}"))
    }

    #[test]
    fn drain_returns_then_forgets() {
        let recorder = TwoPhaseRecorder::new(3);
        let sequence = AtomicU64::new(0);
        for w in [5, 1, 9, 7] {
            offer(&recorder, &sequence, w);
        }
        let weights: Vec<_> = recorder.drain().iter().map(Position::weight).collect();
        assert_eq!(weights, vec![9, 7, 5]);
        assert!(recorder.drain().is_empty());

        offer(&recorder, &sequence, 2);
        assert_eq!(recorder.drain().len(), 1);
    }

    #[test]
    fn no_update_is_lost_across_concurrent_drains() {
        let recorder = TwoPhaseRecorder::new(1_000_000);
        let sequence = AtomicU64::new(0);
        let mut drained = 0usize;
        thread::scope(|s| {
            for t in 0..4i64 {
                let recorder = &recorder;
                let sequence = &sequence;
                s.spawn(move || {
                    for w in 0..2_000i64 {
                        assert!(offer(recorder, sequence, w * 4 + t));
                    }
                });
            }
            for _ in 0..50 {
                drained += recorder.drain().len();
            }
        });
        drained += recorder.drain().len();
        assert_eq!(drained, 8_000);
    }
}
