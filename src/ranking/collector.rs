use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{truncate, Position};
use crate::chunk::ChunkPayload;

/// Floor of a collector that is not full: every admitted weight may enter.
const NO_FLOOR: i64 = i64::MIN;

/// A bounded, ordered set of at most `size` positions.
#[derive(Clone, Debug)]
pub(crate) enum Collector {
    /// `size == 1`: only the maximum is tracked.
    Single(Option<Position>),
    Multi {
        size: usize,
        positions: BTreeSet<Position>,
    },
}

impl Collector {
    pub(crate) fn new(size: usize) -> Self {
        if size <= 1 {
            Collector::Single(None)
        } else {
            Collector::Multi {
                size,
                positions: BTreeSet::new(),
            }
        }
    }

    /// Inserts `position` if it outranks the weakest member or there is room.
    pub(crate) fn offer(&mut self, position: Position) -> bool {
        match self {
            Collector::Single(current) => match current {
                Some(held) if *held <= position => false,
                _ => {
                    *current = Some(position);
                    true
                }
            },
            Collector::Multi { size, positions } => {
                if positions.len() < *size {
                    return positions.insert(position);
                }
                let outranks = positions.last().map_or(true, |weakest| position < *weakest);
                if !outranks {
                    return false;
                }
                positions.insert(position);
                positions.pop_last();
                true
            }
        }
    }

    /// Weight of the weakest member once the collector is full.
    pub(crate) fn floor(&self) -> Option<i64> {
        match self {
            Collector::Single(current) => current.as_ref().map(Position::weight),
            Collector::Multi { size, positions } if positions.len() >= *size => {
                positions.last().map(Position::weight)
            }
            Collector::Multi { .. } => None,
        }
    }

    pub(crate) fn max_weight(&self) -> Option<i64> {
        match self {
            Collector::Single(current) => current.as_ref().map(Position::weight),
            Collector::Multi { positions, .. } => positions.first().map(Position::weight),
        }
    }

    pub(crate) fn merge_from(&mut self, other: &Collector) {
        match other {
            Collector::Single(current) => {
                if let Some(position) = current {
                    self.offer(position.clone());
                }
            }
            Collector::Multi { positions, .. } => {
                for position in positions {
                    if !self.offer(position.clone()) {
                        // Later members rank lower still.
                        break;
                    }
                }
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        match self {
            Collector::Single(current) => *current = None,
            Collector::Multi { positions, .. } => positions.clear(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        match self {
            Collector::Single(current) => current.is_none(),
            Collector::Multi { positions, .. } => positions.is_empty(),
        }
    }

    pub(crate) fn positions_descending(&self) -> Vec<Position> {
        match self {
            Collector::Single(current) => current.iter().cloned().collect(),
            Collector::Multi { positions, .. } => positions.iter().cloned().collect(),
        }
    }
}

/// A [`Collector`] shared by writers, with a lock-free admission floor.
///
/// The floor mirrors the weakest member's weight while the collector is
/// full.  A fresh candidate carries the newest sequence, so it only enters by
/// being strictly heavier; anything at or below the floor is rejected with a
/// single atomic load.
pub(crate) struct ConcurrentCollector {
    floor: AtomicI64,
    inner: Mutex<Collector>,
}

impl ConcurrentCollector {
    pub(crate) fn new(size: usize) -> Self {
        ConcurrentCollector {
            floor: AtomicI64::new(NO_FLOOR),
            inner: Mutex::new(Collector::new(size)),
        }
    }

    /// Offers an already admitted `weight`.
    pub(crate) fn update(
        &self,
        weight: i64,
        sequence: &AtomicU64,
        max_identity_length: usize,
        identity: &mut dyn FnMut() -> String,
    ) -> bool {
        if weight <= self.floor.load(Ordering::Acquire) {
            return false;
        }
        let identity = truncate(identity(), max_identity_length);

        let mut collector = self.inner.lock();
        // Drawn under the lock so sequences grow with insertion order here.
        let position = Position::new(weight, identity, sequence.fetch_add(1, Ordering::Relaxed));
        let accepted = collector.offer(position);
        if accepted {
            if let Some(floor) = collector.floor() {
                self.floor.store(floor, Ordering::Release);
            }
        }
        accepted
    }

    pub(crate) fn max_weight(&self) -> Option<i64> {
        self.inner.lock().max_weight()
    }

    /// Adds every member into `target`, leaving this collector untouched.
    pub(crate) fn merge_into(&self, target: &mut Collector) {
        target.merge_from(&self.inner.lock());
    }

    /// Moves every member into `target`.
    pub(crate) fn drain_into(&self, target: &mut Collector) {
        let mut collector = self.inner.lock();
        target.merge_from(&collector);
        collector.clear();
        self.floor.store(NO_FLOOR, Ordering::Release);
    }

    pub(crate) fn clear(&self) {
        let mut collector = self.inner.lock();
        collector.clear();
        self.floor.store(NO_FLOOR, Ordering::Release);
    }

    pub(crate) fn positions_descending(&self) -> Vec<Position> {
        self.inner.lock().positions_descending()
    }
}

impl ChunkPayload for ConcurrentCollector {
    fn reset(&self) {
        self.clear();
    }
}
