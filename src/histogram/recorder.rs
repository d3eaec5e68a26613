//! Striped histogram recorders.
//!
//! Each calling thread is permanently assigned one stripe through a
//! thread-local index, so writers on different threads lock different
//! histograms.  The lock is held only for the duration of one `record`.
//!
//! [`IntervalRecorder`] adds double buffering: a read swaps every stripe with
//! a spare under the stripe lock (the only critical section a reader shares
//! with writers) and merges the retired histograms outside it.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::utils::CachePadded;
use hdrhistogram::Histogram;
use parking_lot::Mutex;

use super::{merge, HdrConfig};
use crate::chunk::ChunkPayload;
use crate::error::Result;

/// Number of stripes per recorder.  Must be a power of two.
const NUM_STRIPES: usize = 4;
const STRIPE_MASK: usize = NUM_STRIPES - 1;

static STRIPE_COUNTER: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static THREAD_STRIPE: usize = STRIPE_COUNTER.fetch_add(1, Ordering::Relaxed) & STRIPE_MASK;
}

#[inline]
fn thread_stripe() -> usize {
    THREAD_STRIPE.with(|idx| *idx)
}

/// Converts a caller-supplied value; negative values are not recordable.
#[inline]
fn admit(value: i64) -> Option<u64> {
    u64::try_from(value).ok()
}

pub(crate) struct StripedRecorder {
    config: HdrConfig,
    stripes: Box<[CachePadded<Mutex<Histogram<u64>>>]>,
    /// Empty histogram of the configured shape; cloned to start a merge.
    template: Histogram<u64>,
}

impl StripedRecorder {
    pub(crate) fn new(config: HdrConfig) -> Result<Self> {
        let template = config.new_histogram()?;
        let stripes = (0..NUM_STRIPES)
            .map(|_| CachePadded::new(Mutex::new(template.clone())))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(StripedRecorder {
            config,
            stripes,
            template,
        })
    }

    #[inline]
    pub(crate) fn record(&self, value: i64) {
        let Some(value) = admit(value) else {
            return;
        };
        let mut histogram = self.stripes[thread_stripe()].lock();
        self.config.record(&mut histogram, value);
    }

    /// A fresh, empty histogram of this recorder's shape.
    #[inline]
    pub(crate) fn empty(&self) -> Histogram<u64> {
        self.template.clone()
    }

    /// Adds every stripe into `target` without clearing anything.
    pub(crate) fn merge_into(&self, target: &mut Histogram<u64>) {
        for stripe in self.stripes.iter() {
            merge(target, &stripe.lock());
        }
    }

    /// Clears every stripe.
    pub(crate) fn clear(&self) {
        for stripe in self.stripes.iter() {
            stripe.lock().reset();
        }
    }
}

impl ChunkPayload for StripedRecorder {
    fn reset(&self) {
        self.clear();
    }
}

/// Striped recorder whose reads drain what they return.
pub(crate) struct IntervalRecorder {
    active: StripedRecorder,
    /// One spare per stripe.  The lock also serializes readers.
    spares: Mutex<Vec<Histogram<u64>>>,
}

impl IntervalRecorder {
    pub(crate) fn new(config: HdrConfig) -> Result<Self> {
        let active = StripedRecorder::new(config)?;
        let spares = (0..NUM_STRIPES).map(|_| active.empty()).collect();
        Ok(IntervalRecorder {
            active,
            spares: Mutex::new(spares),
        })
    }

    #[inline]
    pub(crate) fn record(&self, value: i64) {
        self.active.record(value);
    }

    /// Returns everything recorded since the previous call.
    pub(crate) fn interval(&self) -> Histogram<u64> {
        let mut spares = self.spares.lock();
        let mut interval = self.active.empty();
        for (stripe, spare) in self.active.stripes.iter().zip(spares.iter_mut()) {
            std::mem::swap(&mut *stripe.lock(), spare);
            merge(&mut interval, spare);
            spare.reset();
        }
        interval
    }
}
