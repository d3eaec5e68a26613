//! Latency histograms over a retention window.
//!
//! Values are recorded into [`hdrhistogram`] histograms sharded across a few
//! per-thread stripes, each behind its own (practically uncontended) lock.
//! Readers merge the stripes into a fresh histogram and return it wrapped in
//! an immutable [`HistogramSnapshot`].
//!
//! | Retention          | Reservoir |
//! |--------------------|-----------|
//! | `Uniform`          | one striped recorder, never cleared |
//! | `ResetOnSnapshot`  | double-buffered: stripes are swapped with spares on read |
//! | `ResetPeriodically`| striped recorder cleared wholesale on each period |
//! | `ResetByChunks`    | chunk ring of striped recorders, merged at unit weight |

mod recorder;
mod reservoir;

use std::fmt;
use std::sync::Arc;

use hdrhistogram::Histogram;

use crate::error::{Error, Result};

pub(crate) use reservoir::{
    ChunkedReservoir, ResetOnSnapshotReservoir, ResetPeriodicallyReservoir, UniformReservoir,
};

/// Default number of significant decimal digits kept by a histogram.
pub const DEFAULT_SIGNIFICANT_DIGITS: u8 = 2;

/// Accumulates a distribution of non-negative values.
pub trait Reservoir: Send + Sync {
    /// Records `value`.  Negative values are ignored.
    fn record(&self, value: i64);

    /// The distribution visible under the reservoir's retention policy.
    fn snapshot(&self) -> HistogramSnapshot;
}

/// What happens to values above the highest trackable value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OverflowResolver {
    /// Record the highest trackable value instead.
    #[default]
    Clamp,
    /// Drop the value.
    Skip,
    /// Grow the histogram to fit the value.
    ///
    /// Memory is then bounded only by the largest value ever recorded, so this
    /// is unsafe for inputs that are not trusted to stay in range.
    PassThrough,
}

/// Histogram shape, validated once at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct HdrConfig {
    pub(crate) lowest: u64,
    /// `None` lets the histogram grow with the data.
    pub(crate) highest: Option<u64>,
    pub(crate) significant_digits: u8,
    pub(crate) overflow: OverflowResolver,
}

impl Default for HdrConfig {
    fn default() -> Self {
        HdrConfig {
            lowest: 1,
            highest: None,
            significant_digits: DEFAULT_SIGNIFICANT_DIGITS,
            overflow: OverflowResolver::default(),
        }
    }
}

impl HdrConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.significant_digits > 5 {
            return Err(Error::HistogramBounds(format!(
                "significant digits must be in 0..=5, got {}",
                self.significant_digits
            )));
        }
        if self.lowest == 0 {
            return Err(Error::HistogramBounds(
                "lowest discernible value must be at least 1".to_string(),
            ));
        }
        if let Some(highest) = self.highest {
            if highest < self.lowest.saturating_mul(2) {
                return Err(Error::HistogramBounds(format!(
                    "highest trackable value {highest} must be at least twice the lowest {}",
                    self.lowest
                )));
            }
        }
        self.new_histogram().map(|_| ())
    }

    /// An empty histogram of this shape.
    pub(crate) fn new_histogram(&self) -> Result<Histogram<u64>> {
        let high = self.highest.unwrap_or_else(|| self.lowest.saturating_mul(2));
        let mut histogram =
            Histogram::new_with_bounds(self.lowest, high, self.significant_digits)
                .map_err(|err| Error::HistogramBounds(format!("{err:?}")))?;
        if self.highest.is_none() || self.overflow == OverflowResolver::PassThrough {
            histogram.auto(true);
        }
        Ok(histogram)
    }

    /// Records `value` into `histogram`, applying the overflow policy.
    #[inline]
    pub(crate) fn record(&self, histogram: &mut Histogram<u64>, value: u64) {
        match (self.overflow, self.highest) {
            (OverflowResolver::Skip, Some(highest)) if value > highest => {}
            (OverflowResolver::Clamp, Some(_)) => histogram.saturating_record(value),
            _ => {
                if let Err(err) = histogram.record(value) {
                    tracing::trace!(value, ?err, "value outside histogram range");
                }
            }
        }
    }
}

/// Merges `source` into `target`.  Both share one [`HdrConfig`], so this only
/// fails if the configuration was bypassed.
#[inline]
pub(crate) fn merge(target: &mut Histogram<u64>, source: &Histogram<u64>) {
    if source.is_empty() {
        return;
    }
    if let Err(err) = target.add(source) {
        tracing::warn!(?err, "histogram merge failed");
    }
}

/// An immutable distribution returned by [`Reservoir::snapshot`].
///
/// Cloning is cheap: the underlying histogram is shared.  Every statistic of
/// an empty snapshot is zero.
#[derive(Clone)]
pub struct HistogramSnapshot {
    histogram: Arc<Histogram<u64>>,
}

impl HistogramSnapshot {
    pub(crate) fn new(histogram: Histogram<u64>) -> Self {
        HistogramSnapshot {
            histogram: Arc::new(histogram),
        }
    }

    /// Number of recorded values.
    #[inline]
    pub fn count(&self) -> u64 {
        self.histogram.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    pub fn min(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        self.histogram.min()
    }

    pub fn max(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        self.histogram.max()
    }

    pub fn mean(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.histogram.mean()
    }

    pub fn stddev(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.histogram.stdev()
    }

    /// The value at quantile `q` in `0.0..=1.0`.
    pub fn value_at_quantile(&self, q: f64) -> u64 {
        if self.is_empty() {
            return 0;
        }
        self.histogram.value_at_quantile(q.clamp(0.0, 1.0))
    }

    /// `(quantile, value)` pairs for each of `quantiles`, in order.
    ///
    /// ```
    /// use rolling_metrics::HistogramBuilder;
    ///
    /// let reservoir = HistogramBuilder::new().build().unwrap();
    /// for v in 1..=100 {
    ///     reservoir.record(v);
    /// }
    /// let p = reservoir.snapshot().percentiles(&[0.5, 0.99]);
    /// assert_eq!(p[0].0, 0.5);
    /// assert!(p[1].1 >= 99);
    /// ```
    pub fn percentiles(&self, quantiles: &[f64]) -> Vec<(f64, u64)> {
        quantiles
            .iter()
            .map(|&q| (q, self.value_at_quantile(q)))
            .collect()
    }

    /// The merged histogram, for extractions not covered above.
    pub fn histogram(&self) -> &Histogram<u64> {
        &self.histogram
    }
}

impl fmt::Debug for HistogramSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistogramSnapshot")
            .field("count", &self.count())
            .field("min", &self.min())
            .field("max", &self.max())
            .field("mean", &self.mean())
            .finish()
    }
}
