use std::sync::Arc;
use std::time::Duration;

use crate::clock::{SystemTicker, Ticker};
use crate::counter::{
    ResetOnSnapshotCounter, ResetPeriodicallyCounter, SmoothlyDecayingCounter, UniformCounter,
    WindowCounter,
};
use crate::error::{Error, Result};
use crate::executor::{Executor, ResilientExecutor, RotationActor};
use crate::histogram::{
    ChunkedReservoir, HdrConfig, OverflowResolver, Reservoir, ResetOnSnapshotReservoir,
    ResetPeriodicallyReservoir, UniformReservoir,
};
use crate::ranking::{
    ChunkedRanking, Ranking, RankingConfig, ResetOnSnapshotRanking, ResetPeriodicallyRanking,
    UniformRanking, MIN_IDENTITY_LENGTH,
};
use crate::ratio::{
    ChunkedHitRatio, HitRatio, ResetOnSnapshotHitRatio, ResetPeriodicallyHitRatio,
    UniformHitRatio,
};
use crate::retention::Retention;
use crate::snapshot::{CachingRanking, CachingReservoir};

/// Default time a histogram or ranking snapshot is served from cache.
pub const DEFAULT_CACHING_DURATION: Duration = Duration::from_secs(1);

/// Default number of positions a ranking keeps.
pub const DEFAULT_RANKING_SIZE: usize = 10;

/// Default identity length limit, in characters.
pub const DEFAULT_MAX_IDENTITY_LENGTH: usize = 1_000;

/// Retention, time source and rotation executor shared by every builder.
#[derive(Clone, Default)]
struct Plumbing {
    retention: Retention,
    ticker: Option<Arc<dyn Ticker>>,
    executor: Option<Arc<dyn Executor>>,
}

impl Plumbing {
    fn ticker(&self) -> Arc<dyn Ticker> {
        match &self.ticker {
            Some(ticker) => Arc::clone(ticker),
            None => Arc::new(SystemTicker::new()),
        }
    }

    /// The injected executor, or the process-wide rotation actor.
    fn executor(&self) -> ResilientExecutor {
        let inner: Arc<dyn Executor> = match &self.executor {
            Some(executor) => Arc::clone(executor),
            None => RotationActor::shared(),
        };
        ResilientExecutor::new(inner)
    }
}

/// Generates the `retention` / `ticker` / `executor` setters.
macro_rules! plumbing_setters {
    () => {
        /// Sets the retention policy (default: [`Retention::Uniform`]).
        pub fn retention(mut self, retention: Retention) -> Self {
            self.plumbing.retention = retention;
            self
        }

        /// Sets the time source (default: [`SystemTicker`]).
        ///
        /// Clones of a [`ManualTicker`](crate::ManualTicker) share their time,
        /// so tests can keep one clone and advance it.
        pub fn ticker<T: Ticker>(mut self, ticker: T) -> Self {
            self.plumbing.ticker = Some(Arc::new(ticker));
            self
        }

        /// Sets the executor that prepares chunks ahead of time (default: the
        /// process-wide [`RotationActor::shared`]).  Refused jobs always run
        /// inline, so any executor is safe to use.
        pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
            self.plumbing.executor = Some(executor);
            self
        }
    };
}

// ---------------------------------------------------------------------------
// CounterBuilder
// ---------------------------------------------------------------------------

/// Builder for a [`WindowCounter`].
///
/// # Example
/// ```
/// use rolling_metrics::{CounterBuilder, Retention};
/// use std::time::Duration;
///
/// let counter = CounterBuilder::new()
///     .retention(Retention::ResetByChunks { window: Duration::from_secs(60), chunks: 6 })
///     .build()
///     .unwrap();
/// counter.add(3);
/// assert_eq!(counter.sum(), 3);
/// ```
#[derive(Clone, Default)]
pub struct CounterBuilder {
    plumbing: Plumbing,
}

impl CounterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    plumbing_setters!();

    pub fn build(self) -> Result<Box<dyn WindowCounter>> {
        let retention = self.plumbing.retention;
        retention.validate()?;
        let counter: Box<dyn WindowCounter> = match retention {
            Retention::Uniform => Box::new(UniformCounter::default()),
            Retention::ResetOnSnapshot => Box::new(ResetOnSnapshotCounter::default()),
            Retention::ResetPeriodically(period) => {
                Box::new(ResetPeriodicallyCounter::new(period, self.plumbing.ticker())?)
            }
            Retention::ResetByChunks { window, chunks } => Box::new(SmoothlyDecayingCounter::new(
                window,
                chunks,
                self.plumbing.ticker(),
                self.plumbing.executor(),
            )?),
        };
        Ok(counter)
    }
}

// ---------------------------------------------------------------------------
// HistogramBuilder
// ---------------------------------------------------------------------------

/// Builder for a histogram [`Reservoir`].
///
/// # Example
/// ```
/// use rolling_metrics::{HistogramBuilder, Retention};
///
/// let reservoir = HistogramBuilder::new()
///     .highest_trackable_value(60_000)
///     .retention(Retention::ResetOnSnapshot)
///     .build()
///     .unwrap();
/// reservoir.record(42);
/// assert_eq!(reservoir.snapshot().max(), 42);
/// assert_eq!(reservoir.snapshot().count(), 0);
/// ```
#[derive(Clone)]
pub struct HistogramBuilder {
    plumbing: Plumbing,
    hdr: HdrConfig,
    caching: Duration,
}

impl Default for HistogramBuilder {
    fn default() -> Self {
        HistogramBuilder {
            plumbing: Plumbing::default(),
            hdr: HdrConfig::default(),
            caching: DEFAULT_CACHING_DURATION,
        }
    }
}

impl HistogramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    plumbing_setters!();

    /// Decimal digits of precision kept by the histogram, `0..=5`
    /// (default: 2).
    pub fn significant_digits(mut self, digits: u8) -> Self {
        self.hdr.significant_digits = digits;
        self
    }

    /// Lowest discernible value, at least 1 (default: 1).
    pub fn lowest_discernible_value(mut self, value: u64) -> Self {
        self.hdr.lowest = value;
        self
    }

    /// Highest value tracked exactly.  Values above it are handled by the
    /// [`OverflowResolver`] (default: unbounded).
    pub fn highest_trackable_value(mut self, value: u64) -> Self {
        self.hdr.highest = Some(value);
        self
    }

    /// How values above the highest trackable value are handled
    /// (default: [`OverflowResolver::Clamp`]).
    pub fn overflow_resolver(mut self, resolver: OverflowResolver) -> Self {
        self.hdr.overflow = resolver;
        self
    }

    /// How long a snapshot is reused; zero disables caching (default: 1 s).
    /// Ignored for [`Retention::ResetOnSnapshot`].
    pub fn snapshot_caching_duration(mut self, duration: Duration) -> Self {
        self.caching = duration;
        self
    }

    pub fn build(self) -> Result<Box<dyn Reservoir>> {
        let retention = self.plumbing.retention;
        retention.validate()?;
        self.hdr.validate()?;
        let ticker = self.plumbing.ticker();

        let reservoir: Box<dyn Reservoir> = match retention {
            Retention::Uniform => Box::new(UniformReservoir::new(self.hdr)?),
            Retention::ResetOnSnapshot => Box::new(ResetOnSnapshotReservoir::new(self.hdr)?),
            Retention::ResetPeriodically(period) => Box::new(ResetPeriodicallyReservoir::new(
                self.hdr,
                period,
                Arc::clone(&ticker),
            )?),
            Retention::ResetByChunks { window, chunks } => Box::new(ChunkedReservoir::new(
                self.hdr,
                window,
                chunks,
                Arc::clone(&ticker),
                self.plumbing.executor(),
            )?),
        };
        if self.caching.is_zero() || retention.drains_on_read() {
            return Ok(reservoir);
        }
        Ok(Box::new(CachingReservoir::new(reservoir, self.caching, ticker)))
    }
}

// ---------------------------------------------------------------------------
// HitRatioBuilder
// ---------------------------------------------------------------------------

/// Builder for a [`HitRatio`].
///
/// # Example
/// ```
/// use rolling_metrics::HitRatioBuilder;
///
/// let ratio = HitRatioBuilder::new().build().unwrap();
/// assert!(ratio.ratio().is_nan());
/// ratio.update(3, 4).unwrap();
/// assert_eq!(ratio.ratio(), 0.75);
/// ```
#[derive(Clone, Default)]
pub struct HitRatioBuilder {
    plumbing: Plumbing,
}

impl HitRatioBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    plumbing_setters!();

    pub fn build(self) -> Result<Box<dyn HitRatio>> {
        let retention = self.plumbing.retention;
        retention.validate()?;
        let ratio: Box<dyn HitRatio> = match retention {
            Retention::Uniform => Box::new(UniformHitRatio::default()),
            Retention::ResetOnSnapshot => Box::new(ResetOnSnapshotHitRatio::default()),
            Retention::ResetPeriodically(period) => {
                Box::new(ResetPeriodicallyHitRatio::new(period, self.plumbing.ticker())?)
            }
            Retention::ResetByChunks { window, chunks } => Box::new(ChunkedHitRatio::new(
                window,
                chunks,
                self.plumbing.ticker(),
                self.plumbing.executor(),
            )?),
        };
        Ok(ratio)
    }
}

// ---------------------------------------------------------------------------
// RankingBuilder
// ---------------------------------------------------------------------------

/// Builder for a top-K [`Ranking`].
///
/// # Example
/// ```
/// use rolling_metrics::RankingBuilder;
///
/// let ranking = RankingBuilder::new().size(2).build().unwrap();
/// ranking.update(120, || "GET /slow".to_string());
/// ranking.update(15, || "GET /fast".to_string());
/// ranking.update(3, || "GET /faster".to_string());
///
/// let top: Vec<_> = ranking.positions_descending().into_iter().map(|p| p.weight()).collect();
/// assert_eq!(top, vec![120, 15]);
/// ```
#[derive(Clone)]
pub struct RankingBuilder {
    plumbing: Plumbing,
    size: usize,
    threshold: i64,
    max_identity_length: usize,
    caching: Duration,
}

impl Default for RankingBuilder {
    fn default() -> Self {
        RankingBuilder {
            plumbing: Plumbing::default(),
            size: DEFAULT_RANKING_SIZE,
            threshold: 0,
            max_identity_length: DEFAULT_MAX_IDENTITY_LENGTH,
            caching: DEFAULT_CACHING_DURATION,
        }
    }
}

impl RankingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    plumbing_setters!();

    /// Number of positions kept, at least 1 (default: 10).
    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Weights below `threshold` are rejected without taking any lock
    /// (default: 0).
    pub fn threshold(mut self, threshold: i64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Identities longer than `limit` characters are truncated
    /// (default: 1000, minimum: 10).
    pub fn max_identity_length(mut self, limit: usize) -> Self {
        self.max_identity_length = limit;
        self
    }

    /// How long a snapshot is reused; zero disables caching (default: 1 s).
    /// Ignored for [`Retention::ResetOnSnapshot`].
    pub fn snapshot_caching_duration(mut self, duration: Duration) -> Self {
        self.caching = duration;
        self
    }

    fn config(&self) -> Result<RankingConfig> {
        if self.size == 0 {
            return Err(Error::RankingSize);
        }
        if self.threshold < 0 {
            return Err(Error::NegativeThreshold(self.threshold));
        }
        if self.max_identity_length < MIN_IDENTITY_LENGTH {
            return Err(Error::IdentityLength {
                value: self.max_identity_length,
                min: MIN_IDENTITY_LENGTH,
            });
        }
        Ok(RankingConfig {
            size: self.size,
            threshold: self.threshold,
            max_identity_length: self.max_identity_length,
        })
    }

    pub fn build(self) -> Result<Box<dyn Ranking>> {
        let retention = self.plumbing.retention;
        retention.validate()?;
        let config = self.config()?;
        let ticker = self.plumbing.ticker();

        let ranking: Box<dyn Ranking> = match retention {
            Retention::Uniform => Box::new(UniformRanking::new(config)),
            Retention::ResetOnSnapshot => Box::new(ResetOnSnapshotRanking::new(config)),
            Retention::ResetPeriodically(period) => Box::new(ResetPeriodicallyRanking::new(
                config,
                period,
                Arc::clone(&ticker),
            )?),
            Retention::ResetByChunks { window, chunks } => Box::new(ChunkedRanking::new(
                config,
                window,
                chunks,
                Arc::clone(&ticker),
                self.plumbing.executor(),
            )?),
        };
        if self.caching.is_zero() || retention.drains_on_read() {
            return Ok(ranking);
        }
        Ok(Box::new(CachingRanking::new(ranking, self.caching, ticker)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTicker;
    use crate::executor::InlineExecutor;

    fn chunked(window_ms: u64, chunks: usize) -> Retention {
        Retention::ResetByChunks {
            window: Duration::from_millis(window_ms),
            chunks,
        }
    }

    #[test]
    fn invalid_retention_is_rejected_by_every_builder() {
        let bad = chunked(60_000, 1);
        assert!(CounterBuilder::new().retention(bad).build().is_err());
        assert!(HistogramBuilder::new().retention(bad).build().is_err());
        assert!(HitRatioBuilder::new().retention(bad).build().is_err());
        assert!(RankingBuilder::new().retention(bad).build().is_err());

        let zero = Retention::ResetPeriodically(Duration::ZERO);
        assert!(matches!(
            CounterBuilder::new().retention(zero).build().err(),
            Some(Error::NonPositiveDuration { .. })
        ));
    }

    #[test]
    fn ranking_options_are_validated() {
        assert_eq!(
            RankingBuilder::new().size(0).build().err(),
            Some(Error::RankingSize)
        );
        assert_eq!(
            RankingBuilder::new().threshold(-1).build().err(),
            Some(Error::NegativeThreshold(-1))
        );
        assert_eq!(
            RankingBuilder::new().max_identity_length(9).build().err(),
            Some(Error::IdentityLength { value: 9, min: MIN_IDENTITY_LENGTH })
        );
        assert!(RankingBuilder::new().max_identity_length(10).build().is_ok());
    }

    #[test]
    fn histogram_bounds_are_validated() {
        assert!(matches!(
            HistogramBuilder::new().significant_digits(6).build().err(),
            Some(Error::HistogramBounds(_))
        ));
        assert!(matches!(
            HistogramBuilder::new()
                .lowest_discernible_value(100)
                .highest_trackable_value(150)
                .build()
                .err(),
            Some(Error::HistogramBounds(_))
        ));
    }

    #[test]
    fn cached_snapshots_are_reused_until_they_expire() {
        let ticker = ManualTicker::new();
        let reservoir = HistogramBuilder::new()
            .ticker(ticker.clone())
            .executor(Arc::new(InlineExecutor))
            .build()
            .unwrap();

        reservoir.record(10);
        assert_eq!(reservoir.snapshot().count(), 1);
        reservoir.record(20);
        assert_eq!(reservoir.snapshot().count(), 1, "served from cache");

        ticker.advance(DEFAULT_CACHING_DURATION);
        assert_eq!(reservoir.snapshot().count(), 2);
    }

    #[test]
    fn zero_caching_duration_reads_through() {
        let ranking = RankingBuilder::new()
            .snapshot_caching_duration(Duration::ZERO)
            .ticker(ManualTicker::new())
            .build()
            .unwrap();
        ranking.update(5, || "a".to_string());
        assert_eq!(ranking.positions_descending().len(), 1);
        ranking.update(6, || "b".to_string());
        assert_eq!(ranking.positions_descending().len(), 2);
    }

    #[test]
    fn reset_on_snapshot_is_never_cached() {
        let ranking = RankingBuilder::new()
            .retention(Retention::ResetOnSnapshot)
            .ticker(ManualTicker::new())
            .build()
            .unwrap();
        ranking.update(5, || "a".to_string());
        assert_eq!(ranking.positions_descending().len(), 1);
        assert!(ranking.positions_descending().is_empty());
    }

    #[test]
    fn every_retention_builds_for_every_kind() {
        let ticker = ManualTicker::new();
        for retention in [
            Retention::Uniform,
            Retention::ResetOnSnapshot,
            Retention::ResetPeriodically(Duration::from_secs(1)),
            chunked(2_000, 2),
        ] {
            let counter = CounterBuilder::new()
                .retention(retention)
                .ticker(ticker.clone())
                .executor(Arc::new(InlineExecutor))
                .build()
                .unwrap();
            counter.increment();
            assert_eq!(counter.sum(), 1, "{retention:?}");

            let ratio = HitRatioBuilder::new()
                .retention(retention)
                .ticker(ticker.clone())
                .executor(Arc::new(InlineExecutor))
                .build()
                .unwrap();
            ratio.increment_hit();
            ratio.increment_miss();
            assert_eq!(ratio.ratio(), 0.5, "{retention:?}");
        }
    }
}
