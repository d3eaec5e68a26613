//! Construction-time validation errors.
//!
//! Steady-state reads and writes never fail: rejections on the hot path are
//! reported through sentinel values (`false`, `NaN`, a skipped sample).  The
//! only runtime `Result` is [`HitRatio::update`], whose arguments are checked
//! for consistency.
//!
//! [`HitRatio::update`]: crate::ratio::HitRatio::update

use std::time::Duration;

/// Errors produced while configuring a metric or updating a hit ratio.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A window, period or caching duration that must be positive was zero.
    #[error("{name} must be positive, got {value:?}")]
    NonPositiveDuration {
        /// Which option was rejected.
        name: &'static str,
        /// The rejected value.
        value: Duration,
    },
    /// The number of chunks is outside `[MIN_CHUNKS, MAX_CHUNKS]`.
    #[error("chunk count must be in [{min}, {max}], got {value}")]
    ChunkCount {
        /// The rejected value.
        value: usize,
        /// Lower bound.
        min: usize,
        /// Upper bound.
        max: usize,
    },
    /// `window / chunks` is shorter than the rotation granularity.
    #[error("chunk duration {value:?} is shorter than the minimum {min:?}")]
    ChunkDuration {
        /// The computed chunk duration.
        value: Duration,
        /// The smallest duration the ring can rotate at.
        min: Duration,
    },
    /// The configured identity length limit is too short to be useful.
    #[error("max identity length must be at least {min}, got {value}")]
    IdentityLength {
        /// The rejected value.
        value: usize,
        /// Lower bound.
        min: usize,
    },
    /// A ranking must keep at least one position.
    #[error("ranking size must be at least 1")]
    RankingSize,
    /// The ranking threshold must not be negative.
    #[error("ranking threshold must not be negative, got {0}")]
    NegativeThreshold(i64),
    /// The histogram bounds or precision are unusable.
    #[error("invalid histogram bounds: {0}")]
    HistogramBounds(String),
    /// `update` was called with more hits than total requests.
    #[error("hits ({hits}) must not exceed total ({total})")]
    HitsExceedTotal {
        /// Hits supplied by the caller.
        hits: i32,
        /// Total supplied by the caller.
        total: i32,
    },
    /// `update` was called with a negative count.
    #[error("{name} must not be negative, got {value}")]
    NegativeCount {
        /// Which argument was rejected.
        name: &'static str,
        /// The rejected value.
        value: i32,
    },
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn require_positive(name: &'static str, value: Duration) -> Result<()> {
    if value.is_zero() {
        return Err(Error::NonPositiveDuration { name, value });
    }
    Ok(())
}
