//! Concurrent time-windowed counters, histograms, hit ratios and top-K
//! rankings.
//!
//! Every metric is built with a [`Retention`] policy that decides how long
//! recorded data stays visible.  Rolling windows (`ResetByChunks`) are backed
//! by a ring of chunks rotated on the hot path with a few atomics; clearing
//! the next chunk is handed to a [`RotationActor`] so writers do not pay for
//! it.

mod builder;
mod chunk;
mod error;
mod snapshot;
pub mod clock;
pub mod counter;
pub mod executor;
pub mod histogram;
pub mod ranking;
pub mod ratio;
pub mod retention;

pub use builder::{
    CounterBuilder, HistogramBuilder, HitRatioBuilder, RankingBuilder, DEFAULT_CACHING_DURATION,
    DEFAULT_MAX_IDENTITY_LENGTH, DEFAULT_RANKING_SIZE,
};
pub use clock::{CachedTicker, ManualTicker, SystemTicker, Ticker};
pub use counter::WindowCounter;
pub use error::{Error, Result};
pub use executor::{Executor, InlineExecutor, Job, ResilientExecutor, RotationActor, Task};
pub use histogram::{HistogramSnapshot, OverflowResolver, Reservoir};
pub use ranking::{Position, Ranking};
pub use ratio::HitRatio;
pub use retention::Retention;
pub use snapshot::SnapshotCache;
