//! Time sources.
//!
//! Every metric reads time through a [`Ticker`] returning monotonically
//! non-decreasing milliseconds since an arbitrary origin.
//!
//! | Ticker            | Cost per call        | Use |
//! |-------------------|----------------------|-----|
//! | [`SystemTicker`]  | one `Instant::now()` | default |
//! | [`CachedTicker`]  | one atomic load      | very hot paths that tolerate coarse time |
//! | [`ManualTicker`]  | one atomic load      | deterministic tests |

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::executor::worker::BackgroundTask;

/// A monotonic millisecond clock.
pub trait Ticker: Send + Sync + 'static {
    /// Milliseconds elapsed since the ticker's origin.  Never decreases.
    fn now_millis(&self) -> i64;
}

#[inline]
fn millis_since(origin: Instant) -> i64 {
    i64::try_from(origin.elapsed().as_millis()).unwrap_or(i64::MAX)
}

// ---------------------------------------------------------------------------
// SystemTicker
// ---------------------------------------------------------------------------

/// Samples `Instant::now()` on every call.
#[derive(Debug, Clone, Copy)]
pub struct SystemTicker {
    origin: Instant,
}

impl SystemTicker {
    pub fn new() -> Self {
        SystemTicker {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl Ticker for SystemTicker {
    #[inline]
    fn now_millis(&self) -> i64 {
        millis_since(self.origin)
    }
}

// ---------------------------------------------------------------------------
// CachedTicker
// ---------------------------------------------------------------------------

/// A low-precision ticker refreshed by a background thread.
///
/// Reads are a single atomic load.  The sampler thread starts on the first
/// read and is stopped by [`CachedTicker::stop`] (or on drop); once stopped
/// the ticker samples the system clock directly, so it stays correct.
pub struct CachedTicker {
    shared: Arc<CachedState>,
    precision: Duration,
    sampler: BackgroundTask,
}

struct CachedState {
    origin: Instant,
    cached: AtomicI64,
}

impl CachedTicker {
    /// Creates a ticker refreshed every `precision`.
    pub fn new(precision: Duration) -> Self {
        let origin = Instant::now();
        CachedTicker {
            shared: Arc::new(CachedState {
                origin,
                cached: AtomicI64::new(0),
            }),
            precision: precision.max(Duration::from_millis(1)),
            sampler: BackgroundTask::new("rolling-metrics-ticker"),
        }
    }

    /// Stops the sampler thread.  Idempotent.
    pub fn stop(&self) {
        self.sampler.stop(self.precision.saturating_mul(10).max(Duration::from_millis(100)));
    }

    fn start_sampler(&self) -> bool {
        // Readers see `cached` as soon as RUNNING is published.
        self.shared
            .cached
            .fetch_max(millis_since(self.shared.origin), Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let precision = self.precision;
        self.sampler.ensure_started(move |signal| {
            while !signal.is_raised() {
                let now = millis_since(shared.origin);
                shared.cached.fetch_max(now, Ordering::Release);
                thread::park_timeout(precision);
            }
        })
    }
}

impl Ticker for CachedTicker {
    #[inline]
    fn now_millis(&self) -> i64 {
        if self.sampler.is_running() {
            return self.shared.cached.load(Ordering::Acquire);
        }
        let now = millis_since(self.shared.origin);
        if self.start_sampler() {
            return self.shared.cached.load(Ordering::Acquire).max(now);
        }
        now
    }
}

// ---------------------------------------------------------------------------
// ManualTicker
// ---------------------------------------------------------------------------

/// A ticker advanced explicitly by the caller.
///
/// Cloning shares the same underlying time, so a test can hand one clone to a
/// metric and advance another.
#[derive(Debug, Clone, Default)]
pub struct ManualTicker {
    millis: Arc<AtomicI64>,
}

impl ManualTicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves time forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        let delta = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(delta, Ordering::Relaxed);
    }

    /// Moves time to `millis` since origin.  Moving backwards is ignored.
    pub fn set_millis(&self, millis: i64) {
        self.millis.fetch_max(millis, Ordering::Relaxed);
    }
}

impl Ticker for ManualTicker {
    #[inline]
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::Relaxed)
    }
}

/// Duration as whole milliseconds, saturating.
#[inline]
pub(crate) fn as_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
