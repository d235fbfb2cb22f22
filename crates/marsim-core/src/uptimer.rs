//! Wall-clock elapsed-time tracking.
//!
//! The [`UpTimer`] is the only place the scheduler learns how much real
//! time passed between two pulses. It reads a [`TimeSource`] port so that
//! tests can drive it with a [`ManualTimeSource`] instead of the system
//! clock.
//!
//! Pausing does not stop the timer. It is recorded so that the uptime
//! display excludes paused spans, and resuming re-anchors the query
//! reference so the first pulse after a pause carries no backlog.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Port for reading monotonic wall-clock time.
pub trait TimeSource: Send + Sync {
    /// Milliseconds since an arbitrary fixed origin. Never decreases.
    fn now_millis(&self) -> u64;
}

/// Monotonic system time.
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    /// Create a source whose origin is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn now_millis(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Hand-driven time source for deterministic tests and replays.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    millis: AtomicU64,
}

impl ManualTimeSource {
    /// Create a source starting at `start_millis`.
    pub const fn new(start_millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(start_millis),
        }
    }

    /// Move time forward by `millis`.
    pub fn advance(&self, millis: u64) {
        self.millis
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |now| {
                Some(now.saturating_add(millis))
            })
            .ok();
    }
}

impl TimeSource for ManualTimeSource {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct UpTimerState {
    /// Reference point of the previous elapsed-time query.
    last_query: u64,
    /// When the current pause began, if paused.
    paused_since: Option<u64>,
    /// Total milliseconds spent in completed pauses.
    paused_total: u64,
}

/// Tracks real elapsed time for the scheduler and the uptime display.
pub struct UpTimer {
    source: Arc<dyn TimeSource>,
    started_at: u64,
    state: Mutex<UpTimerState>,
}

impl std::fmt::Debug for UpTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpTimer")
            .field("started_at", &self.started_at)
            .field("uptime_millis", &self.uptime_millis())
            .finish_non_exhaustive()
    }
}

impl UpTimer {
    /// Create a timer anchored at the source's current time.
    pub fn new(source: Arc<dyn TimeSource>) -> Self {
        let now = source.now_millis();
        Self {
            source,
            started_at: now,
            state: Mutex::new(UpTimerState {
                last_query: now,
                paused_since: None,
                paused_total: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, UpTimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Milliseconds since the previous call (or since construction /
    /// the last [`rebase`](Self::rebase)). Resets the reference to now.
    pub fn elapsed_since_last_query(&self) -> u64 {
        let now = self.source.now_millis();
        let mut state = self.lock();
        let elapsed = now.saturating_sub(state.last_query);
        state.last_query = now;
        elapsed
    }

    /// Move the query reference to now without reporting elapsed time.
    pub fn rebase(&self) {
        let now = self.source.now_millis();
        self.lock().last_query = now;
    }

    /// Record a pause transition. Repeating the current state is a no-op.
    pub fn set_paused(&self, paused: bool) {
        let now = self.source.now_millis();
        let mut state = self.lock();
        match (paused, state.paused_since) {
            (true, None) => state.paused_since = Some(now),
            (false, Some(since)) => {
                state.paused_total = state.paused_total.saturating_add(now.saturating_sub(since));
                state.paused_since = None;
                state.last_query = now;
            }
            _ => {}
        }
    }

    /// Whether a pause is currently recorded.
    pub fn is_paused(&self) -> bool {
        self.lock().paused_since.is_some()
    }

    /// Milliseconds the simulation has been up, excluding paused spans.
    pub fn uptime_millis(&self) -> u64 {
        let now = self.source.now_millis();
        let state = self.lock();
        let current_pause = state
            .paused_since
            .map_or(0, |since| now.saturating_sub(since));
        now.saturating_sub(self.started_at)
            .saturating_sub(state.paused_total)
            .saturating_sub(current_pause)
    }

    /// Uptime formatted as `HHh MMm SS.SSs`.
    pub fn uptime_string(&self) -> String {
        #[allow(clippy::cast_precision_loss)]
        let seconds = self.uptime_millis() as f64 / 1000.0;
        format_time_string(seconds)
    }
}

/// Format a span of seconds as `HHh MMm SS.SSs`. Hours are omitted when
/// zero and the span wraps at one day.
pub fn format_time_string(seconds: f64) -> String {
    const SECS_PER_MIN: f64 = 60.0;
    const SECS_PER_HOUR: f64 = 3600.0;
    const SECS_PER_DAY: f64 = 86_400.0;

    let seconds = seconds.max(0.0);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let hours = ((seconds % SECS_PER_DAY) / SECS_PER_HOUR) as u32;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let minutes = ((seconds % SECS_PER_HOUR) / SECS_PER_MIN) as u32;
    let secs = seconds % SECS_PER_MIN;

    let mut out = String::new();
    if hours > 0 {
        let _ = write!(out, "{hours:02}h ");
    }
    let _ = write!(out, "{minutes:02}m {secs:05.2}s");
    out
}
