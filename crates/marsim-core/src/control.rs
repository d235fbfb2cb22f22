//! Clock control state shared between the clock thread and callers.
//!
//! This module provides the atomic state behind the clock's control
//! surface. Any thread may pause/resume, change the time ratio or the
//! frame budget, or queue a save or exit request; the clock thread reads
//! the same fields once per cycle.
//!
//! # Architecture
//!
//! Every field that the clock thread reads per cycle is a single atomic.
//! No invariant spans two fields, so no lock guards them. The only lock
//! is the short one around the pending [`SaveRequest`], which carries a
//! path and cannot live in an atomic. A [`Notify`] wakes the clock
//! thread out of its sleep when a stop is requested.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::sync::futures::Notified;

use crate::cadence::FrameBudget;
use crate::persistence::{SaveMode, SaveRequest};

/// Smallest accepted time ratio (simulated seconds per real second).
pub const MIN_TIME_RATIO: f64 = 16.0;
/// Largest accepted time ratio.
pub const MAX_TIME_RATIO: f64 = 4096.0;
/// Smallest accepted period between updates, in milliseconds.
pub const MIN_TIME_BETWEEN_UPDATES_MS: u64 = 1;
/// Largest accepted period between updates, in milliseconds.
pub const MAX_TIME_BETWEEN_UPDATES_MS: u64 = 10_800;
/// Smallest accepted frame-skip cap.
pub const MIN_FRAME_SKIPS: u32 = 1;
/// Largest accepted frame-skip cap.
pub const MAX_FRAME_SKIPS: u32 = 200;
/// Smallest accepted yield threshold.
pub const MIN_NO_DELAYS_PER_YIELD: u32 = 1;
/// Largest accepted yield threshold.
pub const MAX_NO_DELAYS_PER_YIELD: u32 = 200;

/// A control-surface value outside its legal range. The previous value
/// is kept when this is returned.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParameterError {
    /// Time ratio outside `[16, 4096]`.
    #[error("time ratio {value} out of bounds (16..=4096)")]
    TimeRatioOutOfRange {
        /// The rejected value.
        value: f64,
    },

    /// Period between updates outside `[1, 10800]` ms.
    #[error("time between updates {value}ms out of bounds (1..=10800)")]
    TimeBetweenUpdatesOutOfRange {
        /// The rejected value in milliseconds.
        value: u64,
    },

    /// Frame-skip cap outside `[1, 200]`.
    #[error("max frame skips {value} out of bounds (1..=200)")]
    MaxFrameSkipsOutOfRange {
        /// The rejected value.
        value: u32,
    },

    /// Yield threshold outside `[1, 200]`.
    #[error("no-delays-per-yield {value} out of bounds (1..=200)")]
    NoDelaysPerYieldOutOfRange {
        /// The rejected value.
        value: u32,
    },
}

/// Check a time ratio and round it to two decimal places.
///
/// # Errors
///
/// Returns [`ParameterError::TimeRatioOutOfRange`] outside `[16, 4096]`
/// (NaN included).
pub fn validate_time_ratio(value: f64) -> Result<f64, ParameterError> {
    if (MIN_TIME_RATIO..=MAX_TIME_RATIO).contains(&value) {
        Ok((value * 100.0).round() / 100.0)
    } else {
        Err(ParameterError::TimeRatioOutOfRange { value })
    }
}

/// Check a period between updates.
///
/// # Errors
///
/// Returns [`ParameterError::TimeBetweenUpdatesOutOfRange`] outside `[1, 10800]`.
pub fn validate_time_between_updates(ms: u64) -> Result<u64, ParameterError> {
    if (MIN_TIME_BETWEEN_UPDATES_MS..=MAX_TIME_BETWEEN_UPDATES_MS).contains(&ms) {
        Ok(ms)
    } else {
        Err(ParameterError::TimeBetweenUpdatesOutOfRange { value: ms })
    }
}

/// Check a frame-skip cap.
///
/// # Errors
///
/// Returns [`ParameterError::MaxFrameSkipsOutOfRange`] outside `[1, 200]`.
pub fn validate_max_frame_skips(value: u32) -> Result<u32, ParameterError> {
    if (MIN_FRAME_SKIPS..=MAX_FRAME_SKIPS).contains(&value) {
        Ok(value)
    } else {
        Err(ParameterError::MaxFrameSkipsOutOfRange { value })
    }
}

/// Check a yield threshold.
///
/// # Errors
///
/// Returns [`ParameterError::NoDelaysPerYieldOutOfRange`] outside `[1, 200]`.
pub fn validate_no_delays_per_yield(value: u32) -> Result<u32, ParameterError> {
    if (MIN_NO_DELAYS_PER_YIELD..=MAX_NO_DELAYS_PER_YIELD).contains(&value) {
        Ok(value)
    } else {
        Err(ParameterError::NoDelaysPerYieldOutOfRange { value })
    }
}

/// Scheduler run state. Pause is orthogonal to stop/run: a paused clock
/// keeps its thread alive but advances no time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// No clock thread is running.
    Stopped,
    /// The clock thread is delivering pulses.
    Running,
    /// The clock thread is alive but time is frozen.
    Paused,
}

/// Shared clock control state.
///
/// Held in an [`Arc`](std::sync::Arc) by the master clock, the clock
/// thread, and any collaborator (such as the autosave timer) that needs
/// to queue requests.
#[derive(Debug)]
pub struct ClockControl {
    /// Whether the clock thread should keep looping.
    running: AtomicBool,

    /// Whether time is frozen.
    paused: AtomicBool,

    /// Current time ratio as `f64` bits.
    time_ratio_bits: AtomicU64,

    /// Time ratio chosen at construction.
    default_time_ratio: f64,

    /// Target period between pulses in milliseconds.
    time_between_updates_ms: AtomicU64,

    /// Cap on catch-up frames per cycle.
    max_frame_skips: AtomicU32,

    /// Consecutive overruns before yielding the processor.
    no_delays_per_yield: AtomicU32,

    /// Save requested for the next cycle.
    save_request: Mutex<Option<SaveRequest>>,

    /// A save is executing right now.
    save_in_progress: AtomicBool,

    /// Exit requested for the next cycle.
    exit_requested: AtomicBool,

    /// Wakes the clock thread out of its sleep.
    wake: Notify,
}

impl ClockControl {
    /// Create control state from already-validated parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError`] if any parameter is out of range.
    pub fn new(
        time_ratio: f64,
        time_between_updates_ms: u64,
        max_frame_skips: u32,
        no_delays_per_yield: u32,
    ) -> Result<Self, ParameterError> {
        let time_ratio = validate_time_ratio(time_ratio)?;
        Ok(Self {
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            time_ratio_bits: AtomicU64::new(time_ratio.to_bits()),
            default_time_ratio: time_ratio,
            time_between_updates_ms: AtomicU64::new(validate_time_between_updates(
                time_between_updates_ms,
            )?),
            max_frame_skips: AtomicU32::new(validate_max_frame_skips(max_frame_skips)?),
            no_delays_per_yield: AtomicU32::new(validate_no_delays_per_yield(
                no_delays_per_yield,
            )?),
            save_request: Mutex::new(None),
            save_in_progress: AtomicBool::new(false),
            exit_requested: AtomicBool::new(false),
            wake: Notify::new(),
        })
    }

    // -----------------------------------------------------------------------
    // Run / Stop
    // -----------------------------------------------------------------------

    /// Whether the clock thread should keep looping.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Mark the loop as running. Returns `false` if it already was.
    pub(crate) fn mark_running(&self) -> bool {
        !self.running.swap(true, Ordering::AcqRel)
    }

    /// Ask the loop to exit after its current cycle and cut short any
    /// sleep in progress.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.wake.notify_waiters();
    }

    /// Resolves on the next [`stop`](Self::stop). Only futures created
    /// before the stop are woken and no permit is kept, so enable the
    /// future, then re-check [`is_running`](Self::is_running) before
    /// waiting on it.
    pub(crate) fn woken(&self) -> Notified<'_> {
        self.wake.notified()
    }

    /// Current run state.
    pub fn run_state(&self) -> RunState {
        if !self.is_running() {
            RunState::Stopped
        } else if self.is_paused() {
            RunState::Paused
        } else {
            RunState::Running
        }
    }

    // -----------------------------------------------------------------------
    // Pause / Resume
    // -----------------------------------------------------------------------

    /// Whether time is frozen.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Set the pause flag. Returns `true` only when the value changed.
    pub fn set_paused(&self, paused: bool) -> bool {
        self.paused.swap(paused, Ordering::AcqRel) != paused
    }

    // -----------------------------------------------------------------------
    // Time Ratio & Frame Budget
    // -----------------------------------------------------------------------

    /// Current time ratio.
    pub fn time_ratio(&self) -> f64 {
        f64::from_bits(self.time_ratio_bits.load(Ordering::Acquire))
    }

    /// Time ratio chosen at construction.
    pub const fn default_time_ratio(&self) -> f64 {
        self.default_time_ratio
    }

    /// Set the time ratio, rounded to two decimals. Takes effect on the
    /// next cycle. Returns the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError::TimeRatioOutOfRange`] outside `[16, 4096]`.
    pub fn set_time_ratio(&self, ratio: f64) -> Result<f64, ParameterError> {
        let ratio = validate_time_ratio(ratio)?;
        let prev = self.time_ratio_bits.swap(ratio.to_bits(), Ordering::AcqRel);
        Ok(f64::from_bits(prev))
    }

    /// Target period between pulses in milliseconds.
    pub fn time_between_updates_ms(&self) -> u64 {
        self.time_between_updates_ms.load(Ordering::Acquire)
    }

    /// Set the target period. Returns the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError::TimeBetweenUpdatesOutOfRange`] outside `[1, 10800]`.
    pub fn set_time_between_updates_ms(&self, ms: u64) -> Result<u64, ParameterError> {
        let ms = validate_time_between_updates(ms)?;
        Ok(self.time_between_updates_ms.swap(ms, Ordering::AcqRel))
    }

    /// Cap on catch-up frames per cycle.
    pub fn max_frame_skips(&self) -> u32 {
        self.max_frame_skips.load(Ordering::Acquire)
    }

    /// Set the frame-skip cap. Returns the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError::MaxFrameSkipsOutOfRange`] outside `[1, 200]`.
    pub fn set_max_frame_skips(&self, value: u32) -> Result<u32, ParameterError> {
        let value = validate_max_frame_skips(value)?;
        Ok(self.max_frame_skips.swap(value, Ordering::AcqRel))
    }

    /// Consecutive overruns before the clock thread yields.
    pub fn no_delays_per_yield(&self) -> u32 {
        self.no_delays_per_yield.load(Ordering::Acquire)
    }

    /// Set the yield threshold. Returns the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError::NoDelaysPerYieldOutOfRange`] outside `[1, 200]`.
    pub fn set_no_delays_per_yield(&self, value: u32) -> Result<u32, ParameterError> {
        let value = validate_no_delays_per_yield(value)?;
        Ok(self.no_delays_per_yield.swap(value, Ordering::AcqRel))
    }

    /// Snapshot of the frame budget for one cycle.
    pub fn frame_budget(&self) -> FrameBudget {
        FrameBudget {
            period: Duration::from_millis(self.time_between_updates_ms()),
            max_frame_skips: self.max_frame_skips(),
            no_delays_per_yield: self.no_delays_per_yield(),
        }
    }

    // -----------------------------------------------------------------------
    // Save / Exit Requests
    // -----------------------------------------------------------------------

    /// Queue a save for the next cycle. A newer request replaces an older
    /// one that has not run yet.
    pub fn request_save(&self, mode: SaveMode, destination: Option<PathBuf>) {
        let mut guard = self
            .save_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Some(SaveRequest { mode, destination });
    }

    /// Take the pending save request, if any.
    pub(crate) fn take_save_request(&self) -> Option<SaveRequest> {
        self.save_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub(crate) fn set_save_in_progress(&self, in_progress: bool) {
        self.save_in_progress.store(in_progress, Ordering::Release);
    }

    /// Whether a save is pending or running.
    pub fn is_saving(&self) -> bool {
        self.save_in_progress.load(Ordering::Acquire)
            || self
                .save_request
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some()
    }

    /// Ask the clock thread to end the simulation at its next cycle.
    pub fn request_exit(&self) {
        self.exit_requested.store(true, Ordering::Release);
    }

    /// Whether an exit has been requested.
    pub fn is_exit_requested(&self) -> bool {
        self.exit_requested.load(Ordering::Acquire)
    }
}
