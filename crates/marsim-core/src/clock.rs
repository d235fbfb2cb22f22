//! Dual calendar clock: simulated Mars time and Earth Universal Time.
//!
//! The [`DualClock`] is the single source of truth for calendar state in
//! the simulation. Both calendars advance from the same pulse; the Mars
//! side in millisols and the Earth side in real-equivalent seconds.
//!
//! # Design Principles
//!
//! - Time never moves backwards. Negative or non-finite deltas are
//!   rejected before either calendar is touched.
//! - Readers get `Copy` snapshots ([`MarsTime`], [`EarthTime`]) and never
//!   hold a reference into clock state.
//! - The initial Mars time is kept for elapsed-time queries.

use crate::earth_time::{EarthClock, EarthTime};
use crate::mars_time::MarsTime;

/// Errors that can occur during clock operations.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// A start date-time string could not be parsed.
    #[error("invalid {calendar} date-time {input:?}: {reason}")]
    InvalidDateTime {
        /// Which calendar the string was meant for (`mars` or `earth`).
        calendar: &'static str,
        /// The offending input.
        input: String,
        /// Explanation of what is wrong with it.
        reason: String,
    },

    /// A pulse tried to move time backwards (or by a non-finite amount).
    #[error("time delta must be finite and non-negative, got {delta}")]
    NegativeDelta {
        /// The rejected delta.
        delta: f64,
    },

    /// The Mars orbit counter would overflow.
    #[error("orbit counter overflow")]
    OrbitOverflow,

    /// The Earth calendar would leave its representable range.
    #[error("earth calendar overflow")]
    EarthOverflow,
}

/// The simulated Mars clock and the Earth clock, advanced together.
#[derive(Debug, Clone, PartialEq)]
pub struct DualClock {
    /// Current Mars time.
    mars: MarsTime,
    /// Mars time at the start of the simulation.
    initial_mars: MarsTime,
    /// Earth calendar.
    earth: EarthClock,
}

impl DualClock {
    /// Create a clock pair from the configured start strings.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidDateTime`] if either string is
    /// unparsable.
    pub fn new(mars_start: &str, earth_start: &str) -> Result<Self, ClockError> {
        let mars = MarsTime::parse(mars_start)?;
        let earth = EarthTime::parse(earth_start)?;
        Ok(Self::from_parts(mars, earth))
    }

    /// Create a clock pair from already-parsed start times.
    pub const fn from_parts(mars: MarsTime, earth: EarthTime) -> Self {
        Self {
            mars,
            initial_mars: mars,
            earth: EarthClock::new(earth),
        }
    }

    /// Advance the Mars calendar by `delta_millisols`.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::NegativeDelta`] if the delta is negative or
    /// not finite; the clock is unchanged in that case.
    pub fn advance_simulated_time(&mut self, delta_millisols: f64) -> Result<(), ClockError> {
        self.mars.add_millisols(delta_millisols)
    }

    /// Advance the Earth calendar by `delta_seconds`.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::NegativeDelta`] if the delta is negative or
    /// not finite.
    pub fn advance_earth_time(&mut self, delta_seconds: f64) -> Result<(), ClockError> {
        self.earth.add_seconds(delta_seconds)
    }

    /// Advance both calendars from one pulse. Both deltas are checked
    /// before either calendar moves.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::NegativeDelta`] if either delta is invalid.
    pub fn advance(&mut self, delta_millisols: f64, delta_seconds: f64) -> Result<(), ClockError> {
        for delta in [delta_millisols, delta_seconds] {
            if !delta.is_finite() || delta < 0.0 {
                return Err(ClockError::NegativeDelta { delta });
            }
        }
        let mut next = self.clone();
        next.advance_earth_time(delta_seconds)?;
        next.advance_simulated_time(delta_millisols)?;
        *self = next;
        Ok(())
    }

    /// Current Mars time.
    pub const fn simulated_time(&self) -> MarsTime {
        self.mars
    }

    /// Mars time at the start of the simulation.
    pub const fn initial_mars_time(&self) -> MarsTime {
        self.initial_mars
    }

    /// Current Earth time.
    pub const fn earth_time(&self) -> EarthTime {
        self.earth.now()
    }

    /// Millisols elapsed on Mars since the simulation started.
    pub fn elapsed_millisols(&self) -> f64 {
        self.mars.millisols_since(&self.initial_mars)
    }
}
