//! Earth calendar clock kept in step with the Martian clock.
//!
//! The Earth clock tracks Universal Time. It advances by the same pulse
//! as the Mars clock, but in real-equivalent seconds rather than
//! millisols. Sub-microsecond remainders are carried between pulses so
//! that thousands of small pulses add up to the same instant as one
//! large one.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::ClockError;

/// Accepted start date-time layouts, tried in order.
const INPUT_FORMATS: [&str; 2] = ["%m/%d/%Y %H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Immutable snapshot of the Earth clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EarthTime(DateTime<Utc>);

impl EarthTime {
    /// Wrap a UTC date-time.
    pub const fn new(at: DateTime<Utc>) -> Self {
        Self(at)
    }

    /// Parse `MM/dd/yyyy HH:mm:ss` or `yyyy-MM-dd HH:mm:ss` as UTC.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidDateTime`] if neither layout matches.
    pub fn parse(input: &str) -> Result<Self, ClockError> {
        let trimmed = input.trim();
        INPUT_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
            .map(|naive| Self(naive.and_utc()))
            .ok_or_else(|| ClockError::InvalidDateTime {
                calendar: "earth",
                input: input.to_owned(),
                reason: "expected `MM/dd/yyyy HH:mm:ss` or `yyyy-MM-dd HH:mm:ss`".to_owned(),
            })
    }

    /// The underlying UTC date-time.
    pub const fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Timestamp in the form `2043-09-30 00:00:00 UT`.
    pub fn timestamp(&self) -> String {
        self.0.format("%Y-%m-%d %H:%M:%S UT").to_string()
    }

    /// Date in the form `2043-09-30`.
    pub fn date_string(&self) -> String {
        self.0.format("%Y-%m-%d").to_string()
    }

    /// Calendar year.
    pub fn year(&self) -> i32 {
        self.0.year()
    }

    /// Calendar month, 1-based.
    pub fn month(&self) -> u32 {
        self.0.month()
    }

    /// Day of the month, 1-based.
    pub fn day_of_month(&self) -> u32 {
        self.0.day()
    }
}

impl fmt::Display for EarthTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.timestamp())
    }
}

/// Mutable Earth clock.
#[derive(Debug, Clone, PartialEq)]
pub struct EarthClock {
    /// Current instant.
    now: EarthTime,
    /// Fraction of a microsecond not yet applied.
    carry_micros: f64,
}

impl EarthClock {
    /// Create a clock starting at `start`.
    pub const fn new(start: EarthTime) -> Self {
        Self {
            now: start,
            carry_micros: 0.0,
        }
    }

    /// Current time.
    pub const fn now(&self) -> EarthTime {
        self.now
    }

    /// Advance by `seconds` of real-equivalent time.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::NegativeDelta`] for a negative or non-finite
    /// delta and [`ClockError::EarthOverflow`] past the calendar range.
    pub fn add_seconds(&mut self, seconds: f64) -> Result<(), ClockError> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(ClockError::NegativeDelta { delta: seconds });
        }

        let total = seconds.mul_add(1_000_000.0, self.carry_micros);
        let whole = total.floor();

        #[allow(clippy::cast_precision_loss)]
        let limit = i64::MAX as f64;
        if whole >= limit {
            return Err(ClockError::EarthOverflow);
        }
        #[allow(clippy::cast_possible_truncation)]
        let micros = whole as i64;

        let next = self
            .now
            .0
            .checked_add_signed(TimeDelta::microseconds(micros))
            .ok_or(ClockError::EarthOverflow)?;

        self.now = EarthTime(next);
        self.carry_micros = total - whole;
        Ok(())
    }
}
