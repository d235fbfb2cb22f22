//! Martian calendar time.
//!
//! A [`MarsTime`] names an instant on the colony calendar as
//! `orbit-Month-sol:millisol`, e.g. `15-Adir-01:000.000`. The calendar
//! has 24 months per orbit. Every sixth month is 27 sols long and the
//! rest are 28, except that the last month of a leap orbit also has 28
//! sols. An orbit is a leap orbit when it is odd or divisible by ten,
//! giving 668 or 669 sols per orbit.
//!
//! Time advances in millisols (thousandths of a sol). Millisol overflow
//! rolls the sol, sol overflow rolls the month, and month overflow rolls
//! the orbit; the rollover is a pure function of the millisol count so
//! two clocks advanced by the same deltas always agree.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::clock::ClockError;

/// Real seconds in one millisol.
pub const SECONDS_PER_MILLISOL: f64 = 88.775_244;

/// Millisols in one sol.
pub const MILLISOLS_PER_SOL: f64 = 1000.0;

/// Months in one orbit.
pub const MONTHS_PER_ORBIT: u8 = 24;

/// Sols in a regular (non-leap) orbit.
pub const SOLS_PER_ORBIT: u32 = 668;

/// Month names, in calendar order.
pub const MONTH_NAMES: [&str; 24] = [
    "Adir", "Bora", "Coan", "Deti", "Edal", "Flo", "Geor", "Heliba", "Idanon", "Jowani",
    "Kireal", "Larno", "Medior", "Neturima", "Ozulikan", "Pasurabi", "Rudiakel", "Safundo",
    "Tiunor", "Ulasja", "Vadeun", "Wakumi", "Xetual", "Zungo",
];

/// Convert real (or simulated) seconds to millisols.
pub fn seconds_to_millisols(seconds: f64) -> f64 {
    seconds / SECONDS_PER_MILLISOL
}

/// Convert millisols to seconds.
pub fn millisols_to_seconds(millisols: f64) -> f64 {
    millisols * SECONDS_PER_MILLISOL
}

/// Whether the given orbit carries the extra sol in its last month.
pub const fn is_leap_orbit(orbit: u32) -> bool {
    orbit % 2 == 1 || orbit % 10 == 0
}

/// Number of sols in `month` (1-based) of `orbit`.
pub const fn sols_in_month(month: u8, orbit: u32) -> u8 {
    if month % 6 != 0 {
        28
    } else if month == MONTHS_PER_ORBIT && is_leap_orbit(orbit) {
        28
    } else {
        27
    }
}

/// Number of sols in `orbit`.
pub const fn sols_in_orbit(orbit: u32) -> u32 {
    if is_leap_orbit(orbit) {
        SOLS_PER_ORBIT.saturating_add(1)
    } else {
        SOLS_PER_ORBIT
    }
}

/// An instant on the Martian calendar.
///
/// Ordering follows the calendar: orbit, then month, then sol, then
/// millisol.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct MarsTime {
    /// Orbit number (Martian year).
    orbit: u32,
    /// Month within the orbit, 1..=24.
    month: u8,
    /// Sol within the month, 1..=28.
    sol: u8,
    /// Millisol within the sol, `0.0..1000.0`.
    millisol: f64,
}

impl MarsTime {
    /// Build a calendar instant from its parts.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidDateTime`] if the month, sol, or
    /// millisol lies outside the calendar.
    pub fn new(orbit: u32, month: u8, sol: u8, millisol: f64) -> Result<Self, ClockError> {
        let invalid = |reason: String| ClockError::InvalidDateTime {
            calendar: "mars",
            input: format!("{orbit}-{month}-{sol}:{millisol}"),
            reason,
        };

        if month == 0 || month > MONTHS_PER_ORBIT {
            return Err(invalid(format!("month {month} outside 1..={MONTHS_PER_ORBIT}")));
        }
        let month_length = sols_in_month(month, orbit);
        if sol == 0 || sol > month_length {
            return Err(invalid(format!("sol {sol} outside 1..={month_length}")));
        }
        if !(0.0..MILLISOLS_PER_SOL).contains(&millisol) {
            return Err(invalid(format!("millisol {millisol} outside 0..1000")));
        }

        Ok(Self {
            orbit,
            month,
            sol,
            millisol,
        })
    }

    /// Parse `orbit-Month-sol:millisol`. The month may be given by name
    /// (case-insensitive) or by number.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidDateTime`] if the text is malformed.
    pub fn parse(input: &str) -> Result<Self, ClockError> {
        let invalid = |reason: &str| ClockError::InvalidDateTime {
            calendar: "mars",
            input: input.to_owned(),
            reason: reason.to_owned(),
        };

        let trimmed = input.trim();
        let (date, millisol) = trimmed
            .split_once(':')
            .ok_or_else(|| invalid("expected `orbit-Month-sol:millisol`"))?;

        let mut parts = date.split('-');
        let (Some(orbit), Some(month), Some(sol), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid("expected three `-` separated date fields"));
        };

        let orbit: u32 = orbit
            .trim()
            .parse()
            .map_err(|_err| invalid("orbit is not a number"))?;
        let month = parse_month(month.trim()).ok_or_else(|| invalid("unknown month"))?;
        let sol: u8 = sol
            .trim()
            .parse()
            .map_err(|_err| invalid("sol is not a number"))?;
        let millisol: f64 = millisol
            .trim()
            .parse()
            .map_err(|_err| invalid("millisol is not a number"))?;

        Self::new(orbit, month, sol, millisol)
    }

    /// Orbit number.
    pub const fn orbit(&self) -> u32 {
        self.orbit
    }

    /// Month within the orbit, 1-based.
    pub const fn month(&self) -> u8 {
        self.month
    }

    /// Name of the current month.
    pub fn month_name(&self) -> &'static str {
        MONTH_NAMES
            .get(usize::from(self.month.saturating_sub(1)))
            .copied()
            .unwrap_or("Unknown")
    }

    /// Sol within the month, 1-based.
    pub const fn sol(&self) -> u8 {
        self.sol
    }

    /// Millisol within the current sol.
    pub const fn millisol(&self) -> f64 {
        self.millisol
    }

    /// Sol within the orbit, 1-based.
    pub fn sol_of_orbit(&self) -> u32 {
        let before: u32 = (1..self.month)
            .map(|m| u32::from(sols_in_month(m, self.orbit)))
            .sum();
        before.saturating_add(u32::from(self.sol))
    }

    /// Total millisols from the calendar epoch (orbit 0, Adir 1, 000.000).
    pub fn total_millisols(&self) -> f64 {
        let sols = sols_before_orbit(self.orbit)
            .saturating_add(u64::from(self.sol_of_orbit().saturating_sub(1)));
        #[allow(clippy::cast_precision_loss)]
        let whole = sols as f64 * MILLISOLS_PER_SOL;
        whole + self.millisol
    }

    /// Millisols elapsed since `earlier`. Negative if `earlier` is later.
    pub fn millisols_since(&self, earlier: &Self) -> f64 {
        self.total_millisols() - earlier.total_millisols()
    }

    /// Advance by `delta` millisols, rolling sols, months, and orbits.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::NegativeDelta`] if `delta` is negative or not
    /// finite, and [`ClockError::OrbitOverflow`] past `u32::MAX` orbits.
    pub fn add_millisols(&mut self, delta: f64) -> Result<(), ClockError> {
        if !delta.is_finite() || delta < 0.0 {
            return Err(ClockError::NegativeDelta { delta });
        }

        let total = self.millisol + delta;
        let whole_sols = (total / MILLISOLS_PER_SOL).floor();
        let millisol = total - whole_sols * MILLISOLS_PER_SOL;

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let sols = if whole_sols >= u64::MAX as f64 {
            return Err(ClockError::OrbitOverflow);
        } else {
            whole_sols as u64
        };

        let mut next = *self;
        next.advance_sols(sols)?;
        // Guard against 999.9999... rounding up to a full sol.
        next.millisol = millisol.clamp(0.0, MILLISOLS_PER_SOL - f64::EPSILON * MILLISOLS_PER_SOL);
        *self = next;
        Ok(())
    }

    fn advance_sols(&mut self, mut remaining: u64) -> Result<(), ClockError> {
        while remaining > 0 {
            let month_length = sols_in_month(self.month, self.orbit);
            let left_in_month = u64::from(month_length.saturating_sub(self.sol)).saturating_add(1);

            if remaining < left_in_month {
                let step = u8::try_from(remaining).map_err(|_err| ClockError::OrbitOverflow)?;
                self.sol = self.sol.saturating_add(step);
                return Ok(());
            }

            remaining = remaining.saturating_sub(left_in_month);
            self.sol = 1;
            if self.month >= MONTHS_PER_ORBIT {
                self.month = 1;
                self.orbit = self.orbit.checked_add(1).ok_or(ClockError::OrbitOverflow)?;
            } else {
                self.month = self.month.saturating_add(1);
            }
        }
        Ok(())
    }
}

impl fmt::Display for MarsTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}-{}-{:02}:{:07.3}",
            self.orbit,
            self.month_name(),
            self.sol,
            self.millisol
        )
    }
}

impl FromStr for MarsTime {
    type Err = ClockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_month(text: &str) -> Option<u8> {
    if let Ok(number) = text.parse::<u8>() {
        return (1..=MONTHS_PER_ORBIT).contains(&number).then_some(number);
    }
    MONTH_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(text))
        .and_then(|idx| u8::try_from(idx).ok())
        .map(|idx| idx.saturating_add(1))
}

/// Sols in all orbits before `orbit`, in closed form.
fn sols_before_orbit(orbit: u32) -> u64 {
    let n = u64::from(orbit);
    // Leap orbits in [0, n): the odd ones plus the multiples of ten.
    let odd = n / 2;
    let tens = n.saturating_add(9) / 10;
    n.saturating_mul(u64::from(SOLS_PER_ORBIT))
        .saturating_add(odd)
        .saturating_add(tens)
}
