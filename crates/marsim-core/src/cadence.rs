//! Frame cadence policy for the clock thread.
//!
//! The clock thread aims for one pulse per period. This module holds the
//! arithmetic that decides, each cycle, how long to sleep, when an
//! overrun should yield the processor, and how many lost frames to make
//! up. It performs no I/O and never sleeps, so every branch is testable
//! without a running thread.
//!
//! Per cycle:
//!
//! 1. `sleep = period - spent - over_sleep`.
//! 2. If `sleep > 0` the thread sleeps, then reports the actual duration
//!    so the overshoot is subtracted from the next cycle.
//! 3. Otherwise the shortfall accumulates in `excess`, and every
//!    `no_delays_per_yield` consecutive overruns the thread yields once.
//! 4. While `excess` exceeds a period and fewer than `max_frame_skips`
//!    extra frames have run, one more pulse is delivered without sleeping.
//! 5. `excess` is cleared after the catch-up pass, so a long stall (a
//!    blocking save, a laptop lid) never turns into a catch-up storm.

use std::time::Duration;

/// Consecutive overrunning cycles before the overrun is reported.
pub const PERSISTENT_OVERRUN_CYCLES: u64 = 50;

/// Timing parameters for one cycle, read from the control state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBudget {
    /// Target period between pulses.
    pub period: Duration,
    /// Cap on catch-up frames per cycle.
    pub max_frame_skips: u32,
    /// Consecutive overruns before yielding.
    pub no_delays_per_yield: u32,
}

/// What the clock thread should do after a cycle's work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepPlan {
    /// Sleep for the given duration.
    Sleep(Duration),
    /// The cycle ran past its period; do not sleep.
    Overrun {
        /// Yield the processor once before continuing.
        yield_now: bool,
        /// Consecutive overrunning cycles, this one included.
        streak: u64,
    },
}

/// Carried timing state of the clock loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cadence {
    /// Nanoseconds the previous sleep overshot (negative if it woke early).
    over_sleep_ns: i128,
    /// Accumulated overrun in nanoseconds.
    excess_ns: u128,
    /// Overruns since the last yield.
    no_delays: u32,
    /// Consecutive overrunning cycles.
    overrun_streak: u64,
}

impl Cadence {
    /// Fresh cadence with no carried correction.
    pub const fn new() -> Self {
        Self {
            over_sleep_ns: 0,
            excess_ns: 0,
            no_delays: 0,
            overrun_streak: 0,
        }
    }

    /// Decide how to finish a cycle that has already spent `spent`.
    pub fn plan(&mut self, budget: &FrameBudget, spent: Duration) -> SleepPlan {
        let period = i128::try_from(budget.period.as_nanos()).unwrap_or(i128::MAX);
        let spent = i128::try_from(spent.as_nanos()).unwrap_or(i128::MAX);
        let sleep_ns = period
            .saturating_sub(spent)
            .saturating_sub(self.over_sleep_ns);

        if sleep_ns > 0 {
            let nanos = u64::try_from(sleep_ns).unwrap_or(u64::MAX);
            return SleepPlan::Sleep(Duration::from_nanos(nanos));
        }

        let shortfall = u128::try_from(sleep_ns.saturating_neg()).unwrap_or(0);
        self.excess_ns = self.excess_ns.saturating_add(shortfall);
        self.over_sleep_ns = 0;
        self.overrun_streak = self.overrun_streak.saturating_add(1);
        self.no_delays = self.no_delays.saturating_add(1);

        let yield_now = self.no_delays >= budget.no_delays_per_yield;
        if yield_now {
            self.no_delays = 0;
        }

        SleepPlan::Overrun {
            yield_now,
            streak: self.overrun_streak,
        }
    }

    /// Record how long a planned sleep actually took.
    pub fn record_sleep(&mut self, requested: Duration, actual: Duration) {
        let requested = i128::try_from(requested.as_nanos()).unwrap_or(i128::MAX);
        let actual = i128::try_from(actual.as_nanos()).unwrap_or(i128::MAX);
        self.over_sleep_ns = actual.saturating_sub(requested);
        self.overrun_streak = 0;
    }

    /// Number of lost frames to make up this cycle. Clears the excess.
    pub fn catch_up_frames(&mut self, budget: &FrameBudget) -> u32 {
        let period = budget.period.as_nanos();
        let mut skips = 0;
        while self.excess_ns > period && skips < budget.max_frame_skips {
            self.excess_ns = self.excess_ns.saturating_sub(period);
            skips = skips.saturating_add(1);
        }
        self.excess_ns = 0;
        skips
    }

    /// Accumulated overrun not yet made up.
    pub fn excess(&self) -> Duration {
        Duration::from_nanos(u64::try_from(self.excess_ns).unwrap_or(u64::MAX))
    }

    /// Whether the current overrun streak has lasted long enough to report.
    pub const fn is_persistent_overrun(streak: u64) -> bool {
        streak > 0 && streak % PERSISTENT_OVERRUN_CYCLES == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const fn budget(period_ms: u64, max_frame_skips: u32, no_delays_per_yield: u32) -> FrameBudget {
        FrameBudget {
            period: Duration::from_millis(period_ms),
            max_frame_skips,
            no_delays_per_yield,
        }
    }

    #[test]
    fn sleeps_for_the_remainder_of_the_period() {
        let mut cadence = Cadence::new();
        let plan = cadence.plan(&budget(40, 10, 16), Duration::from_millis(15));
        assert_eq!(plan, SleepPlan::Sleep(Duration::from_millis(25)));
    }

    #[test]
    fn oversleep_shortens_next_sleep() {
        let b = budget(40, 10, 16);
        let mut cadence = Cadence::new();
        cadence.record_sleep(Duration::from_millis(25), Duration::from_millis(27));
        let plan = cadence.plan(&b, Duration::from_millis(10));
        assert_eq!(plan, SleepPlan::Sleep(Duration::from_millis(28)));
    }

    #[test]
    fn early_wake_lengthens_next_sleep() {
        let b = budget(40, 10, 16);
        let mut cadence = Cadence::new();
        cadence.record_sleep(Duration::from_millis(25), Duration::from_millis(5));
        let plan = cadence.plan(&b, Duration::from_millis(10));
        assert_eq!(plan, SleepPlan::Sleep(Duration::from_millis(50)));
    }

    #[test]
    fn overrun_accumulates_excess_and_clears_oversleep() {
        let b = budget(40, 10, 16);
        let mut cadence = Cadence::new();
        cadence.record_sleep(Duration::from_millis(10), Duration::from_millis(12));
        let plan = cadence.plan(&b, Duration::from_millis(100));
        assert_eq!(
            plan,
            SleepPlan::Overrun {
                yield_now: false,
                streak: 1
            }
        );
        assert_eq!(cadence.excess(), Duration::from_millis(62));
        // Oversleep was consumed by the overrun.
        assert_eq!(
            cadence.plan(&b, Duration::from_millis(0)),
            SleepPlan::Sleep(Duration::from_millis(40))
        );
    }

    #[test]
    fn yields_every_n_overruns() {
        let b = budget(10, 10, 3);
        let mut cadence = Cadence::new();
        let yields: Vec<bool> = (0..7)
            .map(|_| match cadence.plan(&b, Duration::from_millis(20)) {
                SleepPlan::Overrun { yield_now, .. } => yield_now,
                SleepPlan::Sleep(_) => false,
            })
            .collect();
        assert_eq!(yields, vec![false, false, true, false, false, true, false]);
    }

    #[test]
    fn catch_up_is_capped_by_max_frame_skips() {
        let b = budget(40, 10, 16);
        let mut cadence = Cadence::new();
        // A stall of 50 periods.
        let plan = cadence.plan(&b, Duration::from_millis(40 * 50));
        assert!(matches!(plan, SleepPlan::Overrun { .. }));
        assert_eq!(cadence.catch_up_frames(&b), 10);
        assert_eq!(cadence.excess(), Duration::ZERO);
        assert_eq!(cadence.catch_up_frames(&b), 0);
    }

    #[test]
    fn short_stall_catches_up_fully() {
        let b = budget(40, 10, 16);
        let mut cadence = Cadence::new();
        // 4 periods spent: excess is 3 periods, of which 2 are strictly
        // above one period's worth.
        let _ = cadence.plan(&b, Duration::from_millis(160));
        assert_eq!(cadence.catch_up_frames(&b), 2);
    }

    #[test]
    fn sleep_resets_overrun_streak() {
        let b = budget(10, 10, 16);
        let mut cadence = Cadence::new();
        let _ = cadence.plan(&b, Duration::from_millis(20));
        let _ = cadence.plan(&b, Duration::from_millis(20));
        cadence.record_sleep(Duration::from_millis(5), Duration::from_millis(5));
        let plan = cadence.plan(&b, Duration::from_millis(20));
        assert_eq!(
            plan,
            SleepPlan::Overrun {
                yield_now: false,
                streak: 1
            }
        );
    }

    #[test]
    fn persistent_overrun_reported_periodically() {
        assert!(!Cadence::is_persistent_overrun(0));
        assert!(!Cadence::is_persistent_overrun(1));
        assert!(Cadence::is_persistent_overrun(PERSISTENT_OVERRUN_CYCLES));
        assert!(Cadence::is_persistent_overrun(PERSISTENT_OVERRUN_CYCLES * 2));
    }
}
