//! Listener that reports the clock to the log.
//!
//! Registered by the engine so a headless run still shows simulated time
//! moving: every `report_every` pulses it logs both calendars and the
//! pulse rate, and it logs every pause edge.

use std::sync::atomic::{AtomicU64, Ordering};

use marsim_core::{ClockListener, ClockPulse, ListenerError};
use tracing::{info, trace};

/// Logs clock progress every N pulses.
#[derive(Debug)]
pub struct PulseLogger {
    report_every: u64,
    seen: AtomicU64,
    millisols_since_report: AtomicU64,
}

impl PulseLogger {
    /// Report every `report_every` pulses (zero disables reports).
    pub const fn new(report_every: u64) -> Self {
        Self {
            report_every,
            seen: AtomicU64::new(0),
            millisols_since_report: AtomicU64::new(0),
        }
    }

    /// Pulses observed so far.
    pub fn seen(&self) -> u64 {
        self.seen.load(Ordering::Acquire)
    }

    fn add_millisols(&self, millisols: f64) -> f64 {
        let previous = self
            .millisols_since_report
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some((f64::from_bits(bits) + millisols).to_bits())
            })
            .unwrap_or_else(|bits| bits);
        f64::from_bits(previous) + millisols
    }
}

impl ClockListener for PulseLogger {
    fn name(&self) -> &str {
        "pulse-logger"
    }

    fn clock_pulse(&self, pulse: &ClockPulse) -> Result<(), ListenerError> {
        let seen = self.seen.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        let millisols = self.add_millisols(pulse.elapsed_millisols);
        trace!(pulse = pulse.id, elapsed_millisols = pulse.elapsed_millisols, "Pulse observed");

        if seen.checked_rem(self.report_every) == Some(0) {
            self.millisols_since_report
                .store(0.0_f64.to_bits(), Ordering::Release);
            info!(
                pulse = pulse.id,
                mars_time = %pulse.mars_time,
                earth_time = %pulse.earth_time.timestamp(),
                time_ratio = pulse.time_ratio,
                millisols_since_report = millisols,
                "Clock report"
            );
        }
        Ok(())
    }

    fn pause_change(&self, paused: bool) {
        info!(paused, pulses_seen = self.seen(), "Simulation pause changed");
    }
}
