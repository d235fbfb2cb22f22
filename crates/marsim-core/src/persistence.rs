//! Save and autosave collaborators of the master clock.
//!
//! The clock does not own a file format. When a save is requested it
//! calls the injected [`SimulationPersistence`] from the clock thread at
//! the start of a cycle, before that cycle's pulse, so the snapshot never
//! interleaves with a half-applied pulse. A failed save is logged and the
//! simulation keeps running.
//!
//! [`AutosaveControl`] is the paired collaborator that is suspended while
//! the clock is paused and stopped on exit. [`AutosaveTimer`] is the
//! stock implementation: a clock listener that counts real elapsed time
//! and queues an autosave every interval.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::control::ClockControl;
use crate::listener::{ClockListener, ClockPulse, ListenerError};
use crate::master::ClockSnapshot;

/// Kind of save being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SaveMode {
    /// Save to the default location.
    Default,
    /// Save to a caller-chosen destination.
    SaveAs,
    /// Periodic save issued by the autosave timer.
    Autosave,
}

/// A pending save, consumed by the clock thread on its next cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRequest {
    /// Kind of save.
    pub mode: SaveMode,
    /// Destination, or `None` for the default location.
    pub destination: Option<PathBuf>,
}

impl SaveRequest {
    /// Destination as a path reference.
    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }
}

/// Errors reported by a persistence collaborator.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Writing the save failed.
    #[error("failed to write save to {path}: {source}")]
    Io {
        /// Destination that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The simulation state could not be serialized.
    #[error("failed to serialize simulation state: {source}")]
    Serialize {
        /// The underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// The collaborator refused the request.
    #[error("save rejected: {reason}")]
    Rejected {
        /// Why the save was refused.
        reason: String,
    },
}

/// External persistence layer invoked by the clock thread.
pub trait SimulationPersistence: Send + Sync {
    /// Serialize the full simulation state synchronously.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the state could not be saved.
    fn save(&self, request: &SaveRequest, clock: &ClockSnapshot) -> Result<(), PersistenceError>;
}

/// Persistence that refuses every save. Used when no save layer is wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPersistence;

impl SimulationPersistence for NoPersistence {
    fn save(&self, request: &SaveRequest, _clock: &ClockSnapshot) -> Result<(), PersistenceError> {
        Err(PersistenceError::Rejected {
            reason: format!("no persistence layer configured for {:?} save", request.mode),
        })
    }
}

/// Autosave collaborator paired with the clock's pause state.
pub trait AutosaveControl: Send + Sync {
    /// Stop counting toward the next autosave.
    fn suspend(&self);
    /// Resume counting toward the next autosave.
    fn resume(&self);
    /// Stop permanently (simulation exit).
    fn stop(&self);
}

/// Listener that queues an autosave every `interval_ms` of real time.
#[derive(Debug)]
pub struct AutosaveTimer {
    control: Arc<ClockControl>,
    interval_ms: u64,
    accumulated_ms: AtomicU64,
    suspended: AtomicBool,
    stopped: AtomicBool,
    saves_requested: AtomicU64,
}

impl AutosaveTimer {
    /// Create a timer that queues saves on `control`.
    pub const fn new(control: Arc<ClockControl>, interval_ms: u64) -> Self {
        Self {
            control,
            interval_ms,
            accumulated_ms: AtomicU64::new(0),
            suspended: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            saves_requested: AtomicU64::new(0),
        }
    }

    /// Real milliseconds between autosaves.
    pub const fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Real milliseconds counted toward the next autosave.
    pub fn accumulated_ms(&self) -> u64 {
        self.accumulated_ms.load(Ordering::Acquire)
    }

    /// Number of autosaves queued so far.
    pub fn saves_requested(&self) -> u64 {
        self.saves_requested.load(Ordering::Acquire)
    }

    /// Whether counting is suspended.
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    /// Whether the timer has been stopped for good.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl ClockListener for AutosaveTimer {
    fn name(&self) -> &str {
        "autosave-timer"
    }

    fn clock_pulse(&self, pulse: &ClockPulse) -> Result<(), ListenerError> {
        if self.is_suspended() || self.is_stopped() || self.interval_ms == 0 {
            return Ok(());
        }

        let interval = self.interval_ms;
        let previous = self
            .accumulated_ms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |acc| {
                let next = acc.saturating_add(pulse.real_elapsed_ms);
                Some(if next >= interval { 0 } else { next })
            })
            .unwrap_or_else(|acc| acc);
        let due = previous.saturating_add(pulse.real_elapsed_ms) >= interval;

        if due {
            let count = self.saves_requested.fetch_add(1, Ordering::AcqRel).saturating_add(1);
            info!(pulse = pulse.id, count, "Autosave due, queueing save");
            self.control.request_save(SaveMode::Autosave, None);
        }
        Ok(())
    }
}

impl AutosaveControl for AutosaveTimer {
    fn suspend(&self) {
        self.suspended.store(true, Ordering::Release);
        debug!("Autosave timer suspended");
    }

    fn resume(&self) {
        self.suspended.store(false, Ordering::Release);
        debug!("Autosave timer resumed");
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        info!(saves_requested = self.saves_requested(), "Autosave timer stopped");
    }
}
