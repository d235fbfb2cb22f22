//! Master clock, pulse scheduler, and listener dispatch for the Marsim
//! colony simulation.
//!
//! This crate turns wall-clock time into variable-length pulses of
//! simulated time and fans each pulse out to every subsystem of the
//! colony. It supports pause and resume, runtime changes to the time
//! ratio and frame budget, bounded catch-up under load, and save/exit
//! requests serviced at a safe point of the clock cycle.
//!
//! # Modules
//!
//! - [`mars_time`] -- Martian calendar (orbit, month, sol, millisol).
//! - [`earth_time`] -- Earth Universal Time kept in step with Mars.
//! - [`clock`] -- [`DualClock`] advancing both calendars together.
//! - [`uptimer`] -- Real elapsed time behind a [`TimeSource`] port.
//! - [`cadence`] -- Pure frame-timing policy (sleep, yield, catch-up).
//! - [`control`] -- Atomic control state and parameter validation.
//! - [`listener`] -- [`ClockListener`] trait and the copy-on-write registry.
//! - [`executor`] -- Bounded [`WorkerPool`] and [`InlineExecutor`].
//! - [`persistence`] -- Save and autosave collaborators.
//! - [`master`] -- [`MasterClock`], the owner of simulated time.
//! - [`clock_thread`] -- The dedicated `marsim-clock` thread.
//! - [`config`] -- Configuration loading from `marsim-config.yaml`.

pub mod cadence;
pub mod clock;
pub mod clock_thread;
pub mod config;
pub mod control;
pub mod earth_time;
pub mod executor;
pub mod listener;
pub mod mars_time;
pub mod master;
pub mod persistence;
pub mod uptimer;

pub use clock::{ClockError, DualClock};
pub use control::{ClockControl, ParameterError, RunState};
pub use earth_time::EarthTime;
pub use executor::{InlineExecutor, TaskExecutor, WorkerPool};
pub use listener::{ClockListener, ClockPulse, ListenerError};
pub use mars_time::MarsTime;
pub use master::{ClockExit, ClockSnapshot, CycleOutcome, MasterClock, MasterClockError};
pub use persistence::{
    AutosaveControl, AutosaveTimer, PersistenceError, SaveMode, SaveRequest,
    SimulationPersistence,
};
pub use uptimer::{ManualTimeSource, SystemTimeSource, TimeSource, UpTimer};
