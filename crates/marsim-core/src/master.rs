//! The master clock: owner of simulated time and its control surface.
//!
//! A [`MasterClock`] owns the [`DualClock`], the [`UpTimer`], the listener
//! registry and the shared [`ClockControl`]. It is shared by `Arc` between
//! the clock thread and whoever drives the simulation (a UI, the engine
//! binary, a test); there is no global instance.
//!
//! # Cycle
//!
//! [`MasterClock::status_update`] is one scheduler cycle minus the timing:
//!
//! 1. Run a pending save, if any. This is the safe point: no pulse of this
//!    cycle has been computed yet.
//! 2. End the simulation if an exit was requested.
//! 3. If paused, re-anchor the timer and stop here.
//! 4. Otherwise measure real elapsed time, scale it by the time ratio,
//!    advance both calendars, and hand the pulse to every listener.
//!
//! The clock thread calls it once per period; tests call it directly with
//! a manual time source.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::clock::{ClockError, DualClock};
use crate::control::{ClockControl, ParameterError, RunState};
use crate::earth_time::EarthTime;
use crate::executor::{InlineExecutor, TaskExecutor};
use crate::listener::{ClockListener, ClockPulse, ListenerRegistry, ListenerStats};
use crate::mars_time::{MarsTime, seconds_to_millisols};
use crate::persistence::{
    AutosaveControl, NoPersistence, SaveMode, SaveRequest, SimulationPersistence,
};
use crate::uptimer::{SystemTimeSource, TimeSource, UpTimer};

/// Errors that can occur in master clock operations.
#[derive(Debug, thiserror::Error)]
pub enum MasterClockError {
    /// `start` was called while the clock thread is running.
    #[error("clock thread is already running")]
    AlreadyRunning,

    /// The clock thread could not be spawned.
    #[error("failed to spawn clock thread: {source}")]
    Spawn {
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The calendars rejected a pulse.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },

    /// A control parameter was out of range.
    #[error("parameter error: {source}")]
    Parameter {
        /// The underlying parameter error.
        #[from]
        source: ParameterError,
    },
}

/// How the clock thread ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockExit {
    /// `stop` was called.
    Stopped,
    /// The simulation asked to exit.
    ExitRequested,
    /// The clock thread could not run or panicked.
    Crashed,
}

/// Result of one [`MasterClock::status_update`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    /// A pulse was computed and delivered.
    Pulsed(ClockPulse),
    /// The clock is paused; no time passed.
    Paused,
    /// An exit was processed; the loop must end.
    Exit,
}

/// Serializable view of the clock, handed to persistence and logged on
/// shutdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockSnapshot {
    /// Current Mars time.
    pub mars_time: MarsTime,
    /// Mars time at simulation start.
    pub initial_mars_time: MarsTime,
    /// Current Earth time.
    pub earth_time: EarthTime,
    /// Current time ratio.
    pub time_ratio: f64,
    /// Pulses delivered so far.
    pub total_pulses: u64,
    /// Real milliseconds the simulation has been up, excluding pauses.
    pub uptime_ms: u64,
    /// Scheduler state at the time of the snapshot.
    pub run_state: RunState,
}

/// Builder for [`MasterClock`]. Unset collaborators fall back to an
/// [`InlineExecutor`], [`NoPersistence`], and the system clock.
pub struct MasterClockBuilder {
    clock: DualClock,
    control: Arc<ClockControl>,
    executor: Option<Arc<dyn TaskExecutor>>,
    persistence: Option<Arc<dyn SimulationPersistence>>,
    time_source: Option<Arc<dyn TimeSource>>,
    autosave: Option<Arc<dyn AutosaveControl>>,
}

impl MasterClockBuilder {
    /// Executor that runs listener jobs.
    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Persistence layer invoked for save requests.
    #[must_use]
    pub fn persistence(mut self, persistence: Arc<dyn SimulationPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Source of real elapsed time.
    #[must_use]
    pub fn time_source(mut self, source: Arc<dyn TimeSource>) -> Self {
        self.time_source = Some(source);
        self
    }

    /// Autosave collaborator paired with the pause state.
    #[must_use]
    pub fn autosave(mut self, autosave: Arc<dyn AutosaveControl>) -> Self {
        self.autosave = Some(autosave);
        self
    }

    /// Build the master clock.
    pub fn build(self) -> MasterClock {
        let source = self
            .time_source
            .unwrap_or_else(|| Arc::new(SystemTimeSource::new()));
        MasterClock {
            control: self.control,
            clock: RwLock::new(self.clock),
            uptimer: UpTimer::new(source),
            registry: ListenerRegistry::new(),
            executor: self
                .executor
                .unwrap_or_else(|| Arc::new(InlineExecutor::new())),
            persistence: self.persistence.unwrap_or_else(|| Arc::new(NoPersistence)),
            autosave: RwLock::new(self.autosave),
            total_pulses: AtomicU64::new(0),
            next_pulse_id: AtomicU64::new(1),
            pause_lock: Mutex::new(()),
            thread: Mutex::new(None),
        }
    }
}

/// Owner of simulated time and the scheduler's control surface.
pub struct MasterClock {
    control: Arc<ClockControl>,
    clock: RwLock<DualClock>,
    uptimer: UpTimer,
    registry: ListenerRegistry,
    executor: Arc<dyn TaskExecutor>,
    persistence: Arc<dyn SimulationPersistence>,
    autosave: RwLock<Option<Arc<dyn AutosaveControl>>>,
    total_pulses: AtomicU64,
    next_pulse_id: AtomicU64,
    /// Serializes pause edges so notifications arrive in order.
    pause_lock: Mutex<()>,
    thread: Mutex<Option<JoinHandle<ClockExit>>>,
}

impl std::fmt::Debug for MasterClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterClock")
            .field("mars_time", &self.mars_time())
            .field("earth_time", &self.earth_time())
            .field("run_state", &self.control.run_state())
            .field("total_pulses", &self.total_pulses())
            .field("listeners", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl MasterClock {
    /// Start building a master clock around `clock` and `control`.
    pub const fn builder(clock: DualClock, control: Arc<ClockControl>) -> MasterClockBuilder {
        MasterClockBuilder {
            clock,
            control,
            executor: None,
            persistence: None,
            time_source: None,
            autosave: None,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Shared control state.
    pub const fn control(&self) -> &Arc<ClockControl> {
        &self.control
    }

    /// The listener registry.
    pub const fn listeners(&self) -> &ListenerRegistry {
        &self.registry
    }

    /// The wall-clock timer.
    pub const fn uptimer(&self) -> &UpTimer {
        &self.uptimer
    }

    fn read_clock(&self) -> std::sync::RwLockReadGuard<'_, DualClock> {
        self.clock.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current Mars time.
    pub fn mars_time(&self) -> MarsTime {
        self.read_clock().simulated_time()
    }

    /// Mars time at simulation start.
    pub fn initial_mars_time(&self) -> MarsTime {
        self.read_clock().initial_mars_time()
    }

    /// Current Earth time.
    pub fn earth_time(&self) -> EarthTime {
        self.read_clock().earth_time()
    }

    /// Millisols elapsed on Mars since the simulation started.
    pub fn elapsed_millisols(&self) -> f64 {
        self.read_clock().elapsed_millisols()
    }

    /// Current scheduler state.
    pub fn run_state(&self) -> RunState {
        self.control.run_state()
    }

    /// Serializable view of the clock.
    pub fn snapshot(&self) -> ClockSnapshot {
        let clock = self.read_clock().clone();
        ClockSnapshot {
            mars_time: clock.simulated_time(),
            initial_mars_time: clock.initial_mars_time(),
            earth_time: clock.earth_time(),
            time_ratio: self.control.time_ratio(),
            total_pulses: self.total_pulses(),
            uptime_ms: self.uptimer.uptime_millis(),
            run_state: self.control.run_state(),
        }
    }

    // -----------------------------------------------------------------------
    // Listeners
    // -----------------------------------------------------------------------

    /// Register a listener. Returns `false` if it already was.
    pub fn add_listener(&self, listener: Arc<dyn ClockListener>) -> bool {
        self.registry.register(listener)
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, listener: &Arc<dyn ClockListener>) -> bool {
        self.registry.unregister(listener)
    }

    /// Delivery counters for every listener.
    pub fn listener_stats(&self) -> Vec<ListenerStats> {
        self.registry.stats()
    }

    /// Install or replace the autosave collaborator.
    pub fn set_autosave(&self, autosave: Arc<dyn AutosaveControl>) {
        if self.control.is_paused() {
            autosave.suspend();
        }
        *self
            .autosave
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(autosave);
    }

    fn autosave(&self) -> Option<Arc<dyn AutosaveControl>> {
        self.autosave
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // -----------------------------------------------------------------------
    // Scheduler Cycle
    // -----------------------------------------------------------------------

    /// Run one scheduler cycle: pending save, pending exit, then a pulse
    /// unless paused.
    ///
    /// # Errors
    ///
    /// Returns [`MasterClockError::Clock`] if the calendars rejected the
    /// pulse; no listener is notified in that case.
    pub fn status_update(&self) -> Result<CycleOutcome, MasterClockError> {
        if let Some(request) = self.control.take_save_request() {
            self.run_save(&request);
        }

        if self.control.is_exit_requested() {
            if let Some(autosave) = self.autosave() {
                autosave.stop();
            }
            self.control.stop();
            info!(
                mars_time = %self.mars_time(),
                total_pulses = self.total_pulses(),
                "Exit requested, ending simulation"
            );
            return Ok(CycleOutcome::Exit);
        }

        if self.control.is_paused() {
            self.uptimer.rebase();
            return Ok(CycleOutcome::Paused);
        }

        self.pulse(false).map(CycleOutcome::Pulsed)
    }

    /// Deliver one catch-up frame without waiting for the period. Returns
    /// `None` when paused.
    ///
    /// # Errors
    ///
    /// Returns [`MasterClockError::Clock`] if the calendars rejected the
    /// pulse.
    pub fn catch_up_pulse(&self) -> Result<Option<ClockPulse>, MasterClockError> {
        if self.control.is_paused() {
            return Ok(None);
        }
        self.pulse(true).map(Some)
    }

    fn pulse(&self, catch_up: bool) -> Result<ClockPulse, MasterClockError> {
        let real_elapsed_ms = self.uptimer.elapsed_since_last_query();
        let time_ratio = self.control.time_ratio();
        #[allow(clippy::cast_precision_loss)]
        let earth_seconds = real_elapsed_ms as f64 * time_ratio / 1000.0;
        let elapsed_millisols = seconds_to_millisols(earth_seconds);

        let (mars_time, earth_time) = {
            let mut clock = self.clock.write().unwrap_or_else(PoisonError::into_inner);
            clock.advance(elapsed_millisols, earth_seconds)?;
            (clock.simulated_time(), clock.earth_time())
        };

        let pulse = ClockPulse {
            id: self.next_pulse_id.fetch_add(1, Ordering::AcqRel),
            elapsed_millisols,
            earth_seconds,
            real_elapsed_ms,
            time_ratio,
            catch_up,
            mars_time,
            earth_time,
        };
        self.total_pulses.fetch_add(1, Ordering::AcqRel);

        let submitted = self.registry.deliver(&pulse, self.executor.as_ref());
        trace!(
            pulse = pulse.id,
            real_elapsed_ms,
            elapsed_millisols,
            catch_up,
            submitted,
            mars_time = %mars_time,
            "Pulse delivered"
        );
        Ok(pulse)
    }

    fn run_save(&self, request: &SaveRequest) {
        self.control.set_save_in_progress(true);
        let snapshot = self.snapshot();
        match self.persistence.save(request, &snapshot) {
            Ok(()) => info!(
                mode = ?request.mode,
                destination = ?request.destination,
                mars_time = %snapshot.mars_time,
                "Simulation saved"
            ),
            Err(e) => error!(
                mode = ?request.mode,
                destination = ?request.destination,
                error = %e,
                "Simulation save failed"
            ),
        }
        self.control.set_save_in_progress(false);
    }

    // -----------------------------------------------------------------------
    // Pause / Save / Exit
    // -----------------------------------------------------------------------

    /// Pause or resume. On an actual edge the timer records it, the
    /// autosave collaborator is suspended or resumed, and every listener
    /// gets `pause_change` exactly once. Returns `true` on an edge.
    pub fn set_paused(&self, paused: bool) -> bool {
        let _edge = self
            .pause_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !self.control.set_paused(paused) {
            return false;
        }

        self.uptimer.set_paused(paused);
        if let Some(autosave) = self.autosave() {
            if paused {
                autosave.suspend();
            } else {
                autosave.resume();
            }
        }
        self.registry.fire_pause_change(paused);
        info!(paused, mars_time = %self.mars_time(), "Clock pause state changed");
        true
    }

    /// Freeze simulated time.
    pub fn pause(&self) -> bool {
        self.set_paused(true)
    }

    /// Unfreeze simulated time.
    pub fn resume(&self) -> bool {
        self.set_paused(false)
    }

    /// Whether simulated time is frozen.
    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    /// Queue a save for the start of the next cycle.
    pub fn request_save(&self, mode: SaveMode, destination: Option<std::path::PathBuf>) {
        info!(mode = ?mode, destination = ?destination, "Save requested");
        self.control.request_save(mode, destination);
    }

    /// Whether a save is pending or running.
    pub fn is_saving(&self) -> bool {
        self.control.is_saving()
    }

    /// Pause, then ask the clock thread to end the simulation.
    pub fn request_exit(&self) {
        self.set_paused(true);
        self.control.request_exit();
        info!("Exit requested");
    }

    // -----------------------------------------------------------------------
    // Parameters
    // -----------------------------------------------------------------------

    /// Current time ratio.
    pub fn time_ratio(&self) -> f64 {
        self.control.time_ratio()
    }

    /// Time ratio chosen at construction.
    pub fn default_time_ratio(&self) -> f64 {
        self.control.default_time_ratio()
    }

    /// Set the time ratio. Returns the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError::TimeRatioOutOfRange`] outside `[16, 4096]`.
    pub fn set_time_ratio(&self, ratio: f64) -> Result<f64, ParameterError> {
        match self.control.set_time_ratio(ratio) {
            Ok(previous) => {
                info!(previous, time_ratio = self.control.time_ratio(), "Time ratio changed");
                Ok(previous)
            }
            Err(e) => {
                warn!(requested = ratio, error = %e, "Time ratio rejected");
                Err(e)
            }
        }
    }

    /// Set the target period between pulses. Returns the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError::TimeBetweenUpdatesOutOfRange`] outside `[1, 10800]`.
    pub fn set_time_between_updates_ms(&self, ms: u64) -> Result<u64, ParameterError> {
        let previous = self.control.set_time_between_updates_ms(ms)?;
        info!(previous, time_between_updates_ms = ms, "Pulse period changed");
        Ok(previous)
    }

    /// Set the catch-up frame cap. Returns the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError::MaxFrameSkipsOutOfRange`] outside `[1, 200]`.
    pub fn set_max_frame_skips(&self, value: u32) -> Result<u32, ParameterError> {
        let previous = self.control.set_max_frame_skips(value)?;
        info!(previous, max_frame_skips = value, "Frame skip cap changed");
        Ok(previous)
    }

    /// Set the yield threshold. Returns the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError::NoDelaysPerYieldOutOfRange`] outside `[1, 200]`.
    pub fn set_no_delays_per_yield(&self, value: u32) -> Result<u32, ParameterError> {
        let previous = self.control.set_no_delays_per_yield(value)?;
        info!(previous, no_delays_per_yield = value, "Yield threshold changed");
        Ok(previous)
    }

    // -----------------------------------------------------------------------
    // Pulse Statistics
    // -----------------------------------------------------------------------

    /// Pulses delivered so far.
    pub fn total_pulses(&self) -> u64 {
        self.total_pulses.load(Ordering::Acquire)
    }

    /// Scale the pulse counter down to three fifths, keeping the rate
    /// estimate responsive after a long run at a different ratio.
    pub fn reset_total_pulses(&self) {
        self.total_pulses
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |total| {
                Some(u64::try_from(u128::from(total).saturating_mul(3) / 5).unwrap_or(total))
            })
            .ok();
    }

    /// Average pulses per real second of uptime.
    #[allow(clippy::cast_precision_loss)]
    pub fn pulses_per_second(&self) -> f64 {
        let uptime_ms = self.uptimer.uptime_millis();
        if uptime_ms == 0 {
            return 0.0;
        }
        self.total_pulses() as f64 * 1000.0 / uptime_ms as f64
    }

    /// Uptime formatted as `HHh MMm SS.SSs`.
    pub fn uptime_string(&self) -> String {
        self.uptimer.uptime_string()
    }

    // -----------------------------------------------------------------------
    // Thread Lifecycle
    // -----------------------------------------------------------------------

    /// Spawn the clock thread. A previous thread that was stopped but not
    /// yet joined is joined first, so at most one clock thread runs.
    ///
    /// # Errors
    ///
    /// Returns [`MasterClockError::AlreadyRunning`] if the thread is up, or
    /// [`MasterClockError::Spawn`] if it could not be created.
    pub fn start(self: &Arc<Self>) -> Result<(), MasterClockError> {
        let mut thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        if self.control.is_running() {
            return Err(MasterClockError::AlreadyRunning);
        }
        if let Some(previous) = thread.take() {
            let exit = previous.join().unwrap_or(ClockExit::Crashed);
            debug!(exit = ?exit, "Joined previous clock thread before restart");
        }
        if !self.control.mark_running() {
            return Err(MasterClockError::AlreadyRunning);
        }

        self.uptimer.rebase();
        match crate::clock_thread::spawn(Arc::clone(self)) {
            Ok(handle) => {
                *thread = Some(handle);
                Ok(())
            }
            Err(source) => {
                self.control.stop();
                Err(MasterClockError::Spawn { source })
            }
        }
    }

    /// Ask the clock thread to stop after its current cycle.
    pub fn stop(&self) {
        self.control.stop();
    }

    /// Whether the clock thread is looping.
    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    /// Wait for the clock thread to end. Returns `None` if it was never
    /// started or has already been joined.
    pub fn join(&self) -> Option<ClockExit> {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        Some(handle.join().unwrap_or_else(|_| {
            error!("Clock thread panicked");
            ClockExit::Crashed
        }))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::float_cmp,
    clippy::unreachable,
    clippy::indexing_slicing
)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::listener::ListenerError;
    use crate::persistence::PersistenceError;
    use crate::uptimer::ManualTimeSource;

    #[derive(Default)]
    struct Recorder {
        saves: StdMutex<Vec<(SaveMode, u64)>>,
    }

    impl SimulationPersistence for Recorder {
        fn save(
            &self,
            request: &SaveRequest,
            clock: &ClockSnapshot,
        ) -> Result<(), PersistenceError> {
            self.saves
                .lock()
                .unwrap()
                .push((request.mode, clock.total_pulses));
            Ok(())
        }
    }

    struct Broken;

    impl ClockListener for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn clock_pulse(&self, _pulse: &ClockPulse) -> Result<(), ListenerError> {
            Err(ListenerError::failed("always"))
        }
    }

    fn make_master(
        persistence: Arc<dyn SimulationPersistence>,
    ) -> (Arc<ManualTimeSource>, MasterClock) {
        let source = Arc::new(ManualTimeSource::new(0));
        let control = Arc::new(ClockControl::new(256.0, 40, 10, 16).unwrap());
        let clock = DualClock::new("15-Adir-01:000.000", "09/30/2043 00:00:00").unwrap();
        let master = MasterClock::builder(clock, control)
            .time_source(Arc::clone(&source) as Arc<dyn TimeSource>)
            .persistence(persistence)
            .build();
        (source, master)
    }

    #[test]
    fn pulse_scales_real_time_by_ratio() {
        let (source, master) = make_master(Arc::new(NoPersistence));
        source.advance(40);
        let CycleOutcome::Pulsed(pulse) = master.status_update().unwrap() else {
            unreachable!("clock is not paused");
        };
        assert_eq!(pulse.id, 1);
        assert_eq!(pulse.real_elapsed_ms, 40);
        assert!((pulse.earth_seconds - 10.24).abs() < 1e-9);
        assert!((pulse.elapsed_millisols - 10.24 / 88.775_244).abs() < 1e-12);
        assert!(!pulse.catch_up);
        assert_eq!(master.total_pulses(), 1);
    }

    #[test]
    fn save_runs_before_the_pulse() {
        let recorder = Arc::new(Recorder::default());
        let (source, master) = make_master(Arc::clone(&recorder) as Arc<dyn SimulationPersistence>);
        source.advance(40);
        master.status_update().unwrap();

        master.request_save(SaveMode::SaveAs, Some("colony.json".into()));
        assert!(master.is_saving());
        source.advance(40);
        master.status_update().unwrap();

        // The snapshot saw one pulse, not two.
        assert_eq!(*recorder.saves.lock().unwrap(), vec![(SaveMode::SaveAs, 1)]);
        assert!(!master.is_saving());
        assert_eq!(master.total_pulses(), 2);
    }

    #[test]
    fn failed_save_keeps_running() {
        let (source, master) = make_master(Arc::new(NoPersistence));
        master.request_save(SaveMode::Default, None);
        source.advance(40);
        assert!(matches!(master.status_update().unwrap(), CycleOutcome::Pulsed(_)));
        assert!(!master.is_saving());
    }

    #[test]
    fn exit_pauses_then_ends() {
        let (source, master) = make_master(Arc::new(NoPersistence));
        master.request_exit();
        assert!(master.is_paused());
        source.advance(40);
        assert_eq!(master.status_update().unwrap(), CycleOutcome::Exit);
        assert_eq!(master.total_pulses(), 0);
        assert_eq!(master.run_state(), RunState::Stopped);
    }

    #[test]
    fn paused_cycle_discards_elapsed_time() {
        let (source, master) = make_master(Arc::new(NoPersistence));
        assert!(master.pause());
        source.advance(10_000);
        assert_eq!(master.status_update().unwrap(), CycleOutcome::Paused);
        assert!(master.resume());
        source.advance(40);
        let CycleOutcome::Pulsed(pulse) = master.status_update().unwrap() else {
            unreachable!("clock was resumed");
        };
        assert_eq!(pulse.real_elapsed_ms, 40);
    }

    #[test]
    fn catch_up_pulse_is_flagged() {
        let (source, master) = make_master(Arc::new(NoPersistence));
        source.advance(5);
        let pulse = master.catch_up_pulse().unwrap().unwrap();
        assert!(pulse.catch_up);
        master.pause();
        assert!(master.catch_up_pulse().unwrap().is_none());
    }

    #[test]
    fn listener_errors_do_not_fail_the_cycle() {
        let (source, master) = make_master(Arc::new(NoPersistence));
        master.add_listener(Arc::new(Broken));
        source.advance(40);
        assert!(master.status_update().is_ok());
        assert_eq!(master.listener_stats()[0].failed, 1);
    }

    #[test]
    fn pulse_counter_statistics() {
        let (source, master) = make_master(Arc::new(NoPersistence));
        for _ in 0..10 {
            source.advance(100);
            master.status_update().unwrap();
        }
        assert_eq!(master.total_pulses(), 10);
        assert_eq!(master.pulses_per_second(), 10.0);
        master.reset_total_pulses();
        assert_eq!(master.total_pulses(), 6);
    }

    #[test]
    fn rejected_ratio_keeps_previous() {
        let (_source, master) = make_master(Arc::new(NoPersistence));
        assert!(master.set_time_ratio(8.0).is_err());
        assert_eq!(master.time_ratio(), 256.0);
        assert_eq!(master.set_time_ratio(512.126).unwrap(), 256.0);
        assert_eq!(master.time_ratio(), 512.13);
        assert_eq!(master.default_time_ratio(), 256.0);
    }
}
