//! Pulse subscribers and their fan-out.
//!
//! Every subsystem that advances with simulated time implements
//! [`ClockListener`] and registers with the [`ListenerRegistry`]. For each
//! pulse the registry submits one job per listener to a [`TaskExecutor`];
//! the clock thread never waits for a listener to finish.
//!
//! # Isolation
//!
//! A listener that returns an error or panics is logged and counted. It
//! never affects other listeners or the clock thread, and it stays
//! registered for the next pulse.
//!
//! # Registry
//!
//! The list is copy-on-write: delivery clones an `Arc` of the current list
//! and works on that snapshot, so registration and removal may happen
//! concurrently with delivery and take effect from the next pulse.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::earth_time::EarthTime;
use crate::executor::TaskExecutor;
use crate::mars_time::MarsTime;

/// One increment of simulated time, delivered to every listener.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClockPulse {
    /// Sequence number, starting at 1.
    pub id: u64,
    /// Simulated millisols this pulse covers.
    pub elapsed_millisols: f64,
    /// Simulated Earth seconds this pulse covers.
    pub earth_seconds: f64,
    /// Real milliseconds measured since the previous pulse.
    pub real_elapsed_ms: u64,
    /// Time ratio the pulse was computed with.
    pub time_ratio: f64,
    /// Whether this is a catch-up frame delivered without sleeping.
    pub catch_up: bool,
    /// Mars time after the pulse was applied.
    pub mars_time: MarsTime,
    /// Earth time after the pulse was applied.
    pub earth_time: EarthTime,
}

/// Failure reported by a listener while handling a pulse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListenerError {
    /// The listener could not process the pulse.
    #[error("pulse handling failed: {reason}")]
    Failed {
        /// Description of the failure.
        reason: String,
    },

    /// The listener panicked.
    #[error("listener panicked: {message}")]
    Panicked {
        /// The panic payload, if it was a string.
        message: String,
    },
}

impl ListenerError {
    /// Convenience constructor for [`ListenerError::Failed`].
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

/// A subsystem driven by the master clock.
pub trait ClockListener: Send + Sync {
    /// Name used in logs and statistics.
    fn name(&self) -> &str;

    /// Advance this subsystem by one pulse.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] if the pulse could not be processed. The
    /// error is logged; the listener stays registered.
    fn clock_pulse(&self, pulse: &ClockPulse) -> Result<(), ListenerError>;

    /// Called once on the caller's thread for every pause edge.
    fn pause_change(&self, _paused: bool) {}
}

/// Delivery counters for one listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenerStats {
    /// Listener name.
    pub name: String,
    /// Pulses handed to the listener.
    pub delivered: u64,
    /// Pulses that returned an error or panicked.
    pub failed: u64,
}

/// A registered listener together with its most recent pulse.
pub struct ListenerTask {
    listener: Arc<dyn ClockListener>,
    last_pulse: Mutex<Option<ClockPulse>>,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl std::fmt::Debug for ListenerTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerTask")
            .field("listener", &self.listener.name())
            .field("delivered", &self.delivered())
            .field("failed", &self.failed())
            .finish_non_exhaustive()
    }
}

impl ListenerTask {
    fn new(listener: Arc<dyn ClockListener>) -> Self {
        Self {
            listener,
            last_pulse: Mutex::new(None),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Whether this task wraps `listener` (by pointer identity).
    fn wraps(&self, listener: &Arc<dyn ClockListener>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.listener), Arc::as_ptr(listener))
    }

    /// Name of the wrapped listener.
    pub fn name(&self) -> &str {
        self.listener.name()
    }

    /// The most recent pulse submitted for this listener, whether or not
    /// its job has run yet.
    pub fn last_pulse(&self) -> Option<ClockPulse> {
        *self
            .last_pulse
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Pulses handed to the listener so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Acquire)
    }

    /// Pulses that failed so far.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Acquire)
    }

    /// Store `pulse` as the pending payload.
    fn record_pulse(&self, pulse: ClockPulse) {
        *self
            .last_pulse
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(pulse);
    }

    /// Run the listener for one pulse, isolating errors and panics.
    fn run(&self, pulse: ClockPulse) {
        self.delivered.fetch_add(1, Ordering::AcqRel);

        let outcome = catch_unwind(AssertUnwindSafe(|| self.listener.clock_pulse(&pulse)))
            .unwrap_or_else(|payload| {
                Err(ListenerError::Panicked {
                    message: panic_message(payload.as_ref()),
                })
            });

        if let Err(e) = outcome {
            self.failed.fetch_add(1, Ordering::AcqRel);
            match e {
                ListenerError::Panicked { .. } => {
                    error!(listener = self.name(), pulse = pulse.id, error = %e, "Listener panicked");
                }
                ListenerError::Failed { .. } => {
                    warn!(listener = self.name(), pulse = pulse.id, error = %e, "Listener failed");
                }
            }
        }
    }

    fn stats(&self) -> ListenerStats {
        ListenerStats {
            name: self.name().to_owned(),
            delivered: self.delivered(),
            failed: self.failed(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("non-string panic payload"))
}

/// Copy-on-write set of clock listeners.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    tasks: RwLock<Arc<Vec<Arc<ListenerTask>>>>,
    dropped: AtomicU64,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> Arc<Vec<Arc<ListenerTask>>> {
        Arc::clone(&self.tasks.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Add a listener. Returns `false` if the same listener is already
    /// registered.
    pub fn register(&self, listener: Arc<dyn ClockListener>) -> bool {
        let mut guard = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        if guard.iter().any(|task| task.wraps(&listener)) {
            return false;
        }
        let name = listener.name().to_owned();
        let mut next = Vec::with_capacity(guard.len().saturating_add(1));
        next.extend(guard.iter().cloned());
        next.push(Arc::new(ListenerTask::new(listener)));
        *guard = Arc::new(next);
        debug!(listener = %name, count = guard.len(), "Clock listener registered");
        true
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn unregister(&self, listener: &Arc<dyn ClockListener>) -> bool {
        let mut guard = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        if !guard.iter().any(|task| task.wraps(listener)) {
            return false;
        }
        let next: Vec<_> = guard
            .iter()
            .filter(|task| !task.wraps(listener))
            .cloned()
            .collect();
        *guard = Arc::new(next);
        debug!(listener = listener.name(), count = guard.len(), "Clock listener removed");
        true
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.current().len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }

    /// Submit one job per listener for `pulse`. Returns how many jobs the
    /// executor accepted. Rejected submissions are dropped and counted.
    pub fn deliver(&self, pulse: &ClockPulse, executor: &dyn TaskExecutor) -> usize {
        let tasks = self.current();
        let mut submitted = 0_usize;
        for task in tasks.iter() {
            let pulse = *pulse;
            task.record_pulse(pulse);
            let job_task = Arc::clone(task);
            match executor.execute(Box::new(move || job_task.run(pulse))) {
                Ok(()) => submitted = submitted.saturating_add(1),
                Err(e) => {
                    let dropped = self.dropped.fetch_add(1, Ordering::AcqRel).saturating_add(1);
                    warn!(
                        listener = task.name(),
                        pulse = pulse.id,
                        dropped,
                        error = %e,
                        "Dropped pulse submission"
                    );
                }
            }
        }
        submitted
    }

    /// Notify every listener of a pause edge on the calling thread.
    pub fn fire_pause_change(&self, paused: bool) {
        for task in self.current().iter() {
            let result = catch_unwind(AssertUnwindSafe(|| task.listener.pause_change(paused)));
            if let Err(payload) = result {
                error!(
                    listener = task.name(),
                    paused,
                    message = %panic_message(payload.as_ref()),
                    "Listener panicked on pause change"
                );
            }
        }
    }

    /// Submissions the executor rejected so far.
    pub fn dropped_submissions(&self) -> u64 {
        self.dropped.load(Ordering::Acquire)
    }

    /// Delivery counters for every registered listener.
    pub fn stats(&self) -> Vec<ListenerStats> {
        self.current().iter().map(|task| task.stats()).collect()
    }

    /// Snapshot of the registered tasks.
    pub fn tasks(&self) -> Arc<Vec<Arc<ListenerTask>>> {
        self.current()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::executor::InlineExecutor;

    #[derive(Default)]
    struct Counter {
        pulses: AtomicUsize,
        pauses: Mutex<Vec<bool>>,
    }

    impl ClockListener for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn clock_pulse(&self, _pulse: &ClockPulse) -> Result<(), ListenerError> {
            self.pulses.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn pause_change(&self, paused: bool) {
            self.pauses.lock().unwrap().push(paused);
        }
    }

    struct Faulty;

    impl ClockListener for Faulty {
        fn name(&self) -> &str {
            "faulty"
        }

        fn clock_pulse(&self, pulse: &ClockPulse) -> Result<(), ListenerError> {
            if pulse.id % 2 == 0 {
                panic!("even pulse");
            }
            Err(ListenerError::failed("odd pulse"))
        }

        fn pause_change(&self, _paused: bool) {
            panic!("pause");
        }
    }

    fn pulse(id: u64) -> ClockPulse {
        ClockPulse {
            id,
            elapsed_millisols: 0.115,
            earth_seconds: 10.24,
            real_elapsed_ms: 40,
            time_ratio: 256.0,
            catch_up: false,
            mars_time: MarsTime::parse("15-Adir-01:000.000").unwrap(),
            earth_time: EarthTime::parse("09/30/2043 00:00:00").unwrap(),
        }
    }

    #[test]
    fn registration_is_idempotent() {
        let registry = ListenerRegistry::new();
        let counter: Arc<dyn ClockListener> = Arc::new(Counter::default());
        assert!(registry.register(Arc::clone(&counter)));
        assert!(!registry.register(Arc::clone(&counter)));
        assert_eq!(registry.len(), 1);

        registry.deliver(&pulse(1), &InlineExecutor::new());
        assert_eq!(registry.stats()[0].delivered, 1);
    }

    #[test]
    fn unregister_unknown_is_noop() {
        let registry = ListenerRegistry::new();
        let a: Arc<dyn ClockListener> = Arc::new(Counter::default());
        let b: Arc<dyn ClockListener> = Arc::new(Counter::default());
        registry.register(Arc::clone(&a));
        assert!(!registry.unregister(&b));
        assert!(registry.unregister(&a));
        assert!(!registry.unregister(&a));
        assert!(registry.is_empty());
    }

    #[test]
    fn failing_listener_does_not_affect_others() {
        let registry = ListenerRegistry::new();
        let counter = Arc::new(Counter::default());
        registry.register(Arc::new(Faulty));
        registry.register(Arc::clone(&counter) as Arc<dyn ClockListener>);

        let executor = InlineExecutor::new();
        for id in 1..=4 {
            assert_eq!(registry.deliver(&pulse(id), &executor), 2);
        }

        assert_eq!(counter.pulses.load(Ordering::SeqCst), 4);
        let stats = registry.stats();
        assert_eq!(stats[0].name, "faulty");
        assert_eq!(stats[0].delivered, 4);
        assert_eq!(stats[0].failed, 4);
        assert_eq!(stats[1].failed, 0);
    }

    #[test]
    fn each_task_keeps_its_last_pulse() {
        let registry = ListenerRegistry::new();
        registry.register(Arc::new(Counter::default()));
        let executor = InlineExecutor::new();
        registry.deliver(&pulse(7), &executor);
        registry.deliver(&pulse(8), &executor);
        let tasks = registry.tasks();
        assert_eq!(tasks[0].last_pulse().unwrap().id, 8);
    }

    #[derive(Default)]
    struct HeldJobs {
        jobs: Mutex<Vec<crate::executor::Job>>,
    }

    impl TaskExecutor for HeldJobs {
        fn execute(&self, job: crate::executor::Job) -> Result<(), crate::executor::SubmitError> {
            self.jobs.lock().unwrap().push(job);
            Ok(())
        }

        fn is_shutdown(&self) -> bool {
            false
        }
    }

    #[test]
    fn last_pulse_is_stored_at_submission() {
        let registry = ListenerRegistry::new();
        let counter = Arc::new(Counter::default());
        registry.register(Arc::clone(&counter) as Arc<dyn ClockListener>);
        let executor = HeldJobs::default();

        registry.deliver(&pulse(1), &executor);
        registry.deliver(&pulse(2), &executor);
        let task = Arc::clone(&registry.tasks()[0]);
        assert_eq!(task.last_pulse().unwrap().id, 2);
        assert_eq!(task.delivered(), 0);

        let jobs = std::mem::take(&mut *executor.jobs.lock().unwrap());
        for job in jobs {
            job();
        }
        assert_eq!(task.delivered(), 2);
        assert_eq!(task.last_pulse().unwrap().id, 2);
        assert_eq!(counter.pulses.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn rejected_submissions_are_counted() {
        let registry = ListenerRegistry::new();
        let counter = Arc::new(Counter::default());
        registry.register(Arc::clone(&counter) as Arc<dyn ClockListener>);
        let executor = InlineExecutor::new();
        executor.shutdown_now();

        assert_eq!(registry.deliver(&pulse(1), &executor), 0);
        assert_eq!(registry.dropped_submissions(), 1);
        assert_eq!(counter.pulses.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn pause_change_is_isolated() {
        let registry = ListenerRegistry::new();
        let counter = Arc::new(Counter::default());
        registry.register(Arc::new(Faulty));
        registry.register(Arc::clone(&counter) as Arc<dyn ClockListener>);
        registry.fire_pause_change(true);
        registry.fire_pause_change(false);
        assert_eq!(*counter.pauses.lock().unwrap(), vec![true, false]);
    }
}
