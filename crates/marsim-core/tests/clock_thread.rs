//! Integration tests for the dedicated clock thread.
//!
//! These run the real `marsim-clock` thread against the system clock, so
//! they only assert properties that hold regardless of scheduling jitter:
//! start/stop transitions, prompt wake-up on stop, the catch-up cap, and
//! delivery through the worker pool.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::arithmetic_side_effects
)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use marsim_core::master::MasterClockError;
use marsim_core::{
    ClockControl, ClockExit, ClockListener, ClockPulse, DualClock, ListenerError, MasterClock,
    RunState, TaskExecutor, WorkerPool,
};

#[derive(Default)]
struct Recorder {
    pulses: Mutex<Vec<(u64, bool)>>,
    count: AtomicU64,
    stall_first_ms: u64,
}

impl Recorder {
    fn stalling(ms: u64) -> Self {
        Self {
            stall_first_ms: ms,
            ..Self::default()
        }
    }

    fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}

impl ClockListener for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn clock_pulse(&self, pulse: &ClockPulse) -> Result<(), ListenerError> {
        self.pulses.lock().unwrap().push((pulse.id, pulse.catch_up));
        if pulse.id == 1 && self.stall_first_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.stall_first_ms));
        }
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Records which thread delivered each pulse.
#[derive(Default)]
struct ThreadTracker {
    threads: Mutex<Vec<ThreadId>>,
}

impl ThreadTracker {
    fn count(&self) -> usize {
        self.threads.lock().unwrap().len()
    }

    fn threads_since(&self, index: usize) -> HashSet<ThreadId> {
        self.threads.lock().unwrap()[index..].iter().copied().collect()
    }
}

impl ClockListener for ThreadTracker {
    fn name(&self) -> &str {
        "thread-tracker"
    }

    fn clock_pulse(&self, _pulse: &ClockPulse) -> Result<(), ListenerError> {
        self.threads
            .lock()
            .unwrap()
            .push(std::thread::current().id());
        Ok(())
    }
}

fn make_master(period_ms: u64, max_frame_skips: u32) -> Arc<MasterClock> {
    let control =
        Arc::new(ClockControl::new(256.0, period_ms, max_frame_skips, 16).expect("valid control"));
    let clock =
        DualClock::new("15-Adir-01:000.000", "09/30/2043 00:00:00").expect("valid start times");
    Arc::new(MasterClock::builder(clock, control).build())
}

fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn start_then_stop() {
    let master = make_master(10, 10);
    let recorder = Arc::new(Recorder::default());
    master.add_listener(Arc::clone(&recorder) as Arc<dyn ClockListener>);

    assert_eq!(master.run_state(), RunState::Stopped);
    master.start().unwrap();
    assert!(master.is_running());
    assert!(matches!(master.start(), Err(MasterClockError::AlreadyRunning)));

    wait_for(|| recorder.count() >= 5);
    master.stop();
    assert_eq!(master.join(), Some(ClockExit::Stopped));
    assert_eq!(master.run_state(), RunState::Stopped);
    assert_eq!(master.join(), None);

    let after_stop = recorder.count();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(recorder.count(), after_stop);
}

#[test]
fn stop_cuts_a_long_sleep_short() {
    let master = make_master(10_800, 10);
    let recorder = Arc::new(Recorder::default());
    master.add_listener(Arc::clone(&recorder) as Arc<dyn ClockListener>);

    master.start().unwrap();
    wait_for(|| recorder.count() >= 1);

    let stopped_at = Instant::now();
    master.stop();
    assert_eq!(master.join(), Some(ClockExit::Stopped));
    assert!(stopped_at.elapsed() < Duration::from_secs(5));
}

#[test]
fn catch_up_is_capped_after_a_stall() {
    let master = make_master(10, 3);
    let recorder = Arc::new(Recorder::stalling(500));
    master.add_listener(Arc::clone(&recorder) as Arc<dyn ClockListener>);

    master.start().unwrap();
    wait_for(|| recorder.count() >= 5);
    master.stop();
    master.join();

    let pulses = recorder.pulses.lock().unwrap().clone();
    // The stalled first pulse is followed by exactly three catch-up
    // frames, not the fifty the stall would otherwise call for.
    assert_eq!(pulses[0], (1, false));
    assert_eq!(&pulses[1..4], &[(2, true), (3, true), (4, true)]);
    assert_eq!(pulses[4], (5, false));
}

#[test]
fn exit_request_ends_the_thread() {
    let master = make_master(10, 10);
    let recorder = Arc::new(Recorder::default());
    master.add_listener(Arc::clone(&recorder) as Arc<dyn ClockListener>);

    master.start().unwrap();
    wait_for(|| recorder.count() >= 2);
    master.request_exit();
    assert_eq!(master.join(), Some(ClockExit::ExitRequested));
    assert!(master.is_paused());
    assert!(!master.is_running());
}

#[test]
fn paused_thread_keeps_running_without_pulses() {
    let master = make_master(10, 10);
    let recorder = Arc::new(Recorder::default());
    master.add_listener(Arc::clone(&recorder) as Arc<dyn ClockListener>);

    master.start().unwrap();
    wait_for(|| recorder.count() >= 2);
    master.pause();
    assert_eq!(master.run_state(), RunState::Paused);

    // Let any cycle already past its pause check finish.
    std::thread::sleep(Duration::from_millis(50));
    let frozen = master.mars_time();
    let delivered = recorder.count();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(master.mars_time(), frozen);
    assert_eq!(recorder.count(), delivered);

    master.resume();
    wait_for(|| recorder.count() > delivered);
    master.stop();
    master.join();
}

#[test]
fn delivery_through_worker_pool() {
    let pool = Arc::new(WorkerPool::start(2, 64).unwrap());
    let control = Arc::new(ClockControl::new(1024.0, 5, 10, 16).unwrap());
    let clock = DualClock::new("15-Adir-01:000.000", "09/30/2043 00:00:00").unwrap();
    let master = Arc::new(
        MasterClock::builder(clock, control)
            .executor(Arc::clone(&pool) as Arc<dyn TaskExecutor>)
            .build(),
    );
    let recorder = Arc::new(Recorder::default());
    master.add_listener(Arc::clone(&recorder) as Arc<dyn ClockListener>);

    master.start().unwrap();
    wait_for(|| recorder.count() >= 10);
    master.stop();
    master.join();

    pool.shutdown_now();
    pool.join();
    assert!(pool.is_shutdown());
    assert!(pool.completed_jobs() >= 10);
    assert_eq!(master.listeners().dropped_submissions(), 0);
}

#[test]
fn restart_right_after_stop_runs_one_thread() {
    let master = make_master(200, 10);
    let tracker = Arc::new(ThreadTracker::default());
    master.add_listener(Arc::clone(&tracker) as Arc<dyn ClockListener>);

    master.start().unwrap();
    wait_for(|| tracker.count() >= 1);
    master.stop();
    master.start().unwrap();
    let restarted_at = tracker.count();

    std::thread::sleep(Duration::from_millis(1_100));
    master.stop();
    assert_eq!(master.join(), Some(ClockExit::Stopped));
    assert_eq!(master.join(), None);

    let threads = tracker.threads_since(restarted_at);
    assert_eq!(threads.len(), 1);
    // One pulse on start, then one per 200 ms period.
    let pulses = tracker.count() - restarted_at;
    assert!(pulses <= 8, "{pulses} pulses in 1.1 s at a 200 ms period");
}

#[test]
fn clean_restart_waits_a_full_period() {
    let master = make_master(1_000, 10);
    let recorder = Arc::new(Recorder::default());
    master.add_listener(Arc::clone(&recorder) as Arc<dyn ClockListener>);

    master.start().unwrap();
    wait_for(|| recorder.count() >= 1);
    master.stop();
    assert_eq!(master.join(), Some(ClockExit::Stopped));

    let before = recorder.count();
    master.start().unwrap();
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(recorder.count() - before, 1);

    master.stop();
    master.join();
}
