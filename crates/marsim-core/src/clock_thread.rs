//! The dedicated clock thread.
//!
//! The loop runs on its own OS thread named `marsim-clock`, inside a
//! current-thread tokio runtime used only for its timer: the sleep at the
//! end of each cycle races the control state's wake signal, so `stop`
//! takes effect immediately instead of after a full period.
//!
//! Each cycle calls [`MasterClock::status_update`], then lets
//! [`Cadence`] decide how long to sleep and how many catch-up frames to
//! deliver. Listener work never runs here unless the master was built
//! with an inline executor.

use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cadence::{Cadence, SleepPlan};
use crate::master::{ClockExit, CycleOutcome, MasterClock};

/// Name of the clock thread.
pub const CLOCK_THREAD_NAME: &str = "marsim-clock";

/// Spawn the clock thread for `master`.
pub(crate) fn spawn(master: Arc<MasterClock>) -> std::io::Result<JoinHandle<ClockExit>> {
    std::thread::Builder::new()
        .name(CLOCK_THREAD_NAME.to_owned())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!(error = %e, "Failed to build clock runtime");
                    master.control().stop();
                    return ClockExit::Crashed;
                }
            };
            runtime.block_on(run(&master))
        })
}

async fn run(master: &MasterClock) -> ClockExit {
    let control = master.control();
    let mut cadence = Cadence::new();

    info!(
        time_ratio = control.time_ratio(),
        time_between_updates_ms = control.time_between_updates_ms(),
        max_frame_skips = control.max_frame_skips(),
        mars_time = %master.mars_time(),
        earth_time = %master.earth_time(),
        "Clock thread started"
    );

    let exit = loop {
        if !control.is_running() {
            break ClockExit::Stopped;
        }

        let cycle_start = Instant::now();
        match master.status_update() {
            Ok(CycleOutcome::Exit) => break ClockExit::ExitRequested,
            Ok(CycleOutcome::Pulsed(_) | CycleOutcome::Paused) => {}
            Err(e) => error!(error = %e, "Clock cycle failed"),
        }

        let budget = control.frame_budget();
        match cadence.plan(&budget, cycle_start.elapsed()) {
            SleepPlan::Sleep(duration) => {
                let woken = control.woken();
                tokio::pin!(woken);
                woken.as_mut().enable();
                if !control.is_running() {
                    continue;
                }

                let before = Instant::now();
                tokio::select! {
                    () = tokio::time::sleep(duration) => {}
                    () = woken => {}
                }
                cadence.record_sleep(duration, before.elapsed());
            }
            SleepPlan::Overrun { yield_now, streak } => {
                if Cadence::is_persistent_overrun(streak) {
                    warn!(
                        streak,
                        time_between_updates_ms = control.time_between_updates_ms(),
                        excess_ms = cadence.excess().as_millis(),
                        "Clock cycles are persistently overrunning their period"
                    );
                }
                if yield_now {
                    std::thread::yield_now();
                }
            }
        }

        let skips = cadence.catch_up_frames(&budget);
        if skips > 0 {
            debug!(skips, "Delivering catch-up frames");
            for _ in 0..skips {
                if !control.is_running() {
                    break;
                }
                match master.catch_up_pulse() {
                    Ok(Some(_)) => {}
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "Catch-up frame failed");
                        break;
                    }
                }
            }
        }
    };

    control.stop();
    info!(
        exit = ?exit,
        total_pulses = master.total_pulses(),
        mars_time = %master.mars_time(),
        uptime = %master.uptime_string(),
        "Clock thread exiting"
    );
    exit
}
