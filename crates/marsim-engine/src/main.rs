//! Engine binary for the Marsim colony simulation.
//!
//! This is the main entry point that wires the master clock to its
//! collaborators: the listener worker pool, JSON snapshot persistence, the
//! autosave timer and the pulse logger. It loads configuration, starts the
//! clock thread, and runs until the clock exits or the process receives
//! Ctrl-C, at which point it saves and shuts the clock down.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `marsim-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Scale the clock for the listener thread count
//! 4. Create the clock control and the dual calendar
//! 5. Start the listener worker pool
//! 6. Build the master clock with snapshot persistence
//! 7. Register autosave and the pulse logger
//! 8. Start the clock thread and wait for shutdown
//! 9. Log the final snapshot

mod error;
mod pulse_logger;
mod snapshot;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use marsim_core::config::SimulationConfig;
use marsim_core::{
    AutosaveControl, AutosaveTimer, ClockListener, MasterClock, SaveMode, SimulationPersistence,
    TaskExecutor, WorkerPool,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::pulse_logger::PulseLogger;
use crate::snapshot::JsonSnapshotPersistence;

/// Config file read when neither an argument nor `MARSIM_CONFIG` names one.
const DEFAULT_CONFIG_PATH: &str = "marsim-config.yaml";

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if any initialization step fails or the clock task
/// cannot be joined.
#[tokio::main]
#[allow(clippy::too_many_lines)]
async fn main() -> Result<(), EngineError> {
    // 1. Load configuration.
    let config_path = config_path();
    let (config, loaded_from_file) = load_config(&config_path)?;

    // 2. Initialize structured logging.
    init_logging(&config)?;
    info!("marsim-engine starting");
    if loaded_from_file {
        info!(path = %config_path.display(), "Configuration loaded");
    } else {
        info!(path = %config_path.display(), "Config file not found, using defaults");
    }

    // 3. Scale the clock for the listener thread count.
    let clock_config = if config.clock.scale_for_threads {
        let scaled = config.clock.scaled_for_threads(config.listeners.concurrency);
        info!(
            threads = config.listeners.concurrency,
            time_ratio = scaled.time_ratio,
            time_between_updates_ms = scaled.time_between_updates_ms,
            "Clock scaled for thread count"
        );
        scaled
    } else {
        config.clock.clone()
    };

    // 4. Create the clock control and the dual calendar.
    let control = Arc::new(clock_config.control()?);
    let clock = clock_config.dual_clock()?;
    info!(
        mars_time = %clock.simulated_time(),
        earth_time = %clock.earth_time(),
        time_ratio = control.time_ratio(),
        time_between_updates_ms = control.time_between_updates_ms(),
        max_frame_skips = control.max_frame_skips(),
        "Clock initialized"
    );

    // 5. Start the listener worker pool.
    let pool = Arc::new(WorkerPool::start(
        config.listeners.concurrency,
        config.listeners.queue_capacity,
    )?);

    // 6. Build the master clock.
    let persistence = JsonSnapshotPersistence::new(config.persistence.save_dir.clone());
    info!(save_dir = %persistence.save_dir().display(), "Snapshot persistence ready");
    let master = Arc::new(
        MasterClock::builder(clock, Arc::clone(&control))
            .executor(Arc::clone(&pool) as Arc<dyn TaskExecutor>)
            .persistence(Arc::new(persistence) as Arc<dyn SimulationPersistence>)
            .build(),
    );

    // 7. Register autosave and the pulse logger.
    if config.autosave.enabled {
        let autosave = Arc::new(AutosaveTimer::new(
            Arc::clone(&control),
            config.autosave.interval_ms(),
        ));
        master.add_listener(Arc::clone(&autosave) as Arc<dyn ClockListener>);
        master.set_autosave(autosave as Arc<dyn AutosaveControl>);
        info!(
            interval_minutes = config.autosave.interval_minutes,
            "Autosave enabled"
        );
    } else {
        info!("Autosave disabled");
    }
    master.add_listener(Arc::new(PulseLogger::new(config.logging.report_every_pulses))
        as Arc<dyn ClockListener>);

    // 8. Start the clock thread and wait for shutdown.
    master.start()?;
    let clock_thread = Arc::clone(&master);
    let mut exit_task = tokio::task::spawn_blocking(move || clock_thread.join());

    let exit = tokio::select! {
        joined = &mut exit_task => joined?,
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|source| EngineError::Signal { source })?;
            info!("Shutdown signal received");
            master.request_save(SaveMode::Default, None);
            master.request_exit();
            exit_task.await?
        }
    };

    pool.shutdown_now();
    let shutdown_pool = Arc::clone(&pool);
    tokio::task::spawn_blocking(move || shutdown_pool.join()).await?;

    // 9. Log the final snapshot.
    let snapshot = master.snapshot();
    info!(
        exit = ?exit,
        mars_time = %snapshot.mars_time,
        earth_time = %snapshot.earth_time,
        total_pulses = snapshot.total_pulses,
        uptime = %master.uptime_string(),
        completed_jobs = pool.completed_jobs(),
        dropped_submissions = master.listeners().dropped_submissions(),
        "Simulation finished"
    );
    for stats in master.listener_stats() {
        if stats.failed > 0 {
            warn!(
                listener = %stats.name,
                delivered = stats.delivered,
                failed = stats.failed,
                "Listener reported failures"
            );
        }
    }

    Ok(())
}

/// Resolve the config file: first CLI argument, then `MARSIM_CONFIG`,
/// then [`DEFAULT_CONFIG_PATH`].
fn config_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("MARSIM_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load configuration from `path`.
///
/// A missing file falls back to defaults, which still pick up environment
/// overrides. The flag reports whether the file was read.
fn load_config(path: &Path) -> Result<(SimulationConfig, bool), EngineError> {
    if path.exists() {
        Ok((SimulationConfig::from_file(path)?, true))
    } else {
        Ok((SimulationConfig::parse("")?, false))
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `logging.level`.
fn init_logging(config: &SimulationConfig) -> Result<(), EngineError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .map_err(|e| EngineError::Logging {
            message: format!("invalid log level {:?}: {e}", config.logging.level),
        })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = if config.logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| EngineError::Logging {
        message: e.to_string(),
    })
}
