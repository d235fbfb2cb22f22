//! Error types for the engine binary.
//!
//! [`EngineError`] is the top-level error type that wraps all possible
//! failure modes during engine startup and shutdown.

/// Top-level error for the engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: marsim_core::config::ConfigError,
    },

    /// Calendar initialization failed.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: marsim_core::ClockError,
    },

    /// A clock parameter was out of range.
    #[error("parameter error: {source}")]
    Parameter {
        /// The underlying parameter error.
        #[from]
        source: marsim_core::ParameterError,
    },

    /// The listener worker pool failed to start.
    #[error("executor error: {source}")]
    Executor {
        /// The underlying executor error.
        #[from]
        source: marsim_core::executor::ExecutorError,
    },

    /// The clock thread failed to start.
    #[error("master clock error: {source}")]
    MasterClock {
        /// The underlying master clock error.
        #[from]
        source: marsim_core::MasterClockError,
    },

    /// The task waiting on the clock thread failed.
    #[error("clock task error: {source}")]
    ClockTask {
        /// The underlying join error.
        #[from]
        source: tokio::task::JoinError,
    },

    /// Installing the log subscriber failed.
    #[error("logging error: {message}")]
    Logging {
        /// Description of the logging failure.
        message: String,
    },

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {source}")]
    Signal {
        /// The underlying I/O error.
        source: std::io::Error,
    },
}
