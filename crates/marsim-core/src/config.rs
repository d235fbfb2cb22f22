//! Configuration loading and typed config structures for the Marsim clock.
//!
//! The canonical configuration lives in `marsim-config.yaml` at the project
//! root. This module defines strongly-typed structs that mirror the YAML
//! structure, and provides a loader that reads and validates the file.
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::clock::{ClockError, DualClock};
use crate::control::{
    ClockControl, ParameterError, validate_max_frame_skips, validate_no_delays_per_yield,
    validate_time_between_updates, validate_time_ratio,
};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A clock parameter is out of range.
    #[error("invalid clock parameter: {source}")]
    Parameter {
        /// The underlying range error.
        #[from]
        source: ParameterError,
    },

    /// A start date-time is unparsable.
    #[error("invalid start time: {source}")]
    StartTime {
        /// The underlying parse error.
        #[from]
        source: ClockError,
    },

    /// An environment override could not be parsed.
    #[error("invalid value {value:?} for environment variable {name}: {reason}")]
    EnvOverride {
        /// Variable name.
        name: &'static str,
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The listener pool needs at least one thread and one queue slot.
    #[error("listener pool {field} must be at least 1")]
    PoolSize {
        /// Which size was zero.
        field: &'static str,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level simulation configuration.
///
/// Mirrors the structure of `marsim-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// Clock timing and start times.
    #[serde(default)]
    pub clock: ClockConfig,

    /// Listener worker pool.
    #[serde(default)]
    pub listeners: ListenerPoolConfig,

    /// Autosave cadence.
    #[serde(default)]
    pub autosave: AutosaveConfig,

    /// Where saves are written.
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SimulationConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `MARSIM_TIME_RATIO` overrides `clock.time_ratio`
    /// - `MARSIM_SAVE_DIR` overrides `persistence.save_dir`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or a range
    /// error if a value is out of bounds.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, apply environment
    /// overrides, and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or a
    /// range error if a value is out of bounds.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Override values with environment variables when set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EnvOverride`] if a variable is set to an
    /// unparsable value.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup("MARSIM_TIME_RATIO") {
            let parsed = value.trim().parse::<f64>();
            self.clock.time_ratio = parsed.map_err(|e| ConfigError::EnvOverride {
                name: "MARSIM_TIME_RATIO",
                value,
                reason: e.to_string(),
            })?;
        }
        if let Some(value) = lookup("MARSIM_SAVE_DIR") {
            self.persistence.save_dir = PathBuf::from(value);
        }
        Ok(())
    }

    /// Check every section against its legal ranges.
    ///
    /// # Errors
    ///
    /// Returns the first range violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.clock.validate()?;
        self.listeners.validate()?;
        Ok(())
    }
}

/// Clock timing and start times.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClockConfig {
    /// Mars start time, `orbit-Month-sol:millisol`.
    #[serde(default = "default_mars_start")]
    pub mars_start: String,

    /// Earth start time, `MM/dd/yyyy HH:mm:ss`.
    #[serde(default = "default_earth_start")]
    pub earth_start: String,

    /// Simulated seconds per real second.
    #[serde(default = "default_time_ratio")]
    pub time_ratio: f64,

    /// Target real milliseconds between pulses.
    #[serde(default = "default_time_between_updates_ms")]
    pub time_between_updates_ms: u64,

    /// Cap on catch-up frames per cycle.
    #[serde(default = "default_max_frame_skips")]
    pub max_frame_skips: u32,

    /// Consecutive overruns before the clock thread yields.
    #[serde(default = "default_no_delays_per_yield")]
    pub no_delays_per_yield: u32,

    /// Derive the ratio and period from the listener thread count.
    #[serde(default)]
    pub scale_for_threads: bool,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            mars_start: default_mars_start(),
            earth_start: default_earth_start(),
            time_ratio: default_time_ratio(),
            time_between_updates_ms: default_time_between_updates_ms(),
            max_frame_skips: default_max_frame_skips(),
            no_delays_per_yield: default_no_delays_per_yield(),
            scale_for_threads: false,
        }
    }
}

impl ClockConfig {
    /// Check the timing parameters against the control-surface ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError`] for the first value out of range.
    pub fn validate(&self) -> Result<(), ParameterError> {
        validate_time_ratio(self.time_ratio)?;
        validate_time_between_updates(self.time_between_updates_ms)?;
        validate_max_frame_skips(self.max_frame_skips)?;
        validate_no_delays_per_yield(self.no_delays_per_yield)?;
        Ok(())
    }

    /// Slow the clock down on machines with few threads: fewer threads
    /// get a lower time ratio and a longer period. The scaled ratio is
    /// clamped into the legal range.
    #[must_use]
    pub fn scaled_for_threads(&self, threads: usize) -> Self {
        let (ratio_divisor, period_factor) = match threads {
            0 | 1 => (8.0, 16),
            2 => (8.0, 12),
            3 => (4.0, 8),
            4 => (4.0, 4),
            5 | 6 => (2.0, 2),
            7 | 8 => (2.0, 1),
            _ => (1.0, 1),
        };
        let time_ratio = (self.time_ratio / ratio_divisor).clamp(
            crate::control::MIN_TIME_RATIO,
            crate::control::MAX_TIME_RATIO,
        );
        let time_between_updates_ms = self
            .time_between_updates_ms
            .saturating_mul(period_factor)
            .min(crate::control::MAX_TIME_BETWEEN_UPDATES_MS);
        Self {
            time_ratio,
            time_between_updates_ms,
            ..self.clone()
        }
    }

    /// Build the shared control state from this config.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError`] if a value is out of range.
    pub fn control(&self) -> Result<ClockControl, ParameterError> {
        ClockControl::new(
            self.time_ratio,
            self.time_between_updates_ms,
            self.max_frame_skips,
            self.no_delays_per_yield,
        )
    }

    /// Build the calendars from the configured start times.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidDateTime`] if a start time is unparsable.
    pub fn dual_clock(&self) -> Result<DualClock, ClockError> {
        DualClock::new(&self.mars_start, &self.earth_start)
    }
}

/// Listener worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListenerPoolConfig {
    /// Number of worker threads.
    #[serde(default = "default_pool_concurrency")]
    pub concurrency: usize,

    /// Bounded queue capacity; submissions beyond it are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ListenerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: default_pool_concurrency(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl ListenerPoolConfig {
    /// Check that both sizes are non-zero.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::PoolSize`] naming the zero field.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::PoolSize {
                field: "concurrency",
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::PoolSize {
                field: "queue_capacity",
            });
        }
        Ok(())
    }
}

/// Autosave configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AutosaveConfig {
    /// Whether autosave runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Real minutes between autosaves.
    #[serde(default = "default_autosave_interval_minutes")]
    pub interval_minutes: u64,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: default_autosave_interval_minutes(),
        }
    }
}

impl AutosaveConfig {
    /// Interval in real milliseconds.
    pub const fn interval_ms(&self) -> u64 {
        self.interval_minutes.saturating_mul(60_000)
    }
}

/// Save location configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PersistenceConfig {
    /// Directory that receives default saves and autosaves.
    #[serde(default = "default_save_dir")]
    pub save_dir: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            save_dir: default_save_dir(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error), used when `RUST_LOG`
    /// is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,

    /// Every this many pulses the pulse logger reports the clock.
    #[serde(default = "default_report_every_pulses")]
    pub report_every_pulses: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            report_every_pulses: default_report_every_pulses(),
        }
    }
}

fn default_mars_start() -> String {
    "15-Adir-01:000.000".to_owned()
}

fn default_earth_start() -> String {
    "09/30/2043 00:00:00".to_owned()
}

const fn default_time_ratio() -> f64 {
    1024.0
}

const fn default_time_between_updates_ms() -> u64 {
    40
}

const fn default_max_frame_skips() -> u32 {
    10
}

const fn default_no_delays_per_yield() -> u32 {
    16
}

const fn default_pool_concurrency() -> usize {
    1
}

const fn default_queue_capacity() -> usize {
    1024
}

const fn default_autosave_interval_minutes() -> u64 {
    15
}

fn default_save_dir() -> PathBuf {
    PathBuf::from("saved")
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_report_every_pulses() -> u64 {
    250
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SimulationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.clock.time_ratio, 1024.0);
        assert_eq!(config.clock.time_between_updates_ms, 40);
        assert_eq!(config.listeners.queue_capacity, 1024);
        assert_eq!(config.autosave.interval_ms(), 900_000);
        assert!(config.clock.dual_clock().is_ok());
        assert!(config.clock.control().is_ok());
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
clock:
  mars_start: "01-Bora-03:500.000"
  earth_start: "2044-01-01 12:00:00"
  time_ratio: 256
  time_between_updates_ms: 25
  max_frame_skips: 5
  no_delays_per_yield: 8
  scale_for_threads: true

listeners:
  concurrency: 4
  queue_capacity: 64

autosave:
  enabled: false
  interval_minutes: 5

persistence:
  save_dir: "/tmp/marsim"

logging:
  level: "debug"
  json: true
  report_every_pulses: 10
"#;

        let config: SimulationConfig = serde_yml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.clock.time_ratio, 256.0);
        assert_eq!(config.clock.max_frame_skips, 5);
        assert!(config.clock.scale_for_threads);
        assert_eq!(config.listeners.concurrency, 4);
        assert!(!config.autosave.enabled);
        assert_eq!(config.persistence.save_dir, PathBuf::from("/tmp/marsim"));
        assert!(config.logging.json);

        let clock = config.clock.dual_clock().unwrap();
        assert_eq!(clock.simulated_time().to_string(), "01-Bora-03:500.000");
    }

    #[test]
    fn parse_minimal_yaml() {
        let yaml = "clock:\n  max_frame_skips: 20\n";
        let config: SimulationConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.clock.max_frame_skips, 20);
        assert_eq!(config.clock.time_between_updates_ms, 40);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn parse_empty_yaml() {
        let config = SimulationConfig::parse("");
        assert!(config.is_ok());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let config: SimulationConfig =
            serde_yml::from_str("clock:\n  time_ratio: 5000\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Parameter {
                source: ParameterError::TimeRatioOutOfRange { .. }
            })
        ));

        let config: SimulationConfig =
            serde_yml::from_str("listeners:\n  concurrency: 0\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PoolSize {
                field: "concurrency"
            })
        ));
    }

    #[test]
    fn overrides_replace_yaml_values() {
        let mut config = SimulationConfig::default();
        config
            .apply_overrides(|name| match name {
                "MARSIM_TIME_RATIO" => Some(" 512 ".to_owned()),
                "MARSIM_SAVE_DIR" => Some("/var/marsim".to_owned()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.clock.time_ratio, 512.0);
        assert_eq!(config.persistence.save_dir, PathBuf::from("/var/marsim"));

        let err = config
            .apply_overrides(|name| (name == "MARSIM_TIME_RATIO").then(|| "fast".to_owned()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::EnvOverride {
                name: "MARSIM_TIME_RATIO",
                ..
            }
        ));
    }

    #[test]
    fn scaling_follows_thread_count() {
        let base = ClockConfig::default();

        let one = base.scaled_for_threads(1);
        assert_eq!(one.time_ratio, 128.0);
        assert_eq!(one.time_between_updates_ms, 640);

        let two = base.scaled_for_threads(2);
        assert_eq!(two.time_ratio, 128.0);
        assert_eq!(two.time_between_updates_ms, 480);

        let four = base.scaled_for_threads(4);
        assert_eq!(four.time_ratio, 256.0);
        assert_eq!(four.time_between_updates_ms, 160);

        let six = base.scaled_for_threads(6);
        assert_eq!(six.time_ratio, 512.0);
        assert_eq!(six.time_between_updates_ms, 80);

        let eight = base.scaled_for_threads(8);
        assert_eq!(eight.time_ratio, 512.0);
        assert_eq!(eight.time_between_updates_ms, 40);

        let many = base.scaled_for_threads(32);
        assert_eq!(many, base);
        assert!(many.validate().is_ok());
    }

    #[test]
    fn scaling_clamps_into_range() {
        let slow = ClockConfig {
            time_ratio: 64.0,
            time_between_updates_ms: 1_000,
            ..ClockConfig::default()
        };
        let scaled = slow.scaled_for_threads(1);
        assert_eq!(scaled.time_ratio, 16.0);
        assert_eq!(scaled.time_between_updates_ms, 10_800);
        assert!(scaled.validate().is_ok());
    }

    #[test]
    fn load_project_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("marsim-config.yaml");
        if path.exists() {
            let config = SimulationConfig::from_file(&path);
            assert!(config.is_ok(), "Failed to load project config: {config:?}");
        }
    }
}
