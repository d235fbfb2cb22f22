//! JSON snapshot persistence for the engine.
//!
//! The clock core only knows the [`SimulationPersistence`] port. The
//! engine plugs in this implementation, which writes the clock snapshot as
//! pretty-printed JSON. Default saves go to `<save_dir>/default.json`,
//! autosaves to `<save_dir>/autosave.json`, and save-as requests to the
//! path they name.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use marsim_core::persistence::PersistenceError;
use marsim_core::{ClockSnapshot, SaveMode, SaveRequest, SimulationPersistence};
use serde::Serialize;
use tracing::debug;

/// Name of the default save file inside the save directory.
pub const DEFAULT_SAVE_FILE: &str = "default.json";

/// Name of the autosave file inside the save directory.
pub const AUTOSAVE_FILE: &str = "autosave.json";

/// On-disk save document.
#[derive(Debug, Serialize)]
struct SaveDocument<'a> {
    /// Kind of save that produced the file.
    mode: SaveMode,
    /// Real time the file was written.
    saved_at: DateTime<Utc>,
    /// The clock state.
    clock: &'a ClockSnapshot,
}

/// Writes clock snapshots as JSON files.
#[derive(Debug, Clone)]
pub struct JsonSnapshotPersistence {
    save_dir: PathBuf,
}

impl JsonSnapshotPersistence {
    /// Save into `save_dir`, creating it on first save.
    pub const fn new(save_dir: PathBuf) -> Self {
        Self { save_dir }
    }

    /// Directory that receives default saves and autosaves.
    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    /// File a request will be written to.
    pub fn target(&self, request: &SaveRequest) -> PathBuf {
        match (request.mode, request.destination()) {
            (_, Some(path)) => path.to_path_buf(),
            (SaveMode::Autosave, None) => self.save_dir.join(AUTOSAVE_FILE),
            (SaveMode::Default | SaveMode::SaveAs, None) => self.save_dir.join(DEFAULT_SAVE_FILE),
        }
    }
}

impl SimulationPersistence for JsonSnapshotPersistence {
    fn save(&self, request: &SaveRequest, clock: &ClockSnapshot) -> Result<(), PersistenceError> {
        let path = self.target(request);
        let document = SaveDocument {
            mode: request.mode,
            saved_at: Utc::now(),
            clock,
        };
        let json = serde_json::to_string_pretty(&document)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| PersistenceError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&path, json).map_err(|source| PersistenceError::Io {
            path: path.clone(),
            source,
        })?;

        debug!(path = %path.display(), mode = ?request.mode, "Snapshot written");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use marsim_core::{EarthTime, MarsTime, RunState};

    use super::*;

    fn snapshot() -> ClockSnapshot {
        let mars = MarsTime::parse("15-Adir-01:000.000").unwrap();
        ClockSnapshot {
            mars_time: mars,
            initial_mars_time: mars,
            earth_time: EarthTime::parse("09/30/2043 00:00:00").unwrap(),
            time_ratio: 1024.0,
            total_pulses: 42,
            uptime_ms: 1_680,
            run_state: RunState::Running,
        }
    }

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("marsim-{name}-{}", std::process::id()))
    }

    #[test]
    fn targets_follow_mode() {
        let persistence = JsonSnapshotPersistence::new(PathBuf::from("saved"));
        let default = SaveRequest {
            mode: SaveMode::Default,
            destination: None,
        };
        let autosave = SaveRequest {
            mode: SaveMode::Autosave,
            destination: None,
        };
        let save_as = SaveRequest {
            mode: SaveMode::SaveAs,
            destination: Some(PathBuf::from("elsewhere/colony.json")),
        };
        assert_eq!(persistence.target(&default), PathBuf::from("saved/default.json"));
        assert_eq!(persistence.target(&autosave), PathBuf::from("saved/autosave.json"));
        assert_eq!(persistence.target(&save_as), PathBuf::from("elsewhere/colony.json"));
    }

    #[test]
    fn writes_snapshot_json() {
        let dir = scratch_dir("snapshot");
        let persistence = JsonSnapshotPersistence::new(dir.clone());
        let request = SaveRequest {
            mode: SaveMode::Default,
            destination: None,
        };
        persistence.save(&request, &snapshot()).unwrap();

        let written = std::fs::read_to_string(dir.join(DEFAULT_SAVE_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(value["mode"], "Default");
        assert_eq!(value["clock"]["total_pulses"], 42);
        assert_eq!(value["clock"]["run_state"], "Running");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unwritable_destination_is_an_io_error() {
        let dir = scratch_dir("blocked");
        std::fs::create_dir_all(&dir).unwrap();
        let blocker = dir.join("file");
        std::fs::write(&blocker, "not a directory").unwrap();

        let persistence = JsonSnapshotPersistence::new(blocker.join("nested"));
        let request = SaveRequest {
            mode: SaveMode::Autosave,
            destination: None,
        };
        let err = persistence.save(&request, &snapshot()).unwrap_err();
        assert!(matches!(err, PersistenceError::Io { .. }));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
