//! Persisted controller state.
//!
//! A single JSON document holding the configured node list and the last
//! playback and scheduling parameters. Loaded at controller startup,
//! rewritten on any node-list or parameter change and at shutdown. Writes
//! are atomic (temp file + rename) to survive a crash mid-write.

use std::path::Path;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::registry::NodeConfig;
use crate::scheduler::{PlaySettings, ScheduleConfig};

fn default_volume() -> u8 {
    75
}

fn default_playcount() -> u32 {
    1
}

fn default_start_time() -> NaiveTime {
    NaiveTime::from_hms_opt(0, 0, 0).expect("valid time")
}

fn default_end_time() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 0).expect("valid time")
}

/// `HH:mm` (de)serialization for the window bounds.
mod hhmm {
    use chrono::NaiveTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let text = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&text, FORMAT).map_err(serde::de::Error::custom)
    }
}

/// The controller's persisted configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerState {
    /// Configured playback nodes.
    #[serde(default)]
    pub servers: Vec<NodeConfig>,

    /// Last playback filename.
    #[serde(default)]
    pub filename: String,

    /// Last playback volume, 0-100.
    #[serde(default = "default_volume")]
    pub volume: u8,

    /// Last playback repeat count.
    #[serde(default = "default_playcount")]
    pub playcount: u32,

    /// Auto-play interval in minutes; 0 disables scheduling.
    #[serde(default)]
    pub interval: u32,

    /// Start of the daily auto-play window.
    #[serde(default = "default_start_time", with = "hhmm")]
    pub start_time: NaiveTime,

    /// End of the daily auto-play window.
    #[serde(default = "default_end_time", with = "hhmm")]
    pub end_time: NaiveTime,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            filename: String::new(),
            volume: default_volume(),
            playcount: default_playcount(),
            interval: 0,
            start_time: default_start_time(),
            end_time: default_end_time(),
        }
    }
}

impl ControllerState {
    /// Loads the state document, or defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, StateError> {
        if !path.exists() {
            log::info!("No saved state at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let state = serde_json::from_str(&contents)?;
        log::info!("State loaded from {}", path.display());
        Ok(state)
    }

    /// Writes the state document atomically, creating parent directories
    /// as needed.
    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        let temp = path.with_extension("json.tmp");
        std::fs::write(&temp, contents)?;
        std::fs::rename(&temp, path)?;
        log::info!("State saved to {}", path.display());
        Ok(())
    }

    /// The schedule view of this state.
    pub fn schedule_config(&self) -> ScheduleConfig {
        ScheduleConfig {
            interval_minutes: self.interval,
            window_start: self.start_time,
            window_end: self.end_time,
            play: self.play_settings(),
        }
    }

    /// The playback-parameter view of this state.
    pub fn play_settings(&self) -> PlaySettings {
        PlaySettings {
            filename: self.filename.clone(),
            volume: self.volume,
            playcount: self.playcount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> ControllerState {
        ControllerState {
            servers: vec![
                NodeConfig {
                    name: "Living Room".into(),
                    hostname: "192.168.1.100".into(),
                    port: 9915,
                },
                NodeConfig {
                    name: "Garden".into(),
                    hostname: "garden-pi.local".into(),
                    port: 9920,
                },
            ],
            filename: "heartbeat.mp3".into(),
            volume: 60,
            playcount: 3,
            interval: 45,
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(17, 30, 0).unwrap(),
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let state = sample_state();
        state.save(&path).unwrap();
        let loaded = ControllerState::load(&path).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn window_bounds_serialize_as_hh_mm() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        sample_state().save(&path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains(r#""start_time": "09:00""#));
        assert!(raw.contains(r#""end_time": "17:30""#));
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let state = ControllerState::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(state, ControllerState::default());
    }

    #[test]
    fn partial_document_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"filename": "a.mp3"}"#).unwrap();
        let state = ControllerState::load(&path).unwrap();
        assert_eq!(state.filename, "a.mp3");
        assert_eq!(state.volume, 75);
        assert_eq!(state.playcount, 1);
        assert_eq!(state.interval, 0);
    }

    #[test]
    fn corrupt_document_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            ControllerState::load(&path),
            Err(StateError::Format(_))
        ));
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config/state.json");
        sample_state().save(&path).unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn schedule_view_matches_fields() {
        let state = sample_state();
        let schedule = state.schedule_config();
        assert_eq!(schedule.interval_minutes, 45);
        assert_eq!(schedule.window_start, state.start_time);
        assert_eq!(schedule.window_end, state.end_time);
        assert_eq!(schedule.play.filename, "heartbeat.mp3");
        assert_eq!(schedule.play.volume, 60);
        assert_eq!(schedule.play.playcount, 3);
    }
}
