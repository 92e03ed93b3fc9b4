// Configuration management for Camguard

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::encoding::VideoCodec;
use crate::motion::{DEFAULT_BOX_MARGIN, DEFAULT_HOLD_OFF_SECS};
use crate::schedule::{verify_schedule, Schedule, ScheduleError};
use crate::storage::RetentionPolicy;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Folder recordings are stored under (in a `videos` subfolder)
    pub save_folder_path: PathBuf,

    /// Recordings rotate to a new file after this many seconds
    #[serde(default = "default_file_duration_secs")]
    pub file_duration_secs: f64,

    /// Connect every configured camera when the application starts
    #[serde(default)]
    pub connect_to_cameras_on_startup: bool,

    /// Weekday by hour matrix of when to record. Empty or all false means
    /// recording is started and stopped by hand.
    #[serde(default = "default_schedule")]
    pub recording_schedule: Schedule,

    /// Weekday by hour matrix of when motion detection runs
    #[serde(default = "default_schedule")]
    pub motion_schedule: Schedule,

    /// Day folders kept before the oldest is deleted
    #[serde(default = "default_max_days_to_store")]
    pub max_days_to_store: usize,

    /// Disk usage percentage above which the oldest day folder is deleted
    #[serde(default = "default_max_percent_used_space")]
    pub max_percent_used_space: f64,

    #[serde(default)]
    pub recording_codec: VideoCodec,

    /// Seconds without motion before a motion recording closes
    #[serde(default = "default_motion_hold_off_secs")]
    pub motion_hold_off_secs: f64,

    /// Margin added around detected motion, in analysis pixels
    #[serde(default = "default_motion_box_margin_px")]
    pub motion_box_margin_px: i32,

    #[serde(default = "default_disk_check_period_secs")]
    pub disk_check_period_secs: u64,

    /// Camera database location. Defaults to `cameras.json` next to the config.
    #[serde(default)]
    pub camera_database_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            save_folder_path: get_default_save_folder(),
            file_duration_secs: default_file_duration_secs(),
            connect_to_cameras_on_startup: false,
            recording_schedule: default_schedule(),
            motion_schedule: default_schedule(),
            max_days_to_store: default_max_days_to_store(),
            max_percent_used_space: default_max_percent_used_space(),
            recording_codec: VideoCodec::default(),
            motion_hold_off_secs: default_motion_hold_off_secs(),
            motion_box_margin_px: default_motion_box_margin_px(),
            disk_check_period_secs: default_disk_check_period_secs(),
            camera_database_path: None,
        }
    }
}

impl AppConfig {
    /// Load config from the default location or return defaults
    pub fn load_or_default() -> Self {
        let config_path = get_config_path();

        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => log::warn!("[Config] Failed to load {}: {}", config_path.display(), e),
            }
        }

        Self::default()
    }

    /// Load config from a file. Malformed schedules are replaced by defaults.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&contents)?;

        if let Err(e) = verify_schedule("recording", &config.recording_schedule) {
            log::warn!("[Config] {}, using the default schedule", e);
            config.recording_schedule = default_schedule();
        }
        if let Err(e) = verify_schedule("motion", &config.motion_schedule) {
            log::warn!("[Config] {}, using the default schedule", e);
            config.motion_schedule = default_schedule();
        }

        Ok(config)
    }

    /// Save config to the default location
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&get_config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        log::info!("[Config] Saved {}", path.display());

        Ok(())
    }

    pub fn set_recording_schedule(&mut self, schedule: Schedule) -> Result<(), ScheduleError> {
        verify_schedule("recording", &schedule)?;
        self.recording_schedule = schedule;
        Ok(())
    }

    pub fn set_motion_schedule(&mut self, schedule: Schedule) -> Result<(), ScheduleError> {
        verify_schedule("motion", &schedule)?;
        self.motion_schedule = schedule;
        Ok(())
    }

    /// Root folder stream processors record into
    pub fn videos_folder(&self) -> PathBuf {
        self.save_folder_path.join("videos")
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_days: self.max_days_to_store,
            max_percent_used: self.max_percent_used_space,
        }
    }

    pub fn disk_check_period(&self) -> Duration {
        Duration::from_secs(self.disk_check_period_secs.max(1))
    }

    pub fn camera_database_path(&self) -> PathBuf {
        self.camera_database_path
            .clone()
            .unwrap_or_else(|| get_config_dir().join("cameras.json"))
    }
}

/// Get the default folder for recordings
fn get_default_save_folder() -> PathBuf {
    dirs::video_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Videos")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Camguard")
}

fn get_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("camguard")
}

/// Get the config file path
fn get_config_path() -> PathBuf {
    get_config_dir().join("config.toml")
}

fn default_schedule() -> Schedule {
    Schedule::uniform(true)
}

fn default_file_duration_secs() -> f64 {
    600.0
}

fn default_max_days_to_store() -> usize {
    7
}

fn default_max_percent_used_space() -> f64 {
    90.0
}

fn default_motion_hold_off_secs() -> f64 {
    DEFAULT_HOLD_OFF_SECS
}

fn default_motion_box_margin_px() -> i32 {
    DEFAULT_BOX_MARGIN
}

fn default_disk_check_period_secs() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_load_keep_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig {
            save_folder_path: dir.path().join("recordings"),
            connect_to_cameras_on_startup: true,
            recording_codec: VideoCodec::H264,
            ..AppConfig::default()
        };
        let mut schedule = Schedule::uniform(false);
        schedule.set(0, 8, true);
        config.set_recording_schedule(schedule).unwrap();
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.videos_folder(), dir.path().join("recordings").join("videos"));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "save_folder_path = \"/srv/cams\"\n").unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.save_folder_path, PathBuf::from("/srv/cams"));
        assert_eq!(config.file_duration_secs, 600.0);
        assert_eq!(config.max_days_to_store, 7);
        assert_eq!(config.motion_hold_off_secs, 10.0);
        assert_eq!(config.motion_box_margin_px, 10);
        assert_eq!(config.recording_schedule, Schedule::uniform(true));
        assert_eq!(config.disk_check_period(), Duration::from_secs(60));
    }

    #[test]
    fn malformed_schedule_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "save_folder_path = \"/srv/cams\"\nmotion_schedule = [[true, false]]\n",
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.motion_schedule, Schedule::uniform(true));
    }

    #[test]
    fn schedule_setters_reject_bad_shapes() {
        let mut config = AppConfig::default();
        let bad = Schedule::from_rows(vec![vec![true; 23]; 7]);
        assert!(config.set_motion_schedule(bad.clone()).is_err());
        assert!(config.set_recording_schedule(bad).is_err());
        assert_eq!(config.motion_schedule, Schedule::uniform(true));

        config.set_recording_schedule(Schedule::empty()).unwrap();
        assert!(config.recording_schedule.is_empty());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }
}
