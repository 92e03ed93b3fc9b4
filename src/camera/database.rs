// Versioned camera database stored as JSON
//
// Older files are upgraded at load time, one migration per schema bump.
// Saving always writes the current version.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{CameraConfig, CameraId, MotionDetectorMode, MotionRegion};

pub const CURRENT_VERSION: u32 = 3;

/// Error type for camera database operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported camera database version {0}")]
    UnsupportedVersion(u32),

    #[error("Camera {0} already exists")]
    DuplicateCamera(CameraId),

    #[error("Camera {0} not found")]
    CameraNotFound(CameraId),
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

#[derive(Deserialize)]
struct VersionHeader {
    version: u32,
}

#[derive(Serialize, Deserialize)]
struct DatabaseFile<T> {
    version: u32,
    cameras: Vec<T>,
}

/// Version 1: connection details only
#[derive(Debug, Clone, Deserialize)]
struct CameraRecordV1 {
    camera_id: CameraId,
    rtsp_url: String,
    #[serde(default)]
    storage_http_url: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default = "default_true")]
    enable_scheduled_recording: bool,
}

/// Version 2: adds motion detection settings
#[derive(Debug, Clone, Deserialize)]
struct CameraRecordV2 {
    #[serde(flatten)]
    base: CameraRecordV1,
    motion_detector_mode: MotionDetectorMode,
    shrink_video_frames: bool,
    pixel_threshold: u8,
    max_motion_std_dev: f64,
    min_motion_area_fraction: f64,
    motion_smoothing_factor: f64,
    #[serde(default)]
    motion_regions: Vec<MotionRegion>,
}

fn migrate_v1_to_v2(record: CameraRecordV1) -> CameraRecordV2 {
    let defaults = CameraConfig::new(record.camera_id, "");
    CameraRecordV2 {
        base: record,
        motion_detector_mode: MotionDetectorMode::Off,
        shrink_video_frames: defaults.shrink_video_frames,
        pixel_threshold: defaults.pixel_threshold,
        max_motion_std_dev: defaults.max_motion_std_dev,
        min_motion_area_fraction: defaults.min_motion_area_fraction,
        motion_smoothing_factor: defaults.motion_smoothing_factor,
        motion_regions: Vec::new(),
    }
}

/// Version 3 renames `rtsp_url` to `stream_url` and adds the fps cap and
/// the motion recording switch.
fn migrate_v2_to_v3(record: CameraRecordV2) -> CameraConfig {
    let mut camera = CameraConfig::new(record.base.camera_id, record.base.rtsp_url);
    camera.storage_http_url = record.base.storage_http_url;
    camera.description = record.base.description;
    camera.username = record.base.username;
    camera.password = record.base.password;
    camera.enable_scheduled_recording = record.base.enable_scheduled_recording;
    camera.motion_detector_mode = record.motion_detector_mode;
    camera.shrink_video_frames = record.shrink_video_frames;
    camera.pixel_threshold = record.pixel_threshold;
    camera.max_motion_std_dev = record.max_motion_std_dev;
    camera.min_motion_area_fraction = record.min_motion_area_fraction;
    camera.motion_smoothing_factor = record.motion_smoothing_factor;
    camera.motion_regions = record.motion_regions;
    camera
}

/// In-memory camera list backed by a JSON file
#[derive(Debug, Clone)]
pub struct CameraDatabase {
    path: PathBuf,
    cameras: Vec<CameraConfig>,
}

impl CameraDatabase {
    /// Empty database that will save to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cameras: Vec::new(),
        }
    }

    /// Load from `path`, upgrading older schema versions.
    ///
    /// A missing file yields an empty database.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            log::info!("[Cameras] No camera database at {}, starting empty", path.display());
            return Ok(Self::new(path));
        }

        let contents = std::fs::read_to_string(&path)?;
        let cameras = parse_cameras(&contents)?;
        log::info!("[Cameras] Loaded {} camera(s) from {}", cameras.len(), path.display());

        Ok(Self { path, cameras })
    }

    /// Write the current schema to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = DatabaseFile {
            version: CURRENT_VERSION,
            cameras: self.cameras.clone(),
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cameras(&self) -> &[CameraConfig] {
        &self.cameras
    }

    pub fn camera_count(&self) -> usize {
        self.cameras.len()
    }

    pub fn find_camera(&self, id: CameraId) -> Option<&CameraConfig> {
        self.cameras.iter().find(|c| c.camera_id == id)
    }

    pub fn add_camera(&mut self, camera: CameraConfig) -> Result<()> {
        if self.find_camera(camera.camera_id).is_some() {
            return Err(DatabaseError::DuplicateCamera(camera.camera_id));
        }
        self.cameras.push(camera);
        self.cameras.sort_by_key(|c| c.camera_id);
        Ok(())
    }

    pub fn update_camera(&mut self, camera: CameraConfig) -> Result<()> {
        let slot = self
            .cameras
            .iter_mut()
            .find(|c| c.camera_id == camera.camera_id)
            .ok_or(DatabaseError::CameraNotFound(camera.camera_id))?;
        *slot = camera;
        Ok(())
    }

    pub fn remove_camera(&mut self, id: CameraId) -> Result<CameraConfig> {
        let index = self
            .cameras
            .iter()
            .position(|c| c.camera_id == id)
            .ok_or(DatabaseError::CameraNotFound(id))?;
        Ok(self.cameras.remove(index))
    }
}

fn parse_cameras(contents: &str) -> Result<Vec<CameraConfig>> {
    let header: VersionHeader = serde_json::from_str(contents)?;
    let cameras = match header.version {
        1 => {
            let file: DatabaseFile<CameraRecordV1> = serde_json::from_str(contents)?;
            log::info!("[Cameras] Migrating camera database from version 1");
            file.cameras
                .into_iter()
                .map(migrate_v1_to_v2)
                .map(migrate_v2_to_v3)
                .collect()
        }
        2 => {
            let file: DatabaseFile<CameraRecordV2> = serde_json::from_str(contents)?;
            log::info!("[Cameras] Migrating camera database from version 2");
            file.cameras.into_iter().map(migrate_v2_to_v3).collect()
        }
        CURRENT_VERSION => {
            let file: DatabaseFile<CameraConfig> = serde_json::from_str(contents)?;
            file.cameras
        }
        other => return Err(DatabaseError::UnsupportedVersion(other)),
    };
    Ok(cameras)
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let db = CameraDatabase::load(dir.path().join("cameras.json")).unwrap();
        assert_eq!(db.camera_count(), 0);
    }

    #[test]
    fn save_and_reload_current_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cameras.json");

        let mut db = CameraDatabase::new(&path);
        let mut cam = CameraConfig::new(CameraId::Cam2, "rtsp://10.0.0.2/live");
        cam.motion_detector_mode = MotionDetectorMode::Medium;
        cam.motion_regions.push(MotionRegion::new(0.1, 0.1, 0.2, 0.2));
        db.add_camera(cam.clone()).unwrap();
        db.save().unwrap();

        let reloaded = CameraDatabase::load(&path).unwrap();
        assert_eq!(reloaded.cameras(), &[cam]);
    }

    #[test]
    fn version_one_file_is_migrated() {
        let json = r#"{
            "version": 1,
            "cameras": [
                { "camera_id": "cam3", "rtsp_url": "rtsp://old/stream", "username": "a", "password": "b" }
            ]
        }"#;
        let cameras = parse_cameras(json).unwrap();
        assert_eq!(cameras.len(), 1);
        let cam = &cameras[0];
        assert_eq!(cam.camera_id, CameraId::Cam3);
        assert_eq!(cam.stream_url, "rtsp://old/stream");
        assert_eq!(cam.motion_detector_mode, MotionDetectorMode::Off);
        assert_eq!(cam.camera_max_fps, 25.0);
        assert!(cam.motion_recording_enabled);
        assert!(cam.enable_scheduled_recording);
    }

    #[test]
    fn version_two_keeps_motion_settings() {
        let json = r#"{
            "version": 2,
            "cameras": [{
                "camera_id": "cam1",
                "rtsp_url": "http://cam/mjpg",
                "enable_scheduled_recording": false,
                "motion_detector_mode": "manual",
                "shrink_video_frames": false,
                "pixel_threshold": 25,
                "max_motion_std_dev": 50.0,
                "min_motion_area_fraction": 0.03,
                "motion_smoothing_factor": 0.5,
                "motion_regions": [{ "left": 0.0, "top": 0.0, "width": 0.5, "height": 0.5 }]
            }]
        }"#;
        let cameras = parse_cameras(json).unwrap();
        let cam = &cameras[0];
        assert_eq!(cam.motion_detector_mode, MotionDetectorMode::Manual);
        assert_eq!(cam.pixel_threshold, 25);
        assert!(!cam.shrink_video_frames);
        assert!(!cam.enable_scheduled_recording);
        assert_eq!(cam.motion_regions.len(), 1);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let json = r#"{ "version": 99, "cameras": [] }"#;
        assert!(matches!(
            parse_cameras(json),
            Err(DatabaseError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn add_update_remove() {
        let mut db = CameraDatabase::new("unused.json");
        db.add_camera(CameraConfig::new(CameraId::Cam4, "0")).unwrap();
        db.add_camera(CameraConfig::new(CameraId::Cam1, "1")).unwrap();
        assert!(matches!(
            db.add_camera(CameraConfig::new(CameraId::Cam1, "2")),
            Err(DatabaseError::DuplicateCamera(CameraId::Cam1))
        ));
        assert_eq!(db.cameras()[0].camera_id, CameraId::Cam1);

        let mut updated = CameraConfig::new(CameraId::Cam4, "rtsp://new");
        updated.description = "porch".into();
        db.update_camera(updated).unwrap();
        assert_eq!(db.find_camera(CameraId::Cam4).unwrap().description, "porch");

        db.remove_camera(CameraId::Cam4).unwrap();
        assert!(db.find_camera(CameraId::Cam4).is_none());
        assert!(db.remove_camera(CameraId::Cam4).is_err());
    }
}
