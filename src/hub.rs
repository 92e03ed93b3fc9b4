// Camera hub
//
// Owns one stream processor per connected camera and turns their state into
// feed updates for whatever is displaying them.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::camera::{CameraConfig, CameraId};
use crate::capture::CaptureBackend;
use crate::config::AppConfig;
use crate::encoding::VideoSinkFactory;
use crate::frame::DisplayFrame;
use crate::motion::Rect;
use crate::schedule::Schedule;
use crate::stream::{self, StreamProcessor, StreamSettings};

/// New frame and status for one camera
#[derive(Debug, Clone)]
pub struct FeedUpdate {
    pub id: CameraId,
    pub frame: DisplayFrame,
    pub motion_rect: Option<Rect>,
    pub fps: f64,
    pub recording: bool,
}

pub struct CameraHub {
    config: AppConfig,
    capture_backend: Arc<dyn CaptureBackend>,
    sinks: Arc<dyn VideoSinkFactory>,
    processors: BTreeMap<CameraId, StreamProcessor>,
}

impl CameraHub {
    pub fn new(
        config: AppConfig,
        capture_backend: Arc<dyn CaptureBackend>,
        sinks: Arc<dyn VideoSinkFactory>,
    ) -> Self {
        Self {
            config,
            capture_backend,
            sinks,
            processors: BTreeMap::new(),
        }
    }

    /// Settings for a camera under the current application config
    pub fn stream_settings(&self, camera: &CameraConfig) -> StreamSettings {
        let recording_schedule = if camera.enable_scheduled_recording {
            self.config.recording_schedule.clone()
        } else {
            Schedule::empty()
        };
        StreamSettings {
            camera: camera.clone(),
            save_root: self.config.videos_folder(),
            file_duration_secs: self.config.file_duration_secs,
            recording_schedule,
            motion_schedule: self.config.motion_schedule.clone(),
            motion_hold_off_secs: self.config.motion_hold_off_secs,
            motion_box_margin: self.config.motion_box_margin_px,
        }
    }

    /// Connect a camera, replacing any existing connection for its slot
    pub fn connect(&mut self, camera: &CameraConfig) -> stream::Result<()> {
        let id = camera.camera_id;
        if let Some(mut old) = self.processors.remove(&id) {
            log::info!("[Hub] Reconnecting {}", id);
            old.shutdown();
        }

        let processor = StreamProcessor::new(
            self.stream_settings(camera),
            self.capture_backend.clone(),
            self.sinks.clone(),
        )?;
        log::info!("[Hub] Connected {}", id);
        self.processors.insert(id, processor);
        Ok(())
    }

    /// Disconnect a camera. Returns false if it was not connected.
    pub fn disconnect(&mut self, id: CameraId) -> bool {
        match self.processors.remove(&id) {
            Some(mut processor) => {
                processor.shutdown();
                log::info!("[Hub] Disconnected {}", id);
                true
            }
            None => false,
        }
    }

    pub fn disconnect_all(&mut self) {
        let ids: Vec<CameraId> = self.processors.keys().copied().collect();
        for id in ids {
            self.disconnect(id);
        }
    }

    pub fn is_connected(&self, id: CameraId) -> bool {
        self.processors.contains_key(&id)
    }

    pub fn connected(&self) -> Vec<CameraId> {
        self.processors.keys().copied().collect()
    }

    pub fn processor(&self, id: CameraId) -> Option<&StreamProcessor> {
        self.processors.get(&id)
    }

    /// Flip manual recording. Returns the new manual state, or `None` if
    /// the camera is not connected. An open motion recording does not count
    /// as manual recording.
    pub fn toggle_recording(&self, id: CameraId) -> Option<bool> {
        let processor = self.processors.get(&id)?;
        if processor.manual_writing_enabled() {
            processor.stop_video_writing();
        } else {
            processor.start_video_writing();
        }
        Some(processor.manual_writing_enabled())
    }

    /// Updates for every camera that produced a frame since the last poll
    pub fn poll_feeds(&self) -> Vec<FeedUpdate> {
        self.processors
            .iter()
            .filter(|(_, processor)| processor.video_frame_updated())
            .map(|(id, processor)| {
                let current = processor.current_video_frame(true);
                FeedUpdate {
                    id: *id,
                    frame: current.frame.to_display_frame(),
                    motion_rect: current.motion_rect.filter(|rect| !rect.is_empty()),
                    fps: processor.current_fps(),
                    recording: processor.video_writing_enabled(),
                }
            })
            .collect()
    }
}

impl Drop for CameraHub {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::MotionDetectorMode;
    use crate::frame::DisplayFormat;
    use crate::test_support::{frame_with_square, plain_frame, FakeCamera, RecordingSinkFactory};
    use std::time::{Duration, Instant};

    fn hub(dir: &std::path::Path, camera: &FakeCamera) -> CameraHub {
        let config = AppConfig {
            save_folder_path: dir.to_path_buf(),
            recording_schedule: Schedule::empty(),
            ..AppConfig::default()
        };
        CameraHub::new(
            config,
            Arc::new(camera.clone()),
            Arc::new(RecordingSinkFactory::default()),
        )
    }

    fn wait_for_feed(hub: &CameraHub) -> Vec<FeedUpdate> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let feeds = hub.poll_feeds();
            if !feeds.is_empty() || Instant::now() > deadline {
                return feeds;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn scheduled_recording_can_be_disabled_per_camera() {
        let dir = tempfile::tempdir().unwrap();
        let camera = FakeCamera::new(25.0, plain_frame(32, 24, 0));
        let mut hub = hub(dir.path(), &camera);
        hub.config.recording_schedule = Schedule::uniform(true);

        let mut config = CameraConfig::new(CameraId::Cam2, "rtsp://cam2/live");
        assert!(!hub.stream_settings(&config).recording_schedule.is_empty());
        config.enable_scheduled_recording = false;
        let settings = hub.stream_settings(&config);
        assert!(settings.recording_schedule.is_empty());
        assert_eq!(settings.save_root, dir.path().join("videos"));
    }

    #[test]
    fn connect_poll_toggle_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let camera = FakeCamera::new(25.0, plain_frame(32, 24, 0));
        let mut hub = hub(dir.path(), &camera);

        hub.connect(&CameraConfig::new(CameraId::Cam3, "rtsp://cam3/live"))
            .unwrap();
        assert!(hub.is_connected(CameraId::Cam3));
        assert_eq!(hub.connected(), vec![CameraId::Cam3]);

        let feeds = wait_for_feed(&hub);
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].id, CameraId::Cam3);
        assert_eq!(feeds[0].frame.format, DisplayFormat::Rgb8);
        assert_eq!((feeds[0].frame.width, feeds[0].frame.height), (32, 24));
        assert!(!feeds[0].recording);

        assert_eq!(hub.toggle_recording(CameraId::Cam3), Some(true));
        assert_eq!(hub.toggle_recording(CameraId::Cam3), Some(false));
        assert_eq!(hub.toggle_recording(CameraId::Cam1), None);

        assert!(hub.disconnect(CameraId::Cam3));
        assert!(!hub.disconnect(CameraId::Cam3));
        assert!(hub.poll_feeds().is_empty());
    }

    #[test]
    fn toggle_starts_manual_recording_during_motion_recording() {
        let dir = tempfile::tempdir().unwrap();
        let camera = FakeCamera::new(25.0, frame_with_square(64, 48, 20, 200, (16, 12, 12, 10)));
        camera.push_frame(plain_frame(64, 48, 20));
        camera.push_frame(plain_frame(64, 48, 20));
        let mut hub = hub(dir.path(), &camera);
        hub.config.motion_schedule = Schedule::uniform(true);

        let mut config = CameraConfig::new(CameraId::Cam1, "rtsp://cam1/live");
        config.motion_detector_mode = MotionDetectorMode::Medium;
        hub.connect(&config).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let processor = hub.processor(CameraId::Cam1).unwrap();
        while !processor.video_writing_enabled() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(processor.video_writing_enabled());
        assert!(!processor.manual_writing_enabled());

        assert_eq!(hub.toggle_recording(CameraId::Cam1), Some(true));
        assert!(hub.processor(CameraId::Cam1).unwrap().manual_writing_enabled());
        assert_eq!(hub.toggle_recording(CameraId::Cam1), Some(false));
        assert!(!hub.processor(CameraId::Cam1).unwrap().manual_writing_enabled());
    }

    #[test]
    fn failed_connection_leaves_slot_empty() {
        let dir = tempfile::tempdir().unwrap();
        let camera = FakeCamera::new(25.0, plain_frame(32, 24, 0));
        camera.set_fail_open(true);
        let mut hub = hub(dir.path(), &camera);

        assert!(hub
            .connect(&CameraConfig::new(CameraId::Cam1, "rtsp://cam1/live"))
            .is_err());
        assert!(!hub.is_connected(CameraId::Cam1));
    }
}
