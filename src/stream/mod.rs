// Per-camera stream processor
//
// One pump thread per camera grabs a frame every `1000 / fps` ms and runs the
// tick sequence:
//
//   1. grab the next frame into the shared frame slot
//   2. apply the recording schedule, if one governs this camera
//   3. apply the motion schedule: feed the motion detector, or drop it
//   4. open or rotate this processor's own recording file
//   5. append the frame to that file
//   6. check the reported frame rate and reinitialise on drift
//
// The frame slot, the motion detector and the writing flag each sit behind
// their own lock so display reads never wait on a motion pass.

pub mod fps;

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Local};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};

use crate::camera::{CameraConfig, CameraError, MotionDetectorMode, StreamSource};
use crate::capture::{redact_source, CaptureBackend, CaptureError, FrameSource};
use crate::encoding::{open_recording_session, RecordingSession, VideoSinkFactory, WriterError};
use crate::frame::{self, VideoFrame};
use crate::motion::{MotionDetector, MotionSettings, Rect};
use crate::schedule::{self, Schedule, ScheduleError};

pub use fps::{fps_drifted, recording_fps, update_period_ms};

/// Empty grabs are logged on the first occurrence and then every this many
const EMPTY_GRAB_LOG_INTERVAL: u64 = 100;

/// Error type for stream processor construction and ticks
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("Camera configuration error: {0}")]
    Camera(#[from] CameraError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Writer error: {0}")]
    Writer(#[from] WriterError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProcessorError>;

/// Everything a stream processor needs for one session
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub camera: CameraConfig,
    /// Root that dated recording directories are created under
    pub save_root: PathBuf,
    /// Recordings rotate once they reach this duration
    pub file_duration_secs: f64,
    pub recording_schedule: Schedule,
    pub motion_schedule: Schedule,
    pub motion_hold_off_secs: f64,
    pub motion_box_margin: i32,
}

/// A copy of the latest frame, optionally with the motion rectangle
#[derive(Debug, Clone, Default)]
pub struct CurrentFrame {
    pub frame: VideoFrame,
    pub motion_rect: Option<Rect>,
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    /// Rate reported by the capture
    original_fps: f64,
    /// Rate recordings and the pump run at
    fps: f64,
    period_ms: u64,
    width: u32,
    height: u32,
}

impl Timing {
    fn from_capture(capture: &dyn FrameSource, camera_max_fps: f64) -> Self {
        let original_fps = capture.reported_fps();
        let fps = recording_fps(original_fps, camera_max_fps);
        Self {
            original_fps,
            fps,
            period_ms: update_period_ms(fps),
            width: capture.width(),
            height: capture.height(),
        }
    }
}

#[derive(Default)]
struct FrameSlot {
    frame: VideoFrame,
    updated: bool,
}

/// State shared between the pump thread and readers
struct Shared {
    name: String,
    /// A recording schedule with at least one active hour governs writing
    schedule_governs_recording: bool,
    frame: Mutex<FrameSlot>,
    motion: Mutex<Option<MotionDetector>>,
    writing_enabled: Mutex<bool>,
    timing: RwLock<Timing>,
}

/// Handle to a running stream processor
pub struct StreamProcessor {
    shared: Arc<Shared>,
    stop_tx: Option<Sender<()>>,
    pump_handle: Option<JoinHandle<()>>,
}

impl StreamProcessor {
    /// Validate the settings, open the capture and start the pump thread
    pub fn new(
        settings: StreamSettings,
        capture_backend: Arc<dyn CaptureBackend>,
        sinks: Arc<dyn VideoSinkFactory>,
    ) -> Result<Self> {
        let (mut processor, mut pump) = Self::build(settings, capture_backend, sinks)?;
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let shared = processor.shared.clone();

        let handle = std::thread::Builder::new()
            .name(format!("camguard-pump-{}", shared.name))
            .spawn(move || {
                loop {
                    let period = Duration::from_millis(shared.timing.read().period_ms);
                    match stop_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => break,
                    }

                    let result =
                        std::panic::catch_unwind(AssertUnwindSafe(|| pump.tick(&Local::now())));
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => log::error!("[Stream] {}: {}", shared.name, e),
                        Err(_) => log::error!("[Stream] {}: pump tick panicked", shared.name),
                    }
                }
                pump.shutdown();
                log::info!("[Stream] Pump for {} stopped", shared.name);
            })?;

        processor.stop_tx = Some(stop_tx);
        processor.pump_handle = Some(handle);
        Ok(processor)
    }

    /// Build the processor and its pump without starting a thread
    fn build(
        settings: StreamSettings,
        capture_backend: Arc<dyn CaptureBackend>,
        sinks: Arc<dyn VideoSinkFactory>,
    ) -> Result<(Self, Pump)> {
        settings.camera.validate()?;
        let name = settings.camera.name().to_string();
        schedule::verify_schedule(&format!("{} recording", name), &settings.recording_schedule)?;
        schedule::verify_schedule(&format!("{} motion", name), &settings.motion_schedule)?;

        std::fs::create_dir_all(&settings.save_root)?;

        let source = settings.camera.stream_source()?;
        log::info!("[Stream] Opening {} ({})", name, redact_source(&source));
        let capture = capture_backend.open(&source)?;
        let timing = Timing::from_capture(capture.as_ref(), settings.camera.camera_max_fps);

        log::info!(
            "[Stream] {} reports {:.2} fps at {}x{}, recording at {:.2} fps, pump period {} ms",
            name,
            timing.original_fps,
            timing.width,
            timing.height,
            timing.fps,
            timing.period_ms
        );

        let shared = Arc::new(Shared {
            name,
            schedule_governs_recording: schedule::is_schedule_enabled(&settings.recording_schedule),
            frame: Mutex::new(FrameSlot::default()),
            motion: Mutex::new(None),
            writing_enabled: Mutex::new(false),
            timing: RwLock::new(timing),
        });

        let pump = Pump {
            shared: shared.clone(),
            last_reported_fps: timing.original_fps,
            settings,
            source,
            capture_backend,
            capture,
            sinks,
            session: None,
            empty_grabs: 0,
        };

        let processor = Self {
            shared,
            stop_tx: None,
            pump_handle: None,
        };
        Ok((processor, pump))
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Enable manual recording. Ignored while a recording schedule governs.
    pub fn start_video_writing(&self) {
        if self.shared.schedule_governs_recording {
            log::warn!(
                "[Stream] {} follows a recording schedule, manual start ignored",
                self.shared.name
            );
            return;
        }
        *self.shared.writing_enabled.lock() = true;
        log::info!("[Stream] Manual recording enabled for {}", self.shared.name);
    }

    /// Disable manual recording. Ignored while a recording schedule governs.
    pub fn stop_video_writing(&self) {
        if self.shared.schedule_governs_recording {
            log::warn!(
                "[Stream] {} follows a recording schedule, manual stop ignored",
                self.shared.name
            );
            return;
        }
        *self.shared.writing_enabled.lock() = false;
        log::info!("[Stream] Manual recording disabled for {}", self.shared.name);
    }

    /// The processor's own writing flag, set manually or by the recording
    /// schedule. Motion recordings are not included.
    pub fn manual_writing_enabled(&self) -> bool {
        *self.shared.writing_enabled.lock()
    }

    /// True while either this processor or its motion detector is writing
    pub fn video_writing_enabled(&self) -> bool {
        if *self.shared.writing_enabled.lock() {
            return true;
        }
        self.shared
            .motion
            .lock()
            .as_ref()
            .map(|detector| detector.writing_stream())
            .unwrap_or(false)
    }

    /// True when a frame arrived since the last `current_video_frame` call
    pub fn video_frame_updated(&self) -> bool {
        self.shared.frame.lock().updated
    }

    /// Copy of the latest frame, with the motion rectangle when requested
    /// and a detector is running
    pub fn current_video_frame(&self, with_motion_rect: bool) -> CurrentFrame {
        let frame = {
            let mut slot = self.shared.frame.lock();
            slot.updated = false;
            slot.frame.clone()
        };
        let motion_rect = if with_motion_rect {
            self.shared
                .motion
                .lock()
                .as_ref()
                .map(|detector| detector.current_motion_rect())
        } else {
            None
        };
        CurrentFrame { frame, motion_rect }
    }

    /// Recording frame rate
    pub fn current_fps(&self) -> f64 {
        self.shared.timing.read().fps
    }

    /// Frame rate the capture reports
    pub fn original_fps(&self) -> f64 {
        self.shared.timing.read().original_fps
    }

    pub fn update_period_ms(&self) -> u64 {
        self.shared.timing.read().period_ms
    }

    /// Width over height, followed by width and height
    pub fn aspect_ratio_and_size(&self) -> (f64, u32, u32) {
        let timing = self.shared.timing.read();
        (
            frame::aspect_ratio(timing.width, timing.height),
            timing.width,
            timing.height,
        )
    }

    /// Stop the pump, close any recording and release the capture
    pub fn shutdown(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.pump_handle.take() {
            if handle.join().is_err() {
                log::error!("[Stream] Pump thread for {} panicked", self.shared.name);
            }
        }
    }
}

impl Drop for StreamProcessor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// State owned by the pump thread
struct Pump {
    shared: Arc<Shared>,
    settings: StreamSettings,
    source: StreamSource,
    capture_backend: Arc<dyn CaptureBackend>,
    capture: Box<dyn FrameSource>,
    sinks: Arc<dyn VideoSinkFactory>,
    session: Option<RecordingSession>,
    last_reported_fps: f64,
    empty_grabs: u64,
}

impl Pump {
    fn tick(&mut self, now: &DateTime<Local>) -> Result<()> {
        // 1. grab
        let Some(frame) = self.capture.grab_frame() else {
            self.empty_grabs += 1;
            if self.empty_grabs % EMPTY_GRAB_LOG_INTERVAL == 1 {
                log::warn!(
                    "[Stream] {}: no frame from capture ({} empty grabs)",
                    self.shared.name,
                    self.empty_grabs
                );
            }
            return Ok(());
        };
        self.empty_grabs = 0;
        {
            let mut slot = self.shared.frame.lock();
            slot.frame = frame.clone();
            slot.updated = true;
        }
        self.track_frame_size(&frame);

        // 2. recording schedule
        if self.shared.schedule_governs_recording {
            let active = schedule::is_active_at(&self.settings.recording_schedule, now);
            let mut enabled = self.shared.writing_enabled.lock();
            if *enabled != active {
                log::info!(
                    "[Stream] Scheduled recording {} for {}",
                    if active { "started" } else { "stopped" },
                    self.shared.name
                );
            }
            *enabled = active;
        }

        // 3. motion schedule
        self.update_motion(&frame, now);

        // 4. open or rotate
        let writing = *self.shared.writing_enabled.lock();
        let fps = self.shared.timing.read().fps;
        if writing {
            let rotate = self
                .session
                .as_ref()
                .map(|s| s.has_reached(self.settings.file_duration_secs) || !s.fits(&frame))
                .unwrap_or(true);
            if rotate {
                if let Some(old) = self.session.take() {
                    old.close();
                }
                let session = open_recording_session(
                    self.sinks.as_ref(),
                    &self.settings.save_root,
                    &self.shared.name,
                    false,
                    now,
                    (frame.width, frame.height, fps),
                )?;
                self.session = Some(session);
            }
        } else if let Some(session) = self.session.take() {
            session.close();
        }

        // 5. write. A failed file is closed so the next tick opens a fresh one.
        let written = match self.session.as_mut() {
            Some(session) => session.write_frame(&frame, 1.0 / fps),
            None => Ok(()),
        };
        if let Err(e) = written {
            if let Some(failed) = self.session.take() {
                failed.close();
            }
            return Err(e.into());
        }

        // 6. frame rate drift
        let reported = self.capture.reported_fps();
        if fps_drifted(self.last_reported_fps, reported) {
            self.reinitialize(reported);
        }

        Ok(())
    }

    /// Follow capture renegotiation to a new frame size. The motion detector
    /// is dropped and restarted at the new size.
    fn track_frame_size(&mut self, frame: &VideoFrame) {
        {
            let timing = self.shared.timing.read();
            if (timing.width, timing.height) == (frame.width, frame.height) {
                return;
            }
        }
        let mut timing = self.shared.timing.write();
        log::info!(
            "[Stream] {} frame size changed {}x{} -> {}x{}",
            self.shared.name,
            timing.width,
            timing.height,
            frame.width,
            frame.height
        );
        timing.width = frame.width;
        timing.height = frame.height;
        drop(timing);

        let detector = self.shared.motion.lock().take();
        drop(detector);
    }

    fn motion_active(&self, now: &DateTime<Local>) -> bool {
        self.settings.camera.motion_detector_mode != MotionDetectorMode::Off
            && schedule::is_schedule_enabled(&self.settings.motion_schedule)
            && schedule::is_active_at(&self.settings.motion_schedule, now)
    }

    fn update_motion(&mut self, frame: &VideoFrame, now: &DateTime<Local>) {
        if !self.motion_active(now) {
            let detector = self.shared.motion.lock().take();
            if let Some(detector) = detector {
                log::info!("[Stream] Motion tracking off for {}", self.shared.name);
                drop(detector);
            }
            return;
        }

        let mut motion = self.shared.motion.lock();
        if motion.is_none() {
            let Some(settings) = self.motion_settings() else {
                return;
            };
            match MotionDetector::start(settings) {
                Ok(detector) => *motion = Some(detector),
                Err(e) => {
                    log::error!(
                        "[Stream] Failed to start motion detector for {}: {}",
                        self.shared.name,
                        e
                    );
                    return;
                }
            }
        }
        if let Some(detector) = motion.as_mut() {
            detector.add_next_frame(frame.clone());
        }
    }

    fn motion_settings(&self) -> Option<MotionSettings> {
        let camera = &self.settings.camera;
        let params = camera.motion_parameters()?;
        let timing = *self.shared.timing.read();
        Some(MotionSettings {
            camera_name: self.shared.name.clone(),
            params,
            regions: camera.motion_regions.clone(),
            shrink_frames: camera.shrink_video_frames,
            box_margin: self.settings.motion_box_margin,
            fps: timing.fps,
            width: timing.width,
            height: timing.height,
            hold_off_secs: self.settings.motion_hold_off_secs,
            save_root: self.settings.save_root.clone(),
            file_duration_secs: self.settings.file_duration_secs,
            recording_enabled: camera.motion_recording_enabled,
            sinks: self.sinks.clone(),
        })
    }

    /// Reopen the capture and rebuild everything that depends on the frame rate.
    /// The recording file and motion detector are recreated on the next tick.
    fn reinitialize(&mut self, reported_fps: f64) {
        log::info!(
            "[Stream] {} frame rate changed {:.2} -> {:.2} fps, reinitialising",
            self.shared.name,
            self.last_reported_fps,
            reported_fps
        );

        if let Some(session) = self.session.take() {
            session.close();
        }
        let detector = self.shared.motion.lock().take();
        drop(detector);

        match self.capture_backend.open(&self.source) {
            Ok(capture) => self.capture = capture,
            Err(e) => log::error!(
                "[Stream] Failed to reopen capture for {}, keeping the old one: {}",
                self.shared.name,
                e
            ),
        }

        let timing = Timing::from_capture(self.capture.as_ref(), self.settings.camera.camera_max_fps);
        self.last_reported_fps = timing.original_fps;
        *self.shared.timing.write() = timing;
        log::info!(
            "[Stream] {} now recording at {:.2} fps, pump period {} ms",
            self.shared.name,
            timing.fps,
            timing.period_ms
        );
    }

    /// Close the recording and stop the motion detector
    fn shutdown(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
        let detector = self.shared.motion.lock().take();
        if let Some(detector) = detector {
            detector.shutdown();
        }
        *self.shared.writing_enabled.lock() = false;
    }
}
