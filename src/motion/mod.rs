// Motion detection for one camera
//
// MotionPipeline is the synchronous core: analyse a frame, then let the
// recorder open, extend or close the motion recording. MotionDetector runs a
// pipeline on its own worker thread fed through a FIFO channel.
//
// Every frame handed to `add_next_frame` is processed, in arrival order.
// Dropping the detector closes the channel and the worker drains whatever is
// still queued before it exits, so hold-off and file duration counters see
// every frame.

pub mod analysis;
pub mod recorder;
pub mod rect;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::{DateTime, Local};
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;

use crate::camera::{MotionParameters, MotionRegion};
use crate::encoding::VideoSinkFactory;
use crate::frame::VideoFrame;

pub use analysis::{AnalyzerConfig, FrameAnalysis, MotionAnalyzer, DEFAULT_BOX_MARGIN};
pub use recorder::{hold_off_frames, MotionRecorder, DEFAULT_HOLD_OFF_SECS};
pub use rect::Rect;

/// Everything needed to build a motion detector for one camera session
#[derive(Clone)]
pub struct MotionSettings {
    pub camera_name: String,
    pub params: MotionParameters,
    pub regions: Vec<MotionRegion>,
    pub shrink_frames: bool,
    pub box_margin: i32,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub hold_off_secs: f64,
    pub save_root: PathBuf,
    pub file_duration_secs: f64,
    pub recording_enabled: bool,
    pub sinks: Arc<dyn VideoSinkFactory>,
}

/// Analyser plus recorder, driven one frame at a time
pub struct MotionPipeline {
    analyzer: MotionAnalyzer,
    recorder: MotionRecorder,
}

impl MotionPipeline {
    pub fn new(settings: &MotionSettings) -> Self {
        let analyzer = MotionAnalyzer::new(AnalyzerConfig {
            params: settings.params,
            regions: settings.regions.clone(),
            shrink_frames: settings.shrink_frames,
            box_margin: settings.box_margin,
            original_width: settings.width,
            original_height: settings.height,
        });
        let recorder = MotionRecorder::new(
            &settings.camera_name,
            settings.save_root.clone(),
            settings.sinks.clone(),
            settings.recording_enabled,
            settings.file_duration_secs,
            settings.fps,
            settings.hold_off_secs,
        );
        Self { analyzer, recorder }
    }

    /// Analyse one frame and update the recording. Unusable frames are
    /// logged and skipped.
    pub fn process(&mut self, frame: &VideoFrame, now: &DateTime<Local>) -> Option<FrameAnalysis> {
        let Some(analysis) = self.analyzer.process(frame) else {
            log::error!(
                "[Motion] Skipping unsupported frame {}x{}x{}",
                frame.width,
                frame.height,
                frame.channels
            );
            return None;
        };
        self.recorder.on_frame(frame, analysis.triggered, now);
        Some(analysis)
    }

    pub fn motion_rect(&self) -> Rect {
        self.analyzer.motion_rect()
    }

    pub fn is_writing(&self) -> bool {
        self.recorder.is_writing()
    }

    /// Close any open recording
    pub fn finish(&mut self) {
        self.recorder.close();
    }
}

/// State published by the worker for lock-free-ish readers
#[derive(Default)]
struct MotionShared {
    rect: Mutex<Rect>,
    writing: AtomicBool,
    frames_processed: AtomicU64,
}

/// Threaded motion detector handle
pub struct MotionDetector {
    name: String,
    sender: Option<Sender<VideoFrame>>,
    worker: Option<JoinHandle<()>>,
    shared: Arc<MotionShared>,
    frames_queued: u64,
}

impl MotionDetector {
    /// Start the worker thread
    pub fn start(settings: MotionSettings) -> std::io::Result<Self> {
        let (sender, receiver) = unbounded::<VideoFrame>();
        let shared = Arc::new(MotionShared::default());
        let worker_shared = shared.clone();
        let name = settings.camera_name.clone();

        log::info!(
            "[Motion] Started motion detector for {} ({}x{} @ {:.2} fps)",
            name,
            settings.width,
            settings.height,
            settings.fps
        );

        let worker = std::thread::Builder::new()
            .name(format!("camguard-motion-{}", name))
            .spawn(move || {
                let mut pipeline = MotionPipeline::new(&settings);
                // Ends once the sender is dropped and the queue is empty
                for frame in receiver.iter() {
                    if let Some(analysis) = pipeline.process(&frame, &Local::now()) {
                        *worker_shared.rect.lock() = analysis.motion_rect;
                    }
                    worker_shared
                        .writing
                        .store(pipeline.is_writing(), Ordering::SeqCst);
                    worker_shared.frames_processed.fetch_add(1, Ordering::SeqCst);
                }
                pipeline.finish();
                worker_shared.writing.store(false, Ordering::SeqCst);
                log::info!("[Motion] Motion detector for {} stopped", settings.camera_name);
            })?;

        Ok(Self {
            name,
            sender: Some(sender),
            worker: Some(worker),
            shared,
            frames_queued: 0,
        })
    }

    /// Queue a frame for analysis. Never blocks.
    pub fn add_next_frame(&mut self, frame: VideoFrame) {
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.send(frame).is_err() {
            log::error!("[Motion] Worker for {} has exited, frame dropped", self.name);
            return;
        }
        self.frames_queued += 1;
    }

    /// Latest smoothed motion rectangle in original frame coordinates
    pub fn current_motion_rect(&self) -> Rect {
        *self.shared.rect.lock()
    }

    /// Whether a motion recording is open
    pub fn writing_stream(&self) -> bool {
        self.shared.writing.load(Ordering::SeqCst)
    }

    pub fn frames_queued(&self) -> u64 {
        self.frames_queued
    }

    pub fn frames_processed(&self) -> u64 {
        self.shared.frames_processed.load(Ordering::SeqCst)
    }

    /// Drain the queue, close any recording and wait for the worker.
    /// Returns the number of frames processed.
    pub fn shutdown(mut self) -> u64 {
        self.stop_worker();
        self.frames_processed()
    }

    fn stop_worker(&mut self) {
        self.sender.take();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("[Motion] Worker for {} panicked", self.name);
            }
        }
    }
}

impl Drop for MotionDetector {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{preset_for_mode, MotionDetectorMode};
    use crate::test_support::{frame_with_square, plain_frame, RecordingSinkFactory};
    use std::time::{Duration, Instant};

    fn settings(factory: &RecordingSinkFactory, root: PathBuf) -> MotionSettings {
        MotionSettings {
            camera_name: "Camera1".into(),
            params: preset_for_mode(MotionDetectorMode::Medium).unwrap(),
            regions: Vec::new(),
            shrink_frames: true,
            box_margin: DEFAULT_BOX_MARGIN,
            fps: 5.0,
            width: 160,
            height: 120,
            hold_off_secs: 1.0,
            save_root: root,
            file_duration_secs: 600.0,
            recording_enabled: true,
            sinks: Arc::new(factory.clone()),
        }
    }

    #[test]
    fn pipeline_records_motion_then_closes_after_hold_off() {
        let dir = tempfile::tempdir().unwrap();
        let factory = RecordingSinkFactory::default();
        let mut pipeline = MotionPipeline::new(&settings(&factory, dir.path().to_path_buf()));
        let now = Local::now();

        let background = plain_frame(160, 120, 30);
        let moved = frame_with_square(160, 120, 30, 200, (40, 30, 40, 40));
        pipeline.process(&background, &now);
        pipeline.process(&background, &now);
        let hit = pipeline.process(&moved, &now).unwrap();
        assert!(hit.triggered);
        assert!(pipeline.is_writing());

        // Decay plus the 5 frame hold-off is well under 30 frames
        for _ in 0..30 {
            pipeline.process(&moved, &now);
        }
        assert!(!pipeline.is_writing());
        assert!(pipeline.motion_rect().is_empty());
        let files = factory.files();
        assert_eq!(files.len(), 1);
        assert!(files[0].finished);
    }

    #[test]
    fn drop_drains_every_queued_frame() {
        let dir = tempfile::tempdir().unwrap();
        let factory = RecordingSinkFactory::default();
        let mut detector = MotionDetector::start(settings(&factory, dir.path().to_path_buf())).unwrap();

        for i in 0..50u8 {
            detector.add_next_frame(plain_frame(160, 120, i));
        }
        assert_eq!(detector.frames_queued(), 50);
        assert_eq!(detector.shutdown(), 50);
    }

    #[test]
    fn worker_publishes_rect_and_writing_flag() {
        let dir = tempfile::tempdir().unwrap();
        let factory = RecordingSinkFactory::default();
        let mut detector = MotionDetector::start(settings(&factory, dir.path().to_path_buf())).unwrap();

        detector.add_next_frame(plain_frame(160, 120, 30));
        detector.add_next_frame(plain_frame(160, 120, 30));
        detector.add_next_frame(frame_with_square(160, 120, 30, 200, (40, 30, 40, 40)));

        let deadline = Instant::now() + Duration::from_secs(5);
        while detector.frames_processed() < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!detector.current_motion_rect().is_empty());
        assert!(detector.writing_stream());

        drop(detector);
        let files = factory.files();
        assert_eq!(files.len(), 1);
        assert!(files[0].finished, "recording closed on shutdown");
    }
}
