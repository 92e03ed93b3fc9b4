// Fakes shared by unit tests: synthetic frames, an in-memory video sink and a
// scripted camera.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::camera::StreamSource;
use crate::capture::{CaptureBackend, CaptureError, FrameSource};
use crate::encoding::{self, VideoSink, VideoSinkFactory, WriterError};
use crate::frame::VideoFrame;

/// BGR frame with every byte set to `value`
pub fn plain_frame(width: u32, height: u32, value: u8) -> VideoFrame {
    VideoFrame::filled_bgr(width, height, [value, value, value])
}

/// BGR frame of `background` with a filled square of `foreground`
pub fn frame_with_square(
    width: u32,
    height: u32,
    background: u8,
    foreground: u8,
    (x, y, square_width, square_height): (u32, u32, u32, u32),
) -> VideoFrame {
    let mut frame = plain_frame(width, height, background);
    for row in y..(y + square_height).min(height) {
        for col in x..(x + square_width).min(width) {
            let offset = ((row * width + col) * 3) as usize;
            frame.data[offset..offset + 3].fill(foreground);
        }
    }
    frame
}

/// What a fake sink saw
#[derive(Debug, Clone)]
pub struct FakeFile {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frames: u64,
    pub finished: bool,
}

/// Video sink factory that records calls instead of encoding
///
/// Sinks reject frames whose size differs from the size they were opened
/// with, like the GStreamer writer does.
#[derive(Clone, Default)]
pub struct RecordingSinkFactory {
    files: Arc<Mutex<Vec<FakeFile>>>,
    fail_open: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl RecordingSinkFactory {
    pub fn files(&self) -> Vec<FakeFile> {
        self.files.lock().clone()
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// While set, every write on every open sink fails
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl VideoSinkFactory for RecordingSinkFactory {
    fn open(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: f64,
    ) -> encoding::Result<Box<dyn VideoSink>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(WriterError::Pipeline("fake open failure".into()));
        }
        std::fs::write(path, b"").ok();

        let mut files = self.files.lock();
        files.push(FakeFile {
            path: path.to_path_buf(),
            width,
            height,
            fps,
            frames: 0,
            finished: false,
        });
        Ok(Box::new(RecordingSink {
            files: self.files.clone(),
            fail_writes: self.fail_writes.clone(),
            index: files.len() - 1,
        }))
    }

    fn extension(&self) -> &'static str {
        "avi"
    }
}

struct RecordingSink {
    files: Arc<Mutex<Vec<FakeFile>>>,
    fail_writes: Arc<AtomicBool>,
    index: usize,
}

impl VideoSink for RecordingSink {
    fn write_frame(&mut self, frame: &VideoFrame) -> encoding::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(WriterError::Pipeline("fake write failure".into()));
        }
        let mut files = self.files.lock();
        let file = &mut files[self.index];
        if (frame.width, frame.height) != (file.width, file.height) {
            return Err(WriterError::FrameSize {
                width: file.width,
                height: file.height,
                got_width: frame.width,
                got_height: frame.height,
            });
        }
        file.frames += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> encoding::Result<()> {
        self.files.lock()[self.index].finished = true;
        Ok(())
    }
}

struct FakeCameraState {
    fps: Mutex<f64>,
    queue: Mutex<VecDeque<VideoFrame>>,
    default_frame: Mutex<VideoFrame>,
    stalled: AtomicBool,
    fail_open: AtomicBool,
    opens: AtomicUsize,
}

/// Capture backend serving scripted frames
///
/// Queued frames are served first, then the default frame forever. The
/// reported frame rate can be changed while a source is open.
#[derive(Clone)]
pub struct FakeCamera {
    state: Arc<FakeCameraState>,
}

impl FakeCamera {
    pub fn new(fps: f64, default_frame: VideoFrame) -> Self {
        Self {
            state: Arc::new(FakeCameraState {
                fps: Mutex::new(fps),
                queue: Mutex::new(VecDeque::new()),
                default_frame: Mutex::new(default_frame),
                stalled: AtomicBool::new(false),
                fail_open: AtomicBool::new(false),
                opens: AtomicUsize::new(0),
            }),
        }
    }

    pub fn set_fps(&self, fps: f64) {
        *self.state.fps.lock() = fps;
    }

    pub fn push_frame(&self, frame: VideoFrame) {
        self.state.queue.lock().push_back(frame);
    }

    pub fn set_default_frame(&self, frame: VideoFrame) {
        *self.state.default_frame.lock() = frame;
    }

    /// While stalled every grab returns nothing
    pub fn set_stalled(&self, stalled: bool) {
        self.state.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.state.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }
}

impl CaptureBackend for FakeCamera {
    fn open(&self, source: &StreamSource) -> crate::capture::Result<Box<dyn FrameSource>> {
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(CaptureError::OpenFailed(format!("{:?}", source)));
        }
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSource {
            state: self.state.clone(),
        }))
    }
}

struct FakeSource {
    state: Arc<FakeCameraState>,
}

impl FrameSource for FakeSource {
    fn grab_frame(&mut self) -> Option<VideoFrame> {
        if self.state.stalled.load(Ordering::SeqCst) {
            return None;
        }
        if let Some(frame) = self.state.queue.lock().pop_front() {
            return Some(frame);
        }
        Some(self.state.default_frame.lock().clone())
    }

    fn reported_fps(&self) -> f64 {
        *self.state.fps.lock()
    }

    fn width(&self) -> u32 {
        self.state.default_frame.lock().width
    }

    fn height(&self) -> u32 {
        self.state.default_frame.lock().height
    }
}
