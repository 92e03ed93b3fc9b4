//! GStreamer video file writer
//!
//! Frames are handed to a dedicated writer thread over a bounded channel and
//! pushed into `appsrc -> queue -> videoconvert -> encoder -> [parser] -> muxer -> filesink`.
//! The capture side never waits on the encoder unless the channel is full.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;

use super::{Result, VideoCodec, VideoSink, VideoSinkFactory, WriterError};
use crate::frame::VideoFrame;

/// Frames buffered between the caller and the writer thread
const WRITER_QUEUE_FRAMES: usize = 30;

/// Messages sent to the writer thread
enum WriterMessage {
    Frame(VideoFrame),
    Finish,
}

/// Writer state shared between threads
#[derive(Default)]
struct WriterState {
    last_error: Option<String>,
}

/// Video file writer running its GStreamer pipeline on a background thread
pub struct GstVideoWriter {
    sender: Sender<WriterMessage>,
    thread: Option<std::thread::JoinHandle<Result<u64>>>,
    state: Arc<Mutex<WriterState>>,
    width: u32,
    height: u32,
    path: PathBuf,
}

impl GstVideoWriter {
    /// Start a writer for BGR frames of the given size
    pub fn new(path: &Path, codec: VideoCodec, width: u32, height: u32, fps: f64) -> Result<Self> {
        gst::init().map_err(|e| WriterError::Gst(e.to_string()))?;

        // Build the pipeline up front so element errors surface to the caller
        let pipeline = create_pipeline(path, codec, width, height, fps)?;

        let (sender, receiver) = bounded::<WriterMessage>(WRITER_QUEUE_FRAMES);
        let state = Arc::new(Mutex::new(WriterState::default()));
        let state_clone = state.clone();
        let frame_duration = frame_duration_ns(fps_to_gst_fraction(fps));
        let thread_path = path.to_path_buf();

        let thread = std::thread::Builder::new()
            .name("camguard-video-writer".into())
            .spawn(move || {
                writer_thread_main(receiver, pipeline, frame_duration, state_clone, thread_path)
            })
            .map_err(|e| WriterError::Pipeline(format!("Failed to spawn writer thread: {}", e)))?;

        log::info!(
            "[Writer] {} writer started: {}x{} @ {:.2} fps -> {}",
            codec.display_name(),
            width,
            height,
            fps,
            path.display()
        );

        Ok(Self {
            sender,
            thread: Some(thread),
            state,
            width,
            height,
            path: path.to_path_buf(),
        })
    }

    fn join(&mut self) -> Result<u64> {
        match self.thread.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| WriterError::Pipeline("Writer thread panicked".into()))?,
            None => Err(WriterError::Pipeline("Writer already finished".into())),
        }
    }
}

impl VideoSink for GstVideoWriter {
    fn write_frame(&mut self, frame: &VideoFrame) -> Result<()> {
        if let Some(err) = self.state.lock().last_error.clone() {
            return Err(WriterError::Pipeline(err));
        }
        if frame.width != self.width || frame.height != self.height || frame.channels != 3 {
            return Err(WriterError::FrameSize {
                width: self.width,
                height: self.height,
                got_width: frame.width,
                got_height: frame.height,
            });
        }

        self.sender
            .send(WriterMessage::Frame(frame.clone()))
            .map_err(|_| WriterError::Channel("Writer thread disconnected".into()))
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        let _ = self.sender.send(WriterMessage::Finish);
        let frames = self.join()?;
        log::debug!("[Writer] {} finished with {} frames", self.path.display(), frames);
        Ok(())
    }
}

impl Drop for GstVideoWriter {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.sender.send(WriterMessage::Finish);
            if let Err(e) = self.join() {
                log::warn!("[Writer] {} closed with error: {}", self.path.display(), e);
            }
        }
    }
}

/// Main function for the writer thread
fn writer_thread_main(
    receiver: Receiver<WriterMessage>,
    pipeline: gst::Pipeline,
    frame_duration_ns: u64,
    state: Arc<Mutex<WriterState>>,
    path: PathBuf,
) -> Result<u64> {
    let appsrc = pipeline
        .by_name("src")
        .ok_or_else(|| WriterError::Pipeline("Could not find appsrc".into()))?
        .downcast::<gst_app::AppSrc>()
        .map_err(|_| WriterError::Pipeline("Could not downcast to AppSrc".into()))?;

    if let Err(e) = pipeline.set_state(gst::State::Playing) {
        let msg = format!("Failed to start pipeline: {:?}", e);
        state.lock().last_error = Some(msg.clone());
        let _ = pipeline.set_state(gst::State::Null);
        return Err(WriterError::Pipeline(msg));
    }

    let mut frames_written = 0u64;

    loop {
        match receiver.recv() {
            Ok(WriterMessage::Frame(frame)) => {
                let pts = frames_written * frame_duration_ns;
                let mut buffer = gst::Buffer::from_slice(frame.data);
                if let Some(buffer_ref) = buffer.get_mut() {
                    buffer_ref.set_pts(gst::ClockTime::from_nseconds(pts));
                    buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame_duration_ns));
                }

                if let Err(e) = appsrc.push_buffer(buffer) {
                    let msg = format!("Failed to push buffer: {:?}", e);
                    log::error!("[Writer] {}: {}", path.display(), msg);
                    state.lock().last_error = Some(msg);
                    break;
                }

                frames_written += 1;
            }
            Ok(WriterMessage::Finish) | Err(_) => break,
        }
    }

    if let Err(e) = appsrc.end_of_stream() {
        log::warn!("[Writer] EOS send failed: {:?}", e);
    }

    // Wait for the muxer to finalize the file
    let mut got_eos = false;
    if let Some(bus) = pipeline.bus() {
        for msg in bus.iter_timed(gst::ClockTime::from_seconds(10)) {
            match msg.view() {
                gst::MessageView::Eos(..) => {
                    got_eos = true;
                    break;
                }
                gst::MessageView::Error(err) => {
                    log::error!(
                        "[Writer] Error during finalization of {}: {} ({:?})",
                        path.display(),
                        err.error(),
                        err.debug()
                    );
                    break;
                }
                _ => {}
            }
        }
    }

    if !got_eos {
        log::warn!("[Writer] Did not receive EOS for {}, forcing stop", path.display());
    }

    pipeline.set_state(gst::State::Null).ok();

    Ok(frames_written)
}

/// Build the encoding pipeline for packed BGR input
fn create_pipeline(
    path: &Path,
    codec: VideoCodec,
    width: u32,
    height: u32,
    fps: f64,
) -> Result<gst::Pipeline> {
    let pipeline = gst::Pipeline::new();

    let caps = gst::Caps::builder("video/x-raw")
        .field("format", "BGR")
        .field("width", width as i32)
        .field("height", height as i32)
        .field("framerate", fps_to_gst_fraction(fps))
        .build();

    let appsrc = gst_app::AppSrc::builder()
        .name("src")
        .caps(&caps)
        .format(gst::Format::Time)
        .is_live(true)
        .stream_type(gst_app::AppStreamType::Stream)
        .build();

    let queue = gst::ElementFactory::make("queue")
        .property("max-size-buffers", WRITER_QUEUE_FRAMES as u32)
        .property("max-size-time", 0u64)
        .property("max-size-bytes", 0u32)
        .build()
        .map_err(|e| WriterError::Pipeline(format!("Failed to create queue: {}", e)))?;

    let videoconvert = gst::ElementFactory::make("videoconvert")
        .build()
        .map_err(|e| WriterError::Pipeline(format!("Failed to create videoconvert: {}", e)))?;

    let encoder = gst::ElementFactory::make(codec.gst_encoder())
        .build()
        .map_err(|e| {
            WriterError::Pipeline(format!("Failed to create {}: {}", codec.gst_encoder(), e))
        })?;
    if codec == VideoCodec::H264 {
        encoder.set_property_from_str("tune", "zerolatency");
        encoder.set_property_from_str("speed-preset", "veryfast");
    }

    let muxer_name = codec.container().gst_muxer();
    let muxer = gst::ElementFactory::make(muxer_name)
        .build()
        .map_err(|e| WriterError::Pipeline(format!("Failed to create {}: {}", muxer_name, e)))?;

    let filesink = gst::ElementFactory::make("filesink")
        .property("location", path.to_string_lossy().to_string())
        .property("async", false)
        .property("sync", false)
        .build()
        .map_err(|e| WriterError::Pipeline(format!("Failed to create filesink: {}", e)))?;

    let mut elements: Vec<gst::Element> = vec![appsrc.upcast(), queue, videoconvert, encoder];
    if let Some(parser_name) = codec.gst_parser() {
        let parser = gst::ElementFactory::make(parser_name)
            .build()
            .map_err(|e| WriterError::Pipeline(format!("Failed to create {}: {}", parser_name, e)))?;
        elements.push(parser);
    }
    elements.push(muxer);
    elements.push(filesink);

    pipeline
        .add_many(&elements)
        .map_err(|e| WriterError::Pipeline(format!("Failed to add elements: {}", e)))?;
    gst::Element::link_many(&elements)
        .map_err(|e| WriterError::Pipeline(format!("Failed to link elements: {}", e)))?;

    Ok(pipeline)
}

/// Convert a floating point rate into a GStreamer fraction (29.97 -> 30000/1001,
/// 0.5 -> 1/2)
pub fn fps_to_gst_fraction(fps: f64) -> gst::Fraction {
    let fps = if fps.is_finite() && fps > 0.0 { fps } else { 25.0 };
    let period = 1.0 / fps;
    if (fps - fps.round()).abs() < 0.001 && fps >= 1.0 {
        gst::Fraction::new(fps.round() as i32, 1)
    } else if fps < 1.0 && (period - period.round()).abs() < 0.001 {
        gst::Fraction::new(1, period.round() as i32)
    } else {
        gst::Fraction::new(((fps * 1001.0).round() as i32).max(1), 1001)
    }
}

/// Buffer duration matching the negotiated framerate
pub fn frame_duration_ns(rate: gst::Fraction) -> u64 {
    let numer = rate.numer().max(1) as u64;
    let denom = rate.denom().max(1) as u64;
    (1_000_000_000 * denom + numer / 2) / numer
}

/// Sink factory backed by [`GstVideoWriter`]
#[derive(Debug, Clone, Copy, Default)]
pub struct GstVideoSinkFactory {
    codec: VideoCodec,
}

impl GstVideoSinkFactory {
    pub fn new(codec: VideoCodec) -> Self {
        Self { codec }
    }
}

impl VideoSinkFactory for GstVideoSinkFactory {
    fn open(&self, path: &Path, width: u32, height: u32, fps: f64) -> Result<Box<dyn VideoSink>> {
        Ok(Box::new(GstVideoWriter::new(path, self.codec, width, height, fps)?))
    }

    fn extension(&self) -> &'static str {
        self.codec.extension()
    }
}
