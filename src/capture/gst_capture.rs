// GStreamer capture source
//
// Pipeline for network streams:  uridecodebin -> videoconvert -> capsfilter(BGR) -> appsink
// Pipeline for local devices:    <platform source> -> videoconvert -> capsfilter(BGR) -> appsink
//
// The appsink keeps only the newest buffer, so a slow consumer sees the most
// recent frame instead of a growing backlog.

use std::time::{Duration, Instant};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;

use super::{redact_source, CaptureBackend, CaptureError, FrameSource, Result};
use crate::camera::StreamSource;
use crate::frame::VideoFrame;

/// Measured delivery rate below this fraction of the negotiated rate is reported
const FPS_MISMATCH_RATIO: f64 = 0.75;
/// Window over which the delivery rate is measured
const FPS_CHECK_WINDOW: Duration = Duration::from_secs(5);

/// Opens GStreamer capture pipelines
#[derive(Debug, Clone)]
pub struct GstCaptureBackend {
    /// How long to wait for the first decoded frame when opening
    pub first_frame_timeout: Duration,
    /// How long a single grab may wait for a new frame
    pub grab_timeout: Duration,
}

impl Default for GstCaptureBackend {
    fn default() -> Self {
        Self {
            first_frame_timeout: Duration::from_secs(15),
            grab_timeout: Duration::from_millis(100),
        }
    }
}

impl CaptureBackend for GstCaptureBackend {
    fn open(&self, source: &StreamSource) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(GstFrameSource::open(
            source,
            self.first_frame_timeout,
            self.grab_timeout,
        )?))
    }
}

/// A running capture pipeline
pub struct GstFrameSource {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    label: String,
    width: u32,
    height: u32,
    fps: f64,
    grab_timeout: gst::ClockTime,
    /// First frame, pulled while opening to learn the stream geometry
    pending: Option<VideoFrame>,
    frames_delivered: u64,
    fps_check_start: Option<Instant>,
    frames_at_check_start: u64,
    fps_warning_emitted: bool,
}

impl GstFrameSource {
    pub fn open(
        source: &StreamSource,
        first_frame_timeout: Duration,
        grab_timeout: Duration,
    ) -> Result<Self> {
        gst::init().map_err(|e| CaptureError::Gst(e.to_string()))?;

        let label = redact_source(source);
        let (pipeline, appsink) = create_pipeline(source)?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| CaptureError::Pipeline(format!("Failed to start {}: {:?}", label, e)))?;

        let timeout = gst::ClockTime::from_mseconds(first_frame_timeout.as_millis() as u64);
        let first = match appsink.try_pull_sample(timeout) {
            Some(sample) => sample_to_frame(&sample),
            None => None,
        };

        let Some((frame, fps)) = first else {
            let reason = pipeline_error(&pipeline);
            pipeline.set_state(gst::State::Null).ok();
            return Err(match reason {
                Some(reason) => CaptureError::OpenFailed(format!("{}: {}", label, reason)),
                None => CaptureError::NoFirstFrame(label),
            });
        };

        log::info!(
            "[Capture] Opened {} at {}x{}, reported {:.2} fps",
            label,
            frame.width,
            frame.height,
            fps
        );

        Ok(Self {
            pipeline,
            appsink,
            label,
            width: frame.width,
            height: frame.height,
            fps,
            grab_timeout: gst::ClockTime::from_mseconds(grab_timeout.as_millis() as u64),
            pending: Some(frame),
            frames_delivered: 0,
            fps_check_start: None,
            frames_at_check_start: 0,
            fps_warning_emitted: false,
        })
    }

    /// Warn once if frames arrive well below the negotiated rate.
    ///
    /// The window starts at the first delivered frame so startup latency
    /// is not counted.
    fn check_fps_mismatch(&mut self) {
        if self.fps_warning_emitted || self.fps <= 0.0 {
            return;
        }

        let Some(start) = self.fps_check_start else {
            self.fps_check_start = Some(Instant::now());
            self.frames_at_check_start = self.frames_delivered;
            return;
        };

        let elapsed = start.elapsed();
        if elapsed < FPS_CHECK_WINDOW {
            return;
        }

        let frames_in_window = self.frames_delivered - self.frames_at_check_start;
        let actual_fps = frames_in_window as f64 / elapsed.as_secs_f64();
        if actual_fps < self.fps * FPS_MISMATCH_RATIO {
            self.fps_warning_emitted = true;
            log::warn!(
                "[Capture] FPS mismatch for {}: {:.1} actual vs {:.1} reported",
                self.label,
                actual_fps,
                self.fps
            );
        }
    }
}

impl FrameSource for GstFrameSource {
    fn grab_frame(&mut self) -> Option<VideoFrame> {
        let frame = match self.pending.take() {
            Some(frame) => frame,
            None => {
                let sample = self.appsink.try_pull_sample(self.grab_timeout)?;
                let (frame, fps) = sample_to_frame(&sample)?;
                // Caps may be renegotiated mid-stream
                self.fps = fps;
                self.width = frame.width;
                self.height = frame.height;
                frame
            }
        };

        self.frames_delivered += 1;
        self.check_fps_mismatch();
        Some(frame)
    }

    fn reported_fps(&self) -> f64 {
        self.fps
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}

impl Drop for GstFrameSource {
    fn drop(&mut self) {
        self.pipeline.set_state(gst::State::Null).ok();
        log::debug!("[Capture] Closed {}", self.label);
    }
}

fn create_pipeline(source: &StreamSource) -> Result<(gst::Pipeline, gst_app::AppSink)> {
    let pipeline = gst::Pipeline::new();

    let videoconvert = gst::ElementFactory::make("videoconvert")
        .build()
        .map_err(|e| CaptureError::Pipeline(format!("Failed to create videoconvert: {}", e)))?;

    let caps = gst::Caps::builder("video/x-raw").field("format", "BGR").build();
    let capsfilter = gst::ElementFactory::make("capsfilter")
        .property("caps", &caps)
        .build()
        .map_err(|e| CaptureError::Pipeline(format!("Failed to create capsfilter: {}", e)))?;

    let appsink = gst_app::AppSink::builder()
        .name("sink")
        .max_buffers(1)
        .drop(true)
        .sync(false)
        .build();

    pipeline
        .add_many([&videoconvert, &capsfilter, appsink.upcast_ref()])
        .map_err(|e| CaptureError::Pipeline(format!("Failed to add elements: {}", e)))?;
    gst::Element::link_many([&videoconvert, &capsfilter, appsink.upcast_ref()])
        .map_err(|e| CaptureError::Pipeline(format!("Failed to link elements: {}", e)))?;

    match source {
        StreamSource::Device(index) => {
            let src = create_device_source(*index)?;
            pipeline
                .add(&src)
                .map_err(|e| CaptureError::Pipeline(format!("Failed to add source: {}", e)))?;
            src.link(&videoconvert)
                .map_err(|e| CaptureError::Pipeline(format!("Failed to link source: {}", e)))?;
        }
        StreamSource::Url(url) => {
            let decodebin = gst::ElementFactory::make("uridecodebin")
                .property("uri", url.as_str())
                .build()
                .map_err(|e| {
                    CaptureError::Pipeline(format!("Failed to create uridecodebin: {}", e))
                })?;
            pipeline
                .add(&decodebin)
                .map_err(|e| CaptureError::Pipeline(format!("Failed to add uridecodebin: {}", e)))?;

            // Link only the video pad once the decoder exposes it
            let videoconvert_weak = videoconvert.downgrade();
            decodebin.connect_pad_added(move |_decodebin, src_pad| {
                let Some(videoconvert) = videoconvert_weak.upgrade() else {
                    return;
                };
                let caps = src_pad
                    .current_caps()
                    .unwrap_or_else(|| src_pad.query_caps(None));
                let is_video = caps
                    .structure(0)
                    .map(|s| s.name().as_str().starts_with("video/"))
                    .unwrap_or(false);
                if !is_video {
                    return;
                }
                let Some(sink_pad) = videoconvert.static_pad("sink") else {
                    return;
                };
                if !sink_pad.is_linked() {
                    if let Err(e) = src_pad.link(&sink_pad) {
                        log::warn!("[Capture] Failed to link decoded video pad: {:?}", e);
                    }
                }
            });
        }
    }

    Ok((pipeline, appsink))
}

fn create_device_source(index: u32) -> Result<gst::Element> {
    #[cfg(target_os = "linux")]
    let src = gst::ElementFactory::make("v4l2src")
        .property("device", format!("/dev/video{}", index))
        .build();

    #[cfg(target_os = "windows")]
    let src = gst::ElementFactory::make("mfvideosrc")
        .property("device-index", index as i32)
        .build();

    #[cfg(target_os = "macos")]
    let src = gst::ElementFactory::make("avfvideosrc")
        .property("device-index", index as i32)
        .build();

    #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
    let src = {
        log::warn!("[Capture] No platform camera source, using autovideosrc for device {}", index);
        gst::ElementFactory::make("autovideosrc").build()
    };

    src.map_err(|e| CaptureError::Pipeline(format!("Failed to create camera source: {}", e)))
}

/// Copy a BGR sample into a tightly packed frame and read its frame rate
fn sample_to_frame(sample: &gst::Sample) -> Option<(VideoFrame, f64)> {
    let caps = sample.caps()?;
    let info = gst_video::VideoInfo::from_caps(caps).ok()?;
    let buffer = sample.buffer()?;
    let map = buffer.map_readable().ok()?;

    let width = info.width();
    let height = info.height();
    let stride = info.stride()[0] as usize;
    let offset = info.offset()[0];
    let row_bytes = width as usize * 3;

    let bytes = map.as_slice();
    let mut data = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = offset + row * stride;
        data.extend_from_slice(bytes.get(start..start + row_bytes)?);
    }

    let rate = info.fps();
    let fps = if rate.denom() > 0 {
        rate.numer() as f64 / rate.denom() as f64
    } else {
        0.0
    };

    Some((VideoFrame::new(width, height, 3, data), fps))
}

/// First error message waiting on the pipeline bus, if any
fn pipeline_error(pipeline: &gst::Pipeline) -> Option<String> {
    let bus = pipeline.bus()?;
    while let Some(msg) = bus.pop() {
        if let gst::MessageView::Error(err) = msg.view() {
            return Some(format!("{} ({:?})", err.error(), err.debug()));
        }
    }
    None
}
