// Video recording output
//
// This module defines the recording codecs, the sink abstraction the stream
// processor and motion detector write through, and the on-disk layout of
// recordings: <save root>/<YYYYMMDD>/<camera>_[motion_]<unix time>.<ext>
//
// To add a new codec:
// 1. Add variant to VideoCodec
// 2. Map it to a container in container()
// 3. Add the encoder element in gst_encoder() and the parser in gst_parser()

pub mod writer;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::frame::VideoFrame;

pub use writer::{GstVideoSinkFactory, GstVideoWriter};

/// Error type for video writer operations
#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("GStreamer error: {0}")]
    Gst(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Frame is {got_width}x{got_height}, writer expects {width}x{height}")]
    FrameSize {
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },

    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WriterError>;

/// Supported codecs for recordings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// Motion JPEG - cheap to encode, plays everywhere
    Mjpeg,
    /// H.264/AVC - widely supported, good compression
    H264,
}

impl Default for VideoCodec {
    fn default() -> Self {
        Self::Mjpeg
    }
}

impl VideoCodec {
    pub const ALL: &'static [VideoCodec] = &[VideoCodec::Mjpeg, VideoCodec::H264];

    /// Get the appropriate container format for this codec
    pub fn container(&self) -> ContainerFormat {
        match self {
            VideoCodec::Mjpeg => ContainerFormat::Avi,
            VideoCodec::H264 => ContainerFormat::Mp4,
        }
    }

    /// GStreamer encoder element name
    pub fn gst_encoder(&self) -> &'static str {
        match self {
            VideoCodec::Mjpeg => "jpegenc",
            VideoCodec::H264 => "x264enc",
        }
    }

    /// GStreamer parser element placed between encoder and muxer, if any
    pub fn gst_parser(&self) -> Option<&'static str> {
        match self {
            VideoCodec::Mjpeg => None,
            VideoCodec::H264 => Some("h264parse"),
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            VideoCodec::Mjpeg => "MJPEG",
            VideoCodec::H264 => "H.264",
        }
    }

    /// File extension of recordings made with this codec
    pub fn extension(&self) -> &'static str {
        self.container().extension()
    }
}

/// Supported container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    /// AVI (.avi)
    Avi,
    /// MP4 (.mp4)
    Mp4,
}

impl ContainerFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Avi => "avi",
            ContainerFormat::Mp4 => "mp4",
        }
    }

    pub fn gst_muxer(&self) -> &'static str {
        match self {
            ContainerFormat::Avi => "avimux",
            ContainerFormat::Mp4 => "mp4mux",
        }
    }
}

/// An open video output file
pub trait VideoSink: Send {
    /// Append one frame
    fn write_frame(&mut self, frame: &VideoFrame) -> Result<()>;

    /// Flush and close the file
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Opens video sinks. Implemented by the GStreamer writer and by test fakes.
pub trait VideoSinkFactory: Send + Sync {
    fn open(&self, path: &Path, width: u32, height: u32, fps: f64) -> Result<Box<dyn VideoSink>>;

    /// File extension of the files this factory writes
    fn extension(&self) -> &'static str;
}

/// One open output file plus its elapsed duration
pub struct RecordingSession {
    sink: Box<dyn VideoSink>,
    path: PathBuf,
    width: u32,
    height: u32,
    elapsed_secs: f64,
    frames_written: u64,
}

impl RecordingSession {
    pub fn new(sink: Box<dyn VideoSink>, path: PathBuf, width: u32, height: u32) -> Self {
        Self {
            sink,
            path,
            width,
            height,
            elapsed_secs: 0.0,
            frames_written: 0,
        }
    }

    /// Whether `frame` has the size this file was opened with
    pub fn fits(&self, frame: &VideoFrame) -> bool {
        frame.width == self.width && frame.height == self.height
    }

    /// Write a frame and advance the elapsed counter by one frame period
    pub fn write_frame(&mut self, frame: &VideoFrame, frame_period_secs: f64) -> Result<()> {
        self.sink.write_frame(frame)?;
        self.elapsed_secs += frame_period_secs;
        self.frames_written += 1;
        Ok(())
    }

    pub fn has_reached(&self, required_secs: f64) -> bool {
        self.elapsed_secs >= required_secs
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Close the file, logging any error
    pub fn close(self) {
        let path = self.path;
        match self.sink.finish() {
            Ok(()) => log::info!(
                "[Writer] Closed {} ({} frames, {:.1}s)",
                path.display(),
                self.frames_written,
                self.elapsed_secs
            ),
            Err(e) => log::error!("[Writer] Failed to finalize {}: {}", path.display(), e),
        }
    }
}

/// Replace characters that are illegal in file names
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' | ' ' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Name of the per-day recording directory
pub fn day_directory_name(now: &DateTime<Local>) -> String {
    now.format("%Y%m%d").to_string()
}

/// `<save_root>/<YYYYMMDD>/<camera>_[motion_]<unix time>.<ext>`
pub fn output_file_path(
    save_root: &Path,
    camera_name: &str,
    motion: bool,
    now: &DateTime<Local>,
    extension: &str,
) -> PathBuf {
    let prefix = if motion { "motion_" } else { "" };
    save_root.join(day_directory_name(now)).join(format!(
        "{}_{}{}.{}",
        sanitize_name(camera_name),
        prefix,
        now.timestamp(),
        extension
    ))
}

/// Create the dated directory and open a new recording file
pub fn open_recording_session(
    factory: &dyn VideoSinkFactory,
    save_root: &Path,
    camera_name: &str,
    motion: bool,
    now: &DateTime<Local>,
    (width, height, fps): (u32, u32, f64),
) -> Result<RecordingSession> {
    let path = output_file_path(save_root, camera_name, motion, now, factory.extension());
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| WriterError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    log::info!("[Writer] Creating new output video file: {}", path.display());
    let sink = factory.open(&path, width, height, fps)?;
    Ok(RecordingSession::new(sink, path, width, height))
}
