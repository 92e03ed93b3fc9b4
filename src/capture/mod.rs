// Frame acquisition
//
// A capture source is anything that can open a stream by URL or device index
// and hand back decoded frames plus width, height and reported frame rate.

pub mod gst_capture;

use crate::camera::StreamSource;
use crate::frame::VideoFrame;

pub use gst_capture::GstCaptureBackend;

/// Error type for capture operations
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("GStreamer error: {0}")]
    Gst(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Failed to open stream {0}")]
    OpenFailed(String),

    #[error("Timed out waiting for the first frame from {0}")]
    NoFirstFrame(String),
}

pub type Result<T> = std::result::Result<T, CaptureError>;

/// An open stream delivering decoded frames
pub trait FrameSource: Send {
    /// Next decoded frame, or `None` if nothing arrived in time
    fn grab_frame(&mut self) -> Option<VideoFrame>;

    /// Frame rate currently reported by the stream
    fn reported_fps(&self) -> f64;

    fn width(&self) -> u32;

    fn height(&self) -> u32;
}

/// Opens frame sources
pub trait CaptureBackend: Send + Sync {
    fn open(&self, source: &StreamSource) -> Result<Box<dyn FrameSource>>;
}

/// Strip credentials from a URL before logging it
pub fn redact_source(source: &StreamSource) -> String {
    match source {
        StreamSource::Device(index) => format!("device {}", index),
        StreamSource::Url(url) => match (url.find("://"), url.find('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                format!("{}***{}", &url[..scheme_end + 3], &url[at..])
            }
            _ => url.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_are_hidden_in_logs() {
        let source = StreamSource::Url("rtsp://admin:pw@10.0.0.1/live".into());
        assert_eq!(redact_source(&source), "rtsp://***@10.0.0.1/live");
        let plain = StreamSource::Url("http://cam/mjpg".into());
        assert_eq!(redact_source(&plain), "http://cam/mjpg");
        assert_eq!(redact_source(&StreamSource::Device(3)), "device 3");
    }
}
