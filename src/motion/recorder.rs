// Motion triggered recording with a hold-off window
//
// A motion event opens (or rotates) the output file and resets the hold-off
// counter. Frames without an event advance the counter; once it reaches
// ceil(fps) * hold-off seconds the file is closed.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::encoding::{open_recording_session, RecordingSession, VideoSinkFactory};
use crate::frame::VideoFrame;

/// Default seconds of no motion before a recording closes
pub const DEFAULT_HOLD_OFF_SECS: f64 = 10.0;

pub struct MotionRecorder {
    camera_name: String,
    save_root: PathBuf,
    sinks: Arc<dyn VideoSinkFactory>,
    recording_enabled: bool,
    file_duration_secs: f64,
    fps: f64,
    frame_period_secs: f64,
    hold_off_limit: u64,
    hold_off_count: u64,
    session: Option<RecordingSession>,
}

impl MotionRecorder {
    pub fn new(
        camera_name: &str,
        save_root: PathBuf,
        sinks: Arc<dyn VideoSinkFactory>,
        recording_enabled: bool,
        file_duration_secs: f64,
        fps: f64,
        hold_off_secs: f64,
    ) -> Self {
        Self {
            camera_name: camera_name.to_string(),
            save_root,
            sinks,
            recording_enabled,
            file_duration_secs,
            fps,
            frame_period_secs: 1.0 / fps,
            hold_off_limit: hold_off_frames(fps, hold_off_secs),
            hold_off_count: 0,
            session: None,
        }
    }

    pub fn is_writing(&self) -> bool {
        self.session.is_some()
    }

    pub fn hold_off_limit(&self) -> u64 {
        self.hold_off_limit
    }

    /// Update the session for one frame and append the frame if a file is open
    pub fn on_frame(&mut self, frame: &VideoFrame, motion_event: bool, now: &DateTime<Local>) {
        if motion_event && self.recording_enabled {
            self.hold_off_count = 0;
            self.ensure_session(frame, now);
        } else if self.session.is_some() {
            self.hold_off_count += 1;
            if self.hold_off_count >= self.hold_off_limit {
                log::info!(
                    "[Motion] No motion for {} frames on {}, stopping recording",
                    self.hold_off_count,
                    self.camera_name
                );
                self.close();
            }
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Err(e) = session.write_frame(frame, self.frame_period_secs) {
            log::error!(
                "[Motion] Failed to write frame for {} to {}: {}",
                self.camera_name,
                session.path().display(),
                e
            );
            // The next motion event opens a fresh file
            self.close();
        }
    }

    /// Close any open file
    pub fn close(&mut self) {
        self.hold_off_count = 0;
        if let Some(session) = self.session.take() {
            session.close();
        }
    }

    fn ensure_session(&mut self, frame: &VideoFrame, now: &DateTime<Local>) {
        if let Some(session) = &self.session {
            if !session.has_reached(self.file_duration_secs) && session.fits(frame) {
                return;
            }
        }
        if let Some(old) = self.session.take() {
            old.close();
        }

        match open_recording_session(
            self.sinks.as_ref(),
            &self.save_root,
            &self.camera_name,
            true,
            now,
            (frame.width, frame.height, self.fps),
        ) {
            Ok(session) => self.session = Some(session),
            Err(e) => log::error!(
                "[Motion] Failed to open motion recording for {}: {}",
                self.camera_name,
                e
            ),
        }
    }
}

impl Drop for MotionRecorder {
    fn drop(&mut self) {
        self.close();
    }
}

/// Number of consecutive no-motion frames before a recording closes
pub fn hold_off_frames(fps: f64, hold_off_secs: f64) -> u64 {
    ((fps.ceil() * hold_off_secs).round() as u64).max(1)
}
