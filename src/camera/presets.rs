//! Motion sensitivity presets
//!
//! Each named sensitivity level maps to a fixed set of motion analysis
//! parameters. Higher sensitivity means a lower pixel threshold, a more
//! tolerant standard deviation ceiling and a smaller minimum motion area.
//!
//! | Mode   | Pixel threshold | Max std dev | Min area fraction | Smoothing |
//! |--------|-----------------|-------------|-------------------|-----------|
//! | Low    | 40              | 60          | 0.02              | 0.9       |
//! | Medium | 30              | 80          | 0.01              | 0.9       |
//! | High   | 20              | 100         | 0.005             | 0.9       |
//!
//! Manual mode reads the values stored on the camera instead.

use super::MotionDetectorMode;

/// Tunable inputs to the motion analyser
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionParameters {
    /// Per-pixel difference above which a pixel counts as changed (0-255)
    pub pixel_threshold: u8,
    /// Standard deviation of the thresholded motion image above which the
    /// frame is treated as a global change and ignored
    pub max_std_dev: f64,
    /// Minimum bounding-box area as a fraction of the processing frame area
    pub min_area_fraction: f64,
    /// Weight of the previous bounding box when blending (0 = no smoothing)
    pub smoothing_factor: f64,
}

const LOW: MotionParameters = MotionParameters {
    pixel_threshold: 40,
    max_std_dev: 60.0,
    min_area_fraction: 0.02,
    smoothing_factor: 0.9,
};

const MEDIUM: MotionParameters = MotionParameters {
    pixel_threshold: 30,
    max_std_dev: 80.0,
    min_area_fraction: 0.01,
    smoothing_factor: 0.9,
};

const HIGH: MotionParameters = MotionParameters {
    pixel_threshold: 20,
    max_std_dev: 100.0,
    min_area_fraction: 0.005,
    smoothing_factor: 0.9,
};

/// Fixed parameters for a named sensitivity mode.
///
/// Returns `None` for `Off` and `Manual`; manual values live on the camera.
pub fn preset_for_mode(mode: MotionDetectorMode) -> Option<MotionParameters> {
    match mode {
        MotionDetectorMode::Low => Some(LOW),
        MotionDetectorMode::Medium => Some(MEDIUM),
        MotionDetectorMode::High => Some(HIGH),
        MotionDetectorMode::Manual | MotionDetectorMode::Off => None,
    }
}
