//! Three-frame differencing motion analysis
//!
//! Each new frame is compared against the two frames before it:
//!
//! ```text
//! motion = threshold(|prev - next| AND |next - current|)
//! ```
//!
//! The AND keeps only pixels that changed in both intervals, which rejects
//! ghosting from objects that have already moved on. The binary motion image
//! is eroded with a 2x2 kernel to remove speckle, then scanned (every second
//! row and column) for the extent of the changed pixels.
//!
//! A frame whose motion image has a standard deviation above the configured
//! ceiling is treated as a global change (rain, exposure flicker) and yields no
//! detection. Detected boxes are blended into a smoothed rectangle in original
//! frame coordinates. Without detection the rectangle collapses toward its
//! centre and reaches zero area after a few frames.

use image::imageops::{self, FilterType};
use image::GrayImage;

use super::Rect;
use crate::camera::{MotionParameters, MotionRegion};
use crate::frame::VideoFrame;

/// Frames taller than this are downscaled when shrinking is enabled
pub const IDEAL_FRAME_HEIGHT: u32 = 600;

/// Default margin added around the detected box, in processing pixels
pub const DEFAULT_BOX_MARGIN: i32 = 10;

const CHANGED: u8 = 255;

/// Fixed inputs for one analyser instance
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub params: MotionParameters,
    pub regions: Vec<MotionRegion>,
    pub shrink_frames: bool,
    pub box_margin: i32,
    pub original_width: u32,
    pub original_height: u32,
}

/// Result of analysing one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameAnalysis {
    /// Smoothed bounding rectangle in original frame coordinates
    pub motion_rect: Rect,
    /// A qualifying box was found on this frame, or the decaying rectangle
    /// still has area
    pub motion_detected: bool,
    /// The rectangle counts as a motion event for recording purposes
    pub triggered: bool,
    /// The frame was rejected as a global change
    pub suppressed: bool,
    /// Standard deviation of the thresholded motion image
    pub std_dev: f64,
}

/// Stateful per-camera analyser
pub struct MotionAnalyzer {
    config: AnalyzerConfig,
    scalar: f64,
    processing_width: u32,
    processing_height: u32,
    min_image_change_area: i64,
    region_rects: Vec<Rect>,
    prev: Option<GrayImage>,
    current: Option<GrayImage>,
    motion_rect: Rect,
}

impl MotionAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        let scalar = if config.shrink_frames && config.original_height > IDEAL_FRAME_HEIGHT {
            IDEAL_FRAME_HEIGHT as f64 / config.original_height as f64
        } else {
            1.0
        };

        let processing_width = ((config.original_width as f64 * scalar).round() as u32).max(1);
        let processing_height = ((config.original_height as f64 * scalar).round() as u32).max(1);

        let frame_area = config.original_width as f64 * config.original_height as f64 * scalar * scalar;
        let min_image_change_area = (frame_area * config.params.min_area_fraction) as i64;

        let region_rects = config
            .regions
            .iter()
            .map(|r| r.to_pixel_rect(config.original_width, config.original_height))
            .collect();

        if scalar < 1.0 {
            log::info!(
                "[Motion] Shrinking frames {}x{} -> {}x{} for analysis",
                config.original_width,
                config.original_height,
                processing_width,
                processing_height
            );
        }

        Self {
            config,
            scalar,
            processing_width,
            processing_height,
            min_image_change_area,
            region_rects,
            prev: None,
            current: None,
            motion_rect: Rect::default(),
        }
    }

    pub fn scalar(&self) -> f64 {
        self.scalar
    }

    pub fn motion_rect(&self) -> Rect {
        self.motion_rect
    }

    /// Analyse the next frame and advance the three-frame window.
    ///
    /// Returns `None` for frames that cannot be converted to grayscale; the
    /// window and rectangle are left untouched.
    pub fn process(&mut self, frame: &VideoFrame) -> Option<FrameAnalysis> {
        let next = self.to_processing_gray(frame)?;

        // First frame seeds the whole window
        let prev = self.prev.get_or_insert_with(|| next.clone());
        let current = self.current.get_or_insert_with(|| next.clone());

        let motion = motion_image(prev, current, &next, self.config.params.pixel_threshold);
        let std_dev = std_dev(&motion);
        let suppressed = std_dev >= self.config.params.max_std_dev;

        let detected_box = if suppressed {
            None
        } else {
            changed_extent(&motion).map(|(min_x, min_y, max_x, max_y)| {
                let max_col = motion.width() as i32 - 1;
                let max_row = motion.height() as i32 - 1;
                let margin = self.config.box_margin;
                (
                    (min_x - margin).max(0),
                    (min_y - margin).max(0),
                    (max_x + margin).min(max_col),
                    (max_y + margin).min(max_row),
                )
            })
        };

        let qualifying = detected_box.filter(|&(x1, y1, x2, y2)| {
            Rect::from_corners(x1, y1, x2, y2).area() > self.min_image_change_area
        });

        let motion_detected = match qualifying {
            Some((x1, y1, x2, y2)) => {
                let detected = Rect::from_corners(
                    (x1 as f64 / self.scalar) as i32,
                    (y1 as f64 / self.scalar) as i32,
                    (x2 as f64 / self.scalar) as i32,
                    (y2 as f64 / self.scalar) as i32,
                );
                self.motion_rect = self.blend(detected);
                true
            }
            None => {
                self.motion_rect = self.decay();
                !self.motion_rect.is_empty()
            }
        };

        let triggered = self.intersects_regions(&self.motion_rect);

        // Rotate the window
        self.prev = self.current.take();
        self.current = Some(next);

        Some(FrameAnalysis {
            motion_rect: self.motion_rect,
            motion_detected,
            triggered,
            suppressed,
            std_dev,
        })
    }

    /// Blend a detected box into the smoothed rectangle, corner by corner
    fn blend(&self, detected: Rect) -> Rect {
        let old = self.motion_rect;
        if old.is_empty() {
            return detected;
        }
        let f = self.config.params.smoothing_factor;
        let mix = |a: i32, b: i32| (a as f64 * f + b as f64 * (1.0 - f)) as i32;
        Rect::from_corners(
            mix(old.x, detected.x),
            mix(old.y, detected.y),
            mix(old.right(), detected.right()),
            mix(old.bottom(), detected.bottom()),
        )
    }

    /// Shrink the rectangle toward its centre
    fn decay(&self) -> Rect {
        let old = self.motion_rect;
        if old.is_empty() {
            return Rect::new(old.x, old.y, 0, 0);
        }
        let f = self.config.params.smoothing_factor;
        Rect::new(
            old.x + (old.width as f64 * 0.5) as i32,
            old.y + (old.height as f64 * 0.5) as i32,
            (old.width as f64 * f) as i32,
            (old.height as f64 * 0.25) as i32,
        )
    }

    /// Any non-empty rectangle counts when no regions are configured
    fn intersects_regions(&self, rect: &Rect) -> bool {
        if rect.is_empty() {
            return false;
        }
        if self.region_rects.is_empty() {
            return true;
        }
        self.region_rects.iter().any(|region| rect.intersects(region))
    }

    fn to_processing_gray(&self, frame: &VideoFrame) -> Option<GrayImage> {
        let luma = frame.to_gray()?;
        let gray = GrayImage::from_raw(frame.width, frame.height, luma)?;
        if gray.width() == self.processing_width && gray.height() == self.processing_height {
            Some(gray)
        } else {
            Some(imageops::resize(
                &gray,
                self.processing_width,
                self.processing_height,
                FilterType::Triangle,
            ))
        }
    }
}

/// Thresholded, eroded AND of the two frame differences
fn motion_image(prev: &GrayImage, current: &GrayImage, next: &GrayImage, threshold: u8) -> GrayImage {
    let (width, height) = next.dimensions();
    let mut raw = GrayImage::new(width, height);
    for ((out, (p, c)), n) in raw
        .pixels_mut()
        .zip(prev.pixels().zip(current.pixels()))
        .zip(next.pixels())
    {
        let diff1 = p.0[0].abs_diff(n.0[0]);
        let diff2 = n.0[0].abs_diff(c.0[0]);
        out.0[0] = if (diff1 & diff2) > threshold { CHANGED } else { 0 };
    }
    erode_2x2(&raw)
}

/// Erosion with a 2x2 rectangle anchored at its bottom-right cell.
/// Out-of-image neighbours are ignored.
fn erode_2x2(src: &GrayImage) -> GrayImage {
    let (width, height) = src.dimensions();
    let mut dst = GrayImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let mut value = src.get_pixel(x, y).0[0];
            if x > 0 {
                value = value.min(src.get_pixel(x - 1, y).0[0]);
            }
            if y > 0 {
                value = value.min(src.get_pixel(x, y - 1).0[0]);
                if x > 0 {
                    value = value.min(src.get_pixel(x - 1, y - 1).0[0]);
                }
            }
            dst.put_pixel(x, y, image::Luma([value]));
        }
    }
    dst
}

/// Population standard deviation of all pixel values
fn std_dev(img: &GrayImage) -> f64 {
    let n = (img.width() as f64) * (img.height() as f64);
    if n == 0.0 {
        return 0.0;
    }
    let (sum, sum_sq) = img.pixels().fold((0.0f64, 0.0f64), |(s, sq), p| {
        let v = p.0[0] as f64;
        (s + v, sq + v * v)
    });
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0).sqrt()
}

/// Min/max coordinates of changed pixels, sampling every second row and column
fn changed_extent(motion: &GrayImage) -> Option<(i32, i32, i32, i32)> {
    let mut extent: Option<(i32, i32, i32, i32)> = None;
    for y in (0..motion.height()).step_by(2) {
        for x in (0..motion.width()).step_by(2) {
            if motion.get_pixel(x, y).0[0] != CHANGED {
                continue;
            }
            let (x, y) = (x as i32, y as i32);
            extent = Some(match extent {
                None => (x, y, x, y),
                Some((x1, y1, x2, y2)) => (x1.min(x), y1.min(y), x2.max(x), y2.max(y)),
            });
        }
    }
    extent
}
