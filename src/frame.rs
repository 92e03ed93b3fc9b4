// Decoded video frames and display conversion

/// A decoded frame in packed 8-bit layout.
///
/// Three-channel frames are BGR, four-channel frames are BGRA and
/// single-channel frames are grayscale. Rows are tightly packed.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Self {
        Self { width, height, channels, data }
    }

    /// Frame filled with a single BGR colour
    pub fn filled_bgr(width: u32, height: u32, bgr: [u8; 3]) -> Self {
        let data = bgr
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self::new(width, height, 3, data)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }

    /// Width over height, 0 for an empty frame
    pub fn aspect_ratio(&self) -> f64 {
        aspect_ratio(self.width, self.height)
    }

    /// True when the buffer length matches the declared geometry
    pub fn is_consistent(&self) -> bool {
        self.data.len() == self.width as usize * self.height as usize * self.channels as usize
    }

    /// Luma plane using the Rec.601 weights applied by common BGR to gray
    /// conversions. Returns `None` for unsupported layouts.
    pub fn to_gray(&self) -> Option<Vec<u8>> {
        if self.is_empty() || !self.is_consistent() {
            return None;
        }
        match self.channels {
            1 => Some(self.data.clone()),
            3 | 4 => Some(
                self.data
                    .chunks_exact(self.channels as usize)
                    .map(|px| bgr_to_luma(px[0], px[1], px[2]))
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Convert into a buffer suitable for direct bitmap display.
    ///
    /// Unsupported layouts are logged and yield an empty frame.
    pub fn to_display_frame(&self) -> DisplayFrame {
        if self.is_empty() {
            return DisplayFrame::default();
        }
        if !self.is_consistent() {
            log::error!(
                "[Frame] Buffer size {} does not match {}x{}x{}",
                self.data.len(),
                self.width,
                self.height,
                self.channels
            );
            return DisplayFrame::default();
        }

        let (format, data) = match self.channels {
            4 => (
                DisplayFormat::Rgba8,
                self.data
                    .chunks_exact(4)
                    .flat_map(|px| [px[2], px[1], px[0], px[3]])
                    .collect(),
            ),
            3 => (
                DisplayFormat::Rgb8,
                self.data
                    .chunks_exact(3)
                    .flat_map(|px| [px[2], px[1], px[0]])
                    .collect(),
            ),
            1 => (DisplayFormat::Gray8, self.data.clone()),
            other => {
                log::error!("[Frame] Unsupported frame format: {} channel(s)", other);
                return DisplayFrame::default();
            }
        };

        DisplayFrame {
            width: self.width,
            height: self.height,
            format,
            data,
        }
    }
}

pub fn aspect_ratio(width: u32, height: u32) -> f64 {
    if height == 0 {
        0.0
    } else {
        width as f64 / height as f64
    }
}

fn bgr_to_luma(b: u8, g: u8, r: u8) -> u8 {
    let y = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    y.round().clamp(0.0, 255.0) as u8
}

/// Pixel layout of a display frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DisplayFormat {
    #[default]
    Rgb8,
    Rgba8,
    Gray8,
}

/// Row-major interleaved frame ready for display
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayFrame {
    pub width: u32,
    pub height: u32,
    pub format: DisplayFormat,
    pub data: Vec<u8>,
}

impl DisplayFrame {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgr_becomes_rgb() {
        let frame = VideoFrame::new(2, 1, 3, vec![1, 2, 3, 4, 5, 6]);
        let display = frame.to_display_frame();
        assert_eq!(display.format, DisplayFormat::Rgb8);
        assert_eq!(display.data, vec![3, 2, 1, 6, 5, 4]);
        assert_eq!((display.width, display.height), (2, 1));
    }

    #[test]
    fn bgra_keeps_alpha() {
        let frame = VideoFrame::new(1, 1, 4, vec![10, 20, 30, 40]);
        let display = frame.to_display_frame();
        assert_eq!(display.format, DisplayFormat::Rgba8);
        assert_eq!(display.data, vec![30, 20, 10, 40]);
    }

    #[test]
    fn gray_passes_through() {
        let frame = VideoFrame::new(2, 2, 1, vec![0, 64, 128, 255]);
        let display = frame.to_display_frame();
        assert_eq!(display.format, DisplayFormat::Gray8);
        assert_eq!(display.data, frame.data);
    }

    #[test]
    fn unsupported_or_inconsistent_frames_are_empty() {
        assert!(VideoFrame::new(1, 1, 2, vec![0, 0]).to_display_frame().is_empty());
        assert!(VideoFrame::new(4, 4, 3, vec![0; 5]).to_display_frame().is_empty());
        assert!(VideoFrame::default().to_display_frame().is_empty());
    }

    #[test]
    fn gray_conversion_of_primaries() {
        let white = VideoFrame::filled_bgr(2, 2, [255, 255, 255]);
        assert_eq!(white.to_gray().unwrap(), vec![255; 4]);

        let blue = VideoFrame::filled_bgr(1, 1, [255, 0, 0]);
        assert_eq!(blue.to_gray().unwrap(), vec![29]);
    }

    #[test]
    fn aspect_ratio_of_frames() {
        assert_eq!(VideoFrame::filled_bgr(1920, 1080, [0, 0, 0]).aspect_ratio(), 1920.0 / 1080.0);
        assert_eq!(VideoFrame::default().aspect_ratio(), 0.0);
    }
}
