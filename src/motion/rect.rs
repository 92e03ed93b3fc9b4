// Integer rectangles in frame pixel coordinates

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle with its top-left corner at (x, y)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle spanning two corners, normalised so width/height are non-negative
    pub fn from_corners(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        let (left, right) = if x1 <= x2 { (x1, x2) } else { (x2, x1) };
        let (top, bottom) = if y1 <= y2 { (y1, y2) } else { (y2, y1) };
        Self::new(left, top, right - left, bottom - top)
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn area(&self) -> i64 {
        if self.width <= 0 || self.height <= 0 {
            0
        } else {
            self.width as i64 * self.height as i64
        }
    }

    pub fn is_empty(&self) -> bool {
        self.area() == 0
    }

    /// Overlap test. Empty rectangles never intersect anything.
    pub fn intersects(&self, other: &Rect) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corners_are_normalised() {
        let r = Rect::from_corners(30, 40, 10, 5);
        assert_eq!(r, Rect::new(10, 5, 20, 35));
        assert_eq!(r.right(), 30);
        assert_eq!(r.bottom(), 40);
    }

    #[test]
    fn degenerate_rect_has_zero_area() {
        assert_eq!(Rect::new(5, 5, 0, 10).area(), 0);
        assert_eq!(Rect::new(5, 5, 10, -1).area(), 0);
        assert!(Rect::default().is_empty());
    }

    #[test]
    fn overlapping_and_touching_rects() {
        let a = Rect::new(0, 0, 10, 10);
        assert!(a.intersects(&Rect::new(5, 5, 10, 10)));
        // Shared edge only
        assert!(!a.intersects(&Rect::new(10, 0, 5, 5)));
        assert!(!a.intersects(&Rect::new(20, 20, 5, 5)));
        assert!(!a.intersects(&Rect::new(2, 2, 0, 0)));
    }
}
