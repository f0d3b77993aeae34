use serde::{Deserialize, Serialize};

/// Minimum accepted edge length of a selection, in pixels.
///
/// A drag that ends with either dimension below this value is treated as
/// "no selection" rather than as a tiny region.
pub const MIN_SELECTION_SIZE: u32 = 10;

/// A user-selected rectangle in screen pixels, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build the normalized rectangle spanned by two drag points.
    ///
    /// The points may be given in any order; the result always has its origin at the
    /// top-left corner of the span.
    pub fn from_points(start: (u32, u32), end: (u32, u32)) -> Self {
        let x = start.0.min(end.0);
        let y = start.1.min(end.1);
        Self {
            x,
            y,
            width: start.0.abs_diff(end.0),
            height: start.1.abs_diff(end.1),
        }
    }

    /// True when both dimensions reach [`MIN_SELECTION_SIZE`].
    pub fn is_acceptable(&self) -> bool {
        self.width >= MIN_SELECTION_SIZE && self.height >= MIN_SELECTION_SIZE
    }

    /// Scale overlay-local coordinates into image pixel space.
    pub fn scaled(&self, factor_x: f64, factor_y: f64) -> Self {
        let scale = |v: u32, f: f64| (v as f64 * f).round().max(0.0) as u32;
        Self {
            x: scale(self.x, factor_x),
            y: scale(self.y, factor_y),
            width: scale(self.width, factor_x),
            height: scale(self.height, factor_y),
        }
    }

    /// Clamp the region so it lies entirely within an image of the given size.
    ///
    /// Returns `None` when nothing of the region overlaps the image.
    pub fn clamp_to(&self, image_width: u32, image_height: u32) -> Option<Self> {
        if self.x >= image_width || self.y >= image_height {
            return None;
        }
        let width = self.width.min(image_width - self.x);
        let height = self.height.min(image_height - self.y);
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self::new(self.x, self.y, width, height))
    }
}
