//! Raster pipeline options.
//!
//! These options control orientation, target geometry and the binarization
//! mode used when turning an arbitrary image into a printable bitmap.

use crate::DEFAULT_DOT_WIDTH;

/// Configuration options for [`crate::rasterize`].
#[derive(Debug, Clone)]
pub struct RasterOptions {
    /// Printer dot-line width; the packed bitmap is always exactly this wide.
    pub dot_width: u32,

    /// Fixed label height. When set, the image is scaled and center-cropped
    /// to `dot_width x label_height` instead of keeping its aspect ratio.
    pub label_height: Option<u32>,

    /// Clockwise rotation in radians applied before any resizing.
    pub rotation: f32,

    /// Automatically rotate landscape images to portrait for better resolution.
    pub auto_rotate: bool,

    /// Resize to `dot_width`. When disabled, an image of any other width
    /// is rejected with `UnsupportedWidth`.
    pub fit_width: bool,

    /// Apply Floyd-Steinberg dithering. When disabled, `black_point` thresholding is used.
    pub dither: bool,

    /// Black point threshold (0.0..=1.0). Pixels darker than this are printed
    /// as black when dithering is disabled.
    pub black_point: f32,
}

impl Default for RasterOptions {
    fn default() -> Self {
        Self {
            dot_width: DEFAULT_DOT_WIDTH,
            label_height: None,
            rotation: 0.0,
            auto_rotate: false,
            fit_width: true,
            dither: true,
            black_point: 0.5,
        }
    }
}

impl RasterOptions {
    /// Create options with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set the printer dot-line width.
    pub fn with_dot_width(mut self, val: u32) -> Self {
        self.dot_width = val;
        self
    }

    /// Builder: switch to label mode with a fixed height.
    pub fn with_label_height(mut self, val: u32) -> Self {
        self.label_height = Some(val);
        self
    }

    /// Builder: set clockwise rotation in radians.
    pub fn with_rotation(mut self, val: f32) -> Self {
        self.rotation = val;
        self
    }

    /// Builder: set auto-rotate flag.
    pub fn with_auto_rotate(mut self, val: bool) -> Self {
        self.auto_rotate = val;
        self
    }

    /// Builder: set fit-width flag.
    pub fn with_fit_width(mut self, val: bool) -> Self {
        self.fit_width = val;
        self
    }

    /// Builder: set dither flag.
    pub fn with_dither(mut self, val: bool) -> Self {
        self.dither = val;
        self
    }

    /// Builder: set black point threshold.
    ///
    /// # Panics
    /// Panics if value is not in 0.0..=1.0 range.
    pub fn with_black_point(mut self, val: f32) -> Self {
        assert!(
            (0.0..=1.0).contains(&val),
            "Black point must be between 0.0 and 1.0, got {val}"
        );
        self.black_point = val;
        self
    }

    /// Threshold byte derived from `black_point`.
    pub(crate) fn threshold(&self) -> u8 {
        (self.black_point * 255.0).round() as u8
    }
}
