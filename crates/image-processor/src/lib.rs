//! Image rasterization for 1-bit thermal printer output.
//!
//! Provides geometric transforms (rotate, crop, resize, scale-and-crop),
//! grayscale conversion, Floyd-Steinberg dithering and MSB-first bit packing,
//! plus a [`rasterize`] pipeline that chains them for a given dot-line width.

pub mod dither;
pub mod grayscale;
pub mod options;
pub mod pack;
pub mod pipeline;
pub mod transform;

// Re-exports for convenience
pub use dither::{floyd_steinberg_dither, threshold_convert};
pub use grayscale::{luminance, to_grayscale};
pub use options::RasterOptions;
pub use pack::{PackedBitmap, pack_bits, pack_for_printer};
pub use pipeline::{convert_image, convert_label_image, rasterize};
pub use transform::{auto_rotate_portrait, crop, resize, resize_to_width, rotate, scale_and_crop};

/// Default dot-line width in pixels (58mm paper at 203 DPI).
pub const DEFAULT_DOT_WIDTH: u32 = 384;

/// Errors that can occur while rasterizing an image.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RasterError {
    #[error("Unsupported width: printer expects {expected} dots, image has {actual}")]
    UnsupportedWidth { expected: u32, actual: u32 },

    #[error("Crop region {x},{y} {width}x{height} lies outside a {image_width}x{image_height} image")]
    InvalidRegion {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        image_width: u32,
        image_height: u32,
    },

    #[error("Packed bitmap is {actual} bytes, expected {expected}")]
    BitmapLength { expected: usize, actual: usize },

    #[error("Image has no pixels")]
    EmptyImage,
}

/// Result type alias for rasterization operations.
pub type Result<T> = std::result::Result<T, RasterError>;
