//! Bit packing of monochrome images into the printer's native bitmap format.
//!
//! Layout: row-major, top to bottom; each row is `ceil(width / 8)` bytes,
//! 8 horizontally consecutive pixels per byte, most significant bit first.
//! A set bit is a black (printed) dot. Rows whose width is not a multiple
//! of 8 are right-padded with white (0) bits.

use image::GrayImage;
use tracing::debug;

use crate::{RasterError, Result};

/// Pixels darker than this are packed as black.
const BLACK_BELOW: u8 = 128;

/// A packed 1-bit-per-pixel bitmap ready for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedBitmap {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PackedBitmap {
    /// Wrap already-packed rows. Fails if `data` is not exactly
    /// `row_bytes(width) * height` bytes long.
    pub fn from_packed(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(RasterError::EmptyImage);
        }
        let expected = Self::row_bytes_for(width) * height as usize;
        if data.len() != expected {
            return Err(RasterError::BitmapLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Bytes per packed row for a given pixel width.
    pub fn row_bytes_for(width: u32) -> usize {
        (width as usize).div_ceil(8)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per packed row.
    pub fn row_bytes(&self) -> usize {
        Self::row_bytes_for(self.width)
    }

    /// Packed bytes, row-major.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the bitmap, returning the packed bytes.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Whether the dot at `(x, y)` is black.
    pub fn is_black(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let byte = self.data[y as usize * self.row_bytes() + (x / 8) as usize];
        byte & (0x80 >> (x % 8)) != 0
    }
}

/// Pack a monochrome (or grayscale) image into MSB-first rows.
pub fn pack_bits(img: &GrayImage) -> Result<PackedBitmap> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(RasterError::EmptyImage);
    }

    let row_bytes = PackedBitmap::row_bytes_for(width);
    let mut data = vec![0u8; row_bytes * height as usize];
    for (out, row) in data.chunks_mut(row_bytes).zip(img.rows()) {
        for (x, px) in row.enumerate() {
            if px.0[0] < BLACK_BELOW {
                out[x / 8] |= 0x80 >> (x % 8);
            }
        }
    }

    debug!(width, height, bytes = data.len(), "Packed bitmap");
    Ok(PackedBitmap {
        width,
        height,
        data,
    })
}

/// Pack an image whose width must equal the printer's dot-line width.
///
/// A mismatch is rejected rather than truncated or stretched.
pub fn pack_for_printer(img: &GrayImage, dot_width: u32) -> Result<PackedBitmap> {
    if img.width() != dot_width {
        return Err(RasterError::UnsupportedWidth {
            expected: dot_width,
            actual: img.width(),
        });
    }
    pack_bits(img)
}
