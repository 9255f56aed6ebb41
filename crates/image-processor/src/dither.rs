//! Dithering algorithms for converting grayscale images to black-and-white.
//!
//! Provides Floyd-Steinberg error-diffusion dithering and simple threshold conversion.
//! Output pixels are always either 0 (black, printed) or 255 (white).

use image::{GrayImage, Luma};
use tracing::debug;

/// Quantization threshold for error diffusion.
const THRESHOLD: i32 = 128;

/// Apply Floyd-Steinberg dithering to a grayscale image.
///
/// Pixels are visited row-major, left to right. The quantization error is
/// distributed with integer weights, so identical input always yields
/// identical output. The bottom-right share takes the rounding remainder so
/// the whole error is passed on:
/// - Right:        7/16
/// - Bottom-left:  3/16
/// - Bottom:       5/16
/// - Bottom-right: 1/16
pub fn floyd_steinberg_dither(img: &GrayImage) -> GrayImage {
    let (width, height) = img.dimensions();
    debug!(width, height, "Applying Floyd-Steinberg dithering");

    let w = width as usize;
    let h = height as usize;
    // Widened buffer so accumulated error cannot overflow.
    let mut buffer: Vec<i32> = img.pixels().map(|p| i32::from(p.0[0])).collect();

    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            let old_pixel = buffer[idx];
            let new_pixel = if old_pixel >= THRESHOLD { 255 } else { 0 };
            buffer[idx] = new_pixel;
            let [right, below_left, below_mid, below_right] = diffuse(old_pixel - new_pixel);

            if x + 1 < w {
                buffer[idx + 1] += right;
            }
            if y + 1 < h {
                let below = idx + w;
                if x > 0 {
                    buffer[below - 1] += below_left;
                }
                buffer[below] += below_mid;
                if x + 1 < w {
                    buffer[below + 1] += below_right;
                }
            }
        }
    }

    let pixels: Vec<u8> = buffer.into_iter().map(|v| v.clamp(0, 255) as u8).collect();
    GrayImage::from_raw(width, height, pixels).unwrap_or_else(|| GrayImage::new(width, height))
}

/// Split a quantization error into right, bottom-left, bottom and
/// bottom-right shares.
fn diffuse(error: i32) -> [i32; 4] {
    let right = error * 7 / 16;
    let below_left = error * 3 / 16;
    let below = error * 5 / 16;
    [right, below_left, below, error - right - below_left - below]
}

/// Simple threshold conversion without dithering.
///
/// Pixels with values >= `threshold` become white (255), others become black (0).
pub fn threshold_convert(img: &GrayImage, threshold: u8) -> GrayImage {
    let (width, height) = img.dimensions();
    debug!(width, height, threshold, "Applying threshold conversion");

    let mut output = GrayImage::new(width, height);
    for (x, y, px) in img.enumerate_pixels() {
        let new_val = if px.0[0] >= threshold { 255 } else { 0 };
        output.put_pixel(x, y, Luma([new_val]));
    }
    output
}
