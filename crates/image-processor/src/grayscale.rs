//! Grayscale conversion.
//!
//! Alpha is composited against white, then luminance is computed with
//! BT.601 weights (0.299 R + 0.587 G + 0.114 B) in integer arithmetic so the
//! result is identical on every platform.

use image::{GrayImage, Luma, RgbaImage};

/// BT.601 luminance of an opaque RGB triple.
#[inline]
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    let weighted = 299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b);
    ((weighted + 500) / 1000) as u8
}

/// Composite one channel against a white background.
#[inline]
fn over_white(channel: u8, alpha: u8) -> u8 {
    let c = u32::from(channel);
    let a = u32::from(alpha);
    ((c * a + 255 * (255 - a) + 127) / 255) as u8
}

/// Convert an RGBA image to 8-bit grayscale.
pub fn to_grayscale(img: &RgbaImage) -> GrayImage {
    let (width, height) = img.dimensions();
    let mut out = GrayImage::new(width, height);
    for (x, y, px) in img.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        let value = luminance(over_white(r, a), over_white(g, a), over_white(b, a));
        out.put_pixel(x, y, Luma([value]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_luminance_extremes() {
        assert_eq!(luminance(0, 0, 0), 0);
        assert_eq!(luminance(255, 255, 255), 255);
    }

    #[test]
    fn test_luminance_weights() {
        // 0.299 * 255 = 76.245
        assert_eq!(luminance(255, 0, 0), 76);
        // 0.587 * 255 = 149.685
        assert_eq!(luminance(0, 255, 0), 150);
        // 0.114 * 255 = 29.07
        assert_eq!(luminance(0, 0, 255), 29);
    }

    #[test]
    fn test_transparent_pixels_become_white() {
        let img = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 0]));
        let gray = to_grayscale(&img);
        assert!(gray.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn test_half_transparent_black_is_mid_gray() {
        let img = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 128]));
        let gray = to_grayscale(&img);
        // 255 * 127 / 255 = 127
        assert_eq!(gray.get_pixel(0, 0).0[0], 127);
    }

    #[test]
    fn test_preserves_dimensions() {
        let img = RgbaImage::new(7, 3);
        assert_eq!(to_grayscale(&img).dimensions(), (7, 3));
    }
}
