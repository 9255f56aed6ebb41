//! Geometric transforms applied before binarization.
//!
//! Provides arbitrary-angle rotation (bilinear), automatic portrait
//! orientation, cropping, exact and aspect-preserving resizes, and
//! scale-and-crop to a fixed aspect ratio.

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use tracing::debug;

use crate::{RasterError, Result};

/// Fill used for canvas areas uncovered by a rotation (transparent, composited to white later).
const ROTATION_FILL: Rgba<u8> = Rgba([255, 255, 255, 0]);

/// Rotate an image clockwise by `radians` using bilinear resampling.
///
/// The canvas grows to the rotated bounding box so no source pixel is lost.
/// Uncovered corners are transparent and turn white during grayscale conversion.
pub fn rotate(img: &RgbaImage, radians: f32) -> RgbaImage {
    let turns = radians.rem_euclid(std::f32::consts::TAU);
    if turns == 0.0 || img.width() == 0 || img.height() == 0 {
        return img.clone();
    }

    let (w, h) = (img.width() as f32, img.height() as f32);
    let (sin, cos) = radians.sin_cos();
    let new_w = (w * cos.abs() + h * sin.abs()).round().max(1.0) as u32;
    let new_h = (w * sin.abs() + h * cos.abs()).round().max(1.0) as u32;
    debug!(
        from_w = img.width(),
        from_h = img.height(),
        new_w,
        new_h,
        radians,
        "Rotating image"
    );

    let projection = Projection::translate(new_w as f32 / 2.0, new_h as f32 / 2.0)
        * Projection::rotate(radians)
        * Projection::translate(-w / 2.0, -h / 2.0);

    let mut out = RgbaImage::from_pixel(new_w, new_h, ROTATION_FILL);
    warp_into(img, &projection, Interpolation::Bilinear, ROTATION_FILL, &mut out);
    out
}

/// Automatically rotate a landscape image to portrait orientation.
///
/// If the image is wider than it is tall (landscape), rotates it 90 degrees
/// clockwise to make it portrait. Portrait or square images are returned unchanged.
pub fn auto_rotate_portrait(img: &DynamicImage) -> DynamicImage {
    let (w, h) = (img.width(), img.height());

    if w > h {
        debug!(w, h, "Landscape image detected, rotating to portrait");
        img.rotate90()
    } else {
        img.clone()
    }
}

/// Crop an image to the given rectangle.
///
/// The rectangle must lie entirely inside the image and have a non-zero area.
pub fn crop(img: &RgbaImage, x: u32, y: u32, width: u32, height: u32) -> Result<RgbaImage> {
    let fits = width > 0
        && height > 0
        && x.checked_add(width).is_some_and(|r| r <= img.width())
        && y.checked_add(height).is_some_and(|b| b <= img.height());
    if !fits {
        return Err(RasterError::InvalidRegion {
            x,
            y,
            width,
            height,
            image_width: img.width(),
            image_height: img.height(),
        });
    }
    Ok(imageops::crop_imm(img, x, y, width, height).to_image())
}

/// Resize an image to exact target dimensions (bilinear filtering).
pub fn resize(img: &RgbaImage, width: u32, height: u32) -> Result<RgbaImage> {
    if width == 0 || height == 0 || img.width() == 0 || img.height() == 0 {
        return Err(RasterError::EmptyImage);
    }
    if img.dimensions() == (width, height) {
        return Ok(img.clone());
    }
    Ok(imageops::resize(img, width, height, FilterType::Triangle))
}

/// Resize an image to a target width while maintaining aspect ratio.
///
/// Uses Lanczos3 filtering for high-quality downsampling.
/// Returns the original image unchanged if it already matches the target width.
pub fn resize_to_width(img: &RgbaImage, width: u32) -> Result<RgbaImage> {
    let (orig_w, orig_h) = img.dimensions();
    if width == 0 || orig_w == 0 || orig_h == 0 {
        return Err(RasterError::EmptyImage);
    }

    if orig_w == width {
        debug!(width, "Image already at target width, skipping resize");
        return Ok(img.clone());
    }

    let ratio = f64::from(width) / f64::from(orig_w);
    let new_height = ((f64::from(orig_h) * ratio).round() as u32).max(1);

    debug!(
        orig_w,
        orig_h,
        new_width = width,
        new_height,
        "Resizing image to target width"
    );

    Ok(imageops::resize(img, width, new_height, FilterType::Lanczos3))
}

/// Scale and center-crop an image to exactly `width x height`.
///
/// The dimension that is too large for the target aspect ratio is cropped
/// equally from both edges first, then the remainder is resized.
pub fn scale_and_crop(img: &RgbaImage, width: u32, height: u32) -> Result<RgbaImage> {
    let (src_w, src_h) = img.dimensions();
    if width == 0 || height == 0 || src_w == 0 || src_h == 0 {
        return Err(RasterError::EmptyImage);
    }

    // Compare src_w/src_h against width/height without floating point.
    let lhs = u64::from(src_w) * u64::from(height);
    let rhs = u64::from(width) * u64::from(src_h);

    let (crop_w, crop_h) = if lhs > rhs {
        // Too wide: keep full height.
        let w = (rhs / u64::from(height)).max(1) as u32;
        (w, src_h)
    } else {
        let h = (lhs / u64::from(width)).max(1) as u32;
        (src_w, h)
    };
    let x = (src_w - crop_w) / 2;
    let y = (src_h - crop_h) / 2;

    debug!(src_w, src_h, crop_w, crop_h, width, height, "Scale and crop");
    let cropped = crop(img, x, y, crop_w, crop_h)?;
    resize(&cropped, width, height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, GrayImage, Luma, Pixel};

    /// Create a test image with unique pixel values at corners.
    /// Top-left=10, Top-right=20, Bottom-left=30, Bottom-right=40
    fn create_corner_image(width: u32, height: u32) -> DynamicImage {
        let mut img = GrayImage::from_pixel(width, height, Luma([128]));
        img.put_pixel(0, 0, Luma([10]));
        img.put_pixel(width - 1, 0, Luma([20]));
        img.put_pixel(0, height - 1, Luma([30]));
        img.put_pixel(width - 1, height - 1, Luma([40]));
        DynamicImage::ImageLuma8(img)
    }

    fn pixel_value(img: &DynamicImage, x: u32, y: u32) -> u8 {
        img.to_luma8().get_pixel(x, y).channels()[0]
    }

    fn solid(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]))
    }

    #[test]
    fn test_rotate_zero_is_identity() {
        let img = create_corner_image(5, 3).to_rgba8();
        let rotated = rotate(&img, 0.0);
        assert_eq!(rotated, img);
    }

    #[test]
    fn test_rotate_quarter_turn_swaps_dimensions() {
        let img = solid(40, 20);
        let rotated = rotate(&img, std::f32::consts::FRAC_PI_2);
        assert_eq!(rotated.dimensions(), (20, 40));
    }

    #[test]
    fn test_rotate_half_turn_keeps_dimensions() {
        let img = solid(30, 10);
        let rotated = rotate(&img, std::f32::consts::PI);
        assert_eq!(rotated.dimensions(), (30, 10));
        // Center stays covered by the opaque source.
        assert_eq!(rotated.get_pixel(15, 5).0[3], 255);
    }

    #[test]
    fn test_rotate_diagonal_grows_canvas() {
        let img = solid(10, 10);
        let rotated = rotate(&img, std::f32::consts::FRAC_PI_4);
        // 10 * (cos45 + sin45) ~= 14.14
        assert_eq!(rotated.dimensions(), (14, 14));
        // Corners of the grown canvas are uncovered.
        assert_eq!(rotated.get_pixel(0, 0).0[3], 0);
    }

    #[test]
    fn test_auto_rotate_landscape_to_portrait() {
        let img = create_corner_image(8, 4);
        let result = auto_rotate_portrait(&img);
        assert_eq!(result.dimensions(), (4, 8));
    }

    #[test]
    fn test_auto_rotate_portrait_unchanged() {
        let img = create_corner_image(4, 8);
        let result = auto_rotate_portrait(&img);
        assert_eq!(result.dimensions(), (4, 8));
        assert_eq!(pixel_value(&result, 0, 0), 10);
    }

    #[test]
    fn test_auto_rotate_landscape_corner_values() {
        let img = create_corner_image(6, 3);
        let result = auto_rotate_portrait(&img);

        assert_eq!(result.dimensions(), (3, 6));
        // 90-degree clockwise: bottom-left moves to top-left.
        assert_eq!(pixel_value(&result, 2, 0), 10);
        assert_eq!(pixel_value(&result, 2, 5), 20);
        assert_eq!(pixel_value(&result, 0, 0), 30);
        assert_eq!(pixel_value(&result, 0, 5), 40);
    }

    #[test]
    fn test_crop_inside_bounds() {
        let img = create_corner_image(6, 4).to_rgba8();
        let cropped = crop(&img, 5, 3, 1, 1).unwrap();
        assert_eq!(cropped.dimensions(), (1, 1));
        assert_eq!(cropped.get_pixel(0, 0).0[0], 40);
    }

    #[test]
    fn test_crop_outside_bounds_rejected() {
        let img = solid(6, 4);
        assert!(matches!(
            crop(&img, 4, 0, 3, 1),
            Err(RasterError::InvalidRegion { .. })
        ));
        assert!(matches!(
            crop(&img, 0, 0, 0, 1),
            Err(RasterError::InvalidRegion { .. })
        ));
        assert!(matches!(
            crop(&img, u32::MAX, 0, 2, 1),
            Err(RasterError::InvalidRegion { .. })
        ));
    }

    #[test]
    fn test_resize_exact() {
        let img = solid(100, 50);
        let result = resize(&img, 30, 70).unwrap();
        assert_eq!(result.dimensions(), (30, 70));
        assert_eq!(resize(&img, 0, 10), Err(RasterError::EmptyImage));
    }

    #[test]
    fn test_resize_to_width_downscale() {
        let img = solid(800, 600);
        let result = resize_to_width(&img, 400).unwrap();
        assert_eq!(result.dimensions(), (400, 300));
    }

    #[test]
    fn test_resize_to_width_paper_width() {
        let img = solid(1920, 1080);
        let result = resize_to_width(&img, crate::DEFAULT_DOT_WIDTH).unwrap();
        // 1080 * (384/1920) = 216
        assert_eq!(result.dimensions(), (384, 216));
    }

    #[test]
    fn test_resize_to_width_same_width() {
        let img = solid(384, 500);
        let result = resize_to_width(&img, 384).unwrap();
        assert_eq!(result.dimensions(), (384, 500));
    }

    #[test]
    fn test_scale_and_crop_wide_source_crops_width() {
        // 4:1 source into 1:1 target: crop 100px from each side.
        let mut img = solid(400, 100);
        for y in 0..100 {
            for x in 0..100 {
                img.put_pixel(x, y, Rgba([255, 255, 255, 255]));
                img.put_pixel(399 - x, y, Rgba([255, 255, 255, 255]));
            }
        }
        let result = scale_and_crop(&img, 50, 50).unwrap();
        assert_eq!(result.dimensions(), (50, 50));
        // Only the black center survives.
        assert!(result.pixels().all(|p| p.0[0] < 16));
    }

    #[test]
    fn test_scale_and_crop_tall_source_crops_height() {
        let img = solid(100, 300);
        let result = scale_and_crop(&img, 384, 192).unwrap();
        assert_eq!(result.dimensions(), (384, 192));
    }
}
