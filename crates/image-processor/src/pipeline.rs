//! Full rasterization pipeline: transform -> grayscale -> binarize -> pack.

use image::DynamicImage;
use tracing::debug;

use crate::options::RasterOptions;
use crate::pack::{PackedBitmap, pack_for_printer};
use crate::{RasterError, Result, dither, grayscale, transform};

/// Rasterize an arbitrary image into a packed bitmap for the printer.
///
/// Stages: optional auto-rotate and rotation, fit to the dot-line width
/// (aspect-preserving, or scale-and-crop in label mode), grayscale with
/// alpha over white, dithering or thresholding, MSB-first bit packing.
pub fn rasterize(img: &DynamicImage, opts: &RasterOptions) -> Result<PackedBitmap> {
    if img.width() == 0 || img.height() == 0 {
        return Err(RasterError::EmptyImage);
    }

    let oriented = if opts.auto_rotate {
        transform::auto_rotate_portrait(img)
    } else {
        img.clone()
    };
    let rotated = transform::rotate(&oriented.to_rgba8(), opts.rotation);

    let fitted = match (opts.label_height, opts.fit_width) {
        (Some(height), _) => transform::scale_and_crop(&rotated, opts.dot_width, height)?,
        (None, true) => transform::resize_to_width(&rotated, opts.dot_width)?,
        (None, false) => rotated,
    };

    let gray = grayscale::to_grayscale(&fitted);
    let mono = if opts.dither {
        dither::floyd_steinberg_dither(&gray)
    } else {
        dither::threshold_convert(&gray, opts.threshold())
    };

    let packed = pack_for_printer(&mono, opts.dot_width)?;
    debug!(
        width = packed.width(),
        height = packed.height(),
        dither = opts.dither,
        "Rasterized image"
    );
    Ok(packed)
}

/// Receipt-style conversion: fit to `dot_width` keeping the aspect ratio,
/// after a clockwise rotation of `rotation` radians.
pub fn convert_image(img: &DynamicImage, dot_width: u32, rotation: f32) -> Result<PackedBitmap> {
    let opts = RasterOptions::new()
        .with_dot_width(dot_width)
        .with_rotation(rotation);
    rasterize(img, &opts)
}

/// Label-style conversion: scale and center-crop to exactly `dot_width x height`.
pub fn convert_label_image(
    img: &DynamicImage,
    dot_width: u32,
    height: u32,
    rotation: f32,
) -> Result<PackedBitmap> {
    let opts = RasterOptions::new()
        .with_dot_width(dot_width)
        .with_label_height(height)
        .with_rotation(rotation);
    rasterize(img, &opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgba, RgbaImage};

    fn gradient(width: u32, height: u32) -> DynamicImage {
        let mut img = GrayImage::new(width, height);
        for (x, y, px) in img.enumerate_pixels_mut() {
            *px = Luma([((x * 7 + y * 13) % 256) as u8]);
        }
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn test_rasterize_fits_dot_width() {
        let img = gradient(800, 400);
        let packed = rasterize(&img, &RasterOptions::default()).unwrap();
        assert_eq!(packed.width(), 384);
        assert_eq!(packed.height(), 192);
        assert_eq!(packed.data().len(), 48 * 192);
    }

    #[test]
    fn test_rasterize_is_deterministic() {
        let img = gradient(200, 120);
        let opts = RasterOptions::default();
        let a = rasterize(&img, &opts).unwrap();
        let b = rasterize(&img, &opts).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rasterize_label_mode_exact_size() {
        let img = gradient(640, 480);
        let packed = convert_label_image(&img, 384, 240, 0.0).unwrap();
        assert_eq!((packed.width(), packed.height()), (384, 240));
    }

    #[test]
    fn test_rasterize_without_fit_rejects_other_widths() {
        let img = gradient(300, 10);
        let opts = RasterOptions::new().with_fit_width(false);
        assert_eq!(
            rasterize(&img, &opts),
            Err(RasterError::UnsupportedWidth {
                expected: 384,
                actual: 300
            })
        );
    }

    #[test]
    fn test_rasterize_without_fit_accepts_exact_width() {
        let img = gradient(384, 10);
        let opts = RasterOptions::new().with_fit_width(false);
        assert!(rasterize(&img, &opts).is_ok());
    }

    #[test]
    fn test_transparent_image_prints_nothing() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(384, 8, Rgba([0, 0, 0, 0])));
        let packed = rasterize(&img, &RasterOptions::default()).unwrap();
        assert!(packed.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_threshold_mode_black_image_prints_everything() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(384, 4, Rgba([0, 0, 0, 255])));
        let opts = RasterOptions::new().with_dither(false);
        let packed = rasterize(&img, &opts).unwrap();
        assert!(packed.data().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_convert_image_quarter_turn() {
        // Portrait 100x400 rotated a quarter turn becomes landscape 400x100,
        // then fit to 384 wide.
        let img = gradient(100, 400);
        let packed = convert_image(&img, 384, std::f32::consts::FRAC_PI_2).unwrap();
        assert_eq!((packed.width(), packed.height()), (384, 96));
    }

    #[test]
    fn test_empty_image_rejected() {
        let img = DynamicImage::ImageLuma8(GrayImage::new(0, 0));
        assert_eq!(
            rasterize(&img, &RasterOptions::default()),
            Err(RasterError::EmptyImage)
        );
    }
}
