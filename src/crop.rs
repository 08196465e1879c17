//! Aspect-ratio cropping

use crate::position::{crop_axis, CropAxis};
use image::DynamicImage;
use serde::Serialize;

/// Pixel rectangle kept by a crop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Start offset of a `kept`-long window centred at `position · len`, kept in bounds
fn window_start(len: u32, kept: u32, position: f64) -> u32 {
    let centre = (f64::from(len) * position.clamp(0.0, 1.0)) as i64;
    let start = centre - i64::from(kept / 2);
    start.clamp(0, i64::from(len - kept)) as u32
}

/// Compute the region of a `width`×`height` image kept for `ratio` at `position`
///
/// One dimension is kept in full, the other is reduced to the largest whole
/// size matching `ratio`, never below one pixel.
#[must_use]
pub fn crop_region(width: u32, height: u32, ratio: f64, position: f64) -> CropRegion {
    if width == 0 || height == 0 {
        return CropRegion {
            x: 0,
            y: 0,
            width,
            height,
        };
    }

    match crop_axis(width, height, ratio) {
        CropAxis::Col => {
            let kept = ((f64::from(height) * ratio) as u32).clamp(1, width);
            CropRegion {
                x: window_start(width, kept, position),
                y: 0,
                width: kept,
                height,
            }
        },
        CropAxis::Row => {
            let kept = ((f64::from(width) / ratio) as u32).clamp(1, height);
            CropRegion {
                x: 0,
                y: window_start(height, kept, position),
                width,
                height: kept,
            }
        },
    }
}

/// Crop `image` to `ratio` around `position`
///
/// Pure: the source image is left untouched.
#[must_use]
pub fn crop(image: &DynamicImage, ratio: f64, position: f64) -> DynamicImage {
    let region = crop_region(image.width(), image.height(), ratio, position);
    image.crop_imm(region.x, region.y, region.width, region.height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_wide_image_to_portrait() {
        // floor(538 * 0.7) = 376, centre at 800, start clamped to 800 - 376
        let region = crop_region(800, 538, 0.7, 1.0);
        assert_eq!(
            region,
            CropRegion {
                x: 424,
                y: 0,
                width: 376,
                height: 538
            }
        );
    }

    #[test]
    fn test_tall_image_to_square() {
        let region = crop_region(1000, 1500, 1.0, 0.2);
        // centre 300, start 300 - 500 clamped to 0
        assert_eq!(
            region,
            CropRegion {
                x: 0,
                y: 0,
                width: 1000,
                height: 1000
            }
        );

        let region = crop_region(1000, 1500, 1.0, 0.6);
        assert_eq!(region.y, 400);
    }

    #[test]
    fn test_position_zero_and_one_hit_edges() {
        assert_eq!(crop_region(1920, 1080, 16.0 / 9.0 * 0.5, 0.0).x, 0);
        let region = crop_region(1920, 1080, 0.7, 1.0);
        assert_eq!(region.x + region.width, 1920);
    }

    #[test]
    fn test_exact_ratio_keeps_everything() {
        let region = crop_region(500, 1000, 0.5, 0.5);
        assert_eq!((region.width, region.height), (500, 1000));
        assert_eq!((region.x, region.y), (0, 0));
    }

    #[test]
    fn test_extreme_ratio_keeps_one_pixel() {
        let region = crop_region(100, 10, 0.01, 0.5);
        assert_eq!((region.width, region.height), (1, 10));
        let region = crop_region(10, 100, 1000.0, 0.5);
        assert_eq!((region.width, region.height), (10, 1));
    }

    #[test]
    fn test_crop_copies_pixels() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(40, 10, |x, _| Rgb([x as u8, 0, 0])));
        let cropped = crop(&image, 1.0, 1.0);

        assert_eq!((cropped.width(), cropped.height()), (10, 10));
        assert_eq!(cropped.to_rgb8().get_pixel(0, 0).0[0], 30);
        // Source untouched
        assert_eq!((image.width(), image.height()), (40, 10));
    }

    #[test]
    fn test_empty_image() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        let cropped = crop(&image, 0.7, 0.5);
        assert_eq!((cropped.width(), cropped.height()), (0, 0));
    }
}
