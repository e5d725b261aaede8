//! Image → NCHW tensor ("blob") construction.
//!
//! Resizes (optionally with a centre crop), reorders channels, subtracts a
//! per-channel mean and scales, producing the `(1, 3, H, W)` float layout the
//! embedding network consumes.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, RgbImage};
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_INPUT_SIZE: u32 = 112;
pub const DEFAULT_SCALE: f32 = 1.0;
pub const DEFAULT_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("input image is empty ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error("target size must be non-zero, got {width}x{height}")]
    InvalidTargetSize { width: u32, height: u32 },
}

/// Parameters for [`blob_from_image`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobParams {
    /// Multiplier applied after mean subtraction.
    pub scale: f32,
    pub width: u32,
    pub height: u32,
    /// Per-channel mean, in output channel order.
    pub mean: [f32; 3],
    /// Emit B, G, R planes instead of R, G, B.
    pub swap_rb: bool,
    /// Resize preserving aspect ratio and centre-crop instead of stretching.
    pub crop: bool,
}

impl Default for BlobParams {
    fn default() -> Self {
        Self {
            scale: DEFAULT_SCALE,
            width: DEFAULT_INPUT_SIZE,
            height: DEFAULT_INPUT_SIZE,
            mean: DEFAULT_MEAN,
            swap_rb: true,
            crop: false,
        }
    }
}

/// Build a `(1, 3, height, width)` tensor from an image.
pub fn blob_from_image(img: &DynamicImage, params: &BlobParams) -> Result<Array4<f32>, BlobError> {
    let (src_w, src_h) = img.dimensions();
    if src_w == 0 || src_h == 0 {
        return Err(BlobError::EmptyImage {
            width: src_w,
            height: src_h,
        });
    }
    if params.width == 0 || params.height == 0 {
        return Err(BlobError::InvalidTargetSize {
            width: params.width,
            height: params.height,
        });
    }

    let rgb = resize_rgb(img, params);
    let (w, h) = (params.width as usize, params.height as usize);

    // Source channel feeding each output plane.
    let order: [usize; 3] = if params.swap_rb { [2, 1, 0] } else { [0, 1, 2] };

    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for (c, &src) in order.iter().enumerate() {
            tensor[[0, c, y as usize, x as usize]] =
                (pixel[src] as f32 - params.mean[c]) * params.scale;
        }
    }

    Ok(tensor)
}

/// Resize to exactly `params.width × params.height`, cropping the centre when
/// `params.crop` is set.
fn resize_rgb(img: &DynamicImage, params: &BlobParams) -> RgbImage {
    let (src_w, src_h) = img.dimensions();
    let (dst_w, dst_h) = (params.width, params.height);

    if (src_w, src_h) == (dst_w, dst_h) {
        return img.to_rgb8();
    }

    if !params.crop {
        return img.resize_exact(dst_w, dst_h, FilterType::Triangle).to_rgb8();
    }

    // Scale so the image covers the target, then take the middle.
    let scale = (dst_w as f32 / src_w as f32).max(dst_h as f32 / src_h as f32);
    let cover_w = ((src_w as f32 * scale).round() as u32).max(dst_w);
    let cover_h = ((src_h as f32 * scale).round() as u32).max(dst_h);
    let covered = img.resize_exact(cover_w, cover_h, FilterType::Triangle).to_rgb8();

    let x = (cover_w - dst_w) / 2;
    let y = (cover_h - dst_h) / 2;
    imageops::crop_imm(&covered, x, y, dst_w, dst_h).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(w: u32, h: u32, rgb: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb(rgb)))
    }

    #[test]
    fn test_blob_output_shape() {
        let img = solid(300, 200, [10, 20, 30]);
        let blob = blob_from_image(&img, &BlobParams::default()).unwrap();
        assert_eq!(blob.shape(), &[1, 3, 112, 112]);
    }

    #[test]
    fn test_blob_non_square_target() {
        let img = solid(64, 64, [0, 0, 0]);
        let params = BlobParams {
            width: 96,
            height: 112,
            ..Default::default()
        };
        let blob = blob_from_image(&img, &params).unwrap();
        assert_eq!(blob.shape(), &[1, 3, 112, 96]);
    }

    #[test]
    fn test_blob_mean_and_scale() {
        let img = solid(112, 112, [200, 100, 50]);
        let params = BlobParams {
            scale: 0.5,
            mean: [10.0, 20.0, 30.0],
            swap_rb: false,
            ..Default::default()
        };
        let blob = blob_from_image(&img, &params).unwrap();
        assert!((blob[[0, 0, 5, 5]] - (200.0 - 10.0) * 0.5).abs() < 1e-6);
        assert!((blob[[0, 1, 5, 5]] - (100.0 - 20.0) * 0.5).abs() < 1e-6);
        assert!((blob[[0, 2, 5, 5]] - (50.0 - 30.0) * 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_blob_swap_rb_reverses_channels() {
        let img = solid(112, 112, [200, 100, 50]);
        let params = BlobParams {
            mean: [0.0; 3],
            swap_rb: true,
            ..Default::default()
        };
        let blob = blob_from_image(&img, &params).unwrap();
        assert_eq!(blob[[0, 0, 0, 0]], 50.0);
        assert_eq!(blob[[0, 1, 0, 0]], 100.0);
        assert_eq!(blob[[0, 2, 0, 0]], 200.0);
    }

    #[test]
    fn test_blob_default_mean_applied() {
        let img = solid(112, 112, [1, 1, 1]);
        let blob = blob_from_image(&img, &BlobParams::default()).unwrap();
        assert!((blob[[0, 0, 0, 0]] - (1.0 - 0.485)).abs() < 1e-6);
        assert!((blob[[0, 2, 0, 0]] - (1.0 - 0.406)).abs() < 1e-6);
    }

    #[test]
    fn test_blob_crop_keeps_centre() {
        // 600x100: red | green | blue thirds. Cropping to a square keeps green.
        let mut img = RgbImage::new(600, 100);
        for (x, _, p) in img.enumerate_pixels_mut() {
            *p = match x {
                0..=199 => Rgb([255, 0, 0]),
                200..=399 => Rgb([0, 255, 0]),
                _ => Rgb([0, 0, 255]),
            };
        }
        let params = BlobParams {
            width: 50,
            height: 50,
            mean: [0.0; 3],
            swap_rb: false,
            crop: true,
            ..Default::default()
        };
        let blob = blob_from_image(&DynamicImage::ImageRgb8(img), &params).unwrap();
        assert_eq!(blob.shape(), &[1, 3, 50, 50]);
        for x in [0usize, 25, 49] {
            assert!(blob[[0, 0, 25, x]] < 5.0, "red leaked in at x={x}");
            assert!(blob[[0, 1, 25, x]] > 250.0, "green missing at x={x}");
        }
    }

    #[test]
    fn test_blob_stretch_without_crop() {
        let mut img = RgbImage::new(300, 100);
        for (x, _, p) in img.enumerate_pixels_mut() {
            *p = if x < 150 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) };
        }
        let params = BlobParams {
            width: 50,
            height: 50,
            mean: [0.0; 3],
            swap_rb: false,
            ..Default::default()
        };
        let blob = blob_from_image(&DynamicImage::ImageRgb8(img), &params).unwrap();
        assert!(blob[[0, 0, 25, 0]] > 250.0);
        assert!(blob[[0, 2, 25, 49]] > 250.0);
    }

    #[test]
    fn test_blob_rejects_empty_image() {
        let img = DynamicImage::new_rgb8(0, 10);
        let err = blob_from_image(&img, &BlobParams::default()).unwrap_err();
        assert!(matches!(err, BlobError::EmptyImage { .. }));
    }

    #[test]
    fn test_blob_rejects_zero_target() {
        let img = solid(10, 10, [0, 0, 0]);
        let params = BlobParams {
            width: 0,
            ..Default::default()
        };
        let err = blob_from_image(&img, &params).unwrap_err();
        assert!(matches!(err, BlobError::InvalidTargetSize { .. }));
    }
}
