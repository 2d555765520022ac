//! Convenience helpers for loading images via the `image` crate.
//!
//! Available when the `image-io` feature is enabled.

use crate::image::OwnedImage;
use crate::util::{ApdError, ApdResult};
use std::path::Path;

fn open(path: &Path) -> ApdResult<image::DynamicImage> {
    image::open(path).map_err(|err| ApdError::ImageIo {
        reason: format!("{}: {err}", path.display()),
    })
}

/// Creates an owned intensity image (0..255 as `f32`) from a grayscale buffer.
pub fn gray_f32_from_image(img: &image::GrayImage) -> ApdResult<OwnedImage<f32>> {
    let width = img.width() as usize;
    let height = img.height() as usize;
    let data = img.as_raw().iter().map(|&v| f32::from(v)).collect();
    OwnedImage::new(data, width, height)
}

/// Creates an owned RGB image from an 8-bit RGB buffer.
pub fn rgb_from_image(img: &image::RgbImage) -> ApdResult<OwnedImage<[u8; 3]>> {
    let width = img.width() as usize;
    let height = img.height() as usize;
    let data = img.pixels().map(|p| p.0).collect();
    OwnedImage::new(data, width, height)
}

/// Loads an image from disk and converts it to grayscale intensities.
pub fn load_gray_f32<P: AsRef<Path>>(path: P) -> ApdResult<OwnedImage<f32>> {
    let img = open(path.as_ref())?;
    gray_f32_from_image(&img.to_luma8())
}

/// Loads an image from disk as 8-bit RGB (used for point colors).
pub fn load_rgb<P: AsRef<Path>>(path: P) -> ApdResult<OwnedImage<[u8; 3]>> {
    let img = open(path.as_ref())?;
    rgb_from_image(&img.to_rgb8())
}

/// Reads only the image header and returns `(width, height)`.
pub fn image_dimensions<P: AsRef<Path>>(path: P) -> ApdResult<(usize, usize)> {
    let path = path.as_ref();
    let (w, h) = image::image_dimensions(path).map_err(|err| ApdError::ImageIo {
        reason: format!("{}: {err}", path.display()),
    })?;
    Ok((w as usize, h as usize))
}
