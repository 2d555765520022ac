//! Resolution changes for coarse-to-fine rounds.
//!
//! Downsampling uses a 2x2 box filter, applied once per power of two of the
//! round's scale factor. Per-pixel maps (depth, normals) coming from a
//! coarser round are brought back to the working resolution with
//! nearest-neighbour lookup so invalid samples never blend with valid ones.

use crate::image::OwnedImage;
use crate::util::{ApdError, ApdResult};

/// Halves a grayscale image with a 2x2 box filter.
pub fn halve(src: &OwnedImage<f32>) -> ApdResult<OwnedImage<f32>> {
    let (width, height) = src.dims();
    if width < 2 || height < 2 {
        return Err(ApdError::InvalidDimensions { width, height });
    }
    let dst_width = width / 2;
    let dst_height = height / 2;
    let data = src.data();
    OwnedImage::from_fn(dst_width, dst_height, |x, y| {
        let row0 = (2 * y) * width;
        let row1 = (2 * y + 1) * width;
        let a = data[row0 + 2 * x];
        let b = data[row0 + 2 * x + 1];
        let c = data[row1 + 2 * x];
        let d = data[row1 + 2 * x + 1];
        (a + b + c + d) * 0.25
    })
}

/// Downsamples by `scale`, which must be a power of two (1 returns a copy).
pub fn downsample_pow2(src: &OwnedImage<f32>, scale: u32) -> ApdResult<OwnedImage<f32>> {
    if scale == 0 || !scale.is_power_of_two() {
        return Err(ApdError::config(format!(
            "scale factor {scale} is not a power of two"
        )));
    }
    let mut current = src.clone();
    for _ in 0..scale.trailing_zeros() {
        current = halve(&current)?;
    }
    Ok(current)
}

/// Resamples a per-pixel map to `width x height` with nearest-neighbour lookup
/// on pixel centres.
pub fn resample_nearest<T: Copy>(
    src: &OwnedImage<T>,
    width: usize,
    height: usize,
) -> ApdResult<OwnedImage<T>> {
    let (src_width, src_height) = src.dims();
    if src_width == width && src_height == height {
        return Ok(src.clone());
    }
    let sx = src_width as f32 / width as f32;
    let sy = src_height as f32 / height as f32;
    OwnedImage::from_fn(width, height, |x, y| {
        let px = ((x as f32 + 0.5) * sx - 0.5).round().clamp(0.0, (src_width - 1) as f32);
        let py = ((y as f32 + 0.5) * sy - 0.5).round().clamp(0.0, (src_height - 1) as f32);
        src.at(px as usize, py as usize)
    })
}
