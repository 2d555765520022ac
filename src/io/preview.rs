//! 8-bit preview images of a problem's maps.
//!
//! Available when the `image-io` feature is enabled.

use crate::classify::PixelState;
use crate::engine::ProblemOutput;
use crate::image::OwnedImage;
use crate::util::{ApdError, ApdResult};
use image::{GrayImage, Luma, Rgb, RgbImage};
use std::path::Path;

/// Depth normalized to the min/max of its positive values; zero depth is black.
pub fn depth_preview(depth: &OwnedImage<f32>) -> GrayImage {
    let (lo, hi) = depth
        .data()
        .iter()
        .filter(|&&d| d > 0.0)
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &d| {
            (lo.min(d), hi.max(d))
        });
    let range = (hi - lo).max(f32::EPSILON);
    GrayImage::from_fn(depth.width() as u32, depth.height() as u32, |x, y| {
        let d = depth.at(x as usize, y as usize);
        if d <= 0.0 {
            return Luma([0]);
        }
        Luma([(1.0 + 254.0 * (d - lo) / range).round().clamp(1.0, 255.0) as u8])
    })
}

/// Normals mapped from `[-1, 1]` to `[0, 255]` per channel.
pub fn normal_preview(normals: &OwnedImage<[f32; 3]>) -> RgbImage {
    RgbImage::from_fn(normals.width() as u32, normals.height() as u32, |x, y| {
        let n = normals.at(x as usize, y as usize);
        Rgb(n.map(|c| ((c + 1.0) * 127.5).round().clamp(0.0, 255.0) as u8))
    })
}

/// STRONG white, WEAK gray, UNKNOWN black.
pub fn state_preview(states: &OwnedImage<PixelState>) -> GrayImage {
    GrayImage::from_fn(states.width() as u32, states.height() as u32, |x, y| {
        Luma([match states.at(x as usize, y as usize) {
            PixelState::Strong => 255,
            PixelState::Weak => 128,
            PixelState::Unknown => 0,
        }])
    })
}

fn image_error(path: &Path, err: image::ImageError) -> ApdError {
    ApdError::ImageIo {
        reason: format!("{}: {err}", path.display()),
    }
}

/// Writes `depth.png`, `normal.png` and `weak.png` into `folder` with an
/// optional file name prefix.
pub fn save_previews<P: AsRef<Path>>(
    folder: P,
    prefix: &str,
    output: &ProblemOutput,
) -> ApdResult<()> {
    let folder = folder.as_ref();
    std::fs::create_dir_all(folder).map_err(|err| ApdError::io(folder, err))?;
    let path = folder.join(format!("{prefix}depth.png"));
    depth_preview(&output.depth)
        .save(&path)
        .map_err(|err| image_error(&path, err))?;
    let path = folder.join(format!("{prefix}normal.png"));
    normal_preview(&output.normals)
        .save(&path)
        .map_err(|err| image_error(&path, err))?;
    let path = folder.join(format!("{prefix}weak.png"));
    state_preview(&output.states)
        .save(&path)
        .map_err(|err| image_error(&path, err))
}
