//! Forward-backward reprojection error against a source view's depth map.

use crate::camera::Camera;
use crate::image::OwnedImage;
use nalgebra::Vector2;

/// Upper bound of the reprojection error entering the cost, in pixels.
pub const GEOM_ERROR_CAP: f32 = 3.0;

/// Projects the reference point at `(x, y, depth)` into the source view,
/// lifts it again with the source's own depth estimate and measures how far
/// it lands from `(x, y)` in the reference image.
///
/// Returns [`GEOM_ERROR_CAP`] when the point leaves the source image or the
/// source has no valid depth there.
pub fn reprojection_error(
    reference: &Camera,
    source: &Camera,
    source_depth: &OwnedImage<f32>,
    x: f32,
    y: f32,
    depth: f32,
) -> f32 {
    let world = reference.backproject(x, y, depth);
    let Some((px, _)) = source.project(&world) else {
        return GEOM_ERROR_CAP;
    };
    if !source.contains(&px) {
        return GEOM_ERROR_CAP;
    }
    let sx = px.x.round() as usize;
    let sy = px.y.round() as usize;
    let Some(src_depth) = source_depth.get(sx, sy) else {
        return GEOM_ERROR_CAP;
    };
    if src_depth <= 0.0 {
        return GEOM_ERROR_CAP;
    }
    let back = source.backproject(px.x, px.y, src_depth);
    match reference.project(&back) {
        Some((q, _)) => (q - Vector2::new(x, y)).norm().min(GEOM_ERROR_CAP),
        None => GEOM_ERROR_CAP,
    }
}
