//! Shared synthetic scenes for the integration tests.
#![allow(dead_code)]

use apdmvs::lowlevel::CostContext;
use apdmvs::{Camera, MatchingCost, OwnedImage, RunParameters, Scene, SourceView};
use nalgebra::{Matrix3, Vector3};
use std::path::PathBuf;

pub const SIZE: usize = 16;
pub const FOCAL: f32 = 40.0;
pub const TRUE_DEPTH: f32 = 2.0;

pub fn intrinsics(size: usize) -> Matrix3<f32> {
    let c = (size as f32 - 1.0) / 2.0;
    Matrix3::new(FOCAL, 0.0, c, 0.0, FOCAL, c, 0.0, 0.0, 1.0)
}

pub fn reference_camera(size: usize) -> Camera {
    Camera::new(
        intrinsics(size),
        Matrix3::identity(),
        Vector3::zeros(),
        size,
        size,
        1.0,
        3.0,
    )
    .unwrap()
}

/// Source cameras pulled back along the optical axis so every in-range
/// point of the reference projects inside them.
pub fn source_camera(size: usize, offset: f32) -> Camera {
    Camera::new(
        intrinsics(size),
        Matrix3::identity(),
        Vector3::new(0.0, 0.0, offset),
        size,
        size,
        1.0,
        3.0,
    )
    .unwrap()
}

pub fn textured(size: usize, salt: usize) -> OwnedImage<f32> {
    OwnedImage::from_fn(size, size, |x, y| {
        (((x * 13 + salt) ^ (y * 7) ^ (x * y)) & 0xFF) as f32
    })
    .unwrap()
}

/// Reference 0 with sources 1 and 2.
pub fn scene(size: usize) -> Scene {
    let sources = [(1u32, 0.05f32), (2, 0.1)]
        .into_iter()
        .map(|(id, offset)| SourceView {
            image_id: id,
            image: textured(size, id as usize),
            camera: source_camera(size, offset),
            prior_depth: None,
        })
        .collect();
    Scene::new(0, textured(size, 0), reference_camera(size), sources).unwrap()
}

/// Cost with a single minimum at fronto-parallel planes of depth 2.
#[derive(Clone, Copy, Debug, Default)]
pub struct SyntheticCost;

impl MatchingCost for SyntheticCost {
    fn view_cost(&self, ctx: &CostContext<'_>) -> f32 {
        (ctx.plane.depth - TRUE_DEPTH).abs() + (1.0 + ctx.plane.normal.z)
    }
}

pub fn params(max_iterations: usize) -> RunParameters {
    RunParameters {
        max_iterations,
        num_images: 2,
        top_k: 2,
        patch_radius: 2,
        patch_step: 1,
        arm_length: 4,
        use_apd: false,
        seed: 7,
        ..RunParameters::default()
    }
}

/// Fresh scratch directory under the system temp dir.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("apdmvs-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
