//! Patch deformation against planar surfaces with a textureless hole.
//!
//! Cases come from `tests/data/planar_patches.json`: a plane through a point
//! on the optical axis and a rectangle of WEAK pixels surrounded by STRONG
//! pixels lying exactly on it.

use apdmvs::lowlevel::{
    DeformationInput, DeformationOutcome, DeformationParams, NearestStrongMap, PatchDeformation,
    RandomField, MIN_FIT_INLIERS,
};
use apdmvs::{Camera, Device, PixelState, PlaneHypothesis, RunParameters};
use nalgebra::{Matrix3, Vector3};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

const SIZE: usize = 30;

/// Relative depth tolerance for recovered hole pixels.
const DEPTH_TOLERANCE: f32 = 1e-3;

/// Minimum cosine between recovered and true normals.
const NORMAL_COSINE: f32 = 0.999;

#[derive(Debug, Deserialize)]
struct Hole {
    x: usize,
    y: usize,
    width: usize,
    height: usize,
}

impl Hole {
    fn contains(&self, x: usize, y: usize) -> bool {
        (self.x..self.x + self.width).contains(&x) && (self.y..self.y + self.height).contains(&y)
    }
}

#[derive(Debug, Deserialize)]
struct PlanarCase {
    case_id: String,
    normal: [f32; 3],
    axis_depth: f32,
    hole: Hole,
}

#[derive(Debug, Deserialize)]
struct Cases {
    cases: Vec<PlanarCase>,
}

fn load_cases() -> Vec<PlanarCase> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join("planar_patches.json");
    let text = fs::read_to_string(&path).expect("failed to read planar cases");
    let cases: Cases = serde_json::from_str(&text).expect("failed to parse planar cases");
    cases.cases
}

fn camera() -> Camera {
    let c = (SIZE as f32 - 1.0) / 2.0;
    let k = Matrix3::new(40.0, 0.0, c, 0.0, 40.0, c, 0.0, 0.0, 1.0);
    Camera::new(k, Matrix3::identity(), Vector3::zeros(), SIZE, SIZE, 1.0, 4.0).unwrap()
}

/// Per-pixel hypotheses of the plane `normal . X + d = 0` through `(0, 0, axis_depth)`.
fn plane_field(cam: &Camera, normal: Vector3<f32>, axis_depth: f32) -> Vec<PlaneHypothesis> {
    let offset = -normal.dot(&Vector3::new(0.0, 0.0, axis_depth));
    let mut planes = Vec::with_capacity(SIZE * SIZE);
    for y in 0..SIZE {
        for x in 0..SIZE {
            let ray = cam.ray(x as f32, y as f32);
            planes.push(PlaneHypothesis::new(normal, -offset / normal.dot(&ray)));
        }
    }
    planes
}

fn deformation_params() -> DeformationParams {
    DeformationParams::from_params(&RunParameters {
        weak_radius: 5,
        weak_peak_radius: 2,
        rotate_time: 4,
        ransac_threshold: 0.005,
        ransac_iterations: 64,
        min_inlier_ratio: 0.6,
        ..RunParameters::default()
    })
}

#[test]
fn textureless_hole_recovers_surrounding_plane() {
    let cam = camera();
    let cases = load_cases();
    assert!(!cases.is_empty());

    for case in &cases {
        let normal = Vector3::from(case.normal).normalize();
        let truth = plane_field(&cam, normal, case.axis_depth);

        let mut states = vec![PixelState::Strong; SIZE * SIZE];
        let mut planes = truth.clone();
        for y in 0..SIZE {
            for x in 0..SIZE {
                if case.hole.contains(x, y) {
                    states[y * SIZE + x] = PixelState::Weak;
                    // Whatever the matcher left behind in a textureless area.
                    planes[y * SIZE + x] = PlaneHypothesis::new(Vector3::new(0.0, 0.0, -1.0), 1.5);
                }
            }
        }

        let params = deformation_params();
        let nearest = NearestStrongMap::build(
            &states,
            SIZE,
            SIZE,
            params.weak_radius,
            5,
            Device::Serial,
        );
        let input = DeformationInput {
            width: SIZE,
            height: SIZE,
            planes: &planes,
            states: &states,
            nearest: &nearest,
        };
        let deform = PatchDeformation::new(&cam, params, Device::Serial);
        let mut random = RandomField::new(SIZE, SIZE, 11, 0).unwrap();
        let report = deform.recover(&input, &mut random);

        let hole_pixels = case.hole.width * case.hole.height;
        assert_eq!(report.attempted, hole_pixels, "case {}", case.case_id);
        assert_eq!(report.reliable, hole_pixels, "case {}", case.case_id);

        for (idx, fitted) in report.fitted.iter().enumerate() {
            let (x, y) = (idx % SIZE, idx / SIZE);
            if !case.hole.contains(x, y) {
                assert!(fitted.is_none(), "case {}: STRONG pixel refitted", case.case_id);
                continue;
            }
            let plane = fitted.expect("hole pixel should be reliable");
            let expected = truth[idx].depth;
            assert!(
                (plane.depth - expected).abs() / expected < DEPTH_TOLERANCE,
                "case {} at ({x}, {y}): depth {} vs {}",
                case.case_id,
                plane.depth,
                expected
            );
            assert!(
                plane.normal.dot(&normal) > NORMAL_COSINE,
                "case {} at ({x}, {y}): normal {:?}",
                case.case_id,
                plane.normal
            );
        }
    }
}

#[test]
fn scattered_support_is_unreliable() {
    let cam = camera();
    let mut rng = SmallRng::seed_from_u64(5);
    let mut states = vec![PixelState::Strong; SIZE * SIZE];
    let mut planes = Vec::with_capacity(SIZE * SIZE);
    for _ in 0..SIZE * SIZE {
        let depth = rng.random_range(1.2f32..3.8);
        planes.push(PlaneHypothesis::new(Vector3::new(0.0, 0.0, -1.0), depth));
    }
    for y in 12..18 {
        for x in 12..18 {
            states[y * SIZE + x] = PixelState::Weak;
        }
    }

    let params = deformation_params();
    let nearest = NearestStrongMap::build(&states, SIZE, SIZE, 5, 5, Device::Serial);
    let input = DeformationInput {
        width: SIZE,
        height: SIZE,
        planes: &planes,
        states: &states,
        nearest: &nearest,
    };
    let deform = PatchDeformation::new(&cam, params, Device::Serial);
    let mut fit_rng = SmallRng::seed_from_u64(9);

    for y in 12..18 {
        for x in 12..18 {
            let outcome = deform.recover_pixel(&input, x, y, &mut fit_rng);
            assert!(!outcome.is_reliable(), "({x}, {y}) fitted scattered depths");
            match outcome {
                DeformationOutcome::Unreliable { samples, .. } => assert!(samples > 0),
                DeformationOutcome::Reliable { .. } => unreachable!(),
            }
        }
    }
}

#[test]
fn reliable_fits_always_meet_support_thresholds() {
    let cam = camera();
    let normal = Vector3::new(0.2f32, -0.1, -1.0).normalize();
    let mut planes = plane_field(&cam, normal, 2.2);
    let mut rng = SmallRng::seed_from_u64(21);
    // A quarter of the surround disagrees with the plane.
    for plane in planes.iter_mut() {
        if rng.random_bool(0.25) {
            plane.depth = rng.random_range(1.2f32..3.8);
        }
    }
    let mut states = vec![PixelState::Strong; SIZE * SIZE];
    for y in 9..21 {
        for x in 9..21 {
            states[y * SIZE + x] = PixelState::Weak;
        }
    }

    let params = deformation_params();
    let nearest = NearestStrongMap::build(&states, SIZE, SIZE, 5, 5, Device::Serial);
    let input = DeformationInput {
        width: SIZE,
        height: SIZE,
        planes: &planes,
        states: &states,
        nearest: &nearest,
    };
    let deform = PatchDeformation::new(&cam, params, Device::Serial);

    let mut reliable = 0;
    for y in 9..21 {
        for x in 9..21 {
            let mut fit_rng = SmallRng::seed_from_u64((y * SIZE + x) as u64);
            if let DeformationOutcome::Reliable {
                plane,
                inliers,
                samples,
            } = deform.recover_pixel(&input, x, y, &mut fit_rng)
            {
                reliable += 1;
                assert!(inliers >= MIN_FIT_INLIERS);
                assert!(inliers as f32 >= params.min_inlier_ratio * samples as f32);
                assert!(plane.is_valid(&cam, x, y));
            }
        }
    }
    assert!(reliable > 0);
}
