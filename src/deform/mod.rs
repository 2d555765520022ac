//! Adaptive patch deformation for WEAK pixels.
//!
//! A WEAK pixel casts eight rays in each of `rotate_time` orientations and
//! takes the first STRONG pixel on each ray as an anchor. STRONG pixels
//! around the anchors are lifted to 3D and a plane is fitted robustly. A
//! well-supported plane replaces the pixel's photometric hypothesis.

pub mod fit;

use crate::camera::Camera;
use crate::classify::{NearestStrongMap, PixelState, MAX_SEARCH_RADIUS};
use crate::device::Device;
use crate::hypothesis::{HypothesisStore, PlaneHypothesis, RandomField};
use crate::problem::RunParameters;
use crate::trace::{trace_event, trace_span};
use nalgebra::Vector3;
use rand::Rng;
use std::f32::consts::FRAC_PI_4;

pub use fit::{fit_plane_least_squares, fit_plane_ransac, PlaneFit};

/// Fewest inliers a reliable plane may have.
pub const MIN_FIT_INLIERS: usize = 6;

const RAYS: usize = 8;

/// Parameters of one recovery step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeformationParams {
    pub weak_radius: usize,
    pub weak_peak_radius: usize,
    pub rotate_time: usize,
    pub ransac_threshold: f32,
    pub ransac_iterations: usize,
    pub min_inlier_ratio: f32,
}

impl DeformationParams {
    pub fn from_params(params: &RunParameters) -> Self {
        Self {
            weak_radius: params.weak_radius,
            weak_peak_radius: params.weak_peak_radius,
            rotate_time: params.rotate_time,
            ransac_threshold: params.ransac_threshold,
            ransac_iterations: params.ransac_iterations,
            min_inlier_ratio: params.min_inlier_ratio,
        }
    }
}

/// Result of recovering one pixel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DeformationOutcome {
    /// A plane with enough inlier support; `inliers` of `samples` points agree.
    Reliable {
        plane: PlaneHypothesis,
        inliers: usize,
        samples: usize,
    },
    /// No orientation produced enough support.
    Unreliable { best_inliers: usize, samples: usize },
}

impl DeformationOutcome {
    pub fn plane(&self) -> Option<PlaneHypothesis> {
        match self {
            DeformationOutcome::Reliable { plane, .. } => Some(*plane),
            DeformationOutcome::Unreliable { .. } => None,
        }
    }

    pub fn is_reliable(&self) -> bool {
        matches!(self, DeformationOutcome::Reliable { .. })
    }
}

/// Read-only inputs of a recovery step.
pub struct DeformationInput<'a> {
    pub width: usize,
    pub height: usize,
    pub planes: &'a [PlaneHypothesis],
    pub states: &'a [PixelState],
    pub nearest: &'a NearestStrongMap,
}

/// Fitted planes of one recovery step.
#[derive(Clone, Debug, PartialEq)]
pub struct DeformationReport {
    /// Fitted hypothesis per pixel; `None` where nothing was recovered.
    pub fitted: Vec<Option<PlaneHypothesis>>,
    pub attempted: usize,
    pub reliable: usize,
}

/// Recovers WEAK pixels from the STRONG structure around them.
pub struct PatchDeformation<'a> {
    camera: &'a Camera,
    params: DeformationParams,
    device: Device,
}

impl<'a> PatchDeformation<'a> {
    pub fn new(camera: &'a Camera, params: DeformationParams, device: Device) -> Self {
        Self {
            camera,
            params,
            device,
        }
    }

    /// Anchors along eight rays starting at angle `theta0`.
    fn anchors(
        &self,
        input: &DeformationInput<'_>,
        x: usize,
        y: usize,
        theta0: f32,
        reach: usize,
    ) -> Vec<(usize, usize)> {
        let mut anchors = Vec::with_capacity(RAYS);
        for j in 0..RAYS {
            let theta = theta0 + j as f32 * FRAC_PI_4;
            let (sin, cos) = theta.sin_cos();
            for t in 1..=reach {
                let px = (x as f32 + t as f32 * cos).round();
                let py = (y as f32 + t as f32 * sin).round();
                let outside = px < 0.0 || py < 0.0;
                if outside || px >= input.width as f32 || py >= input.height as f32 {
                    break;
                }
                let (px, py) = (px as usize, py as usize);
                if input.states[py * input.width + px] == PixelState::Strong {
                    anchors.push((px, py));
                    break;
                }
            }
        }
        anchors
    }

    /// Camera-frame points of the STRONG pixels around `anchors`.
    fn support_points(
        &self,
        input: &DeformationInput<'_>,
        anchors: &[(usize, usize)],
    ) -> Vec<Vector3<f32>> {
        let r = self.params.weak_peak_radius;
        let mut indices = Vec::new();
        for &(ax, ay) in anchors {
            let x0 = ax.saturating_sub(r);
            let y0 = ay.saturating_sub(r);
            let x1 = (ax + r).min(input.width - 1);
            let y1 = (ay + r).min(input.height - 1);
            for sy in y0..=y1 {
                for sx in x0..=x1 {
                    let idx = sy * input.width + sx;
                    if input.states[idx] == PixelState::Strong {
                        indices.push(idx);
                    }
                }
            }
        }
        indices.sort_unstable();
        indices.dedup();
        indices
            .into_iter()
            .map(|idx| {
                let (sx, sy) = (idx % input.width, idx / input.width);
                let depth = input.planes[idx].depth;
                self.camera.backproject_cam(sx as f32, sy as f32, depth)
            })
            .collect()
    }

    /// Hypothesis at `(x, y)` on a fitted plane, if it is valid there.
    fn hypothesis_from_fit(&self, fit: &PlaneFit, x: usize, y: usize) -> Option<PlaneHypothesis> {
        let (xf, yf) = (x as f32, y as f32);
        let view = self.camera.view_direction(xf, yf);
        let (normal, offset) = if fit.normal.dot(&view) < 0.0 {
            (-fit.normal, -fit.offset)
        } else {
            (fit.normal, fit.offset)
        };
        let denom = normal.dot(&self.camera.ray(xf, yf));
        if denom.abs() < 1e-8 {
            return None;
        }
        let plane = PlaneHypothesis::new(normal, -offset / denom);
        plane.is_valid(self.camera, x, y).then_some(plane)
    }

    /// Tries every orientation for one WEAK pixel.
    pub fn recover_pixel<R: Rng + ?Sized>(
        &self,
        input: &DeformationInput<'_>,
        x: usize,
        y: usize,
        rng: &mut R,
    ) -> DeformationOutcome {
        let Some(distance) = input.nearest.distance(x, y) else {
            return DeformationOutcome::Unreliable {
                best_inliers: 0,
                samples: 0,
            };
        };
        let reach = (2 * distance.ceil() as usize)
            .max(2 * self.params.weak_radius)
            .min(MAX_SEARCH_RADIUS);

        let rotations = self.params.rotate_time.max(1);
        let mut best: Option<DeformationOutcome> = None;
        let mut best_inliers = 0usize;
        let mut most_samples = 0usize;

        for k in 0..rotations {
            let theta0 = k as f32 * FRAC_PI_4 / rotations as f32;
            let anchors = self.anchors(input, x, y, theta0, reach);
            let points = self.support_points(input, &anchors);
            most_samples = most_samples.max(points.len());
            if points.len() < MIN_FIT_INLIERS {
                continue;
            }
            let Some(fit) = fit_plane_ransac(
                &points,
                self.params.ransac_iterations,
                self.params.ransac_threshold,
                rng,
            ) else {
                continue;
            };
            best_inliers = best_inliers.max(fit.inliers);

            let supported = fit.inliers >= MIN_FIT_INLIERS
                && fit.inliers as f32 >= self.params.min_inlier_ratio * points.len() as f32;
            if !supported {
                continue;
            }
            let Some(plane) = self.hypothesis_from_fit(&fit, x, y) else {
                continue;
            };
            let better = match best {
                Some(DeformationOutcome::Reliable { inliers, .. }) => fit.inliers > inliers,
                _ => true,
            };
            if better {
                best = Some(DeformationOutcome::Reliable {
                    plane,
                    inliers: fit.inliers,
                    samples: points.len(),
                });
            }
        }

        best.unwrap_or(DeformationOutcome::Unreliable {
            best_inliers,
            samples: most_samples,
        })
    }

    /// Recovers every WEAK pixel; results go into a separate buffer so the
    /// step never reads a plane it has already replaced.
    pub fn recover(
        &self,
        input: &DeformationInput<'_>,
        random: &mut RandomField,
    ) -> DeformationReport {
        let _span = trace_span!("deform").entered();
        let width = input.width;
        let mut fitted = vec![None; width * input.height];

        let rows: Vec<_> = fitted
            .chunks_mut(width)
            .zip(random.rows_mut())
            .enumerate()
            .collect();
        self.device.for_each_row(rows, |(y, (out, rngs))| {
            for x in 0..width {
                if input.states[y * width + x] != PixelState::Weak {
                    continue;
                }
                out[x] = self.recover_pixel(input, x, y, &mut rngs[x]).plane();
            }
        });

        let attempted = input
            .states
            .iter()
            .filter(|&&s| s == PixelState::Weak)
            .count();
        let reliable = fitted.iter().filter(|f| f.is_some()).count();
        trace_event!("deformed", attempted = attempted, reliable = reliable);
        DeformationReport {
            fitted,
            attempted,
            reliable,
        }
    }
}

/// Builds the read-only input of a recovery step from the store.
pub fn deformation_input<'a>(
    store: &'a HypothesisStore,
    states: &'a [PixelState],
    nearest: &'a NearestStrongMap,
) -> DeformationInput<'a> {
    DeformationInput {
        width: store.width(),
        height: store.height(),
        planes: store.planes(),
        states,
        nearest,
    }
}
