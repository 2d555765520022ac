//! Plane hypotheses and their double-buffered per-pixel store.
//!
//! A hypothesis is a unit normal (reference camera frame) plus the depth at
//! the owning pixel. The normal faces the camera: `dot(n, v) >= 0` where `v`
//! points from the surface back to the camera centre.

pub mod init;
pub mod random;

use crate::camera::Camera;
use crate::util::error::try_alloc;
use crate::util::math::{random_in_unit_ball, random_unit_vector};
use crate::util::ApdResult;
use nalgebra::Vector3;
use rand::Rng;

pub use init::{initialize, PriorEstimate};
pub use random::RandomField;

/// Normal perturbation gain relative to the depth perturbation scale.
const NORMAL_PERTURBATION_GAIN: f32 = 8.0;

/// Local planar surface guess at one pixel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaneHypothesis {
    pub normal: Vector3<f32>,
    pub depth: f32,
}

impl Default for PlaneHypothesis {
    fn default() -> Self {
        Self {
            normal: Vector3::new(0.0, 0.0, -1.0),
            depth: 0.0,
        }
    }
}

impl PlaneHypothesis {
    pub fn new(normal: Vector3<f32>, depth: f32) -> Self {
        Self { normal, depth }
    }

    /// Draws depth uniformly in the camera range and a normal uniformly over
    /// the hemisphere facing the camera.
    pub fn random<R: Rng + ?Sized>(camera: &Camera, x: usize, y: usize, rng: &mut R) -> Self {
        let depth = rng.random_range(camera.depth_min()..=camera.depth_max());
        let view = camera.view_direction(x as f32, y as f32);
        let mut normal = random_unit_vector(rng);
        if normal.dot(&view) < 0.0 {
            normal = -normal;
        }
        Self { normal, depth }
    }

    /// Returns a nearby hypothesis; `scale` is the relative depth range and
    /// also drives the normal jitter. Depth is clamped to the camera range.
    pub fn perturbed<R: Rng + ?Sized>(
        &self,
        camera: &Camera,
        x: usize,
        y: usize,
        scale: f32,
        rng: &mut R,
    ) -> Self {
        let jitter = rng.random_range(-1.0f32..=1.0);
        let depth = (self.depth * (1.0 + scale * jitter))
            .clamp(camera.depth_min(), camera.depth_max());

        let view = camera.view_direction(x as f32, y as f32);
        let offset = random_in_unit_ball(rng) * (scale * NORMAL_PERTURBATION_GAIN);
        let candidate = self.normal + offset;
        let normal = match candidate.try_normalize(1e-6) {
            Some(n) if n.dot(&view) >= 0.0 => n,
            _ => self.normal,
        };
        Self { normal, depth }
    }

    /// Returns true when the depth is in range, the normal has unit length
    /// and faces the camera at pixel `(x, y)`.
    pub fn is_valid(&self, camera: &Camera, x: usize, y: usize) -> bool {
        camera.depth_in_range(self.depth)
            && (self.normal.norm() - 1.0).abs() < 1e-3
            && self.is_front_facing(camera, x as f32, y as f32)
    }

    #[inline]
    pub fn is_front_facing(&self, camera: &Camera, x: f32, y: f32) -> bool {
        self.normal.dot(&camera.view_direction(x, y)) >= 0.0
    }

    /// Camera-frame 3D point of this hypothesis at pixel `(x, y)`.
    #[inline]
    pub fn point(&self, camera: &Camera, x: f32, y: f32) -> Vector3<f32> {
        camera.backproject_cam(x, y, self.depth)
    }

    /// Plane offset `d` such that `n . X + d = 0` in the camera frame.
    #[inline]
    pub fn offset(&self, camera: &Camera, x: f32, y: f32) -> f32 {
        -self.normal.dot(&self.point(camera, x, y))
    }

    /// Depth where the ray through `to` meets this plane, anchored at `from`.
    pub fn depth_at(&self, camera: &Camera, from: (f32, f32), to: (f32, f32)) -> Option<f32> {
        let offset = self.offset(camera, from.0, from.1);
        let ray = camera.ray(to.0, to.1);
        let denom = self.normal.dot(&ray);
        if denom.abs() < 1e-8 {
            return None;
        }
        let depth = -offset / denom;
        depth.is_finite().then_some(depth)
    }

    /// Moves the hypothesis of pixel `from` onto pixel `to` along its plane.
    ///
    /// Returns `None` if the transferred depth leaves the valid range or the
    /// plane is back-facing at `to`.
    pub fn transfer(
        &self,
        camera: &Camera,
        from: (usize, usize),
        to: (usize, usize),
    ) -> Option<PlaneHypothesis> {
        let from_f = (from.0 as f32, from.1 as f32);
        let to_f = (to.0 as f32, to.1 as f32);
        let depth = self.depth_at(camera, from_f, to_f)?;
        let out = PlaneHypothesis {
            normal: self.normal,
            depth,
        };
        (camera.depth_in_range(depth) && out.is_front_facing(camera, to_f.0, to_f.1))
            .then_some(out)
    }
}

/// Per-pixel hypotheses and accepted costs, double-buffered.
///
/// A pass reads the front buffers and writes the back buffers; `swap` makes
/// the result visible. `fitted` holds deformation results for one step and
/// is replaced as a whole.
pub struct HypothesisStore {
    width: usize,
    height: usize,
    planes: Vec<PlaneHypothesis>,
    costs: Vec<f32>,
    planes_back: Vec<PlaneHypothesis>,
    costs_back: Vec<f32>,
    fitted: Vec<Option<PlaneHypothesis>>,
}

/// Split borrows of the store for one pass.
pub(crate) struct PassBuffers<'a> {
    pub(crate) read_planes: &'a [PlaneHypothesis],
    pub(crate) read_costs: &'a [f32],
    pub(crate) write_planes: &'a mut [PlaneHypothesis],
    pub(crate) write_costs: &'a mut [f32],
}

impl HypothesisStore {
    /// Allocates all buffers; allocation failure is a resource error.
    pub fn new(width: usize, height: usize, problem: usize) -> ApdResult<Self> {
        let len = width * height;
        Ok(Self {
            width,
            height,
            planes: try_alloc(len, PlaneHypothesis::default(), problem, "hypothesis allocation")?,
            costs: try_alloc(len, f32::INFINITY, problem, "hypothesis allocation")?,
            planes_back: try_alloc(len, PlaneHypothesis::default(), problem, "hypothesis allocation")?,
            costs_back: try_alloc(len, f32::INFINITY, problem, "hypothesis allocation")?,
            fitted: try_alloc(len, None, problem, "hypothesis allocation")?,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Current (front) hypotheses in row-major order.
    pub fn planes(&self) -> &[PlaneHypothesis] {
        &self.planes
    }

    /// Accepted cost of each current hypothesis.
    pub fn costs(&self) -> &[f32] {
        &self.costs
    }

    pub fn plane(&self, x: usize, y: usize) -> PlaneHypothesis {
        self.planes[y * self.width + x]
    }

    pub(crate) fn planes_mut(&mut self) -> &mut [PlaneHypothesis] {
        &mut self.planes
    }

    pub(crate) fn front_mut(&mut self) -> (&mut [PlaneHypothesis], &mut [f32]) {
        (&mut self.planes, &mut self.costs)
    }

    /// Copies the front buffers into the back buffers and hands out the
    /// split borrows for one pass.
    pub(crate) fn begin_pass(&mut self) -> PassBuffers<'_> {
        self.planes_back.copy_from_slice(&self.planes);
        self.costs_back.copy_from_slice(&self.costs);
        PassBuffers {
            read_planes: &self.planes,
            read_costs: &self.costs,
            write_planes: &mut self.planes_back,
            write_costs: &mut self.costs_back,
        }
    }

    /// Publishes the back buffers written by the last pass.
    pub(crate) fn swap(&mut self) {
        std::mem::swap(&mut self.planes, &mut self.planes_back);
        std::mem::swap(&mut self.costs, &mut self.costs_back);
    }

    /// Replaces the deformation buffer.
    pub(crate) fn set_fitted(&mut self, fitted: Vec<Option<PlaneHypothesis>>) {
        self.fitted = fitted;
    }

    /// Deformation results of the last recovery step.
    pub fn fitted(&self) -> &[Option<PlaneHypothesis>] {
        &self.fitted
    }
}
