//! Multi-view matching cost.
//!
//! A [`MatchingCost`] scores one hypothesis against one source view. The
//! [`CostEvaluator`] checks hypothesis geometry, calls the metric for every
//! source view, adds the optional geometric term, and aggregates over the
//! selected views of a pixel.

pub mod geometric;
pub mod ncc;

use crate::camera::Camera;
use crate::hypothesis::PlaneHypothesis;
use crate::image::OwnedImage;
use crate::problem::MAX_SOURCE_IMAGES;
use crate::util::{ApdError, ApdResult};
use nalgebra::{Matrix3, Vector2, Vector3};

pub use geometric::{reprojection_error, GEOM_ERROR_CAP};
pub use ncc::BilateralNcc;

/// Cost of a geometrically invalid hypothesis for one view.
pub const INVALID_COST: f32 = 1.0e4;
/// Cost of a window without texture in either image.
pub const UNTEXTURED_COST: f32 = 1.0;

/// Square matching window: half-size and sampling stride in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub radius: usize,
    pub step: usize,
}

impl Window {
    pub fn new(radius: usize, step: usize) -> Self {
        Self {
            radius,
            step: step.max(1),
        }
    }

    /// Offsets of the sampled window pixels relative to the centre.
    pub fn offsets(self) -> impl Iterator<Item = (isize, isize)> {
        let r = self.radius as isize;
        let step = self.step;
        (-r..=r)
            .step_by(step)
            .flat_map(move |dy| (-r..=r).step_by(step).map(move |dx| (dx, dy)))
    }
}

/// One source image with its camera and, for geometric consistency, the
/// depth map estimated for it in a previous step.
#[derive(Clone, Debug)]
pub struct SourceView {
    pub image_id: u32,
    pub image: OwnedImage<f32>,
    pub camera: Camera,
    pub prior_depth: Option<OwnedImage<f32>>,
}

/// Reference image and the source views of one problem, read-only during a run.
#[derive(Clone, Debug)]
pub struct Scene {
    pub reference_id: u32,
    pub reference: OwnedImage<f32>,
    pub camera: Camera,
    pub sources: Vec<SourceView>,
}

impl Scene {
    /// Validates image/camera sizes and the source cap.
    pub fn new(
        reference_id: u32,
        reference: OwnedImage<f32>,
        camera: Camera,
        sources: Vec<SourceView>,
    ) -> ApdResult<Self> {
        if sources.len() > MAX_SOURCE_IMAGES {
            return Err(ApdError::TooManyImages {
                count: sources.len(),
                max: MAX_SOURCE_IMAGES,
            });
        }
        if reference.dims() != (camera.width(), camera.height()) {
            return Err(ApdError::InvalidDimensions {
                width: reference.width(),
                height: reference.height(),
            });
        }
        for src in &sources {
            if src.image_id == reference_id {
                return Err(ApdError::config(format!(
                    "image {reference_id} cannot be its own source"
                )));
            }
            if src.image.dims() != (src.camera.width(), src.camera.height()) {
                return Err(ApdError::InvalidDimensions {
                    width: src.image.width(),
                    height: src.image.height(),
                });
            }
            if let Some(depth) = &src.prior_depth {
                if depth.dims() != src.image.dims() {
                    return Err(ApdError::InvalidDimensions {
                        width: depth.width(),
                        height: depth.height(),
                    });
                }
            }
        }
        Ok(Self {
            reference_id,
            reference,
            camera,
            sources,
        })
    }

    pub fn width(&self) -> usize {
        self.reference.width()
    }

    pub fn height(&self) -> usize {
        self.reference.height()
    }

    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    /// Source image ids in slot order.
    pub fn source_ids(&self) -> Vec<u32> {
        self.sources.iter().map(|s| s.image_id).collect()
    }
}

/// Relative pose of one source camera with respect to the reference.
#[derive(Clone, Debug)]
pub struct ViewGeometry {
    rotation: Matrix3<f32>,
    translation: Vector3<f32>,
    k_src: Matrix3<f32>,
}

impl ViewGeometry {
    pub fn new(reference: &Camera, source: &Camera) -> Self {
        let rotation = source.rotation() * reference.rotation().transpose();
        let translation = source.translation() - rotation * reference.translation();
        Self {
            rotation,
            translation,
            k_src: *source.k(),
        }
    }

    /// Plane-induced homography from reference pixels to source pixels.
    pub fn homography(
        &self,
        reference: &Camera,
        plane: &PlaneHypothesis,
        x: f32,
        y: f32,
    ) -> Option<Matrix3<f32>> {
        let d = plane.offset(reference, x, y);
        if d.abs() <= f32::EPSILON {
            return None;
        }
        let m = self.rotation - self.translation * plane.normal.transpose() / d;
        Some(self.k_src * m * reference.k_inv())
    }

    /// Maps a reference pixel through a homography.
    #[inline]
    pub fn apply(h: &Matrix3<f32>, x: f32, y: f32) -> Option<Vector2<f32>> {
        let p = h * Vector3::new(x, y, 1.0);
        (p.z > f32::EPSILON).then(|| Vector2::new(p.x / p.z, p.y / p.z))
    }

    /// Projects a reference camera-frame point into the source image.
    #[inline]
    pub fn project(&self, point: &Vector3<f32>) -> Option<Vector2<f32>> {
        let p = self.rotation * point + self.translation;
        if p.z <= f32::EPSILON {
            return None;
        }
        let uvw = self.k_src * p;
        Some(Vector2::new(uvw.x / uvw.z, uvw.y / uvw.z))
    }
}

/// Everything a metric needs to score one hypothesis against one view.
pub struct CostContext<'a> {
    pub scene: &'a Scene,
    /// Source slot being scored.
    pub slot: usize,
    pub geometry: &'a ViewGeometry,
    /// Plane-induced homography, reference pixel to source pixel.
    pub homography: Matrix3<f32>,
    pub x: usize,
    pub y: usize,
    pub plane: &'a PlaneHypothesis,
    pub window: Window,
}

impl CostContext<'_> {
    pub fn source(&self) -> &SourceView {
        &self.scene.sources[self.slot]
    }
}

/// Per-view photometric dissimilarity of a valid hypothesis.
///
/// Implementations return a non-negative finite value; lower is better.
pub trait MatchingCost: Sync {
    fn view_cost(&self, ctx: &CostContext<'_>) -> f32;
}

impl<M: MatchingCost + ?Sized> MatchingCost for &M {
    fn view_cost(&self, ctx: &CostContext<'_>) -> f32 {
        (**self).view_cost(ctx)
    }
}

impl<M: MatchingCost + ?Sized> MatchingCost for Box<M> {
    fn view_cost(&self, ctx: &CostContext<'_>) -> f32 {
        (**self).view_cost(ctx)
    }
}

/// Per-view costs of one hypothesis, indexed by source slot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewCosts {
    values: [f32; MAX_SOURCE_IMAGES],
    len: usize,
}

impl ViewCosts {
    pub fn filled(len: usize, value: f32) -> Self {
        Self {
            values: [value; MAX_SOURCE_IMAGES],
            len: len.min(MAX_SOURCE_IMAGES),
        }
    }

    pub fn from_slice(costs: &[f32]) -> Self {
        let mut out = Self::filled(costs.len(), INVALID_COST);
        out.values[..out.len].copy_from_slice(&costs[..out.len]);
        out
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true when no view produced a usable cost.
    pub fn all_invalid(&self) -> bool {
        self.as_slice().iter().all(|&c| c >= INVALID_COST)
    }

    /// Mean cost over the views whose bit is set in `mask`.
    pub fn aggregate(&self, mask: u32) -> f32 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for (slot, &cost) in self.as_slice().iter().enumerate() {
            if mask & (1u32 << slot) != 0 {
                sum += cost;
                count += 1;
            }
        }
        if count == 0 {
            INVALID_COST
        } else {
            sum / count as f32
        }
    }
}

/// Scores hypotheses against every source view of a scene.
pub struct CostEvaluator<'a, M: ?Sized> {
    scene: &'a Scene,
    metric: &'a M,
    geometries: Vec<ViewGeometry>,
    geom_factor: Option<f32>,
}

impl<'a, M: MatchingCost + ?Sized> CostEvaluator<'a, M> {
    /// `geom_factor = Some(w)` enables the geometric term with weight `w`.
    pub fn new(scene: &'a Scene, metric: &'a M, geom_factor: Option<f32>) -> Self {
        let geometries = scene
            .sources
            .iter()
            .map(|src| ViewGeometry::new(&scene.camera, &src.camera))
            .collect();
        Self {
            scene,
            metric,
            geometries,
            geom_factor,
        }
    }

    pub fn scene(&self) -> &'a Scene {
        self.scene
    }

    pub fn num_views(&self) -> usize {
        self.geometries.len()
    }

    /// Cost of `plane` at `(x, y)` for every source view.
    pub fn view_costs(
        &self,
        x: usize,
        y: usize,
        plane: &PlaneHypothesis,
        window: Window,
    ) -> ViewCosts {
        let mut out = ViewCosts::filled(self.geometries.len(), INVALID_COST);
        let camera = &self.scene.camera;
        let (xf, yf) = (x as f32, y as f32);
        if !camera.depth_in_range(plane.depth) || !plane.is_front_facing(camera, xf, yf) {
            return out;
        }
        let point = plane.point(camera, xf, yf);

        for (slot, geometry) in self.geometries.iter().enumerate() {
            let src = &self.scene.sources[slot];
            let Some(centre) = geometry.project(&point) else {
                continue;
            };
            if !src.camera.contains(&centre) {
                continue;
            }
            let Some(homography) = geometry.homography(camera, plane, xf, yf) else {
                continue;
            };
            let ctx = CostContext {
                scene: self.scene,
                slot,
                geometry,
                homography,
                x,
                y,
                plane,
                window,
            };
            let mut cost = self.metric.view_cost(&ctx);
            if let Some(factor) = self.geom_factor {
                let err = src
                    .prior_depth
                    .as_ref()
                    .map_or(GEOM_ERROR_CAP, |depth| {
                        reprojection_error(camera, &src.camera, depth, xf, yf, plane.depth)
                    });
                cost += factor * err.min(GEOM_ERROR_CAP);
            }
            out.values[slot] = cost;
        }
        out
    }

    /// Aggregated cost of `plane` over the views in `mask`.
    pub fn cost(
        &self,
        x: usize,
        y: usize,
        plane: &PlaneHypothesis,
        window: Window,
        mask: u32,
    ) -> f32 {
        self.view_costs(x, y, plane, window).aggregate(mask)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        reprojection_error, CostContext, CostEvaluator, MatchingCost, Scene, SourceView,
        ViewCosts, ViewGeometry, Window, GEOM_ERROR_CAP, INVALID_COST,
    };
    use crate::camera::Camera;
    use crate::hypothesis::PlaneHypothesis;
    use crate::image::OwnedImage;
    use nalgebra::{Matrix3, Vector3};

    struct Flat;

    impl MatchingCost for Flat {
        fn view_cost(&self, _ctx: &CostContext<'_>) -> f32 {
            0.25
        }
    }

    fn stereo_pair(prior: Option<f32>) -> Scene {
        let k = Matrix3::new(50.0, 0.0, 16.0, 0.0, 50.0, 16.0, 0.0, 0.0, 1.0);
        let camera =
            Camera::new(k, Matrix3::identity(), Vector3::zeros(), 32, 32, 1.0, 4.0).unwrap();
        let source_camera = Camera::new(
            k,
            Matrix3::identity(),
            Vector3::new(-0.1, 0.0, 0.0),
            32,
            32,
            1.0,
            4.0,
        )
        .unwrap();
        let source = SourceView {
            image_id: 1,
            image: OwnedImage::filled(32, 32, 0.0f32).unwrap(),
            camera: source_camera,
            prior_depth: prior.map(|d| OwnedImage::filled(32, 32, d).unwrap()),
        };
        Scene::new(
            0,
            OwnedImage::filled(32, 32, 0.0f32).unwrap(),
            camera,
            vec![source],
        )
        .unwrap()
    }

    fn geometric_share(scene: &Scene, factor: f32) -> f32 {
        let plane = PlaneHypothesis::new(Vector3::new(0.0, 0.0, -1.0), 2.0);
        let window = Window::new(1, 1);
        let photometric = CostEvaluator::new(scene, &Flat, None).view_costs(16, 16, &plane, window);
        let combined =
            CostEvaluator::new(scene, &Flat, Some(factor)).view_costs(16, 16, &plane, window);
        assert_eq!(photometric.as_slice(), &[0.25]);
        combined.as_slice()[0] - photometric.as_slice()[0]
    }

    #[test]
    fn consistent_prior_adds_no_geometric_cost() {
        let share = geometric_share(&stereo_pair(Some(2.0)), 0.2);
        assert!(share.abs() < 1e-4, "share = {share}");
    }

    #[test]
    fn inconsistent_prior_adds_weighted_reprojection_error() {
        let scene = stereo_pair(Some(1.5));
        let src = &scene.sources[0];
        let err = reprojection_error(
            &scene.camera,
            &src.camera,
            src.prior_depth.as_ref().unwrap(),
            16.0,
            16.0,
            2.0,
        );
        assert!(err > 0.5 && err < GEOM_ERROR_CAP, "err = {err}");

        let share = geometric_share(&scene, 0.2);
        assert!((share - 0.2 * err.min(GEOM_ERROR_CAP)).abs() < 1e-5);
    }

    #[test]
    fn missing_prior_adds_the_capped_error() {
        let share = geometric_share(&stereo_pair(None), 0.2);
        assert!((share - 0.2 * GEOM_ERROR_CAP).abs() < 1e-5);
    }

    #[test]
    fn aggregate_is_mean_over_mask() {
        let costs = ViewCosts::from_slice(&[0.2, 0.4, 1.0]);
        assert!((costs.aggregate(0b011) - 0.3).abs() < 1e-6);
        assert_eq!(costs.aggregate(0), INVALID_COST);
    }

    #[test]
    fn window_offsets_follow_step() {
        let offsets: Vec<_> = Window::new(2, 2).offsets().collect();
        assert_eq!(offsets.len(), 9);
        assert_eq!(offsets[0], (-2, -2));
        assert_eq!(offsets[8], (2, 2));
    }

    #[test]
    fn homography_matches_point_projection() {
        let k = Matrix3::new(60.0, 0.0, 16.0, 0.0, 60.0, 16.0, 0.0, 0.0, 1.0);
        let reference =
            Camera::new(k, Matrix3::identity(), Vector3::zeros(), 32, 32, 1.0, 5.0).unwrap();
        let source = Camera::new(
            k,
            Matrix3::identity(),
            Vector3::new(-0.2, 0.05, 0.0),
            32,
            32,
            1.0,
            5.0,
        )
        .unwrap();
        let geometry = ViewGeometry::new(&reference, &source);
        let plane = PlaneHypothesis::new(Vector3::new(0.2, -0.1, -1.0).normalize(), 2.5);
        let h = geometry.homography(&reference, &plane, 10.0, 12.0).unwrap();

        // a second pixel on the same plane
        let depth = plane.depth_at(&reference, (10.0, 12.0), (14.0, 9.0)).unwrap();
        let point = reference.backproject(14.0, 9.0, depth);
        let (expected, _) = source.project(&point).unwrap();
        let got = ViewGeometry::apply(&h, 14.0, 9.0).unwrap();
        assert!((got - expected).norm() < 1e-3);
    }
}
