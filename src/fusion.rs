//! Cross-view depth map fusion into a colored point cloud.
//!
//! Views are visited in order and pixels in row-major order, so the result
//! is deterministic. A pixel consumed by an emitted point (as reference or
//! as consistent neighbour) is never used again.

use crate::camera::Camera;
use crate::classify::PixelState;
use crate::engine::ProblemOutput;
use crate::image::OwnedImage;
use crate::trace::{trace_event, trace_span};
use crate::util::math::angle_between_deg;
use crate::util::{ApdError, ApdResult};
use nalgebra::{Vector2, Vector3};
use std::collections::HashMap;

/// Agreement thresholds between a reference pixel and a neighbour view.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FusionConfig {
    /// Forward-backward reprojection error in reference pixels.
    pub max_reprojection_error: f32,
    /// `|projected depth - neighbour depth| / neighbour depth`.
    pub max_relative_depth_diff: f32,
    pub max_normal_angle_deg: f32,
    /// Neighbour views that must agree before a point is emitted.
    pub min_consistent_views: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            max_reprojection_error: 2.0,
            max_relative_depth_diff: 0.01,
            max_normal_angle_deg: 30.0,
            min_consistent_views: 2,
        }
    }
}

/// Final maps of one reference image together with what fusion needs
/// around them.
#[derive(Clone, Debug)]
pub struct FusionView {
    pub image_id: u32,
    pub camera: Camera,
    pub output: ProblemOutput,
    pub color: OwnedImage<[u8; 3]>,
    /// Images this one shares visibility with, usually its source list.
    pub neighbours: Vec<u32>,
}

impl FusionView {
    pub fn new(
        image_id: u32,
        camera: Camera,
        output: ProblemOutput,
        color: OwnedImage<[u8; 3]>,
        neighbours: Vec<u32>,
    ) -> ApdResult<Self> {
        let dims = (camera.width(), camera.height());
        if output.depth.dims() != dims || color.dims() != dims {
            return Err(ApdError::InvalidDimensions {
                width: output.width(),
                height: output.height(),
            });
        }
        Ok(Self {
            image_id,
            camera,
            output,
            color,
            neighbours,
        })
    }

    fn usable(&self, idx: usize) -> Option<f32> {
        let depth = self.output.depth.data()[idx];
        let state = self.output.states.data()[idx];
        (state != PixelState::Unknown && depth > 0.0).then_some(depth)
    }

    fn world_normal(&self, idx: usize) -> Vector3<f32> {
        let n = self.output.normals.data()[idx];
        self.camera.direction_to_world(&Vector3::new(n[0], n[1], n[2]))
    }
}

/// One fused 3D point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointRecord {
    pub position: [f32; 3],
    pub color: [u8; 3],
}

/// Merges per-image depth maps by multi-view agreement.
#[derive(Clone, Copy, Debug, Default)]
pub struct FusionEngine {
    config: FusionConfig,
}

impl FusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Fuses all views. Fails only if two views share an image id.
    pub fn fuse(&self, views: &[FusionView]) -> ApdResult<Vec<PointRecord>> {
        let _span = trace_span!("fusion", views = views.len()).entered();
        let mut index = HashMap::with_capacity(views.len());
        for (slot, view) in views.iter().enumerate() {
            if index.insert(view.image_id, slot).is_some() {
                return Err(ApdError::config(format!(
                    "image {} appears twice in fusion input",
                    view.image_id
                )));
            }
        }

        let mut consumed: Vec<Vec<bool>> = views
            .iter()
            .map(|v| vec![false; v.output.depth.data().len()])
            .collect();
        let mut points = Vec::new();
        let mut used = Vec::new();

        for (vi, view) in views.iter().enumerate() {
            let width = view.camera.width();
            for idx in 0..consumed[vi].len() {
                if consumed[vi][idx] {
                    continue;
                }
                let Some(depth) = view.usable(idx) else {
                    continue;
                };
                let (x, y) = ((idx % width) as f32, (idx / width) as f32);
                let point = view.camera.backproject(x, y, depth);
                let normal = view.world_normal(idx);

                used.clear();
                let mut sum = point;
                for &neighbour_id in &view.neighbours {
                    let Some(&nj) = index.get(&neighbour_id) else {
                        continue;
                    };
                    if nj == vi {
                        continue;
                    }
                    if let Some((jdx, other_point)) =
                        self.agreement(view, &views[nj], &consumed[nj], &point, &normal, (x, y))
                    {
                        sum += other_point;
                        used.push((nj, jdx));
                    }
                }

                if used.len() < self.config.min_consistent_views {
                    continue;
                }
                let mean = sum / (used.len() + 1) as f32;
                points.push(PointRecord {
                    position: [mean.x, mean.y, mean.z],
                    color: view.color.data()[idx],
                });
                consumed[vi][idx] = true;
                for &(nj, jdx) in &used {
                    consumed[nj][jdx] = true;
                }
            }
        }

        trace_event!("fused", points = points.len());
        Ok(points)
    }

    /// Checks one neighbour view; returns its pixel index and 3D point when
    /// it agrees with the reference point.
    fn agreement(
        &self,
        view: &FusionView,
        other: &FusionView,
        consumed: &[bool],
        point: &Vector3<f32>,
        normal: &Vector3<f32>,
        pixel: (f32, f32),
    ) -> Option<(usize, Vector3<f32>)> {
        let (proj, proj_depth) = other.camera.project(point)?;
        let (u, v) = (proj.x.round(), proj.y.round());
        if u < 0.0 || v < 0.0 {
            return None;
        }
        let (u, v) = (u as usize, v as usize);
        if u >= other.camera.width() || v >= other.camera.height() {
            return None;
        }
        let jdx = v * other.camera.width() + u;
        if consumed[jdx] {
            return None;
        }
        let other_depth = other.usable(jdx)?;

        let other_point = other.camera.backproject(u as f32, v as f32, other_depth);
        let (back, _) = view.camera.project(&other_point)?;
        let reprojection = (back - Vector2::new(pixel.0, pixel.1)).norm();
        let relative = (proj_depth - other_depth).abs() / other_depth;
        let angle = angle_between_deg(normal, &other.world_normal(jdx));

        let agrees = reprojection < self.config.max_reprojection_error
            && relative < self.config.max_relative_depth_diff
            && angle < self.config.max_normal_angle_deg;
        agrees.then_some((jdx, other_point))
    }
}
