//! Pinhole camera model.
//!
//! World-to-camera convention: `x_cam = R * x_world + t`, pixels are
//! `K * x_cam / z`. The camera centre `c = -R^T t` is cached at construction.

use crate::util::{ApdError, ApdResult};
use nalgebra::{Matrix3, Vector2, Vector3};

/// Intrinsics, extrinsics, image size and valid depth range of one image.
#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    k: Matrix3<f32>,
    k_inv: Matrix3<f32>,
    r: Matrix3<f32>,
    t: Vector3<f32>,
    c: Vector3<f32>,
    width: usize,
    height: usize,
    depth_min: f32,
    depth_max: f32,
}

impl Camera {
    /// Builds a camera, validating the intrinsics and the depth range.
    pub fn new(
        k: Matrix3<f32>,
        r: Matrix3<f32>,
        t: Vector3<f32>,
        width: usize,
        height: usize,
        depth_min: f32,
        depth_max: f32,
    ) -> ApdResult<Self> {
        if width == 0 || height == 0 {
            return Err(ApdError::InvalidDimensions { width, height });
        }
        if !(depth_min > 0.0 && depth_max > depth_min && depth_max.is_finite()) {
            return Err(ApdError::config(format!(
                "invalid depth range [{depth_min}, {depth_max}]"
            )));
        }
        let k_inv = k
            .try_inverse()
            .ok_or(ApdError::InvalidInput("intrinsic matrix is singular"))?;
        let c = -(r.transpose() * t);
        Ok(Self {
            k,
            k_inv,
            r,
            t,
            c,
            width,
            height,
            depth_min,
            depth_max,
        })
    }

    /// Intrinsic matrix.
    pub fn k(&self) -> &Matrix3<f32> {
        &self.k
    }

    /// Inverse intrinsic matrix.
    pub fn k_inv(&self) -> &Matrix3<f32> {
        &self.k_inv
    }

    /// World-to-camera rotation.
    pub fn rotation(&self) -> &Matrix3<f32> {
        &self.r
    }

    /// World-to-camera translation.
    pub fn translation(&self) -> &Vector3<f32> {
        &self.t
    }

    /// Camera centre in world coordinates.
    pub fn center(&self) -> &Vector3<f32> {
        &self.c
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn depth_min(&self) -> f32 {
        self.depth_min
    }

    pub fn depth_max(&self) -> f32 {
        self.depth_max
    }

    /// Returns true when `depth` lies in the valid range.
    #[inline]
    pub fn depth_in_range(&self, depth: f32) -> bool {
        depth >= self.depth_min && depth <= self.depth_max
    }

    /// Ray through pixel `(x, y)` in camera coordinates, scaled to `z = 1`.
    #[inline]
    pub fn ray(&self, x: f32, y: f32) -> Vector3<f32> {
        self.k_inv * Vector3::new(x, y, 1.0)
    }

    /// Unit vector from the surface point seen at `(x, y)` back to the camera.
    #[inline]
    pub fn view_direction(&self, x: f32, y: f32) -> Vector3<f32> {
        -self.ray(x, y).normalize()
    }

    /// Camera-frame point at `depth` along the ray through `(x, y)`.
    #[inline]
    pub fn backproject_cam(&self, x: f32, y: f32, depth: f32) -> Vector3<f32> {
        self.ray(x, y) * depth
    }

    /// World point at `depth` along the ray through `(x, y)`.
    #[inline]
    pub fn backproject(&self, x: f32, y: f32, depth: f32) -> Vector3<f32> {
        self.cam_to_world(&self.backproject_cam(x, y, depth))
    }

    #[inline]
    pub fn cam_to_world(&self, p: &Vector3<f32>) -> Vector3<f32> {
        self.r.transpose() * (p - self.t)
    }

    #[inline]
    pub fn world_to_cam(&self, p: &Vector3<f32>) -> Vector3<f32> {
        self.r * p + self.t
    }

    /// Rotates a camera-frame direction into the world frame.
    #[inline]
    pub fn direction_to_world(&self, d: &Vector3<f32>) -> Vector3<f32> {
        self.r.transpose() * d
    }

    /// Projects a world point; returns the pixel and the camera-frame depth,
    /// or `None` when the point is behind the camera.
    #[inline]
    pub fn project(&self, world: &Vector3<f32>) -> Option<(Vector2<f32>, f32)> {
        let p = self.world_to_cam(world);
        if p.z <= f32::EPSILON {
            return None;
        }
        let uvw = self.k * p;
        Some((Vector2::new(uvw.x / uvw.z, uvw.y / uvw.z), p.z))
    }

    /// Returns true when the pixel coordinate lies inside the image.
    #[inline]
    pub fn contains(&self, pixel: &Vector2<f32>) -> bool {
        pixel.x >= 0.0
            && pixel.y >= 0.0
            && pixel.x <= (self.width - 1) as f32
            && pixel.y <= (self.height - 1) as f32
    }

    /// Returns the camera for an image downsampled by `scale`.
    ///
    /// Focal lengths and principal point are divided by `scale`; the image
    /// size is replaced by the given downsampled size.
    pub fn scaled(&self, scale: f32, width: usize, height: usize) -> ApdResult<Self> {
        if scale <= 0.0 {
            return Err(ApdError::InvalidInput("camera scale must be positive"));
        }
        let mut k = self.k;
        for col in 0..3 {
            k[(0, col)] /= scale;
            k[(1, col)] /= scale;
        }
        Camera::new(
            k,
            self.r,
            self.t,
            width,
            height,
            self.depth_min,
            self.depth_max,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::Camera;
    use nalgebra::{Matrix3, Vector3};

    fn camera() -> Camera {
        let k = Matrix3::new(100.0, 0.0, 32.0, 0.0, 100.0, 24.0, 0.0, 0.0, 1.0);
        Camera::new(
            k,
            Matrix3::identity(),
            Vector3::new(-0.1, 0.0, 0.0),
            64,
            48,
            0.5,
            5.0,
        )
        .unwrap()
    }

    #[test]
    fn backproject_then_project_is_identity() {
        let cam = camera();
        let world = cam.backproject(10.0, 20.0, 2.0);
        let (px, depth) = cam.project(&world).unwrap();
        assert!((px.x - 10.0).abs() < 1e-4);
        assert!((px.y - 20.0).abs() < 1e-4);
        assert!((depth - 2.0).abs() < 1e-5);
    }

    #[test]
    fn center_is_cached() {
        let cam = camera();
        assert!((cam.center() - Vector3::new(0.1, 0.0, 0.0)).norm() < 1e-6);
    }

    #[test]
    fn rejects_inverted_depth_range() {
        let k = Matrix3::identity();
        let err = Camera::new(k, Matrix3::identity(), Vector3::zeros(), 4, 4, 2.0, 1.0);
        assert!(err.unwrap_err().is_configuration());
    }

    #[test]
    fn scaled_camera_halves_intrinsics() {
        let cam = camera().scaled(2.0, 32, 24).unwrap();
        assert!((cam.k()[(0, 0)] - 50.0).abs() < 1e-6);
        assert!((cam.k()[(1, 2)] - 12.0).abs() < 1e-6);
        assert_eq!(cam.width(), 32);
    }

    #[test]
    fn view_direction_points_back_to_camera() {
        let cam = camera();
        let v = cam.view_direction(32.0, 24.0);
        assert!((v - Vector3::new(0.0, 0.0, -1.0)).norm() < 1e-6);
    }
}
