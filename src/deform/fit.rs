//! Robust plane fitting for patch deformation.

use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use rand::Rng;

/// Plane `normal . p + offset = 0` in camera coordinates with its support.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaneFit {
    pub normal: Vector3<f32>,
    pub offset: f32,
    pub inliers: usize,
}

impl PlaneFit {
    /// Point-to-plane distance relative to the point's depth.
    #[inline]
    pub fn relative_distance(&self, p: &Vector3<f32>) -> f32 {
        (self.normal.dot(p) + self.offset).abs() / p.z.max(f32::EPSILON)
    }

    /// Number of points within `threshold` relative distance.
    pub fn count_inliers(&self, points: &[Vector3<f32>], threshold: f32) -> usize {
        points
            .iter()
            .filter(|p| self.relative_distance(p) < threshold)
            .count()
    }
}

fn plane_through(
    a: &Vector3<f32>,
    b: &Vector3<f32>,
    c: &Vector3<f32>,
) -> Option<(Vector3<f32>, f32)> {
    let normal = (b - a).cross(&(c - a)).try_normalize(1e-9)?;
    Some((normal, -normal.dot(a)))
}

/// Total least-squares plane through `points`.
pub fn fit_plane_least_squares(points: &[Vector3<f32>]) -> Option<(Vector3<f32>, f32)> {
    if points.len() < 3 {
        return None;
    }
    let n = points.len() as f32;
    let centroid = points.iter().fold(Vector3::<f32>::zeros(), |acc, p| acc + p) / n;
    let mut cov = Matrix3::<f32>::zeros();
    for p in points {
        let d = p - centroid;
        cov += d * d.transpose();
    }
    let eig = SymmetricEigen::new(cov / n);
    let smallest = eig.eigenvalues.imin();
    let normal = eig
        .eigenvectors
        .column(smallest)
        .into_owned()
        .try_normalize(1e-9)?;
    if !normal.iter().all(|v| v.is_finite()) {
        return None;
    }
    Some((normal, -normal.dot(&centroid)))
}

/// RANSAC over random point triples followed by a least-squares refit on
/// the inliers of the best triple.
///
/// Returns the plane with the largest inlier count; ties keep the earlier
/// sample. `None` when fewer than three points are given or all triples are
/// degenerate.
pub fn fit_plane_ransac<R: Rng + ?Sized>(
    points: &[Vector3<f32>],
    iterations: usize,
    threshold: f32,
    rng: &mut R,
) -> Option<PlaneFit> {
    let n = points.len();
    if n < 3 {
        return None;
    }

    let mut best: Option<PlaneFit> = None;
    for _ in 0..iterations.max(1) {
        let sample = rand::seq::index::sample(rng, n, 3);
        let Some((normal, offset)) = plane_through(
            &points[sample.index(0)],
            &points[sample.index(1)],
            &points[sample.index(2)],
        ) else {
            continue;
        };
        let mut fit = PlaneFit {
            normal,
            offset,
            inliers: 0,
        };
        fit.inliers = fit.count_inliers(points, threshold);
        if best.map_or(true, |b| fit.inliers > b.inliers) {
            best = Some(fit);
            if fit.inliers == n {
                break;
            }
        }
    }

    let best = best?;
    let inliers: Vec<Vector3<f32>> = points
        .iter()
        .filter(|p| best.relative_distance(p) < threshold)
        .copied()
        .collect();
    let Some((normal, offset)) = fit_plane_least_squares(&inliers) else {
        return Some(best);
    };
    let mut refit = PlaneFit {
        normal,
        offset,
        inliers: 0,
    };
    refit.inliers = refit.count_inliers(points, threshold);
    Some(if refit.inliers >= best.inliers { refit } else { best })
}
