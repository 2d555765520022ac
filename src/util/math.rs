//! Numeric helpers shared by the cost, initialization and fusion code.

use crate::image::ImageView;
use nalgebra::Vector3;
use rand::Rng;

/// Draws a direction uniformly on the unit sphere (Marsaglia's method).
pub(crate) fn random_unit_vector<R: Rng + ?Sized>(rng: &mut R) -> Vector3<f32> {
    loop {
        let a = rng.random_range(-1.0f32..1.0);
        let b = rng.random_range(-1.0f32..1.0);
        let s = a * a + b * b;
        if s >= 1.0 || s <= f32::EPSILON {
            continue;
        }
        let f = 2.0 * (1.0 - s).sqrt();
        return Vector3::new(a * f, b * f, 1.0 - 2.0 * s);
    }
}

/// Draws a point uniformly inside the unit ball.
pub(crate) fn random_in_unit_ball<R: Rng + ?Sized>(rng: &mut R) -> Vector3<f32> {
    loop {
        let v = Vector3::new(
            rng.random_range(-1.0f32..1.0),
            rng.random_range(-1.0f32..1.0),
            rng.random_range(-1.0f32..1.0),
        );
        if v.norm_squared() <= 1.0 {
            return v;
        }
    }
}

/// Angle between two unit vectors in degrees.
pub(crate) fn angle_between_deg(a: &Vector3<f32>, b: &Vector3<f32>) -> f32 {
    a.dot(b).clamp(-1.0, 1.0).acos().to_degrees()
}

/// Bilinear interpolation with edge clamping.
pub(crate) fn bilinear(img: &ImageView<'_, f32>, x: f32, y: f32) -> f32 {
    let (width, height) = (img.width(), img.height());
    let x = x.clamp(0.0, (width - 1) as f32);
    let y = y.clamp(0.0, (height - 1) as f32);
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    // both rows exist once the coordinates are clamped
    let (Some(upper), Some(lower)) = (img.row(y0), img.row(y1)) else {
        return 0.0;
    };
    let (a, b) = (upper[x0], upper[x1]);
    let (c, d) = (lower[x0], lower[x1]);
    let top = a + (b - a) * fx;
    let bottom = c + (d - c) * fx;
    top + (bottom - top) * fy
}

#[cfg(test)]
mod tests {
    use super::{angle_between_deg, bilinear, random_unit_vector};
    use crate::image::ImageView;
    use nalgebra::Vector3;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn random_unit_vector_has_unit_length() {
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..100 {
            let v = random_unit_vector(&mut rng);
            assert!((v.norm() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn bilinear_interpolates_between_samples() {
        let data = [0.0, 10.0, 20.0, 30.0];
        let img = ImageView::from_slice(&data, 2, 2).unwrap();
        assert!((bilinear(&img, 0.5, 0.0) - 5.0).abs() < 1e-6);
        assert!((bilinear(&img, 0.5, 0.5) - 15.0).abs() < 1e-6);
        assert!((bilinear(&img, 5.0, 5.0) - 30.0).abs() < 1e-6);
    }

    #[test]
    fn bilinear_skips_row_padding() {
        let data = [0.0, 10.0, -1.0, 20.0, 30.0, -1.0];
        let img = ImageView::new(&data, 2, 2, 3).unwrap();
        assert!((bilinear(&img, 1.0, 0.5) - 20.0).abs() < 1e-6);
    }

    #[test]
    fn angle_between_orthogonal_axes() {
        let a = Vector3::new(1.0, 0.0, 0.0);
        let b = Vector3::new(0.0, 1.0, 0.0);
        assert!((angle_between_deg(&a, &b) - 90.0).abs() < 1e-4);
    }
}
