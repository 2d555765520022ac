//! Hypothesis initialization for the three run states.

use super::{HypothesisStore, PlaneHypothesis, RandomField};
use crate::camera::Camera;
use crate::classify::PixelState;
use crate::image::pyramid::resample_nearest;
use crate::image::OwnedImage;
use crate::problem::RunState;
use crate::util::{ApdError, ApdResult};
use nalgebra::Vector3;

/// Depth and normal maps of a previous step, used to seed refinement.
#[derive(Clone, Debug, PartialEq)]
pub struct PriorEstimate {
    pub depth: OwnedImage<f32>,
    /// Camera-frame normals of the same reference image.
    pub normals: OwnedImage<[f32; 3]>,
}

impl PriorEstimate {
    pub fn new(depth: OwnedImage<f32>, normals: OwnedImage<[f32; 3]>) -> ApdResult<Self> {
        if depth.dims() != normals.dims() {
            return Err(ApdError::InvalidDimensions {
                width: normals.width(),
                height: normals.height(),
            });
        }
        Ok(Self { depth, normals })
    }

    /// Resamples both maps to `width x height` (nearest neighbour).
    pub fn resampled(&self, width: usize, height: usize) -> ApdResult<Self> {
        Ok(Self {
            depth: resample_nearest(&self.depth, width, height)?,
            normals: resample_nearest(&self.normals, width, height)?,
        })
    }
}

/// Fills the store for `state` and resets the pixel states.
///
/// `FirstInit` draws every hypothesis at random and marks all pixels WEAK
/// until the first classification. The refine states seed from `prior`
/// (resampled to the store size); a seed that violates the hypothesis
/// invariants is re-drawn at random and its pixel marked UNKNOWN.
pub fn initialize(
    store: &mut HypothesisStore,
    pixel_states: &mut [PixelState],
    random: &mut RandomField,
    camera: &Camera,
    state: RunState,
    prior: Option<&PriorEstimate>,
) -> ApdResult<()> {
    let width = store.width();
    let height = store.height();
    let planes = store.planes_mut();

    if !state.seeds_from_prior() {
        for ((y, row), rngs) in planes.chunks_mut(width).enumerate().zip(random.rows_mut()) {
            for (x, (plane, rng)) in row.iter_mut().zip(rngs.iter_mut()).enumerate() {
                *plane = PlaneHypothesis::random(camera, x, y, rng);
            }
        }
        pixel_states.fill(PixelState::Weak);
        return Ok(());
    }

    let prior = prior.ok_or_else(|| {
        ApdError::config(format!("{state:?} requires a prior depth/normal estimate"))
    })?;
    let prior = prior.resampled(width, height)?;

    for (y, (row, rngs)) in planes.chunks_mut(width).zip(random.rows_mut()).enumerate() {
        for (x, (plane, rng)) in row.iter_mut().zip(rngs.iter_mut()).enumerate() {
            let n = prior.normals.at(x, y);
            let seed = PlaneHypothesis::new(Vector3::new(n[0], n[1], n[2]), prior.depth.at(x, y));
            let idx = y * width + x;
            if seed.is_valid(camera, x, y) {
                *plane = seed;
                pixel_states[idx] = PixelState::Weak;
            } else {
                *plane = PlaneHypothesis::random(camera, x, y, rng);
                pixel_states[idx] = PixelState::Unknown;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{initialize, PriorEstimate};
    use crate::camera::Camera;
    use crate::classify::PixelState;
    use crate::hypothesis::{HypothesisStore, RandomField};
    use crate::image::OwnedImage;
    use crate::problem::RunState;
    use nalgebra::{Matrix3, Vector3};

    fn camera(size: usize) -> Camera {
        let c = size as f32 / 2.0;
        let k = Matrix3::new(40.0, 0.0, c, 0.0, 40.0, c, 0.0, 0.0, 1.0);
        Camera::new(k, Matrix3::identity(), Vector3::zeros(), size, size, 1.0, 4.0).unwrap()
    }

    #[test]
    fn refine_without_prior_is_rejected() {
        let cam = camera(4);
        let mut store = HypothesisStore::new(4, 4, 0).unwrap();
        let mut states = vec![PixelState::Weak; 16];
        let mut random = RandomField::new(4, 4, 1, 0).unwrap();
        let err = initialize(&mut store, &mut states, &mut random, &cam, RunState::RefineIter, None)
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn prior_is_upsampled_and_invalid_seeds_are_unknown() {
        let cam = camera(4);
        let mut depth = OwnedImage::filled(2, 2, 2.0f32).unwrap();
        depth.data_mut()[3] = 9.0;
        let normals = OwnedImage::filled(2, 2, [0.0, 0.0, -1.0]).unwrap();
        let prior = PriorEstimate::new(depth, normals).unwrap();

        let mut store = HypothesisStore::new(4, 4, 0).unwrap();
        let mut states = vec![PixelState::Strong; 16];
        let mut random = RandomField::new(4, 4, 1, 0).unwrap();
        initialize(
            &mut store,
            &mut states,
            &mut random,
            &cam,
            RunState::RefineInit,
            Some(&prior),
        )
        .unwrap();

        assert_eq!(store.plane(0, 0).depth, 2.0);
        assert_eq!(states[0], PixelState::Weak);
        assert_eq!(states[3 * 4 + 3], PixelState::Unknown);
        assert!(cam.depth_in_range(store.plane(3, 3).depth));
    }
}
