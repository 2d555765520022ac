//! Per-invocation configuration: run parameters and problems.

use crate::util::{ApdError, ApdResult};
use std::path::PathBuf;

/// Hard cap on source images per problem; selected views are a `u32` bitmask.
pub const MAX_SOURCE_IMAGES: usize = 32;

/// Initialization policy for one engine invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    /// Draw every hypothesis at random.
    FirstInit,
    /// Seed from the previous (coarser) round's output, upsampled.
    RefineInit,
    /// Seed from the previous step's output at the same scale.
    RefineIter,
}

impl RunState {
    /// Returns true for the states that seed from a persisted estimate.
    pub fn seeds_from_prior(self) -> bool {
        !matches!(self, RunState::FirstInit)
    }
}

/// Options for one engine invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct RunParameters {
    /// Propagation rounds (each = one even and one odd pass).
    pub max_iterations: usize,
    /// Number of top-ranked source images used from the pairing list.
    pub num_images: usize,
    /// Number of trusted views per pixel.
    pub top_k: usize,
    /// Spatial bandwidth of the bilateral window weights.
    pub sigma_spatial: f32,
    /// Intensity bandwidth of the bilateral window weights.
    pub sigma_color: f32,
    /// Matching window half-size in pixels.
    pub patch_radius: usize,
    /// Sampling stride inside the matching window.
    pub patch_step: usize,
    /// Relative depth perturbation at iteration 0; halves every iteration.
    pub perturbation: f32,
    /// Samples per long propagation arm.
    pub arm_length: usize,
    /// Initial confidence window radius for classification.
    pub strong_radius: usize,
    /// Radius growth between confidence evaluations.
    pub strong_increment: usize,
    /// Number of confidence radii tried.
    pub strong_steps: usize,
    /// Depth samples in the confidence cost curve.
    pub curve_samples: usize,
    /// Cost below which a confident pixel may be STRONG.
    pub strong_cost_threshold: f32,
    /// A curve sample within this margin of the best cost makes a pixel ambiguous.
    pub ambiguity_margin: f32,
    /// Initial nearest-strong search radius.
    pub weak_radius: usize,
    /// Nearest-strong search radius growth.
    pub weak_increment: usize,
    /// Enable patch deformation recovery for weak pixels.
    pub use_apd: bool,
    /// Radius around each anchor from which strong pixels are sampled.
    pub weak_peak_radius: usize,
    /// Number of anchor-ray orientations tried per weak pixel.
    pub rotate_time: usize,
    /// Relative point-to-plane distance for RANSAC inliers.
    pub ransac_threshold: f32,
    /// RANSAC hypotheses per orientation.
    pub ransac_iterations: usize,
    /// Minimum inlier fraction for a fit to be reliable.
    pub min_inlier_ratio: f32,
    /// Add the geometric consistency term to the cost.
    pub geom_consistency: bool,
    /// Weight of the geometric consistency term.
    pub geom_factor: f32,
    /// Reclassify after every iteration (otherwise only once before refinement).
    pub classify_each_iteration: bool,
    /// Base seed for per-pixel random states.
    pub seed: u64,
    /// Initialization policy.
    pub state: RunState,
}

impl Default for RunParameters {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            num_images: 10,
            top_k: 4,
            sigma_spatial: 5.0,
            sigma_color: 3.0,
            patch_radius: 5,
            patch_step: 2,
            perturbation: 0.02,
            arm_length: 11,
            strong_radius: 5,
            strong_increment: 2,
            strong_steps: 3,
            curve_samples: 16,
            strong_cost_threshold: 0.5,
            ambiguity_margin: 0.05,
            weak_radius: 5,
            weak_increment: 5,
            use_apd: true,
            weak_peak_radius: 2,
            rotate_time: 4,
            ransac_threshold: 0.005,
            ransac_iterations: 64,
            min_inlier_ratio: 0.6,
            geom_consistency: false,
            geom_factor: 0.2,
            classify_each_iteration: true,
            seed: 0x00a9_d5ee_d000_0001,
            state: RunState::FirstInit,
        }
    }
}

impl RunParameters {
    /// Checks value ranges that would otherwise break buffer layout or loops.
    pub fn validate(&self) -> ApdResult<()> {
        if self.num_images == 0 || self.num_images > MAX_SOURCE_IMAGES {
            return Err(ApdError::TooManyImages {
                count: self.num_images,
                max: MAX_SOURCE_IMAGES,
            });
        }
        if self.top_k == 0 {
            return Err(ApdError::config("top_k must be at least 1"));
        }
        if self.patch_step == 0 || self.strong_increment == 0 || self.weak_increment == 0 {
            return Err(ApdError::config("window and search increments must be non-zero"));
        }
        if self.strong_steps == 0 || self.curve_samples < 2 {
            return Err(ApdError::config(
                "classification needs at least one radius and two curve samples",
            ));
        }
        if !(self.ransac_threshold > 0.0) || !(0.0..=1.0).contains(&self.min_inlier_ratio) {
            return Err(ApdError::config("invalid RANSAC thresholds"));
        }
        if self.sigma_spatial <= 0.0 || self.sigma_color <= 0.0 {
            return Err(ApdError::config("bilateral sigmas must be positive"));
        }
        Ok(())
    }
}

/// One reference image with its ranked sources, output location and scale.
#[derive(Clone, Debug, PartialEq)]
pub struct Problem {
    /// Position of the problem in the pairing list.
    pub index: usize,
    pub ref_image_id: u32,
    /// Ranked source ids (reference id and non-positive scores removed).
    pub src_image_ids: Vec<u32>,
    pub result_folder: PathBuf,
    /// Downsampling factor of this round (power of two).
    pub scale: u32,
    pub params: RunParameters,
}

impl Problem {
    /// Builds a problem, rejecting source lists that exceed the fixed cap.
    pub fn new(
        index: usize,
        ref_image_id: u32,
        src_image_ids: Vec<u32>,
        result_folder: PathBuf,
    ) -> ApdResult<Self> {
        let src_image_ids: Vec<u32> = src_image_ids
            .into_iter()
            .filter(|&id| id != ref_image_id)
            .collect();
        if src_image_ids.len() > MAX_SOURCE_IMAGES {
            return Err(ApdError::TooManyImages {
                count: src_image_ids.len(),
                max: MAX_SOURCE_IMAGES,
            });
        }
        Ok(Self {
            index,
            ref_image_id,
            src_image_ids,
            result_folder,
            scale: 1,
            params: RunParameters::default(),
        })
    }

    /// Source ids actually used by the engine (first `num_images` ranked).
    pub fn active_sources(&self) -> &[u32] {
        let n = self.params.num_images.min(self.src_image_ids.len());
        &self.src_image_ids[..n]
    }
}

#[cfg(test)]
mod tests {
    use super::{Problem, RunParameters, MAX_SOURCE_IMAGES};
    use crate::util::ApdError;
    use std::path::PathBuf;

    #[test]
    fn defaults_validate() {
        RunParameters::default().validate().unwrap();
    }

    #[test]
    fn oversized_source_cap_is_rejected() {
        let params = RunParameters {
            num_images: MAX_SOURCE_IMAGES + 1,
            ..RunParameters::default()
        };
        assert_eq!(
            params.validate(),
            Err(ApdError::TooManyImages {
                count: MAX_SOURCE_IMAGES + 1,
                max: MAX_SOURCE_IMAGES
            })
        );
    }

    #[test]
    fn problem_drops_reference_from_sources() {
        let problem = Problem::new(0, 3, vec![1, 3, 5], PathBuf::from("out")).unwrap();
        assert_eq!(problem.src_image_ids, vec![1, 5]);
    }

    #[test]
    fn problem_rejects_too_many_sources() {
        let ids: Vec<u32> = (1..=(MAX_SOURCE_IMAGES as u32 + 1)).collect();
        let err = Problem::new(0, 0, ids, PathBuf::new()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn active_sources_respects_cap() {
        let mut problem = Problem::new(0, 0, vec![1, 2, 3, 4], PathBuf::new()).unwrap();
        problem.params.num_images = 2;
        assert_eq!(problem.active_sources(), &[1, 2]);
    }
}
