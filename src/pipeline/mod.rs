//! Coarse-to-fine round scheduler over all problems of a dense folder.
//!
//! A run has `round_count` rounds. Round `i` works at scale
//! `2^(rounds - 1 - i)` and consists of one initialization step followed by
//! `refine_steps` same-scale refinement steps; every step runs the engine
//! once per problem. The step plan is a pure function of the base
//! parameters ([`schedule`]) so it can be inspected without touching disk.

#[cfg(feature = "image-io")]
mod runner;

#[cfg(feature = "image-io")]
pub use runner::{planned_rounds, DenseFolder, Pipeline, PipelineReport};

use crate::device::Device;
use crate::fusion::FusionConfig;
use crate::problem::{RunParameters, RunState};
use crate::util::{ApdError, ApdResult};

/// Pipeline-level settings around the per-problem run parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Images whose larger side exceeds this get extra coarse rounds.
    pub max_image_size: usize,
    /// Same-scale refinement steps after each round's initialization step.
    pub refine_steps: usize,
    /// Keep the per-problem binary maps after fusion.
    pub keep_intermediate: bool,
    /// Write depth/normal/state previews after every step.
    pub save_previews: bool,
    pub fusion: FusionConfig,
    /// Base parameters; the scheduler overrides the per-round fields.
    pub params: RunParameters,
    pub device: Device,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_image_size: 1000,
            refine_steps: 3,
            keep_intermediate: false,
            save_previews: false,
            fusion: FusionConfig::default(),
            params: RunParameters::default(),
            device: Device::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> ApdResult<()> {
        if self.max_image_size == 0 {
            return Err(ApdError::config("max_image_size must be positive"));
        }
        if self.fusion.min_consistent_views == 0 {
            return Err(ApdError::config("fusion needs at least one consistent view"));
        }
        self.params.validate()
    }
}

/// One engine invocation per problem at a fixed scale.
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduleStep {
    /// Position in the whole run; used to name previews.
    pub index: usize,
    pub round: usize,
    /// 0 for the initialization step of a round, then 1..=refine_steps.
    pub step: usize,
    /// Downsampling factor (power of two).
    pub scale: u32,
    pub params: RunParameters,
}

/// `1 +` the number of halvings that bring `max_side` down to `max_image_size`.
pub fn round_count(max_side: usize, max_image_size: usize) -> usize {
    let mut side = max_side;
    let mut rounds = 1;
    while side > max_image_size.max(1) {
        side /= 2;
        rounds += 1;
    }
    rounds
}

fn round_apd(params: &mut RunParameters, round: usize) {
    if round == 0 {
        params.use_apd = false;
    } else {
        params.use_apd = true;
        params.ransac_threshold = 0.01 - round as f32 * 0.00125;
        params.rotate_time = (1usize << round.min(2)).min(4);
    }
}

/// Expands `base` into the ordered list of steps for `rounds` rounds.
pub fn schedule(base: &RunParameters, rounds: usize, refine_steps: usize) -> Vec<ScheduleStep> {
    let mut steps = Vec::with_capacity(rounds * (refine_steps + 1));
    for round in 0..rounds {
        let scale = 1u32 << (rounds - 1 - round);

        let mut params = base.clone();
        params.state = if round == 0 {
            RunState::FirstInit
        } else {
            RunState::RefineInit
        };
        round_apd(&mut params, round);
        params.geom_consistency = false;
        params.weak_peak_radius = 6;
        steps.push(ScheduleStep {
            index: steps.len(),
            round,
            step: 0,
            scale,
            params,
        });

        for j in 0..refine_steps {
            let mut params = base.clone();
            params.state = RunState::RefineIter;
            round_apd(&mut params, round);
            params.geom_consistency = true;
            params.weak_peak_radius = 4usize.saturating_sub(2 * j).max(2);
            steps.push(ScheduleStep {
                index: steps.len(),
                round,
                step: j + 1,
                scale,
                params,
            });
        }
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::{round_count, schedule};
    use crate::problem::{RunParameters, RunState};

    #[test]
    fn round_count_halves_until_small_enough() {
        assert_eq!(round_count(800, 1000), 1);
        assert_eq!(round_count(1000, 1000), 1);
        assert_eq!(round_count(1600, 1000), 2);
        assert_eq!(round_count(4000, 1000), 3);
    }

    #[test]
    fn first_round_never_deforms() {
        let steps = schedule(&RunParameters::default(), 3, 3);
        assert_eq!(steps.len(), 12);
        for step in steps.iter().filter(|s| s.round == 0) {
            assert!(!step.params.use_apd);
            assert_eq!(step.scale, 4);
        }
        assert_eq!(steps[0].params.state, RunState::FirstInit);
        assert!(!steps[0].params.geom_consistency);
    }

    #[test]
    fn later_rounds_tighten_ransac_and_add_orientations() {
        let steps = schedule(&RunParameters::default(), 3, 3);
        let init = &steps[4];
        assert_eq!((init.round, init.step, init.scale), (1, 0, 2));
        assert_eq!(init.params.state, RunState::RefineInit);
        assert!(init.params.use_apd && !init.params.geom_consistency);
        assert!((init.params.ransac_threshold - 0.00875).abs() < 1e-7);
        assert_eq!(init.params.rotate_time, 2);
        assert_eq!(init.params.weak_peak_radius, 6);

        let last = &steps[11];
        assert_eq!((last.round, last.step, last.scale), (2, 3, 1));
        assert_eq!(last.params.state, RunState::RefineIter);
        assert!(last.params.geom_consistency);
        assert_eq!(last.params.rotate_time, 4);
        assert_eq!(last.params.weak_peak_radius, 2);
        let radii: Vec<_> = steps[9..12].iter().map(|s| s.params.weak_peak_radius).collect();
        assert_eq!(radii, vec![4, 2, 2]);
    }
}
