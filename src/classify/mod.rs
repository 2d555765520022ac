//! STRONG / WEAK / UNKNOWN pixel classification.
//!
//! A pixel is STRONG when its accepted cost is low and the cost curve along
//! the depth axis has no competing minimum at some window radius. Texture-poor
//! pixels produce flat curves and stay WEAK; they are the candidates for
//! patch deformation.

pub mod nearest;

use crate::cost::{CostEvaluator, MatchingCost, Window};
use crate::device::Device;
use crate::hypothesis::{HypothesisStore, PlaneHypothesis};
use crate::problem::RunParameters;
use crate::trace::{trace_event, trace_span};
use crate::views::ViewSelector;

pub use nearest::{NearestStrongMap, MAX_SEARCH_RADIUS};

/// Confidence label of a pixel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PixelState {
    #[default]
    Weak = 0,
    Strong = 1,
    Unknown = 2,
}

impl PixelState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decodes a persisted label; returns `None` for unknown codes.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PixelState::Weak),
            1 => Some(PixelState::Strong),
            2 => Some(PixelState::Unknown),
            _ => None,
        }
    }
}

/// Pixel counts per label.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub strong: usize,
    pub weak: usize,
    pub unknown: usize,
}

impl StateCounts {
    pub fn from_states(states: &[PixelState]) -> Self {
        states.iter().fold(Self::default(), |mut counts, state| {
            match state {
                PixelState::Strong => counts.strong += 1,
                PixelState::Weak => counts.weak += 1,
                PixelState::Unknown => counts.unknown += 1,
            }
            counts
        })
    }
}

/// Thresholds of the confidence test.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClassifierParams {
    pub strong_radius: usize,
    pub strong_increment: usize,
    pub strong_steps: usize,
    pub patch_step: usize,
    pub curve_samples: usize,
    pub strong_cost_threshold: f32,
    pub ambiguity_margin: f32,
}

impl ClassifierParams {
    pub fn from_params(params: &RunParameters) -> Self {
        Self {
            strong_radius: params.strong_radius,
            strong_increment: params.strong_increment,
            strong_steps: params.strong_steps,
            patch_step: params.patch_step,
            curve_samples: params.curve_samples,
            strong_cost_threshold: params.strong_cost_threshold,
            ambiguity_margin: params.ambiguity_margin,
        }
    }

    /// Matching windows tried from small to large.
    pub fn windows(&self) -> impl Iterator<Item = Window> + '_ {
        (0..self.strong_steps).map(move |s| {
            Window::new(
                self.strong_radius + s * self.strong_increment,
                self.patch_step,
            )
        })
    }
}

/// Labels pixels from the cost of their accepted hypothesis.
pub struct WeakPixelClassifier<'a, M: ?Sized> {
    evaluator: &'a CostEvaluator<'a, M>,
    params: ClassifierParams,
    device: Device,
}

impl<'a, M: MatchingCost + ?Sized> WeakPixelClassifier<'a, M> {
    pub fn new(
        evaluator: &'a CostEvaluator<'a, M>,
        params: ClassifierParams,
        device: Device,
    ) -> Self {
        Self {
            evaluator,
            params,
            device,
        }
    }

    /// Labels one pixel holding `plane` with selected views `mask`.
    pub fn classify_pixel(
        &self,
        x: usize,
        y: usize,
        plane: &PlaneHypothesis,
        mask: u32,
    ) -> PixelState {
        let camera = &self.evaluator.scene().camera;
        if !camera.depth_in_range(plane.depth) {
            return PixelState::Unknown;
        }

        let (dmin, dmax) = (camera.depth_min(), camera.depth_max());
        let samples = self.params.curve_samples.max(2);
        let step = (dmax - dmin) / samples as f32;
        let band = 2.0 * step;

        for (s, window) in self.params.windows().enumerate() {
            let views = self.evaluator.view_costs(x, y, plane, window);
            if s == 0 && views.all_invalid() {
                return PixelState::Unknown;
            }
            let best = views.aggregate(mask);
            if best >= self.params.strong_cost_threshold {
                continue;
            }
            let ambiguous = (0..samples).any(|i| {
                let depth = dmin + (i as f32 + 0.5) * step;
                if (depth - plane.depth).abs() <= band {
                    return false;
                }
                let probe = PlaneHypothesis::new(plane.normal, depth);
                let cost = self.evaluator.cost(x, y, &probe, window, mask);
                cost < best + self.params.ambiguity_margin
            });
            if !ambiguous {
                return PixelState::Strong;
            }
        }
        PixelState::Weak
    }

    /// Relabels every pixel of the store.
    pub fn classify(
        &self,
        store: &HypothesisStore,
        selector: &ViewSelector,
        states: &mut [PixelState],
    ) -> StateCounts {
        let _span = trace_span!("classify").entered();
        let width = store.width();
        let planes = store.planes();
        let masks = selector.selected();
        let labels = self.device.map_range(planes.len(), |idx| {
            self.classify_pixel(idx % width, idx / width, &planes[idx], masks[idx])
        });
        states.copy_from_slice(&labels);

        let counts = StateCounts::from_states(states);
        trace_event!(
            "classified",
            strong = counts.strong,
            weak = counts.weak,
            unknown = counts.unknown
        );
        counts
    }
}
