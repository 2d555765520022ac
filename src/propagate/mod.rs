//! Checkerboard propagation passes.
//!
//! Pixels are split by the parity of `x + y`. A pass updates one colour,
//! reading hypotheses only from the front buffer and writing the back
//! buffer, then publishes the result. Every pattern offset lands on the
//! other colour, so each candidate was fixed before the pass began.
//!
//! Per pixel the candidates are, in order: the best-cost pixel of every
//! arm moved along its plane, a random depth and a random normal combined
//! with the current best, and `REFINE_TRIALS` shrinking perturbations of
//! the current best. A candidate replaces the best only if strictly cheaper
//! under the pixel's selected views.

pub mod neighbours;

use crate::cost::{CostEvaluator, MatchingCost, ViewCosts, Window};
use crate::device::Device;
use crate::hypothesis::{HypothesisStore, PassBuffers, PlaneHypothesis, RandomField};
use crate::trace::{trace_debug, trace_span};
use crate::views::{ViewRow, ViewSelector};
use rand::rngs::SmallRng;

pub use neighbours::NeighbourPattern;

/// Local perturbations tried per pixel and pass, each at half the previous scale.
pub const REFINE_TRIALS: usize = 3;

/// Checkerboard colour updated by a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Even,
    Odd,
}

impl Phase {
    /// Returns true when `(x, y)` is updated in this phase.
    #[inline]
    pub fn contains(self, x: usize, y: usize) -> bool {
        let even = (x + y) % 2 == 0;
        matches!((self, even), (Phase::Even, true) | (Phase::Odd, false))
    }

    /// First column of row `y` that belongs to this phase.
    #[inline]
    fn first_column(self, y: usize) -> usize {
        match self {
            Phase::Even => y % 2,
            Phase::Odd => (y + 1) % 2,
        }
    }
}

/// Drives the per-pixel propose/evaluate/accept step.
pub struct CheckerboardPropagator<'a, M: ?Sized> {
    evaluator: &'a CostEvaluator<'a, M>,
    pattern: &'a NeighbourPattern,
    window: Window,
    perturbation: f32,
    device: Device,
}

struct RowWork<'r> {
    y: usize,
    planes: &'r mut [PlaneHypothesis],
    costs: &'r mut [f32],
    views: ViewRow<'r>,
    rngs: &'r mut [SmallRng],
}

impl<'a, M: MatchingCost + ?Sized> CheckerboardPropagator<'a, M> {
    pub fn new(
        evaluator: &'a CostEvaluator<'a, M>,
        pattern: &'a NeighbourPattern,
        window: Window,
        perturbation: f32,
        device: Device,
    ) -> Self {
        Self {
            evaluator,
            pattern,
            window,
            perturbation,
            device,
        }
    }

    /// Relative perturbation scale at `iteration`; halves every iteration.
    pub fn perturbation_scale(&self, iteration: usize) -> f32 {
        self.perturbation * 0.5f32.powi(iteration.min(30) as i32)
    }

    /// Runs one pass over the pixels of `phase` and publishes the result.
    pub fn run_pass(
        &self,
        store: &mut HypothesisStore,
        selector: &mut ViewSelector,
        random: &mut RandomField,
        phase: Phase,
        iteration: usize,
    ) {
        let _span = trace_span!("propagation_pass", iteration = iteration, phase = ?phase).entered();
        let width = store.width();
        let height = store.height();
        let scale = self.perturbation_scale(iteration);

        let PassBuffers {
            read_planes,
            read_costs,
            write_planes,
            write_costs,
        } = store.begin_pass();

        let rows: Vec<RowWork<'_>> = write_planes
            .chunks_mut(width)
            .zip(write_costs.chunks_mut(width))
            .zip(selector.rows_mut())
            .zip(random.rows_mut())
            .enumerate()
            .map(|(y, (((planes, costs), views), rngs))| RowWork {
                y,
                planes,
                costs,
                views,
                rngs,
            })
            .collect();

        let reads = FrontBuffers {
            planes: read_planes,
            costs: read_costs,
            width,
            height,
        };
        self.device.for_each_row(rows, |mut row| {
            let mut x = phase.first_column(row.y);
            while x < width {
                self.update_pixel(&reads, &mut row, x, scale);
                x += 2;
            }
        });
        store.swap();

        trace_debug!(
            "pass_complete",
            iteration = iteration,
            mean_cost = mean_finite(store.costs())
        );
    }

    fn update_pixel(&self, reads: &FrontBuffers<'_>, row: &mut RowWork<'_>, x: usize, scale: f32) {
        let y = row.y;
        let idx = y * reads.width + x;
        let camera = &self.evaluator.scene().camera;
        let mask = row.views.mask(x);

        let mut best = Accepted {
            plane: reads.planes[idx],
            cost: reads.costs[idx],
            views: row.views.cached_costs(x),
        };
        let consider = |best: &mut Accepted, candidate: PlaneHypothesis| {
            let views = self.evaluator.view_costs(x, y, &candidate, self.window);
            let cost = views.aggregate(mask);
            if cost < best.cost {
                *best = Accepted {
                    plane: candidate,
                    cost,
                    views,
                };
            }
        };

        for arm in self.pattern.arms() {
            let Some((nx, ny)) = reads.best_on_arm(x, y, arm) else {
                continue;
            };
            let neighbour = reads.planes[ny * reads.width + nx];
            if let Some(candidate) = neighbour.transfer(camera, (nx, ny), (x, y)) {
                consider(&mut best, candidate);
            }
        }

        let rng = &mut row.rngs[x];
        let random = PlaneHypothesis::random(camera, x, y, rng);
        let candidate = PlaneHypothesis::new(best.plane.normal, random.depth);
        consider(&mut best, candidate);
        let candidate = PlaneHypothesis::new(random.normal, best.plane.depth);
        consider(&mut best, candidate);
        let mut trial_scale = scale;
        for _ in 0..REFINE_TRIALS {
            let candidate = best.plane.perturbed(camera, x, y, trial_scale, rng);
            consider(&mut best, candidate);
            trial_scale *= 0.5;
        }

        row.planes[x] = best.plane;
        let new_mask = row.views.update(x, &best.views);
        row.costs[x] = accepted_cost(&best.views, new_mask);
    }
}

/// Best hypothesis seen so far while updating one pixel.
struct Accepted {
    plane: PlaneHypothesis,
    cost: f32,
    views: ViewCosts,
}

/// Cost stored for an accepted hypothesis under its reselected views.
#[inline]
pub(crate) fn accepted_cost(views: &ViewCosts, mask: u32) -> f32 {
    views.aggregate(mask)
}

/// Read-only front buffers shared by all rows of a pass.
struct FrontBuffers<'r> {
    planes: &'r [PlaneHypothesis],
    costs: &'r [f32],
    width: usize,
    height: usize,
}

impl FrontBuffers<'_> {
    /// In-bounds pixel of `arm` with the lowest accepted cost.
    fn best_on_arm(&self, x: usize, y: usize, arm: &[(isize, isize)]) -> Option<(usize, usize)> {
        let mut best: Option<((usize, usize), f32)> = None;
        for &(dx, dy) in arm {
            let nx = x as isize + dx;
            let ny = y as isize + dy;
            if nx < 0 || ny < 0 || nx >= self.width as isize || ny >= self.height as isize {
                continue;
            }
            let (nx, ny) = (nx as usize, ny as usize);
            let cost = self.costs[ny * self.width + nx];
            if best.map_or(true, |(_, c)| cost < c) {
                best = Some(((nx, ny), cost));
            }
        }
        best.map(|(p, _)| p)
    }
}

fn mean_finite(costs: &[f32]) -> f32 {
    let (sum, n) = costs
        .iter()
        .filter(|c| c.is_finite())
        .fold((0.0f64, 0usize), |(s, n), &c| (s + f64::from(c), n + 1));
    if n == 0 {
        0.0
    } else {
        (sum / n as f64) as f32
    }
}
