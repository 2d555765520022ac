//! Per-problem PatchMatch engine.
//!
//! One invocation initializes the hypotheses of a reference image, runs
//! `max_iterations` rounds of even/odd propagation, reclassifies pixels,
//! optionally recovers WEAK pixels by patch deformation, and returns the
//! final depth, normal, pixel-state and selected-view maps.
//!
//! Debug inspection goes through [`EngineObserver`]; the engine itself has
//! no debug switches.

use crate::classify::{ClassifierParams, NearestStrongMap, PixelState, WeakPixelClassifier};
use crate::cost::{BilateralNcc, CostEvaluator, MatchingCost, Scene, ViewCosts, Window};
use crate::deform::{deformation_input, DeformationParams, PatchDeformation};
use crate::device::Device;
use crate::hypothesis::{initialize, HypothesisStore, PlaneHypothesis, PriorEstimate, RandomField};
use crate::image::OwnedImage;
use crate::problem::RunParameters;
use crate::propagate::{CheckerboardPropagator, NeighbourPattern, Phase};
use crate::trace::{trace_event, trace_span};
use crate::util::error::try_alloc;
use crate::util::{ApdError, ApdResult};
use crate::views::ViewSelector;

/// Read-only view of the engine buffers handed to observers.
#[derive(Clone, Copy)]
pub struct EngineSnapshot<'a> {
    pub width: usize,
    pub height: usize,
    pub planes: &'a [PlaneHypothesis],
    /// Accepted cost per pixel.
    pub costs: &'a [f32],
    pub states: &'a [PixelState],
    /// Selected-view bitmask per pixel (bits index source slots).
    pub selected: &'a [u32],
    /// Pixels whose hypothesis came from a reliable deformation fit.
    pub reliable: &'a [bool],
}

/// Callbacks at fixed points of a run. All methods default to no-ops.
pub trait EngineObserver {
    fn after_initialization(&mut self, _snapshot: &EngineSnapshot<'_>) {}

    fn after_pass(&mut self, _iteration: usize, _phase: Phase, _snapshot: &EngineSnapshot<'_>) {}

    /// `iteration` is `None` for the classification outside the iteration loop.
    fn after_classification(
        &mut self,
        _iteration: Option<usize>,
        _snapshot: &EngineSnapshot<'_>,
    ) {
    }

    fn after_deformation(&mut self, _iteration: usize, _snapshot: &EngineSnapshot<'_>) {}
}

/// Observer that ignores every callback.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl EngineObserver for NoopObserver {}

/// Final maps of one problem.
#[derive(Clone, Debug, PartialEq)]
pub struct ProblemOutput {
    /// Depth per pixel; 0 where the pixel is UNKNOWN with an out-of-range depth.
    pub depth: OwnedImage<f32>,
    /// Reference camera-frame unit normals.
    pub normals: OwnedImage<[f32; 3]>,
    pub states: OwnedImage<PixelState>,
    /// Bitmask over the problem's source slots.
    pub selected_views: OwnedImage<u32>,
}

impl ProblemOutput {
    pub fn width(&self) -> usize {
        self.depth.width()
    }

    pub fn height(&self) -> usize {
        self.depth.height()
    }

    /// Depth and normals as a seed for the next step.
    pub fn prior(&self) -> ApdResult<PriorEstimate> {
        PriorEstimate::new(self.depth.clone(), self.normals.clone())
    }
}

/// Mutable per-run buffers.
struct RunBuffers {
    store: HypothesisStore,
    states: Vec<PixelState>,
    reliable: Vec<bool>,
    random: RandomField,
    selector: ViewSelector,
}

impl RunBuffers {
    fn snapshot(&self) -> EngineSnapshot<'_> {
        EngineSnapshot {
            width: self.store.width(),
            height: self.store.height(),
            planes: self.store.planes(),
            costs: self.store.costs(),
            states: &self.states,
            selected: self.selector.selected(),
            reliable: &self.reliable,
        }
    }
}

/// Runs PatchMatch for one reference image.
pub struct PatchMatchEngine<M = BilateralNcc> {
    scene: Scene,
    params: RunParameters,
    metric: M,
    device: Device,
    prior: Option<PriorEstimate>,
    problem: usize,
}

impl PatchMatchEngine<BilateralNcc> {
    /// Creates an engine with the bilateral NCC metric.
    ///
    /// Fails with a configuration error when the scene has no source view,
    /// more sources than `num_images`, or invalid parameters.
    pub fn new(scene: Scene, params: RunParameters) -> ApdResult<Self> {
        params.validate()?;
        if scene.num_sources() == 0 {
            return Err(ApdError::config(format!(
                "reference image {} has no source views",
                scene.reference_id
            )));
        }
        if scene.num_sources() > params.num_images {
            return Err(ApdError::TooManyImages {
                count: scene.num_sources(),
                max: params.num_images,
            });
        }
        let metric = BilateralNcc::from_params(&params);
        Ok(Self {
            scene,
            params,
            metric,
            device: Device::default(),
            prior: None,
            problem: 0,
        })
    }
}

impl<M: MatchingCost> PatchMatchEngine<M> {
    /// Replaces the per-view matching metric.
    pub fn with_metric<N: MatchingCost>(self, metric: N) -> PatchMatchEngine<N> {
        PatchMatchEngine {
            scene: self.scene,
            params: self.params,
            metric,
            device: self.device,
            prior: self.prior,
            problem: self.problem,
        }
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Seeds the refine states from a previous estimate.
    pub fn with_prior(mut self, prior: PriorEstimate) -> Self {
        self.prior = Some(prior);
        self
    }

    /// Tags errors and trace output with the problem's index.
    pub fn with_problem_index(mut self, problem: usize) -> Self {
        self.problem = problem;
        self
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn params(&self) -> &RunParameters {
        &self.params
    }

    pub fn run(&self) -> ApdResult<ProblemOutput> {
        self.run_with_observer(&mut NoopObserver)
    }

    pub fn run_with_observer(&self, observer: &mut dyn EngineObserver) -> ApdResult<ProblemOutput> {
        let params = &self.params;
        let _span = trace_span!(
            "patch_match",
            problem = self.problem,
            reference = self.scene.reference_id
        )
        .entered();

        let camera = &self.scene.camera;
        let (width, height) = (self.scene.width(), self.scene.height());
        let mut buffers = RunBuffers {
            store: HypothesisStore::new(width, height, self.problem)?,
            states: try_alloc(width * height, PixelState::Weak, self.problem, "pixel states")?,
            reliable: try_alloc(width * height, false, self.problem, "pixel states")?,
            random: RandomField::new(width, height, params.seed, self.problem)?,
            selector: ViewSelector::new(
                width,
                height,
                self.scene.source_ids(),
                params.top_k,
                self.problem,
            )?,
        };

        initialize(
            &mut buffers.store,
            &mut buffers.states,
            &mut buffers.random,
            camera,
            params.state,
            self.prior.as_ref(),
        )?;

        let geom_factor = params.geom_consistency.then_some(params.geom_factor);
        let evaluator = CostEvaluator::new(&self.scene, &self.metric, geom_factor);
        let window = Window::new(params.patch_radius, params.patch_step);
        self.rescore(&evaluator, &mut buffers, window, None);
        observer.after_initialization(&buffers.snapshot());

        let pattern = NeighbourPattern::checkerboard(params.arm_length);
        let propagator = CheckerboardPropagator::new(
            &evaluator,
            &pattern,
            window,
            params.perturbation,
            self.device,
        );
        let classifier = WeakPixelClassifier::new(
            &evaluator,
            ClassifierParams::from_params(params),
            self.device,
        );
        let deformation =
            PatchDeformation::new(camera, DeformationParams::from_params(params), self.device);

        if !params.classify_each_iteration {
            self.classify(&classifier, &mut buffers);
            observer.after_classification(None, &buffers.snapshot());
        }

        for iteration in 0..params.max_iterations {
            for phase in [Phase::Even, Phase::Odd] {
                propagator.run_pass(
                    &mut buffers.store,
                    &mut buffers.selector,
                    &mut buffers.random,
                    phase,
                    iteration,
                );
                observer.after_pass(iteration, phase, &buffers.snapshot());
            }

            if params.classify_each_iteration {
                self.classify(&classifier, &mut buffers);
                observer.after_classification(Some(iteration), &buffers.snapshot());
            }

            if params.use_apd {
                self.deform(&deformation, &evaluator, &mut buffers, window);
                observer.after_deformation(iteration, &buffers.snapshot());
            }
        }

        if !params.classify_each_iteration || params.max_iterations == 0 {
            self.classify(&classifier, &mut buffers);
            observer.after_classification(None, &buffers.snapshot());
        }

        self.finalize(&buffers)
    }

    fn classify(&self, classifier: &WeakPixelClassifier<'_, M>, buffers: &mut RunBuffers) {
        classifier.classify(&buffers.store, &buffers.selector, &mut buffers.states);
    }

    /// Re-evaluates view costs, selection and accepted cost for all pixels,
    /// or only for those with `Some` in `only`.
    fn rescore(
        &self,
        evaluator: &CostEvaluator<'_, M>,
        buffers: &mut RunBuffers,
        window: Window,
        only: Option<&[Option<PlaneHypothesis>]>,
    ) {
        let width = buffers.store.width();
        let planes = buffers.store.planes();
        let costs: Vec<Option<ViewCosts>> = self.device.map_range(planes.len(), |idx| {
            if only.is_some_and(|fitted| fitted[idx].is_none()) {
                return None;
            }
            Some(evaluator.view_costs(idx % width, idx / width, &planes[idx], window))
        });

        let (_, accepted) = buffers.store.front_mut();
        for (idx, views) in costs.iter().enumerate() {
            if let Some(views) = views {
                let mask = buffers.selector.update(idx, views);
                accepted[idx] = views.aggregate(mask);
            }
        }
    }

    fn deform(
        &self,
        deformation: &PatchDeformation<'_>,
        evaluator: &CostEvaluator<'_, M>,
        buffers: &mut RunBuffers,
        window: Window,
    ) {
        let params = &self.params;
        let (width, height) = (buffers.store.width(), buffers.store.height());
        let nearest = NearestStrongMap::build(
            &buffers.states,
            width,
            height,
            params.weak_radius,
            params.weak_increment,
            self.device,
        );
        let report = {
            let input = deformation_input(&buffers.store, &buffers.states, &nearest);
            deformation.recover(&input, &mut buffers.random)
        };

        {
            let (planes, _) = buffers.store.front_mut();
            for (idx, fitted) in report.fitted.iter().enumerate() {
                let is_weak = buffers.states[idx] == PixelState::Weak;
                buffers.reliable[idx] = is_weak && fitted.is_some();
                if let Some(plane) = fitted {
                    planes[idx] = *plane;
                }
            }
        }
        self.rescore(evaluator, buffers, window, Some(report.fitted.as_slice()));
        buffers.store.set_fitted(report.fitted);
    }

    /// Copies the buffers into the output maps. Pixels whose depth left the
    /// valid range are written as UNKNOWN with depth 0.
    fn finalize(&self, buffers: &RunBuffers) -> ApdResult<ProblemOutput> {
        let camera = &self.scene.camera;
        let width = buffers.store.width();
        let height = buffers.store.height();
        let planes = buffers.store.planes();

        let mut depth = Vec::with_capacity(planes.len());
        let mut normals = Vec::with_capacity(planes.len());
        let mut states = Vec::with_capacity(planes.len());
        for (plane, &state) in planes.iter().zip(&buffers.states) {
            if camera.depth_in_range(plane.depth) {
                depth.push(plane.depth);
                states.push(state);
            } else {
                depth.push(0.0);
                states.push(PixelState::Unknown);
            }
            normals.push([plane.normal.x, plane.normal.y, plane.normal.z]);
        }

        let output = ProblemOutput {
            depth: OwnedImage::new(depth, width, height)?,
            normals: OwnedImage::new(normals, width, height)?,
            states: OwnedImage::new(states, width, height)?,
            selected_views: OwnedImage::new(buffers.selector.selected().to_vec(), width, height)?,
        };
        trace_event!(
            "problem_done",
            problem = self.problem,
            unknown = output
                .states
                .data()
                .iter()
                .filter(|&&s| s == PixelState::Unknown)
                .count()
        );
        Ok(output)
    }
}
