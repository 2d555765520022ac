mod common;

use apdmvs::lowlevel::{ClassifierParams, CostContext, CostEvaluator, WeakPixelClassifier};
use apdmvs::{Device, MatchingCost, PatchMatchEngine, PixelState, PlaneHypothesis, StateCounts};
use common::{params, scene, SyntheticCost, SIZE};
use nalgebra::Vector3;

/// Two equally good depths, both on the classifier's probe grid.
struct TwinMinimaCost;

impl MatchingCost for TwinMinimaCost {
    fn view_cost(&self, ctx: &CostContext<'_>) -> f32 {
        let d = ctx.plane.depth;
        (d - 1.5625).abs().min((d - 2.5625).abs()) + (1.0 + ctx.plane.normal.z)
    }
}

fn fronto(depth: f32) -> PlaneHypothesis {
    PlaneHypothesis::new(Vector3::new(0.0, 0.0, -1.0), depth)
}

#[test]
fn distinct_minimum_is_strong_and_poor_fit_is_weak() {
    let scene = scene(SIZE);
    let evaluator = CostEvaluator::new(&scene, &SyntheticCost, None);
    let classifier = WeakPixelClassifier::new(
        &evaluator,
        ClassifierParams::from_params(&params(1)),
        Device::Serial,
    );

    assert_eq!(classifier.classify_pixel(8, 8, &fronto(2.0), 0b11), PixelState::Strong);
    assert_eq!(classifier.classify_pixel(8, 8, &fronto(1.2), 0b11), PixelState::Weak);
    assert_eq!(classifier.classify_pixel(8, 8, &fronto(3.5), 0b11), PixelState::Unknown);
}

#[test]
fn competing_depth_makes_pixel_weak() {
    let scene = scene(SIZE);
    let evaluator = CostEvaluator::new(&scene, &TwinMinimaCost, None);
    let classifier = WeakPixelClassifier::new(
        &evaluator,
        ClassifierParams::from_params(&params(1)),
        Device::Serial,
    );

    let state = classifier.classify_pixel(5, 9, &fronto(1.5625), 0b11);
    assert_eq!(state, PixelState::Weak);
}

#[test]
fn classification_is_deterministic() {
    let run = || {
        PatchMatchEngine::new(scene(SIZE), params(3))
            .unwrap()
            .with_metric(SyntheticCost)
            .with_device(Device::Serial)
            .run()
            .unwrap()
    };
    let first = run();
    let second = run();
    assert_eq!(first.states, second.states);

    let counts = StateCounts::from_states(first.states.data());
    assert_eq!(counts.strong + counts.weak + counts.unknown, SIZE * SIZE);
    assert!(counts.strong > 0);
}
