#![cfg(feature = "rayon")]

mod common;

use apdmvs::{Device, PatchMatchEngine};
use common::{params, scene, SIZE};

#[test]
fn parallel_matches_serial_with_deformation() {
    let mut run = params(2);
    run.use_apd = true;
    run.weak_peak_radius = 2;

    let serial = PatchMatchEngine::new(scene(SIZE), run.clone())
        .unwrap()
        .with_device(Device::Serial)
        .run()
        .unwrap();
    let parallel = PatchMatchEngine::new(scene(SIZE), run)
        .unwrap()
        .with_device(Device::Parallel)
        .run()
        .unwrap();

    assert_eq!(serial.depth, parallel.depth);
    assert_eq!(serial.normals, parallel.normals);
    assert_eq!(serial.states, parallel.states);
    assert_eq!(serial.selected_views, parallel.selected_views);
}
