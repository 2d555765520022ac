use apdmvs::lowlevel::{CostEvaluator, Window};
use apdmvs::{
    BilateralNcc, Camera, Device, FusionConfig, FusionEngine, FusionView, OwnedImage,
    PatchMatchEngine, PlaneHypothesis, RunParameters, Scene, SourceView,
};
use criterion::{criterion_group, criterion_main, Criterion};
use nalgebra::{Matrix3, Vector3};
use std::hint::black_box;

const SIZE: usize = 64;

fn make_image(size: usize, salt: usize) -> OwnedImage<f32> {
    OwnedImage::from_fn(size, size, |x, y| {
        (((x * 13 + salt) ^ (y * 7) ^ (x * y)) & 0xFF) as f32
    })
    .unwrap()
}

fn camera(centre_x: f32) -> Camera {
    let c = (SIZE as f32 - 1.0) / 2.0;
    let k = Matrix3::new(80.0, 0.0, c, 0.0, 80.0, c, 0.0, 0.0, 1.0);
    Camera::new(
        k,
        Matrix3::identity(),
        Vector3::new(-centre_x, 0.0, 0.0),
        SIZE,
        SIZE,
        1.0,
        4.0,
    )
    .unwrap()
}

fn make_scene() -> Scene {
    let sources = (1..=3u32)
        .map(|id| SourceView {
            image_id: id,
            image: make_image(SIZE, id as usize),
            camera: camera(0.05 * id as f32),
            prior_depth: None,
        })
        .collect();
    Scene::new(0, make_image(SIZE, 0), camera(0.0), sources).unwrap()
}

fn params() -> RunParameters {
    RunParameters {
        max_iterations: 1,
        num_images: 3,
        top_k: 2,
        ..RunParameters::default()
    }
}

fn bench_engine(c: &mut Criterion) {
    let scene = make_scene();

    let metric = BilateralNcc::default();
    let evaluator = CostEvaluator::new(&scene, &metric, None);
    let plane = PlaneHypothesis::new(Vector3::new(0.0, 0.0, -1.0), 2.0);
    let window = Window::new(5, 2);
    c.bench_function("view_costs_bilateral_ncc", |b| {
        b.iter(|| black_box(evaluator.view_costs(32, 32, &plane, window)));
    });

    let serial = PatchMatchEngine::new(scene.clone(), params())
        .unwrap()
        .with_device(Device::Serial);
    c.bench_function("patch_match_one_iteration_serial", |b| {
        b.iter(|| black_box(serial.run().unwrap()));
    });

    let mut apd = params();
    apd.use_apd = true;
    let deforming = PatchMatchEngine::new(scene.clone(), apd)
        .unwrap()
        .with_device(Device::Serial);
    c.bench_function("patch_match_one_iteration_apd_serial", |b| {
        b.iter(|| black_box(deforming.run().unwrap()));
    });

    if cfg!(feature = "rayon") {
        let parallel = PatchMatchEngine::new(scene.clone(), params())
            .unwrap()
            .with_device(Device::Parallel);
        c.bench_function("patch_match_one_iteration_parallel", |b| {
            b.iter(|| black_box(parallel.run().unwrap()));
        });
    }

    let output = serial.run().unwrap();
    let color = OwnedImage::filled(SIZE, SIZE, [200u8, 180, 160]).unwrap();
    let views: Vec<FusionView> = (0..3u32)
        .map(|id| {
            FusionView::new(
                id,
                camera(0.05 * id as f32),
                output.clone(),
                color.clone(),
                (0..3u32).filter(|&n| n != id).collect(),
            )
            .unwrap()
        })
        .collect();
    let fusion = FusionEngine::new(FusionConfig::default());
    c.bench_function("fusion_three_views", |b| {
        b.iter(|| black_box(fusion.fuse(&views).unwrap()));
    });
}

criterion_group!(benches, bench_engine);
criterion_main!(benches);
