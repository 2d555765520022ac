#![cfg(feature = "image-io")]

mod common;

use apdmvs::io::{format_camera, load_output, read_ply};
use apdmvs::pipeline::planned_rounds;
use apdmvs::{Camera, FusionConfig, Pipeline, PipelineConfig, RunParameters};
use common::scratch_dir;
use nalgebra::{Matrix3, Vector3};
use std::fs;
use std::path::Path;

const WIDTH: usize = 32;
const FOCAL: f32 = 40.0;
const WALL_DEPTH: f32 = 2.0;
const BASELINE: f32 = 0.1;

fn camera(index: usize) -> Camera {
    let c = (WIDTH as f32 - 1.0) / 2.0;
    let k = Matrix3::new(FOCAL, 0.0, c, 0.0, FOCAL, c, 0.0, 0.0, 1.0);
    let centre_x = index as f32 * BASELINE;
    Camera::new(
        k,
        Matrix3::identity(),
        Vector3::new(-centre_x, 0.0, 0.0),
        WIDTH,
        WIDTH,
        1.0,
        3.0,
    )
    .unwrap()
}

/// Texture painted on the wall `z = WALL_DEPTH`.
fn wall_texture(x: f32, y: f32) -> f32 {
    let v = 128.0 + 50.0 * (9.0 * x).sin() * (7.0 * y).cos() + 30.0 * (23.0 * x + 11.0 * y).sin();
    v.clamp(0.0, 255.0)
}

/// Writes `images/`, `cams/` and `pair.txt` for three cameras watching one wall.
fn write_dense_folder(root: &Path) {
    fs::create_dir_all(root.join("images")).unwrap();
    fs::create_dir_all(root.join("cams")).unwrap();

    for index in 0..3usize {
        let cam = camera(index);
        let img = image::GrayImage::from_fn(WIDTH as u32, WIDTH as u32, |u, v| {
            let world = cam.backproject(u as f32, v as f32, WALL_DEPTH);
            image::Luma([wall_texture(world.x, world.y) as u8])
        });
        img.save(root.join("images").join(format!("{index:08}.png")))
            .unwrap();
        fs::write(
            root.join("cams").join(format!("{index:08}_cam.txt")),
            format_camera(&cam),
        )
        .unwrap();
    }

    fs::write(
        root.join("pair.txt"),
        "3\n0\n2 1 10.0 2 5.0\n1\n2 0 10.0 2 10.0\n2\n2 1 10.0 0 5.0\n",
    )
    .unwrap();
}

fn config(keep_intermediate: bool) -> PipelineConfig {
    PipelineConfig {
        max_image_size: 16,
        refine_steps: 1,
        keep_intermediate,
        save_previews: keep_intermediate,
        fusion: FusionConfig {
            min_consistent_views: 1,
            ..FusionConfig::default()
        },
        params: RunParameters {
            max_iterations: 2,
            num_images: 2,
            top_k: 2,
            patch_radius: 2,
            patch_step: 1,
            strong_radius: 2,
            strong_increment: 1,
            strong_steps: 2,
            arm_length: 6,
            ..RunParameters::default()
        },
        ..PipelineConfig::default()
    }
}

#[test]
fn pipeline_runs_all_rounds_and_writes_the_cloud() {
    let root = scratch_dir("pipeline-keep");
    write_dense_folder(&root);

    let pipeline = Pipeline::new(&root, config(true)).unwrap();
    assert_eq!(planned_rounds(pipeline.folder(), pipeline.config()).unwrap(), 2);

    let report = pipeline.run().unwrap();
    assert_eq!(report.problems, 3);
    assert_eq!(report.rounds, 2);
    assert_eq!(report.steps, 4);
    assert_eq!(report.ply_path, root.join("APD").join("APD.ply"));

    let cloud = read_ply(&report.ply_path).unwrap();
    assert_eq!(cloud.len(), report.points);

    for id in 0..3u32 {
        let folder = pipeline.folder().problem_folder(id);
        let output = load_output(&folder).unwrap();
        assert_eq!(output.depth.dims(), (WIDTH, WIDTH));
        assert!(folder.join("3_depth.png").exists());
    }
}

#[test]
fn intermediate_maps_are_removed_after_fusion() {
    let root = scratch_dir("pipeline-clean");
    write_dense_folder(&root);

    let pipeline = Pipeline::new(&root, config(false)).unwrap();
    let report = pipeline.run().unwrap();
    assert!(report.ply_path.exists());

    for id in 0..3u32 {
        let folder = pipeline.folder().problem_folder(id);
        assert!(load_output(&folder).is_err());
    }
}

#[test]
fn missing_camera_file_fails_the_run() {
    let root = scratch_dir("pipeline-missing-cam");
    write_dense_folder(&root);
    fs::remove_file(root.join("cams").join("00000002_cam.txt")).unwrap();

    let pipeline = Pipeline::new(&root, config(false)).unwrap();
    let err = pipeline.run().unwrap_err();
    assert!(!err.is_configuration());
}
