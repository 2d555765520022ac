use apdmvs::pipeline::planned_rounds;
use apdmvs::{Device, FusionConfig, Pipeline, PipelineConfig, PipelineReport, RunParameters};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

const SCHEMA_JSON: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/config.schema.json"));
const EXAMPLE_JSON: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/config.example.json"));

#[derive(Parser, Debug)]
#[command(author, version, about = "APD-MVS dense reconstruction (JSON config driven)")]
struct Cli {
    /// Dense folder holding pair.txt, images/ and cams/.
    #[arg(
        value_name = "DENSE_FOLDER",
        required_unless_present_any = ["print_schema", "print_example"]
    )]
    dense_folder: Option<PathBuf>,
    /// Optional JSON configuration file; defaults apply when omitted.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Worker threads (1 runs serially); defaults to all cores.
    #[arg(short = 'j', long)]
    threads: Option<usize>,
    /// Print the JSON schema and exit.
    #[arg(long)]
    print_schema: bool,
    /// Print an example config and exit.
    #[arg(long)]
    print_example: bool,
    /// Log span close timings for performance profiling.
    #[arg(long)]
    trace: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ParamsJson {
    max_iterations: usize,
    num_images: usize,
    top_k: usize,
    sigma_spatial: f32,
    sigma_color: f32,
    patch_radius: usize,
    patch_step: usize,
    perturbation: f32,
    arm_length: usize,
    strong_radius: usize,
    strong_increment: usize,
    strong_steps: usize,
    curve_samples: usize,
    strong_cost_threshold: f32,
    ambiguity_margin: f32,
    weak_radius: usize,
    weak_increment: usize,
    use_apd: bool,
    weak_peak_radius: usize,
    rotate_time: usize,
    ransac_threshold: f32,
    ransac_iterations: usize,
    min_inlier_ratio: f32,
    geom_factor: f32,
    classify_each_iteration: bool,
    seed: u64,
}

impl Default for ParamsJson {
    fn default() -> Self {
        let p = RunParameters::default();
        Self {
            max_iterations: p.max_iterations,
            num_images: p.num_images,
            top_k: p.top_k,
            sigma_spatial: p.sigma_spatial,
            sigma_color: p.sigma_color,
            patch_radius: p.patch_radius,
            patch_step: p.patch_step,
            perturbation: p.perturbation,
            arm_length: p.arm_length,
            strong_radius: p.strong_radius,
            strong_increment: p.strong_increment,
            strong_steps: p.strong_steps,
            curve_samples: p.curve_samples,
            strong_cost_threshold: p.strong_cost_threshold,
            ambiguity_margin: p.ambiguity_margin,
            weak_radius: p.weak_radius,
            weak_increment: p.weak_increment,
            use_apd: p.use_apd,
            weak_peak_radius: p.weak_peak_radius,
            rotate_time: p.rotate_time,
            ransac_threshold: p.ransac_threshold,
            ransac_iterations: p.ransac_iterations,
            min_inlier_ratio: p.min_inlier_ratio,
            geom_factor: p.geom_factor,
            classify_each_iteration: p.classify_each_iteration,
            seed: p.seed,
        }
    }
}

impl From<ParamsJson> for RunParameters {
    fn from(p: ParamsJson) -> Self {
        RunParameters {
            max_iterations: p.max_iterations,
            num_images: p.num_images,
            top_k: p.top_k,
            sigma_spatial: p.sigma_spatial,
            sigma_color: p.sigma_color,
            patch_radius: p.patch_radius,
            patch_step: p.patch_step,
            perturbation: p.perturbation,
            arm_length: p.arm_length,
            strong_radius: p.strong_radius,
            strong_increment: p.strong_increment,
            strong_steps: p.strong_steps,
            curve_samples: p.curve_samples,
            strong_cost_threshold: p.strong_cost_threshold,
            ambiguity_margin: p.ambiguity_margin,
            weak_radius: p.weak_radius,
            weak_increment: p.weak_increment,
            use_apd: p.use_apd,
            weak_peak_radius: p.weak_peak_radius,
            rotate_time: p.rotate_time,
            ransac_threshold: p.ransac_threshold,
            ransac_iterations: p.ransac_iterations,
            min_inlier_ratio: p.min_inlier_ratio,
            geom_factor: p.geom_factor,
            classify_each_iteration: p.classify_each_iteration,
            seed: p.seed,
            ..RunParameters::default()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct FusionJson {
    max_reprojection_error: f32,
    max_relative_depth_diff: f32,
    max_normal_angle_deg: f32,
    min_consistent_views: usize,
}

impl Default for FusionJson {
    fn default() -> Self {
        let cfg = FusionConfig::default();
        Self {
            max_reprojection_error: cfg.max_reprojection_error,
            max_relative_depth_diff: cfg.max_relative_depth_diff,
            max_normal_angle_deg: cfg.max_normal_angle_deg,
            min_consistent_views: cfg.min_consistent_views,
        }
    }
}

impl From<FusionJson> for FusionConfig {
    fn from(f: FusionJson) -> Self {
        FusionConfig {
            max_reprojection_error: f.max_reprojection_error,
            max_relative_depth_diff: f.max_relative_depth_diff,
            max_normal_angle_deg: f.max_normal_angle_deg,
            min_consistent_views: f.min_consistent_views,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct Config {
    max_image_size: usize,
    refine_steps: usize,
    keep_intermediate: bool,
    save_previews: bool,
    report_path: Option<String>,
    params: ParamsJson,
    fusion: FusionJson,
}

impl Default for Config {
    fn default() -> Self {
        let cfg = PipelineConfig::default();
        Self {
            max_image_size: cfg.max_image_size,
            refine_steps: cfg.refine_steps,
            keep_intermediate: cfg.keep_intermediate,
            save_previews: cfg.save_previews,
            report_path: None,
            params: ParamsJson::default(),
            fusion: FusionJson::default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ReportRecord {
    problems: usize,
    rounds: usize,
    steps: usize,
    points: usize,
    ply_path: String,
}

impl From<PipelineReport> for ReportRecord {
    fn from(value: PipelineReport) -> Self {
        Self {
            problems: value.problems,
            rounds: value.rounds,
            steps: value.steps,
            points: value.points,
            ply_path: value.ply_path.display().to_string(),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.print_schema {
        println!("{SCHEMA_JSON}");
        return Ok(());
    }
    if cli.print_example {
        println!("{EXAMPLE_JSON}");
        return Ok(());
    }

    let span_events = if cli.trace {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("apdmvs=info".parse()?))
        .with_span_events(span_events)
        .with_target(false)
        .init();

    let dense_folder = cli.dense_folder.ok_or("a dense folder is required")?;
    if !dense_folder.is_dir() {
        return Err(format!("dense folder {} not found", dense_folder.display()).into());
    }

    let config: Config = match &cli.config {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => Config::default(),
    };
    let device = Device::select(cli.threads)?;
    let report_path = config.report_path.clone();
    let pipeline_config = PipelineConfig {
        max_image_size: config.max_image_size,
        refine_steps: config.refine_steps,
        keep_intermediate: config.keep_intermediate,
        save_previews: config.save_previews,
        fusion: config.fusion.into(),
        params: config.params.into(),
        device,
    };

    let pipeline = Pipeline::new(&dense_folder, pipeline_config)?;
    let rounds = planned_rounds(pipeline.folder(), pipeline.config())?;
    tracing::info!(rounds, parallel = device.is_parallel(), "starting reconstruction");

    let report = pipeline.run()?;
    tracing::info!(points = report.points, "point cloud written");
    let json = serde_json::to_string_pretty(&ReportRecord::from(report))?;

    match report_path {
        Some(path) => fs::write(path, json)?,
        None => println!("{json}"),
    }

    Ok(())
}
