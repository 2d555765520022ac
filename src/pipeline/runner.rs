use super::{round_count, schedule, PipelineConfig, ScheduleStep};
use crate::camera::Camera;
use crate::cost::{Scene, SourceView};
use crate::engine::PatchMatchEngine;
use crate::fusion::{FusionEngine, FusionView};
use crate::image::io::{image_dimensions, load_gray_f32, load_rgb};
use crate::image::pyramid::{downsample_pow2, resample_nearest};
use crate::image::OwnedImage;
use crate::io::{load_depth, load_output, read_camera, read_pairing_list, remove_output};
use crate::io::{preview::save_previews, save_output, write_ply};
use crate::problem::Problem;
use crate::trace::{trace_event, trace_span};
use crate::util::{ApdError, ApdResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Paths inside a dense reconstruction folder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DenseFolder {
    root: PathBuf,
}

impl DenseFolder {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pair_path(&self) -> PathBuf {
        self.root.join("pair.txt")
    }

    /// `images/<id>.jpg`, or `.png` when only that exists.
    pub fn image_path(&self, id: u32) -> PathBuf {
        let jpg = self.root.join("images").join(format!("{id:08}.jpg"));
        if jpg.exists() {
            return jpg;
        }
        let png = jpg.with_extension("png");
        if png.exists() {
            png
        } else {
            jpg
        }
    }

    pub fn camera_path(&self, id: u32) -> PathBuf {
        self.root.join("cams").join(format!("{id:08}_cam.txt"))
    }

    pub fn output_root(&self) -> PathBuf {
        self.root.join("APD")
    }

    pub fn problem_folder(&self, id: u32) -> PathBuf {
        self.output_root().join(format!("{id:08}"))
    }

    pub fn ply_path(&self) -> PathBuf {
        self.output_root().join("APD.ply")
    }
}

/// Summary of a finished run.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineReport {
    pub problems: usize,
    pub rounds: usize,
    pub steps: usize,
    pub points: usize,
    pub ply_path: PathBuf,
}

/// Full-resolution grayscale image and camera of one image id.
struct InputImage {
    gray: OwnedImage<f32>,
    camera: Camera,
}

/// Images and cameras at one scale.
struct ScaledImages {
    scale: u32,
    images: BTreeMap<u32, InputImage>,
}

/// Runs every round over all problems of a dense folder, then fuses.
pub struct Pipeline {
    folder: DenseFolder,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new<P: Into<PathBuf>>(dense_folder: P, config: PipelineConfig) -> ApdResult<Self> {
        config.validate()?;
        Ok(Self {
            folder: DenseFolder::new(dense_folder),
            config,
        })
    }

    pub fn folder(&self) -> &DenseFolder {
        &self.folder
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Reads the pairing list; an empty list is a [`ApdError::NoProblems`].
    pub fn problems(&self) -> ApdResult<Vec<Problem>> {
        let pair = self.folder.pair_path();
        let mut problems = read_pairing_list(&pair, self.folder.output_root())?;
        if problems.is_empty() {
            return Err(ApdError::NoProblems {
                path: pair.display().to_string(),
            });
        }
        for problem in &mut problems {
            problem.params = self.config.params.clone();
        }
        Ok(problems)
    }

    pub fn run(&self) -> ApdResult<PipelineReport> {
        let mut problems = self.problems()?;
        trace_event!("problems_loaded", problems = problems.len());

        let inputs = self.load_inputs(&problems)?;
        let first = problems[0].ref_image_id;
        let max_side = inputs
            .get(&first)
            .map(|img| img.gray.width().max(img.gray.height()))
            .unwrap_or(0);
        let rounds = round_count(max_side, self.config.max_image_size);
        let steps = schedule(&self.config.params, rounds, self.config.refine_steps);
        trace_event!("schedule", rounds = rounds, steps = steps.len());

        let mut scaled: Option<ScaledImages> = None;
        for step in &steps {
            let _span = trace_span!(
                "pipeline_round",
                round = step.round,
                step = step.step,
                scale = step.scale
            )
            .entered();
            if scaled.as_ref().map(|s| s.scale) != Some(step.scale) {
                scaled = Some(scale_inputs(&inputs, step.scale)?);
            }
            let Some(images) = scaled.as_ref() else {
                continue;
            };
            for problem in &mut problems {
                problem.scale = step.scale;
                problem.params = step.params.clone();
                self.run_problem(problem, step, images)?;
            }
        }

        let points = self.fuse(&problems, &inputs)?;
        let ply_path = self.folder.ply_path();
        write_ply(&ply_path, &points)?;

        if !self.config.keep_intermediate {
            for problem in &problems {
                remove_output(&problem.result_folder)?;
            }
        }

        Ok(PipelineReport {
            problems: problems.len(),
            rounds,
            steps: steps.len(),
            points: points.len(),
            ply_path,
        })
    }

    fn load_inputs(&self, problems: &[Problem]) -> ApdResult<BTreeMap<u32, InputImage>> {
        let mut inputs = BTreeMap::new();
        let ids = problems
            .iter()
            .flat_map(|p| std::iter::once(p.ref_image_id).chain(p.active_sources().iter().copied()));
        for id in ids {
            if inputs.contains_key(&id) {
                continue;
            }
            let gray = load_gray_f32(self.folder.image_path(id))?;
            let camera = read_camera(self.folder.camera_path(id), gray.width(), gray.height())?;
            inputs.insert(id, InputImage { gray, camera });
        }
        Ok(inputs)
    }

    fn run_problem(
        &self,
        problem: &Problem,
        step: &ScheduleStep,
        images: &ScaledImages,
    ) -> ApdResult<()> {
        let params = &problem.params;
        let lookup = |id: u32| {
            images
                .images
                .get(&id)
                .ok_or_else(|| ApdError::config(format!("image {id} was not loaded")))
        };

        let reference = lookup(problem.ref_image_id)?;
        let mut sources = Vec::with_capacity(problem.active_sources().len());
        for &id in problem.active_sources() {
            let src = lookup(id)?;
            let prior_depth = if params.geom_consistency {
                self.source_depth(id, src.gray.width(), src.gray.height())
            } else {
                None
            };
            sources.push(SourceView {
                image_id: id,
                image: src.gray.clone(),
                camera: src.camera.clone(),
                prior_depth,
            });
        }
        let scene = Scene::new(
            problem.ref_image_id,
            reference.gray.clone(),
            reference.camera.clone(),
            sources,
        )?;

        let mut engine = PatchMatchEngine::new(scene, params.clone())?
            .with_device(self.config.device)
            .with_problem_index(problem.index);
        if params.state.seeds_from_prior() {
            engine = engine.with_prior(load_output(&problem.result_folder)?.prior()?);
        }
        let output = engine.run()?;

        save_output(&problem.result_folder, &output)?;
        if self.config.save_previews {
            save_previews(
                &problem.result_folder,
                &format!("{}_", step.index),
                &output,
            )?;
        }
        trace_event!(
            "problem_saved",
            problem = problem.index,
            reference = problem.ref_image_id
        );
        Ok(())
    }

    /// Latest persisted depth of a source image at the working size, if any.
    fn source_depth(&self, id: u32, width: usize, height: usize) -> Option<OwnedImage<f32>> {
        let depth = load_depth(self.folder.problem_folder(id)).ok()?;
        resample_nearest(&depth, width, height).ok()
    }

    fn fuse(
        &self,
        problems: &[Problem],
        inputs: &BTreeMap<u32, InputImage>,
    ) -> ApdResult<Vec<crate::fusion::PointRecord>> {
        let mut views = Vec::with_capacity(problems.len());
        for problem in problems {
            let id = problem.ref_image_id;
            let input = inputs
                .get(&id)
                .ok_or_else(|| ApdError::config(format!("image {id} was not loaded")))?;
            let output = load_output(&problem.result_folder)?;
            let color = load_rgb(self.folder.image_path(id))?;
            let (width, height) = color.dims();
            let camera = if output.depth.dims() == (width, height) {
                input.camera.clone()
            } else {
                let scale = width as f32 / output.width() as f32;
                input.camera.scaled(scale, output.width(), output.height())?
            };
            let color = resample_nearest(&color, output.width(), output.height())?;
            views.push(FusionView::new(
                id,
                camera,
                output,
                color,
                problem.active_sources().to_vec(),
            )?);
        }
        FusionEngine::new(self.config.fusion).fuse(&views)
    }
}

fn scale_inputs(inputs: &BTreeMap<u32, InputImage>, scale: u32) -> ApdResult<ScaledImages> {
    let mut images = BTreeMap::new();
    for (&id, input) in inputs {
        let gray = downsample_pow2(&input.gray, scale)?;
        let camera = input
            .camera
            .scaled(scale as f32, gray.width(), gray.height())?;
        images.insert(id, InputImage { gray, camera });
    }
    Ok(ScaledImages { scale, images })
}

/// Reads only the image header of the first reference; used to report the
/// round count without loading pixels.
pub fn planned_rounds(folder: &DenseFolder, config: &PipelineConfig) -> ApdResult<usize> {
    let pair = folder.pair_path();
    let problems = read_pairing_list(&pair, folder.output_root())?;
    let first = problems.first().ok_or_else(|| ApdError::NoProblems {
        path: pair.display().to_string(),
    })?;
    let (w, h) = image_dimensions(folder.image_path(first.ref_image_id))?;
    Ok(round_count(w.max(h), config.max_image_size))
}
