//! apdmvs is a CPU multi-view stereo library built around PatchMatch with
//! adaptive patch deformation.
//!
//! Per reference image, [`PatchMatchEngine`] estimates a plane (depth and
//! normal) for every pixel by checkerboard propagation with per-pixel view
//! selection, classifies pixels as STRONG/WEAK/UNKNOWN, and recovers WEAK
//! pixels by fitting planes to surrounding STRONG structure. The
//! [`FusionEngine`] merges the per-image maps into a colored point cloud,
//! and the `pipeline` module (feature `image-io`) drives coarse-to-fine
//! rounds over a dense folder. Per-pixel work runs on a rayon pool with the
//! `rayon` feature.

mod trace;

pub mod camera;
pub mod classify;
pub mod cost;
pub mod deform;
pub mod device;
pub mod engine;
pub mod fusion;
pub mod hypothesis;
pub mod image;
pub mod io;
pub mod lowlevel;
pub mod pipeline;
pub mod problem;
pub mod propagate;
pub mod util;
pub mod views;

pub use camera::Camera;
pub use classify::{PixelState, StateCounts};
pub use cost::{BilateralNcc, MatchingCost, Scene, SourceView};
pub use device::Device;
pub use engine::{EngineObserver, EngineSnapshot, NoopObserver, PatchMatchEngine, ProblemOutput};
pub use fusion::{FusionConfig, FusionEngine, FusionView, PointRecord};
pub use hypothesis::{PlaneHypothesis, PriorEstimate};
pub use image::{ImageView, OwnedImage};
pub use pipeline::{round_count, schedule, PipelineConfig, ScheduleStep};
#[cfg(feature = "image-io")]
pub use pipeline::{DenseFolder, Pipeline, PipelineReport};
pub use problem::{Problem, RunParameters, RunState, MAX_SOURCE_IMAGES};
pub use propagate::Phase;
pub use util::{ApdError, ApdResult};
