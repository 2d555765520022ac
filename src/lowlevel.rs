//! Low-level building blocks for custom stereo pipelines.
//!
//! These expose the per-stage machinery the engine composes: cost
//! evaluation, view selection, propagation passes, classification and
//! deformation. Most users should prefer [`crate::PatchMatchEngine`] and
//! [`crate::FusionEngine`].

pub use crate::classify::{
    ClassifierParams, NearestStrongMap, WeakPixelClassifier, MAX_SEARCH_RADIUS,
};
pub use crate::cost::{
    reprojection_error, CostContext, CostEvaluator, ViewCosts, ViewGeometry, Window,
    GEOM_ERROR_CAP, INVALID_COST, UNTEXTURED_COST,
};
pub use crate::deform::{
    deformation_input, fit_plane_least_squares, fit_plane_ransac, DeformationInput,
    DeformationOutcome, DeformationParams, DeformationReport, PatchDeformation, PlaneFit,
    MIN_FIT_INLIERS,
};
pub use crate::hypothesis::{initialize, HypothesisStore, RandomField};
pub use crate::image::pyramid::{downsample_pow2, halve, resample_nearest};
pub use crate::propagate::{CheckerboardPropagator, NeighbourPattern};
pub use crate::views::{select_top_k, TopK, ViewRank, ViewSelector};
