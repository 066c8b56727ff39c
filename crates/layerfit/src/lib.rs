//! layerfit: segmentation-driven piecewise-surface reconstruction.
//!
//! Every segment of a fixed image segmentation is assigned to a *layer*, and
//! every layer carries one robustly fitted depth surface. The stages are:
//!
//! 1. **Setup** – register feature sources ([`Ied`]) and surface types
//!    ([`SurfaceType`]) on a [`LayersBuilder`].
//! 2. **Commit** – cache per-segment samples and fit one surface per segment
//!    (RANSAC and/or prune refinement, capped Blake–Zisserman scoring).
//! 3. **Search** – improve the partition with [`LayerMerge`] (agglomerative)
//!    and [`LayerGrow`] (boundary reassignment), guided by a [`LayerScore`].
//! 4. **Extract** – depth, disparity, layer, surface and validity maps.
//!
//! Fits are memoized per segment set, so repeated queries for the same set
//! return the same shared surface.

pub mod config;
mod error;
mod field;
pub mod ied;
mod layers;
pub mod score;
mod search;
pub mod surface;
pub mod synth;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{FitConfig, FitMethod, GrowConfig, MergeConfig, PipelineConfig, WarpScoreConfig};
pub use error::LayersError;
pub use field::Field;
pub use ied::{DisparityIed, FeatureStore, Ied, NeedleIed};
pub use layers::{
    internal_coord, FitProgress, FitResult, LayerSummary, Layers, LayersBuilder, LayersReport,
    SegmentSet, FAILED_FIT_COST,
};
pub use score::{LayerScore, OutlierScore, WarpAccumulator, WarpScore};
pub use search::{GrowReport, LayerGrow, LayerMerge, MergeReport, SegmentAdjacency};
pub use surface::{
    FeatureKind, FrontalSurface, FrontalSurfaceType, PlaneSurface, PlaneSurfaceType,
    SphereSurface, SphereSurfaceType, Surface, SurfaceRef, SurfaceType,
};
