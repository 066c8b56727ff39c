//! Tunable parameters for fitting, scoring and the search heuristics.
//!
//! Every iteration cap of the engine lives here as plain data so it can be
//! inspected, serialized and overridden.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::LayersError;

/// Strategy used to obtain the initial surface before prune refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMethod {
    /// Fit all samples, then repeatedly refit on the inliers.
    #[default]
    Prune,
    /// Random minimal-sample consensus, followed by prune refinement.
    Ransac,
}

/// Robust surface fitting parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Initial fitting strategy.
    pub method: FitMethod,
    /// RANSAC is only attempted when the available information is at least
    /// this many times the degrees of freedom of the surface type.
    pub ransac_scale: usize,
    /// Maximum number of inlier refits (the all-data fallback counts as one).
    pub max_prune_iters: usize,
    /// Target success probability of the adaptive RANSAC bound.
    pub ransac_prob: f64,
    /// Hard cap on RANSAC hypotheses per surface type.
    pub max_ransac_iters: usize,
    /// Seed of the RANSAC random number generator.
    pub seed: u64,
    /// Cost added per degree of freedom of every fitted surface.
    ///
    /// At the library default of zero, a merged fit of two noisy segments of
    /// one plane costs slightly more than the two separate fits, so merging
    /// never improves the score. [`PipelineConfig`] defaults to
    /// [`PIPELINE_MODEL_COST_PER_DEGREE`] instead.
    pub model_cost_per_degree: f32,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            method: FitMethod::Prune,
            ransac_scale: 8,
            max_prune_iters: 64,
            ransac_prob: 0.99,
            max_ransac_iters: 10_000,
            seed: 42,
            model_cost_per_degree: 0.0,
        }
    }
}

impl FitConfig {
    pub(crate) fn validate(&self) -> Result<(), LayersError> {
        if !(self.ransac_prob > 0.0 && self.ransac_prob < 1.0) {
            return Err(LayersError::InvalidParameter {
                name: "ransac_prob",
                value: self.ransac_prob,
            });
        }
        if !(self.model_cost_per_degree >= 0.0) {
            return Err(LayersError::InvalidParameter {
                name: "model_cost_per_degree",
                value: self.model_cost_per_degree as f64,
            });
        }
        Ok(())
    }
}

/// Agglomerative merge parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// A merge is applied only when its score delta is below this value.
    /// Must not be positive.
    pub bias: f32,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self { bias: 0.0 }
    }
}

impl MergeConfig {
    pub(crate) fn validate(&self) -> Result<(), LayersError> {
        if !(self.bias <= 0.0) {
            return Err(LayersError::InvalidParameter {
                name: "bias",
                value: self.bias as f64,
            });
        }
        Ok(())
    }
}

/// Boundary grow/shrink parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowConfig {
    /// Maximum number of reassignment passes.
    pub max_passes: usize,
}

impl Default for GrowConfig {
    fn default() -> Self {
        Self { max_passes: 32 }
    }
}

/// Re-projection score parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarpScoreConfig {
    /// Cost of one occlusion, relative to colour differences in `[0, 1]`.
    pub occlusion_cost: f32,
    /// Multiplier converting homogeneous depth to disparity.
    pub disparity_mult: f32,
}

impl Default for WarpScoreConfig {
    fn default() -> Self {
        Self {
            occlusion_cost: 20.0 / 255.0,
            disparity_mult: 1.0,
        }
    }
}

/// Per-degree model cost of [`PipelineConfig`]. Large enough that segments
/// of one plane merge under sub-percent disparity noise.
pub const PIPELINE_MODEL_COST_PER_DEGREE: f32 = 0.01;

/// End-to-end reconstruction settings, as loaded by the CLI.
///
/// Fields missing from the `fit` section take the pipeline defaults, so
/// `model_cost_per_degree` stays at [`PIPELINE_MODEL_COST_PER_DEGREE`]
/// unless set explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    #[serde(deserialize_with = "deserialize_pipeline_fit")]
    pub fit: FitConfig,
    /// Outlier cutoff applied to every feature source.
    pub outlier_dist: f32,
    pub merge: MergeConfig,
    pub grow: GrowConfig,
    /// Run agglomerative merging after commit.
    pub run_merge: bool,
    /// Run boundary grow/shrink after merging.
    pub run_grow: bool,
}

impl PipelineConfig {
    fn default_fit() -> FitConfig {
        FitConfig {
            model_cost_per_degree: PIPELINE_MODEL_COST_PER_DEGREE,
            ..FitConfig::default()
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fit: Self::default_fit(),
            outlier_dist: 1.0,
            merge: MergeConfig::default(),
            grow: GrowConfig::default(),
            run_merge: true,
            run_grow: true,
        }
    }
}

/// `fit` section of a pipeline file.
#[derive(Deserialize)]
struct FitConfigPatch {
    method: Option<FitMethod>,
    ransac_scale: Option<usize>,
    max_prune_iters: Option<usize>,
    ransac_prob: Option<f64>,
    max_ransac_iters: Option<usize>,
    seed: Option<u64>,
    model_cost_per_degree: Option<f32>,
}

fn deserialize_pipeline_fit<'de, D: Deserializer<'de>>(d: D) -> Result<FitConfig, D::Error> {
    let patch = FitConfigPatch::deserialize(d)?;
    let base = PipelineConfig::default_fit();
    Ok(FitConfig {
        method: patch.method.unwrap_or(base.method),
        ransac_scale: patch.ransac_scale.unwrap_or(base.ransac_scale),
        max_prune_iters: patch.max_prune_iters.unwrap_or(base.max_prune_iters),
        ransac_prob: patch.ransac_prob.unwrap_or(base.ransac_prob),
        max_ransac_iters: patch.max_ransac_iters.unwrap_or(base.max_ransac_iters),
        seed: patch.seed.unwrap_or(base.seed),
        model_cost_per_degree: patch
            .model_cost_per_degree
            .unwrap_or(base.model_cost_per_degree),
    })
}
