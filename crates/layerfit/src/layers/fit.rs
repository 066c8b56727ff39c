//! Robust fit of one segment set: optional RANSAC, prune refinement and
//! capped scoring, run per surface type with the cheapest result kept.

use serde::Serialize;

use crate::config::{FitConfig, FitMethod};
use crate::ied::Ied;
use crate::surface::{Fitter, Surface, SurfaceRef, SurfaceType};

use super::samples::{SampleBlock, SampleTable};
use super::segment_set::SegmentSet;

/// Cost recorded for a segment set no surface type could fit.
pub const FAILED_FIT_COST: f32 = 1e10;

pub(crate) struct SourceEntry {
    pub ied: Box<dyn Ied>,
    pub cutoff: f32,
}

pub(crate) struct TypeEntry {
    pub surface_type: Box<dyn SurfaceType>,
    pub weight: f32,
}

/// Best surface for a segment set and its cost.
#[derive(Debug, Clone)]
pub struct FitResult {
    /// `None` when every surface type was skipped or failed.
    pub surface: Option<SurfaceRef>,
    /// Registration index of the surface type that produced `surface`.
    pub surface_type: Option<usize>,
    pub cost: f32,
}

impl FitResult {
    pub(crate) fn failed() -> Self {
        Self {
            surface: None,
            surface_type: None,
            cost: FAILED_FIT_COST,
        }
    }

    /// Result cached for the empty set.
    pub(crate) fn empty() -> Self {
        Self {
            surface: None,
            surface_type: None,
            cost: 0.0,
        }
    }
}

/// Monotonic counters of fitting work, pollable during long runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FitProgress {
    /// Segment sets fitted (cache misses).
    pub fits: u64,
    /// Fitter extraction attempts across all fits.
    pub extractions: u64,
}

// ── Sample pool ────────────────────────────────────────────────────────────

struct PoolPart<'a> {
    type_index: usize,
    ied: &'a dyn Ied,
    cutoff: f32,
    block: &'a SampleBlock,
}

/// Samples of every consumable source over every segment of a set,
/// addressable by one flat index.
struct Pool<'a> {
    parts: Vec<PoolPart<'a>>,
    ends: Vec<usize>,
}

impl<'a> Pool<'a> {
    fn new(parts: Vec<PoolPart<'a>>) -> Self {
        let mut ends = Vec::with_capacity(parts.len());
        let mut acc = 0;
        for p in &parts {
            acc += p.block.len();
            ends.push(acc);
        }
        Self { parts, ends }
    }

    fn total(&self) -> usize {
        self.ends.last().copied().unwrap_or(0)
    }

    fn locate(&self, index: usize) -> (&PoolPart<'a>, usize) {
        let p = self.ends.partition_point(|&e| e <= index);
        let start = if p == 0 { 0 } else { self.ends[p - 1] };
        (&self.parts[p], index - start)
    }

    fn iter(&self) -> impl Iterator<Item = (&PoolPart<'a>, [f32; 2], &[f32])> + '_ {
        self.parts
            .iter()
            .flat_map(|part| part.block.iter().map(move |(xy, f)| (part, xy, f)))
    }

    fn feed_all(&self, fitter: &mut dyn Fitter) {
        for (part, xy, f) in self.iter() {
            fitter.add(part.type_index, xy[0], xy[1], f);
        }
    }

    /// Feed samples whose cost against `surface` is under their cutoff.
    fn feed_inliers(&self, surface: &dyn Surface, fitter: &mut dyn Fitter) -> usize {
        let mut fed = 0;
        for (part, xy, f) in self.iter() {
            if part.ied.fit_cost(f, surface, xy[0], xy[1]) < part.cutoff {
                fitter.add(part.type_index, xy[0], xy[1], f);
                fed += 1;
            }
        }
        fed
    }

    fn count_inliers(&self, surface: &dyn Surface) -> usize {
        self.iter()
            .filter(|(part, xy, f)| part.ied.fit_cost(f, surface, xy[0], xy[1]) < part.cutoff)
            .count()
    }

    /// Capped Blake–Zisserman cost, shifted so a perfect sample costs 0.
    fn score(&self, surface: &dyn Surface) -> f64 {
        let mut sum = 0.0f64;
        for part in &self.parts {
            let c2 = (part.cutoff as f64).powi(2);
            let floor = (-c2).exp();
            let shift = (1.0 + floor).ln();
            for (xy, f) in part.block.iter() {
                let d = part.ied.fit_cost(f, surface, xy[0], xy[1]) as f64;
                sum += shift - ((-d * d).exp() + floor).ln();
            }
        }
        sum
    }
}

/// Adaptive RANSAC bound `⌈ln(1−p) / ln(1−wᵏ)⌉`.
pub(crate) fn ransac_bound(prob: f64, inlier_ratio: f64, k: usize) -> f64 {
    let wk = inlier_ratio.powi(k as i32);
    if wk >= 1.0 {
        return 0.0;
    }
    let denom = (-wk).ln_1p();
    if denom >= 0.0 {
        return f64::INFINITY;
    }
    ((1.0 - prob).ln() / denom).ceil()
}

// ── Pipeline ───────────────────────────────────────────────────────────────

pub(crate) struct FitPipeline<'a> {
    pub sources: &'a [SourceEntry],
    pub types: &'a [TypeEntry],
    pub samples: &'a SampleTable,
    pub config: &'a FitConfig,
    pub progress: &'a mut FitProgress,
}

impl FitPipeline<'_> {
    /// Fit every surface type to `set` and keep the cheapest.
    pub fn fit(&mut self, set: &SegmentSet) -> FitResult {
        self.progress.fits += 1;
        let mut best = FitResult::failed();
        for ti in 0..self.types.len() {
            let Some((surface, cost)) = self.fit_type(ti, set) else {
                continue;
            };
            if best.surface.is_none() || cost < best.cost {
                best = FitResult {
                    surface: Some(SurfaceRef::from(surface)),
                    surface_type: Some(ti),
                    cost,
                };
            }
        }
        best
    }

    fn fit_type(&mut self, ti: usize, set: &SegmentSet) -> Option<(Box<dyn Surface>, f32)> {
        let sources = self.sources;
        let samples = self.samples;
        let types = self.types;
        let entry = &types[ti];
        let st = entry.surface_type.as_ref();
        let degrees = st.degrees();

        let mut parts = Vec::new();
        let mut info = 0usize;
        for (si, src) in sources.iter().enumerate() {
            let Some(type_index) = st.supports(src.ied.kind()) else {
                continue;
            };
            for seg in set.iter() {
                let block = samples.block(si, seg);
                if block.len() == 0 {
                    continue;
                }
                info += st.type_degrees(type_index) * block.len();
                parts.push(PoolPart {
                    type_index,
                    ied: src.ied.as_ref(),
                    cutoff: src.cutoff,
                    block,
                });
            }
        }
        if info < degrees || parts.is_empty() {
            tracing::trace!(
                surface_type = st.name(),
                info,
                degrees,
                "insufficient data, surface type skipped"
            );
            return None;
        }
        let pool = Pool::new(parts);

        let method = match self.config.method {
            FitMethod::Ransac if info >= self.config.ransac_scale * degrees => FitMethod::Ransac,
            _ => FitMethod::Prune,
        };

        let mut fitter = st.new_fitter();
        let mut current = None;
        if method == FitMethod::Ransac {
            current = self.ransac(&pool, fitter.as_mut(), degrees, set);
        }

        let mut prune_budget = self.config.max_prune_iters;
        if current.is_none() {
            // Fallback on all data; counts as the first prune iteration.
            if prune_budget == 0 {
                return None;
            }
            prune_budget -= 1;
            fitter.reset();
            pool.feed_all(fitter.as_mut());
            self.progress.extractions += 1;
            current = fitter.extract();
        }
        let Some(mut surface) = current else {
            tracing::trace!(surface_type = st.name(), "extraction failed");
            return None;
        };

        for _ in 0..prune_budget {
            fitter.reset();
            if pool.feed_inliers(surface.as_ref(), fitter.as_mut()) == 0 {
                break;
            }
            self.progress.extractions += 1;
            let Some(next) = fitter.extract() else {
                break;
            };
            let converged = next.approx_eq(surface.as_ref());
            surface = next;
            if converged {
                break;
            }
        }

        let cost = entry.weight * pool.score(surface.as_ref()) as f32
            + self.config.model_cost_per_degree * degrees as f32;
        tracing::trace!(
            surface_type = st.name(),
            samples = pool.total(),
            cost,
            "surface type fitted"
        );
        Some((surface, cost))
    }

    /// Keep the hypothesis with the most inliers over the whole pool.
    fn ransac(
        &mut self,
        pool: &Pool<'_>,
        fitter: &mut dyn Fitter,
        degrees: usize,
        set: &SegmentSet,
    ) -> Option<Box<dyn Surface>> {
        use rand::prelude::*;

        let total = pool.total();
        if total == 0 {
            return None;
        }
        let mut rng = StdRng::seed_from_u64(self.config.seed ^ set.fingerprint());
        let mut most_inliers = degrees;
        let mut best = None;
        let mut needed = f64::INFINITY;
        let mut runs = 0usize;

        for _ in 0..self.config.max_ransac_iters {
            fitter.reset();
            for _ in 0..degrees {
                let (part, i) = pool.locate(rng.gen_range(0..total));
                let (xy, f) = part.block.get(i);
                if fitter.add(part.type_index, xy[0], xy[1], f) {
                    break;
                }
            }
            self.progress.extractions += 1;
            let Some(candidate) = fitter.extract() else {
                continue;
            };
            runs += 1;

            let inliers = pool.count_inliers(candidate.as_ref());
            if inliers > most_inliers {
                most_inliers = inliers;
                best = Some(candidate);
                needed = ransac_bound(
                    self.config.ransac_prob,
                    inliers as f64 / total as f64,
                    degrees,
                );
            }
            if needed <= runs as f64 {
                break;
            }
        }
        best
    }
}
