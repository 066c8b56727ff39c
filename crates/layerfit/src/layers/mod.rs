//! The layers engine: segment → layer partition, memoized robust fits and
//! the edit operations the search heuristics drive.
//!
//! Setup happens on a [`LayersBuilder`]; [`LayersBuilder::commit`] caches
//! per-segment samples, fits one surface per segment and returns the
//! committed [`Layers`].

mod cache;
mod extract;
mod fit;
mod forest;
mod samples;
mod segment_set;

pub use fit::{FitProgress, FitResult, FAILED_FIT_COST};
pub use segment_set::SegmentSet;

use serde::Serialize;

use crate::config::{FitConfig, FitMethod};
use crate::error::LayersError;
use crate::field::Field;
use crate::ied::Ied;
use crate::surface::{SurfaceRef, SurfaceType};

use cache::FitCache;
use fit::{FitPipeline, SourceEntry, TypeEntry};
use forest::LayerForest;
use samples::SampleTable;

/// Internal coordinates: both axes scaled by the width into `[-1, 1]`
/// horizontally.
#[inline]
pub fn internal_coord(width: usize, x: f32, y: f32) -> [f32; 2] {
    let s = 2.0 / width as f32;
    [x * s - 1.0, y * s - 1.0]
}

// ── Builder ────────────────────────────────────────────────────────────────

/// Uncommitted engine: segmentation, feature sources and surface types.
pub struct LayersBuilder {
    segs: Field<u32>,
    segment_count: usize,
    sources: Vec<SourceEntry>,
    types: Vec<TypeEntry>,
    config: FitConfig,
}

impl LayersBuilder {
    /// Start from a segmentation with labels in `0..segment_count`.
    pub fn new(segs: Field<u32>, segment_count: usize) -> Result<Self, LayersError> {
        if let Some(&bad) = segs.as_slice().iter().find(|&&s| s as usize >= segment_count) {
            return Err(LayersError::SegmentOutOfRange {
                segment: bad,
                count: segment_count,
            });
        }
        Ok(Self {
            segs,
            segment_count,
            sources: Vec::new(),
            types: Vec::new(),
            config: FitConfig::default(),
        })
    }

    pub fn set_fit_config(&mut self, config: FitConfig) -> Result<(), LayersError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn set_fit_method(&mut self, method: FitMethod) {
        self.config.method = method;
    }

    /// Register a feature source with the default outlier cutoff of 1.
    /// Returns its index.
    pub fn add_ied(&mut self, ied: Box<dyn Ied>) -> Result<usize, LayersError> {
        let got = (ied.width(), ied.height());
        if got != self.segs.dims() {
            return Err(LayersError::DimensionMismatch {
                expected: self.segs.dims(),
                got,
            });
        }
        self.sources.push(SourceEntry { ied, cutoff: 1.0 });
        Ok(self.sources.len() - 1)
    }

    pub fn set_outlier_dist(&mut self, source: usize, dist: f32) -> Result<(), LayersError> {
        let entry = self
            .sources
            .get_mut(source)
            .ok_or(LayersError::UnknownSource(source))?;
        if !(dist >= 0.0 && dist.is_finite()) {
            return Err(LayersError::InvalidParameter {
                name: "outlier_dist",
                value: dist as f64,
            });
        }
        entry.cutoff = dist;
        Ok(())
    }

    /// Register a surface type with weight 1. Returns its index.
    pub fn add_surface_type(&mut self, surface_type: Box<dyn SurfaceType>) -> usize {
        self.types.push(TypeEntry {
            surface_type,
            weight: 1.0,
        });
        self.types.len() - 1
    }

    /// Multiplier applied to every cost computed for surface type `index`.
    pub fn set_surface_weight(&mut self, index: usize, weight: f32) -> Result<(), LayersError> {
        let entry = self
            .types
            .get_mut(index)
            .ok_or(LayersError::UnknownSurfaceType(index))?;
        if !(weight > 0.0 && weight.is_finite()) {
            return Err(LayersError::InvalidParameter {
                name: "surface_weight",
                value: weight as f64,
            });
        }
        entry.weight = weight;
        Ok(())
    }

    /// Cache samples per segment and fit every segment on its own.
    pub fn commit(self) -> Result<Layers, LayersError> {
        if self.sources.is_empty() {
            return Err(LayersError::NoFeatureSources);
        }
        if self.types.is_empty() {
            return Err(LayersError::NoSurfaceTypes);
        }
        let n = self.segment_count;
        let (width, _) = self.segs.dims();

        let mut seg_size = vec![0usize; n];
        for &s in self.segs.as_slice() {
            seg_size[s as usize] += 1;
        }
        let refs: Vec<&dyn Ied> = self.sources.iter().map(|s| s.ied.as_ref()).collect();
        let samples = SampleTable::build(&self.segs, n, &refs, |x, y| {
            internal_coord(width, x as f32, y as f32)
        });

        let mut layers = Layers {
            segs: self.segs,
            segment_count: n,
            sources: self.sources,
            types: self.types,
            config: self.config,
            samples,
            forest: LayerForest::new(seg_size),
            cache: FitCache::new(n),
            progress: FitProgress::default(),
        };
        for seg in 0..n {
            let r = layers.seg_fit(seg);
            let head = layers.forest.head_mut(seg);
            head.surface = r.surface;
            head.surface_type = r.surface_type;
            head.cost = r.cost;
        }
        tracing::info!(
            segments = n,
            samples = layers.samples.total(),
            extractions = layers.progress.extractions,
            "layers committed"
        );
        Ok(layers)
    }
}

// ── Committed engine ───────────────────────────────────────────────────────

/// Committed engine. Segment and layer arguments are segment ids and must be
/// below [`Layers::segment_count`]; a layer is named by any of its members.
pub struct Layers {
    segs: Field<u32>,
    segment_count: usize,
    sources: Vec<SourceEntry>,
    types: Vec<TypeEntry>,
    config: FitConfig,
    samples: SampleTable,
    forest: LayerForest,
    cache: FitCache,
    progress: FitProgress,
}

/// One layer in a [`LayersReport`].
#[derive(Debug, Clone, Serialize)]
pub struct LayerSummary {
    pub head: usize,
    pub segments: usize,
    pub pixels: usize,
    pub cost: f32,
    pub surface_type: Option<&'static str>,
    pub params: Option<Vec<f32>>,
}

/// Serializable snapshot of the partition and fit statistics.
#[derive(Debug, Clone, Serialize)]
pub struct LayersReport {
    pub width: usize,
    pub height: usize,
    pub segment_count: usize,
    pub layer_count: usize,
    pub total_cost: f64,
    pub cache_entries: usize,
    pub progress: FitProgress,
    pub layers: Vec<LayerSummary>,
}

impl Layers {
    #[inline]
    fn check_seg(&self, seg: usize) {
        assert!(
            seg < self.segment_count,
            "segment {} out of range ({} segments)",
            seg,
            self.segment_count
        );
    }

    pub fn width(&self) -> usize {
        self.segs.width()
    }

    pub fn height(&self) -> usize {
        self.segs.height()
    }

    pub fn segmentation(&self) -> &Field<u32> {
        &self.segs
    }

    pub fn segment_count(&self) -> usize {
        self.segment_count
    }

    pub fn layer_count(&self) -> usize {
        self.forest.head_count()
    }

    /// Image → internal coordinates.
    pub fn int_coord(&self, x: f32, y: f32) -> [f32; 2] {
        internal_coord(self.segs.width(), x, y)
    }

    pub fn fit_config(&self) -> &FitConfig {
        &self.config
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn source(&self, index: usize) -> &dyn Ied {
        self.sources[index].ied.as_ref()
    }

    pub fn outlier_dist(&self, source: usize) -> f32 {
        self.sources[source].cutoff
    }

    pub fn surface_type_count(&self) -> usize {
        self.types.len()
    }

    pub fn surface_type(&self, index: usize) -> &dyn SurfaceType {
        self.types[index].surface_type.as_ref()
    }

    pub fn surface_weight(&self, index: usize) -> f32 {
        self.types[index].weight
    }

    // ── queries ────────────────────────────────────────────────────────────

    /// Head segment of the layer containing `seg`.
    pub fn seg_to_layer(&self, seg: usize) -> usize {
        self.check_seg(seg);
        self.forest.find(seg)
    }

    /// Current layer heads, ascending.
    pub fn layers(&self) -> Vec<usize> {
        self.forest.heads().collect()
    }

    /// Member segments of the layer containing `layer`. Scans every segment.
    pub fn layer_members(&self, layer: usize) -> SegmentSet {
        let head = self.seg_to_layer(layer);
        SegmentSet::from_segments(
            self.segment_count,
            (0..self.segment_count).filter(|&s| self.forest.find(s) == head),
        )
    }

    pub fn layer_surface(&self, layer: usize) -> Option<&SurfaceRef> {
        let head = self.seg_to_layer(layer);
        self.forest.head(head).surface.as_ref()
    }

    /// Registration index of the layer's surface type.
    pub fn layer_surface_type(&self, layer: usize) -> Option<usize> {
        let head = self.seg_to_layer(layer);
        self.forest.head(head).surface_type
    }

    pub fn segment_size(&self, seg: usize) -> usize {
        self.check_seg(seg);
        self.forest.seg_size(seg)
    }

    pub fn layer_size(&self, layer: usize) -> usize {
        let head = self.seg_to_layer(layer);
        self.forest.head(head).size
    }

    /// Cost of the layer's current surface; stale until [`Layers::refit`]
    /// when the layer was edited.
    pub fn fit_cost(&self, layer: usize) -> f32 {
        let head = self.seg_to_layer(layer);
        self.forest.head(head).cost
    }

    pub fn is_dirty(&self, layer: usize) -> bool {
        let head = self.seg_to_layer(layer);
        self.forest.head(head).dirty
    }

    /// Sum of the fit costs of all layers.
    pub fn total_cost(&self) -> f64 {
        self.forest
            .heads()
            .map(|h| self.forest.head(h).cost as f64)
            .sum()
    }

    pub fn progress(&self) -> FitProgress {
        self.progress
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Best fit of a single segment.
    pub fn seg_fit(&mut self, seg: usize) -> FitResult {
        self.check_seg(seg);
        self.layer_fit(&SegmentSet::singleton(self.segment_count, seg))
    }

    pub fn seg_fit_cost(&mut self, seg: usize) -> f32 {
        self.seg_fit(seg).cost
    }

    /// Best fit of an arbitrary segment set, computed at most once per set.
    pub fn layer_fit(&mut self, set: &SegmentSet) -> FitResult {
        assert_eq!(
            set.universe(),
            self.segment_count,
            "segment set built for a different segment count"
        );
        if let Some(hit) = self.cache.get(set) {
            return hit.clone();
        }
        let result = FitPipeline {
            sources: &self.sources,
            types: &self.types,
            samples: &self.samples,
            config: &self.config,
            progress: &mut self.progress,
        }
        .fit(set);
        self.cache.insert(set.clone(), result).clone()
    }

    pub fn layer_fit_cost(&mut self, set: &SegmentSet) -> f32 {
        self.layer_fit(set).cost
    }

    // ── edits ──────────────────────────────────────────────────────────────

    /// Move `seg` into the layer containing `layer`. Both affected layers
    /// become dirty.
    pub fn set_seg_layer(&mut self, seg: usize, layer: usize) {
        self.check_seg(seg);
        self.check_seg(layer);
        self.forest.set_seg_layer(seg, layer);
    }

    /// Union the layers containing `a` and `b`. Returns the surviving head.
    /// Merging a layer with itself changes nothing.
    pub fn merge_layers(&mut self, a: usize, b: usize) -> usize {
        self.check_seg(a);
        self.check_seg(b);
        self.forest.merge(a, b)
    }

    /// Split `seg` into its own layer, which receives the cached
    /// single-segment fit. Scans every segment when `seg` is a head.
    pub fn separate(&mut self, seg: usize) {
        self.check_seg(seg);
        if self.forest.detach(seg).is_none() {
            return;
        }
        let r = self.seg_fit(seg);
        let head = self.forest.head_mut(seg);
        head.surface = r.surface;
        head.surface_type = r.surface_type;
        head.cost = r.cost;
        head.dirty = false;
    }

    /// Re-fit every dirty layer. Returns how many layers were refitted.
    pub fn refit(&mut self) -> usize {
        let dirty: Vec<usize> = self
            .forest
            .heads()
            .filter(|&h| self.forest.head(h).dirty)
            .collect();
        if dirty.is_empty() {
            return 0;
        }
        let mut sets: Vec<SegmentSet> = dirty
            .iter()
            .map(|_| SegmentSet::new(self.segment_count))
            .collect();
        for s in 0..self.segment_count {
            if let Ok(i) = dirty.binary_search(&self.forest.find(s)) {
                sets[i].insert(s);
            }
        }
        for (&h, set) in dirty.iter().zip(&sets) {
            let r = self.layer_fit(set);
            let head = self.forest.head_mut(h);
            head.surface = r.surface;
            head.surface_type = r.surface_type;
            head.cost = r.cost;
            head.dirty = false;
        }
        tracing::debug!(refitted = dirty.len(), "dirty layers refitted");
        dirty.len()
    }

    pub fn report(&self) -> LayersReport {
        let mut segments = vec![0usize; self.segment_count];
        for s in 0..self.segment_count {
            segments[self.forest.find(s)] += 1;
        }
        let layers = self
            .forest
            .heads()
            .map(|h| {
                let d = self.forest.head(h);
                LayerSummary {
                    head: h,
                    segments: segments[h],
                    pixels: d.size,
                    cost: d.cost,
                    surface_type: d.surface_type.map(|t| self.types[t].surface_type.name()),
                    params: d.surface.as_ref().map(|s| s.params()),
                }
            })
            .collect();
        LayersReport {
            width: self.width(),
            height: self.height(),
            segment_count: self.segment_count,
            layer_count: self.layer_count(),
            total_cost: self.total_cost(),
            cache_entries: self.cache.len(),
            progress: self.progress,
            layers,
        }
    }
}
