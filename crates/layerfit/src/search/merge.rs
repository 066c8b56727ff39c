//! Greedy agglomerative merging of adjacent layers.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::Serialize;

use crate::config::MergeConfig;
use crate::error::LayersError;
use crate::layers::Layers;
use crate::score::LayerScore;

use super::SegmentAdjacency;

/// Counters of one [`LayerMerge::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub merges: usize,
    pub candidates_evaluated: usize,
    /// Popped entries whose layers had changed since they were pushed.
    pub stale_entries: usize,
    pub layers_before: usize,
    pub layers_after: usize,
}

/// Queued merge of the layers headed by `a` and `b`.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    delta: f32,
    seq: u64,
    a: usize,
    b: usize,
    ver_a: u64,
    ver_b: u64,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap behaviour; earlier pushes win ties.
        other
            .delta
            .partial_cmp(&self.delta)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of candidates with per-head version counters for lazy
/// invalidation.
struct MergeQueue {
    heap: BinaryHeap<Candidate>,
    versions: Vec<u64>,
    seq: u64,
    bias: f32,
}

impl MergeQueue {
    fn offer(&mut self, delta: f32, a: usize, b: usize) {
        if !(delta < self.bias) {
            return;
        }
        self.heap.push(Candidate {
            delta,
            seq: self.seq,
            a,
            b,
            ver_a: self.versions[a],
            ver_b: self.versions[b],
        });
        self.seq += 1;
    }

    fn is_live(&self, c: &Candidate) -> bool {
        self.versions[c.a] == c.ver_a && self.versions[c.b] == c.ver_b
    }

    fn bump(&mut self, head: usize) {
        self.versions[head] += 1;
    }
}

/// Repeatedly merges the adjacent pair of layers with the lowest score
/// delta while that delta is below the configured bias.
#[derive(Debug, Clone)]
pub struct LayerMerge {
    config: MergeConfig,
}

impl LayerMerge {
    pub fn new(config: MergeConfig) -> Result<Self, LayersError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn run(&self, layers: &mut Layers, score: &mut dyn LayerScore) -> MergeReport {
        let adjacency = SegmentAdjacency::from_layers(layers);
        self.run_with(layers, score, &adjacency)
    }

    /// Run with a precomputed segment adjacency.
    pub fn run_with(
        &self,
        layers: &mut Layers,
        score: &mut dyn LayerScore,
        adjacency: &SegmentAdjacency,
    ) -> MergeReport {
        if layers.refit() > 0 {
            score.on_rebuild(layers);
        }
        let mut report = MergeReport {
            layers_before: layers.layer_count(),
            ..MergeReport::default()
        };
        let mut queue = MergeQueue {
            heap: BinaryHeap::new(),
            versions: vec![0; layers.segment_count()],
            seq: 0,
            bias: self.config.bias,
        };

        for (a, b) in adjacency.layer_edges(layers) {
            let delta = score.if_merge_layers(layers, a, b);
            report.candidates_evaluated += 1;
            queue.offer(delta, a, b);
        }

        while let Some(c) = queue.heap.pop() {
            if !queue.is_live(&c)
                || layers.seg_to_layer(c.a) != c.a
                || layers.seg_to_layer(c.b) != c.b
            {
                report.stale_entries += 1;
                continue;
            }

            let head = layers.merge_layers(c.a, c.b);
            layers.refit();
            score.on_merge_layers(layers, c.a, c.b);
            report.merges += 1;
            tracing::debug!(a = c.a, b = c.b, delta = c.delta, head, "layers merged");

            queue.bump(c.a);
            queue.bump(c.b);
            for n in adjacency.layer_neighbours(layers, head) {
                let delta = score.if_merge_layers(layers, head, n);
                report.candidates_evaluated += 1;
                queue.offer(delta, head, n);
            }
        }

        report.layers_after = layers.layer_count();
        tracing::info!(
            merges = report.merges,
            evaluated = report.candidates_evaluated,
            stale = report.stale_entries,
            layers = report.layers_after,
            "merge finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FitMethod;
    use crate::score::OutlierScore;
    use crate::test_utils::{assert_partition, commit_scene, two_plane_scene};

    fn cand(delta: f32, seq: u64) -> Candidate {
        Candidate {
            delta,
            seq,
            a: 0,
            b: 1,
            ver_a: 0,
            ver_b: 0,
        }
    }

    #[test]
    fn heap_pops_lowest_delta_then_oldest() {
        let mut heap = BinaryHeap::new();
        heap.push(cand(-1.0, 0));
        heap.push(cand(-3.0, 1));
        heap.push(cand(-3.0, 2));
        heap.push(cand(-2.0, 3));
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|c| c.seq)).collect();
        assert_eq!(order, vec![1, 2, 3, 0]);
    }

    #[test]
    fn queue_rejects_non_improving_and_stale() {
        let mut q = MergeQueue {
            heap: BinaryHeap::new(),
            versions: vec![0; 3],
            seq: 0,
            bias: -0.5,
        };
        q.offer(-0.5, 0, 1);
        q.offer(0.0, 0, 2);
        q.offer(f32::NAN, 1, 2);
        assert!(q.heap.is_empty());
        q.offer(-0.6, 0, 1);
        let c = *q.heap.peek().expect("queued");
        assert!(q.is_live(&c));
        q.bump(1);
        assert!(!q.is_live(&c));
    }

    #[test]
    fn positive_bias_is_rejected() {
        assert!(LayerMerge::new(MergeConfig { bias: 0.25 }).is_err());
    }

    #[test]
    fn two_plane_scene_merges_per_plane() {
        let scene = two_plane_scene();
        let mut layers = commit_scene(&scene, FitMethod::Ransac);
        let before = layers.total_cost();
        let merge = LayerMerge::new(MergeConfig::default()).expect("valid bias");
        let report = merge.run(&mut layers, &mut OutlierScore::new());

        assert_eq!(report.layers_before, 8);
        assert_eq!(report.layers_after, 2);
        assert_eq!(report.merges, 6);
        assert!(layers.total_cost() <= before);
        for a in 0..8 {
            for b in 0..8 {
                assert_eq!(
                    layers.seg_to_layer(a) == layers.seg_to_layer(b),
                    scene.segment_plane[a] == scene.segment_plane[b],
                    "segments {} and {}",
                    a,
                    b
                );
            }
        }
        assert_partition(&layers);
    }

    #[test]
    fn strict_bias_blocks_small_gains() {
        let scene = two_plane_scene();
        let mut layers = commit_scene(&scene, FitMethod::Prune);
        let merge = LayerMerge::new(MergeConfig { bias: -1.0 }).expect("valid bias");
        let report = merge.run(&mut layers, &mut OutlierScore::new());
        assert_eq!(report.merges, 0);
        assert_eq!(layers.layer_count(), 8);
    }
}
