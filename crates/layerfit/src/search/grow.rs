//! Boundary grow/shrink: reassign boundary segments to neighbouring layers.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::config::GrowConfig;
use crate::layers::Layers;
use crate::score::LayerScore;

use super::SegmentAdjacency;

/// Counters of one [`LayerGrow::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GrowReport {
    pub passes: usize,
    pub moves: usize,
    pub candidates_evaluated: usize,
}

/// Each pass finds, for every segment on a layer boundary, its best
/// improving move into a neighbouring layer, then applies those moves in
/// order of improvement. A move is skipped when an earlier move of the same
/// pass already changed its source or target layer.
#[derive(Debug, Clone, Default)]
pub struct LayerGrow {
    config: GrowConfig,
}

impl LayerGrow {
    pub fn new(config: GrowConfig) -> Self {
        Self { config }
    }

    pub fn run(&self, layers: &mut Layers, score: &mut dyn LayerScore) -> GrowReport {
        let adjacency = SegmentAdjacency::from_layers(layers);
        self.run_with(layers, score, &adjacency)
    }

    pub fn run_with(
        &self,
        layers: &mut Layers,
        score: &mut dyn LayerScore,
        adjacency: &SegmentAdjacency,
    ) -> GrowReport {
        if layers.refit() > 0 {
            score.on_rebuild(layers);
        }
        let n = layers.segment_count();
        let mut report = GrowReport::default();

        for pass in 0..self.config.max_passes {
            report.passes += 1;

            let mut moves: Vec<(f32, usize, usize)> = Vec::new();
            for seg in 0..n {
                let own = layers.seg_to_layer(seg);
                let targets: BTreeSet<usize> = adjacency
                    .neighbours(seg)
                    .iter()
                    .map(|&t| layers.seg_to_layer(t))
                    .filter(|&h| h != own)
                    .collect();
                let mut best: Option<(f32, usize)> = None;
                for target in targets {
                    let delta = score.if_set_seg_layer(layers, seg, target);
                    report.candidates_evaluated += 1;
                    if delta < 0.0 && best.map_or(true, |(d, _)| delta < d) {
                        best = Some((delta, target));
                    }
                }
                if let Some((delta, target)) = best {
                    moves.push((delta, seg, target));
                }
            }
            if moves.is_empty() {
                break;
            }
            moves.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

            let mut touched = vec![false; n];
            let mut applied = 0usize;
            for (_, seg, target) in moves {
                let source = layers.seg_to_layer(seg);
                let target = layers.seg_to_layer(target);
                if source == target || touched[source] || touched[target] {
                    continue;
                }
                for s in layers
                    .layer_members(source)
                    .iter()
                    .chain(layers.layer_members(target).iter())
                {
                    touched[s] = true;
                }
                layers.set_seg_layer(seg, target);
                layers.refit();
                score.on_set_seg_layer(layers, seg, target);
                applied += 1;
            }
            report.moves += applied;
            tracing::debug!(pass, applied, "grow pass");
        }

        tracing::info!(
            passes = report.passes,
            moves = report.moves,
            layers = layers.layer_count(),
            "grow finished"
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

    #[test]
    fn misassigned_segment_returns_to_its_plane() {
        let scene = two_plane_scene();
        let mut layers = commit_scene(&scene, FitMethod::Prune);
        for (a, b) in [(0, 1), (0, 4), (0, 5), (2, 3), (2, 6), (2, 7)] {
            layers.merge_layers(a, b);
        }
        layers.set_seg_layer(1, 2);
        layers.refit();
        assert_eq!(layers.seg_to_layer(1), layers.seg_to_layer(2));

        let report = LayerGrow::new(GrowConfig::default()).run(&mut layers, &mut OutlierScore::new());
        assert!(report.moves >= 1);
        assert!(report.candidates_evaluated > 0);
        assert_eq!(layers.seg_to_layer(1), layers.seg_to_layer(0));
        assert_ne!(layers.seg_to_layer(1), layers.seg_to_layer(2));
        assert_eq!(layers.layer_count(), 2);
        assert_partition(&layers);
    }

    #[test]
    fn settled_partition_needs_one_pass() {
        let scene = two_plane_scene();
        let mut layers = commit_scene(&scene, FitMethod::Prune);
        for (a, b) in [(0, 1), (0, 4), (0, 5), (2, 3), (2, 6), (2, 7)] {
            layers.merge_layers(a, b);
        }
        let report = LayerGrow::new(GrowConfig::default()).run(&mut layers, &mut OutlierScore::new());
        assert_eq!(report.passes, 1);
        assert_eq!(report.moves, 0);
        assert_eq!(layers.layer_count(), 2);
    }
}
