use crate::layers::Layers;

use super::LayerScore;

/// Score equal to the sum of the layers' robust fit costs, read entirely
/// from the engine's fit cache.
#[derive(Debug, Default, Clone, Copy)]
pub struct OutlierScore;

impl OutlierScore {
    pub fn new() -> Self {
        Self
    }
}

impl LayerScore for OutlierScore {
    fn if_set_seg_layer(&mut self, layers: &mut Layers, seg: usize, layer: usize) -> f32 {
        let source = layers.seg_to_layer(seg);
        let target = layers.seg_to_layer(layer);
        if source == target {
            return 0.0;
        }
        let mut from = layers.layer_members(source);
        from.remove(seg);
        let mut to = layers.layer_members(target);
        to.insert(seg);

        let before = layers.fit_cost(source) + layers.fit_cost(target);
        let after = layers.layer_fit_cost(&from) + layers.layer_fit_cost(&to);
        after - before
    }

    fn if_merge_layers(&mut self, layers: &mut Layers, a: usize, b: usize) -> f32 {
        let ha = layers.seg_to_layer(a);
        let hb = layers.seg_to_layer(b);
        if ha == hb {
            return 0.0;
        }
        let mut union = layers.layer_members(ha);
        union.union_with(&layers.layer_members(hb));

        let before = layers.fit_cost(ha) + layers.fit_cost(hb);
        layers.layer_fit_cost(&union) - before
    }

    fn if_separate(&mut self, layers: &mut Layers, seg: usize) -> f32 {
        let head = layers.seg_to_layer(seg);
        let mut rest = layers.layer_members(head);
        if rest.count() == 1 {
            return 0.0;
        }
        rest.remove(seg);

        let before = layers.fit_cost(head);
        layers.layer_fit_cost(&rest) + layers.seg_fit_cost(seg) - before
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::config::FitMethod;
    use crate::test_utils::{commit_scene, two_plane_scene};

    #[test]
    fn predicted_deltas_match_applied_edits() {
        let scene = two_plane_scene();
        let mut layers = commit_scene(&scene, FitMethod::Prune);
        let mut score = OutlierScore::new();

        let before = layers.total_cost();
        let delta = score.if_merge_layers(&mut layers, 0, 1);
        assert!(delta < 0.0, "same-plane merge delta {}", delta);
        layers.merge_layers(0, 1);
        layers.refit();
        assert_relative_eq!(layers.total_cost() - before, delta as f64, epsilon = 1e-4);

        // Segment 2 lies on the other plane.
        let before = layers.total_cost();
        let delta = score.if_set_seg_layer(&mut layers, 2, 0);
        assert!(delta > 0.0, "cross-plane move delta {}", delta);
        layers.set_seg_layer(2, 0);
        layers.refit();
        assert_relative_eq!(layers.total_cost() - before, delta as f64, epsilon = 1e-4);

        let before = layers.total_cost();
        let delta = score.if_separate(&mut layers, 2);
        assert!(delta < 0.0);
        layers.separate(2);
        layers.refit();
        assert_relative_eq!(layers.total_cost() - before, delta as f64, epsilon = 1e-4);
    }

    #[test]
    fn no_op_edits_cost_nothing() {
        let scene = two_plane_scene();
        let mut layers = commit_scene(&scene, FitMethod::Prune);
        let mut score = OutlierScore::new();
        layers.merge_layers(0, 1);
        layers.refit();
        assert_eq!(score.if_merge_layers(&mut layers, 1, 0), 0.0);
        assert_eq!(score.if_set_seg_layer(&mut layers, 1, 0), 0.0);
        assert_eq!(score.if_separate(&mut layers, 3), 0.0);
    }
}
