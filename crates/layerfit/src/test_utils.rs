//! Shared helpers for engine, score and search tests.

use crate::config::{FitConfig, FitMethod, PipelineConfig};
use crate::layers::Layers;
use crate::synth::{SynthConfig, SynthScene};

/// Outlier cutoff used by the synthetic test scenes.
pub(crate) const TEST_CUTOFF: f32 = 0.05;

/// Low-noise scene with unit depth multiplier.
pub(crate) fn plane_scene(
    planes: Vec<[f32; 3]>,
    width: usize,
    height: usize,
    block: usize,
) -> SynthScene {
    SynthScene::generate(&SynthConfig {
        width,
        height,
        block,
        planes,
        mult: 1.0,
        noise: 0.002,
        outlier_fraction: 0.0,
        seed: 11,
    })
    .expect("valid synthetic scene")
}

/// Pipeline fit settings, which charge a little for every fitted degree of
/// freedom so merging segments of one plane is favourable.
pub(crate) fn test_fit_config(method: FitMethod) -> FitConfig {
    FitConfig {
        method,
        ..PipelineConfig::default().fit
    }
}

pub(crate) fn commit_scene(scene: &SynthScene, method: FitMethod) -> Layers {
    scene
        .builder(test_fit_config(method), TEST_CUTOFF)
        .expect("valid builder")
        .commit()
        .expect("commit succeeds")
}

/// Two planes, 4×2 blocks of 8 px: columns 0-1 on plane 0, 2-3 on plane 1.
pub(crate) fn two_plane_scene() -> SynthScene {
    plane_scene(vec![[0.3, 0.1, 2.0], [-0.2, 0.0, 4.0]], 32, 16, 8)
}

/// Check that every segment reaches exactly one head and that pixel counts
/// add up.
pub(crate) fn assert_partition(layers: &Layers) {
    let heads = layers.layers();
    assert_eq!(heads.len(), layers.layer_count());
    let mut pixels = vec![0usize; layers.segment_count()];
    for seg in 0..layers.segment_count() {
        let head = layers.seg_to_layer(seg);
        assert_eq!(layers.seg_to_layer(head), head, "head of {} is not a head", seg);
        assert!(heads.binary_search(&head).is_ok());
        assert!(layers.layer_members(head).contains(seg));
        pixels[head] += layers.segment_size(seg);
    }
    for &h in &heads {
        assert_eq!(layers.layer_size(h), pixels[h], "pixel count of layer {}", h);
    }
}
