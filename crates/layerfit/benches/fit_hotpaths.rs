use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use layerfit::synth::{SynthConfig, SynthScene};
use layerfit::{
    FitConfig, FitMethod, LayerMerge, Layers, MergeConfig, OutlierScore, PipelineConfig,
    SegmentSet, WarpScore, WarpScoreConfig,
};

fn scene() -> SynthScene {
    SynthScene::generate(&SynthConfig {
        width: 128,
        height: 96,
        block: 8,
        outlier_fraction: 0.1,
        ..SynthConfig::default()
    })
    .expect("deterministic fixture should always generate")
}

fn fit_config(method: FitMethod) -> FitConfig {
    FitConfig {
        method,
        ..PipelineConfig::default().fit
    }
}

fn commit(scene: &SynthScene, method: FitMethod) -> Layers {
    scene
        .builder(fit_config(method), 0.4)
        .expect("valid builder")
        .commit()
        .expect("commit succeeds")
}

fn bench_commit(c: &mut Criterion) {
    let scene = scene();
    for (name, method) in [("commit_prune", FitMethod::Prune), ("commit_ransac", FitMethod::Ransac)] {
        c.bench_function(name, |b| b.iter(|| black_box(commit(black_box(&scene), method))));
    }
}

fn bench_layer_fit(c: &mut Criterion) {
    let scene = scene();
    let set = SegmentSet::from_segments(scene.segment_count, 0..scene.segment_count / 2);
    c.bench_function("layer_fit_half_scene_ransac", |b| {
        b.iter_batched(
            || commit(&scene, FitMethod::Ransac),
            |mut layers| black_box(layers.layer_fit(&set)),
            BatchSize::LargeInput,
        )
    });
}

fn bench_merge(c: &mut Criterion) {
    let scene = scene();
    let merge = LayerMerge::new(MergeConfig::default()).expect("valid bias");
    c.bench_function("merge_outlier_score", |b| {
        b.iter_batched(
            || commit(&scene, FitMethod::Ransac),
            |mut layers| black_box(merge.run(&mut layers, &mut OutlierScore::new())),
            BatchSize::LargeInput,
        )
    });
    c.bench_function("merge_warp_score", |b| {
        b.iter_batched(
            || {
                let layers = commit(&scene, FitMethod::Ransac);
                let score = WarpScore::new(
                    &layers,
                    scene.left.clone(),
                    &scene.right,
                    None,
                    WarpScoreConfig {
                        disparity_mult: scene.config.mult,
                        ..WarpScoreConfig::default()
                    },
                )
                .expect("matching images");
                (layers, score)
            },
            |(mut layers, mut score)| black_box(merge.run(&mut layers, &mut score)),
            BatchSize::LargeInput,
        )
    });
}

criterion_group!(hotpaths, bench_commit, bench_layer_fit, bench_merge);
criterion_main!(hotpaths);
