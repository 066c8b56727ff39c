use image::Rgb32FImage;

use crate::config::WarpScoreConfig;
use crate::error::LayersError;
use crate::field::Field;
use crate::layers::{internal_coord, Layers, SegmentSet};
use crate::surface::{disparity_ratio, same_surface, SurfaceRef, HOMOGENEOUS_EPS};

use super::{LayerScore, WarpAccumulator};

/// Horizontal run of one segment's pixels `x0..=x1` on row `y`.
#[derive(Debug, Clone, Copy)]
struct Run {
    y: u32,
    x0: u32,
    x1: u32,
}

/// Re-projection score: every segment of the left image is warped into the
/// right image using its layer's surface, and the result is compared with
/// the true right image (colour differences plus occlusions).
///
/// Consecutive pixels of a segment row are warped as spans: every right
/// pixel between their projections receives a splat with interpolated
/// colour, so stretched surfaces leave no holes. Hypothetical edits
/// temporarily re-render the affected segments in the shared accumulator
/// and then restore them.
pub struct WarpScore {
    config: WarpScoreConfig,
    left: Rgb32FImage,
    acc: WarpAccumulator,
    width: usize,
    seg_runs: Vec<Vec<Run>>,
    /// Surface each segment is currently rendered with.
    rendered: Vec<Option<SurfaceRef>>,
}

impl WarpScore {
    /// Render the current partition of `layers`. `mask`, when given,
    /// excludes right-image pixels from the score.
    pub fn new(
        layers: &Layers,
        left: Rgb32FImage,
        right: &Rgb32FImage,
        mask: Option<&Field<bool>>,
        config: WarpScoreConfig,
    ) -> Result<Self, LayersError> {
        let expected = (layers.width(), layers.height());
        for got in [left.dimensions(), right.dimensions()]
            .into_iter()
            .map(|(w, h)| (w as usize, h as usize))
            .chain(mask.map(Field::dims))
        {
            if got != expected {
                return Err(LayersError::DimensionMismatch { expected, got });
            }
        }
        if !(config.occlusion_cost >= 0.0) {
            return Err(LayersError::InvalidParameter {
                name: "occlusion_cost",
                value: config.occlusion_cost as f64,
            });
        }

        let n = layers.segment_count();
        let mut acc = WarpAccumulator::new(right, n, config.occlusion_cost);
        if let Some(mask) = mask {
            acc.set_mask(mask);
        }
        let segs = layers.segmentation();
        let mut seg_runs = vec![Vec::new(); n];
        for y in 0..segs.height() {
            let mut x = 0;
            while x < segs.width() {
                let seg = *segs.get(x, y);
                let x0 = x;
                while x + 1 < segs.width() && *segs.get(x + 1, y) == seg {
                    x += 1;
                }
                seg_runs[seg as usize].push(Run {
                    y: y as u32,
                    x0: x0 as u32,
                    x1: x as u32,
                });
                x += 1;
            }
        }

        let mut score = Self {
            config,
            left,
            acc,
            width: layers.width(),
            seg_runs,
            rendered: vec![None; n],
        };
        score.sync(layers);
        Ok(score)
    }

    /// Current score of the rendered partition.
    pub fn score(&self) -> f32 {
        self.acc.score()
    }

    pub fn accumulator(&self) -> &WarpAccumulator {
        &self.acc
    }

    fn render(&mut self, seg: usize, surface: Option<&SurfaceRef>) {
        let Some(surface) = surface else {
            return;
        };
        let (width, mult) = (self.width, self.config.disparity_mult);
        let disp_at = |x: f32, y: u32| {
            let [ix, iy] = internal_coord(width, x, y as f32);
            disparity_ratio(&surface.depth(ix, iy), mult)
        };
        let acc = &mut self.acc;
        let left = &self.left;

        for run in &self.seg_runs[seg] {
            let y = run.y;
            if run.x0 == run.x1 {
                // Lone pixel: nearest splat.
                let x = run.x0;
                let Some(disp) = disp_at(x as f32, y) else {
                    continue;
                };
                let tx = (x as f32 - disp).round();
                if tx >= 0.0 && tx < width as f32 {
                    acc.add(tx as usize, y as usize, disp, left.get_pixel(x, y).0, seg);
                }
                continue;
            }

            for x in run.x0..run.x1 {
                let xf = x as f32;
                let (Some(da), Some(db)) = (disp_at(xf, y), disp_at(xf + 1.0, y)) else {
                    continue;
                };
                let base = xf - da;
                let span = xf + 1.0 - db - base;
                let mut start = base;
                let mut end = base + span;
                // Run ends reach half a pixel further out.
                if x == run.x0 {
                    if let Some(d) = disp_at(xf - 0.5, y) {
                        start = xf - 0.5 - d;
                    }
                }
                if x + 1 == run.x1 {
                    if let Some(d) = disp_at(xf + 1.5, y) {
                        end = xf + 1.5 - d;
                    }
                }
                if start > end {
                    std::mem::swap(&mut start, &mut end);
                }

                let ca = left.get_pixel(x, y).0;
                let cb = left.get_pixel(x + 1, y).0;
                for i in (start.ceil().max(0.0) as usize)..width {
                    let fi = i as f32;
                    if !(fi < end) {
                        break;
                    }
                    let t = if span.abs() > HOMOGENEOUS_EPS {
                        (fi - base) / span
                    } else {
                        0.0
                    };
                    let Some(disp) = disp_at(xf + t, y) else {
                        continue;
                    };
                    let w = t.clamp(0.0, 1.0);
                    let colour = [0, 1, 2].map(|k| (1.0 - w) * ca[k] + w * cb[k]);
                    acc.add(i, y as usize, disp, colour, seg);
                }
            }
        }
    }

    fn rerender(&mut self, seg: usize, surface: Option<SurfaceRef>) {
        self.acc.remove(seg);
        self.render(seg, surface.as_ref());
        self.rendered[seg] = surface;
    }

    /// Re-render every segment whose layer surface changed.
    fn sync(&mut self, layers: &Layers) {
        let mut changed = 0usize;
        for seg in 0..self.rendered.len() {
            let current = layers.layer_surface(seg).cloned();
            if !same_surface(current.as_ref(), self.rendered[seg].as_ref()) {
                self.rerender(seg, current);
                changed += 1;
            }
        }
        tracing::trace!(changed, score = self.acc.score(), "warp synced");
    }

    /// Score delta of rendering each set with its surface, restored before
    /// returning.
    fn hypothetical(&mut self, plan: &[(SegmentSet, Option<SurfaceRef>)]) -> f32 {
        let before = self.acc.score();
        for (set, surface) in plan {
            for seg in set.iter() {
                self.acc.remove(seg);
                self.render(seg, surface.as_ref());
            }
        }
        let after = self.acc.score();
        for (set, _) in plan {
            for seg in set.iter() {
                let current = self.rendered[seg].clone();
                self.acc.remove(seg);
                self.render(seg, current.as_ref());
            }
        }
        after - before
    }
}

impl LayerScore for WarpScore {
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
        let from_fit = layers.layer_fit(&from).surface;
        let to_fit = layers.layer_fit(&to).surface;
        self.hypothetical(&[(from, from_fit), (to, to_fit)])
    }

    fn if_merge_layers(&mut self, layers: &mut Layers, a: usize, b: usize) -> f32 {
        let ha = layers.seg_to_layer(a);
        let hb = layers.seg_to_layer(b);
        if ha == hb {
            return 0.0;
        }
        let mut union = layers.layer_members(ha);
        union.union_with(&layers.layer_members(hb));
        let fit = layers.layer_fit(&union).surface;
        self.hypothetical(&[(union, fit)])
    }

    fn if_separate(&mut self, layers: &mut Layers, seg: usize) -> f32 {
        let mut rest = layers.layer_members(seg);
        if rest.count() == 1 {
            return 0.0;
        }
        rest.remove(seg);
        let rest_fit = layers.layer_fit(&rest).surface;
        let seg_fit = layers.seg_fit(seg).surface;
        let single = SegmentSet::singleton(layers.segment_count(), seg);
        self.hypothetical(&[(rest, rest_fit), (single, seg_fit)])
    }

    fn on_set_seg_layer(&mut self, layers: &Layers, _seg: usize, _layer: usize) {
        self.sync(layers);
    }

    fn on_merge_layers(&mut self, layers: &Layers, _a: usize, _b: usize) {
        self.sync(layers);
    }

    fn on_separate(&mut self, layers: &Layers, _seg: usize) {
        self.sync(layers);
    }

    fn on_rebuild(&mut self, layers: &Layers) {
        self.sync(layers);
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::config::FitMethod;
    use crate::ied::DisparityIed;
    use crate::layers::LayersBuilder;
    use crate::surface::PlaneSurfaceType;
    use crate::synth::{SynthConfig, SynthScene};
    use crate::test_utils::test_fit_config;

    fn warp_scene() -> SynthScene {
        SynthScene::generate(&SynthConfig {
            width: 32,
            height: 16,
            ..SynthConfig::default()
        })
        .expect("valid scene")
    }

    fn commit(scene: &SynthScene) -> Layers {
        scene
            .builder(test_fit_config(FitMethod::Prune), 0.4)
            .expect("valid builder")
            .commit()
            .expect("commit succeeds")
    }

    fn warp(layers: &Layers, scene: &SynthScene) -> WarpScore {
        WarpScore::new(
            layers,
            scene.left.clone(),
            &scene.right,
            None,
            WarpScoreConfig {
                disparity_mult: scene.config.mult,
                ..WarpScoreConfig::default()
            },
        )
        .expect("matching images")
    }

    #[test]
    fn hypothetical_edits_match_applied_edits() {
        let scene = warp_scene();
        let mut layers = commit(&scene);
        let mut score = warp(&layers, &scene);
        assert_relative_eq!(score.score(), score.accumulator().raw_score(), epsilon = 1e-2);

        let before = score.score();
        let delta = score.if_merge_layers(&mut layers, 0, 1);
        assert_relative_eq!(score.score(), before, epsilon = 1e-2);
        layers.merge_layers(0, 1);
        layers.refit();
        score.on_merge_layers(&layers, 0, 1);
        assert_relative_eq!(score.score() - before, delta, epsilon = 1e-2);
        assert_relative_eq!(score.score(), score.accumulator().raw_score(), epsilon = 1e-2);

        let before = score.score();
        let delta = score.if_separate(&mut layers, 1);
        layers.separate(1);
        layers.refit();
        score.on_separate(&layers, 1);
        assert_relative_eq!(score.score() - before, delta, epsilon = 1e-2);
        assert_relative_eq!(score.score(), score.accumulator().raw_score(), epsilon = 1e-2);
    }

    #[test]
    fn wrong_surface_renders_worse() {
        let scene = warp_scene();
        let mut layers = commit(&scene);
        let mut score = warp(&layers, &scene);
        assert_ne!(scene.segment_plane[1], scene.segment_plane[2]);
        let before = score.score();
        assert!(score.if_merge_layers(&mut layers, 1, 2) > 0.0);
        assert_relative_eq!(score.score(), before, epsilon = 1e-2);
    }

    #[test]
    fn setup_is_validated() {
        let scene = warp_scene();
        let layers = commit(&scene);
        assert!(matches!(
            WarpScore::new(
                &layers,
                Rgb32FImage::new(4, 4),
                &scene.right,
                None,
                WarpScoreConfig::default()
            ),
            Err(LayersError::DimensionMismatch { .. })
        ));
        let config = WarpScoreConfig {
            occlusion_cost: -1.0,
            ..WarpScoreConfig::default()
        };
        assert!(matches!(
            WarpScore::new(&layers, scene.left.clone(), &scene.right, None, config),
            Err(LayersError::InvalidParameter { .. })
        ));

        let mask = Field::new(32, 16, false);
        let masked = WarpScore::new(
            &layers,
            scene.left.clone(),
            &scene.right,
            Some(&mask),
            WarpScoreConfig::default(),
        )
        .expect("matching mask");
        assert_eq!(masked.score(), 0.0);
    }

    #[test]
    fn stretched_runs_fill_every_pixel_between_projections() {
        // Columns 16..24 lie on depth 3x/16 - 1.5 with disparity 16 / depth,
        // so their projections spread over 5.33..17.31. The rest is masked.
        let (w, h, mult) = (32, 2, 16.0);
        let segs = Field::from_fn(w, h, |x, _| u32::from(!(16..24).contains(&x)));
        let disparity = Field::from_fn(w, h, |x, _| {
            let depth = 3.0 * x as f32 / 16.0 - 1.5;
            if depth > 0.0 {
                mult / depth
            } else {
                0.0
            }
        });
        let ied = DisparityIed::new(disparity, mult)
            .with_mask(Field::from_fn(w, h, |x, _| (16..24).contains(&x)))
            .expect("matching dims");
        let mut b = LayersBuilder::new(segs, 2).expect("labels in range");
        b.add_ied(Box::new(ied)).expect("matching dims");
        b.add_surface_type(Box::new(PlaneSurfaceType));
        let layers = b.commit().expect("commit succeeds");
        assert!(layers.layer_surface(0).is_some());
        assert!(layers.layer_surface(1).is_none());

        let white = Rgb32FImage::from_pixel(w as u32, h as u32, image::Rgb([1.0; 3]));
        let score = WarpScore::new(
            &layers,
            white.clone(),
            &white,
            None,
            WarpScoreConfig {
                occlusion_cost: 1.0,
                disparity_mult: mult,
            },
        )
        .expect("matching images");

        // Eight pixels per row cover 5..=17 once each: 13 of 32 filled.
        assert_relative_eq!(score.accumulator().score_occ(), 2.0 * 19.0, epsilon = 1e-6);
        assert_relative_eq!(score.accumulator().score_diff(), 0.0, epsilon = 1e-6);
        let img = score.accumulator().image();
        for y in 0..h as u32 {
            for x in 0..w as u32 {
                let filled = img.get_pixel(x, y).0 != [0.0; 3];
                assert_eq!(filled, (5..=17).contains(&x), "pixel ({}, {})", x, y);
            }
        }
    }
}
