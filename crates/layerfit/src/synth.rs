//! Synthetic scenes: a grid of square segments lying on a few depth planes,
//! with noisy disparity and a textured stereo pair rendered from the true
//! depth.

use image::{Rgb, Rgb32FImage};
use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::FitConfig;
use crate::error::LayersError;
use crate::field::Field;
use crate::ied::DisparityIed;
use crate::layers::{internal_coord, LayersBuilder};
use crate::surface::PlaneSurfaceType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    pub width: usize,
    pub height: usize,
    /// Edge length of the square segments, in pixels.
    pub block: usize,
    /// Depth planes `[a, b, c]` with `depth = a·x + b·y + c` in internal
    /// coordinates. Block columns are split evenly between them.
    pub planes: Vec<[f32; 3]>,
    /// Depth → disparity multiplier.
    pub mult: f32,
    /// Amplitude of uniform disparity noise.
    pub noise: f32,
    /// Fraction of disparity samples replaced by uniform garbage.
    pub outlier_fraction: f32,
    pub seed: u64,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            width: 64,
            height: 48,
            block: 8,
            planes: vec![[0.3, 0.1, 2.0], [-0.2, 0.0, 4.0]],
            mult: 8.0,
            noise: 0.01,
            outlier_fraction: 0.0,
            seed: 7,
        }
    }
}

/// Generated scene and its ground truth.
#[derive(Debug, Clone)]
pub struct SynthScene {
    pub config: SynthConfig,
    pub segs: Field<u32>,
    pub segment_count: usize,
    /// Plane index of every segment.
    pub segment_plane: Vec<usize>,
    pub disparity: Field<f32>,
    pub left: Rgb32FImage,
    pub right: Rgb32FImage,
}

impl SynthScene {
    pub fn generate(config: &SynthConfig) -> Result<Self, LayersError> {
        if config.block == 0 {
            return Err(LayersError::InvalidParameter {
                name: "block",
                value: 0.0,
            });
        }
        if config.planes.is_empty() {
            return Err(LayersError::InvalidParameter {
                name: "planes",
                value: 0.0,
            });
        }
        let (w, h) = (config.width, config.height);
        let cols = w.div_ceil(config.block);
        let rows = h.div_ceil(config.block);
        let segment_count = cols * rows;
        let segment_plane: Vec<usize> = (0..segment_count)
            .map(|s| (s % cols) * config.planes.len() / cols)
            .collect();

        let segs = Field::from_fn(w, h, |x, y| {
            ((y / config.block) * cols + x / config.block) as u32
        });
        let true_disp = Field::from_fn(w, h, |x, y| {
            let [a, b, c] = config.planes[segment_plane[*segs.get(x, y) as usize]];
            let [ix, iy] = internal_coord(w, x as f32, y as f32);
            config.mult / (a * ix + b * iy + c)
        });

        let mut rng = StdRng::seed_from_u64(config.seed);
        let disparity = true_disp.map(|&d| {
            if rng.gen::<f32>() < config.outlier_fraction {
                rng.gen::<f32>() * 2.0 * d
            } else {
                d + config.noise * (2.0 * rng.gen::<f32>() - 1.0)
            }
        });

        let left = Rgb32FImage::from_fn(w as u32, h as u32, |_, _| {
            Rgb([rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>()])
        });
        let mut right = Rgb32FImage::from_fn(w as u32, h as u32, |_, _| {
            Rgb([rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>()])
        });
        let mut zbuf = vec![f32::NEG_INFINITY; w * h];
        for y in 0..h {
            for x in 0..w {
                let d = *true_disp.get(x, y);
                let tx = (x as f32 - d).round();
                if !(tx >= 0.0 && tx < w as f32) {
                    continue;
                }
                let idx = y * w + tx as usize;
                if d > zbuf[idx] {
                    zbuf[idx] = d;
                    right.put_pixel(tx as u32, y as u32, *left.get_pixel(x as u32, y as u32));
                }
            }
        }

        Ok(Self {
            config: config.clone(),
            segs,
            segment_count,
            segment_plane,
            disparity,
            left,
            right,
        })
    }

    /// Builder with one disparity source (cutoff `outlier_dist`) and the
    /// plane surface type.
    pub fn builder(&self, fit: FitConfig, outlier_dist: f32) -> Result<LayersBuilder, LayersError> {
        let mut builder = LayersBuilder::new(self.segs.clone(), self.segment_count)?;
        builder.set_fit_config(fit)?;
        let source = builder.add_ied(Box::new(DisparityIed::new(
            self.disparity.clone(),
            self.config.mult,
        )))?;
        builder.set_outlier_dist(source, outlier_dist)?;
        builder.add_surface_type(Box::new(PlaneSurfaceType));
        Ok(builder)
    }
}
