//! Incremental forward-warp accumulator.
//!
//! Pixels of the left image are splatted into the right image frame. Every
//! right pixel keeps its splats ordered by disparity, nearest first; the
//! nearest is visible and the rest are occluded. The score is the L1 colour
//! difference of visible splats against the true right colour plus
//! `occlusion_cost` per occlusion, where an empty pixel counts as one
//! occlusion. Adding or removing splats updates it in O(stack depth).

use image::{Rgb, Rgb32FImage};

use crate::field::Field;

#[derive(Debug, Clone, Copy)]
struct Splat {
    disp: f32,
    colour: [f32; 3],
    segment: u32,
}

#[derive(Debug, Clone)]
pub struct WarpAccumulator {
    width: usize,
    height: usize,
    truth: Vec<[f32; 3]>,
    counted: Vec<bool>,
    stacks: Vec<Vec<Splat>>,
    /// Pixel index of every splat, per segment.
    seg_pixels: Vec<Vec<usize>>,
    occlusion_cost: f32,
    diff_sum: f64,
    occ_count: i64,
}

#[inline]
fn colour_diff(a: &[f32; 3], b: &[f32; 3]) -> f64 {
    ((a[0] - b[0]).abs() + (a[1] - b[1]).abs() + (a[2] - b[2]).abs()) as f64
}

impl WarpAccumulator {
    /// Empty accumulator over the true colours of `base`, for segments
    /// `0..segments`.
    pub fn new(base: &Rgb32FImage, segments: usize, occlusion_cost: f32) -> Self {
        let (w, h) = (base.width() as usize, base.height() as usize);
        let truth = base.pixels().map(|p| p.0).collect();
        Self {
            width: w,
            height: h,
            truth,
            counted: vec![true; w * h],
            stacks: vec![Vec::new(); w * h],
            seg_pixels: vec![Vec::new(); segments],
            occlusion_cost,
            diff_sum: 0.0,
            occ_count: (w * h) as i64,
        }
    }

    /// Exclude pixels where `mask` is false from the score. Must be called
    /// before anything is added.
    pub fn set_mask(&mut self, mask: &Field<bool>) {
        debug_assert!(self.stacks.iter().all(Vec::is_empty));
        for (c, &m) in self.counted.iter_mut().zip(mask.as_slice()) {
            *c = m;
        }
        self.occ_count = self.counted.iter().filter(|&&c| c).count() as i64;
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn occlusion_cost(&self) -> f32 {
        self.occlusion_cost
    }

    /// Splat `colour` at right-image pixel `(x, y)` with disparity `disp`.
    /// The caller does the warping and range checks.
    pub fn add(&mut self, x: usize, y: usize, disp: f32, colour: [f32; 3], segment: usize) {
        let idx = y * self.width + x;
        if !self.counted[idx] {
            return;
        }
        let disp = disp.abs();
        let stack = &mut self.stacks[idx];
        let pos = stack.partition_point(|s| s.disp >= disp);
        let truth = &self.truth[idx];
        if pos == 0 {
            if let Some(old_top) = stack.first() {
                self.occ_count += 1;
                self.diff_sum -= colour_diff(&old_top.colour, truth);
            } else {
                self.occ_count -= 1;
            }
            self.diff_sum += colour_diff(&colour, truth);
        } else {
            self.occ_count += 1;
        }
        stack.insert(
            pos,
            Splat {
                disp,
                colour,
                segment: segment as u32,
            },
        );
        self.seg_pixels[segment].push(idx);
    }

    /// Remove every splat of `segment`.
    pub fn remove(&mut self, segment: usize) {
        let pixels = std::mem::take(&mut self.seg_pixels[segment]);
        for idx in pixels {
            let stack = &mut self.stacks[idx];
            let Some(pos) = stack.iter().position(|s| s.segment as usize == segment) else {
                continue;
            };
            let victim = stack.remove(pos);
            if pos == 0 {
                let truth = &self.truth[idx];
                self.diff_sum -= colour_diff(&victim.colour, truth);
                if let Some(new_top) = stack.first() {
                    self.diff_sum += colour_diff(&new_top.colour, truth);
                    self.occ_count -= 1;
                } else {
                    self.occ_count += 1;
                }
            } else {
                self.occ_count -= 1;
            }
        }
    }

    /// Incrementally maintained score.
    pub fn score(&self) -> f32 {
        (self.diff_sum + self.occ_count as f64 * self.occlusion_cost as f64) as f32
    }

    pub fn score_diff(&self) -> f32 {
        self.diff_sum as f32
    }

    pub fn score_occ(&self) -> f32 {
        (self.occ_count as f64 * self.occlusion_cost as f64) as f32
    }

    /// Score recomputed from the stacks, for verification.
    pub fn raw_score(&self) -> f32 {
        let mut diff = 0.0f64;
        let mut occ = 0i64;
        for ((stack, truth), &counted) in self.stacks.iter().zip(&self.truth).zip(&self.counted) {
            if !counted {
                continue;
            }
            match stack.first() {
                None => occ += 1,
                Some(top) => {
                    diff += colour_diff(&top.colour, truth);
                    occ += stack.len() as i64 - 1;
                }
            }
        }
        (diff + occ as f64 * self.occlusion_cost as f64) as f32
    }

    /// Rendered warp; empty pixels are black.
    pub fn image(&self) -> Rgb32FImage {
        Rgb32FImage::from_fn(self.width as u32, self.height as u32, |x, y| {
            let idx = y as usize * self.width + x as usize;
            Rgb(self.stacks[idx].first().map_or([0.0; 3], |s| s.colour))
        })
    }
}
