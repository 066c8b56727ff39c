//! Result extraction: per-pixel maps and blended point samples.

use nalgebra::Vector2;

use crate::field::Field;
use crate::surface::{depth_ratio, disparity_ratio, SurfaceRef, HOMOGENEOUS_EPS};

use super::Layers;

impl Layers {
    /// Surface of every segment's layer, indexed by segment.
    fn segment_surfaces(&self) -> Vec<Option<&SurfaceRef>> {
        (0..self.segment_count)
            .map(|s| self.forest.head(self.forest.find(s)).surface.as_ref())
            .collect()
    }

    /// Evaluate the layer surface of every pixel at that pixel.
    fn map_pixels<T>(&self, f: impl Fn(Option<&SurfaceRef>, Vector2<f32>) -> T) -> Field<T> {
        let surfaces = self.segment_surfaces();
        Field::from_fn(self.width(), self.height(), |x, y| {
            let surface = surfaces[*self.segs.get(x, y) as usize];
            let z = surface.map_or(Vector2::zeros(), |s| {
                let [ix, iy] = self.int_coord(x as f32, y as f32);
                s.depth(ix, iy)
            });
            f(surface, z)
        })
    }

    /// Depth per pixel, clamped to `limit`; `limit` where undefined or
    /// infinitely far.
    pub fn depth_map(&self, limit: f32) -> Field<f32> {
        self.map_pixels(|s, z| match s.and(depth_ratio(&z)) {
            Some(d) if d.is_finite() => d.min(limit),
            _ => limit,
        })
    }

    /// Disparity `mult / depth` per pixel; 0 where undefined.
    pub fn disp_map(&self, mult: f32) -> Field<f32> {
        self.map_pixels(|s, z| match s.and(disparity_ratio(&z, mult)) {
            Some(d) if d.is_finite() => d,
            _ => 0.0,
        })
    }

    /// Layer head per pixel.
    pub fn layer_map(&self) -> Field<u32> {
        let heads: Vec<u32> = (0..self.segment_count)
            .map(|s| self.forest.find(s) as u32)
            .collect();
        self.segs.map(|&s| heads[s as usize])
    }

    /// Surface type index per pixel, `None` where the layer has no surface.
    pub fn surface_map(&self) -> Field<Option<usize>> {
        let types: Vec<Option<usize>> = (0..self.segment_count)
            .map(|s| self.forest.head(self.forest.find(s)).surface_type)
            .collect();
        self.segs.map(|&s| types[s as usize])
    }

    /// Whether each pixel's layer has a surface that is defined there.
    pub fn validity(&self) -> Field<bool> {
        self.map_pixels(|s, z| {
            s.is_some() && (z[0].abs() >= HOMOGENEOUS_EPS || z[1].abs() >= HOMOGENEOUS_EPS)
        })
    }

    /// Blend the surfaces of the four pixels around `(x, y)`, each sampled at
    /// `(x, y)`, skipping degenerate samples.
    fn blend(&self, x: f32, y: f32, sample: impl Fn(&Vector2<f32>) -> Option<f32>) -> Option<f32> {
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (bx, by) = (x0 as i64, y0 as i64);
        let corners = [
            (bx, by, (1.0 - fx) * (1.0 - fy)),
            (bx + 1, by, fx * (1.0 - fy)),
            (bx, by + 1, (1.0 - fx) * fy),
            (bx + 1, by + 1, fx * fy),
        ];
        let [ix, iy] = self.int_coord(x, y);

        let mut weighted = 0.0f32;
        let mut weight = 0.0f32;
        let mut plain = 0.0f32;
        let mut count = 0usize;
        for (cx, cy, w) in corners {
            let seg = self.segs.get_clamped(cx, cy) as usize;
            let head = self.forest.find(seg);
            let Some(surface) = self.forest.head(head).surface.as_ref() else {
                continue;
            };
            let Some(v) = sample(&surface.depth(ix, iy)).filter(|v| v.is_finite()) else {
                continue;
            };
            weighted += w * v;
            weight += w;
            plain += v;
            count += 1;
        }
        if count == 0 {
            None
        } else if weight > HOMOGENEOUS_EPS {
            Some(weighted / weight)
        } else {
            Some(plain / count as f32)
        }
    }

    /// Bilinearly blended depth at continuous pixel coordinates, clamped to
    /// `limit`; `limit` when no neighbour is defined.
    pub fn depth_at(&self, x: f32, y: f32, limit: f32) -> f32 {
        self.blend(x, y, depth_ratio).map_or(limit, |d| d.min(limit))
    }

    /// Bilinearly blended disparity at continuous pixel coordinates; 0 when
    /// no neighbour is defined.
    pub fn disp_at(&self, x: f32, y: f32, mult: f32) -> f32 {
        self.blend(x, y, |z| disparity_ratio(z, mult)).unwrap_or(0.0)
    }
}
