//! Fronto-parallel surfaces stored as inverse depth.

use std::any::Any;

use nalgebra::Vector2;

use super::{FeatureKind, Fitter, Surface, SurfaceType, HOMOGENEOUS_EPS};

const FRONTAL_EQ_TOL: f32 = 1e-10;

/// Constant depth `1 / inv_depth`; `inv_depth == 0` is infinitely far.
#[derive(Debug, Clone, PartialEq)]
pub struct FrontalSurface {
    z: Vector2<f32>,
}

impl FrontalSurface {
    pub fn new(inv_depth: f32) -> Self {
        Self {
            z: Vector2::new(1.0, inv_depth),
        }
    }

    pub fn undefined() -> Self {
        Self {
            z: Vector2::zeros(),
        }
    }

    /// Inverse depth, `None` when undefined.
    pub fn inv_depth(&self) -> Option<f32> {
        (self.z[0] != 0.0).then(|| self.z[1] / self.z[0])
    }
}

impl Surface for FrontalSurface {
    fn name(&self) -> &'static str {
        "frontal"
    }

    fn clone_box(&self) -> Box<dyn Surface> {
        Box::new(self.clone())
    }

    fn approx_eq(&self, other: &dyn Surface) -> bool {
        other
            .as_any()
            .downcast_ref::<FrontalSurface>()
            .is_some_and(|o| (self.z - o.z).norm_squared() < FRONTAL_EQ_TOL)
    }

    fn depth(&self, _x: f32, _y: f32) -> Vector2<f32> {
        self.z
    }

    fn depth_delta(&self, _x: f32, _y: f32) -> (Vector2<f32>, Vector2<f32>) {
        (Vector2::new(0.0, 1.0), Vector2::new(0.0, 1.0))
    }

    fn params(&self) -> Vec<f32> {
        vec![self.z[0], self.z[1]]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Mean inverse depth of the disparity samples.
#[derive(Debug, Clone, Default)]
pub struct FrontalFitter {
    sum: f64,
    count: usize,
}

impl Fitter for FrontalFitter {
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn add(&mut self, type_index: usize, _x: f32, _y: f32, feature: &[f32]) -> bool {
        if type_index == 0 && feature[0].abs() >= HOMOGENEOUS_EPS {
            self.sum += (feature[1] / feature[0]) as f64;
            self.count += 1;
        }
        self.count >= 1
    }

    fn extract(&self) -> Option<Box<dyn Surface>> {
        if self.count == 0 {
            return None;
        }
        Some(Box::new(FrontalSurface::new(
            (self.sum / self.count as f64) as f32,
        )))
    }
}

/// One-degree fronto-parallel surfaces fitted from disparity samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrontalSurfaceType;

impl SurfaceType for FrontalSurfaceType {
    fn name(&self) -> &'static str {
        "frontal"
    }

    fn new_surface(&self) -> Box<dyn Surface> {
        Box::new(FrontalSurface::undefined())
    }

    fn new_fitter(&self) -> Box<dyn Fitter> {
        Box::new(FrontalFitter::default())
    }

    fn is_member(&self, surface: &dyn Surface) -> bool {
        surface.as_any().is::<FrontalSurface>()
    }

    fn supports(&self, kind: FeatureKind) -> Option<usize> {
        match kind {
            FeatureKind::Disparity => Some(0),
            FeatureKind::Needle => None,
        }
    }

    fn degrees(&self) -> usize {
        1
    }

    fn type_degrees(&self, type_index: usize) -> usize {
        usize::from(type_index == 0)
    }
}
