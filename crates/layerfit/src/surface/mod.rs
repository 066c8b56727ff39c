//! Surface, fitter and surface-type contracts.
//!
//! A [`Surface`] maps internal image coordinates to a homogeneous depth
//! `z = (z0, z1)` with `depth = z0 / z1`. `z1 == 0` encodes infinite depth and
//! `z == (0, 0)` the undefined state. A [`Fitter`] accumulates samples and
//! extracts surfaces; a [`SurfaceType`] ties the two together and declares
//! which feature kinds it can consume.

mod frontal;
mod plane;
mod sphere;

use std::any::Any;
use std::fmt::Debug;
use std::rc::Rc;

use nalgebra::Vector2;

pub use frontal::{FrontalFitter, FrontalSurface, FrontalSurfaceType};
pub use plane::{PlaneFitter, PlaneSurface, PlaneSurfaceType};
pub use sphere::{SphereFitter, SphereSurface, SphereSurfaceType};

/// Shared handle to a fitted surface. The fit cache holds one handle per
/// memoized entry; queries hand out clones of it, so two results for the
/// same segment set are pointer-identical.
pub type SurfaceRef = Rc<dyn Surface>;

/// Homogeneous values whose magnitude is below this are treated as zero.
pub const HOMOGENEOUS_EPS: f32 = 1e-6;

/// Closed set of feature vector kinds produced by feature sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    /// `[mult, disparity]`: homogeneous depth `(mult, disparity)`.
    Disparity,
    /// `[nx, ny, nz]`: unit surface normal, oriented like `(∂z/∂x, ∂z/∂y, -1)`.
    Needle,
}

/// Continuous depth function over internal coordinates.
pub trait Surface: Debug {
    /// Short type name, used in reports.
    fn name(&self) -> &'static str;

    /// Owned copy of this surface.
    fn clone_box(&self) -> Box<dyn Surface>;

    /// Convergence test used by prune refinement. Surfaces of a different
    /// concrete type are never equal.
    fn approx_eq(&self, other: &dyn Surface) -> bool;

    /// Homogeneous depth at `(x, y)`.
    fn depth(&self, x: f32, y: f32) -> Vector2<f32>;

    /// First partial derivatives of depth along x and y, each as a
    /// homogeneous pair whose ratio is the slope.
    fn depth_delta(&self, x: f32, y: f32) -> (Vector2<f32>, Vector2<f32>);

    /// Raw parameters for serialization.
    fn params(&self) -> Vec<f32>;

    fn as_any(&self) -> &dyn Any;
}

/// Sample accumulator producing surfaces of one type.
pub trait Fitter {
    /// Drop all accumulated samples.
    fn reset(&mut self);

    /// Feed one sample. `type_index` is the output index the surface type
    /// reported from [`SurfaceType::supports`] for the sample's feature kind.
    /// Returns `true` once enough data has been added to attempt extraction.
    fn add(&mut self, type_index: usize, x: f32, y: f32, feature: &[f32]) -> bool;

    /// Fit a surface to the accumulated samples. Returns `None` on
    /// degenerate or insufficient data. May be called repeatedly.
    fn extract(&self) -> Option<Box<dyn Surface>>;
}

/// Factory and capability descriptor of a surface parameterization.
pub trait SurfaceType {
    fn name(&self) -> &'static str;

    /// A surface in the undefined state.
    fn new_surface(&self) -> Box<dyn Surface>;

    fn new_fitter(&self) -> Box<dyn Fitter>;

    /// Whether `surface` was produced by this type.
    fn is_member(&self, surface: &dyn Surface) -> bool;

    /// Output index under which features of `kind` are fed to the fitter,
    /// or `None` when the kind is not consumed.
    fn supports(&self, kind: FeatureKind) -> Option<usize>;

    /// Degrees of freedom of a full fit.
    fn degrees(&self) -> usize;

    /// Degrees of freedom one sample of output index `type_index` provides.
    fn type_degrees(&self, type_index: usize) -> usize;
}

/// Depth `z0 / z1`, or `None` when the denominator vanishes.
#[inline]
pub fn depth_ratio(z: &Vector2<f32>) -> Option<f32> {
    if z[1].abs() < HOMOGENEOUS_EPS {
        None
    } else {
        Some(z[0] / z[1])
    }
}

/// Disparity `mult * z1 / z0`, or `None` when the denominator vanishes.
#[inline]
pub fn disparity_ratio(z: &Vector2<f32>, mult: f32) -> Option<f32> {
    if z[0].abs() < HOMOGENEOUS_EPS {
        None
    } else {
        Some(mult * z[1] / z[0])
    }
}

/// Shallow pointer identity of two shared surfaces.
#[inline]
pub fn same_surface(a: Option<&SurfaceRef>, b: Option<&SurfaceRef>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const (),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratios_reject_vanishing_denominators() {
        assert_eq!(depth_ratio(&Vector2::new(2.0, 0.0)), None);
        assert_eq!(depth_ratio(&Vector2::new(3.0, 1.5)), Some(2.0));
        assert_eq!(disparity_ratio(&Vector2::new(0.0, 1.0), 1.0), None);
        assert_eq!(disparity_ratio(&Vector2::new(4.0, 1.0), 2.0), Some(0.5));
    }

    #[test]
    fn identity_is_by_pointer() {
        let a: SurfaceRef = Rc::new(FrontalSurface::new(0.5));
        let b: SurfaceRef = Rc::new(FrontalSurface::new(0.5));
        assert!(same_surface(Some(&a), Some(&a.clone())));
        assert!(!same_surface(Some(&a), Some(&b)));
        assert!(same_surface(None, None));
        assert!(!same_surface(Some(&a), None));
    }
}
