//! Planar surfaces: depth affine in internal image coordinates.
//!
//! Stored as a normalised plane `n·(x, y, depth) + d = 0` with `|n| = 1`.

use std::any::Any;

use nalgebra::{Matrix3, Vector2, Vector3, Vector4};

use super::{FeatureKind, Fitter, Surface, SurfaceType, HOMOGENEOUS_EPS};

/// Squared parameter distance below which two planes are considered equal.
const PLANE_EQ_TOL: f32 = 1e-5;
/// Relative eigenvalue floor of the normal equations.
const MIN_CONDITION: f64 = 1e-9;

// ── Surface ────────────────────────────────────────────────────────────────

/// Plane `[n0, n1, n2, d]` with unit normal, or all zeros when undefined.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneSurface {
    plane: Vector4<f32>,
}

impl PlaneSurface {
    /// Plane with `depth = a·x + b·y + c`.
    pub fn from_depth_coeffs(a: f32, b: f32, c: f32) -> Self {
        let norm = (a * a + b * b + 1.0).sqrt();
        Self {
            plane: Vector4::new(a, b, -1.0, c) / norm,
        }
    }

    pub fn undefined() -> Self {
        Self {
            plane: Vector4::zeros(),
        }
    }

    /// Normalised plane vector.
    pub fn plane(&self) -> &Vector4<f32> {
        &self.plane
    }

    /// `(a, b, c)` with `depth = a·x + b·y + c`, or `None` for planes
    /// containing the viewing direction.
    pub fn depth_coeffs(&self) -> Option<[f32; 3]> {
        let den = -self.plane[2];
        if den.abs() < HOMOGENEOUS_EPS {
            return None;
        }
        Some([
            self.plane[0] / den,
            self.plane[1] / den,
            self.plane[3] / den,
        ])
    }
}

impl Surface for PlaneSurface {
    fn name(&self) -> &'static str {
        "plane"
    }

    fn clone_box(&self) -> Box<dyn Surface> {
        Box::new(self.clone())
    }

    fn approx_eq(&self, other: &dyn Surface) -> bool {
        other
            .as_any()
            .downcast_ref::<PlaneSurface>()
            .is_some_and(|o| (self.plane - o.plane).norm_squared() < PLANE_EQ_TOL)
    }

    fn depth(&self, x: f32, y: f32) -> Vector2<f32> {
        let p = &self.plane;
        Vector2::new(p[0] * x + p[1] * y + p[3], -p[2])
    }

    fn depth_delta(&self, _x: f32, _y: f32) -> (Vector2<f32>, Vector2<f32>) {
        let p = &self.plane;
        (Vector2::new(p[0], -p[2]), Vector2::new(p[1], -p[2]))
    }

    fn params(&self) -> Vec<f32> {
        self.plane.iter().copied().collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ── Fitter ─────────────────────────────────────────────────────────────────

/// Linear least squares of depth over `(x, y, 1)`, with needle samples
/// contributing gradient rows.
#[derive(Debug, Clone, Default)]
pub struct PlaneFitter {
    ata: Matrix3<f64>,
    atb: Vector3<f64>,
    disp_count: usize,
    needle_count: usize,
}

impl PlaneFitter {
    fn add_row(&mut self, row: Vector3<f64>, rhs: f64) {
        self.ata += row * row.transpose();
        self.atb += row * rhs;
    }
}

impl Fitter for PlaneFitter {
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn add(&mut self, type_index: usize, x: f32, y: f32, feature: &[f32]) -> bool {
        match type_index {
            0 => {
                if feature[1].abs() >= HOMOGENEOUS_EPS {
                    let depth = (feature[0] / feature[1]) as f64;
                    self.add_row(Vector3::new(x as f64, y as f64, 1.0), depth);
                    self.disp_count += 1;
                }
            }
            1 => {
                let nz = feature[2] as f64;
                if nz.abs() >= HOMOGENEOUS_EPS as f64 {
                    self.add_row(Vector3::new(1.0, 0.0, 0.0), -feature[0] as f64 / nz);
                    self.add_row(Vector3::new(0.0, 1.0, 0.0), -feature[1] as f64 / nz);
                    self.needle_count += 1;
                }
            }
            _ => {}
        }
        self.disp_count + 2 * self.needle_count.min(1) >= 3
    }

    fn extract(&self) -> Option<Box<dyn Surface>> {
        if self.disp_count == 0 {
            return None;
        }
        let eig = self.ata.symmetric_eigen();
        let max = eig.eigenvalues.max();
        let min = eig.eigenvalues.min();
        if !(max > 0.0) || min / max < MIN_CONDITION {
            return None;
        }
        let sol = self.ata.cholesky()?.solve(&self.atb);
        if !sol.iter().all(|v| v.is_finite()) {
            return None;
        }
        Some(Box::new(PlaneSurface::from_depth_coeffs(
            sol[0] as f32,
            sol[1] as f32,
            sol[2] as f32,
        )))
    }
}

// ── Type ───────────────────────────────────────────────────────────────────

/// Three-degree planar surfaces fitted from disparity and needle samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaneSurfaceType;

impl SurfaceType for PlaneSurfaceType {
    fn name(&self) -> &'static str {
        "plane"
    }

    fn new_surface(&self) -> Box<dyn Surface> {
        Box::new(PlaneSurface::undefined())
    }

    fn new_fitter(&self) -> Box<dyn Fitter> {
        Box::new(PlaneFitter::default())
    }

    fn is_member(&self, surface: &dyn Surface) -> bool {
        surface.as_any().is::<PlaneSurface>()
    }

    fn supports(&self, kind: FeatureKind) -> Option<usize> {
        match kind {
            FeatureKind::Disparity => Some(0),
            FeatureKind::Needle => Some(1),
        }
    }

    fn degrees(&self) -> usize {
        3
    }

    fn type_degrees(&self, type_index: usize) -> usize {
        match type_index {
            0 => 1,
            1 => 2,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{depth_ratio, FrontalSurface};
    use approx::assert_relative_eq;

    fn feed_disp(f: &mut PlaneFitter, pts: &[(f32, f32, f32)]) -> bool {
        let mut ready = false;
        for &(x, y, depth) in pts {
            ready = f.add(0, x, y, &[depth, 1.0]);
        }
        ready
    }

    #[test]
    fn exact_plane_is_recovered() {
        let mut f = PlaneFitter::default();
        let pts: Vec<_> = [(-0.5, -0.5), (0.5, -0.4), (0.1, 0.6), (-0.3, 0.2)]
            .iter()
            .map(|&(x, y)| (x, y, 2.0 + 0.3 * x - 0.2 * y))
            .collect();
        assert!(feed_disp(&mut f, &pts));
        let s = f.extract().expect("well-posed fit");
        let plane = s
            .as_any()
            .downcast_ref::<PlaneSurface>()
            .expect("plane surface");
        let [a, b, c] = plane.depth_coeffs().expect("finite plane");
        assert_relative_eq!(a, 0.3, epsilon = 1e-4);
        assert_relative_eq!(b, -0.2, epsilon = 1e-4);
        assert_relative_eq!(c, 2.0, epsilon = 1e-4);

        let d = depth_ratio(&s.depth(0.25, -0.75)).expect("finite depth");
        assert_relative_eq!(d, 2.0 + 0.075 + 0.15, epsilon = 1e-4);
        assert_relative_eq!(plane.plane().xyz().norm(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn collinear_and_duplicate_samples_fail() {
        let mut f = PlaneFitter::default();
        let line: Vec<_> = (0..5).map(|i| (0.1 * i as f32, 0.0, 1.0)).collect();
        assert!(feed_disp(&mut f, &line));
        assert!(f.extract().is_none());

        f.reset();
        assert!(feed_disp(&mut f, &[(0.2, 0.2, 1.0); 4]));
        assert!(f.extract().is_none());
    }

    #[test]
    fn readiness_counts_needles_once() {
        let mut f = PlaneFitter::default();
        assert!(!f.add(1, 0.0, 0.0, &[0.0, 0.0, -1.0]));
        assert!(!f.add(1, 0.0, 0.0, &[0.0, 0.0, -1.0]));
        assert!(f.add(0, 0.0, 0.0, &[3.0, 1.0]));
        // Gradient from the needles plus one depth sample pins the plane.
        let s = f.extract().expect("needle-constrained fit");
        let d = depth_ratio(&s.depth(0.7, -0.3)).expect("finite depth");
        assert_relative_eq!(d, 3.0, epsilon = 1e-4);
    }

    #[test]
    fn infinite_depth_samples_are_ignored() {
        let mut f = PlaneFitter::default();
        assert!(!f.add(0, 0.0, 0.0, &[1.0, 0.0]));
        assert!(f.extract().is_none());
    }

    #[test]
    fn equality_is_approximate_and_type_checked() {
        let a = PlaneSurface::from_depth_coeffs(0.1, 0.2, 1.0);
        let b = PlaneSurface::from_depth_coeffs(0.1, 0.2001, 1.0);
        let c = PlaneSurface::from_depth_coeffs(0.5, 0.2, 1.0);
        assert!(a.approx_eq(&b));
        assert!(!a.approx_eq(&c));
        assert!(!a.approx_eq(&FrontalSurface::new(1.0)));
        assert!(PlaneSurfaceType.is_member(&a));
        assert!(!PlaneSurfaceType.is_member(&FrontalSurface::new(1.0)));
    }
}
