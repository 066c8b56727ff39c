//! Half-sphere surfaces: a flat base at depth `cz` with a spherical cap of
//! radius `r` around `(cx, cy)`, stretched along depth by a signed scale.
//!
//! The fitter minimises disparity and needle residuals with a damped
//! Gauss-Newton (Levenberg-Marquardt) loop over `[cx, cy, cz, r, scale]`,
//! restarted from a small grid of initial guesses.

use std::any::Any;

use nalgebra::{Matrix5, Vector2, Vector3, Vector5};

use super::{FeatureKind, Fitter, Surface, SurfaceType, HOMOGENEOUS_EPS};

/// Squared location distance below which two spheres are considered equal.
const SPHERE_EQ_TOL: f32 = 1e-5;
/// Samples closer than this to their centroid carry no shape information.
const MIN_SPREAD: f64 = 1e-6;

const LM_MAX_ITERS: usize = 100;
const LM_INITIAL_LAMBDA: f64 = 1e-3;
const LM_LAMBDA_FACTOR: f64 = 10.0;
const LM_MIN_LAMBDA: f64 = 1e-9;
const LM_MAX_LAMBDA: f64 = 1e9;
const LM_MIN_STEP: f64 = 1e-10;
const LM_MIN_COST: f64 = 1e-24;

/// Initial radius as a fraction of the sample spread.
const RADIUS_STARTS: [f64; 3] = [0.25, 0.5, 1.0];
const SCALE_STARTS: [f64; 2] = [1.0, -1.0];

// ── Surface ────────────────────────────────────────────────────────────────

/// Sphere cap with location `(cx, cy, cz)`, radius and depth scale. A zero
/// radius marks the undefined state.
#[derive(Debug, Clone, PartialEq)]
pub struct SphereSurface {
    loc: Vector3<f32>,
    radius: f32,
    scale: f32,
}

impl SphereSurface {
    pub fn new(loc: Vector3<f32>, radius: f32, scale: f32) -> Self {
        Self {
            loc,
            radius: radius.abs(),
            scale,
        }
    }

    pub fn undefined() -> Self {
        Self {
            loc: Vector3::zeros(),
            radius: 0.0,
            scale: 0.0,
        }
    }

    pub fn is_defined(&self) -> bool {
        self.radius > 0.0
    }

    /// `(cx, cy, cz)`: cap centre and base depth.
    pub fn location(&self) -> &Vector3<f32> {
        &self.loc
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }
}

impl Surface for SphereSurface {
    fn name(&self) -> &'static str {
        "sphere"
    }

    fn clone_box(&self) -> Box<dyn Surface> {
        Box::new(self.clone())
    }

    fn approx_eq(&self, other: &dyn Surface) -> bool {
        other
            .as_any()
            .downcast_ref::<SphereSurface>()
            .is_some_and(|o| {
                (self.loc - o.loc).norm_squared() < SPHERE_EQ_TOL
                    && (self.radius - o.radius).abs() < SPHERE_EQ_TOL
                    && (self.scale - o.scale).abs() < SPHERE_EQ_TOL
            })
    }

    fn depth(&self, x: f32, y: f32) -> Vector2<f32> {
        if !self.is_defined() {
            return Vector2::zeros();
        }
        let dist_sq = (x - self.loc[0]).powi(2) + (y - self.loc[1]).powi(2);
        let rad_sq = self.radius * self.radius;
        if dist_sq < rad_sq {
            Vector2::new(self.loc[2] + self.scale * (rad_sq - dist_sq).sqrt(), 1.0)
        } else {
            Vector2::new(self.loc[2], 1.0)
        }
    }

    fn depth_delta(&self, x: f32, y: f32) -> (Vector2<f32>, Vector2<f32>) {
        if !self.is_defined() {
            return (Vector2::zeros(), Vector2::zeros());
        }
        let dx = x - self.loc[0];
        let dy = y - self.loc[1];
        let dist_sq = dx * dx + dy * dy;
        let rad_sq = self.radius * self.radius;
        if dist_sq < rad_sq {
            let h = (rad_sq - dist_sq).sqrt();
            (
                Vector2::new(-self.scale * dx, h),
                Vector2::new(-self.scale * dy, h),
            )
        } else {
            (Vector2::new(0.0, 1.0), Vector2::new(0.0, 1.0))
        }
    }

    fn params(&self) -> Vec<f32> {
        vec![self.loc[0], self.loc[1], self.loc[2], self.radius, self.scale]
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ── Fitter ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Sample {
    Depth { x: f64, y: f64, depth: f64 },
    Needle { x: f64, y: f64, normal: Vector3<f64> },
}

/// Residual of one sample under `p = [cx, cy, cz, r, scale]`.
///
/// Depth samples outside the cap footprint are charged their distance to
/// the rim on top of the base depth error, which pulls the cap over them.
/// Needles are compared by angle with the surface normal
/// `(∂z/∂x, ∂z/∂y, -1)`, which is `(0, 0, -1)` off the cap.
fn residual(p: &Vector5<f64>, sample: &Sample) -> f64 {
    match *sample {
        Sample::Depth { x, y, depth } => {
            let dist_sq = (x - p[0]).powi(2) + (y - p[1]).powi(2);
            let rad_sq = p[3] * p[3];
            if dist_sq < rad_sq {
                depth - (p[2] + p[4] * (rad_sq - dist_sq).sqrt())
            } else {
                let err = depth - p[2];
                let outside = dist_sq.sqrt() - p[3].abs();
                if err < 0.0 {
                    err - outside
                } else {
                    err + outside
                }
            }
        }
        Sample::Needle { x, y, normal } => {
            let dx = x - p[0];
            let dy = y - p[1];
            let dist_sq = dx * dx + dy * dy;
            let rad_sq = p[3] * p[3];
            let expected = if dist_sq < rad_sq {
                let h = (rad_sq - dist_sq).sqrt();
                Vector3::new(-p[4] * dx / h, -p[4] * dy / h, -1.0)
            } else {
                Vector3::new(0.0, 0.0, -1.0)
            };
            let den = expected.norm() * normal.norm();
            if !(den > 0.0) {
                return std::f64::consts::PI;
            }
            (expected.dot(&normal) / den).clamp(-1.0, 1.0).acos()
        }
    }
}

/// Sphere fit from depth (via disparity) and needle samples.
#[derive(Debug, Clone, Default)]
pub struct SphereFitter {
    samples: Vec<Sample>,
    disp_count: usize,
    needle_count: usize,
}

impl SphereFitter {
    fn ready(&self) -> bool {
        self.disp_count >= 1 && self.disp_count + self.needle_count >= 5
    }

    fn cost(&self, p: &Vector5<f64>) -> f64 {
        self.samples.iter().map(|s| residual(p, s).powi(2)).sum()
    }

    /// `JᵀJ` and `Jᵀe` with a central-difference Jacobian.
    fn normal_equations(&self, p: &Vector5<f64>) -> (Matrix5<f64>, Vector5<f64>) {
        let mut plus = [*p; 5];
        let mut minus = [*p; 5];
        let mut step = [0.0; 5];
        for k in 0..5 {
            step[k] = 1e-6 * (1.0 + p[k].abs());
            plus[k][k] += step[k];
            minus[k][k] -= step[k];
        }

        let mut jtj = Matrix5::zeros();
        let mut jte = Vector5::zeros();
        for s in &self.samples {
            let e = residual(p, s);
            let row = Vector5::from_fn(|k, _| {
                (residual(&plus[k], s) - residual(&minus[k], s)) / (2.0 * step[k])
            });
            jtj += row * row.transpose();
            jte += row * e;
        }
        (jtj, jte)
    }

    fn refine(&self, mut p: Vector5<f64>) -> (Vector5<f64>, f64) {
        let mut cost = self.cost(&p);
        let mut lambda = LM_INITIAL_LAMBDA;
        for _ in 0..LM_MAX_ITERS {
            let (jtj, jte) = self.normal_equations(&p);
            loop {
                let mut a = jtj;
                for i in 0..5 {
                    a[(i, i)] += lambda * (jtj[(i, i)] + 1e-12);
                }
                let Some(delta) = a.lu().solve(&(-jte)) else {
                    return (p, cost);
                };
                let next = p + delta;
                let next_cost = self.cost(&next);
                if next_cost < cost {
                    p = next;
                    cost = next_cost;
                    lambda = (lambda / LM_LAMBDA_FACTOR).max(LM_MIN_LAMBDA);
                    if delta.norm() < LM_MIN_STEP || cost < LM_MIN_COST {
                        return (p, cost);
                    }
                    break;
                }
                lambda *= LM_LAMBDA_FACTOR;
                if lambda > LM_MAX_LAMBDA {
                    return (p, cost);
                }
            }
        }
        (p, cost)
    }

    /// Initial guesses: centroid for the cap centre, the farthest or the
    /// mean depth for the base, a few radii within the sample spread and
    /// both cap orientations.
    fn starts(&self) -> Option<Vec<Vector5<f64>>> {
        let n = self.samples.len() as f64;
        let (mut cx, mut cy) = (0.0, 0.0);
        for s in &self.samples {
            let (Sample::Depth { x, y, .. } | Sample::Needle { x, y, .. }) = *s;
            cx += x;
            cy += y;
        }
        cx /= n;
        cy /= n;

        let mut spread_sq: f64 = 0.0;
        let mut far = (f64::NEG_INFINITY, 0.0);
        let mut mean_depth = 0.0;
        for s in &self.samples {
            let (Sample::Depth { x, y, .. } | Sample::Needle { x, y, .. }) = *s;
            let d = (x - cx).powi(2) + (y - cy).powi(2);
            spread_sq = spread_sq.max(d);
            if let Sample::Depth { depth, .. } = *s {
                mean_depth += depth;
                if d > far.0 {
                    far = (d, depth);
                }
            }
        }
        mean_depth /= self.disp_count as f64;
        let spread = spread_sq.sqrt();
        if spread < MIN_SPREAD {
            return None;
        }

        let mut starts = Vec::with_capacity(2 * RADIUS_STARTS.len() * SCALE_STARTS.len());
        for cz in [far.1, mean_depth] {
            for f in RADIUS_STARTS {
                for scale in SCALE_STARTS {
                    starts.push(Vector5::new(cx, cy, cz, f * spread, scale));
                }
            }
        }
        Some(starts)
    }
}

impl Fitter for SphereFitter {
    fn reset(&mut self) {
        self.samples.clear();
        self.disp_count = 0;
        self.needle_count = 0;
    }

    fn add(&mut self, type_index: usize, x: f32, y: f32, feature: &[f32]) -> bool {
        let (x, y) = (x as f64, y as f64);
        match type_index {
            0 => {
                if feature[1].abs() >= HOMOGENEOUS_EPS {
                    self.samples.push(Sample::Depth {
                        x,
                        y,
                        depth: (feature[0] / feature[1]) as f64,
                    });
                    self.disp_count += 1;
                }
            }
            1 => {
                let normal = Vector3::new(feature[0], feature[1], feature[2]).cast::<f64>();
                if normal.norm() >= HOMOGENEOUS_EPS as f64 {
                    self.samples.push(Sample::Needle { x, y, normal });
                    self.needle_count += 1;
                }
            }
            _ => {}
        }
        self.ready()
    }

    fn extract(&self) -> Option<Box<dyn Surface>> {
        if !self.ready() {
            return None;
        }
        let mut best: Option<(Vector5<f64>, f64)> = None;
        for start in self.starts()? {
            let (p, cost) = self.refine(start);
            if !cost.is_finite() || !p.iter().all(|v| v.is_finite()) {
                continue;
            }
            if best.as_ref().map_or(true, |b| cost < b.1) {
                best = Some((p, cost));
            }
        }
        let (p, _) = best?;
        if p[3].abs() < MIN_SPREAD {
            return None;
        }
        let p = p.cast::<f32>();
        Some(Box::new(SphereSurface::new(
            Vector3::new(p[0], p[1], p[2]),
            p[3],
            p[4],
        )))
    }
}

// ── Type ───────────────────────────────────────────────────────────────────

/// Five-degree sphere-cap surfaces fitted from disparity and needle samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct SphereSurfaceType;

impl SurfaceType for SphereSurfaceType {
    fn name(&self) -> &'static str {
        "sphere"
    }

    fn new_surface(&self) -> Box<dyn Surface> {
        Box::new(SphereSurface::undefined())
    }

    fn new_fitter(&self) -> Box<dyn Fitter> {
        Box::new(SphereFitter::default())
    }

    fn is_member(&self, surface: &dyn Surface) -> bool {
        surface.as_any().is::<SphereSurface>()
    }

    fn supports(&self, kind: FeatureKind) -> Option<usize> {
        match kind {
            FeatureKind::Disparity => Some(0),
            FeatureKind::Needle => Some(1),
        }
    }

    fn degrees(&self) -> usize {
        5
    }

    fn type_degrees(&self, type_index: usize) -> usize {
        usize::from(type_index <= 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{depth_ratio, FrontalSurface, PlaneSurface};
    use approx::assert_relative_eq;

    /// Samples on an 11×11 grid restricted to 95% of the cap footprint.
    fn cap_samples(truth: &SphereSurface) -> Vec<(f32, f32)> {
        let [cx, cy, _] = [truth.loc[0], truth.loc[1], truth.loc[2]];
        let r = truth.radius;
        let mut pts = Vec::new();
        for i in 0..11 {
            for j in 0..11 {
                let x = cx + r * (-1.0 + 0.2 * i as f32);
                let y = cy + r * (-1.0 + 0.2 * j as f32);
                if (x - cx).powi(2) + (y - cy).powi(2) < (0.95 * r).powi(2) {
                    pts.push((x, y));
                }
            }
        }
        pts
    }

    fn fit_exact(truth: &SphereSurface) -> SphereSurface {
        let mut f = SphereFitter::default();
        for (x, y) in cap_samples(truth) {
            let z = truth.depth(x, y);
            // Disparity feature `[mult, disp]` with mult 1.
            f.add(0, x, y, &[1.0, z[1] / z[0]]);
        }
        f.extract()
            .and_then(|s| s.as_any().downcast_ref::<SphereSurface>().cloned())
            .expect("well-posed sphere fit")
    }

    #[test]
    fn exact_cap_is_recovered() {
        for truth in [
            SphereSurface::new(Vector3::new(0.1, -0.05, 2.0), 0.5, -0.8),
            SphereSurface::new(Vector3::new(0.2, 0.1, 1.5), 0.4, 1.2),
        ] {
            let fit = fit_exact(&truth);
            assert_relative_eq!(fit.location()[0], truth.location()[0], epsilon = 1e-3);
            assert_relative_eq!(fit.location()[1], truth.location()[1], epsilon = 1e-3);
            assert_relative_eq!(fit.location()[2], truth.location()[2], epsilon = 1e-3);
            assert_relative_eq!(fit.radius(), truth.radius(), epsilon = 1e-3);
            assert_relative_eq!(fit.scale(), truth.scale(), epsilon = 1e-3);

            let (x, y) = (truth.loc[0] + 0.1, truth.loc[1] - 0.1);
            let want = depth_ratio(&truth.depth(x, y)).expect("finite depth");
            let got = depth_ratio(&fit.depth(x, y)).expect("finite depth");
            assert_relative_eq!(got, want, epsilon = 1e-3);
        }
    }

    #[test]
    fn coincident_or_too_few_samples_fail() {
        let mut f = SphereFitter::default();
        for _ in 0..4 {
            assert!(!f.add(0, 0.2, 0.2, &[1.0, 0.5]));
        }
        assert!(f.extract().is_none());
        assert!(f.add(0, 0.2, 0.2, &[1.0, 0.5]));
        // Ready, but every sample sits on one pixel.
        assert!(f.extract().is_none());

        f.reset();
        for i in 0..6 {
            f.add(1, 0.1 * i as f32, 0.0, &[0.0, 0.0, -1.0]);
        }
        // Needles alone cannot place the base depth.
        assert!(f.extract().is_none());
    }

    #[test]
    fn depth_is_flat_outside_the_cap() {
        let s = SphereSurface::new(Vector3::new(0.0, 0.0, 3.0), 0.5, -1.0);
        assert_relative_eq!(depth_ratio(&s.depth(0.0, 0.0)).expect("finite"), 2.5);
        assert_relative_eq!(depth_ratio(&s.depth(0.9, 0.0)).expect("finite"), 3.0);
        let (dx, dy) = s.depth_delta(0.9, 0.0);
        assert_eq!(dx, Vector2::new(0.0, 1.0));
        assert_eq!(dy, Vector2::new(0.0, 1.0));

        // Slope of z = 3 - sqrt(0.25 - x²) at x = 0.3 is 0.3 / 0.4.
        let (dx, _) = s.depth_delta(0.3, 0.0);
        assert_relative_eq!(dx[0] / dx[1], 0.75, epsilon = 1e-5);

        assert_eq!(SphereSurfaceType.new_surface().depth(0.0, 0.0), Vector2::zeros());
    }

    #[test]
    fn equality_and_membership_are_type_checked() {
        let a = SphereSurface::new(Vector3::new(0.1, 0.2, 2.0), 0.5, 1.0);
        let b = SphereSurface::new(Vector3::new(0.1, 0.2001, 2.0), 0.5, 1.0);
        let c = SphereSurface::new(Vector3::new(0.1, 0.2, 2.0), 0.6, 1.0);
        assert!(a.approx_eq(&b));
        assert!(!a.approx_eq(&c));
        assert!(!a.approx_eq(&PlaneSurface::from_depth_coeffs(0.0, 0.0, 2.0)));

        let t = SphereSurfaceType;
        assert!(t.is_member(&a));
        assert!(!t.is_member(&FrontalSurface::new(0.5)));
        assert_eq!(t.supports(FeatureKind::Disparity), Some(0));
        assert_eq!(t.supports(FeatureKind::Needle), Some(1));
        assert_eq!(t.degrees(), 5);
        assert_eq!(t.type_degrees(1), 1);
        assert_eq!(t.type_degrees(2), 0);
    }
}
