use std::f32::consts::PI;

use nalgebra::Vector3;

use crate::error::LayersError;
use crate::field::Field;
use crate::surface::{FeatureKind, Surface, HOMOGENEOUS_EPS};

use super::{FeatureStore, Ied};

/// Surface orientation source: feature `[nx, ny, nz]`.
#[derive(Debug, Clone)]
pub struct NeedleIed {
    store: FeatureStore,
}

impl NeedleIed {
    /// Build from the three normal component fields, which must share
    /// dimensions.
    pub fn new(nx: Field<f32>, ny: Field<f32>, nz: Field<f32>) -> Result<Self, LayersError> {
        let (w, h) = nx.dims();
        let mut store = FeatureStore::new(w, h);
        store.push_field(nx)?;
        store.push_field(ny)?;
        store.push_field(nz)?;
        Ok(Self { store })
    }

    pub fn with_mask(mut self, mask: Field<bool>) -> Result<Self, LayersError> {
        self.store.set_mask(mask)?;
        Ok(self)
    }
}

fn angle_between(a: &Vector3<f32>, b: &Vector3<f32>) -> f32 {
    let na = a.norm();
    let nb = b.norm();
    if na < HOMOGENEOUS_EPS || nb < HOMOGENEOUS_EPS {
        return PI;
    }
    (a.dot(b) / (na * nb)).clamp(-1.0, 1.0).acos()
}

impl Ied for NeedleIed {
    fn kind(&self) -> FeatureKind {
        FeatureKind::Needle
    }

    fn store(&self) -> &FeatureStore {
        &self.store
    }

    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        angle_between(
            &Vector3::new(a[0], a[1], a[2]),
            &Vector3::new(b[0], b[1], b[2]),
        )
    }

    fn fit_cost(&self, feature: &[f32], surface: &dyn Surface, x: f32, y: f32) -> f32 {
        let (dx, dy) = surface.depth_delta(x, y);
        if dx[1].abs() < HOMOGENEOUS_EPS || dy[1].abs() < HOMOGENEOUS_EPS {
            return PI;
        }
        let normal = Vector3::new(dx[0] / dx[1], dy[0] / dy[1], -1.0);
        angle_between(
            &Vector3::new(feature[0], feature[1], feature[2]),
            &normal,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{FrontalSurface, PlaneSurface};
    use approx::assert_relative_eq;

    #[test]
    fn angle_to_plane_normal() {
        let ied = NeedleIed::new(
            Field::new(1, 1, 0.0),
            Field::new(1, 1, 0.0),
            Field::new(1, 1, -1.0),
        )
        .expect("matching dims");
        let mut feat = [0.0; 3];
        assert!(ied.feature(0, 0, &mut feat));

        let flat = FrontalSurface::new(0.5);
        assert_relative_eq!(ied.fit_cost(&feat, &flat, 0.0, 0.0), 0.0, epsilon = 1e-6);

        // Slope 1 along x tilts the normal by 45 degrees.
        let tilted = PlaneSurface::from_depth_coeffs(1.0, 0.0, 2.0);
        assert_relative_eq!(
            ied.fit_cost(&feat, &tilted, 0.3, 0.1),
            PI / 4.0,
            epsilon = 1e-5
        );
    }

    #[test]
    fn distance_is_symmetric_angle() {
        let ied = NeedleIed::new(
            Field::new(1, 1, 0.0),
            Field::new(1, 1, 0.0),
            Field::new(1, 1, 1.0),
        )
        .expect("matching dims");
        let a = [1.0, 0.0, 0.0];
        let b = [0.0, 2.0, 0.0];
        assert_relative_eq!(ied.distance(&a, &b), PI / 2.0, epsilon = 1e-6);
        assert_relative_eq!(ied.distance(&a, &b), ied.distance(&b, &a));
        assert_eq!(ied.distance(&a, &[0.0, 0.0, 0.0]), PI);
    }

    #[test]
    fn mismatched_fields_are_rejected() {
        let r = NeedleIed::new(
            Field::new(2, 2, 0.0),
            Field::new(2, 1, 0.0),
            Field::new(2, 2, 1.0),
        );
        assert!(r.is_err());
    }
}
