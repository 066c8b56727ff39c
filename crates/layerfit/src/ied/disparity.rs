use crate::error::LayersError;
use crate::field::Field;
use crate::surface::{FeatureKind, Surface, HOMOGENEOUS_EPS};

use super::{FeatureStore, Ied};

/// Finite cost charged when exactly one side of a comparison is at
/// infinite depth, or the surface is undefined.
pub const DISPARITY_PENALTY: f32 = 1e3;

/// Disparity source: feature `[mult, disparity]`, i.e. homogeneous depth
/// `(mult, disparity)`. A zero disparity is infinitely far.
#[derive(Debug, Clone)]
pub struct DisparityIed {
    store: FeatureStore,
}

impl DisparityIed {
    /// `mult` converts homogeneous depth to disparity (`disp = mult / depth`).
    pub fn new(disparity: Field<f32>, mult: f32) -> Self {
        let (width, height) = disparity.dims();
        Self {
            store: FeatureStore {
                width,
                height,
                consts: vec![mult],
                fields: vec![disparity],
                mask: None,
            },
        }
    }

    /// Restrict the source to pixels where `mask` is true.
    pub fn with_mask(mut self, mask: Field<bool>) -> Result<Self, LayersError> {
        self.store.set_mask(mask)?;
        Ok(self)
    }
}

impl Ied for DisparityIed {
    fn kind(&self) -> FeatureKind {
        FeatureKind::Disparity
    }

    fn store(&self) -> &FeatureStore {
        &self.store
    }

    /// Disparity difference, with `b` rescaled to the multiplier of `a`.
    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match (a[1] == 0.0, b[1] == 0.0) {
            (true, true) => 0.0,
            (true, false) | (false, true) => DISPARITY_PENALTY,
            (false, false) => {
                if b[0].abs() < HOMOGENEOUS_EPS {
                    return DISPARITY_PENALTY;
                }
                let dist = (a[1] - b[1] * a[0] / b[0]).abs();
                if dist.is_finite() {
                    dist.min(DISPARITY_PENALTY)
                } else {
                    DISPARITY_PENALTY
                }
            }
        }
    }

    fn fit_cost(&self, feature: &[f32], surface: &dyn Surface, x: f32, y: f32) -> f32 {
        let (mult, disp) = (feature[0], feature[1]);
        let z = surface.depth(x, y);
        if z[0].abs() < HOMOGENEOUS_EPS && z[1].abs() < HOMOGENEOUS_EPS {
            return DISPARITY_PENALTY;
        }
        let feat_inf = disp == 0.0;
        let surf_inf = z[1].abs() < HOMOGENEOUS_EPS;
        match (feat_inf, surf_inf) {
            (true, true) => 0.0,
            (true, false) | (false, true) => DISPARITY_PENALTY,
            (false, false) => {
                if z[0].abs() < HOMOGENEOUS_EPS {
                    return DISPARITY_PENALTY;
                }
                let cost = (disp - mult * z[1] / z[0]).abs();
                if cost.is_finite() {
                    cost.min(DISPARITY_PENALTY)
                } else {
                    DISPARITY_PENALTY
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{FrontalSurface, PlaneSurface};
    use approx::assert_relative_eq;

    #[test]
    fn cost_compares_in_disparity_space() {
        let ied = DisparityIed::new(Field::new(2, 2, 0.5), 1.0);
        let mut feat = [0.0; 2];
        assert!(ied.feature(1, 1, &mut feat));
        assert_eq!(feat, [1.0, 0.5]);

        let at_two = PlaneSurface::from_depth_coeffs(0.0, 0.0, 2.0);
        assert_relative_eq!(ied.fit_cost(&feat, &at_two, 0.1, 0.9), 0.0, epsilon = 1e-6);
        let at_four = FrontalSurface::new(0.25);
        assert_relative_eq!(ied.fit_cost(&feat, &at_four, 0.0, 0.0), 0.25, epsilon = 1e-6);
    }

    #[test]
    fn infinite_depth_cases_stay_finite() {
        let ied = DisparityIed::new(Field::new(1, 1, 0.0), 1.0);
        let far = FrontalSurface::new(0.0);
        let near = FrontalSurface::new(0.5);
        assert_eq!(ied.fit_cost(&[1.0, 0.0], &far, 0.0, 0.0), 0.0);
        assert_eq!(ied.fit_cost(&[1.0, 0.0], &near, 0.0, 0.0), DISPARITY_PENALTY);
        assert_eq!(ied.fit_cost(&[1.0, 0.5], &far, 0.0, 0.0), DISPARITY_PENALTY);
        assert_eq!(
            ied.fit_cost(&[1.0, 0.5], &FrontalSurface::undefined(), 0.0, 0.0),
            DISPARITY_PENALTY
        );
    }

    #[test]
    fn mask_hides_pixels() {
        let ied = DisparityIed::new(Field::new(2, 1, 1.0), 1.0)
            .with_mask(Field::from_fn(2, 1, |x, _| x == 1))
            .expect("matching dims");
        assert!(!ied.valid(0, 0));
        assert!(ied.valid(1, 0));
        assert_relative_eq!(ied.distance(&[1.0, 0.2], &[1.0, 0.5]), 0.3, epsilon = 1e-6);
    }

    #[test]
    fn distance_handles_infinite_depth_and_multipliers() {
        let ied = DisparityIed::new(Field::new(1, 1, 0.0), 2.0);
        assert_eq!(ied.distance(&[2.0, 0.0], &[2.0, 0.0]), 0.0);
        assert_eq!(ied.distance(&[2.0, 0.0], &[2.0, 0.5]), DISPARITY_PENALTY);
        assert_eq!(ied.distance(&[2.0, 0.5], &[2.0, 0.0]), DISPARITY_PENALTY);
        assert_relative_eq!(ied.distance(&[2.0, 0.5], &[2.0, 0.75]), 0.25, epsilon = 1e-6);
        // Depth 4 under both multipliers.
        assert_relative_eq!(ied.distance(&[2.0, 0.5], &[1.0, 0.25]), 0.0, epsilon = 1e-6);
        assert_eq!(ied.distance(&[2.0, 0.5], &[0.0, 0.25]), DISPARITY_PENALTY);
    }
}
