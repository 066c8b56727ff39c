//! Image-extracted data: per-pixel feature vector sources.
//!
//! A source combines per-image constants and per-pixel fields into one
//! fixed-length vector (constants first, then field values) and defines how
//! far a feature lies from another feature or from a hypothesized surface.

mod disparity;
mod needle;

pub use disparity::{DisparityIed, DISPARITY_PENALTY};
pub use needle::NeedleIed;

use crate::error::LayersError;
use crate::field::Field;
use crate::surface::{FeatureKind, Surface};

/// Storage shared by feature sources: constants, variable fields and an
/// optional validity mask (absent means every pixel is valid).
#[derive(Debug, Clone)]
pub struct FeatureStore {
    width: usize,
    height: usize,
    consts: Vec<f32>,
    fields: Vec<Field<f32>>,
    mask: Option<Field<bool>>,
}

impl FeatureStore {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            consts: Vec::new(),
            fields: Vec::new(),
            mask: None,
        }
    }

    pub fn push_const(&mut self, value: f32) {
        self.consts.push(value);
    }

    pub fn push_field(&mut self, field: Field<f32>) -> Result<(), LayersError> {
        self.check_dims(field.dims())?;
        self.fields.push(field);
        Ok(())
    }

    pub fn set_mask(&mut self, mask: Field<bool>) -> Result<(), LayersError> {
        self.check_dims(mask.dims())?;
        self.mask = Some(mask);
        Ok(())
    }

    fn check_dims(&self, got: (usize, usize)) -> Result<(), LayersError> {
        if got != (self.width, self.height) {
            return Err(LayersError::DimensionMismatch {
                expected: (self.width, self.height),
                got,
            });
        }
        Ok(())
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Feature vector length.
    pub fn length(&self) -> usize {
        self.consts.len() + self.fields.len()
    }

    pub fn valid(&self, x: usize, y: usize) -> bool {
        self.mask.as_ref().map_or(true, |m| *m.get(x, y))
    }

    /// Write the feature at `(x, y)` into `out` (at least [`Self::length`]
    /// long). Returns `false` for masked pixels.
    pub fn feature(&self, x: usize, y: usize, out: &mut [f32]) -> bool {
        if !self.valid(x, y) {
            return false;
        }
        let nc = self.consts.len();
        out[..nc].copy_from_slice(&self.consts);
        for (slot, field) in out[nc..].iter_mut().zip(&self.fields) {
            *slot = *field.get(x, y);
        }
        true
    }
}

/// Feature source contract.
///
/// `fit_cost` must be zero for perfect agreement, non-decreasing with
/// disagreement and always finite; it is compared against the source's
/// outlier cutoff to classify inliers.
pub trait Ied {
    /// Kind of vector this source produces.
    fn kind(&self) -> FeatureKind;

    fn store(&self) -> &FeatureStore;

    fn length(&self) -> usize {
        self.store().length()
    }

    fn width(&self) -> usize {
        self.store().width()
    }

    fn height(&self) -> usize {
        self.store().height()
    }

    fn valid(&self, x: usize, y: usize) -> bool {
        self.store().valid(x, y)
    }

    fn feature(&self, x: usize, y: usize, out: &mut [f32]) -> bool {
        self.store().feature(x, y, out)
    }

    /// Symmetric feature-space distance.
    fn distance(&self, a: &[f32], b: &[f32]) -> f32;

    /// Disagreement between `feature` and `surface` at internal
    /// coordinates `(x, y)`.
    fn fit_cost(&self, feature: &[f32], surface: &dyn Surface, x: f32, y: f32) -> f32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_layout_is_consts_then_fields() {
        let mut s = FeatureStore::new(3, 2);
        s.push_const(7.0);
        s.push_field(Field::from_fn(3, 2, |x, y| (x + 3 * y) as f32))
            .expect("matching dims");
        s.push_field(Field::new(3, 2, -1.0)).expect("matching dims");
        assert_eq!(s.length(), 3);

        let mut out = [0.0; 3];
        assert!(s.feature(2, 1, &mut out));
        assert_eq!(out, [7.0, 5.0, -1.0]);
    }

    #[test]
    fn mask_and_dimension_checks() {
        let mut s = FeatureStore::new(2, 2);
        assert!(matches!(
            s.push_field(Field::new(3, 2, 0.0)),
            Err(LayersError::DimensionMismatch { .. })
        ));
        s.set_mask(Field::from_fn(2, 2, |x, _| x == 0))
            .expect("matching dims");
        let mut out: [f32; 0] = [];
        assert!(s.feature(0, 1, &mut out));
        assert!(!s.feature(1, 1, &mut out));
        assert!(!s.valid(1, 0));
    }
}
