//! Additive memo of fit results keyed by segment membership.

use std::collections::BTreeMap;

use super::fit::FitResult;
use super::segment_set::SegmentSet;

/// Never evicts; lives as long as the engine.
#[derive(Debug, Default)]
pub(crate) struct FitCache {
    entries: BTreeMap<SegmentSet, FitResult>,
}

impl FitCache {
    /// Cache primed with the empty-set entry (no surface, cost 0).
    pub fn new(segment_count: usize) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(SegmentSet::new(segment_count), FitResult::empty());
        Self { entries }
    }

    pub fn get(&self, key: &SegmentSet) -> Option<&FitResult> {
        self.entries.get(key)
    }

    /// Store `result` unless `key` is already present; returns the stored
    /// entry either way.
    pub fn insert(&mut self, key: SegmentSet, result: FitResult) -> &FitResult {
        self.entries.entry(key).or_insert(result)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{FrontalSurface, SurfaceRef};
    use std::rc::Rc;

    #[test]
    fn first_insert_wins_and_empty_set_is_primed() {
        let mut c = FitCache::new(8);
        assert_eq!(c.len(), 1);
        assert_eq!(c.get(&SegmentSet::new(8)).map(|r| r.cost), Some(0.0));

        let s: SurfaceRef = Rc::new(FrontalSurface::new(1.0));
        let key = SegmentSet::from_segments(8, [1, 4]);
        c.insert(
            key.clone(),
            FitResult {
                surface: Some(s.clone()),
                surface_type: Some(0),
                cost: 2.0,
            },
        );
        let again = c.insert(SegmentSet::from_segments(8, [4, 1]), FitResult::failed());
        assert_eq!(again.cost, 2.0);
        assert!(Rc::ptr_eq(
            again.surface.as_ref().expect("cached surface"),
            &s
        ));
        assert_eq!(c.len(), 2);
    }
}
