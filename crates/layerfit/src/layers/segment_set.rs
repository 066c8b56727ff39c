//! Membership bitset over segment ids, used as the fit cache key.

/// Subset of `0..universe` segment ids.
///
/// Equality, ordering and hashing depend only on membership, never on the
/// order segments were inserted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentSet {
    bits: Vec<u64>,
    universe: usize,
}

impl SegmentSet {
    /// Empty set over `universe` segments.
    pub fn new(universe: usize) -> Self {
        Self {
            bits: vec![0; universe.div_ceil(64)],
            universe,
        }
    }

    pub fn singleton(universe: usize, segment: usize) -> Self {
        let mut s = Self::new(universe);
        s.insert(segment);
        s
    }

    pub fn from_segments(universe: usize, segments: impl IntoIterator<Item = usize>) -> Self {
        let mut s = Self::new(universe);
        for seg in segments {
            s.insert(seg);
        }
        s
    }

    /// Number of segment ids the set ranges over.
    pub fn universe(&self) -> usize {
        self.universe
    }

    #[inline]
    pub fn insert(&mut self, segment: usize) {
        assert!(
            segment < self.universe,
            "segment {} outside set universe {}",
            segment,
            self.universe
        );
        self.bits[segment / 64] |= 1u64 << (segment % 64);
    }

    #[inline]
    pub fn remove(&mut self, segment: usize) {
        if segment < self.universe {
            self.bits[segment / 64] &= !(1u64 << (segment % 64));
        }
    }

    #[inline]
    pub fn contains(&self, segment: usize) -> bool {
        segment < self.universe && self.bits[segment / 64] & (1u64 << (segment % 64)) != 0
    }

    /// Number of members.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&w| w == 0)
    }

    /// In-place union with a set over the same universe.
    pub fn union_with(&mut self, other: &SegmentSet) {
        debug_assert_eq!(self.universe, other.universe);
        for (a, b) in self.bits.iter_mut().zip(&other.bits) {
            *a |= *b;
        }
    }

    /// Members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter().enumerate().flat_map(|(wi, &word)| {
            let mut w = word;
            std::iter::from_fn(move || {
                if w == 0 {
                    return None;
                }
                let bit = w.trailing_zeros() as usize;
                w &= w - 1;
                Some(wi * 64 + bit)
            })
        })
    }

    /// Stable 64-bit digest of the membership, used to seed per-set RNGs.
    pub fn fingerprint(&self) -> u64 {
        // FNV-1a over the words.
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for &w in &self.bits {
            for byte in w.to_le_bytes() {
                h ^= byte as u64;
                h = h.wrapping_mul(0x0100_0000_01b3);
            }
        }
        h
    }
}
