//! Per-segment caches of valid feature samples, built once at commit.

use crate::field::Field;
use crate::ied::Ied;

/// Samples of one feature source inside one segment.
#[derive(Debug, Clone, Default)]
pub(crate) struct SampleBlock {
    stride: usize,
    xy: Vec<[f32; 2]>,
    features: Vec<f32>,
}

impl SampleBlock {
    fn new(stride: usize) -> Self {
        Self {
            stride,
            xy: Vec::new(),
            features: Vec::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.xy.len()
    }

    /// Internal coordinates and feature vector of sample `i`.
    #[inline]
    pub fn get(&self, i: usize) -> ([f32; 2], &[f32]) {
        let off = i * self.stride;
        (self.xy[i], &self.features[off..off + self.stride])
    }

    pub fn iter(&self) -> impl Iterator<Item = ([f32; 2], &[f32])> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }
}

/// `blocks[source][segment]`.
#[derive(Debug, Default)]
pub(crate) struct SampleTable {
    blocks: Vec<Vec<SampleBlock>>,
}

impl SampleTable {
    /// Scan every pixel once per source, bucketing valid features by segment.
    /// `to_internal` maps pixel coordinates to internal coordinates.
    pub fn build(
        segs: &Field<u32>,
        segment_count: usize,
        sources: &[&dyn Ied],
        to_internal: impl Fn(usize, usize) -> [f32; 2],
    ) -> Self {
        let (w, h) = segs.dims();
        let mut blocks = Vec::with_capacity(sources.len());
        for ied in sources {
            let stride = ied.length();
            let mut per_seg = vec![SampleBlock::new(stride); segment_count];
            let mut feat = vec![0.0f32; stride];
            for y in 0..h {
                for x in 0..w {
                    if !ied.feature(x, y, &mut feat) {
                        continue;
                    }
                    let block = &mut per_seg[*segs.get(x, y) as usize];
                    block.xy.push(to_internal(x, y));
                    block.features.extend_from_slice(&feat);
                }
            }
            blocks.push(per_seg);
        }
        Self { blocks }
    }

    #[inline]
    pub fn block(&self, source: usize, segment: usize) -> &SampleBlock {
        &self.blocks[source][segment]
    }

    /// Total samples across all sources and segments.
    pub fn total(&self) -> usize {
        self.blocks
            .iter()
            .flat_map(|per_seg| per_seg.iter().map(SampleBlock::len))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ied::DisparityIed;

    #[test]
    fn samples_are_bucketed_by_segment_and_mask() {
        let segs = Field::from_fn(4, 2, |x, _| (x / 2) as u32);
        let disp = Field::from_fn(4, 2, |x, y| (x + 10 * y) as f32);
        let ied = DisparityIed::new(disp, 2.0)
            .with_mask(Field::from_fn(4, 2, |x, y| !(x == 3 && y == 1)))
            .expect("matching dims");
        let sources: [&dyn Ied; 1] = [&ied];
        let table = SampleTable::build(&segs, 2, &sources, |x, y| [x as f32, y as f32]);

        assert_eq!(table.block(0, 0).len(), 4);
        assert_eq!(table.block(0, 1).len(), 3);
        assert_eq!(table.total(), 7);

        let (xy, feat) = table.block(0, 1).get(2);
        assert_eq!(xy, [2.0, 1.0]);
        assert_eq!(feat, &[2.0, 12.0]);
    }
}
