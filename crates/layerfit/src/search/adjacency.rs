use std::collections::BTreeSet;

use crate::field::Field;
use crate::layers::Layers;

/// 4-connected segment adjacency of a fixed segmentation.
#[derive(Debug, Clone)]
pub struct SegmentAdjacency {
    neighbours: Vec<Vec<usize>>,
}

impl SegmentAdjacency {
    pub fn new(segs: &Field<u32>, segment_count: usize) -> Self {
        let mut sets = vec![BTreeSet::new(); segment_count];
        let (w, h) = segs.dims();
        let mut link = |a: u32, b: u32| {
            if a != b {
                sets[a as usize].insert(b as usize);
                sets[b as usize].insert(a as usize);
            }
        };
        for y in 0..h {
            for x in 0..w {
                let s = *segs.get(x, y);
                if x + 1 < w {
                    link(s, *segs.get(x + 1, y));
                }
                if y + 1 < h {
                    link(s, *segs.get(x, y + 1));
                }
            }
        }
        Self {
            neighbours: sets.into_iter().map(|s| s.into_iter().collect()).collect(),
        }
    }

    pub fn from_layers(layers: &Layers) -> Self {
        Self::new(layers.segmentation(), layers.segment_count())
    }

    /// Segments sharing a pixel edge with `seg`, ascending.
    pub fn neighbours(&self, seg: usize) -> &[usize] {
        &self.neighbours[seg]
    }

    /// Heads of the layers adjacent to the layer headed by `head`.
    pub fn layer_neighbours(&self, layers: &Layers, head: usize) -> BTreeSet<usize> {
        let mut out = BTreeSet::new();
        for seg in layers.layer_members(head).iter() {
            for &n in &self.neighbours[seg] {
                let h = layers.seg_to_layer(n);
                if h != head {
                    out.insert(h);
                }
            }
        }
        out
    }

    /// Every pair of adjacent layer heads once, as `(lower, higher)`.
    pub fn layer_edges(&self, layers: &Layers) -> BTreeSet<(usize, usize)> {
        let mut out = BTreeSet::new();
        for (seg, ns) in self.neighbours.iter().enumerate() {
            let hs = layers.seg_to_layer(seg);
            for &n in ns {
                let hn = layers.seg_to_layer(n);
                if hs < hn {
                    out.insert((hs, hn));
                }
            }
        }
        out
    }
}
