//! Segment → layer partition as an index-based union-find forest.
//!
//! Each segment owns one node. A node without a parent is a layer head and
//! carries the layer's surface, cost, pixel count, member count and dirty
//! flag. Parent links are `Cell`s so lookups can compress paths through a
//! shared reference.

use std::cell::Cell;

use crate::surface::SurfaceRef;

/// Per-layer data, meaningful only on heads.
#[derive(Debug, Clone)]
pub(crate) struct HeadData {
    pub surface: Option<SurfaceRef>,
    pub surface_type: Option<usize>,
    pub cost: f32,
    /// Pixel count of the layer.
    pub size: usize,
    /// Number of member segments.
    pub members: usize,
    pub dirty: bool,
}

#[derive(Debug)]
struct Node {
    parent: Cell<Option<usize>>,
    head: HeadData,
}

#[derive(Debug)]
pub(crate) struct LayerForest {
    nodes: Vec<Node>,
    seg_size: Vec<usize>,
    heads: usize,
}

impl LayerForest {
    /// Every segment starts as its own clean, surface-less head.
    pub fn new(seg_size: Vec<usize>) -> Self {
        let nodes = seg_size
            .iter()
            .map(|&size| Node {
                parent: Cell::new(None),
                head: HeadData {
                    surface: None,
                    surface_type: None,
                    cost: 0.0,
                    size,
                    members: 1,
                    dirty: false,
                },
            })
            .collect();
        let heads = seg_size.len();
        Self {
            nodes,
            seg_size,
            heads,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn head_count(&self) -> usize {
        self.heads
    }

    pub fn seg_size(&self, seg: usize) -> usize {
        self.seg_size[seg]
    }

    pub fn is_head(&self, seg: usize) -> bool {
        self.nodes[seg].parent.get().is_none()
    }

    /// Head of the layer containing `seg`, compressing the path walked.
    pub fn find(&self, seg: usize) -> usize {
        let mut root = seg;
        while let Some(p) = self.nodes[root].parent.get() {
            root = p;
        }
        let mut cur = seg;
        while let Some(p) = self.nodes[cur].parent.get() {
            if p != root {
                self.nodes[cur].parent.set(Some(root));
            }
            cur = p;
        }
        root
    }

    pub fn head(&self, head: usize) -> &HeadData {
        debug_assert!(self.is_head(head));
        &self.nodes[head].head
    }

    pub fn head_mut(&mut self, head: usize) -> &mut HeadData {
        debug_assert!(self.is_head(head));
        &mut self.nodes[head].head
    }

    /// Heads in ascending segment order.
    pub fn heads(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.nodes.len()).filter(|&s| self.is_head(s))
    }

    /// Detach `seg` into a singleton layer. Returns the head of what remains
    /// of its former layer, or `None` if `seg` was alone.
    ///
    /// When `seg` heads a multi-member layer a sibling is promoted, which
    /// needs a scan over every segment.
    pub fn detach(&mut self, seg: usize) -> Option<usize> {
        let head = self.find(seg);
        if self.nodes[head].head.members == 1 {
            return None;
        }
        // Point every segment straight at its head so nothing routes
        // through `seg` once it leaves.
        for s in 0..self.nodes.len() {
            self.find(s);
        }
        let seg_size = self.seg_size[seg];

        let remaining = if head == seg {
            let promoted = (0..self.nodes.len())
                .find(|&s| s != seg && self.nodes[s].parent.get() == Some(seg))?;
            for s in 0..self.nodes.len() {
                if s != promoted && self.nodes[s].parent.get() == Some(seg) {
                    self.nodes[s].parent.set(Some(promoted));
                }
            }
            let mut data = self.nodes[seg].head.clone();
            data.size -= seg_size;
            data.members -= 1;
            data.dirty = true;
            self.nodes[promoted].parent.set(None);
            self.nodes[promoted].head = data;
            promoted
        } else {
            self.nodes[seg].parent.set(None);
            let h = &mut self.nodes[head].head;
            h.size -= seg_size;
            h.members -= 1;
            h.dirty = true;
            head
        };

        self.nodes[seg].head = HeadData {
            surface: None,
            surface_type: None,
            cost: 0.0,
            size: seg_size,
            members: 1,
            dirty: true,
        };
        self.heads += 1;
        Some(remaining)
    }

    /// Move `seg` into the layer headed by `find(layer)`.
    /// Returns `(old_head_after_move, new_head)`; the former is `None` when
    /// `seg` was alone in its layer.
    pub fn set_seg_layer(&mut self, seg: usize, layer: usize) -> (Option<usize>, usize) {
        let target = self.find(layer);
        let source = self.find(seg);
        if target == source {
            return (Some(source), target);
        }
        let remaining = self.detach(seg);
        self.nodes[seg].parent.set(Some(target));
        self.heads -= 1;
        let seg_size = self.seg_size[seg];
        let t = &mut self.nodes[target].head;
        t.size += seg_size;
        t.members += 1;
        t.dirty = true;
        (remaining, target)
    }

    /// Union the layers of `a` and `b`; the larger layer's head survives and
    /// provisionally keeps the lower-cost of the two surfaces. Returns the
    /// surviving head.
    pub fn merge(&mut self, a: usize, b: usize) -> usize {
        let ha = self.find(a);
        let hb = self.find(b);
        if ha == hb {
            return ha;
        }
        let (keep, child) = if self.nodes[hb].head.members > self.nodes[ha].head.members {
            (hb, ha)
        } else {
            (ha, hb)
        };
        let child_data = self.nodes[child].head.clone();
        self.nodes[child].parent.set(Some(keep));
        self.heads -= 1;

        let k = &mut self.nodes[keep].head;
        if child_data.cost < k.cost {
            k.surface = child_data.surface;
            k.surface_type = child_data.surface_type;
            k.cost = child_data.cost;
        }
        k.size += child_data.size;
        k.members += child_data.members;
        k.dirty = true;
        keep
    }
}
