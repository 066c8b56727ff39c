//! Local search over the layer partition, driven by a [`crate::LayerScore`].

mod adjacency;
mod grow;
mod merge;

pub use adjacency::SegmentAdjacency;
pub use grow::{GrowReport, LayerGrow};
pub use merge::{LayerMerge, MergeReport};
