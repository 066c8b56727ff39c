//! Costs of hypothetical layer edits.
//!
//! `if_*` methods answer what an edit would change the score by (negative is
//! an improvement) and leave the partition untouched; they take the engine
//! mutably only because they may fill its fit cache. `on_*` hooks are called
//! after the edit has been applied and the engine refitted.

mod outlier;
mod warp;
mod warp_accumulator;

pub use outlier::OutlierScore;
pub use warp::WarpScore;
pub use warp_accumulator::WarpAccumulator;

use crate::layers::Layers;

pub trait LayerScore {
    /// Delta of moving `seg` into the layer containing `layer`.
    fn if_set_seg_layer(&mut self, layers: &mut Layers, seg: usize, layer: usize) -> f32;

    /// Delta of merging the layers containing `a` and `b`.
    fn if_merge_layers(&mut self, layers: &mut Layers, a: usize, b: usize) -> f32;

    /// Delta of splitting `seg` into its own layer.
    fn if_separate(&mut self, layers: &mut Layers, seg: usize) -> f32;

    fn on_set_seg_layer(&mut self, _layers: &Layers, _seg: usize, _layer: usize) {}

    fn on_merge_layers(&mut self, _layers: &Layers, _a: usize, _b: usize) {}

    fn on_separate(&mut self, _layers: &Layers, _seg: usize) {}

    /// The partition changed in ways not reported through the other hooks.
    fn on_rebuild(&mut self, _layers: &Layers) {}
}
