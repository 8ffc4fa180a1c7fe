//! Sorting and merging of visible instances into draw submissions.

mod batcher;
mod key;

pub use batcher::{
    fade_dither, BatchStats, CullMode, DrawSubmission, PipelineKey, RenderBatcher, RenderPass,
};
pub use key::{distance_bits, BatchKey, FIELD_MASK};
