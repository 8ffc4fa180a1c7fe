//! Render frame data structures.
//!
//! Everything the submission code needs to record one frame.

use super::RenderStats;
use crate::batching::DrawSubmission;
use crate::lighting::TileGrid;
use crate::mirror::MirrorDescriptors;

/// Bindless descriptor indices of one frame's buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptors {
    /// Mirror buffers.
    pub mirror: MirrorDescriptors,
    /// Tile light buckets.
    pub tile_lights: u32,
    /// Instance pointers.
    pub instance_pointers: u32,
    /// Occlusion predication buffer, if the device supports predication.
    pub predication: Option<u32>,
}

/// Result of [`RenderPath::render_frame`](super::RenderPath::render_frame).
#[derive(Debug, Clone)]
pub struct FrameOutput {
    /// Frame index.
    pub frame: u64,
    /// Descriptor indices to bind.
    pub descriptors: FrameDescriptors,
    /// Provider indices of visible renderables.
    pub visible_objects: Vec<u32>,
    /// Provider indices of visible lights; tile bit `i` is entry `i`.
    pub visible_lights: Vec<u32>,
    /// Tile layout.
    pub tile_grid: TileGrid,
    /// Tile buckets, opaque half first.
    pub tile_buckets: Vec<u32>,
    /// Opaque draws, front to back.
    pub opaque_draws: Vec<DrawSubmission>,
    /// Transparent draws, back to front.
    pub transparent_draws: Vec<DrawSubmission>,
    /// Frame statistics.
    pub stats: RenderStats,
}

impl FrameOutput {
    /// Returns true if there's anything to draw.
    #[must_use]
    pub fn has_content(&self) -> bool {
        !self.opaque_draws.is_empty() || !self.transparent_draws.is_empty()
    }

    /// Draws in submission order: opaque, then transparent.
    pub fn draws(&self) -> impl Iterator<Item = &DrawSubmission> {
        self.opaque_draws.iter().chain(&self.transparent_draws)
    }
}
