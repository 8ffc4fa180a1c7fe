//! Per-frame rendering statistics.

/// Counters gathered across the stages of one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Frame index.
    pub frame: u64,
    /// Instance records mirrored.
    pub instances: u32,
    /// Renderables that survived culling.
    pub visible_objects: u32,
    /// Renderables rejected by the frustum.
    pub frustum_culled: u32,
    /// Renderables rejected by their occlusion history.
    pub occlusion_culled: u32,
    /// Lights kept.
    pub visible_lights: u32,
    /// Lights dropped by the capacity limit.
    pub lights_dropped: u32,
    /// Occlusion proxies issued.
    pub queries_issued: u32,
    /// Query candidates dropped by the pool limit.
    pub queries_dropped: u32,
    /// Light bits set in the tile buckets, both halves.
    pub tile_entries: u32,
    /// Instanced batches flushed.
    pub batches: u32,
    /// Opaque draw submissions.
    pub opaque_draws: u32,
    /// Transparent draw submissions.
    pub transparent_draws: u32,
    /// Buffer reallocations since creation.
    pub reallocations: u32,
}

impl RenderStats {
    /// Total draw submissions.
    #[must_use]
    pub const fn draw_calls(&self) -> u32 {
        self.opaque_draws + self.transparent_draws
    }

    /// Fraction of mirrored instances that were drawn.
    #[must_use]
    pub fn visible_ratio(&self) -> f32 {
        if self.instances == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = self.visible_objects as f32 / self.instances as f32;
        ratio
    }
}
