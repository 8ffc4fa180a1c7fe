//! Per-camera visibility state.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use super::frustum::{Camera, Frustum};

/// Counters of one culling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CullStats {
    /// Renderables examined.
    pub objects_tested: u32,
    /// Renderables that passed every test.
    pub objects_visible: u32,
    /// Rejected by the camera mask or render flags.
    pub objects_masked: u32,
    /// Beyond their maximum draw distance.
    pub objects_distance_culled: u32,
    /// Outside the frustum.
    pub objects_frustum_culled: u32,
    /// Inside the frustum but occluded for the whole history window.
    pub objects_occlusion_culled: u32,
    /// Lights examined.
    pub lights_tested: u32,
    /// Lights kept.
    pub lights_visible: u32,
    /// Lights inside the frustum dropped by the capacity limit.
    pub lights_dropped: u32,
}

impl CullStats {
    /// Adds another set of counters.
    pub fn merge(&mut self, other: &Self) {
        self.objects_tested += other.objects_tested;
        self.objects_visible += other.objects_visible;
        self.objects_masked += other.objects_masked;
        self.objects_distance_culled += other.objects_distance_culled;
        self.objects_frustum_culled += other.objects_frustum_culled;
        self.objects_occlusion_culled += other.objects_occlusion_culled;
        self.lights_tested += other.lights_tested;
        self.lights_visible += other.lights_visible;
        self.lights_dropped += other.lights_dropped;
    }
}

/// Compaction target: fixed slots plus an atomic cursor.
#[derive(Debug, Default)]
pub(crate) struct CompactList {
    slots: Vec<AtomicU32>,
    cursor: AtomicU32,
}

impl CompactList {
    pub(crate) fn reset(&mut self, capacity: usize) {
        if self.slots.len() < capacity {
            self.slots.resize_with(capacity, AtomicU32::default);
        }
        self.cursor.store(0, Ordering::Relaxed);
    }

    /// Reserves room for `items` and stores as many as fit under `limit`.
    /// Returns how many were stored.
    pub(crate) fn append(&self, items: &[u32], limit: u32) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        let count = items.len() as u32;
        let base = self.cursor.fetch_add(count, Ordering::Relaxed);
        let stored = limit.saturating_sub(base).min(count);
        if stored == 0 {
            return 0;
        }
        for (slot, &item) in self.slots[base as usize..].iter().zip(&items[..stored as usize]) {
            slot.store(item, Ordering::Relaxed);
        }
        stored
    }

    fn drain_into(&self, limit: u32, out: &mut Vec<u32>) {
        let len = self.cursor.load(Ordering::Relaxed).min(limit) as usize;
        out.clear();
        out.extend(self.slots[..len].iter().map(|s| s.load(Ordering::Relaxed)));
    }
}

/// Transient visibility state of one camera.
#[derive(Debug)]
pub struct VisibilityView {
    camera: Camera,
    camera_mask: u8,
    occlusion_enabled: bool,
    pub(crate) objects: CompactList,
    pub(crate) lights: CompactList,
    pub(crate) object_candidates: CompactList,
    pub(crate) light_candidates: CompactList,
    pub(crate) group_stats: Mutex<CullStats>,
    visible_objects: Vec<u32>,
    visible_lights: Vec<u32>,
    object_query_candidates: Vec<u32>,
    light_query_candidates: Vec<u32>,
    stats: CullStats,
}

impl VisibilityView {
    /// Creates a view for `camera` that sees renderables whose camera mask
    /// intersects `camera_mask`.
    #[must_use]
    pub fn new(camera: Camera, camera_mask: u8) -> Self {
        Self {
            camera,
            camera_mask,
            occlusion_enabled: true,
            objects: CompactList::default(),
            lights: CompactList::default(),
            object_candidates: CompactList::default(),
            light_candidates: CompactList::default(),
            group_stats: Mutex::new(CullStats::default()),
            visible_objects: Vec::new(),
            visible_lights: Vec::new(),
            object_query_candidates: Vec::new(),
            light_query_candidates: Vec::new(),
            stats: CullStats::default(),
        }
    }

    /// Replaces the camera for the next culling pass.
    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
    }

    /// Turns history-based rejection and query issuing on or off for this view.
    pub fn set_occlusion_enabled(&mut self, enabled: bool) {
        self.occlusion_enabled = enabled;
    }

    /// Camera of this view.
    #[must_use]
    pub const fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Frustum of this view.
    #[must_use]
    pub const fn frustum(&self) -> &Frustum {
        &self.camera.frustum
    }

    /// Camera bit mask of this view.
    #[must_use]
    pub const fn camera_mask(&self) -> u8 {
        self.camera_mask
    }

    /// True if this view uses occlusion state.
    #[must_use]
    pub const fn occlusion_enabled(&self) -> bool {
        self.occlusion_enabled
    }

    /// Provider indices of visible renderables, in no particular order.
    #[must_use]
    pub fn visible_objects(&self) -> &[u32] {
        &self.visible_objects
    }

    /// Provider indices of visible lights. Tile bit `i` refers to entry `i`.
    #[must_use]
    pub fn visible_lights(&self) -> &[u32] {
        &self.visible_lights
    }

    /// Renderables that should get an occlusion query this frame.
    #[must_use]
    pub fn object_query_candidates(&self) -> &[u32] {
        &self.object_query_candidates
    }

    /// Lights that should get an occlusion query this frame.
    #[must_use]
    pub fn light_query_candidates(&self) -> &[u32] {
        &self.light_query_candidates
    }

    /// Counters of the last pass.
    #[must_use]
    pub const fn stats(&self) -> CullStats {
        self.stats
    }

    pub(crate) fn begin(&mut self, objects: usize, lights: usize) {
        self.objects.reset(objects);
        self.object_candidates.reset(objects);
        self.lights.reset(lights);
        self.light_candidates.reset(lights);
        *self.group_stats.get_mut() = CullStats::default();
    }

    pub(crate) fn finish(&mut self, max_lights: u32) {
        self.objects.drain_into(u32::MAX, &mut self.visible_objects);
        self.lights.drain_into(max_lights, &mut self.visible_lights);
        self.object_candidates
            .drain_into(u32::MAX, &mut self.object_query_candidates);
        self.light_candidates
            .drain_into(u32::MAX, &mut self.light_query_candidates);
        self.stats = *self.group_stats.get_mut();
    }
}
