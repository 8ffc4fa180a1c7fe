//! # Occlusion Query Manager
//!
//! Hardware occlusion queries with multi-frame latency.
//!
//! Every entity keeps one query slot per in-flight frame and a 32-bit
//! rolling history. A query issued at frame N is read back at frame N + F,
//! when its slot comes around again:
//!
//! ```text
//!   frame N      reset pool[N % F] -> proxies for candidates -> resolve
//!   frame N + F  update_history: history = history << 1 | result
//! ```
//!
//! Bit 0 of the history is always the most recently resolved result. A
//! frame without a pending query shifts in a 1, so only 32 consecutive
//! failed queries drive the history to zero.
//!
//! Without query support the manager is inert and every history reads as
//! all-visible.

use std::collections::HashMap;

use aperture_core::{ComponentProvider, Entity, FrameRing};

use crate::config::RenderConfig;
use crate::culling::VisibilityView;
use crate::device::{BufferUsage, GpuDevice, QueryPoolHandle, QUERY_RESULT_SIZE};
use crate::error::DeviceError;
use crate::mirror::GpuBuffer;

/// Width of the visibility history.
pub const HISTORY_BITS: u32 = u32::BITS;

/// History of an entity with no failed queries in the window.
pub const HISTORY_VISIBLE: u32 = u32::MAX;

/// Lifecycle of one query slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QueryState {
    /// No query issued in this slot.
    #[default]
    NoQuery,
    /// Query issued, result not read yet.
    Pending {
        /// Index in the frame's pool.
        query: u32,
    },
    /// Result folded into the history.
    Resolved {
        /// Any sample passed.
        visible: bool,
    },
}

/// Persistent occlusion state of one entity.
#[derive(Clone, Debug)]
pub struct OcclusionResult {
    queries: FrameRing<QueryState>,
    history: u32,
    last_seen: u64,
}

impl OcclusionResult {
    fn new(frames_in_flight: usize) -> Self {
        Self {
            queries: FrameRing::new(frames_in_flight, |_| QueryState::NoQuery),
            history: HISTORY_VISIBLE,
            last_seen: 0,
        }
    }

    /// Rolling history; bit 0 is the newest result.
    #[must_use]
    pub const fn history(&self) -> u32 {
        self.history
    }

    /// State of the slot owned by `frame`.
    #[must_use]
    pub fn query_state(&self, frame: u64) -> QueryState {
        *self.queries.get(frame)
    }

    /// Occluded for the whole history window.
    #[must_use]
    pub const fn is_occluded(&self) -> bool {
        self.history == 0
    }

    /// Shifts in the result held by the slot of `frame`.
    fn advance(&mut self, frame: u64, samples: &[u64]) {
        let slot = self.queries.get_mut(frame);
        let visible = match *slot {
            QueryState::Pending { query } => {
                let visible = samples.get(query as usize).map_or(true, |&s| s > 0);
                *slot = QueryState::Resolved { visible };
                visible
            }
            QueryState::NoQuery | QueryState::Resolved { .. } => true,
        };
        self.history = (self.history << 1) | u32::from(visible);
        self.last_seen = frame;
    }
}

/// Per-index histories aligned with the provider arrays of one frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct OcclusionHistory<'a> {
    objects: &'a [u32],
    lights: &'a [u32],
}

impl<'a> OcclusionHistory<'a> {
    /// Every entity reads as visible.
    pub const NONE: Self = Self {
        objects: &[],
        lights: &[],
    };

    /// Wraps history arrays indexed like the provider's renderables and lights.
    #[must_use]
    pub const fn new(objects: &'a [u32], lights: &'a [u32]) -> Self {
        Self { objects, lights }
    }

    /// History of renderable `index`.
    #[inline]
    #[must_use]
    pub fn object(&self, index: usize) -> u32 {
        self.objects.get(index).copied().unwrap_or(HISTORY_VISIBLE)
    }

    /// History of light `index`.
    #[inline]
    #[must_use]
    pub fn light(&self, index: usize) -> u32 {
        self.lights.get(index).copied().unwrap_or(HISTORY_VISIBLE)
    }
}

#[derive(Debug, Default)]
struct Track {
    results: HashMap<Entity, OcclusionResult>,
    dense: Vec<u32>,
}

impl Track {
    fn update(&mut self, entities: &[Entity], frame: u64, frames: usize, samples: &[u64]) {
        self.dense.clear();
        for &entity in entities {
            let result = self
                .results
                .entry(entity)
                .or_insert_with(|| OcclusionResult::new(frames));
            result.advance(frame, samples);
            self.dense.push(result.history);
        }
        self.results.retain(|_, r| r.last_seen == frame);
    }

    fn mark_pending(&mut self, entity: Entity, frame: u64, frames: usize, query: u32) {
        let result = self
            .results
            .entry(entity)
            .or_insert_with(|| OcclusionResult::new(frames));
        *result.queries.get_mut(frame) = QueryState::Pending { query };
    }
}

#[derive(Debug)]
struct FrameQueries {
    pool: QueryPoolHandle,
    readback: GpuBuffer,
    predication: Option<GpuBuffer>,
    issued: u32,
}

/// Query counters of the last frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OcclusionStats {
    /// Proxies issued.
    pub queries_issued: u32,
    /// Candidates skipped because the pool was full.
    pub queries_dropped: u32,
    /// Tracked renderables with an all-zero history.
    pub occluded_objects: u32,
    /// Readbacks not yet available when their slot came around, since creation.
    pub readbacks_missed: u32,
}

/// Issues, resolves and ages occlusion queries.
#[derive(Debug)]
pub struct OcclusionQueryManager {
    frames: usize,
    capacity: u32,
    slots: Option<FrameRing<FrameQueries>>,
    objects: Track,
    lights: Track,
    overflow_warned: bool,
    stats: OcclusionStats,
}

impl OcclusionQueryManager {
    /// Probes the device once and allocates one pool and readback buffer
    /// per in-flight frame.
    ///
    /// Missing query support or disabled occlusion culling leaves the
    /// manager inert.
    ///
    /// # Errors
    ///
    /// Returns the device error if a readback buffer cannot be allocated.
    pub fn new(device: &dyn GpuDevice, config: &RenderConfig) -> Result<Self, DeviceError> {
        let frames = config.frame_slots();
        let mut manager = Self {
            frames,
            capacity: config.max_occlusion_queries,
            slots: None,
            objects: Track::default(),
            lights: Track::default(),
            overflow_warned: false,
            stats: OcclusionStats::default(),
        };

        if !config.occlusion_culling || config.max_occlusion_queries == 0 {
            tracing::info!("occlusion culling disabled by configuration");
            return Ok(manager);
        }
        let capabilities = device.capabilities();
        if !capabilities.occlusion_queries {
            tracing::info!("occlusion queries unavailable, culling is frustum only");
            return Ok(manager);
        }

        let bytes = u64::from(config.max_occlusion_queries) * QUERY_RESULT_SIZE;
        let mut slots = Vec::with_capacity(frames);
        for _ in 0..frames {
            let pool = match device.create_query_pool(config.max_occlusion_queries) {
                Ok(pool) => pool,
                Err(DeviceError::Unsupported(feature)) => {
                    tracing::info!(
                        feature,
                        "occlusion queries unavailable, culling is frustum only"
                    );
                    return Ok(manager);
                }
                Err(err) => return Err(err),
            };
            let mut readback =
                GpuBuffer::new("aperture_occlusion_readback", BufferUsage::Readback, bytes);
            readback.ensure_capacity(device, bytes)?;
            let predication = if capabilities.predication {
                let mut buffer = GpuBuffer::new(
                    "aperture_occlusion_predication",
                    BufferUsage::Predication,
                    bytes,
                );
                buffer.ensure_capacity(device, bytes)?;
                Some(buffer)
            } else {
                None
            };
            slots.push(FrameQueries {
                pool,
                readback,
                predication,
                issued: 0,
            });
        }
        tracing::info!(
            frames,
            queries = config.max_occlusion_queries,
            predication = capabilities.predication,
            "occlusion queries enabled"
        );
        manager.slots = Some(FrameRing::from_slots(slots));
        Ok(manager)
    }

    /// True if queries are issued.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.slots.is_some()
    }

    /// Folds the results read back for `frame`'s slot into every history
    /// and drops state of entities no longer in the provider.
    ///
    /// Must run before culling `frame`.
    pub fn update_history(
        &mut self,
        device: &dyn GpuDevice,
        provider: &dyn ComponentProvider,
        frame: u64,
    ) {
        let Some(slots) = self.slots.as_mut() else {
            return;
        };
        let slot = slots.get_mut(frame);
        // A readback that has not landed leaves every pending slot without
        // a result, which counts as visible.
        let bytes = match (slot.issued, slot.readback.handle()) {
            (0, _) | (_, None) => None,
            (issued, Some(handle)) => {
                let bytes = device.read_buffer(handle, 0, u64::from(issued) * QUERY_RESULT_SIZE);
                if bytes.is_none() {
                    self.stats.readbacks_missed += 1;
                    tracing::trace!(frame, issued, "occlusion readback not ready");
                }
                bytes
            }
        };
        let samples: Vec<u64> = bytes
            .unwrap_or_default()
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect();
        slot.issued = 0;

        self.objects
            .update(provider.renderable_entities(), frame, self.frames, &samples);
        self.lights
            .update(provider.light_entities(), frame, self.frames, &samples);

        #[allow(clippy::cast_possible_truncation)]
        let occluded = self.objects.dense.iter().filter(|&&h| h == 0).count() as u32;
        self.stats.occluded_objects = occluded;
    }

    /// Histories for culling, indexed like the provider arrays passed to
    /// the last [`Self::update_history`].
    #[must_use]
    pub fn history(&self) -> OcclusionHistory<'_> {
        if self.is_enabled() {
            OcclusionHistory::new(&self.objects.dense, &self.lights.dense)
        } else {
            OcclusionHistory::NONE
        }
    }

    /// Persistent state of an entity, if tracked.
    #[must_use]
    pub fn result(&self, entity: Entity) -> Option<&OcclusionResult> {
        self.objects
            .results
            .get(&entity)
            .or_else(|| self.lights.results.get(&entity))
    }

    /// Resets the pool owned by `frame`. Must precede any query of the frame.
    pub fn reset(&mut self, device: &dyn GpuDevice, frame: u64) {
        let Some(slots) = self.slots.as_mut() else {
            return;
        };
        let slot = slots.get_mut(frame);
        device.reset_query_pool(slot.pool);
        slot.issued = 0;
        self.stats.queries_issued = 0;
        self.stats.queries_dropped = 0;
    }

    /// Issues one box proxy per query candidate of `view`.
    ///
    /// Candidates beyond the pool capacity get no query this frame.
    pub fn render_queries(
        &mut self,
        device: &dyn GpuDevice,
        provider: &dyn ComponentProvider,
        view: &VisibilityView,
        frame: u64,
    ) {
        let Some(slots) = self.slots.as_mut() else {
            return;
        };
        if !view.occlusion_enabled() {
            return;
        }
        let slot = slots.get_mut(frame);
        let renderables = provider.renderables();
        let object_entities = provider.renderable_entities();
        let lights = provider.lights();
        let light_entities = provider.light_entities();

        let objects = view.object_query_candidates().iter().map(|&i| {
            let i = i as usize;
            (renderables[i].aabb, object_entities[i], true)
        });
        let light_proxies = view.light_query_candidates().iter().map(|&i| {
            let i = i as usize;
            (lights[i].aabb(), light_entities[i], false)
        });

        let mut dropped = 0u32;
        for (bounds, entity, is_object) in objects.chain(light_proxies) {
            if slot.issued >= self.capacity {
                dropped += 1;
                continue;
            }
            let query = slot.issued;
            device.begin_query(slot.pool, query);
            device.draw_proxy(&bounds);
            device.end_query(slot.pool, query);
            let track = if is_object { &mut self.objects } else { &mut self.lights };
            track.mark_pending(entity, frame, self.frames, query);
            slot.issued += 1;
        }

        if dropped > 0 && !self.overflow_warned {
            self.overflow_warned = true;
            tracing::warn!(
                capacity = self.capacity,
                dropped,
                "occlusion query pool full, candidates skipped"
            );
        }
        self.stats.queries_issued = slot.issued;
        self.stats.queries_dropped = dropped;
    }

    /// Resolves `frame`'s queries into its readback buffer and, when
    /// supported, its predication buffer.
    pub fn resolve(&mut self, device: &dyn GpuDevice, frame: u64) {
        let Some(slots) = self.slots.as_ref() else {
            return;
        };
        let slot = slots.get(frame);
        if slot.issued == 0 {
            return;
        }
        if let Some(readback) = slot.readback.handle() {
            device.resolve_queries(slot.pool, 0, slot.issued, readback, 0);
        }
        if let Some(predication) = slot.predication.as_ref().and_then(GpuBuffer::handle) {
            device.resolve_queries(slot.pool, 0, slot.issued, predication, 0);
        }
    }

    /// Query pool owned by `frame`.
    #[must_use]
    pub fn query_pool(&self, frame: u64) -> Option<QueryPoolHandle> {
        self.slots.as_ref().map(|slots| slots.get(frame).pool)
    }

    /// Descriptor of the predication buffer owned by `frame`.
    #[must_use]
    pub fn predication_descriptor(&self, device: &dyn GpuDevice, frame: u64) -> Option<u32> {
        self.slots
            .as_ref()
            .and_then(|slots| slots.get(frame).predication.as_ref())
            .and_then(GpuBuffer::handle)
            .map(|h| device.descriptor_index(h))
    }

    /// Counters of the last frame.
    #[must_use]
    pub const fn stats(&self) -> OcclusionStats {
        self.stats
    }

    /// Number of tracked renderables.
    #[must_use]
    pub fn tracked_objects(&self) -> usize {
        self.objects.results.len()
    }
}
