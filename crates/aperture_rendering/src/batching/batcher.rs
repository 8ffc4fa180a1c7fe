//! Sort and merge of the visible set into instanced draws.
//!
//! ## Flush
//!
//! After sorting, consecutive entries with the same geometry and LOD form
//! one batch. Every batch emits one draw per matching part, all sharing
//! the batch's run of instance pointers:
//!
//! ```text
//!   sorted   g0 g0 g0 g1 g0
//!   batches  [g0 x3][g1][g0]
//!   pointers  0  1  2  3  4      <- instance_offset / instance_count
//! ```

use aperture_core::math;
use aperture_core::{
    BlendMode, ComponentKind, ComponentProvider, Entity, MaterialComponent, INVALID_INDEX,
};

use super::key::BatchKey;
use crate::config::RenderConfig;
use crate::culling::VisibilityView;
use crate::device::GpuDevice;
use crate::error::DeviceError;
use crate::jobs::job_count;
use crate::mirror::{InstancePointer, MirrorBuffer, SceneGpuMirror};

/// Render pass a draw belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RenderPass {
    /// Depth-writing pass, front to back.
    Opaque,
    /// Blended pass, back to front.
    Transparent,
}

/// Faces discarded by the rasterizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CullMode {
    /// Draw both faces.
    None,
    /// Discard back faces.
    Back,
    /// Discard front faces.
    Front,
}

/// Fixed-function state a draw needs; selects the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    /// Pass.
    pub pass: RenderPass,
    /// Blend mode of the material.
    pub blend: BlendMode,
    /// Alpha test enabled, by the material or by distance dithering.
    pub alpha_test: bool,
    /// Face culling.
    pub cull: CullMode,
}

/// One instanced indexed draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawSubmission {
    /// Provider index of the geometry.
    pub geometry: u32,
    /// Level of detail.
    pub lod: u32,
    /// Offset of the geometry part record.
    pub part: u32,
    /// Offset of the material record.
    pub material: u32,
    /// First index.
    pub index_offset: u32,
    /// Index count.
    pub index_count: u32,
    /// Base vertex.
    pub vertex_offset: u32,
    /// First entry in the instance pointer buffer.
    pub instance_offset: u32,
    /// Number of instances.
    pub instance_count: u32,
    /// Pipeline state.
    pub pipeline: PipelineKey,
}

/// Counters of the last batching pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Instances queued for the opaque pass.
    pub opaque_instances: u32,
    /// Instances queued for the transparent pass.
    pub transparent_instances: u32,
    /// Instanced batches flushed.
    pub batches: u32,
    /// Opaque draws.
    pub opaque_draws: u32,
    /// Transparent draws.
    pub transparent_draws: u32,
    /// Batches whose alpha test was forced by dithering.
    pub dithered_batches: u32,
    /// Visible instances whose geometry could not be resolved.
    pub skipped: u32,
}

#[derive(Clone, Copy, Debug)]
struct BatchEntry {
    key: BatchKey,
    renderable: u32,
    geometry: u32,
    lod: u32,
    dither: f32,
    camera_mask: u8,
}

/// Dither amount of an instance `distance` away; 0 before the fade band,
/// 1 at the maximum draw distance.
#[must_use]
pub fn fade_dither(distance: f32, max_draw_distance: f32, fade: f32) -> f32 {
    if !max_draw_distance.is_finite() || max_draw_distance <= 0.0 || fade <= 0.0 {
        return 0.0;
    }
    let start = max_draw_distance * (1.0 - fade);
    ((distance - start) / (max_draw_distance - start)).clamp(0.0, 1.0)
}

fn has_pass_part(
    provider: &dyn ComponentProvider,
    geometry: usize,
    lod: u32,
    pass: RenderPass,
) -> bool {
    provider.geometries()[geometry]
        .parts_for_lod(lod)
        .any(|(_, part)| material_pass(provider, part.material) == pass)
}

fn material_of<'a>(
    provider: &'a dyn ComponentProvider,
    material: Entity,
) -> Option<(usize, &'a MaterialComponent)> {
    provider
        .index_of(ComponentKind::Material, material)
        .map(|m| (m, &provider.materials()[m]))
}

fn material_pass(provider: &dyn ComponentProvider, material: Entity) -> RenderPass {
    match material_of(provider, material) {
        Some((_, m)) if m.is_transparent() => RenderPass::Transparent,
        _ => RenderPass::Opaque,
    }
}

/// Builds sorted draw lists and the instance pointers they index.
#[derive(Debug)]
pub struct RenderBatcher {
    draw_distance_fade: f32,
    opaque: Vec<BatchEntry>,
    transparent: Vec<BatchEntry>,
    opaque_draws: Vec<DrawSubmission>,
    transparent_draws: Vec<DrawSubmission>,
    pointers: Vec<InstancePointer>,
    pointer_buffer: MirrorBuffer,
    stats: BatchStats,
}

impl RenderBatcher {
    /// Creates a batcher.
    #[must_use]
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            draw_distance_fade: config.draw_distance_fade,
            opaque: Vec::new(),
            transparent: Vec::new(),
            opaque_draws: Vec::new(),
            transparent_draws: Vec::new(),
            pointers: Vec::new(),
            pointer_buffer: MirrorBuffer::new(
                "aperture_instance_pointers",
                config.frame_slots(),
                config.min_buffer_size,
                false,
            ),
            stats: BatchStats::default(),
        }
    }

    /// Sorts `view`'s visible renderables and flushes them into the opaque
    /// and transparent draw lists.
    ///
    /// Instance records are addressed through `mirror`, which must have
    /// been updated from the same provider this frame.
    pub fn batch(
        &mut self,
        provider: &dyn ComponentProvider,
        mirror: &SceneGpuMirror,
        view: &VisibilityView,
    ) {
        self.opaque.clear();
        self.transparent.clear();
        self.opaque_draws.clear();
        self.transparent_draws.clear();
        self.pointers.clear();
        self.stats = BatchStats::default();

        let eye = view.camera().eye;
        let renderables = provider.renderables();
        for &index in view.visible_objects() {
            let renderable = &renderables[index as usize];
            let geometry = provider.index_of(ComponentKind::Geometry, renderable.geometry);
            let Some(geometry) = geometry else {
                self.stats.skipped += 1;
                continue;
            };
            let distance = math::distance(eye, renderable.aabb.center());
            let lod = provider.geometries()[geometry].select_lod(distance);
            let camera_mask = renderable.camera_mask & view.camera_mask();
            let geometry_index = job_count(geometry);
            let dither =
                fade_dither(distance, renderable.max_draw_distance, self.draw_distance_fade);
            let entry = |key| BatchEntry {
                key,
                renderable: index,
                geometry: geometry_index,
                lod,
                dither,
                camera_mask,
            };

            if has_pass_part(provider, geometry, lod, RenderPass::Opaque) {
                self.opaque.push(entry(BatchKey::opaque(
                    geometry_index,
                    distance,
                    renderable.sort_bits,
                    camera_mask,
                )));
            }
            if has_pass_part(provider, geometry, lod, RenderPass::Transparent) {
                self.transparent.push(entry(BatchKey::transparent(
                    geometry_index,
                    distance,
                    renderable.sort_bits,
                    camera_mask,
                )));
            }
        }

        // Provider index breaks ties so equal keys flush in a stable order.
        self.opaque.sort_unstable_by_key(|e| (e.key, e.renderable));
        self.transparent.sort_unstable_by_key(|e| (e.key, e.renderable));
        self.stats.opaque_instances = job_count(self.opaque.len());
        self.stats.transparent_instances = job_count(self.transparent.len());

        let opaque = std::mem::take(&mut self.opaque);
        self.flush_list(provider, mirror, &opaque, RenderPass::Opaque);
        self.opaque = opaque;
        let transparent = std::mem::take(&mut self.transparent);
        self.flush_list(provider, mirror, &transparent, RenderPass::Transparent);
        self.transparent = transparent;

        self.stats.opaque_draws = job_count(self.opaque_draws.len());
        self.stats.transparent_draws = job_count(self.transparent_draws.len());
        tracing::trace!(
            batches = self.stats.batches,
            opaque = self.stats.opaque_draws,
            transparent = self.stats.transparent_draws,
            "visible set batched"
        );
    }

    fn flush_list(
        &mut self,
        provider: &dyn ComponentProvider,
        mirror: &SceneGpuMirror,
        entries: &[BatchEntry],
        pass: RenderPass,
    ) {
        let mut start = 0;
        while start < entries.len() {
            let head = entries[start];
            let len = entries[start..]
                .iter()
                .position(|e| e.geometry != head.geometry || e.lod != head.lod)
                .unwrap_or(entries.len() - start);
            let run = &entries[start..start + len];
            start += len;

            let instance_offset = job_count(self.pointers.len());
            let mut forced_alpha = false;
            for entry in run {
                forced_alpha |= entry.dither > 0.0;
                self.pointers.push(InstancePointer::new(
                    mirror.instance_offset(entry.renderable as usize),
                    entry.dither,
                    entry.camera_mask,
                ));
            }
            self.flush_batch(
                provider,
                mirror,
                &head,
                instance_offset,
                job_count(run.len()),
                forced_alpha,
                pass,
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn flush_batch(
        &mut self,
        provider: &dyn ComponentProvider,
        mirror: &SceneGpuMirror,
        head: &BatchEntry,
        instance_offset: u32,
        instance_count: u32,
        forced_alpha: bool,
        pass: RenderPass,
    ) {
        self.stats.batches += 1;
        if forced_alpha {
            self.stats.dithered_batches += 1;
        }
        let geometry = &provider.geometries()[head.geometry as usize];
        let part_base = mirror.geometry_offset(head.geometry as usize);
        let draws = match pass {
            RenderPass::Opaque => &mut self.opaque_draws,
            RenderPass::Transparent => &mut self.transparent_draws,
        };

        for (k, part) in geometry.parts_for_lod(head.lod) {
            let material = material_of(provider, part.material);
            let (material_offset, blend, alpha_tested, double_sided) = material.map_or(
                (INVALID_INDEX, BlendMode::Opaque, false, false),
                |(m, mat)| {
                    (
                        mirror.material_offset(m),
                        mat.blend,
                        mat.is_alpha_tested(),
                        mat.double_sided,
                    )
                },
            );
            let part_pass = if blend == BlendMode::Opaque {
                RenderPass::Opaque
            } else {
                RenderPass::Transparent
            };
            if part_pass != pass {
                continue;
            }

            let draw = |cull| DrawSubmission {
                geometry: head.geometry,
                lod: head.lod,
                part: part_base.saturating_add(job_count(k)),
                material: material_offset,
                index_offset: part.index_offset,
                index_count: part.index_count,
                vertex_offset: part.vertex_offset,
                instance_offset,
                instance_count,
                pipeline: PipelineKey {
                    pass,
                    blend,
                    alpha_test: alpha_tested || forced_alpha,
                    cull,
                },
            };

            if forced_alpha && double_sided && pass == RenderPass::Transparent {
                // Back faces first so the front faces blend over them.
                draws.push(draw(CullMode::Front));
                draws.push(draw(CullMode::Back));
            } else if double_sided {
                draws.push(draw(CullMode::None));
            } else {
                draws.push(draw(CullMode::Back));
            }
        }
    }

    /// Uploads the instance pointers into the ring slot of `frame`.
    ///
    /// # Errors
    ///
    /// Returns the device error if the pointer buffer cannot grow.
    pub fn upload(&mut self, device: &dyn GpuDevice, frame: u64) -> Result<(), DeviceError> {
        let stride = std::mem::size_of::<InstancePointer>() as u64;
        self.pointer_buffer
            .prepare(device, frame, self.pointers.len() as u64 * stride)?;
        let staging = self.pointer_buffer.staging(frame);
        for (i, pointer) in (0u64..).zip(&self.pointers) {
            staging.write_pod(i * stride, pointer);
        }
        self.pointer_buffer.flush(device, frame);
        Ok(())
    }

    /// Opaque draws, front to back.
    #[must_use]
    pub fn opaque_draws(&self) -> &[DrawSubmission] {
        &self.opaque_draws
    }

    /// Transparent draws, back to front.
    #[must_use]
    pub fn transparent_draws(&self) -> &[DrawSubmission] {
        &self.transparent_draws
    }

    /// Instance pointers in draw order.
    #[must_use]
    pub fn instance_pointers(&self) -> &[InstancePointer] {
        &self.pointers
    }

    /// Descriptor index of `frame`'s instance pointer buffer.
    #[must_use]
    pub fn pointer_descriptor(&self, device: &dyn GpuDevice, frame: u64) -> u32 {
        self.pointer_buffer
            .read_handle(frame)
            .map_or(INVALID_INDEX, |h| device.descriptor_index(h))
    }

    /// Counters of the last pass.
    #[must_use]
    pub const fn stats(&self) -> BatchStats {
        self.stats
    }

    /// Releases the pointer buffers.
    pub fn release(&mut self, device: &dyn GpuDevice) {
        self.pointer_buffer.release(device);
    }
}
