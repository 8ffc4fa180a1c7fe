//! # Scene GPU Mirror
//!
//! Rebuilds the GPU copy of the scene every frame in three steps:
//!
//! ```text
//!   scan     parallel, one fetch_add per group and category -> offsets
//!   (join)   grow buffers to the totals
//!   write    parallel, each job serializes into its own offsets
//!   (join)   flush the frame's ring slot, copy to device-local if enabled
//! ```
//!
//! Offsets are valid for the frame that assigned them only. Nothing is
//! patched incrementally, so removed entities disappear at the next scan.

use std::sync::atomic::{AtomicU32, Ordering};

use aperture_core::{ComponentKind, ComponentProvider, INVALID_INDEX};

use super::buffer::MirrorBuffer;
use super::records::{ShaderGeometryPart, ShaderInstance, ShaderLight, ShaderMaterial};
use crate::config::RenderConfig;
use crate::device::GpuDevice;
use crate::error::DeviceError;
use crate::jobs::{job_count, JobContext, JobSystem};

/// Byte size of a record type.
const fn record_size<T>() -> u64 {
    std::mem::size_of::<T>() as u64
}

/// Records written in the last update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MirrorStats {
    /// Instance records.
    pub instances: u32,
    /// Geometry part records.
    pub geometry_parts: u32,
    /// Material records.
    pub materials: u32,
    /// Light records.
    pub lights: u32,
    /// Buffer reallocations since creation.
    pub reallocations: u32,
}

/// Bindless descriptor indices of the mirror buffers for one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MirrorDescriptors {
    /// Instance records.
    pub instances: u32,
    /// Geometry part records.
    pub geometry_parts: u32,
    /// Material records.
    pub materials: u32,
    /// Light records.
    pub lights: u32,
}

#[derive(Default)]
struct Reservation {
    pending: Vec<(u32, u32)>,
    total: u32,
}

/// Assigns each of `count` items a run of `size_of(i)` slots from `counter`,
/// reserving once per group.
fn allocate<'scope>(
    ctx: &JobContext<'_, 'scope>,
    count: u32,
    group_size: u32,
    counter: &'scope AtomicU32,
    offsets: &'scope [AtomicU32],
    size_of: impl Fn(usize) -> u32 + Send + Sync + 'scope,
) {
    ctx.dispatch::<Reservation, _>(count, group_size, move |args, group| {
        let size = size_of(args.job_index as usize);
        group.pending.push((args.job_index, group.total));
        group.total += size;
        if args.is_last_in_group {
            let base = counter.fetch_add(group.total, Ordering::Relaxed);
            for (index, local) in group.pending.drain(..) {
                offsets[index as usize].store(base + local, Ordering::Relaxed);
            }
        }
    });
}

fn resize_offsets(offsets: &mut Vec<AtomicU32>, len: usize) {
    offsets.resize_with(len, || AtomicU32::new(INVALID_INDEX));
}

#[inline]
fn load(offsets: &[AtomicU32], index: usize) -> u32 {
    offsets
        .get(index)
        .map_or(INVALID_INDEX, |o| o.load(Ordering::Relaxed))
}

/// GPU-resident mirror of the component provider.
pub struct SceneGpuMirror {
    instances: MirrorBuffer,
    parts: MirrorBuffer,
    materials: MirrorBuffer,
    lights: MirrorBuffer,
    instance_offsets: Vec<AtomicU32>,
    geometry_offsets: Vec<AtomicU32>,
    material_offsets: Vec<AtomicU32>,
    instance_counter: AtomicU32,
    part_counter: AtomicU32,
    material_counter: AtomicU32,
    scan_group_size: u32,
    stats: MirrorStats,
}

impl SceneGpuMirror {
    /// Creates an empty mirror; buffers are allocated on the first update.
    #[must_use]
    pub fn new(config: &RenderConfig) -> Self {
        let frames = config.frame_slots();
        let min = config.min_buffer_size;
        let local = config.device_local_mirror;
        Self {
            instances: MirrorBuffer::new("aperture_instances", frames, min, local),
            parts: MirrorBuffer::new("aperture_geometry_parts", frames, min, local),
            materials: MirrorBuffer::new("aperture_materials", frames, min, local),
            lights: MirrorBuffer::new("aperture_lights", frames, min, local),
            instance_offsets: Vec::new(),
            geometry_offsets: Vec::new(),
            material_offsets: Vec::new(),
            instance_counter: AtomicU32::new(0),
            part_counter: AtomicU32::new(0),
            material_counter: AtomicU32::new(0),
            scan_group_size: config.scan_group_size,
            stats: MirrorStats::default(),
        }
    }

    /// Scans the provider, grows the buffers and writes every record into
    /// the ring slot of `frame`.
    ///
    /// # Errors
    ///
    /// Returns the device error when a buffer cannot be allocated; the
    /// frame cannot be rendered in that case.
    pub fn update(
        &mut self,
        device: &dyn GpuDevice,
        jobs: &JobSystem,
        provider: &dyn ComponentProvider,
        frame: u64,
    ) -> Result<MirrorStats, DeviceError> {
        let totals = self.scan_and_allocate(jobs, provider);

        self.instances.prepare(
            device,
            frame,
            u64::from(totals.instances) * record_size::<ShaderInstance>(),
        )?;
        self.parts.prepare(
            device,
            frame,
            u64::from(totals.geometry_parts) * record_size::<ShaderGeometryPart>(),
        )?;
        self.materials.prepare(
            device,
            frame,
            u64::from(totals.materials) * record_size::<ShaderMaterial>(),
        )?;
        self.lights
            .prepare(device, frame, u64::from(totals.lights) * record_size::<ShaderLight>())?;

        self.write_records(jobs, provider, frame);

        for buffer in [
            &mut self.instances,
            &mut self.parts,
            &mut self.materials,
            &mut self.lights,
        ] {
            buffer.flush(device, frame);
        }

        self.stats = MirrorStats {
            reallocations: self.instances.reallocations()
                + self.parts.reallocations()
                + self.materials.reallocations()
                + self.lights.reallocations(),
            ..totals
        };
        tracing::trace!(
            frame,
            instances = totals.instances,
            parts = totals.geometry_parts,
            materials = totals.materials,
            lights = totals.lights,
            "scene mirrored"
        );
        Ok(self.stats)
    }

    /// Assigns offsets to every renderable, geometry part and material.
    pub fn scan_and_allocate(
        &mut self,
        jobs: &JobSystem,
        provider: &dyn ComponentProvider,
    ) -> MirrorStats {
        resize_offsets(&mut self.instance_offsets, provider.renderables().len());
        resize_offsets(&mut self.geometry_offsets, provider.geometries().len());
        resize_offsets(&mut self.material_offsets, provider.materials().len());
        self.instance_counter.store(0, Ordering::Relaxed);
        self.part_counter.store(0, Ordering::Relaxed);
        self.material_counter.store(0, Ordering::Relaxed);

        let group = self.scan_group_size;
        let instance_offsets = &self.instance_offsets[..];
        let geometry_offsets = &self.geometry_offsets[..];
        let material_offsets = &self.material_offsets[..];
        let (instance_counter, part_counter, material_counter) =
            (&self.instance_counter, &self.part_counter, &self.material_counter);

        jobs.scope(|ctx| {
            allocate(
                ctx,
                job_count(provider.renderables().len()),
                group,
                instance_counter,
                instance_offsets,
                |_| 1,
            );
            allocate(
                ctx,
                job_count(provider.geometries().len()),
                group,
                part_counter,
                geometry_offsets,
                move |i| job_count(provider.geometries()[i].parts.len()),
            );
            allocate(
                ctx,
                job_count(provider.materials().len()),
                group,
                material_counter,
                material_offsets,
                |_| 1,
            );
        });

        MirrorStats {
            instances: self.instance_counter.load(Ordering::Relaxed),
            geometry_parts: self.part_counter.load(Ordering::Relaxed),
            materials: self.material_counter.load(Ordering::Relaxed),
            lights: job_count(provider.lights().len()),
            reallocations: 0,
        }
    }

    fn write_records(&self, jobs: &JobSystem, provider: &dyn ComponentProvider, frame: u64) {
        let group = self.scan_group_size;
        let instances = self.instances.staging(frame);
        let parts = self.parts.staging(frame);
        let materials = self.materials.staging(frame);
        let lights = self.lights.staging(frame);
        let (instance_offsets, geometry_offsets, material_offsets) = (
            &self.instance_offsets[..],
            &self.geometry_offsets[..],
            &self.material_offsets[..],
        );

        jobs.scope(|ctx| {
            ctx.dispatch::<(), _>(job_count(provider.geometries().len()), group, |args, _| {
                let i = args.job_index as usize;
                let geometry = &provider.geometries()[i];
                let base = u64::from(load(geometry_offsets, i));
                for (k, part) in (0u64..).zip(&geometry.parts) {
                    let material_offset = provider
                        .index_of(ComponentKind::Material, part.material)
                        .map_or(INVALID_INDEX, |m| load(material_offsets, m));
                    parts.write_pod(
                        (base + k) * record_size::<ShaderGeometryPart>(),
                        &ShaderGeometryPart::new(geometry, part, material_offset),
                    );
                }
            });

            ctx.dispatch::<(), _>(job_count(provider.materials().len()), group, |args, _| {
                let i = args.job_index as usize;
                materials.write_pod(
                    u64::from(load(material_offsets, i)) * record_size::<ShaderMaterial>(),
                    &ShaderMaterial::new(&provider.materials()[i]),
                );
            });

            ctx.dispatch::<(), _>(job_count(provider.renderables().len()), group, |args, _| {
                let i = args.job_index as usize;
                let renderable = &provider.renderables()[i];
                let (geometry_offset, part_count) = provider
                    .index_of(ComponentKind::Geometry, renderable.geometry)
                    .map_or((INVALID_INDEX, 0), |g| {
                        (
                            load(geometry_offsets, g),
                            job_count(provider.geometries()[g].parts.len()),
                        )
                    });
                let entity = provider.renderable_entities()[i].index();
                instances.write_pod(
                    u64::from(load(instance_offsets, i)) * record_size::<ShaderInstance>(),
                    &ShaderInstance::new(renderable, entity, geometry_offset, part_count),
                );
            });

            ctx.dispatch::<(), _>(job_count(provider.lights().len()), group, |args, _| {
                let i = args.job_index as usize;
                let entity = provider.light_entities()[i].index();
                lights.write_pod(
                    u64::from(args.job_index) * record_size::<ShaderLight>(),
                    &ShaderLight::new(&provider.lights()[i], entity),
                );
            });
        });
    }

    /// Instance record offset assigned to renderable `index` this frame.
    #[inline]
    #[must_use]
    pub fn instance_offset(&self, index: usize) -> u32 {
        load(&self.instance_offsets, index)
    }

    /// First part record offset assigned to geometry `index` this frame.
    #[inline]
    #[must_use]
    pub fn geometry_offset(&self, index: usize) -> u32 {
        load(&self.geometry_offsets, index)
    }

    /// Material record offset assigned to material `index` this frame.
    #[inline]
    #[must_use]
    pub fn material_offset(&self, index: usize) -> u32 {
        load(&self.material_offsets, index)
    }

    /// Instance record of renderable `index` as staged for `frame`.
    #[must_use]
    pub fn staged_instance(&self, frame: u64, index: usize) -> ShaderInstance {
        self.instances.staging(frame).read_pod(
            u64::from(self.instance_offset(index)) * record_size::<ShaderInstance>(),
        )
    }

    /// Part record at `offset` as staged for `frame`.
    #[must_use]
    pub fn staged_part(&self, frame: u64, offset: u32) -> ShaderGeometryPart {
        self.parts
            .staging(frame)
            .read_pod(u64::from(offset) * record_size::<ShaderGeometryPart>())
    }

    /// Descriptor indices shaders of `frame` should bind.
    #[must_use]
    pub fn descriptors(&self, device: &dyn GpuDevice, frame: u64) -> MirrorDescriptors {
        let index = |buffer: &MirrorBuffer| {
            buffer
                .read_handle(frame)
                .map_or(INVALID_INDEX, |h| device.descriptor_index(h))
        };
        MirrorDescriptors {
            instances: index(&self.instances),
            geometry_parts: index(&self.parts),
            materials: index(&self.materials),
            lights: index(&self.lights),
        }
    }

    /// Capacity in bytes of the instance upload buffer owned by `frame`.
    #[must_use]
    pub fn instance_capacity(&self, frame: u64) -> u64 {
        self.instances.capacity(frame)
    }

    /// Counts of the last update.
    #[must_use]
    pub const fn stats(&self) -> MirrorStats {
        self.stats
    }

    /// Releases every device buffer.
    pub fn release(&mut self, device: &dyn GpuDevice) {
        self.instances.release(device);
        self.parts.release(device);
        self.materials.release(device);
        self.lights.release(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;
    use aperture_core::{
        Aabb, GeometryComponent, MaterialComponent, MeshPart, RenderableComponent, Scene,
    };
    use std::collections::HashSet;

    fn scene_with(objects: usize, parts: usize) -> Scene {
        let mut scene = Scene::new();
        let material = scene.add_material(MaterialComponent::default());
        let geometry = scene.add_geometry(GeometryComponent::new(
            3,
            4,
            (0..parts)
                .map(|p| MeshPart {
                    material,
                    index_offset: p as u32 * 6,
                    index_count: 6,
                    vertex_offset: 0,
                    lod: 0,
                })
                .collect(),
        ));
        for i in 0..objects {
            let x = i as f32;
            scene.add_renderable(RenderableComponent::new(
                geometry,
                Aabb::new([x, 0.0, 0.0], [x + 1.0, 1.0, 1.0]),
            ));
        }
        scene
    }

    #[test]
    fn test_offsets_are_unique_and_dense() {
        let config = RenderConfig {
            scan_group_size: 7,
            ..RenderConfig::default()
        };
        let device = HeadlessDevice::new();
        let jobs = JobSystem::new(4).unwrap();
        let scene = scene_with(100, 3);
        let mut mirror = SceneGpuMirror::new(&config);

        let stats = mirror.update(&device, &jobs, &scene, 0).unwrap();
        assert_eq!(stats.instances, 100);
        assert_eq!(stats.geometry_parts, 3);
        assert_eq!(stats.materials, 1);

        let offsets: HashSet<u32> = (0..100).map(|i| mirror.instance_offset(i)).collect();
        assert_eq!(offsets, (0..100).collect());
    }

    #[test]
    fn test_instance_records_reference_geometry_parts() {
        let config = RenderConfig::default();
        let device = HeadlessDevice::new();
        let jobs = JobSystem::new(2).unwrap();
        let scene = scene_with(5, 2);
        let mut mirror = SceneGpuMirror::new(&config);
        mirror.update(&device, &jobs, &scene, 0).unwrap();

        for i in 0..5 {
            let record = mirror.staged_instance(0, i);
            assert_eq!(record.part_count, 2);
            assert_eq!(record.aabb_min[0], i as f32);
            let part = mirror.staged_part(0, record.geometry_offset + 1);
            assert_eq!(part.index_offset, 6);
            assert_eq!(part.material_offset, mirror.material_offset(0));
            assert_eq!(part.vertex_buffer, 3);
        }
    }

    #[test]
    fn test_empty_scene_allocates_minimum() {
        let config = RenderConfig::default();
        let device = HeadlessDevice::new();
        let jobs = JobSystem::new(1).unwrap();
        let mut mirror = SceneGpuMirror::new(&config);
        let stats = mirror.update(&device, &jobs, &Scene::new(), 0).unwrap();
        assert_eq!(stats.instances, 0);
        assert_eq!(mirror.instance_capacity(0), config.min_buffer_size);
        assert_ne!(mirror.descriptors(&device, 0).instances, INVALID_INDEX);
    }

    #[test]
    fn test_removal_reflected_next_scan() {
        let config = RenderConfig::default();
        let device = HeadlessDevice::new();
        let jobs = JobSystem::new(2).unwrap();
        let mut scene = scene_with(10, 1);
        let mut mirror = SceneGpuMirror::new(&config);
        mirror.update(&device, &jobs, &scene, 0).unwrap();

        let victim = scene.renderables.entity_at(3).unwrap();
        scene.destroy_entity(victim);
        let stats = mirror.update(&device, &jobs, &scene, 1).unwrap();
        assert_eq!(stats.instances, 9);
    }

    #[test]
    fn test_ring_slots_are_independent() {
        let config = RenderConfig {
            frames_in_flight: 3,
            ..RenderConfig::default()
        };
        let device = HeadlessDevice::new();
        let jobs = JobSystem::new(2).unwrap();
        let scene = scene_with(4, 1);
        let mut mirror = SceneGpuMirror::new(&config);

        let handles: HashSet<u32> = (0..3)
            .map(|frame| {
                mirror.update(&device, &jobs, &scene, frame).unwrap();
                mirror.descriptors(&device, frame).instances
            })
            .collect();
        assert_eq!(handles.len(), 3);

        mirror.update(&device, &jobs, &scene, 3).unwrap();
        assert!(handles.contains(&mirror.descriptors(&device, 3).instances));
    }

    #[test]
    fn test_growth_out_of_memory_is_fatal() {
        let config = RenderConfig {
            frames_in_flight: 1,
            min_buffer_size: 256,
            ..RenderConfig::default()
        };
        let device = HeadlessDevice::new().with_memory_budget(2048);
        let jobs = JobSystem::new(1).unwrap();
        let mut mirror = SceneGpuMirror::new(&config);
        let result = mirror.update(&device, &jobs, &scene_with(200, 1), 0);
        assert!(matches!(result, Err(DeviceError::OutOfMemory { .. })));
    }
}
