//! Render path orchestration.
//!
//! Runs every stage of a frame in order, with the joins between them:
//!
//! ```text
//!   occlusion history (frame - F results)
//!     -> mirror scan / write / flush
//!     -> visibility cull
//!     -> occlusion reset / proxies / resolve
//!     -> tile light binning
//!     -> batching + instance pointer upload
//! ```

mod frame;
mod stats;

pub use frame::{FrameDescriptors, FrameOutput};
pub use stats::RenderStats;

use aperture_core::ComponentProvider;

use crate::batching::RenderBatcher;
use crate::config::RenderConfig;
use crate::culling::{VisibilityCuller, VisibilityView};
use crate::device::GpuDevice;
use crate::error::RenderResult;
use crate::jobs::{job_count, JobSystem};
use crate::lighting::TiledLightCuller;
use crate::mirror::SceneGpuMirror;
use crate::occlusion::OcclusionQueryManager;

/// One render path: its configuration, worker pool and stage state.
pub struct RenderPath {
    config: RenderConfig,
    jobs: JobSystem,
    mirror: SceneGpuMirror,
    culler: VisibilityCuller,
    occlusion: OcclusionQueryManager,
    tiles: TiledLightCuller,
    batcher: RenderBatcher,
    frame: u64,
}

impl RenderPath {
    /// Validates `config`, starts the worker pool and probes the device.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid configuration, a pool that cannot
    /// start, or query buffers the device cannot allocate.
    pub fn new(device: &dyn GpuDevice, config: RenderConfig) -> RenderResult<Self> {
        config.validate()?;
        let jobs = JobSystem::new(config.worker_threads)?;
        Ok(Self {
            mirror: SceneGpuMirror::new(&config),
            culler: VisibilityCuller::new(&config),
            occlusion: OcclusionQueryManager::new(device, &config)?,
            tiles: TiledLightCuller::new(&config),
            batcher: RenderBatcher::new(&config),
            jobs,
            config,
            frame: 0,
        })
    }

    /// Renders one frame of `provider` as seen by `view`.
    ///
    /// `tile_depth_bounds` optionally narrows the opaque tile buckets, one
    /// `[min, max]` linear depth per tile.
    ///
    /// The frame's copies and clears are submitted before returning. On a
    /// [`WgpuDevice`](crate::WgpuDevice) the caller then replays the
    /// occlusion proxies in its own pass and calls `flush_resolves`;
    /// skipping that only makes the frame's queries read as visible.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Device`](crate::RenderError::Device) when the
    /// device runs out of memory; every other problem degrades the frame.
    pub fn render_frame(
        &mut self,
        device: &dyn GpuDevice,
        provider: &dyn ComponentProvider,
        view: &mut VisibilityView,
        tile_depth_bounds: Option<&[[f32; 2]]>,
    ) -> RenderResult<FrameOutput> {
        let frame = self.frame;

        self.occlusion.update_history(device, provider, frame);
        let mirror = self.mirror.update(device, &self.jobs, provider, frame)?;

        self.culler
            .cull(&self.jobs, provider, self.occlusion.history(), view);

        self.occlusion.reset(device, frame);
        self.occlusion.render_queries(device, provider, view, frame);
        self.occlusion.resolve(device, frame);

        let tiles = self
            .tiles
            .cull(device, &self.jobs, provider, view, tile_depth_bounds, frame)?;

        self.batcher.batch(provider, &self.mirror, view);
        self.batcher.upload(device, frame)?;
        device.end_frame();

        let cull = view.stats();
        let occlusion = self.occlusion.stats();
        let batches = self.batcher.stats();
        let stats = RenderStats {
            frame,
            instances: mirror.instances,
            visible_objects: job_count(view.visible_objects().len()),
            frustum_culled: cull.objects_frustum_culled,
            occlusion_culled: cull.objects_occlusion_culled,
            visible_lights: job_count(view.visible_lights().len()),
            lights_dropped: cull.lights_dropped,
            queries_issued: occlusion.queries_issued,
            queries_dropped: occlusion.queries_dropped,
            tile_entries: tiles.opaque_entries + tiles.transparent_entries,
            batches: batches.batches,
            opaque_draws: batches.opaque_draws,
            transparent_draws: batches.transparent_draws,
            reallocations: mirror.reallocations,
        };
        tracing::trace!(
            frame,
            visible = stats.visible_objects,
            draws = stats.draw_calls(),
            "frame complete"
        );

        self.frame += 1;
        Ok(FrameOutput {
            frame,
            descriptors: FrameDescriptors {
                mirror: self.mirror.descriptors(device, frame),
                tile_lights: self.tiles.descriptor(device, frame),
                instance_pointers: self.batcher.pointer_descriptor(device, frame),
                predication: self.occlusion.predication_descriptor(device, frame),
            },
            visible_objects: view.visible_objects().to_vec(),
            visible_lights: view.visible_lights().to_vec(),
            tile_grid: self.tiles.grid(),
            tile_buckets: self.tiles.bucket_words(),
            opaque_draws: self.batcher.opaque_draws().to_vec(),
            transparent_draws: self.batcher.transparent_draws().to_vec(),
            stats,
        })
    }

    /// Index of the next frame.
    #[must_use]
    pub const fn frame_index(&self) -> u64 {
        self.frame
    }

    /// Configuration of this path.
    #[must_use]
    pub const fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Worker pool.
    #[must_use]
    pub const fn jobs(&self) -> &JobSystem {
        &self.jobs
    }

    /// Scene mirror.
    #[must_use]
    pub const fn mirror(&self) -> &SceneGpuMirror {
        &self.mirror
    }

    /// Occlusion state.
    #[must_use]
    pub const fn occlusion(&self) -> &OcclusionQueryManager {
        &self.occlusion
    }

    /// Tile light state.
    #[must_use]
    pub const fn tiles(&self) -> &TiledLightCuller {
        &self.tiles
    }

    /// Batcher.
    #[must_use]
    pub const fn batcher(&self) -> &RenderBatcher {
        &self.batcher
    }

    /// Releases every device buffer owned by the path.
    pub fn release(&mut self, device: &dyn GpuDevice) {
        self.mirror.release(device);
        self.tiles.release(device);
        self.batcher.release(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::culling::Camera;
    use crate::device::HeadlessDevice;
    use crate::error::{DeviceError, RenderError};
    use aperture_core::{
        Aabb, GeometryComponent, MaterialComponent, MeshPart, RenderableComponent, Scene,
    };

    fn view() -> VisibilityView {
        VisibilityView::new(
            Camera::look_at(
                [0.0; 3],
                [0.0, 0.0, -1.0],
                [0.0, 1.0, 0.0],
                std::f32::consts::FRAC_PI_2,
                [320, 240],
                0.1,
                500.0,
            ),
            0xFF,
        )
    }

    fn scene() -> Scene {
        let mut scene = Scene::new();
        let material = scene.add_material(MaterialComponent::default());
        let geometry = scene.add_geometry(GeometryComponent::new(
            0,
            1,
            vec![MeshPart {
                material,
                index_offset: 0,
                index_count: 36,
                vertex_offset: 0,
                lod: 0,
            }],
        ));
        scene.add_renderable(RenderableComponent::new(
            geometry,
            Aabb::from_center_half_extents([0.0, 0.0, -10.0], [1.0; 3]),
        ));
        scene
    }

    #[test]
    fn test_frame_advances_and_draws() {
        let device = HeadlessDevice::new();
        let config = RenderConfig {
            worker_threads: 2,
            ..RenderConfig::default()
        };
        let mut path = RenderPath::new(&device, config).unwrap();
        let scene = scene();
        let mut view = view();

        let output = path.render_frame(&device, &scene, &mut view, None).unwrap();
        assert_eq!(output.frame, 0);
        assert_eq!(output.visible_objects, vec![0]);
        assert_eq!(output.stats.draw_calls(), 1);
        assert_eq!(output.stats.queries_issued, 1);
        assert!(output.has_content());
        assert_eq!(path.frame_index(), 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let device = HeadlessDevice::new();
        let config = RenderConfig {
            tile_size: 0,
            ..RenderConfig::default()
        };
        assert!(matches!(
            RenderPath::new(&device, config),
            Err(RenderError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_out_of_memory_is_fatal() {
        let config = RenderConfig {
            worker_threads: 1,
            occlusion_culling: false,
            ..RenderConfig::default()
        };
        let device = HeadlessDevice::new().with_memory_budget(1024);
        let mut path = RenderPath::new(&device, config).unwrap();
        let result = path.render_frame(&device, &scene(), &mut view(), None);
        assert!(matches!(
            result,
            Err(RenderError::Device(DeviceError::OutOfMemory { .. }))
        ));
    }
}
