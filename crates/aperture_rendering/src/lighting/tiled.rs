//! # Tiled Light Culling
//!
//! Splits the viewport into square tiles and records, per tile, which of
//! the view's visible lights can touch it.
//!
//! ## Bucket layout
//!
//! ```text
//!   [ opaque: tile 0 | tile 1 | ... ][ transparent: tile 0 | tile 1 | ... ]
//!     words_per_tile u32 each          words_per_tile u32 each
//! ```
//!
//! Bit `i` of a tile's bucket stands for `visible_lights()[i]`. The opaque
//! half may be tightened with per-tile depth bounds; the transparent half
//! always spans the full view depth because blended surfaces do not write
//! depth.

use std::sync::atomic::{AtomicU32, Ordering};

use aperture_core::math;
use aperture_core::{ComponentProvider, FrameRing, LightComponent, LightKind, INVALID_INDEX};

use crate::config::RenderConfig;
use crate::culling::{Camera, VisibilityView};
use crate::device::{BufferUsage, GpuDevice};
use crate::error::DeviceError;
use crate::jobs::{job_count, JobSystem};
use crate::mirror::GpuBuffer;

/// Which half of the bucket buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TilePass {
    /// Depth-bounded half.
    Opaque,
    /// Full depth range half.
    Transparent,
}

/// Tile layout for one viewport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TileGrid {
    /// Tiles per row.
    pub tiles_x: u32,
    /// Tiles per column.
    pub tiles_y: u32,
    /// Tile edge in pixels.
    pub tile_size: u32,
    /// Bucket words per tile.
    pub words_per_tile: u32,
}

impl TileGrid {
    /// Covers `viewport` with `tile_size` tiles, partial tiles included.
    #[must_use]
    pub fn new(viewport: [u32; 2], tile_size: u32, max_lights: u32) -> Self {
        Self {
            tiles_x: viewport[0].div_ceil(tile_size),
            tiles_y: viewport[1].div_ceil(tile_size),
            tile_size,
            words_per_tile: max_lights.div_ceil(32),
        }
    }

    /// Number of tiles.
    #[inline]
    #[must_use]
    pub const fn tile_count(&self) -> u32 {
        self.tiles_x * self.tiles_y
    }

    /// Words of one half.
    #[inline]
    #[must_use]
    pub const fn half_words(&self) -> usize {
        self.tile_count() as usize * self.words_per_tile as usize
    }

    /// First word of a tile's bucket.
    #[inline]
    #[must_use]
    pub const fn bucket_offset(&self, tile: u32, pass: TilePass) -> usize {
        let local = tile as usize * self.words_per_tile as usize;
        match pass {
            TilePass::Opaque => local,
            TilePass::Transparent => self.half_words() + local,
        }
    }
}

/// Counters of the last binning pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TileStats {
    /// Tiles in the grid.
    pub tiles: u32,
    /// Visible lights binned.
    pub lights: u32,
    /// Set bits in the opaque half.
    pub opaque_entries: u32,
    /// Set bits in the transparent half.
    pub transparent_entries: u32,
    /// False when the buffer was cleared instead of binned.
    pub dispatched: bool,
}

/// Screen footprint of a light: inclusive tile range and linear depth range.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Footprint {
    tiles: [u32; 4],
    depth: [f32; 2],
}

impl Footprint {
    #[inline]
    fn covers(&self, tx: u32, ty: u32) -> bool {
        (self.tiles[0]..=self.tiles[2]).contains(&tx)
            && (self.tiles[1]..=self.tiles[3]).contains(&ty)
    }

    #[inline]
    fn overlaps(&self, depth: [f32; 2]) -> bool {
        self.depth[0] <= depth[1] && self.depth[1] >= depth[0]
    }
}

/// Projects a light's bounds to a tile rectangle.
///
/// Returns `None` for lights entirely off screen. A corner behind the eye
/// makes the projection unusable, so such lights cover every tile.
fn footprint(camera: &Camera, grid: &TileGrid, light: &LightComponent) -> Option<Footprint> {
    let all = [0, 0, grid.tiles_x - 1, grid.tiles_y - 1];
    if light.kind == LightKind::Directional {
        return Some(Footprint {
            tiles: all,
            depth: [f32::NEG_INFINITY, f32::INFINITY],
        });
    }

    let center = camera.linear_depth(light.position);
    let depth = [center - light.range, center + light.range];

    #[allow(clippy::cast_precision_loss)]
    let (width, height) = (camera.viewport[0] as f32, camera.viewport[1] as f32);
    let mut min = [f32::INFINITY; 2];
    let mut max = [f32::NEG_INFINITY; 2];
    for corner in light.aabb().corners() {
        let point = [corner[0], corner[1], corner[2], 1.0];
        let clip = math::transform_vec4(&camera.view_projection, point);
        if clip[3] <= 0.0 {
            return Some(Footprint { tiles: all, depth });
        }
        let x = (clip[0] / clip[3] * 0.5 + 0.5) * width;
        let y = (0.5 - clip[1] / clip[3] * 0.5) * height;
        min = [min[0].min(x), min[1].min(y)];
        max = [max[0].max(x), max[1].max(y)];
    }
    if max[0] < 0.0 || max[1] < 0.0 || min[0] >= width || min[1] >= height {
        return None;
    }

    #[allow(clippy::cast_precision_loss)]
    let tile = grid.tile_size as f32;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let to_tile = |pixel: f32, tiles: u32| ((pixel.max(0.0) / tile) as u32).min(tiles - 1);
    Some(Footprint {
        tiles: [
            to_tile(min[0], grid.tiles_x),
            to_tile(min[1], grid.tiles_y),
            to_tile(max[0], grid.tiles_x),
            to_tile(max[1], grid.tiles_y),
        ],
        depth,
    })
}

#[derive(Default)]
struct TileScratch {
    opaque: Vec<u32>,
    transparent: Vec<u32>,
}

/// Bins visible lights into screen tiles and uploads the buckets.
#[derive(Debug)]
pub struct TiledLightCuller {
    tile_size: u32,
    group_size: u32,
    max_lights: u32,
    grid: TileGrid,
    words: Vec<AtomicU32>,
    footprints: Vec<Option<Footprint>>,
    buffers: FrameRing<GpuBuffer>,
    stats: TileStats,
}

impl TiledLightCuller {
    /// Creates a culler; the bucket buffers grow on first use.
    #[must_use]
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            tile_size: config.tile_size,
            group_size: config.tile_group_size,
            max_lights: config.max_visible_lights,
            grid: TileGrid::default(),
            words: Vec::new(),
            footprints: Vec::new(),
            buffers: FrameRing::new(config.frame_slots(), |_| {
                let min = config.min_buffer_size;
                GpuBuffer::new("aperture_tile_lights", BufferUsage::Upload, min)
            }),
            stats: TileStats::default(),
        }
    }

    /// Bins `view`'s visible lights and uploads the buckets of `frame`.
    ///
    /// `depth_bounds`, one `[min, max]` linear depth per tile in row-major
    /// order, restricts the opaque half. Without a visible light the
    /// buffer is cleared and nothing is dispatched.
    ///
    /// # Errors
    ///
    /// Returns the device error if the bucket buffer cannot grow.
    ///
    /// # Panics
    ///
    /// Panics if `depth_bounds` does not hold one entry per tile.
    pub fn cull(
        &mut self,
        device: &dyn GpuDevice,
        jobs: &JobSystem,
        provider: &dyn ComponentProvider,
        view: &VisibilityView,
        depth_bounds: Option<&[[f32; 2]]>,
        frame: u64,
    ) -> Result<TileStats, DeviceError> {
        let camera = view.camera();
        let grid = TileGrid::new(camera.viewport, self.tile_size, self.max_lights);
        if let Some(bounds) = depth_bounds {
            assert_eq!(
                bounds.len(),
                grid.tile_count() as usize,
                "tile depth bounds must hold one entry per tile"
            );
        }
        self.grid = grid;
        let total = grid.half_words() * 2;
        self.words.resize_with(total, AtomicU32::default);

        let buffer = self.buffers.get_mut(frame);
        buffer.ensure_capacity(device, (total as u64 * 4).max(4))?;
        let Some(handle) = buffer.handle() else {
            return Ok(self.stats);
        };

        let visible = view.visible_lights();
        if visible.is_empty() {
            for word in &mut self.words {
                *word.get_mut() = 0;
            }
            device.clear_buffer(handle);
            self.stats = TileStats {
                tiles: grid.tile_count(),
                ..TileStats::default()
            };
            return Ok(self.stats);
        }

        let lights = provider.lights();
        let binned = visible.len().min(grid.words_per_tile as usize * 32);
        self.footprints.clear();
        self.footprints.extend(
            visible[..binned]
                .iter()
                .map(|&l| footprint(camera, &grid, &lights[l as usize])),
        );

        let footprints = &self.footprints[..];
        let words = &self.words[..];
        let full_range = [camera.z_near, camera.z_far];
        let stride = grid.words_per_tile as usize;

        jobs.dispatch::<TileScratch, _>(grid.tile_count(), self.group_size, |args, scratch| {
            let tile = args.job_index;
            let (tx, ty) = (tile % grid.tiles_x, tile / grid.tiles_x);
            let opaque_range = depth_bounds.map_or(full_range, |b| b[tile as usize]);

            scratch.opaque.clear();
            scratch.opaque.resize(stride, 0);
            scratch.transparent.clear();
            scratch.transparent.resize(stride, 0);
            for (bit, fp) in footprints.iter().enumerate() {
                let Some(fp) = fp else { continue };
                if !fp.covers(tx, ty) {
                    continue;
                }
                let mask = 1u32 << (bit % 32);
                if fp.overlaps(opaque_range) {
                    scratch.opaque[bit / 32] |= mask;
                }
                if fp.overlaps(full_range) {
                    scratch.transparent[bit / 32] |= mask;
                }
            }

            let opaque = grid.bucket_offset(tile, TilePass::Opaque);
            let transparent = grid.bucket_offset(tile, TilePass::Transparent);
            for (slot, &value) in words[opaque..opaque + stride].iter().zip(&scratch.opaque) {
                slot.store(value, Ordering::Relaxed);
            }
            for (slot, &value) in words[transparent..transparent + stride]
                .iter()
                .zip(&scratch.transparent)
            {
                slot.store(value, Ordering::Relaxed);
            }
        });

        let data: Vec<u32> = self.words.iter().map(|w| w.load(Ordering::Relaxed)).collect();
        device.write_buffer(handle, 0, bytemuck::cast_slice(&data));

        let (opaque, transparent) = data.split_at(grid.half_words());
        self.stats = TileStats {
            tiles: grid.tile_count(),
            lights: job_count(binned),
            opaque_entries: opaque.iter().map(|w| w.count_ones()).sum(),
            transparent_entries: transparent.iter().map(|w| w.count_ones()).sum(),
            dispatched: true,
        };
        tracing::trace!(
            frame,
            tiles = self.stats.tiles,
            lights = self.stats.lights,
            "lights binned"
        );
        Ok(self.stats)
    }

    /// Grid of the last pass.
    #[must_use]
    pub const fn grid(&self) -> TileGrid {
        self.grid
    }

    /// Positions in the visible light list whose bit is set for a tile.
    #[must_use]
    pub fn lights_in_tile(&self, tx: u32, ty: u32, pass: TilePass) -> Vec<u32> {
        let grid = self.grid;
        if tx >= grid.tiles_x || ty >= grid.tiles_y {
            return Vec::new();
        }
        let first = grid.bucket_offset(ty * grid.tiles_x + tx, pass);
        let mut out = Vec::new();
        for (w, word) in (0u32..).zip(&self.words[first..first + grid.words_per_tile as usize]) {
            let mut bits = word.load(Ordering::Relaxed);
            while bits != 0 {
                out.push(w * 32 + bits.trailing_zeros());
                bits &= bits - 1;
            }
        }
        out
    }

    /// Bucket words of the last pass, opaque half first.
    #[must_use]
    pub fn bucket_words(&self) -> Vec<u32> {
        self.words.iter().map(|w| w.load(Ordering::Relaxed)).collect()
    }

    /// Descriptor index of `frame`'s bucket buffer.
    #[must_use]
    pub fn descriptor(&self, device: &dyn GpuDevice, frame: u64) -> u32 {
        self.buffers
            .get(frame)
            .handle()
            .map_or(INVALID_INDEX, |h| device.descriptor_index(h))
    }

    /// Counters of the last pass.
    #[must_use]
    pub const fn stats(&self) -> TileStats {
        self.stats
    }

    /// Releases every bucket buffer.
    pub fn release(&mut self, device: &dyn GpuDevice) {
        for buffer in self.buffers.iter_mut() {
            buffer.release(device);
        }
    }
}
