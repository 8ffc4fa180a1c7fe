//! # Render Configuration
//!
//! One explicit configuration struct per render path, passed by reference
//! into every stage. Loaded once at startup from TOML.
//!
//! ```toml
//! frames_in_flight = 3
//! occlusion_culling = true
//! tile_size = 16
//! ```

use std::path::Path;

use aperture_core::MAX_FRAMES_IN_FLIGHT;
use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult};

/// Configuration of one render path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Number of frames the CPU may run ahead of the GPU (F).
    pub frames_in_flight: u32,
    /// Worker threads for dispatches; 0 lets the pool decide.
    pub worker_threads: usize,
    /// Group size of the scene scan dispatch.
    pub scan_group_size: u32,
    /// Group size of the visibility dispatch.
    pub cull_group_size: u32,
    /// Group size of the tile light dispatch (tiles per group).
    pub tile_group_size: u32,
    /// Enables occlusion queries and history-based culling.
    pub occlusion_culling: bool,
    /// Capacity of each per-frame occlusion query pool.
    pub max_occlusion_queries: u32,
    /// Lights kept per frame; the rest are dropped with a warning.
    pub max_visible_lights: u32,
    /// Tile edge in pixels.
    pub tile_size: u32,
    /// Minimum size of every GPU buffer in bytes.
    pub min_buffer_size: u64,
    /// Mirror upload buffers into a device-local buffer through a copy.
    pub device_local_mirror: bool,
    /// Fraction of `max_draw_distance` over which instances dither out.
    pub draw_distance_fade: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            worker_threads: 0,
            scan_group_size: 64,
            cull_group_size: 64,
            tile_group_size: 16,
            occlusion_culling: true,
            max_occlusion_queries: 4096,
            max_visible_lights: 1024,
            tile_size: 16,
            min_buffer_size: 4096,
            device_local_mirror: false,
            draw_distance_fade: 0.1,
        }
    }
}

impl RenderConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not parse or fails validation.
    pub fn from_toml_str(source: &str) -> RenderResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the config is invalid.
    pub fn load(path: impl AsRef<Path>) -> RenderResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> RenderResult<()> {
        let frames = self.frames_in_flight as usize;
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&frames) {
            return Err(RenderError::InvalidConfig(format!(
                "frames_in_flight must be in 1..={MAX_FRAMES_IN_FLIGHT}, got {frames}"
            )));
        }
        for (name, value) in [
            ("scan_group_size", self.scan_group_size),
            ("cull_group_size", self.cull_group_size),
            ("tile_group_size", self.tile_group_size),
            ("tile_size", self.tile_size),
            ("max_visible_lights", self.max_visible_lights),
        ] {
            if value == 0 {
                return Err(RenderError::InvalidConfig(format!("{name} must be non-zero")));
            }
        }
        if self.min_buffer_size < 256 {
            return Err(RenderError::InvalidConfig(format!(
                "min_buffer_size must be at least 256 bytes, got {}",
                self.min_buffer_size
            )));
        }
        if !(0.0..=1.0).contains(&self.draw_distance_fade) {
            return Err(RenderError::InvalidConfig(format!(
                "draw_distance_fade must be in 0..=1, got {}",
                self.draw_distance_fade
            )));
        }
        Ok(())
    }

    /// Frames in flight as a slot count.
    #[inline]
    #[must_use]
    pub const fn frame_slots(&self) -> usize {
        self.frames_in_flight as usize
    }
}
