//! # APERTURE Core
//!
//! Scene data shared between the simulation and the renderer:
//! - Stable entity identifiers
//! - Dense component stores with entity <-> slot maps
//! - The per-frame component provider the renderer reads
//!
//! ## Architecture Rules
//!
//! 1. **Entities are opaque** - Never derive storage positions from them
//! 2. **Data-oriented design** - Components are stored in contiguous arrays
//! 3. **Read-only rendering** - The renderer never mutates the scene
//!
//! ## Example
//!
//! ```rust,ignore
//! use aperture_core::{Scene, MaterialComponent};
//!
//! let mut scene = Scene::new();
//! let material = scene.add_material(MaterialComponent::default());
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod ecs;
pub mod math;
pub mod scene;
pub mod sync;

pub use ecs::{
    BlendMode, Component, ComponentKind, ComponentStore, Entity, EntityAllocator,
    GeometryComponent, LightComponent, LightKind, MaterialComponent, MeshPart,
    RenderableComponent, TextureSlot, INVALID_INDEX, MATERIAL_TEXTURE_SLOTS,
};
pub use math::{Aabb, Mat4};
pub use scene::{ComponentProvider, Scene};
pub use sync::{FrameRing, MAX_FRAMES_IN_FLIGHT};
