//! # Entity Component System
//!
//! The minimal ECS the renderer consumes.
//!
//! ## Design Philosophy
//!
//! - Entities are stable identifiers independent of storage layout
//! - Components are stored in dense arrays for cache efficiency
//! - Entity <-> slot maps are maintained on insert/remove, never rebuilt
//! - Per-kind behavior is selected by [`ComponentKind`], not by type inspection

mod component;
mod entity;
mod storage;

pub use component::{
    BlendMode, Component, ComponentKind, GeometryComponent, LightComponent, LightKind,
    MaterialComponent, MeshPart, RenderableComponent, TextureSlot, INVALID_INDEX,
    MATERIAL_TEXTURE_SLOTS,
};
pub use entity::{Entity, EntityAllocator};
pub use storage::ComponentStore;
