//! # Component System
//!
//! Components are pure data containers with no behavior. The renderer reads
//! four kinds of them every frame: renderables, lights, materials and
//! geometries. Each kind is tagged with a [`ComponentKind`] at compile time,
//! so per-kind routines are picked by a `match`, never by runtime type
//! inspection.

use crate::ecs::Entity;
use crate::math::{Aabb, Mat4, IDENTITY};

/// Tag identifying a component kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    /// Drawable instance of a geometry.
    Renderable,
    /// Light source.
    Light,
    /// Shading parameters.
    Material,
    /// Vertex/index storage and its parts.
    Geometry,
}

/// Marker trait for scene components.
///
/// # Example
///
/// ```rust,ignore
/// impl Component for RenderableComponent {
///     const KIND: ComponentKind = ComponentKind::Renderable;
/// }
/// ```
pub trait Component: Send + Sync + 'static {
    /// The kind tag of this component type.
    const KIND: ComponentKind;
}

/// Sentinel for "no resource bound".
pub const INVALID_INDEX: u32 = u32::MAX;

/// Renderable instance of a geometry.
///
/// Rebuilt every frame by whoever owns the simulation; the renderer never
/// patches individual fields.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderableComponent {
    /// Geometry entity this instance draws.
    pub geometry: Entity,
    /// World transform for this frame.
    pub transform: Mat4,
    /// World transform of the previous frame (motion vectors).
    pub prev_transform: Mat4,
    /// World-space bounds.
    pub aabb: Aabb,
    /// Caller-supplied sort bits (low 20 bits are used).
    pub sort_bits: u32,
    /// Render flags (`FLAG_*`).
    pub flags: u32,
    /// Instance tint, RGBA.
    pub color: [f32; 4],
    /// Distance beyond which the instance is not drawn.
    pub max_draw_distance: f32,
    /// Bitmask of cameras that may see this instance (multi-view).
    pub camera_mask: u8,
}

impl Component for RenderableComponent {
    const KIND: ComponentKind = ComponentKind::Renderable;
}

impl RenderableComponent {
    /// Flag: instance takes part in rendering.
    pub const FLAG_RENDERABLE: u32 = 1 << 0;
    /// Flag: instance casts shadows.
    pub const FLAG_CAST_SHADOW: u32 = 1 << 1;
    /// Flag: instance may be occlusion culled.
    pub const FLAG_OCCLUDER_TESTED: u32 = 1 << 2;

    /// Creates a renderable with an identity transform.
    #[must_use]
    pub fn new(geometry: Entity, aabb: Aabb) -> Self {
        Self {
            geometry,
            transform: IDENTITY,
            prev_transform: IDENTITY,
            aabb,
            sort_bits: 0,
            flags: Self::FLAG_RENDERABLE | Self::FLAG_OCCLUDER_TESTED,
            color: [1.0; 4],
            max_draw_distance: f32::INFINITY,
            camera_mask: 0xFF,
        }
    }

    /// Sets the world transform; bounds are recomputed from `local_bounds`.
    #[must_use]
    pub fn with_transform(mut self, transform: Mat4, local_bounds: &Aabb) -> Self {
        self.prev_transform = self.transform;
        self.transform = transform;
        self.aabb = local_bounds.transform(&transform);
        self
    }

    /// Sets the sort bits.
    #[must_use]
    pub const fn with_sort_bits(mut self, sort_bits: u32) -> Self {
        self.sort_bits = sort_bits;
        self
    }

    /// Sets the maximum draw distance.
    #[must_use]
    pub const fn with_max_draw_distance(mut self, distance: f32) -> Self {
        self.max_draw_distance = distance;
        self
    }

    /// Sets the camera mask.
    #[must_use]
    pub const fn with_camera_mask(mut self, mask: u8) -> Self {
        self.camera_mask = mask;
        self
    }

    /// Returns true if the renderable flag is set.
    #[inline]
    #[must_use]
    pub const fn is_renderable(&self) -> bool {
        self.flags & Self::FLAG_RENDERABLE != 0
    }
}

/// Light type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LightKind {
    /// Infinitely distant light; always visible.
    Directional,
    /// Omnidirectional light with a finite range.
    #[default]
    Point,
    /// Cone light with a finite range.
    Spot,
}

impl LightKind {
    /// Numeric tag written to the GPU.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        match self {
            Self::Directional => 0,
            Self::Point => 1,
            Self::Spot => 2,
        }
    }
}

/// Light source.
#[derive(Clone, Debug, PartialEq)]
pub struct LightComponent {
    /// Light type.
    pub kind: LightKind,
    /// World position.
    pub position: [f32; 3],
    /// Normalized direction (directional and spot lights).
    pub direction: [f32; 3],
    /// Linear RGB color.
    pub color: [f32; 3],
    /// Intensity multiplier.
    pub intensity: f32,
    /// Influence radius (point and spot lights).
    pub range: f32,
    /// Outer cone angle in radians (spot lights).
    pub outer_cone_angle: f32,
    /// Whether the light casts shadows.
    pub cast_shadow: bool,
}

impl Component for LightComponent {
    const KIND: ComponentKind = ComponentKind::Light;
}

impl LightComponent {
    /// Creates a point light.
    #[must_use]
    pub fn point(position: [f32; 3], color: [f32; 3], range: f32, intensity: f32) -> Self {
        Self {
            kind: LightKind::Point,
            position,
            direction: [0.0, -1.0, 0.0],
            color,
            intensity,
            range,
            outer_cone_angle: 0.0,
            cast_shadow: false,
        }
    }

    /// Creates a spot light.
    #[must_use]
    pub fn spot(
        position: [f32; 3],
        direction: [f32; 3],
        color: [f32; 3],
        range: f32,
        intensity: f32,
        outer_cone_angle: f32,
    ) -> Self {
        Self {
            kind: LightKind::Spot,
            position,
            direction,
            color,
            intensity,
            range,
            outer_cone_angle,
            cast_shadow: false,
        }
    }

    /// Creates a directional light.
    #[must_use]
    pub fn directional(direction: [f32; 3], color: [f32; 3], intensity: f32) -> Self {
        Self {
            kind: LightKind::Directional,
            position: [0.0; 3],
            direction,
            color,
            intensity,
            range: f32::INFINITY,
            outer_cone_angle: 0.0,
            cast_shadow: false,
        }
    }

    /// World-space bounds of the light's influence volume.
    ///
    /// Spot lights use their full range sphere; the cone is not fitted.
    #[must_use]
    pub fn aabb(&self) -> Aabb {
        match self.kind {
            LightKind::Directional => Aabb::INFINITE,
            LightKind::Point | LightKind::Spot => Aabb::from_sphere(self.position, self.range),
        }
    }
}

/// How a material is blended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// Written in the opaque pass.
    #[default]
    Opaque,
    /// Alpha blended in the transparent pass.
    Alpha,
    /// Additively blended in the transparent pass.
    Additive,
}

/// Texture binding of a material slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureSlot {
    /// Bindless descriptor index, or [`INVALID_INDEX`].
    pub descriptor: u32,
    /// UV set used to sample it.
    pub uv_set: u8,
}

impl Default for TextureSlot {
    fn default() -> Self {
        Self {
            descriptor: INVALID_INDEX,
            uv_set: 0,
        }
    }
}

/// Number of texture slots per material.
pub const MATERIAL_TEXTURE_SLOTS: usize = 4;

/// Shading parameters and texture bindings.
#[derive(Clone, Debug, PartialEq)]
pub struct MaterialComponent {
    /// Base color, RGBA.
    pub base_color: [f32; 4],
    /// Emissive color, RGB.
    pub emissive: [f32; 3],
    /// Emissive strength.
    pub emissive_strength: f32,
    /// Perceptual roughness.
    pub roughness: f32,
    /// Metalness.
    pub metalness: f32,
    /// Alpha test threshold; 0 disables alpha testing.
    pub alpha_ref: f32,
    /// Blend mode.
    pub blend: BlendMode,
    /// Whether back faces are drawn.
    pub double_sided: bool,
    /// Texture bindings: base color, normal, surface, emissive.
    pub textures: [TextureSlot; MATERIAL_TEXTURE_SLOTS],
}

impl Component for MaterialComponent {
    const KIND: ComponentKind = ComponentKind::Material;
}

impl Default for MaterialComponent {
    fn default() -> Self {
        Self {
            base_color: [1.0; 4],
            emissive: [0.0; 3],
            emissive_strength: 0.0,
            roughness: 0.5,
            metalness: 0.0,
            alpha_ref: 0.0,
            blend: BlendMode::Opaque,
            double_sided: false,
            textures: [TextureSlot::default(); MATERIAL_TEXTURE_SLOTS],
        }
    }
}

impl MaterialComponent {
    /// Returns true if the material belongs to the transparent pass.
    #[inline]
    #[must_use]
    pub fn is_transparent(&self) -> bool {
        self.blend != BlendMode::Opaque
    }

    /// Returns true if the material alpha tests on its own.
    #[inline]
    #[must_use]
    pub fn is_alpha_tested(&self) -> bool {
        self.alpha_ref > 0.0
    }
}

/// One drawable range of a geometry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshPart {
    /// Material entity used for this range.
    pub material: Entity,
    /// First index in the index buffer.
    pub index_offset: u32,
    /// Number of indices.
    pub index_count: u32,
    /// Value added to each index.
    pub vertex_offset: u32,
    /// Level of detail this part belongs to.
    pub lod: u32,
}

/// Vertex/index storage and its parts.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GeometryComponent {
    /// Bindless descriptor of the vertex buffer.
    pub vertex_buffer: u32,
    /// Bindless descriptor of the index buffer.
    pub index_buffer: u32,
    /// Drawable parts across all LODs.
    pub parts: Vec<MeshPart>,
    /// Ascending camera distances at which LOD 1, 2, ... take over.
    pub lod_distances: Vec<f32>,
}

impl Component for GeometryComponent {
    const KIND: ComponentKind = ComponentKind::Geometry;
}

impl GeometryComponent {
    /// Creates a geometry with a single LOD.
    #[must_use]
    pub fn new(vertex_buffer: u32, index_buffer: u32, parts: Vec<MeshPart>) -> Self {
        Self {
            vertex_buffer,
            index_buffer,
            parts,
            lod_distances: Vec::new(),
        }
    }

    /// Number of levels of detail.
    #[must_use]
    pub fn lod_count(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        let count = self.lod_distances.len() as u32;
        count + 1
    }

    /// Picks the level of detail for a camera distance.
    #[must_use]
    pub fn select_lod(&self, distance: f32) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        let lod = self.lod_distances.iter().take_while(|&&d| distance >= d).count() as u32;
        lod
    }

    /// Iterates the parts of one level of detail.
    pub fn parts_for_lod(&self, lod: u32) -> impl Iterator<Item = (usize, &MeshPart)> {
        self.parts.iter().enumerate().filter(move |(_, part)| part.lod == lod)
    }
}
