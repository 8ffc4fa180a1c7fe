//! Fixed-layout records serialized into the mirror buffers.
//!
//! All records are `repr(C)`, a multiple of 16 bytes, and contain no
//! implicit padding so they can be written as raw words.

use aperture_core::{
    BlendMode, GeometryComponent, LightComponent, Mat4, MaterialComponent, MeshPart,
    RenderableComponent, INVALID_INDEX, MATERIAL_TEXTURE_SLOTS,
};
use bytemuck::{Pod, Zeroable};

/// Packs RGBA in 0..=1 into RGBA8 unorm (R in the low byte).
#[must_use]
pub fn pack_unorm4x8(color: [f32; 4]) -> u32 {
    color.iter().enumerate().fold(0, |packed, (i, c)| {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let byte = (c.clamp(0.0, 1.0) * 255.0).round() as u32;
        packed | (byte << (i * 8))
    })
}

/// First three rows of a column-major affine matrix.
#[must_use]
pub fn affine_rows(m: &Mat4) -> [[f32; 4]; 3] {
    [
        [m[0][0], m[1][0], m[2][0], m[3][0]],
        [m[0][1], m[1][1], m[2][1], m[3][1]],
        [m[0][2], m[1][2], m[2][2], m[3][2]],
    ]
}

/// Per-instance record.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ShaderInstance {
    /// Current world transform, row-major 3x4.
    pub transform: [[f32; 4]; 3],
    /// Previous world transform, row-major 3x4.
    pub prev_transform: [[f32; 4]; 3],
    /// World bounds minimum.
    pub aabb_min: [f32; 3],
    /// Offset of the first geometry part record.
    pub geometry_offset: u32,
    /// World bounds maximum.
    pub aabb_max: [f32; 3],
    /// Number of geometry part records.
    pub part_count: u32,
    /// RGBA8 tint.
    pub color: u32,
    /// Render flags.
    pub flags: u32,
    /// Index of the owning entity.
    pub entity: u32,
    /// Caller sort bits.
    pub sort_bits: u32,
}

impl ShaderInstance {
    /// Builds the record of a renderable whose geometry parts start at
    /// `geometry_offset`.
    #[must_use]
    pub fn new(
        renderable: &RenderableComponent,
        entity_index: u32,
        geometry_offset: u32,
        part_count: u32,
    ) -> Self {
        Self {
            transform: affine_rows(&renderable.transform),
            prev_transform: affine_rows(&renderable.prev_transform),
            aabb_min: renderable.aabb.min,
            geometry_offset,
            aabb_max: renderable.aabb.max,
            part_count,
            color: pack_unorm4x8(renderable.color),
            flags: renderable.flags,
            entity: entity_index,
            sort_bits: renderable.sort_bits,
        }
    }
}

/// Per geometry part record.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ShaderGeometryPart {
    /// Bindless vertex buffer.
    pub vertex_buffer: u32,
    /// Bindless index buffer.
    pub index_buffer: u32,
    /// First index.
    pub index_offset: u32,
    /// Index count.
    pub index_count: u32,
    /// Vertex bias.
    pub vertex_offset: u32,
    /// Offset of the material record, or `INVALID_INDEX`.
    pub material_offset: u32,
    /// Level of detail.
    pub lod: u32,
    /// Padding.
    pub _pad: u32,
}

impl ShaderGeometryPart {
    /// Builds a part record.
    #[must_use]
    pub fn new(geometry: &GeometryComponent, part: &MeshPart, material_offset: u32) -> Self {
        Self {
            vertex_buffer: geometry.vertex_buffer,
            index_buffer: geometry.index_buffer,
            index_offset: part.index_offset,
            index_count: part.index_count,
            vertex_offset: part.vertex_offset,
            material_offset,
            lod: part.lod,
            _pad: 0,
        }
    }
}

/// Per material record.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ShaderMaterial {
    /// Base color factor.
    pub base_color: [f32; 4],
    /// Emissive color.
    pub emissive: [f32; 3],
    /// Emissive multiplier.
    pub emissive_strength: f32,
    /// Roughness.
    pub roughness: f32,
    /// Metalness.
    pub metalness: f32,
    /// Alpha test reference; 0 disables.
    pub alpha_ref: f32,
    /// `MATERIAL_*` flags.
    pub flags: u32,
    /// Texture descriptor and UV set per slot.
    pub textures: [[u32; 2]; MATERIAL_TEXTURE_SLOTS],
}

impl ShaderMaterial {
    /// Blend mode alpha.
    pub const FLAG_BLEND_ALPHA: u32 = 1 << 0;
    /// Blend mode additive.
    pub const FLAG_BLEND_ADDITIVE: u32 = 1 << 1;
    /// Double sided.
    pub const FLAG_DOUBLE_SIDED: u32 = 1 << 2;

    /// Builds a material record.
    #[must_use]
    pub fn new(material: &MaterialComponent) -> Self {
        let mut flags = match material.blend {
            BlendMode::Opaque => 0,
            BlendMode::Alpha => Self::FLAG_BLEND_ALPHA,
            BlendMode::Additive => Self::FLAG_BLEND_ADDITIVE,
        };
        if material.double_sided {
            flags |= Self::FLAG_DOUBLE_SIDED;
        }
        Self {
            base_color: material.base_color,
            emissive: material.emissive,
            emissive_strength: material.emissive_strength,
            roughness: material.roughness,
            metalness: material.metalness,
            alpha_ref: material.alpha_ref,
            flags,
            textures: material
                .textures
                .map(|slot| [slot.descriptor, u32::from(slot.uv_set)]),
        }
    }
}

/// Per light record.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ShaderLight {
    /// World position.
    pub position: [f32; 3],
    /// Influence radius.
    pub range: f32,
    /// Normalized direction.
    pub direction: [f32; 3],
    /// `LightKind` discriminant.
    pub kind: u32,
    /// Linear color.
    pub color: [f32; 3],
    /// Intensity.
    pub intensity: f32,
    /// Cosine of the outer cone angle.
    pub outer_cone_cos: f32,
    /// Casts shadows.
    pub cast_shadow: u32,
    /// Index of the owning entity.
    pub entity: u32,
    /// Padding.
    pub _pad: u32,
}

impl ShaderLight {
    /// Builds a light record.
    #[must_use]
    pub fn new(light: &LightComponent, entity_index: u32) -> Self {
        Self {
            position: light.position,
            range: light.range,
            direction: light.direction,
            kind: light.kind.as_u32(),
            color: light.color,
            intensity: light.intensity,
            outer_cone_cos: light.outer_cone_angle.cos(),
            cast_shadow: u32::from(light.cast_shadow),
            entity: entity_index,
            _pad: 0,
        }
    }
}

/// Entry of the per-frame instance pointer buffer that draws index into.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct InstancePointer {
    /// Offset of the instance record.
    pub instance: u32,
    /// Dither amount in the low byte, camera mask in the next byte.
    pub packed: u32,
}

impl InstancePointer {
    /// Packs a pointer; `dither` is clamped to 0..=1.
    #[must_use]
    pub fn new(instance: u32, dither: f32, camera_mask: u8) -> Self {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let dither = (dither.clamp(0.0, 1.0) * 255.0).round() as u32;
        Self {
            instance,
            packed: dither | (u32::from(camera_mask) << 8),
        }
    }

    /// Dither amount in 0..=1.
    #[must_use]
    pub fn dither(&self) -> f32 {
        #[allow(clippy::cast_precision_loss)]
        let value = (self.packed & 0xFF) as f32 / 255.0;
        value
    }

    /// Camera mask.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn camera_mask(&self) -> u8 {
        ((self.packed >> 8) & 0xFF) as u8
    }
}

/// Pointer whose instance could not be resolved.
pub const NULL_INSTANCE_POINTER: InstancePointer = InstancePointer {
    instance: INVALID_INDEX,
    packed: 0,
};

#[cfg(test)]
mod tests {
    use super::*;
    use aperture_core::math;

    #[test]
    fn test_record_sizes() {
        assert_eq!(std::mem::size_of::<ShaderInstance>(), 144);
        assert_eq!(std::mem::size_of::<ShaderGeometryPart>(), 32);
        assert_eq!(std::mem::size_of::<ShaderMaterial>(), 80);
        assert_eq!(std::mem::size_of::<ShaderLight>(), 64);
        assert_eq!(std::mem::size_of::<InstancePointer>(), 8);
    }

    #[test]
    fn test_affine_rows_keep_translation() {
        let rows = affine_rows(&math::translation([1.0, 2.0, 3.0]));
        assert_eq!(rows[0], [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(rows[1], [0.0, 1.0, 0.0, 2.0]);
        assert_eq!(rows[2], [0.0, 0.0, 1.0, 3.0]);
    }

    #[test]
    fn test_packing() {
        assert_eq!(pack_unorm4x8([1.0, 0.0, 0.0, 1.0]), 0xFF00_00FF);
        let pointer = InstancePointer::new(7, 0.9, 0b101);
        assert_eq!(pointer.camera_mask(), 0b101);
        assert!((pointer.dither() - 0.9).abs() < 0.01);
    }
}
