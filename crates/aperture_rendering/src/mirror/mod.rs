//! GPU mirror of the scene.
//!
//! Each frame the component provider is flattened into four record arrays
//! (instances, geometry parts, materials, lights) that shaders index with
//! the offsets assigned during the scan.

mod buffer;
mod records;
mod scene_mirror;

pub use buffer::{GpuBuffer, MirrorBuffer, UploadBuffer};
pub use records::{
    affine_rows, pack_unorm4x8, InstancePointer, ShaderGeometryPart, ShaderInstance, ShaderLight,
    ShaderMaterial, NULL_INSTANCE_POINTER,
};
pub use scene_mirror::{MirrorDescriptors, MirrorStats, SceneGpuMirror};
