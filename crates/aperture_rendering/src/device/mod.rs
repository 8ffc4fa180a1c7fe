//! # GPU Device Abstraction
//!
//! The narrow slice of a graphics API the visibility core needs:
//!
//! - buffer create / write / copy / clear and bindless descriptor lookup
//! - occlusion query pools (create / reset / begin / end / resolve)
//! - non-blocking readback of resolved results
//! - one submission of the recorded commands per frame
//! - capability flags, probed once by the consumers
//!
//! All methods take `&self`; implementations serialize command recording
//! internally so stages can share one device across the worker pool.

mod headless;
mod wgpu_backend;

pub use headless::{DeviceCounters, HeadlessDevice, VisibilityOracle};
pub use wgpu_backend::WgpuDevice;

use aperture_core::Aabb;

use crate::error::DeviceError;

/// Size in bytes of one resolved occlusion query result.
pub const QUERY_RESULT_SIZE: u64 = 8;

/// Opaque handle to a device buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u32);

/// Opaque handle to an occlusion query pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueryPoolHandle(pub(crate) u32);

/// Memory class of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Host-visible, written by the CPU every frame.
    Upload,
    /// Device-local, written only through copies.
    DeviceLocal,
    /// Host-readable destination of query resolves.
    Readback,
    /// Device-local destination of predication resolves.
    Predication,
}

/// Buffer creation parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    /// Debug label.
    pub label: &'static str,
    /// Size in bytes.
    pub size: u64,
    /// Memory class.
    pub usage: BufferUsage,
}

/// Optional device features.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Occlusion queries are available.
    pub occlusion_queries: bool,
    /// Query results can drive conditional rendering.
    pub predication: bool,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            occlusion_queries: true,
            predication: false,
        }
    }
}

/// Graphics device used by the render path.
pub trait GpuDevice: Send + Sync {
    /// Optional features of this device.
    fn capabilities(&self) -> DeviceCapabilities;

    /// Allocates a buffer.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::OutOfMemory`] when the device cannot back it.
    fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferHandle, DeviceError>;

    /// Releases a buffer. Unknown handles are ignored.
    fn destroy_buffer(&self, buffer: BufferHandle);

    /// Writes host data at `offset`.
    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]);

    /// Enqueues a copy of the first `size` bytes of `src` into `dst`.
    fn copy_buffer(&self, src: BufferHandle, dst: BufferHandle, size: u64);

    /// Enqueues a zero fill of the whole buffer.
    fn clear_buffer(&self, buffer: BufferHandle);

    /// Bindless descriptor index of the buffer.
    fn descriptor_index(&self, buffer: BufferHandle) -> u32;

    /// Creates a pool of `count` occlusion queries.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Unsupported`] when queries are unavailable.
    fn create_query_pool(&self, count: u32) -> Result<QueryPoolHandle, DeviceError>;

    /// Resets every query of the pool. Must not be called inside a query.
    fn reset_query_pool(&self, pool: QueryPoolHandle);

    /// Opens query `index`.
    fn begin_query(&self, pool: QueryPoolHandle, index: u32);

    /// Draws a depth-tested, color-masked box proxy.
    fn draw_proxy(&self, bounds: &Aabb);

    /// Closes query `index`.
    fn end_query(&self, pool: QueryPoolHandle, index: u32);

    /// Writes `count` results starting at `first` into `dst` at `dst_offset`
    /// as little-endian `u64` sample counts.
    fn resolve_queries(
        &self,
        pool: QueryPoolHandle,
        first: u32,
        count: u32,
        dst: BufferHandle,
        dst_offset: u64,
    );

    /// Reads back `size` bytes at `offset` if the last resolve into the
    /// buffer has landed. Never waits on the GPU; `None` means not yet.
    fn read_buffer(&self, buffer: BufferHandle, offset: u64, size: u64) -> Option<Vec<u8>>;

    /// Submits the commands recorded since the previous call.
    fn end_frame(&self);
}
