//! In-memory device.
//!
//! Buffers are plain byte vectors, copies and clears execute immediately,
//! and occlusion results come from a caller-supplied oracle. Readbacks can
//! be stalled to mimic a GPU that has not caught up. Used by the
//! test suite and by tools that run the visibility core without a GPU.

use aperture_core::Aabb;
use parking_lot::Mutex;

use super::{
    BufferDesc, BufferHandle, BufferUsage, DeviceCapabilities, GpuDevice, QueryPoolHandle,
    QUERY_RESULT_SIZE,
};
use crate::error::DeviceError;

/// Decides whether a proxy box passes the depth test.
pub type VisibilityOracle = Box<dyn Fn(&Aabb) -> bool + Send + Sync>;

/// Samples reported for a proxy that passes the oracle.
const VISIBLE_SAMPLES: u64 = 64;

/// Running totals of recorded commands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceCounters {
    /// Buffers created.
    pub buffers_created: u32,
    /// Buffers destroyed.
    pub buffers_destroyed: u32,
    /// Bytes written from the host.
    pub bytes_written: u64,
    /// Buffer copies.
    pub copies: u32,
    /// Buffer clears.
    pub clears: u32,
    /// Pool resets.
    pub pool_resets: u32,
    /// Queries begun.
    pub queries_issued: u32,
    /// Resolve commands.
    pub resolves: u32,
    /// Frame submissions.
    pub submits: u32,
    /// Readbacks refused while stalled.
    pub readbacks_missed: u32,
}

#[derive(Debug)]
struct Buffer {
    usage: BufferUsage,
    data: Vec<u8>,
}

#[derive(Default)]
struct QueryPool {
    results: Vec<Option<u64>>,
}

#[derive(Default)]
struct State {
    buffers: Vec<Option<Buffer>>,
    pools: Vec<QueryPool>,
    active: Option<(QueryPoolHandle, u32, u64)>,
    live_bytes: u64,
    readback_stalled: bool,
    counters: DeviceCounters,
}

/// Device whose memory lives in host vectors.
pub struct HeadlessDevice {
    capabilities: DeviceCapabilities,
    memory_budget: Option<u64>,
    oracle: Mutex<VisibilityOracle>,
    state: Mutex<State>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    /// Creates a device with occlusion queries and an all-visible oracle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capabilities: DeviceCapabilities::default(),
            memory_budget: None,
            oracle: Mutex::new(Box::new(|_| true)),
            state: Mutex::new(State::default()),
        }
    }

    /// Overrides the capability flags.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Limits the total bytes of live buffers.
    #[must_use]
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    /// Replaces the occlusion oracle.
    pub fn set_visibility_oracle(&self, oracle: impl Fn(&Aabb) -> bool + Send + Sync + 'static) {
        *self.oracle.lock() = Box::new(oracle);
    }

    /// Makes readback buffers unavailable until called again with `true`.
    pub fn set_readback_ready(&self, ready: bool) {
        self.state.lock().readback_stalled = !ready;
    }

    /// Command totals since creation.
    #[must_use]
    pub fn counters(&self) -> DeviceCounters {
        self.state.lock().counters
    }

    /// Bytes held by live buffers.
    #[must_use]
    pub fn live_bytes(&self) -> u64 {
        self.state.lock().live_bytes
    }

    /// Size of a live buffer.
    #[must_use]
    pub fn buffer_size(&self, buffer: BufferHandle) -> Option<u64> {
        let state = self.state.lock();
        state
            .buffers
            .get(buffer.0 as usize)
            .and_then(Option::as_ref)
            .map(|b| b.data.len() as u64)
    }

    /// Memory class of a live buffer.
    #[must_use]
    pub fn buffer_usage(&self, buffer: BufferHandle) -> Option<BufferUsage> {
        let state = self.state.lock();
        state
            .buffers
            .get(buffer.0 as usize)
            .and_then(Option::as_ref)
            .map(|b| b.usage)
    }
}

impl State {
    fn buffer_mut(&mut self, buffer: BufferHandle) -> &mut Buffer {
        match self.buffers.get_mut(buffer.0 as usize) {
            Some(Some(b)) => b,
            _ => panic!("use of destroyed or unknown buffer {buffer:?}"),
        }
    }

    fn pool_mut(&mut self, pool: QueryPoolHandle) -> &mut QueryPool {
        match self.pools.get_mut(pool.0 as usize) {
            Some(p) => p,
            None => panic!("unknown query pool {pool:?}"),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_usize(value: u64) -> usize {
    value as usize
}

impl GpuDevice for HeadlessDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferHandle, DeviceError> {
        let mut state = self.state.lock();
        if let Some(budget) = self.memory_budget {
            if state.live_bytes + desc.size > budget {
                return Err(DeviceError::OutOfMemory {
                    label: desc.label,
                    requested: desc.size,
                });
            }
        }
        #[allow(clippy::cast_possible_truncation)]
        let handle = BufferHandle(state.buffers.len() as u32);
        state.buffers.push(Some(Buffer {
            usage: desc.usage,
            data: vec![0; to_usize(desc.size)],
        }));
        state.live_bytes += desc.size;
        state.counters.buffers_created += 1;
        Ok(handle)
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let mut state = self.state.lock();
        let released = state
            .buffers
            .get_mut(buffer.0 as usize)
            .and_then(Option::take)
            .map(|b| b.data.len() as u64);
        if let Some(size) = released {
            state.live_bytes -= size;
            state.counters.buffers_destroyed += 1;
        }
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let mut state = self.state.lock();
        let start = to_usize(offset);
        let target = state.buffer_mut(buffer);
        assert!(
            start + data.len() <= target.data.len(),
            "write of {} bytes at {offset} overruns {buffer:?}",
            data.len()
        );
        target.data[start..start + data.len()].copy_from_slice(data);
        state.counters.bytes_written += data.len() as u64;
    }

    fn copy_buffer(&self, src: BufferHandle, dst: BufferHandle, size: u64) {
        let mut state = self.state.lock();
        let size = to_usize(size);
        let bytes = state.buffer_mut(src).data[..size].to_vec();
        state.buffer_mut(dst).data[..size].copy_from_slice(&bytes);
        state.counters.copies += 1;
    }

    fn clear_buffer(&self, buffer: BufferHandle) {
        let mut state = self.state.lock();
        state.buffer_mut(buffer).data.fill(0);
        state.counters.clears += 1;
    }

    fn descriptor_index(&self, buffer: BufferHandle) -> u32 {
        buffer.0
    }

    fn create_query_pool(&self, count: u32) -> Result<QueryPoolHandle, DeviceError> {
        if !self.capabilities.occlusion_queries {
            return Err(DeviceError::Unsupported("occlusion queries"));
        }
        let mut state = self.state.lock();
        #[allow(clippy::cast_possible_truncation)]
        let handle = QueryPoolHandle(state.pools.len() as u32);
        state.pools.push(QueryPool {
            results: vec![None; count as usize],
        });
        Ok(handle)
    }

    fn reset_query_pool(&self, pool: QueryPoolHandle) {
        let mut state = self.state.lock();
        assert!(state.active.is_none(), "query pool reset while a query is open");
        state.pool_mut(pool).results.fill(None);
        state.counters.pool_resets += 1;
    }

    fn begin_query(&self, pool: QueryPoolHandle, index: u32) {
        let mut state = self.state.lock();
        assert!(state.active.is_none(), "nested begin_query");
        assert!(
            state.pool_mut(pool).results[index as usize].is_none(),
            "query {index} begun twice without a reset"
        );
        state.active = Some((pool, index, 0));
        state.counters.queries_issued += 1;
    }

    fn draw_proxy(&self, bounds: &Aabb) {
        let visible = (self.oracle.lock())(bounds);
        let mut state = self.state.lock();
        if let Some((_, _, samples)) = state.active.as_mut() {
            if visible {
                *samples += VISIBLE_SAMPLES;
            }
        }
    }

    fn end_query(&self, pool: QueryPoolHandle, index: u32) {
        let mut state = self.state.lock();
        let samples = match state.active.take() {
            Some((open_pool, open_index, samples)) if open_pool == pool && open_index == index => {
                samples
            }
            other => panic!("end_query({pool:?}, {index}) does not match open query {other:?}"),
        };
        state.pool_mut(pool).results[index as usize] = Some(samples);
    }

    fn resolve_queries(
        &self,
        pool: QueryPoolHandle,
        first: u32,
        count: u32,
        dst: BufferHandle,
        dst_offset: u64,
    ) {
        let mut state = self.state.lock();
        let bytes: Vec<u8> = state.pool_mut(pool).results
            [first as usize..(first + count) as usize]
            .iter()
            .flat_map(|r| r.unwrap_or(0).to_le_bytes())
            .collect();
        let start = to_usize(dst_offset);
        let target = state.buffer_mut(dst);
        assert!(
            start + bytes.len() <= target.data.len(),
            "resolve of {count} queries overruns {dst:?}"
        );
        target.data[start..start + bytes.len()].copy_from_slice(&bytes);
        debug_assert_eq!(bytes.len() as u64, u64::from(count) * QUERY_RESULT_SIZE);
        state.counters.resolves += 1;
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, size: u64) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        if state.readback_stalled && state.buffer_mut(buffer).usage == BufferUsage::Readback {
            state.counters.readbacks_missed += 1;
            return None;
        }
        let start = to_usize(offset);
        Some(state.buffer_mut(buffer).data[start..start + to_usize(size)].to_vec())
    }

    fn end_frame(&self) {
        self.state.lock().counters.submits += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(size: u64) -> BufferDesc {
        BufferDesc {
            label: "test",
            size,
            usage: BufferUsage::Upload,
        }
    }

    #[test]
    fn test_buffer_write_copy_clear() {
        let device = HeadlessDevice::new();
        let a = device.create_buffer(&desc(16)).unwrap();
        let b = device.create_buffer(&desc(16)).unwrap();
        device.write_buffer(a, 4, &[1, 2, 3, 4]);
        device.copy_buffer(a, b, 8);
        assert_eq!(device.read_buffer(b, 4, 4), Some(vec![1, 2, 3, 4]));
        device.clear_buffer(b);
        assert_eq!(device.read_buffer(b, 0, 16), Some(vec![0; 16]));
        assert_eq!(device.counters().copies, 1);
    }

    #[test]
    fn test_memory_budget() {
        let device = HeadlessDevice::new().with_memory_budget(100);
        let a = device.create_buffer(&desc(64)).unwrap();
        assert!(matches!(
            device.create_buffer(&desc(64)),
            Err(DeviceError::OutOfMemory { requested: 64, .. })
        ));
        device.destroy_buffer(a);
        assert_eq!(device.live_bytes(), 0);
        assert!(device.create_buffer(&desc(64)).is_ok());
    }

    #[test]
    fn test_queries_follow_oracle() {
        let device = HeadlessDevice::new();
        device.set_visibility_oracle(|aabb| aabb.min[0] < 0.0);
        let pool = device.create_query_pool(2).unwrap();
        let readback = device
            .create_buffer(&BufferDesc {
                label: "readback",
                size: 16,
                usage: BufferUsage::Readback,
            })
            .unwrap();

        device.reset_query_pool(pool);
        device.begin_query(pool, 0);
        device.draw_proxy(&Aabb::new([-1.0; 3], [1.0; 3]));
        device.end_query(pool, 0);
        device.begin_query(pool, 1);
        device.draw_proxy(&Aabb::new([1.0; 3], [2.0; 3]));
        device.end_query(pool, 1);
        device.resolve_queries(pool, 0, 2, readback, 0);

        let bytes = device.read_buffer(readback, 0, 16).unwrap();
        let samples: Vec<u64> = bytes
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert!(samples[0] > 0);
        assert_eq!(samples[1], 0);
    }

    #[test]
    fn test_stalled_readback_returns_none() {
        let device = HeadlessDevice::new();
        let readback = device
            .create_buffer(&BufferDesc {
                label: "readback",
                size: 8,
                usage: BufferUsage::Readback,
            })
            .unwrap();
        let upload = device.create_buffer(&desc(8)).unwrap();

        device.set_readback_ready(false);
        assert_eq!(device.read_buffer(readback, 0, 8), None);
        assert!(device.read_buffer(upload, 0, 8).is_some());
        device.set_readback_ready(true);
        assert_eq!(device.read_buffer(readback, 0, 8), Some(vec![0; 8]));
        assert_eq!(device.counters().readbacks_missed, 1);
    }

    #[test]
    #[should_panic(expected = "nested begin_query")]
    fn test_nested_query_panics() {
        let device = HeadlessDevice::new();
        let pool = device.create_query_pool(2).unwrap();
        device.begin_query(pool, 0);
        device.begin_query(pool, 1);
    }

    #[test]
    fn test_queries_unsupported() {
        let device = HeadlessDevice::new().with_capabilities(DeviceCapabilities {
            occlusion_queries: false,
            predication: false,
        });
        assert!(matches!(
            device.create_query_pool(4),
            Err(DeviceError::Unsupported(_))
        ));
    }
}
