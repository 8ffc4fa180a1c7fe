//! wgpu implementation of [`GpuDevice`].
//!
//! Occlusion queries need a render pass with an occlusion query set bound,
//! which the caller owns. Proxy draws are therefore recorded here and
//! replayed with [`WgpuDevice::encode_proxies`]. Per frame the caller:
//!
//! ```text
//!   RenderPath::render_frame    copies + clears, one submit in end_frame
//!   encode_proxies(pool)        inside the caller's depth-tested pass
//!   submit that pass
//!   flush_resolves()            resolve + copy to readback, map requested
//! ```
//!
//! Readbacks never wait: the map requested by `flush_resolves` at frame N
//! is polled when the slot comes around at N + F. A map that has not
//! completed by then is cancelled and its queries count as visible. A
//! caller that skips `flush_resolves` gets no results, never zeroed ones.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use aperture_core::Aabb;
use crossbeam_channel::{bounded, Receiver, TryRecvError};
use parking_lot::Mutex;

use super::{
    BufferDesc, BufferHandle, BufferUsage, DeviceCapabilities, GpuDevice, QueryPoolHandle,
    QUERY_RESULT_SIZE,
};
use crate::error::DeviceError;

/// Vertices of a 12-triangle box proxy.
const PROXY_VERTEX_COUNT: u32 = 36;

type MapResult = Result<(), wgpu::BufferAsyncError>;

struct RecordedProxy {
    query: u32,
    bounds: Aabb,
}

struct QueryPool {
    set: wgpu::QuerySet,
    resolve: wgpu::Buffer,
    proxies: Vec<RecordedProxy>,
    open: Option<u32>,
}

struct PendingResolve {
    pool: QueryPoolHandle,
    first: u32,
    count: u32,
    dst: BufferHandle,
    dst_offset: u64,
}

struct DeviceBuffer {
    raw: wgpu::Buffer,
    usage: BufferUsage,
}

#[derive(Default)]
struct State {
    buffers: Vec<Option<DeviceBuffer>>,
    pools: Vec<QueryPool>,
    pending_bounds: Option<Aabb>,
    resolves: Vec<PendingResolve>,
    /// Copies and clears of the current frame.
    encoder: Option<wgpu::CommandEncoder>,
    /// Readback buffers with a map requested or completed, by handle.
    maps: HashMap<u32, Receiver<MapResult>>,
    /// Readback buffers whose map failed; never mapped again.
    unmappable: HashSet<u32>,
    unflushed_warned: bool,
}

impl State {
    fn buffer(&self, handle: BufferHandle) -> Option<&DeviceBuffer> {
        self.buffers.get(handle.0 as usize).and_then(Option::as_ref)
    }

    /// Takes the map outcome of `handle`. A pending map is cancelled, a
    /// completed one is returned still mapped.
    fn take_map(&mut self, handle: BufferHandle) -> Option<MapOutcome> {
        let rx = self.maps.remove(&handle.0)?;
        let outcome = match rx.try_recv() {
            Ok(Ok(())) => MapOutcome::Mapped,
            Ok(Err(err)) => {
                tracing::warn!(?handle, %err, "readback map failed, slot reads as visible");
                self.unmappable.insert(handle.0);
                MapOutcome::Failed
            }
            Err(TryRecvError::Empty) => {
                if let Some(b) = self.buffer(handle) {
                    b.raw.unmap();
                }
                MapOutcome::Pending
            }
            Err(TryRecvError::Disconnected) => {
                tracing::warn!(?handle, "readback map callback dropped");
                self.unmappable.insert(handle.0);
                MapOutcome::Failed
            }
        };
        Some(outcome)
    }
}

enum MapOutcome {
    Mapped,
    Pending,
    Failed,
}

/// Device backed by a wgpu device and queue.
pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    state: Mutex<State>,
}

impl WgpuDevice {
    /// Wraps an existing device and queue.
    #[must_use]
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self {
            device,
            queue,
            state: Mutex::new(State::default()),
        }
    }

    /// Raw wgpu buffer behind a handle, for bind group creation.
    pub fn with_buffer<R>(
        &self,
        buffer: BufferHandle,
        f: impl FnOnce(&wgpu::Buffer) -> R,
    ) -> Option<R> {
        let state = self.state.lock();
        state.buffer(buffer).map(|b| f(&b.raw))
    }

    /// Bounds of the proxies recorded for `pool`, in draw order.
    ///
    /// Instance `i` of the proxy draw reads element `i`.
    #[must_use]
    pub fn proxy_bounds(&self, pool: QueryPoolHandle) -> Vec<Aabb> {
        let state = self.state.lock();
        state
            .pools
            .get(pool.0 as usize)
            .map(|p| p.proxies.iter().map(|proxy| proxy.bounds).collect())
            .unwrap_or_default()
    }

    /// Replays the recorded proxies of `pool` into `pass`.
    ///
    /// The pass must have the pool's query set bound as its occlusion query
    /// set, and a proxy pipeline that expands instance `i` into the box of
    /// `proxy_bounds(pool)[i]`.
    pub fn encode_proxies(&self, pool: QueryPoolHandle, pass: &mut wgpu::RenderPass<'_>) {
        let state = self.state.lock();
        let Some(pool) = state.pools.get(pool.0 as usize) else {
            return;
        };
        for (instance, proxy) in (0u32..).zip(&pool.proxies) {
            pass.begin_occlusion_query(proxy.query);
            pass.draw(0..PROXY_VERTEX_COUNT, instance..instance + 1);
            pass.end_occlusion_query();
        }
    }

    /// Runs this pool's query set through `f`, e.g. to build a render pass
    /// descriptor.
    pub fn with_query_set<R>(
        &self,
        pool: QueryPoolHandle,
        f: impl FnOnce(&wgpu::QuerySet) -> R,
    ) -> Option<R> {
        let state = self.state.lock();
        state.pools.get(pool.0 as usize).map(|p| f(&p.set))
    }

    /// Submits the resolves requested since the last flush and requests
    /// the readback maps. Must follow the submission of the pass that
    /// replayed the proxies.
    pub fn flush_resolves(&self) {
        let mut state = self.state.lock();
        if state.resolves.is_empty() {
            return;
        }
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("aperture_query_resolve"),
        });
        let mut mapped = Vec::new();
        for resolve in std::mem::take(&mut state.resolves) {
            // A buffer with a map outstanding cannot be a copy target.
            if let Some(MapOutcome::Mapped) = state.take_map(resolve.dst) {
                if let Some(dst) = state.buffer(resolve.dst) {
                    dst.raw.unmap();
                }
            }
            let pool = state.pools.get(resolve.pool.0 as usize);
            let (Some(pool), Some(dst)) = (pool, state.buffer(resolve.dst)) else {
                continue;
            };
            let bytes = u64::from(resolve.count) * QUERY_RESULT_SIZE;
            encoder.resolve_query_set(
                &pool.set,
                resolve.first..resolve.first + resolve.count,
                &pool.resolve,
                0,
            );
            encoder.copy_buffer_to_buffer(&pool.resolve, 0, &dst.raw, resolve.dst_offset, bytes);
            if dst.usage == BufferUsage::Readback && !state.unmappable.contains(&resolve.dst.0) {
                mapped.push(resolve.dst);
            }
        }
        self.queue.submit(Some(encoder.finish()));

        for handle in mapped {
            let Some(buffer) = state.buffer(handle) else {
                continue;
            };
            let (tx, rx) = bounded(1);
            buffer.raw.slice(..).map_async(wgpu::MapMode::Read, move |result| {
                if tx.send(result).is_err() {
                    tracing::debug!(?handle, "readback map completed after its buffer was released");
                }
            });
            state.maps.insert(handle.0, rx);
        }
    }

    fn record(&self, state: &mut State, record: impl FnOnce(&mut wgpu::CommandEncoder, &State)) {
        let mut encoder = state.encoder.take().unwrap_or_else(|| {
            self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("aperture_frame"),
            })
        });
        record(&mut encoder, state);
        state.encoder = Some(encoder);
    }
}

fn usages(usage: BufferUsage) -> wgpu::BufferUsages {
    match usage {
        BufferUsage::Upload => {
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC
        }
        BufferUsage::DeviceLocal => {
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::INDIRECT
        }
        BufferUsage::Readback => wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        BufferUsage::Predication => wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
    }
}

impl GpuDevice for WgpuDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            occlusion_queries: true,
            predication: false,
        }
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferHandle, DeviceError> {
        if desc.size > self.device.limits().max_buffer_size {
            return Err(DeviceError::OutOfMemory {
                label: desc.label,
                requested: desc.size,
            });
        }
        let raw = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size: desc.size,
            usage: usages(desc.usage),
            mapped_at_creation: false,
        });
        let mut state = self.state.lock();
        #[allow(clippy::cast_possible_truncation)]
        let handle = BufferHandle(state.buffers.len() as u32);
        state.buffers.push(Some(DeviceBuffer {
            raw,
            usage: desc.usage,
        }));
        Ok(handle)
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let mut state = self.state.lock();
        state.maps.remove(&buffer.0);
        state.unmappable.remove(&buffer.0);
        if let Some(b) = state.buffers.get_mut(buffer.0 as usize).and_then(Option::take) {
            b.raw.destroy();
        }
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let state = self.state.lock();
        if let Some(b) = state.buffer(buffer) {
            self.queue.write_buffer(&b.raw, offset, data);
        }
    }

    fn copy_buffer(&self, src: BufferHandle, dst: BufferHandle, size: u64) {
        let mut state = self.state.lock();
        self.record(&mut state, |encoder, state| {
            if let (Some(src), Some(dst)) = (state.buffer(src), state.buffer(dst)) {
                encoder.copy_buffer_to_buffer(&src.raw, 0, &dst.raw, 0, size);
            }
        });
    }

    fn clear_buffer(&self, buffer: BufferHandle) {
        let mut state = self.state.lock();
        self.record(&mut state, |encoder, state| {
            if let Some(b) = state.buffer(buffer) {
                encoder.clear_buffer(&b.raw, 0, None);
            }
        });
    }

    fn descriptor_index(&self, buffer: BufferHandle) -> u32 {
        buffer.0
    }

    fn create_query_pool(&self, count: u32) -> Result<QueryPoolHandle, DeviceError> {
        let set = self.device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("aperture_occlusion"),
            ty: wgpu::QueryType::Occlusion,
            count,
        });
        let resolve = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("aperture_occlusion_resolve"),
            size: u64::from(count.max(1)) * QUERY_RESULT_SIZE,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let mut state = self.state.lock();
        #[allow(clippy::cast_possible_truncation)]
        let handle = QueryPoolHandle(state.pools.len() as u32);
        state.pools.push(QueryPool {
            set,
            resolve,
            proxies: Vec::new(),
            open: None,
        });
        Ok(handle)
    }

    fn reset_query_pool(&self, pool: QueryPoolHandle) {
        // wgpu resets occlusion queries implicitly at pass begin.
        let mut state = self.state.lock();
        let before = state.resolves.len();
        state.resolves.retain(|r| r.pool != pool);
        if state.resolves.len() != before && !state.unflushed_warned {
            state.unflushed_warned = true;
            tracing::warn!(
                ?pool,
                "query resolves dropped without flush_resolves, results read as visible"
            );
        }
        if let Some(p) = state.pools.get_mut(pool.0 as usize) {
            assert!(p.open.is_none(), "query pool reset while a query is open");
            p.proxies.clear();
        }
    }

    fn begin_query(&self, pool: QueryPoolHandle, index: u32) {
        let mut state = self.state.lock();
        if let Some(p) = state.pools.get_mut(pool.0 as usize) {
            assert!(p.open.is_none(), "nested begin_query");
            p.open = Some(index);
        }
        state.pending_bounds = None;
    }

    fn draw_proxy(&self, bounds: &Aabb) {
        self.state.lock().pending_bounds = Some(*bounds);
    }

    fn end_query(&self, pool: QueryPoolHandle, index: u32) {
        let mut state = self.state.lock();
        let bounds = state.pending_bounds.take();
        if let Some(p) = state.pools.get_mut(pool.0 as usize) {
            assert_eq!(p.open.take(), Some(index), "end_query does not match begin_query");
            if let Some(bounds) = bounds {
                p.proxies.push(RecordedProxy { query: index, bounds });
            }
        }
    }

    fn resolve_queries(
        &self,
        pool: QueryPoolHandle,
        first: u32,
        count: u32,
        dst: BufferHandle,
        dst_offset: u64,
    ) {
        if count == 0 {
            return;
        }
        self.state.lock().resolves.push(PendingResolve {
            pool,
            first,
            count,
            dst,
            dst_offset,
        });
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, size: u64) -> Option<Vec<u8>> {
        // Drives completed map callbacks without waiting for queued work.
        self.device.poll(wgpu::Maintain::Poll);

        let mut state = self.state.lock();
        match state.take_map(buffer)? {
            MapOutcome::Mapped => {
                let b = state.buffer(buffer)?;
                let data = b.raw.slice(offset..offset + size).get_mapped_range().to_vec();
                b.raw.unmap();
                Some(data)
            }
            MapOutcome::Pending => {
                tracing::trace!(?buffer, "readback not ready");
                None
            }
            MapOutcome::Failed => None,
        }
    }

    fn end_frame(&self) {
        let encoder = self.state.lock().encoder.take();
        if let Some(encoder) = encoder {
            self.queue.submit(Some(encoder.finish()));
        }
    }
}
