//! Growable device buffers and their per-frame staging.

use std::sync::atomic::{AtomicU32, Ordering};

use aperture_core::FrameRing;
use bytemuck::Pod;

use crate::device::{BufferDesc, BufferHandle, BufferUsage, GpuDevice};
use crate::error::DeviceError;

/// Device buffer that only ever grows, by doubling.
#[derive(Debug)]
pub struct GpuBuffer {
    label: &'static str,
    usage: BufferUsage,
    min_size: u64,
    handle: Option<BufferHandle>,
    capacity: u64,
    reallocations: u32,
}

impl GpuBuffer {
    /// Creates an unallocated buffer description.
    #[must_use]
    pub fn new(label: &'static str, usage: BufferUsage, min_size: u64) -> Self {
        Self {
            label,
            usage,
            min_size: min_size.max(4),
            handle: None,
            capacity: 0,
            reallocations: 0,
        }
    }

    /// Makes sure at least `required` bytes are available.
    ///
    /// The first call always allocates, even for `required == 0`. Later calls
    /// reallocate only when `required` exceeds the capacity, doubling until
    /// it fits. Contents are not preserved across a reallocation. Returns
    /// true if a new buffer was created.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::OutOfMemory`] if the device refuses the
    /// allocation; the previous buffer stays valid in that case.
    pub fn ensure_capacity(
        &mut self,
        device: &dyn GpuDevice,
        required: u64,
    ) -> Result<bool, DeviceError> {
        if self.handle.is_some() && required <= self.capacity {
            return Ok(false);
        }

        let mut new_capacity = self.capacity.max(self.min_size);
        while new_capacity < required {
            new_capacity = new_capacity.checked_mul(2).ok_or(DeviceError::OutOfMemory {
                label: self.label,
                requested: required,
            })?;
        }

        let handle = device.create_buffer(&BufferDesc {
            label: self.label,
            size: new_capacity,
            usage: self.usage,
        })?;
        if let Some(old) = self.handle.replace(handle) {
            device.destroy_buffer(old);
            self.reallocations += 1;
        }
        tracing::debug!(
            label = self.label,
            old_capacity = self.capacity,
            new_capacity,
            "gpu buffer grown"
        );
        self.capacity = new_capacity;
        Ok(true)
    }

    /// Current device buffer, if allocated.
    #[inline]
    #[must_use]
    pub const fn handle(&self) -> Option<BufferHandle> {
        self.handle
    }

    /// Capacity in bytes.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Number of times the buffer was replaced by a larger one.
    #[inline]
    #[must_use]
    pub const fn reallocations(&self) -> u32 {
        self.reallocations
    }

    /// Releases the device buffer.
    pub fn release(&mut self, device: &dyn GpuDevice) {
        if let Some(handle) = self.handle.take() {
            device.destroy_buffer(handle);
        }
        self.capacity = 0;
    }
}

/// Host staging memory written concurrently at disjoint offsets.
///
/// Stored as 32-bit words so writers only need `&self`.
#[derive(Debug, Default)]
pub struct UploadBuffer {
    words: Vec<AtomicU32>,
    used_bytes: u64,
    bytes: Vec<u8>,
}

impl UploadBuffer {
    /// Resizes to `capacity` bytes and marks `used` bytes for the next flush.
    fn prepare(&mut self, capacity: u64, used: u64) {
        #[allow(clippy::cast_possible_truncation)]
        let words = (capacity / 4) as usize;
        if self.words.len() != words {
            self.words.resize_with(words, AtomicU32::default);
        }
        self.used_bytes = used;
    }

    /// Stores `value` at `byte_offset`.
    ///
    /// # Panics
    ///
    /// Panics on a misaligned offset or a write past the prepared size.
    pub fn write_pod<T: Pod>(&self, byte_offset: u64, value: &T) {
        let bytes = bytemuck::bytes_of(value);
        assert!(
            byte_offset % 4 == 0 && bytes.len() % 4 == 0,
            "staging writes must be word aligned"
        );
        assert!(
            byte_offset + bytes.len() as u64 <= self.used_bytes,
            "staging write at {byte_offset} past {} used bytes",
            self.used_bytes
        );
        #[allow(clippy::cast_possible_truncation)]
        let first = (byte_offset / 4) as usize;
        for (slot, chunk) in self.words[first..].iter().zip(bytes.chunks_exact(4)) {
            let word = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            slot.store(word, Ordering::Relaxed);
        }
    }

    /// Reads back `T` from `byte_offset`.
    #[must_use]
    pub fn read_pod<T: Pod>(&self, byte_offset: u64) -> T {
        let mut value = T::zeroed();
        #[allow(clippy::cast_possible_truncation)]
        let first = (byte_offset / 4) as usize;
        let bytes = bytemuck::bytes_of_mut(&mut value);
        for (chunk, slot) in bytes.chunks_exact_mut(4).zip(&self.words[first..]) {
            chunk.copy_from_slice(&slot.load(Ordering::Relaxed).to_ne_bytes());
        }
        value
    }

    /// Bytes that the next flush uploads.
    #[inline]
    #[must_use]
    pub const fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    fn used_as_bytes(&mut self) -> &[u8] {
        #[allow(clippy::cast_possible_truncation)]
        let used_words = (self.used_bytes / 4) as usize;
        self.bytes.clear();
        self.bytes.extend(
            self.words[..used_words]
                .iter()
                .flat_map(|w| w.load(Ordering::Relaxed).to_ne_bytes()),
        );
        &self.bytes
    }
}

#[derive(Debug)]
struct MirrorSlot {
    buffer: GpuBuffer,
    staging: UploadBuffer,
}

/// One mirror category: F ring-buffered upload buffers and an optional
/// device-local copy target.
#[derive(Debug)]
pub struct MirrorBuffer {
    slots: FrameRing<MirrorSlot>,
    device_local: Option<GpuBuffer>,
}

impl MirrorBuffer {
    /// Creates the category; nothing is allocated until [`Self::prepare`].
    #[must_use]
    pub fn new(
        label: &'static str,
        frames_in_flight: usize,
        min_size: u64,
        device_local: bool,
    ) -> Self {
        Self {
            slots: FrameRing::new(frames_in_flight, |_| MirrorSlot {
                buffer: GpuBuffer::new(label, BufferUsage::Upload, min_size),
                staging: UploadBuffer::default(),
            }),
            device_local: device_local
                .then(|| GpuBuffer::new(label, BufferUsage::DeviceLocal, min_size)),
        }
    }

    /// Grows the buffers of `frame` to hold `required` bytes.
    ///
    /// # Errors
    ///
    /// Returns the device error if a buffer cannot be allocated.
    pub fn prepare(
        &mut self,
        device: &dyn GpuDevice,
        frame: u64,
        required: u64,
    ) -> Result<(), DeviceError> {
        let slot = self.slots.get_mut(frame);
        slot.buffer.ensure_capacity(device, required)?;
        slot.staging.prepare(slot.buffer.capacity(), required);
        if let Some(local) = self.device_local.as_mut() {
            local.ensure_capacity(device, required)?;
        }
        Ok(())
    }

    /// Staging memory of `frame`.
    #[inline]
    #[must_use]
    pub fn staging(&self, frame: u64) -> &UploadBuffer {
        &self.slots.get(frame).staging
    }

    /// Uploads the used bytes of `frame` and enqueues the device-local copy.
    pub fn flush(&mut self, device: &dyn GpuDevice, frame: u64) {
        let slot = self.slots.get_mut(frame);
        let Some(handle) = slot.buffer.handle() else {
            return;
        };
        let used = slot.staging.used_bytes();
        if used > 0 {
            device.write_buffer(handle, 0, slot.staging.used_as_bytes());
        }
        if let Some(local) = self.device_local.as_ref().and_then(GpuBuffer::handle) {
            if used > 0 {
                device.copy_buffer(handle, local, used);
            }
        }
    }

    /// Buffer shaders of `frame` should read.
    #[must_use]
    pub fn read_handle(&self, frame: u64) -> Option<BufferHandle> {
        self.device_local
            .as_ref()
            .map_or_else(|| self.slots.get(frame).buffer.handle(), GpuBuffer::handle)
    }

    /// Upload buffer owned by `frame`.
    #[must_use]
    pub fn upload_handle(&self, frame: u64) -> Option<BufferHandle> {
        self.slots.get(frame).buffer.handle()
    }

    /// Capacity of the upload buffer owned by `frame`.
    #[must_use]
    pub fn capacity(&self, frame: u64) -> u64 {
        self.slots.get(frame).buffer.capacity()
    }

    /// Total reallocations across all slots.
    #[must_use]
    pub fn reallocations(&self) -> u32 {
        self.slots.iter().map(|s| s.buffer.reallocations()).sum::<u32>()
            + self.device_local.as_ref().map_or(0, GpuBuffer::reallocations)
    }

    /// Releases every device buffer.
    pub fn release(&mut self, device: &dyn GpuDevice) {
        for slot in self.slots.iter_mut() {
            slot.buffer.release(device);
        }
        if let Some(local) = self.device_local.as_mut() {
            local.release(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;

    #[test]
    fn test_ensure_capacity_is_monotone_and_sufficient() {
        let device = HeadlessDevice::new();
        let mut buffer = GpuBuffer::new("test", BufferUsage::Upload, 256);

        assert!(buffer.ensure_capacity(&device, 0).unwrap());
        assert_eq!(buffer.capacity(), 256);

        let mut last = buffer.capacity();
        for required in [100, 300, 200, 5000, 1024, 70_000, 10] {
            buffer.ensure_capacity(&device, required).unwrap();
            assert!(buffer.capacity() >= required);
            assert!(buffer.capacity() >= last);
            last = buffer.capacity();
        }
        assert_eq!(buffer.capacity(), 131_072);
        assert_eq!(device.live_bytes(), 131_072);
    }

    #[test]
    fn test_no_reallocation_when_sufficient() {
        let device = HeadlessDevice::new();
        let mut buffer = GpuBuffer::new("test", BufferUsage::Upload, 1024);
        buffer.ensure_capacity(&device, 1000).unwrap();
        let handle = buffer.handle();
        assert!(!buffer.ensure_capacity(&device, 1024).unwrap());
        assert_eq!(buffer.handle(), handle);
        assert_eq!(buffer.reallocations(), 0);
    }

    #[test]
    fn test_out_of_memory_keeps_old_buffer() {
        let device = HeadlessDevice::new().with_memory_budget(1024);
        let mut buffer = GpuBuffer::new("test", BufferUsage::Upload, 512);
        buffer.ensure_capacity(&device, 512).unwrap();
        let before = buffer.handle();
        assert!(buffer.ensure_capacity(&device, 600).is_err());
        assert_eq!(buffer.handle(), before);
        assert_eq!(buffer.capacity(), 512);
    }

    #[test]
    fn test_staging_round_trip_and_flush() {
        let device = HeadlessDevice::new();
        let mut mirror = MirrorBuffer::new("test", 2, 256, true);
        mirror.prepare(&device, 0, 16).unwrap();
        mirror.staging(0).write_pod(8, &[7u32, 9u32]);
        assert_eq!(mirror.staging(0).read_pod::<[u32; 2]>(8), [7, 9]);

        mirror.flush(&device, 0);
        let local = mirror.read_handle(0).unwrap();
        assert_ne!(Some(local), mirror.upload_handle(0));
        let bytes = device.read_buffer(local, 8, 4).unwrap();
        assert_eq!(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]), 7);
        assert_eq!(device.counters().copies, 1);
    }

    #[test]
    #[should_panic(expected = "past")]
    fn test_staging_write_past_used_panics() {
        let device = HeadlessDevice::new();
        let mut mirror = MirrorBuffer::new("test", 1, 256, false);
        mirror.prepare(&device, 0, 8).unwrap();
        mirror.staging(0).write_pod(8, &1u32);
    }
}
