//! Compute buffer pool reused across dispatches.
//!
//! Terrain tiles all have the same sample count, but collision tiles vary with
//! their tessellation, so buffers are bucketed by role and a power-of-two size
//! class rather than matched exactly.

use rustc_hash::FxHashMap;

/// Smallest size class in bytes.
pub const MIN_CLASS_SIZE: u64 = 256;

/// What a pooled buffer is bound as; each role has its own usage flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferRole {
    /// Uniform parameter block written with `Queue::write_buffer`.
    Params,
    /// Read-only storage input written with `Queue::write_buffer`.
    Input,
    /// Read-write storage output copied out after the dispatch.
    Output,
    /// CPU-mappable copy of the output.
    Staging,
}

impl BufferRole {
    fn usage(self) -> wgpu::BufferUsages {
        match self {
            Self::Params => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            Self::Input => wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            Self::Output => wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            Self::Staging => wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Params => "pooled_compute_params",
            Self::Input => "pooled_compute_input",
            Self::Output => "pooled_compute_output",
            Self::Staging => "pooled_compute_staging",
        }
    }
}

/// A buffer checked out of the pool. Hand it back with [`BufferPool::release`].
pub struct PooledBuffer {
    pub buffer: wgpu::Buffer,
    pub role: BufferRole,
    /// Allocated size of the buffer (its size class), not the requested size.
    pub size: u64,
}

/// Size class for a request: the next power of two, at least [`MIN_CLASS_SIZE`].
pub fn size_class_for(min_size: u64) -> u64 {
    min_size.max(MIN_CLASS_SIZE).next_power_of_two()
}

/// A pool of compute buffers bucketed by role and size class.
///
/// Tracks total allocated and in-use GPU memory.
#[derive(Default)]
pub struct BufferPool {
    free: FxHashMap<(BufferRole, u64), Vec<wgpu::Buffer>>,
    /// Total bytes currently allocated (in-use + pooled).
    total_allocated: u64,
    /// Total bytes currently checked out.
    in_use: u64,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a buffer of at least `min_size` bytes for `role`.
    ///
    /// Returns a pooled buffer if available, or creates a new one.
    pub fn acquire(
        &mut self,
        device: &wgpu::Device,
        role: BufferRole,
        min_size: u64,
    ) -> PooledBuffer {
        let size = size_class_for(min_size);

        if let Some(buffer) = self.free.get_mut(&(role, size)).and_then(Vec::pop) {
            self.in_use += size;
            return PooledBuffer { buffer, role, size };
        }

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(role.label()),
            size,
            usage: role.usage(),
            mapped_at_creation: false,
        });
        self.total_allocated += size;
        self.in_use += size;
        log::debug!("Allocated {:?} compute buffer of {} bytes", role, size);
        PooledBuffer { buffer, role, size }
    }

    /// Return a buffer to the pool for reuse.
    pub fn release(&mut self, pooled: PooledBuffer) {
        self.in_use = self.in_use.saturating_sub(pooled.size);
        self.free
            .entry((pooled.role, pooled.size))
            .or_default()
            .push(pooled.buffer);
    }

    /// Drop every pooled buffer that is not checked out.
    pub fn clear(&mut self) {
        let freed = self.total_allocated.saturating_sub(self.in_use);
        self.free.clear();
        self.total_allocated = self.in_use;
        if freed > 0 {
            log::debug!("Released {} bytes of pooled compute buffers", freed);
        }
    }

    /// GPU memory currently checked out.
    pub fn gpu_memory_in_use(&self) -> u64 {
        self.in_use
    }

    /// Total GPU memory allocated (including pooled free buffers).
    pub fn gpu_memory_allocated(&self) -> u64 {
        self.total_allocated
    }

    /// Number of free buffers across all roles and size classes.
    pub fn free_buffer_count(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }
}
