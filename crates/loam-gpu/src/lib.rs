//! Headless wgpu compute for loam: device setup, pooled buffers, and the
//! dispatch-and-read-back contract the GPU generation paths are written against.

pub mod buffer_pool;
pub mod context;
pub mod dispatcher;

pub use buffer_pool::{BufferPool, BufferRole, PooledBuffer, size_class_for};
pub use context::{ComputeContext, ComputeContextError};
pub use dispatcher::{
    ComputeDispatcher, ComputeError, ComputeJob, KernelSource, WORKGROUP_SIZE, WgpuDispatcher,
    decode_pod,
};
