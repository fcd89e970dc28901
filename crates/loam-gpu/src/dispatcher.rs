//! Compute dispatch with asynchronous readback.
//!
//! A [`ComputeDispatcher`] runs a fixed sequence of kernel entry points over
//! one job at a time and hands the output bytes back once the GPU has
//! finished. Every kernel sees the same bind group:
//!
//! | binding | type                          | contents                 |
//! |---------|-------------------------------|--------------------------|
//! | 0       | `var<uniform>`                | job parameters           |
//! | 1       | `var<storage, read>`          | per-invocation input     |
//! | 2       | `var<storage, read_write>`    | per-invocation output    |
//!
//! Kernels use `@workgroup_size(64)` and must ignore invocations past the
//! element count carried in their parameters.

use std::num::NonZeroU64;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::{Receiver, TryRecvError};

use crate::buffer_pool::{BufferPool, BufferRole, PooledBuffer};
use crate::context::ComputeContext;

/// Threads per workgroup expected of every kernel.
pub const WORKGROUP_SIZE: u32 = 64;

/// Errors from building a dispatcher or running a job.
#[derive(Debug, thiserror::Error)]
pub enum ComputeError {
    /// A job is still in flight; dispatches are serialized.
    #[error("a compute dispatch is already in flight")]
    Busy,

    /// The WGSL module could not be read.
    #[error("failed to read shader {path}: {source}")]
    ShaderRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A kernel set without entry points cannot dispatch anything.
    #[error("kernel set '{0}' has no entry points")]
    NoEntryPoints(String),

    /// The job's buffers violate the binding rules.
    #[error("invalid compute job: {0}")]
    InvalidJob(String),

    /// Mapping the staging buffer failed.
    #[error("readback failed: {0}")]
    Readback(#[from] wgpu::BufferAsyncError),

    /// The map callback was dropped without reporting.
    #[error("readback callback dropped before completion")]
    Disconnected,
}

/// WGSL source and the entry points to run, in order, for every job.
#[derive(Debug, Clone)]
pub struct KernelSource {
    pub label: String,
    pub wgsl: String,
    pub entry_points: Vec<String>,
}

impl KernelSource {
    pub fn new(label: impl Into<String>, wgsl: impl Into<String>, entry_points: &[&str]) -> Self {
        Self {
            label: label.into(),
            wgsl: wgsl.into(),
            entry_points: entry_points.iter().map(|e| e.to_string()).collect(),
        }
    }

    /// Read the WGSL module from disk.
    pub fn from_file(path: &Path, entry_points: &[&str]) -> Result<Self, ComputeError> {
        let wgsl = std::fs::read_to_string(path).map_err(|source| ComputeError::ShaderRead {
            path: path.to_path_buf(),
            source,
        })?;
        let label = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "compute".to_string());
        Ok(Self::new(label, wgsl, entry_points))
    }
}

/// One unit of GPU work: raw bytes in, `output_size` bytes out.
#[derive(Debug, Clone, Copy)]
pub struct ComputeJob<'a> {
    pub params: &'a [u8],
    pub input: &'a [u8],
    pub output_size: u64,
    /// Number of kernel invocations (elements); rounded up to whole workgroups.
    pub invocations: u32,
}

impl ComputeJob<'_> {
    /// Workgroups along X needed to cover `invocations`.
    pub fn workgroups(&self) -> u32 {
        self.invocations.div_ceil(WORKGROUP_SIZE)
    }

    pub fn validate(&self) -> Result<(), ComputeError> {
        let align = wgpu::COPY_BUFFER_ALIGNMENT;
        for (name, len) in [
            ("params", self.params.len() as u64),
            ("input", self.input.len() as u64),
            ("output", self.output_size),
        ] {
            if len == 0 {
                return Err(ComputeError::InvalidJob(format!("{name} buffer is empty")));
            }
            if len % align != 0 {
                return Err(ComputeError::InvalidJob(format!(
                    "{name} size {len} is not a multiple of {align}"
                )));
            }
        }
        if self.invocations == 0 {
            return Err(ComputeError::InvalidJob("zero invocations".to_string()));
        }
        Ok(())
    }
}

/// "Dispatch compute and read back an array".
///
/// At most one job is in flight; [`ComputeDispatcher::poll`] is called once
/// per tick and yields the output exactly once when the readback completes.
pub trait ComputeDispatcher: Send {
    fn is_busy(&self) -> bool;

    /// Upload the job and queue its kernels. Fails with [`ComputeError::Busy`]
    /// while a previous job is in flight.
    fn dispatch(&mut self, job: ComputeJob<'_>) -> Result<(), ComputeError>;

    /// Non-blocking completion check. `None` while idle or still running.
    fn poll(&mut self) -> Option<Result<Vec<u8>, ComputeError>>;
}

/// Reinterpret readback bytes as `T`s, copying into an aligned vector.
///
/// Trailing bytes that do not form a whole `T` are dropped.
pub fn decode_pod<T: bytemuck::Pod>(bytes: &[u8]) -> Vec<T> {
    let whole = bytes.len() - bytes.len() % std::mem::size_of::<T>().max(1);
    bytemuck::pod_collect_to_vec(&bytes[..whole])
}

struct InFlight {
    params: PooledBuffer,
    input: PooledBuffer,
    output: PooledBuffer,
    staging: PooledBuffer,
    output_size: u64,
    mapped: Receiver<Result<(), wgpu::BufferAsyncError>>,
}

/// [`ComputeDispatcher`] backed by wgpu compute pipelines and pooled buffers.
pub struct WgpuDispatcher {
    context: Arc<ComputeContext>,
    label: String,
    layout: wgpu::BindGroupLayout,
    pipelines: Vec<wgpu::ComputePipeline>,
    pool: BufferPool,
    in_flight: Option<InFlight>,
}

impl WgpuDispatcher {
    pub fn new(context: Arc<ComputeContext>, source: &KernelSource) -> Result<Self, ComputeError> {
        if source.entry_points.is_empty() {
            return Err(ComputeError::NoEntryPoints(source.label.clone()));
        }
        let device = &context.device;

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(source.label.as_str()),
            source: wgpu::ShaderSource::Wgsl(source.wgsl.as_str().into()),
        });

        let storage_entry = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("loam-compute-bind-group-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage_entry(1, true),
                storage_entry(2, false),
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("loam-compute-pipeline-layout"),
            bind_group_layouts: &[&layout],
            immediate_size: 0,
        });

        let pipelines = source
            .entry_points
            .iter()
            .map(|entry| {
                device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(entry.as_str()),
                    layout: Some(&pipeline_layout),
                    module: &module,
                    entry_point: Some(entry.as_str()),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                })
            })
            .collect();

        log::info!(
            "Compute kernels '{}' ready: {}",
            source.label,
            source.entry_points.join(" -> ")
        );

        Ok(Self {
            context,
            label: source.label.clone(),
            layout,
            pipelines,
            pool: BufferPool::new(),
            in_flight: None,
        })
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Block until the in-flight job (if any) completes and return its output.
    pub fn wait(&mut self) -> Option<Result<Vec<u8>, ComputeError>> {
        self.in_flight.as_ref()?;
        if let Err(err) = self.context.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        }) {
            log::warn!("GPU wait failed for '{}': {err}", self.label);
        }
        self.poll()
    }

    fn finish(
        &mut self,
        in_flight: InFlight,
        status: Result<(), ComputeError>,
    ) -> Result<Vec<u8>, ComputeError> {
        let result = status.map(|()| {
            let bytes = {
                let view = in_flight
                    .staging
                    .buffer
                    .slice(..in_flight.output_size)
                    .get_mapped_range();
                view.to_vec()
            };
            in_flight.staging.buffer.unmap();
            bytes
        });
        for buffer in [
            in_flight.params,
            in_flight.input,
            in_flight.output,
            in_flight.staging,
        ] {
            self.pool.release(buffer);
        }
        result
    }
}

impl ComputeDispatcher for WgpuDispatcher {
    fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    fn dispatch(&mut self, job: ComputeJob<'_>) -> Result<(), ComputeError> {
        if self.in_flight.is_some() {
            return Err(ComputeError::Busy);
        }
        job.validate()?;

        let device = &self.context.device;
        let queue = &self.context.queue;

        let params = self.pool.acquire(device, BufferRole::Params, job.params.len() as u64);
        let input = self.pool.acquire(device, BufferRole::Input, job.input.len() as u64);
        let output = self.pool.acquire(device, BufferRole::Output, job.output_size);
        let staging = self.pool.acquire(device, BufferRole::Staging, job.output_size);

        queue.write_buffer(&params.buffer, 0, job.params);
        queue.write_buffer(&input.buffer, 0, job.input);

        // Bind exactly the job's bytes so pooled slack never shows up as data.
        fn exact<'a>(pooled: &'a PooledBuffer, len: u64) -> wgpu::BindingResource<'a> {
            wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &pooled.buffer,
                offset: 0,
                size: NonZeroU64::new(len),
            })
        }
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("loam-compute-bind-group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: exact(&params, job.params.len() as u64),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: exact(&input, job.input.len() as u64),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: exact(&output, job.output_size),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("loam-compute-encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(self.label.as_str()),
                timestamp_writes: None,
            });
            pass.set_bind_group(0, &bind_group, &[]);
            for pipeline in &self.pipelines {
                pass.set_pipeline(pipeline);
                pass.dispatch_workgroups(job.workgroups(), 1, 1);
            }
        }
        encoder.copy_buffer_to_buffer(&output.buffer, 0, &staging.buffer, 0, job.output_size);
        queue.submit(std::iter::once(encoder.finish()));

        let (tx, rx) = crossbeam_channel::bounded(1);
        staging
            .buffer
            .slice(..job.output_size)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });

        self.in_flight = Some(InFlight {
            params,
            input,
            output,
            staging,
            output_size: job.output_size,
            mapped: rx,
        });
        Ok(())
    }

    fn poll(&mut self) -> Option<Result<Vec<u8>, ComputeError>> {
        let pending = self.in_flight.as_ref()?;
        self.context.poll();
        let status = match pending.mapped.try_recv() {
            Ok(mapped) => mapped.map_err(ComputeError::from),
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => Err(ComputeError::Disconnected),
        };
        let in_flight = self.in_flight.take()?;
        Some(self.finish(in_flight, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCALE_THEN_OFFSET: &str = r#"
struct Params {
    count: u32,
    factor: f32,
    _pad0: u32,
    _pad1: u32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> input: array<f32>;
@group(0) @binding(2) var<storage, read_write> output: array<f32>;

@compute @workgroup_size(64)
fn scale(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x >= params.count) {
        return;
    }
    output[id.x] = input[id.x] * params.factor;
}

@compute @workgroup_size(64)
fn offset(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x >= params.count) {
        return;
    }
    output[id.x] = output[id.x] + 1.0;
}
"#;

    #[repr(C)]
    #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    struct TestParams {
        count: u32,
        factor: f32,
        _pad: [u32; 2],
    }

    fn test_dispatcher() -> Option<WgpuDispatcher> {
        let context = Arc::new(ComputeContext::new_headless_blocking().ok()?);
        let source = KernelSource::new("scale-offset", SCALE_THEN_OFFSET, &["scale", "offset"]);
        WgpuDispatcher::new(context, &source).ok()
    }

    #[test]
    fn test_workgroup_rounding() {
        let job = ComputeJob {
            params: &[0; 16],
            input: &[0; 4],
            output_size: 4,
            invocations: 65,
        };
        assert_eq!(job.workgroups(), 2);
    }

    #[test]
    fn test_job_validation() {
        let misaligned = ComputeJob {
            params: &[0; 16],
            input: &[0; 6],
            output_size: 8,
            invocations: 2,
        };
        assert!(matches!(misaligned.validate(), Err(ComputeError::InvalidJob(_))));

        let empty_output = ComputeJob {
            params: &[0; 16],
            input: &[0; 8],
            output_size: 0,
            invocations: 2,
        };
        assert!(empty_output.validate().is_err());

        let ok = ComputeJob {
            params: &[0; 16],
            input: &[0; 8],
            output_size: 8,
            invocations: 2,
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_missing_shader_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = KernelSource::from_file(&dir.path().join("missing.wgsl"), &["main"]).unwrap_err();
        assert!(matches!(err, ComputeError::ShaderRead { .. }), "got {err}");
    }

    #[test]
    fn test_kernel_source_from_file_uses_stem_as_label() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terrain.wgsl");
        std::fs::write(&path, SCALE_THEN_OFFSET).unwrap();
        let source = KernelSource::from_file(&path, &["scale"]).unwrap();
        assert_eq!(source.label, "terrain");
        assert_eq!(source.entry_points, vec!["scale".to_string()]);
    }

    #[test]
    fn test_decode_pod_drops_partial_tail() {
        let values = [1.0f32, 2.0, 3.0];
        let mut bytes = bytemuck::cast_slice::<f32, u8>(&values).to_vec();
        bytes.push(0xff);
        assert_eq!(decode_pod::<f32>(&bytes), values.to_vec());
    }

    #[test]
    fn test_dispatch_runs_entry_points_in_order() {
        let Some(mut dispatcher) = test_dispatcher() else {
            return;
        };
        let input: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let params = TestParams {
            count: input.len() as u32,
            factor: 2.0,
            _pad: [0; 2],
        };
        dispatcher
            .dispatch(ComputeJob {
                params: bytemuck::bytes_of(&params),
                input: bytemuck::cast_slice(&input),
                output_size: (input.len() * 4) as u64,
                invocations: input.len() as u32,
            })
            .unwrap();
        assert!(dispatcher.is_busy());

        let bytes = dispatcher.wait().expect("job in flight").unwrap();
        let output = decode_pod::<f32>(&bytes);
        assert_eq!(output.len(), 100);
        for (i, value) in output.iter().enumerate() {
            assert_eq!(*value, i as f32 * 2.0 + 1.0, "element {i}");
        }
        assert!(!dispatcher.is_busy());
        assert_eq!(dispatcher.pool().gpu_memory_in_use(), 0);
    }

    #[test]
    fn test_second_dispatch_while_busy_is_rejected() {
        let Some(mut dispatcher) = test_dispatcher() else {
            return;
        };
        let params = TestParams {
            count: 4,
            factor: 1.0,
            _pad: [0; 2],
        };
        let input = [1.0f32; 4];
        let job = ComputeJob {
            params: bytemuck::bytes_of(&params),
            input: bytemuck::cast_slice(&input),
            output_size: 16,
            invocations: 4,
        };
        dispatcher.dispatch(job).unwrap();
        assert!(matches!(dispatcher.dispatch(job), Err(ComputeError::Busy)));
        assert!(dispatcher.wait().unwrap().is_ok());
        // Buffers went back to the pool and are reused for the next job.
        let allocated = dispatcher.pool().gpu_memory_allocated();
        dispatcher.dispatch(job).unwrap();
        assert!(dispatcher.wait().unwrap().is_ok());
        assert_eq!(dispatcher.pool().gpu_memory_allocated(), allocated);
    }
}
