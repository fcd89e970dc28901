//! Generation backends: who turns a tile coordinate into a [`TerrainTileRecord`].
//!
//! Both backends are asynchronous. Requests go in through
//! [`GenerationBackend::submit`], finished records come out of
//! [`GenerationBackend::drain_completed`] on a later tick, in any order. There
//! is no cancellation; the streaming manager tags each request with a build id
//! and drops outcomes whose tile has since moved on.

mod cpu;
mod gpu;

use std::sync::Arc;

use loam_config::{BackendKind, Config};
use loam_gpu::{ComputeContext, ComputeContextError, ComputeError, KernelSource, WgpuDispatcher};

use crate::coordinate::TileCoordinate;
use crate::heightfield::HeightfieldSynthesizer;
use crate::record::TerrainTileRecord;

pub use cpu::CpuBackend;
pub use gpu::{GpuBackend, GpuGeneratorParams, GpuSample, GpuSampleInput, TERRAIN_ENTRY_POINTS};

/// A request to generate one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationRequest {
    pub coordinate: TileCoordinate,
    /// Identifies the tile build this request belongs to.
    pub build_id: u64,
    /// Interior samples per side (`N`).
    pub tile_samples: u32,
}

/// A finished (or failed) generation request.
#[derive(Debug)]
pub struct GenerationOutcome {
    pub coordinate: TileCoordinate,
    pub build_id: u64,
    pub result: Result<TerrainTileRecord, GenerationError>,
}

/// A single generation call failed; the tile is retried on a later tick.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("GPU generation failed: {0}")]
    Compute(#[from] ComputeError),

    #[error("GPU returned {actual} bytes, expected {expected}")]
    MalformedOutput { expected: usize, actual: usize },

    #[error("generation worker pool shut down")]
    WorkerDisconnected,

    #[error("sample indices of tile {coordinate} do not fit the kernel's 32-bit range")]
    IndexOutOfRange { coordinate: TileCoordinate },
}

/// A backend could not be brought up. Fatal for the session.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("GPU initialization failed: {0}")]
    Gpu(#[from] ComputeContextError),

    #[error("failed to load compute kernels: {0}")]
    Kernels(#[from] ComputeError),

    #[error("{0} requires a shader module path")]
    MissingShader(&'static str),

    #[error("failed to spawn generation worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

/// Asynchronous tile generation.
pub trait GenerationBackend: Send {
    /// Queue a request. Returns it back if the backend cannot take more work
    /// right now; the caller retries on a later tick.
    #[allow(clippy::result_large_err)]
    fn submit(&mut self, request: GenerationRequest) -> Result<(), GenerationRequest>;

    /// Collect every outcome that finished since the last call.
    ///
    /// Call this once per tick on the scheduling thread.
    fn drain_completed(&mut self) -> Vec<GenerationOutcome>;

    /// Requests submitted but not yet drained.
    fn in_flight(&self) -> usize;

    fn name(&self) -> &'static str;
}

/// Lazily created GPU device shared by every GPU consumer in a session.
#[derive(Default)]
pub struct SharedCompute {
    context: Option<Arc<ComputeContext>>,
}

impl SharedCompute {
    pub fn get(&mut self) -> Result<Arc<ComputeContext>, ComputeContextError> {
        if let Some(context) = &self.context {
            return Ok(Arc::clone(context));
        }
        let context = Arc::new(ComputeContext::new_headless_blocking()?);
        self.context = Some(Arc::clone(&context));
        Ok(context)
    }
}

/// Build the backend selected by `config.backend.kind`.
///
/// A GPU backend that cannot start (no adapter, no compute support, missing
/// shader) is an error, never a silent fallback to the CPU.
pub fn create_backend(
    config: &Config,
    compute: &mut SharedCompute,
) -> Result<Box<dyn GenerationBackend>, BackendError> {
    let synthesizer = HeightfieldSynthesizer::new(&config.generator, &config.materials);
    match config.backend.kind {
        BackendKind::Cpu => {
            let threads = config
                .backend
                .worker_threads
                .unwrap_or_else(CpuBackend::default_thread_count);
            Ok(Box::new(CpuBackend::new(
                synthesizer,
                threads,
                config.backend.max_in_flight,
            )?))
        }
        BackendKind::Gpu => {
            let path = config
                .backend
                .terrain_shader
                .as_deref()
                .ok_or(BackendError::MissingShader("the GPU terrain backend"))?;
            let source = KernelSource::from_file(path, &TERRAIN_ENTRY_POINTS)?;
            let dispatcher = WgpuDispatcher::new(compute.get()?, &source)?;
            Ok(Box::new(GpuBackend::new(
                synthesizer,
                Box::new(dispatcher),
                config.backend.max_in_flight,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_backend_is_created_by_default() {
        let mut config = Config::default();
        config.backend.worker_threads = Some(1);
        let backend = create_backend(&config, &mut SharedCompute::default()).unwrap();
        assert_eq!(backend.name(), "cpu");
        assert_eq!(backend.in_flight(), 0);
    }

    #[test]
    fn test_gpu_backend_without_shader_is_fatal() {
        let mut config = Config::default();
        config.backend.kind = BackendKind::Gpu;
        let err = match create_backend(&config, &mut SharedCompute::default()) {
            Ok(_) => panic!("GPU backend must not start without a shader"),
            Err(err) => err,
        };
        assert!(matches!(err, BackendError::MissingShader(_)), "got {err}");
    }

    #[test]
    fn test_gpu_backend_with_unreadable_shader_is_fatal() {
        let dir = std::env::temp_dir().join("loam-missing-shader-test");
        let mut config = Config::default();
        config.backend.kind = BackendKind::Gpu;
        config.backend.terrain_shader = Some(dir.join("does-not-exist.wgsl"));
        let result = create_backend(&config, &mut SharedCompute::default());
        assert!(matches!(
            result,
            Err(BackendError::Kernels(ComputeError::ShaderRead { .. }))
        ));
    }
}
