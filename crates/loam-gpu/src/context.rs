//! Headless GPU device initialization for compute work.
//!
//! Provides [`ComputeContext`], which owns the wgpu device and queue used by
//! every dispatcher, and [`ComputeContextError`] for clear diagnostics when
//! initialization fails.

/// Error type for compute context initialization failures.
#[derive(Debug, thiserror::Error)]
pub enum ComputeContextError {
    /// No compatible GPU adapter found.
    #[error("no compatible GPU adapter found")]
    NoAdapter,

    /// The adapter cannot run compute shaders (e.g. a WebGL2-class downlevel device).
    #[error("GPU adapter '{0}' does not support compute shaders")]
    MissingComputeSupport(String),

    /// Failed to request GPU device.
    #[error("failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),
}

/// Owns the GPU device and queue shared by all compute dispatchers of a session.
pub struct ComputeContext {
    pub adapter_info: wgpu::AdapterInfo,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl ComputeContext {
    /// Initialize a device without a surface.
    pub async fn new_headless() -> Result<Self, ComputeContextError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = match instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
        {
            Ok(adapter) => adapter,
            Err(_) => return Err(ComputeContextError::NoAdapter),
        };

        let info = adapter.get_info();
        if !adapter
            .get_downlevel_capabilities()
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
        {
            return Err(ComputeContextError::MissingComputeSupport(info.name));
        }
        log::info!(
            "Selected compute GPU: {} ({:?}, {:?})",
            info.name,
            info.backend,
            info.device_type
        );

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("loam-compute-device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
                trace: wgpu::Trace::Off,
            })
            .await?;

        Ok(Self {
            adapter_info: info,
            device,
            queue,
        })
    }

    /// Initialize the compute context synchronously using `pollster`.
    pub fn new_headless_blocking() -> Result<Self, ComputeContextError> {
        pollster::block_on(Self::new_headless())
    }

    /// Process finished GPU work without blocking, firing pending `map_async` callbacks.
    pub fn poll(&self) {
        if let Err(err) = self.device.poll(wgpu::PollType::Poll) {
            log::warn!("GPU poll failed: {err}");
        }
    }
}
