//! Pushing tessellated collision vertices along their normals.
//!
//! The displacement of a vertex is a per-material noise detail weighted by
//! its splat, scaled by the global strength and bounded by the configured
//! distance. The physics mesh gets the relief the render mesh only shades.

use std::collections::VecDeque;

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use loam_config::{Config, DisplacementKind, GeneratorConfig, MaterialConfig};
use loam_gpu::{ComputeDispatcher, ComputeError, ComputeJob, KernelSource, WgpuDispatcher, decode_pod};
use noise::{NoiseFn, Perlin};
use tracing::warn;

use super::tessellator::TessellatedMesh;
use crate::backend::{BackendError, SharedCompute};
use crate::coordinate::TileCoordinate;

/// Entry point of the displacement kernel.
pub const DISPLACEMENT_ENTRY_POINTS: [&str; 1] = ["compute_offsets"];

/// Keeps the displacement noise independent of the height noise.
const DISPLACEMENT_SEED_SALT: u32 = 0x9e37_79b9;

/// Tessellated vertices of one collision tile waiting for their offsets.
#[derive(Debug, Clone)]
pub struct DisplacementJob {
    pub coordinate: TileCoordinate,
    pub build_id: u64,
    /// World position of the tile's local origin.
    pub origin: Vec3,
    pub mesh: TessellatedMesh,
}

/// A job handed back with one offset per vertex, or the reason it has none.
#[derive(Debug)]
pub struct DisplacementOutcome {
    pub job: DisplacementJob,
    pub result: Result<Vec<f32>, DisplacementError>,
}

#[derive(Debug, thiserror::Error)]
pub enum DisplacementError {
    #[error("GPU displacement failed: {0}")]
    Compute(#[from] ComputeError),

    #[error("displacement returned {actual} offsets for {expected} vertices")]
    MalformedOutput { expected: usize, actual: usize },
}

/// Asynchronous displacement, same submit/drain shape as tile generation.
pub trait DisplacementBackend: Send {
    #[allow(clippy::result_large_err)]
    fn submit(&mut self, job: DisplacementJob) -> Result<(), DisplacementJob>;

    fn drain_completed(&mut self) -> Vec<DisplacementOutcome>;

    fn in_flight(&self) -> usize;

    fn name(&self) -> &'static str;
}

/// CPU evaluation of the displacement detail.
#[derive(Clone)]
pub struct DisplacementModel {
    perlin: Perlin,
    offset: [f64; 2],
    /// `(scale, strength)` per splat channel.
    layers: [(f64, f64); 4],
    strength: f64,
    distance: f64,
}

impl DisplacementModel {
    pub fn new(generator: &GeneratorConfig, materials: &MaterialConfig) -> Self {
        Self {
            perlin: Perlin::new(generator.seed ^ DISPLACEMENT_SEED_SALT),
            offset: [generator.offset[0] as f64, generator.offset[1] as f64],
            layers: materials.layers.map(|layer| {
                (
                    layer.displacement_scale as f64,
                    layer.displacement_strength as f64,
                )
            }),
            strength: materials.displacement_strength as f64,
            distance: materials.displacement_distance.max(0.0) as f64,
        }
    }

    /// Offset along the normal for a vertex at `world` with material weights `splat`.
    pub fn displacement(&self, world: Vec3, splat: Vec4) -> f32 {
        let (x, z) = (world.x as f64, world.z as f64);
        let mut detail = 0.0;
        for (channel, &(scale, strength)) in self.layers.iter().enumerate() {
            let weight = splat[channel] as f64;
            if weight == 0.0 || strength == 0.0 {
                continue;
            }
            let value = self
                .perlin
                .get([x * scale + self.offset[0], z * scale + self.offset[1]]);
            detail += weight * strength * value;
        }
        (detail * self.strength * self.distance).clamp(-self.distance, self.distance) as f32
    }

    /// Uniform block for the displacement kernel.
    pub fn gpu_params(&self, seed: u32, vertex_count: u32) -> GpuDisplacementParams {
        GpuDisplacementParams {
            vertex_count,
            seed: seed ^ DISPLACEMENT_SEED_SALT,
            _pad: [0; 2],
            global: [
                self.offset[0] as f32,
                self.offset[1] as f32,
                self.strength as f32,
                self.distance as f32,
            ],
            layers: self
                .layers
                .map(|(scale, strength)| [scale as f32, strength as f32, 0.0, 0.0]),
        }
    }
}

/// One vertex as uploaded to the kernel: tightly packed, 40 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CollisionBaseData {
    /// World space.
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub splat: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuDisplacementParams {
    pub vertex_count: u32,
    pub seed: u32,
    pub _pad: [u32; 2],
    /// offset.x, offset.y, strength, distance
    pub global: [f32; 4],
    /// Per material: scale, strength, unused, unused
    pub layers: [[f32; 4]; 4],
}

fn base_data(job: &DisplacementJob, out: &mut Vec<CollisionBaseData>) {
    out.clear();
    out.extend(
        job.mesh
            .positions
            .iter()
            .zip(&job.mesh.normals)
            .zip(&job.mesh.splats)
            .map(|((&p, &n), &s)| CollisionBaseData {
                position: (p + job.origin).to_array(),
                normal: n.to_array(),
                splat: s.to_array(),
            }),
    );
}

/// Displacement computed on submit; outcomes are handed out on the next drain.
///
/// Without a model every offset is zero and the collider follows the
/// interpolated surface.
pub struct CpuDisplacement {
    model: Option<DisplacementModel>,
    completed: Vec<DisplacementOutcome>,
}

impl CpuDisplacement {
    pub fn new(model: DisplacementModel) -> Self {
        Self {
            model: Some(model),
            completed: Vec::new(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            model: None,
            completed: Vec::new(),
        }
    }
}

impl DisplacementBackend for CpuDisplacement {
    fn submit(&mut self, job: DisplacementJob) -> Result<(), DisplacementJob> {
        let offsets = match &self.model {
            Some(model) => job
                .mesh
                .positions
                .iter()
                .zip(&job.mesh.splats)
                .map(|(&p, &s)| model.displacement(p + job.origin, s))
                .collect(),
            None => vec![0.0; job.mesh.vertex_count()],
        };
        self.completed.push(DisplacementOutcome {
            job,
            result: Ok(offsets),
        });
        Ok(())
    }

    fn drain_completed(&mut self) -> Vec<DisplacementOutcome> {
        std::mem::take(&mut self.completed)
    }

    fn in_flight(&self) -> usize {
        self.completed.len()
    }

    fn name(&self) -> &'static str {
        if self.model.is_some() { "cpu" } else { "disabled" }
    }
}

/// Displacement through the `compute_offsets` kernel, one tile at a time.
pub struct GpuDisplacement {
    dispatcher: Box<dyn ComputeDispatcher>,
    model: DisplacementModel,
    seed: u32,
    queued: VecDeque<DisplacementJob>,
    running: Option<DisplacementJob>,
    completed: Vec<DisplacementOutcome>,
    max_in_flight: usize,
    inputs: Vec<CollisionBaseData>,
}

impl GpuDisplacement {
    pub fn new(
        model: DisplacementModel,
        seed: u32,
        dispatcher: Box<dyn ComputeDispatcher>,
        max_in_flight: usize,
    ) -> Self {
        Self {
            dispatcher,
            model,
            seed,
            queued: VecDeque::new(),
            running: None,
            completed: Vec::new(),
            max_in_flight: max_in_flight.max(1),
            inputs: Vec::new(),
        }
    }

    fn pump(&mut self) {
        while self.running.is_none() && !self.dispatcher.is_busy() {
            let Some(job) = self.queued.pop_front() else {
                return;
            };
            if job.mesh.vertex_count() == 0 {
                self.completed.push(DisplacementOutcome {
                    job,
                    result: Ok(Vec::new()),
                });
                continue;
            }
            base_data(&job, &mut self.inputs);
            let params = self.model.gpu_params(self.seed, self.inputs.len() as u32);
            let dispatch = self.dispatcher.dispatch(ComputeJob {
                params: bytemuck::bytes_of(&params),
                input: bytemuck::cast_slice(&self.inputs),
                output_size: (self.inputs.len() * std::mem::size_of::<f32>()) as u64,
                invocations: self.inputs.len() as u32,
            });
            match dispatch {
                Ok(()) => self.running = Some(job),
                Err(err) => {
                    warn!(coordinate = %job.coordinate, "displacement dispatch failed: {err}");
                    self.completed.push(DisplacementOutcome {
                        job,
                        result: Err(err.into()),
                    });
                }
            }
        }
    }
}

impl DisplacementBackend for GpuDisplacement {
    fn submit(&mut self, job: DisplacementJob) -> Result<(), DisplacementJob> {
        if self.in_flight() >= self.max_in_flight {
            return Err(job);
        }
        self.queued.push_back(job);
        self.pump();
        Ok(())
    }

    fn drain_completed(&mut self) -> Vec<DisplacementOutcome> {
        if let Some(result) = self.dispatcher.poll()
            && let Some(job) = self.running.take()
        {
            let expected = job.mesh.vertex_count();
            let result = result.map_err(DisplacementError::from).and_then(|bytes| {
                let offsets = decode_pod::<f32>(&bytes);
                if offsets.len() == expected {
                    Ok(offsets)
                } else {
                    Err(DisplacementError::MalformedOutput {
                        expected,
                        actual: offsets.len(),
                    })
                }
            });
            self.completed.push(DisplacementOutcome { job, result });
        }
        self.pump();
        std::mem::take(&mut self.completed)
    }

    fn in_flight(&self) -> usize {
        self.queued.len() + usize::from(self.running.is_some()) + self.completed.len()
    }

    fn name(&self) -> &'static str {
        "gpu"
    }
}

/// Build the displacement step selected by `config.collision.displacement`.
pub fn create_displacement_backend(
    config: &Config,
    compute: &mut SharedCompute,
) -> Result<Box<dyn DisplacementBackend>, BackendError> {
    let model = DisplacementModel::new(&config.generator, &config.materials);
    match config.collision.displacement {
        DisplacementKind::Disabled => Ok(Box::new(CpuDisplacement::disabled())),
        DisplacementKind::Cpu => Ok(Box::new(CpuDisplacement::new(model))),
        DisplacementKind::Gpu => {
            let path = config
                .backend
                .displacement_shader
                .as_deref()
                .ok_or(BackendError::MissingShader("GPU collision displacement"))?;
            let source = KernelSource::from_file(path, &DISPLACEMENT_ENTRY_POINTS)?;
            let dispatcher = WgpuDispatcher::new(compute.get()?, &source)?;
            Ok(Box::new(GpuDisplacement::new(
                model,
                config.generator.seed,
                Box::new(dispatcher),
                config.backend.max_in_flight,
            )))
        }
    }
}
