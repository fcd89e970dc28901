//! GPU generation: upload per-sample base data, run the terrain kernels, read
//! the samples back.
//!
//! Kernel contract (`generate_heights` then `finalize_samples`, see
//! [`loam_gpu::dispatcher`] for the bindings):
//! - params: [`GpuGeneratorParams`]
//! - input: one [`GpuSampleInput`] per record cell, row-major
//! - output: one [`GpuSample`] per record cell, same order
//!
//! `generate_heights` writes heights into `output[i].position.y`;
//! `finalize_samples` reads neighbouring heights for normals and fills in the
//! rest. Border cells take their outer neighbours' heights from the noise
//! directly.

use std::collections::VecDeque;

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use loam_gpu::{ComputeDispatcher, ComputeJob, decode_pod};
use tracing::{debug, warn};

use super::{GenerationBackend, GenerationError, GenerationOutcome, GenerationRequest};
use crate::heightfield::{HeightfieldSample, HeightfieldSynthesizer, global_sample_index};
use crate::record::TerrainTileRecord;

/// Entry points run, in order, for every tile.
pub const TERRAIN_ENTRY_POINTS: [&str; 2] = ["generate_heights", "finalize_samples"];

/// Base data of one record cell.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuSampleInput {
    /// Global sample index; world position is `global_index * grid_size`.
    pub global_index: [i32; 2],
    /// Sample index relative to the tile origin (`-1..=N`).
    pub local_index: [i32; 2],
}

/// One generated sample as written by `finalize_samples`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuSample {
    pub position: [f32; 3],
    pub tessellation_strength: f32,
    pub normal: [f32; 3],
    pub _pad: f32,
    pub splat: [f32; 4],
}

impl From<GpuSample> for HeightfieldSample {
    fn from(sample: GpuSample) -> Self {
        Self {
            position: Vec3::from_array(sample.position),
            normal: Vec3::from_array(sample.normal),
            splat: Vec4::from_array(sample.splat),
            tessellation_strength: sample.tessellation_strength,
        }
    }
}

impl From<HeightfieldSample> for GpuSample {
    fn from(sample: HeightfieldSample) -> Self {
        Self {
            position: sample.position.to_array(),
            tessellation_strength: sample.tessellation_strength,
            normal: sample.normal.to_array(),
            _pad: 0.0,
            splat: sample.splat.to_array(),
        }
    }
}

/// Uniform block carrying every synthesis parameter, laid out as vec4s.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuGeneratorParams {
    pub sample_count: u32,
    pub stride: u32,
    pub seed: u32,
    pub _pad0: u32,
    /// grid_size, offset.x, offset.y, max_height
    pub grid: [f32; 4],
    /// `(scale, power)` pairs: base_a, base_b, hills, detail, plateaus,
    /// modulation_a, modulation_b, unused.
    pub layers: [[f32; 4]; 4],
    /// base, hills, detail, plateau
    pub heights: [f32; 4],
    /// modulation_b_weight, modulation_strength, unused, unused
    pub modulation: [f32; 4],
    /// sand_blend, sand_random, snow_blend, snow_random
    pub biome: [f32; 4],
    /// temperature_scale, temperature_blend, temperature_random, unused
    pub temperature: [f32; 4],
    /// blend_offset, blend_exponent, unused, unused
    pub material_blend: [f32; 4],
    /// Per material: top, sides, bottom, unused
    pub material_limits: [[f32; 4]; 4],
}

impl GpuGeneratorParams {
    pub fn new(synthesizer: &HeightfieldSynthesizer, tile_samples: u32) -> Self {
        let g = synthesizer.generator();
        let m = synthesizer.materials();
        let stride = tile_samples + 2;
        let pair = |a: loam_config::NoiseLayer, b: loam_config::NoiseLayer| {
            [a.scale, a.power, b.scale, b.power]
        };
        let limits = m.layers.map(|layer| [layer.top, layer.sides, layer.bottom, 0.0]);
        Self {
            sample_count: stride * stride,
            stride,
            seed: g.seed,
            _pad0: 0,
            grid: [g.grid_size, g.offset[0], g.offset[1], g.max_height()],
            layers: [
                pair(g.base_a, g.base_b),
                pair(g.hills, g.detail),
                pair(g.plateaus, g.modulation_a),
                [g.modulation_b.scale, g.modulation_b.power, 0.0, 0.0],
            ],
            heights: [
                g.base_height,
                g.hills_height,
                g.detail_height,
                g.plateau_height,
            ],
            modulation: [g.modulation_b_weight, g.modulation_strength, 0.0, 0.0],
            biome: [g.sand_blend, g.sand_random, g.snow_blend, g.snow_random],
            temperature: [
                g.temperature_scale,
                g.temperature_blend,
                g.temperature_random,
                0.0,
            ],
            material_blend: [m.blend_offset, m.blend_exponent, 0.0, 0.0],
            material_limits: limits,
        }
    }
}

/// Per-cell base data of one tile's record, row-major.
///
/// The kernel takes 32-bit sample indices; a tile whose indices do not fit is
/// rejected instead of wrapping onto another part of the world.
pub fn sample_inputs(
    request: &GenerationRequest,
    inputs: &mut Vec<GpuSampleInput>,
) -> Result<(), GenerationError> {
    let stride = request.tile_samples + 2;
    let index = |tile: i32, local: u32| {
        i32::try_from(global_sample_index(tile, request.tile_samples, local)).map_err(|_| {
            GenerationError::IndexOutOfRange {
                coordinate: request.coordinate,
            }
        })
    };
    inputs.clear();
    inputs.reserve((stride * stride) as usize);
    for j in 0..stride {
        let y = index(request.coordinate.y, j)?;
        for i in 0..stride {
            inputs.push(GpuSampleInput {
                global_index: [index(request.coordinate.x, i)?, y],
                local_index: [i as i32 - 1, j as i32 - 1],
            });
        }
    }
    Ok(())
}

/// Serializes tile requests through one [`ComputeDispatcher`].
pub struct GpuBackend {
    synthesizer: HeightfieldSynthesizer,
    dispatcher: Box<dyn ComputeDispatcher>,
    queued: VecDeque<GenerationRequest>,
    running: Option<GenerationRequest>,
    completed: Vec<GenerationOutcome>,
    max_in_flight: usize,
    inputs: Vec<GpuSampleInput>,
}

impl GpuBackend {
    pub fn new(
        synthesizer: HeightfieldSynthesizer,
        dispatcher: Box<dyn ComputeDispatcher>,
        max_in_flight: usize,
    ) -> Self {
        Self {
            synthesizer,
            dispatcher,
            queued: VecDeque::new(),
            running: None,
            completed: Vec::new(),
            max_in_flight: max_in_flight.max(1),
            inputs: Vec::new(),
        }
    }

    /// Start the next queued request if the dispatcher is idle.
    fn pump(&mut self) {
        while self.running.is_none() && !self.dispatcher.is_busy() {
            let Some(request) = self.queued.pop_front() else {
                return;
            };
            if let Err(err) = sample_inputs(&request, &mut self.inputs) {
                warn!(coordinate = %request.coordinate, "{err}");
                self.completed.push(GenerationOutcome {
                    coordinate: request.coordinate,
                    build_id: request.build_id,
                    result: Err(err),
                });
                continue;
            }
            let params = GpuGeneratorParams::new(&self.synthesizer, request.tile_samples);
            let job = ComputeJob {
                params: bytemuck::bytes_of(&params),
                input: bytemuck::cast_slice(&self.inputs),
                output_size: (self.inputs.len() * std::mem::size_of::<GpuSample>()) as u64,
                invocations: self.inputs.len() as u32,
            };
            match self.dispatcher.dispatch(job) {
                Ok(()) => {
                    debug!(coordinate = %request.coordinate, "dispatched terrain kernels");
                    self.running = Some(request);
                }
                Err(err) => {
                    warn!(coordinate = %request.coordinate, "terrain dispatch failed: {err}");
                    self.completed.push(GenerationOutcome {
                        coordinate: request.coordinate,
                        build_id: request.build_id,
                        result: Err(err.into()),
                    });
                }
            }
        }
    }

    fn decode(&self, request: &GenerationRequest, bytes: &[u8]) -> Result<TerrainTileRecord, GenerationError> {
        let count = TerrainTileRecord::sample_count(request.tile_samples);
        let expected = count * std::mem::size_of::<GpuSample>();
        if bytes.len() != expected {
            return Err(GenerationError::MalformedOutput {
                expected,
                actual: bytes.len(),
            });
        }
        let samples = decode_pod::<GpuSample>(bytes)
            .into_iter()
            .map(HeightfieldSample::from)
            .collect();
        Ok(TerrainTileRecord::new(
            request.coordinate,
            request.tile_samples,
            self.synthesizer.grid_size(),
            samples,
        ))
    }
}

impl GenerationBackend for GpuBackend {
    fn submit(&mut self, request: GenerationRequest) -> Result<(), GenerationRequest> {
        if self.in_flight() >= self.max_in_flight {
            return Err(request);
        }
        self.queued.push_back(request);
        self.pump();
        Ok(())
    }

    fn drain_completed(&mut self) -> Vec<GenerationOutcome> {
        if let Some(result) = self.dispatcher.poll()
            && let Some(request) = self.running.take()
        {
            let result = result
                .map_err(GenerationError::from)
                .and_then(|bytes| self.decode(&request, &bytes));
            if let Err(err) = &result {
                warn!(coordinate = %request.coordinate, "terrain readback failed: {err}");
            }
            self.completed.push(GenerationOutcome {
                coordinate: request.coordinate,
                build_id: request.build_id,
                result,
            });
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

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use loam_config::{GeneratorConfig, MaterialConfig};
    use loam_gpu::ComputeError;

    use super::*;
    use crate::coordinate::TileCoordinate;
    use crate::heightfield::local_position;

    /// Runs the terrain kernel contract on the CPU, completing after `latency` polls.
    struct CpuKernelDispatcher {
        synthesizer: HeightfieldSynthesizer,
        latency: u32,
        pending: Option<(u32, Vec<u8>)>,
        log: Arc<Mutex<Vec<u32>>>,
        truncate_output: bool,
    }

    impl CpuKernelDispatcher {
        fn new(latency: u32) -> Self {
            Self {
                synthesizer: synthesizer(),
                latency,
                pending: None,
                log: Arc::default(),
                truncate_output: false,
            }
        }
    }

    impl ComputeDispatcher for CpuKernelDispatcher {
        fn is_busy(&self) -> bool {
            self.pending.is_some()
        }

        fn dispatch(&mut self, job: ComputeJob<'_>) -> Result<(), ComputeError> {
            if self.pending.is_some() {
                return Err(ComputeError::Busy);
            }
            job.validate()?;
            let params = decode_pod::<GpuGeneratorParams>(job.params)[0];
            let inputs = decode_pod::<GpuSampleInput>(job.input);
            assert_eq!(params.sample_count as usize, inputs.len());
            self.log.lock().unwrap().push(params.sample_count);

            let grid = params.grid[0];
            let outputs: Vec<GpuSample> = inputs
                .iter()
                .map(|input| {
                    let mut sample = self.synthesizer.sample_index(
                        input.global_index[0] as i64,
                        input.global_index[1] as i64,
                    );
                    sample.position = local_position(
                        (input.local_index[0] + 1) as usize,
                        (input.local_index[1] + 1) as usize,
                        sample.position.y,
                        grid,
                    );
                    GpuSample::from(sample)
                })
                .collect();
            let mut bytes = bytemuck::cast_slice(&outputs).to_vec();
            if self.truncate_output {
                bytes.truncate(bytes.len() / 2);
            }
            self.pending = Some((self.latency, bytes));
            Ok(())
        }

        fn poll(&mut self) -> Option<Result<Vec<u8>, ComputeError>> {
            let (remaining, _) = self.pending.as_mut()?;
            if *remaining > 0 {
                *remaining -= 1;
                return None;
            }
            self.pending.take().map(|(_, bytes)| Ok(bytes))
        }
    }

    /// Always fails the readback.
    struct FailingDispatcher {
        busy: bool,
    }

    impl ComputeDispatcher for FailingDispatcher {
        fn is_busy(&self) -> bool {
            self.busy
        }

        fn dispatch(&mut self, _job: ComputeJob<'_>) -> Result<(), ComputeError> {
            self.busy = true;
            Ok(())
        }

        fn poll(&mut self) -> Option<Result<Vec<u8>, ComputeError>> {
            if !self.busy {
                return None;
            }
            self.busy = false;
            Some(Err(ComputeError::Disconnected))
        }
    }

    fn synthesizer() -> HeightfieldSynthesizer {
        HeightfieldSynthesizer::new(&GeneratorConfig::default(), &MaterialConfig::default())
    }

    fn request(x: i32, y: i32, build_id: u64) -> GenerationRequest {
        GenerationRequest {
            coordinate: TileCoordinate::new(x, y),
            build_id,
            tile_samples: 9,
        }
    }

    fn drain_all(backend: &mut GpuBackend, count: usize) -> Vec<GenerationOutcome> {
        let mut outcomes = Vec::new();
        for _ in 0..1000 {
            outcomes.extend(backend.drain_completed());
            if outcomes.len() >= count {
                break;
            }
        }
        outcomes
    }

    #[test]
    fn test_params_layout_is_uniform_friendly() {
        assert_eq!(std::mem::size_of::<GpuGeneratorParams>() % 16, 0);
        assert_eq!(std::mem::size_of::<GpuSample>(), 48);
        assert_eq!(std::mem::size_of::<GpuSampleInput>(), 16);
    }

    #[test]
    fn test_sample_inputs_cover_record_with_border() {
        let mut inputs = Vec::new();
        sample_inputs(&request(1, -1, 0), &mut inputs).unwrap();
        assert_eq!(inputs.len(), 11 * 11);
        assert_eq!(inputs[0].local_index, [-1, -1]);
        assert_eq!(inputs[0].global_index, [7, -9]);
        assert_eq!(inputs[11 * 11 - 1].local_index, [9, 9]);
        assert_eq!(inputs[11 * 11 - 1].global_index, [17, 1]);
    }

    #[test]
    fn test_gpu_records_match_cpu_records() {
        let mut backend = GpuBackend::new(synthesizer(), Box::new(CpuKernelDispatcher::new(2)), 8);
        backend.submit(request(3, -2, 1)).unwrap();
        let outcome = drain_all(&mut backend, 1).pop().unwrap();
        let record = outcome.result.unwrap();
        assert_eq!(record, synthesizer().generate_record(TileCoordinate::new(3, -2), 9));
    }

    #[test]
    fn test_dispatches_are_serialized_in_submit_order() {
        let dispatcher = CpuKernelDispatcher::new(3);
        let log = Arc::clone(&dispatcher.log);
        let mut backend = GpuBackend::new(synthesizer(), Box::new(dispatcher), 8);
        for i in 0..4 {
            backend.submit(request(i, 0, i as u64)).unwrap();
        }
        assert_eq!(log.lock().unwrap().len(), 1, "only one dispatch in flight");
        assert_eq!(backend.in_flight(), 4);

        let outcomes = drain_all(&mut backend, 4);
        let order: Vec<u64> = outcomes.iter().map(|o| o.build_id).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert_eq!(log.lock().unwrap().len(), 4);
        assert_eq!(backend.in_flight(), 0);
    }

    #[test]
    fn test_queue_limit_rejects_requests() {
        let mut backend = GpuBackend::new(synthesizer(), Box::new(CpuKernelDispatcher::new(5)), 2);
        backend.submit(request(0, 0, 0)).unwrap();
        backend.submit(request(1, 0, 1)).unwrap();
        assert_eq!(backend.submit(request(2, 0, 2)), Err(request(2, 0, 2)));
    }

    #[test]
    fn test_readback_failure_is_reported_per_tile() {
        let mut backend =
            GpuBackend::new(synthesizer(), Box::new(FailingDispatcher { busy: false }), 4);
        backend.submit(request(0, 0, 9)).unwrap();
        let outcomes = backend.drain_completed();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].build_id, 9);
        assert!(matches!(
            outcomes[0].result,
            Err(GenerationError::Compute(ComputeError::Disconnected))
        ));
    }

    #[test]
    fn test_short_readback_is_malformed() {
        let mut dispatcher = CpuKernelDispatcher::new(0);
        dispatcher.truncate_output = true;
        let mut backend = GpuBackend::new(synthesizer(), Box::new(dispatcher), 4);
        backend.submit(request(0, 0, 1)).unwrap();
        let outcome = drain_all(&mut backend, 1).pop().unwrap();
        assert!(matches!(
            outcome.result,
            Err(GenerationError::MalformedOutput { expected, actual }) if actual == expected / 2
        ));
    }

    #[test]
    fn test_tile_beyond_index_range_fails_alone() {
        let dispatcher = CpuKernelDispatcher::new(0);
        let log = Arc::clone(&dispatcher.log);
        let mut backend = GpuBackend::new(synthesizer(), Box::new(dispatcher), 4);
        let far = request(i32::MAX / 4, 0, 5);
        let mut inputs = Vec::new();
        assert!(matches!(
            sample_inputs(&far, &mut inputs),
            Err(GenerationError::IndexOutOfRange { coordinate }) if coordinate == far.coordinate
        ));

        backend.submit(far).unwrap();
        backend.submit(request(0, 0, 6)).unwrap();
        let outcomes = drain_all(&mut backend, 2);
        assert_eq!(outcomes[0].build_id, 5);
        assert!(matches!(
            outcomes[0].result,
            Err(GenerationError::IndexOutOfRange { .. })
        ));
        assert_eq!(outcomes[1].build_id, 6);
        assert!(outcomes[1].result.is_ok());
        assert_eq!(log.lock().unwrap().len(), 1, "nothing dispatched for the far tile");
    }
}
