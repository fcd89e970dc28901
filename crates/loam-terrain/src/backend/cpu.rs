//! CPU generation on a pool of worker threads.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use rustc_hash::FxHashSet;
use tracing::{debug, trace, warn};

use super::{BackendError, GenerationBackend, GenerationError, GenerationOutcome, GenerationRequest};
use crate::coordinate::TileCoordinate;
use crate::heightfield::HeightfieldSynthesizer;

enum Mode {
    /// Generate on submit; outcomes wait for the next drain.
    Inline {
        synthesizer: HeightfieldSynthesizer,
        completed: VecDeque<GenerationOutcome>,
    },
    Pool {
        task_sender: Option<Sender<GenerationRequest>>,
        result_receiver: Receiver<GenerationOutcome>,
        workers: Vec<JoinHandle<()>>,
    },
}

/// Evaluates the synthesizer over whole tiles, off the scheduling thread.
pub struct CpuBackend {
    mode: Mode,
    max_in_flight: usize,
    /// Submitted and not yet drained.
    pending: FxHashSet<(TileCoordinate, u64)>,
}

impl CpuBackend {
    /// `thread_count == 0` generates inline on the calling thread.
    pub fn new(
        synthesizer: HeightfieldSynthesizer,
        thread_count: usize,
        max_in_flight: usize,
    ) -> Result<Self, BackendError> {
        let max_in_flight = max_in_flight.max(1);
        let mode = if thread_count == 0 {
            Mode::Inline {
                synthesizer,
                completed: VecDeque::new(),
            }
        } else {
            let (task_sender, task_receiver) = bounded::<GenerationRequest>(max_in_flight);
            let (result_sender, result_receiver) = bounded::<GenerationOutcome>(max_in_flight);
            let synthesizer = Arc::new(synthesizer);

            let mut workers = Vec::with_capacity(thread_count);
            for _ in 0..thread_count {
                let receiver = task_receiver.clone();
                let sender = result_sender.clone();
                let synthesizer = Arc::clone(&synthesizer);
                let handle = std::thread::Builder::new()
                    .name("terrain-gen-worker".into())
                    .spawn(move || worker_loop(&synthesizer, &receiver, &sender))
                    .map_err(BackendError::WorkerSpawn)?;
                workers.push(handle);
            }
            debug!("CPU terrain backend started with {} workers", thread_count);

            Mode::Pool {
                task_sender: Some(task_sender),
                result_receiver,
                workers,
            }
        };

        Ok(Self {
            mode,
            max_in_flight,
            pending: FxHashSet::default(),
        })
    }

    /// Leave headroom for the scheduling thread and the renderer.
    pub fn default_thread_count() -> usize {
        let cpus = num_cpus::get().max(2);
        (cpus - 2).max(1)
    }

    fn fail_pending(&mut self, outcomes: &mut Vec<GenerationOutcome>) {
        warn!(
            "Terrain workers disconnected with {} requests pending",
            self.pending.len()
        );
        outcomes.extend(
            self.pending
                .drain()
                .map(|(coordinate, build_id)| GenerationOutcome {
                    coordinate,
                    build_id,
                    result: Err(GenerationError::WorkerDisconnected),
                }),
        );
    }
}

fn worker_loop(
    synthesizer: &HeightfieldSynthesizer,
    receiver: &Receiver<GenerationRequest>,
    sender: &Sender<GenerationOutcome>,
) {
    while let Ok(request) = receiver.recv() {
        let start = Instant::now();
        let record = synthesizer.generate_record(request.coordinate, request.tile_samples);
        trace!(
            coordinate = %request.coordinate,
            elapsed_us = start.elapsed().as_micros() as u64,
            "generated tile"
        );
        let outcome = GenerationOutcome {
            coordinate: request.coordinate,
            build_id: request.build_id,
            result: Ok(record),
        };
        if sender.send(outcome).is_err() {
            break;
        }
    }
}

impl GenerationBackend for CpuBackend {
    fn submit(&mut self, request: GenerationRequest) -> Result<(), GenerationRequest> {
        if self.pending.len() >= self.max_in_flight {
            return Err(request);
        }
        match &mut self.mode {
            Mode::Inline {
                synthesizer,
                completed,
            } => {
                let record = synthesizer.generate_record(request.coordinate, request.tile_samples);
                completed.push_back(GenerationOutcome {
                    coordinate: request.coordinate,
                    build_id: request.build_id,
                    result: Ok(record),
                });
            }
            Mode::Pool { task_sender, .. } => {
                let Some(sender) = task_sender else {
                    return Err(request);
                };
                match sender.try_send(request) {
                    Ok(()) => {}
                    Err(TrySendError::Full(request)) | Err(TrySendError::Disconnected(request)) => {
                        return Err(request);
                    }
                }
            }
        }
        self.pending.insert((request.coordinate, request.build_id));
        Ok(())
    }

    fn drain_completed(&mut self) -> Vec<GenerationOutcome> {
        let mut outcomes = Vec::new();
        let mut disconnected = false;
        match &mut self.mode {
            Mode::Inline { completed, .. } => outcomes.extend(completed.drain(..)),
            Mode::Pool {
                result_receiver, ..
            } => loop {
                match result_receiver.try_recv() {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        disconnected = true;
                        break;
                    }
                }
            },
        }
        for outcome in &outcomes {
            self.pending.remove(&(outcome.coordinate, outcome.build_id));
        }
        if disconnected && !self.pending.is_empty() {
            self.fail_pending(&mut outcomes);
        }
        outcomes
    }

    fn in_flight(&self) -> usize {
        self.pending.len()
    }

    fn name(&self) -> &'static str {
        "cpu"
    }
}

impl Drop for CpuBackend {
    fn drop(&mut self) {
        if let Mode::Pool {
            task_sender,
            result_receiver,
            workers,
        } = &mut self.mode
        {
            // Closing the task channel ends the worker loops; drain results so
            // no worker stays blocked on a full result channel.
            task_sender.take();
            for handle in workers.drain(..) {
                while !handle.is_finished() {
                    if result_receiver.try_recv().is_err() {
                        std::thread::yield_now();
                    }
                }
                if handle.join().is_err() {
                    warn!("terrain worker panicked");
                }
            }
        }
    }
}
