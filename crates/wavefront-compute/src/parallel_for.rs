//! Parallel-for engine using Rayon for shared-memory parallelism.
//!
//! Each diagonal is one parallel loop over its chunks on a dedicated pool of
//! W threads. The end of the loop is the bulk-synchronous barrier; the
//! per-chunk feedback is still folded through the [`Coordinator`] so a
//! short or overlapping tiling is caught the same way as in the farm.

use log::info;
use rayon::prelude::*;
use wavefront_core::{Coordinator, Feedback, WavefrontError, WavefrontMatrix, Worker};

use crate::backend::{BackendInfo, BackendType, ComputeError, EngineConfig, RunReport, WavefrontBackend};
use crate::shared::SharedCells;

/// Engine that parallelises each diagonal across a Rayon thread pool.
pub struct ParallelForBackend {
    config: EngineConfig,
    pool: rayon::ThreadPool,
}

impl ParallelForBackend {
    pub fn new(config: EngineConfig) -> Result<Self, ComputeError> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("wavefront-pf-{}", i))
            .build()
            .map_err(|e| ComputeError::Unavailable(e.to_string()))?;
        Ok(Self { config, pool })
    }
}

impl WavefrontBackend for ParallelForBackend {
    fn backend_info(&self) -> BackendInfo {
        BackendInfo {
            name: format!(
                "Parallel-for ({} threads, {})",
                self.pool.current_num_threads(),
                self.config.schedule.name()
            ),
            backend_type: BackendType::ParallelFor,
            workers: self.config.workers,
        }
    }

    fn run(&self, matrix: &mut WavefrontMatrix) -> Result<RunReport, ComputeError> {
        let size = matrix.size();
        let engine = self.backend_info().name;
        let mut coordinator = Coordinator::new(size, self.config.workers, self.config.schedule)?;
        info!("{}: N={}", engine, size);

        if !coordinator.is_done() {
            // SAFETY: each parallel loop covers disjoint rows of one diagonal,
            // and the loop joins before the next diagonal is dispatched.
            let cells = unsafe { SharedCells::new(matrix) };
            self.pool.install(|| -> Result<(), ComputeError> {
                while !coordinator.is_done() {
                    let chunks = coordinator.dispatch()?;
                    let feedback: Vec<Result<Feedback, WavefrontError>> = chunks
                        .into_par_iter()
                        .map_init(Worker::new, |worker, chunk| {
                            let mut cells = cells;
                            worker.process(&mut cells, chunk)
                        })
                        .collect();
                    for fb in feedback {
                        coordinator.record(fb?)?;
                    }
                }
                Ok(())
            })?;
        }

        Ok(RunReport {
            backend: BackendType::ParallelFor,
            engine,
            size,
            workers: self.config.workers,
            schedule: self.config.schedule.name().to_string(),
            stats: coordinator.stats(),
        })
    }
}
