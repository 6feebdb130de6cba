//! # Wavefront Compute
//!
//! Engines that drive the barrier protocol from [`wavefront_core`] over real
//! workers. Every engine implements [`WavefrontBackend`], so the driver picks
//! one at run time and the recurrence code never sees threads or channels.
//!
//! ## Available backends
//!
//! | Backend | Feature flag | Workers |
//! |---------|-------------|---------|
//! | Farm | always | Threads over a shared matrix, fed by a task queue |
//! | Parallel-for (Rayon) | `cpu` (default) | One parallel loop per diagonal |
//! | Distributed | `distributed` (default) | Ranks with private replicas, serialized frames |
//!
//! The farm engine supports both the static and the on-demand schedule and
//! an optional collector thread; see [`farm`].

pub mod backend;
pub mod farm;
mod shared;

#[cfg(feature = "cpu")]
pub mod parallel_for;

#[cfg(feature = "distributed")]
pub mod distributed;

pub use backend::{
    BackendInfo, BackendType, ComputeError, EngineConfig, RunReport, SyncMode, Topology,
    TransportError, WavefrontBackend,
};
pub use farm::FarmBackend;

#[cfg(feature = "cpu")]
pub use parallel_for::ParallelForBackend;

#[cfg(feature = "distributed")]
pub use distributed::ClusterBackend;

use wavefront_core::WavefrontMatrix;

/// Build the engine of kind `kind`, validating `config` up front.
pub fn create_backend(
    kind: BackendType,
    config: EngineConfig,
) -> Result<Box<dyn WavefrontBackend>, ComputeError> {
    match kind {
        BackendType::Farm => Ok(Box::new(FarmBackend::new(config)?)),
        #[cfg(feature = "cpu")]
        BackendType::ParallelFor => Ok(Box::new(ParallelForBackend::new(config)?)),
        #[cfg(not(feature = "cpu"))]
        BackendType::ParallelFor => Err(ComputeError::Unavailable(
            "parallel-for requires the `cpu` feature".into(),
        )),
        #[cfg(feature = "distributed")]
        BackendType::Distributed => Ok(Box::new(ClusterBackend::new(config)?)),
        #[cfg(not(feature = "distributed"))]
        BackendType::Distributed => Err(ComputeError::Unavailable(
            "distributed requires the `distributed` feature".into(),
        )),
    }
}

/// Engines compiled into this build.
pub fn available_backends() -> Vec<BackendType> {
    BackendType::all()
        .into_iter()
        .filter(|kind| match kind {
            BackendType::Farm => true,
            BackendType::ParallelFor => cfg!(feature = "cpu"),
            BackendType::Distributed => cfg!(feature = "distributed"),
        })
        .collect()
}

/// Run `matrix` to completion on a fresh engine and zero the lower-triangle
/// scratch afterwards, so only the main and upper diagonals remain.
pub fn run(
    matrix: &mut WavefrontMatrix,
    kind: BackendType,
    config: EngineConfig,
) -> Result<RunReport, ComputeError> {
    let backend = create_backend(kind, config)?;
    let report = backend.run(matrix)?;
    matrix.clear_scratch();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_farm_is_always_available() {
        assert!(available_backends().contains(&BackendType::Farm));
    }

    #[test]
    fn test_run_reports_engine_and_clears_scratch() {
        for kind in available_backends() {
            let config = EngineConfig::with_workers(2);
            let expected = create_backend(kind, config).unwrap().backend_info().name;
            let mut matrix = WavefrontMatrix::with_reference_seed(5).unwrap();
            let report = run(&mut matrix, kind, config).unwrap();
            assert_eq!(report.engine, expected);
            assert_eq!(report.backend, kind);
            assert_eq!(matrix.get(4, 0), 0.0);
            assert!(matrix.get(0, 4) > 0.0);
        }
    }

    #[test]
    fn test_create_rejects_zero_workers() {
        for kind in available_backends() {
            let err = create_backend(kind, EngineConfig::with_workers(0)).err();
            assert!(matches!(err, Some(ComputeError::Wavefront(_))), "{}", kind);
        }
    }
}
