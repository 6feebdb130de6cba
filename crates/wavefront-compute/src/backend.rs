//! Engine trait and the configuration shared by every engine.
//!
//! The [`WavefrontBackend`] trait abstracts over how the barrier protocol is
//! transported (threads sharing the matrix, or ranks exchanging messages) so
//! the driver can pick an engine at run time without knowing its internals.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use wavefront_core::{CoordinatorStats, PartitionPolicy, Schedule, WavefrontError, WavefrontMatrix};

/// Errors originating from an engine.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Backend not available: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Wavefront(#[from] WavefrontError),

    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("Worker {worker} failed: {reason}")]
    WorkerFailed { worker: usize, reason: String },

    #[error("Worker thread panicked: {0}")]
    WorkerPanicked(String),
}

/// Failures of the channels or message frames between coordinator and workers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("peer {peer} disconnected")]
    Disconnected { peer: String },

    #[error("cannot encode frame: {0}")]
    Encode(String),

    #[error("cannot decode frame: {0}")]
    Decode(String),

    #[error("expected {expected}, received {found}")]
    UnexpectedFrame { expected: String, found: String },

    #[error("run aborted")]
    Aborted,
}

/// The engines available to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BackendType {
    /// Emitter and worker threads over in-process queues.
    Farm,
    /// One Rayon parallel loop per diagonal.
    ParallelFor,
    /// Ranks with private replicas exchanging serialized frames.
    Distributed,
}

impl BackendType {
    pub fn name(&self) -> &'static str {
        match self {
            BackendType::Farm => "farm",
            BackendType::ParallelFor => "parallel-for",
            BackendType::Distributed => "distributed",
        }
    }

    pub fn all() -> [BackendType; 3] {
        [BackendType::Farm, BackendType::ParallelFor, BackendType::Distributed]
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where worker feedback is aggregated in the farm engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Topology {
    /// Workers report straight back to the dispatcher.
    #[default]
    Feedback,
    /// A dedicated collector thread aggregates feedback and signals the
    /// dispatcher once per completed diagonal.
    Collector,
}

/// How the distributed engine refreshes worker replicas after a diagonal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum SyncMode {
    /// Broadcast only the diagonal just completed.
    #[default]
    Diagonal,
    /// Broadcast the whole authoritative matrix. O(N²) per diagonal,
    /// O(N³) for the run.
    FullMatrix,
}

/// Knobs shared by every engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub workers: usize,
    pub schedule: Schedule,
    pub topology: Topology,
    pub sync: SyncMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::with_workers(workers)
    }
}

impl EngineConfig {
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            schedule: Schedule::default(),
            topology: Topology::default(),
            sync: SyncMode::default(),
        }
    }

    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn sync(mut self, sync: SyncMode) -> Self {
        self.sync = sync;
        self
    }

    /// Reject configurations before any thread is started.
    pub fn validate(&self) -> Result<(), WavefrontError> {
        if self.workers == 0 {
            return Err(WavefrontError::InvalidConfig(
                "worker count must be at least 1".into(),
            ));
        }
        self.schedule.validate()?;
        if self.topology == Topology::Collector && self.schedule.streams() {
            return Err(WavefrontError::InvalidConfig(
                "the collector topology requires static scheduling".into(),
            ));
        }
        Ok(())
    }
}

/// Describes an engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendInfo {
    pub name: String,
    pub backend_type: BackendType,
    pub workers: usize,
}

/// What an engine reports after driving a matrix to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub backend: BackendType,
    /// [`BackendInfo::name`] of the engine that produced the report.
    pub engine: String,
    pub size: usize,
    pub workers: usize,
    pub schedule: String,
    pub stats: CoordinatorStats,
}

/// Abstraction over the engines.
///
/// `run` computes every upper diagonal of an already seeded matrix in place.
/// It leaves the lower-triangle scratch mirror as it is; clearing it is the
/// caller's job (see [`crate::run`]).
pub trait WavefrontBackend: Send + Sync {
    /// Return information about the engine.
    fn backend_info(&self) -> BackendInfo;

    /// Drive the barrier protocol over `matrix` until the last diagonal is done.
    fn run(&self, matrix: &mut WavefrontMatrix) -> Result<RunReport, ComputeError>;
}
