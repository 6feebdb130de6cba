//! Distributed-memory engine for message-passing clusters.
//!
//! Every rank owns a private replica of the matrix; nothing is shared. Rank 0
//! (the root) holds the authoritative matrix and the [`Coordinator`]. Each
//! diagonal is one round of the collective pattern
//!
//! 1. **scatter**: the root cuts the diagonal into one balanced block per
//!    rank and sends each rank its chunk descriptor (the root computes too);
//! 2. **compute**: every rank evaluates its rows on its own replica;
//! 3. **gather**: the partial values come back to the root, which installs
//!    them and feeds their counts into the barrier;
//! 4. **broadcast**: the root sends the updated state to every replica.
//!
//! The seed diagonal is broadcast once before the first round. With
//! [`SyncMode::Diagonal`] step 4 moves only the new diagonal (O(N²) in
//! total); [`SyncMode::FullMatrix`] moves the whole matrix every round,
//! which is O(N³) for the run and is kept as the simple, communication-heavy
//! form of the protocol.
//!
//! Ranks are threads of a [`LocalCluster`] here; any [`Communicator`] that
//! provides ordered point-to-point messages can carry the same protocol.

pub mod comm;
pub mod protocol;

use std::thread;

use log::{debug, error, info};
use wavefront_core::{
    Balanced, CellStore, Chunk, Coordinator, CoordinatorState, Feedback, PartitionPolicy,
    WavefrontMatrix, Worker,
};

pub use comm::{Communicator, LocalCluster, LocalComm};
pub use protocol::Frame;

use crate::backend::{
    BackendInfo, BackendType, ComputeError, EngineConfig, RunReport, SyncMode, TransportError,
    WavefrontBackend,
};

const ROOT: usize = 0;

/// Engine that runs the barrier protocol over `W` message-passing ranks.
pub struct ClusterBackend {
    config: EngineConfig,
}

impl ClusterBackend {
    pub fn new(config: EngineConfig) -> Result<Self, ComputeError> {
        config.validate()?;
        Ok(Self { config })
    }
}

impl WavefrontBackend for ClusterBackend {
    fn backend_info(&self) -> BackendInfo {
        let sync = match self.config.sync {
            SyncMode::Diagonal => "diagonal sync",
            SyncMode::FullMatrix => "full-matrix sync",
        };
        BackendInfo {
            name: format!("Distributed ({} ranks, {})", self.config.workers, sync),
            backend_type: BackendType::Distributed,
            workers: self.config.workers,
        }
    }

    fn run(&self, matrix: &mut WavefrontMatrix) -> Result<RunReport, ComputeError> {
        let size = matrix.size();
        let ranks = self.config.workers;
        let engine = self.backend_info().name;
        let mut coordinator = Coordinator::new(size, ranks, Balanced)?;
        info!("{}: N={}", engine, size);

        if !coordinator.is_done() {
            let mut comms = LocalCluster::connect(ranks).into_iter();
            let root = comms
                .next()
                .ok_or_else(|| ComputeError::Unavailable("cluster has no ranks".into()))?;
            run_cluster(
                root,
                comms.collect(),
                matrix,
                &mut coordinator,
                self.config.sync,
                run_rank::<LocalComm>,
            )?;
        }

        Ok(RunReport {
            backend: BackendType::Distributed,
            engine,
            size,
            workers: ranks,
            schedule: Balanced.name().into(),
            stats: coordinator.stats(),
        })
    }
}

/// Run the root on the calling thread and `rank_main` on one scoped thread
/// per other rank. On a root failure every rank is sent `Stop`.
fn run_cluster<R>(
    root: LocalComm,
    others: Vec<LocalComm>,
    matrix: &mut WavefrontMatrix,
    coordinator: &mut Coordinator<Balanced>,
    sync: SyncMode,
    rank_main: R,
) -> Result<(), ComputeError>
where
    R: Fn(LocalComm) -> Result<(), ComputeError> + Sync,
{
    let rank_main = &rank_main;
    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(others.len());
        let mut outcome = Ok(());
        for comm in others {
            let rank = comm.rank();
            let spawned = thread::Builder::new()
                .name(format!("wavefront-rank-{}", rank))
                .spawn_scoped(scope, move || rank_main(comm));
            match spawned {
                Ok(handle) => handles.push((rank, handle)),
                Err(e) => {
                    outcome = Err(ComputeError::Unavailable(format!(
                        "cannot spawn rank {}: {}",
                        rank, e
                    )));
                    break;
                }
            }
        }

        if outcome.is_ok() {
            outcome = run_root(&root, matrix, coordinator, sync);
        }
        if let Err(e) = &outcome {
            error!("distributed: aborting run: {}", e);
            if let Ok(stop) = Frame::Stop.encode() {
                for (rank, _) in &handles {
                    let _ = root.send(*rank, stop.clone());
                }
            }
        }
        drop(root);

        // A rank's own failure explains a root-side disconnect better than
        // the disconnect does.
        let mut rank_failure = None;
        for (rank, handle) in handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!("rank {}: {}", rank, e);
                    if rank_failure.is_none() && !matches!(e, ComputeError::Transport(_)) {
                        rank_failure = Some(e);
                    }
                }
                Err(_) => {
                    rank_failure.get_or_insert(ComputeError::WorkerPanicked(format!(
                        "rank {}",
                        rank
                    )));
                }
            }
        }
        match (outcome, rank_failure) {
            (Ok(()), None) => Ok(()),
            (_, Some(e)) => Err(e),
            (Err(e), None) => Err(e),
        }
    })
}

/// The root's side of every round. Owns the coordinator and the
/// authoritative matrix.
fn run_root<C: Communicator>(
    comm: &C,
    matrix: &mut WavefrontMatrix,
    coordinator: &mut Coordinator<Balanced>,
    sync: SyncMode,
) -> Result<(), ComputeError> {
    let size = matrix.size();
    let seed = Frame::Seed {
        size,
        diagonal: matrix.main_diagonal(),
    };
    comm.broadcast(ROOT, Some(seed.encode()?))?;

    let mut worker = Worker::new();
    while !coordinator.is_done() {
        let k = coordinator.diagonal();
        let chunks = coordinator.dispatch()?;
        if chunks.len() > comm.size() {
            return Err(TransportError::UnexpectedFrame {
                expected: format!("at most {} chunks", comm.size()),
                found: format!("{} chunks", chunks.len()),
            }
            .into());
        }

        let mut assignment: Vec<Option<Chunk>> = vec![None; comm.size()];
        for (slot, chunk) in assignment.iter_mut().zip(chunks) {
            *slot = Some(chunk);
        }
        for (rank, chunk) in assignment.iter().enumerate().skip(1) {
            comm.send(rank, Frame::Work { chunk: *chunk }.encode()?)?;
        }

        let own = compute_partial(&mut worker, matrix, assignment[ROOT])?;
        let gathered = comm
            .gather(ROOT, own.encode()?)?
            .ok_or(TransportError::Aborted)?;
        for bytes in gathered {
            match Frame::decode(&bytes)? {
                Frame::Partial { chunk: Some(chunk), values } => {
                    install_partial(matrix, chunk, &values)?;
                    coordinator.record(Feedback::new(values.len()))?;
                }
                Frame::Partial { chunk: None, .. } => {}
                other => return Err(other.unexpected("partial").into()),
            }
        }
        if let CoordinatorState::AwaitingFeedback(_) = coordinator.state() {
            return Err(TransportError::UnexpectedFrame {
                expected: format!("{} entries for diagonal {}", coordinator.outstanding(), k),
                found: "an incomplete gather".into(),
            }
            .into());
        }

        let update = match sync {
            SyncMode::Diagonal => Frame::Diagonal {
                k,
                values: matrix.upper_diagonal(k),
            },
            SyncMode::FullMatrix => Frame::Matrix {
                cells: matrix.as_slice().to_vec(),
            },
        };
        comm.broadcast(ROOT, Some(update.encode()?))?;
        debug!("root: diagonal {} broadcast", k);
    }

    let stop = Frame::Stop.encode()?;
    for rank in 1..comm.size() {
        comm.send(rank, stop.clone())?;
    }
    Ok(())
}

/// A worker rank: keep a replica in step with the root and compute whatever
/// chunk the root assigns, until told to stop.
fn run_rank<C: Communicator>(comm: C) -> Result<(), ComputeError> {
    let (size, diagonal) = match Frame::decode(&comm.broadcast(ROOT, None)?)? {
        Frame::Seed { size, diagonal } => (size, diagonal),
        Frame::Stop => return Ok(()),
        other => return Err(other.unexpected("seed").into()),
    };
    let mut replica = WavefrontMatrix::new(size)?;
    replica.seed_diagonal(&diagonal)?;
    let mut worker = Worker::new();

    loop {
        let chunk = match Frame::decode(&comm.recv(ROOT)?)? {
            Frame::Work { chunk } => chunk,
            Frame::Stop => return Ok(()),
            other => return Err(other.unexpected("work").into()),
        };

        let partial = compute_partial(&mut worker, &mut replica, chunk)?;
        comm.gather(ROOT, partial.encode()?)?;

        match Frame::decode(&comm.broadcast(ROOT, None)?)? {
            Frame::Diagonal { k, values } => replica.install_diagonal(k, &values)?,
            Frame::Matrix { cells } => replica.copy_from_slice(&cells)?,
            Frame::Stop => return Ok(()),
            other => return Err(other.unexpected("state update").into()),
        }
    }
}

fn compute_partial<S: CellStore>(
    worker: &mut Worker,
    store: &mut S,
    chunk: Option<Chunk>,
) -> Result<Frame, ComputeError> {
    let Some(chunk) = chunk else {
        return Ok(Frame::Partial {
            chunk: None,
            values: Vec::new(),
        });
    };
    let feedback = worker.process(store, chunk)?;
    let k = chunk.diagonal;
    let values = (chunk.start..chunk.start + feedback.completed)
        .map(|m| store.read(m, m + k))
        .collect();
    Ok(Frame::Partial {
        chunk: Some(chunk),
        values,
    })
}

fn install_partial(
    matrix: &mut WavefrontMatrix,
    chunk: Chunk,
    values: &[f64],
) -> Result<(), ComputeError> {
    let size = matrix.size();
    chunk.validate(size)?;
    if values.len() != chunk.covered(size) {
        return Err(wavefront_core::WavefrontError::ChunkContract {
            diagonal: chunk.diagonal,
            start: chunk.start,
            len: values.len(),
            size,
        }
        .into());
    }
    let k = chunk.diagonal;
    for (offset, &value) in values.iter().enumerate() {
        let m = chunk.start + offset;
        matrix.write(m + k, m, value);
        matrix.write(m, m + k, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wavefront_core::reference::reference_wavefront;

    fn run_with(ranks: usize, size: usize, sync: SyncMode) -> (WavefrontMatrix, RunReport) {
        let backend = ClusterBackend::new(EngineConfig::with_workers(ranks).sync(sync)).unwrap();
        let mut m = WavefrontMatrix::with_reference_seed(size).unwrap();
        let report = backend.run(&mut m).unwrap();
        m.clear_scratch();
        (m, report)
    }

    #[test]
    fn test_replicas_reproduce_reference() {
        let mut expected = WavefrontMatrix::with_reference_seed(11).unwrap();
        reference_wavefront(&mut expected);
        for sync in [SyncMode::Diagonal, SyncMode::FullMatrix] {
            let (m, report) = run_with(3, 11, sync);
            assert_eq!(m, expected, "{:?}", sync);
            assert_eq!(report.stats.diagonals_completed, 10);
        }
    }

    #[test]
    fn test_single_rank_has_no_peers() {
        let (m, report) = run_with(1, 6, SyncMode::Diagonal);
        assert_eq!(report.stats.chunks_dispatched, 5);
        assert!(m.corner() > 0.0);
    }

    #[test]
    fn test_idle_ranks_join_the_gather() {
        // Eight ranks, at most five rows per diagonal.
        let (m, report) = run_with(8, 6, SyncMode::Diagonal);
        assert_eq!(report.stats.chunks_dispatched, 5 + 4 + 3 + 2 + 1);
        let mut expected = WavefrontMatrix::with_reference_seed(6).unwrap();
        reference_wavefront(&mut expected);
        approx::assert_relative_eq!(m.corner(), expected.corner(), max_relative = 1e-9);
    }

    #[test]
    fn test_rank_sees_stop_before_seed() {
        let mut comms = LocalCluster::connect(2);
        let rank = comms.pop().unwrap();
        let root = comms.pop().unwrap();
        root.send(1, Frame::Stop.encode().unwrap()).unwrap();
        assert!(run_rank(rank).is_ok());
    }

    fn cluster_with_faulty_rank<R>(faulty: R) -> Result<(), ComputeError>
    where
        R: Fn(LocalComm) -> Result<(), ComputeError> + Sync,
    {
        let mut matrix = WavefrontMatrix::with_reference_seed(8).unwrap();
        let mut coordinator = Coordinator::new(8, 3, Balanced).unwrap();
        let mut comms = LocalCluster::connect(3).into_iter();
        let root = comms.next().unwrap();
        run_cluster(
            root,
            comms.collect(),
            &mut matrix,
            &mut coordinator,
            SyncMode::Diagonal,
            |comm: LocalComm| {
                if comm.rank() == 2 {
                    faulty(comm)
                } else {
                    run_rank(comm)
                }
            },
        )
    }

    /// Take the seed and the first work frame, as a real rank would.
    fn first_chunk(comm: &LocalComm) -> Result<Option<Chunk>, ComputeError> {
        comm.broadcast(ROOT, None)?;
        match Frame::decode(&comm.recv(ROOT)?)? {
            Frame::Work { chunk } => Ok(chunk),
            other => Err(other.unexpected("work").into()),
        }
    }

    #[test]
    fn test_short_partial_aborts_every_rank() {
        let result = cluster_with_faulty_rank(|comm| {
            let chunk = first_chunk(&comm)?;
            let short = Frame::Partial {
                chunk,
                values: Vec::new(),
            };
            comm.gather(ROOT, short.encode()?)?;
            // The root must give up on the round and release us.
            match Frame::decode(&comm.recv(ROOT)?)? {
                Frame::Stop => Ok(()),
                other => Err(other.unexpected("stop").into()),
            }
        });
        assert!(
            matches!(
                result,
                Err(ComputeError::Wavefront(
                    wavefront_core::WavefrontError::ChunkContract { diagonal: 1, .. }
                ))
            ),
            "{:?}",
            result
        );
    }

    #[test]
    fn test_rank_failure_mid_round_is_reported() {
        let result = cluster_with_faulty_rank(|comm| {
            first_chunk(&comm)?;
            Err(ComputeError::WorkerFailed {
                worker: comm.rank(),
                reason: "lost its replica".into(),
            })
        });
        assert!(
            matches!(result, Err(ComputeError::WorkerFailed { worker: 2, .. })),
            "{:?}",
            result
        );
    }
}
