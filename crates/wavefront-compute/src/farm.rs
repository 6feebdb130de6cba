//! Shared-memory farm: one dispatcher, W worker threads, optional collector.
//!
//! Chunks travel to the workers over a bounded multi-consumer queue, so an
//! idle worker simply pulls the next chunk. Feedback travels back over an
//! unbounded queue, either straight to the dispatcher or through a
//! collector thread that folds the per-chunk counts into one count per
//! diagonal. The dispatcher owns the [`Coordinator`] and is the only thread
//! that ever changes the active diagonal.
//!
//! - **Static** scheduling enqueues every chunk of the diagonal at once and
//!   waits for the barrier.
//! - **On-demand** scheduling keeps at most W chunks in flight and releases
//!   one more for every feedback message it receives.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use wavefront_core::{
    CellStore, CompletionBarrier, Coordinator, CoordinatorState, Feedback, Message,
    PartitionPolicy, WavefrontError, WavefrontMatrix, Worker,
};

use crate::backend::{
    BackendInfo, BackendType, ComputeError, EngineConfig, RunReport, Topology, TransportError,
    WavefrontBackend,
};
use crate::shared::SharedCells;

/// Queue slots per worker for the chunk queue.
const QUEUE_DEPTH: usize = 4;

/// Farm engine over `crossbeam-channel` queues and scoped threads.
pub struct FarmBackend {
    config: EngineConfig,
}

impl FarmBackend {
    pub fn new(config: EngineConfig) -> Result<Self, ComputeError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn describe(&self, schedule: &str) -> String {
        let topology = match self.config.topology {
            Topology::Feedback => "feedback",
            Topology::Collector => "collector",
        };
        format!(
            "Farm ({} workers, {}, {})",
            self.config.workers, schedule, topology
        )
    }

    /// Run with an arbitrary partition policy in place of the configured
    /// schedule. Worker count and topology still come from the config.
    pub fn run_with<P: PartitionPolicy>(
        &self,
        matrix: &mut WavefrontMatrix,
        policy: P,
    ) -> Result<RunReport, ComputeError> {
        if self.config.topology == Topology::Collector && policy.streams() {
            return Err(WavefrontError::InvalidConfig(
                "the collector topology requires static scheduling".into(),
            )
            .into());
        }
        let size = matrix.size();
        let workers = self.config.workers;
        let schedule = policy.name();
        let engine = self.describe(schedule);
        let mut coordinator = Coordinator::new(size, workers, policy)?;
        info!("{}: N={}, {} chunks", engine, size, schedule);

        if !coordinator.is_done() {
            // SAFETY: chunks in flight cover disjoint rows of one diagonal and
            // the dispatcher only releases diagonal k + 1 after every worker
            // has reported diagonal k through the feedback channel, which
            // orders those writes before the next reads.
            let cells = unsafe { SharedCells::new(matrix) };
            run_farm(cells, &mut coordinator, workers, self.config.topology)?;
        }

        info!("farm: done after {} diagonal(s)", coordinator.stats().diagonals_completed);
        Ok(RunReport {
            backend: BackendType::Farm,
            engine,
            size,
            workers,
            schedule: schedule.to_string(),
            stats: coordinator.stats(),
        })
    }
}

impl WavefrontBackend for FarmBackend {
    fn backend_info(&self) -> BackendInfo {
        BackendInfo {
            name: self.describe(self.config.schedule.name()),
            backend_type: BackendType::Farm,
            workers: self.config.workers,
        }
    }

    fn run(&self, matrix: &mut WavefrontMatrix) -> Result<RunReport, ComputeError> {
        self.run_with(matrix, self.config.schedule)
    }
}

fn run_farm<S, P>(
    cells: S,
    coordinator: &mut Coordinator<P>,
    workers: usize,
    topology: Topology,
) -> Result<(), ComputeError>
where
    S: CellStore + Copy + Send,
    P: PartitionPolicy,
{
    let size = coordinator.size();
    let (task_tx, task_rx) = bounded::<Message>(workers * QUEUE_DEPTH);
    let (worker_tx, worker_rx) = unbounded::<Message>();

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers + 1);
        let mut spawn_error = None;

        for id in 0..workers {
            let tasks = task_rx.clone();
            let feedback = worker_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("wavefront-worker-{}", id))
                .spawn_scoped(scope, move || worker_loop(id, cells, tasks, feedback));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    spawn_error = Some(ComputeError::Unavailable(format!(
                        "cannot spawn worker thread: {}",
                        e
                    )));
                    break;
                }
            }
        }
        drop(worker_tx);

        // In the collector topology the dispatcher listens to the collector,
        // otherwise directly to the workers.
        let (dispatcher_rx, collector) = match topology {
            Topology::Feedback => (worker_rx, None),
            Topology::Collector => {
                let (collector_tx, collector_rx) = unbounded::<Message>();
                let spawned = thread::Builder::new()
                    .name("wavefront-collector".into())
                    .spawn_scoped(scope, move || collector_loop(size, worker_rx, collector_tx));
                match spawned {
                    Ok(handle) => (collector_rx, Some(handle)),
                    Err(e) => {
                        spawn_error.get_or_insert(ComputeError::Unavailable(format!(
                            "cannot spawn collector thread: {}",
                            e
                        )));
                        (collector_rx, None)
                    }
                }
            }
        };

        let outcome = match spawn_error {
            Some(e) => Err(e),
            None => dispatch_loop(coordinator, &task_tx, &dispatcher_rx, workers),
        };

        if let Err(e) = &outcome {
            error!("farm: aborting run: {}", e);
            // Drop whatever is still queued so workers stop at the next pull.
            while task_rx.try_recv().is_ok() {}
        }
        for _ in 0..handles.len() {
            let _ = task_tx.send(Message::EndOfStream);
        }
        drop(dispatcher_rx);

        let mut joined = Ok(());
        for handle in handles.into_iter().chain(collector) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                joined = Err(ComputeError::WorkerPanicked(name));
            }
        }
        outcome.and(joined)
    })
}

/// Feed chunks to the queue and fold feedback into the coordinator until the
/// last diagonal is complete.
fn dispatch_loop<P: PartitionPolicy>(
    coordinator: &mut Coordinator<P>,
    tasks: &Sender<Message>,
    feedback: &Receiver<Message>,
    workers: usize,
) -> Result<(), ComputeError> {
    let streams = coordinator.policy().streams();
    let mut pending = VecDeque::new();

    while !coordinator.is_done() {
        if let CoordinatorState::Dispatching(_) = coordinator.state() {
            pending.extend(coordinator.dispatch()?);
            let window = if streams { workers } else { pending.len() };
            for chunk in pending.drain(..window.min(pending.len())) {
                send_task(tasks, Message::Chunk(chunk))?;
            }
        }

        match feedback.recv() {
            Ok(Message::Feedback(fb)) => {
                coordinator.record(fb)?;
                if streams {
                    if let Some(chunk) = pending.pop_front() {
                        send_task(tasks, Message::Chunk(chunk))?;
                    }
                }
            }
            Ok(Message::WorkerFailed { worker, reason }) => {
                return Err(ComputeError::WorkerFailed { worker, reason });
            }
            Ok(other) => {
                return Err(TransportError::UnexpectedFrame {
                    expected: "feedback".into(),
                    found: format!("{:?}", other),
                }
                .into());
            }
            Err(_) => {
                return Err(TransportError::Disconnected {
                    peer: "workers".into(),
                }
                .into());
            }
        }
    }
    debug!("dispatcher: all diagonals complete");
    Ok(())
}

fn send_task(tasks: &Sender<Message>, message: Message) -> Result<(), ComputeError> {
    tasks.send(message).map_err(|_| {
        ComputeError::Transport(TransportError::Disconnected {
            peer: "workers".into(),
        })
    })
}

fn worker_loop<S: CellStore>(
    id: usize,
    mut cells: S,
    tasks: Receiver<Message>,
    feedback: Sender<Message>,
) {
    let mut worker = Worker::new();
    loop {
        let chunk = match tasks.recv() {
            Ok(Message::Chunk(chunk)) => chunk,
            Ok(Message::EndOfStream) | Err(_) => break,
            Ok(other) => {
                let _ = feedback.send(Message::WorkerFailed {
                    worker: id,
                    reason: format!("unexpected message {:?}", other),
                });
                break;
            }
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker.process(&mut cells, chunk)));
        let reply = match outcome {
            Ok(Ok(fb)) => Message::Feedback(fb),
            Ok(Err(e)) => Message::WorkerFailed {
                worker: id,
                reason: e.to_string(),
            },
            Err(_) => Message::WorkerFailed {
                worker: id,
                reason: format!("panic while processing {:?}", chunk),
            },
        };
        let failed = matches!(reply, Message::WorkerFailed { .. });
        if failed {
            warn!("worker {}: giving up on {:?}", id, chunk);
        }
        if feedback.send(reply).is_err() || failed {
            break;
        }
    }
}

/// Aggregate per-chunk feedback and forward one count per finished diagonal.
fn collector_loop(size: usize, from_workers: Receiver<Message>, to_dispatcher: Sender<Message>) {
    let mut barrier = CompletionBarrier::new(size);
    while !barrier.is_complete() {
        let message = match from_workers.recv() {
            Ok(message) => message,
            Err(_) => break,
        };
        let forward = match message {
            Message::Feedback(fb) => match barrier.add(fb) {
                Ok(Some(diagonal)) => Some(Message::Feedback(Feedback::new(size - diagonal))),
                Ok(None) => None,
                Err(e) => Some(Message::WorkerFailed {
                    worker: usize::MAX,
                    reason: format!("collector: {}", e),
                }),
            },
            failure @ Message::WorkerFailed { .. } => Some(failure),
            Message::EndOfStream => break,
            Message::Chunk(chunk) => Some(Message::WorkerFailed {
                worker: usize::MAX,
                reason: format!("collector received {:?}", chunk),
            }),
        };
        if let Some(message) = forward {
            let stop = matches!(message, Message::WorkerFailed { .. });
            if to_dispatcher.send(message).is_err() || stop {
                break;
            }
        }
    }
    debug!("collector: exiting at diagonal {}", barrier.diagonal());
}
