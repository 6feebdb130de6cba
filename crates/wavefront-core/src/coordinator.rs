//! The diagonal-barrier coordinator.
//!
//! The coordinator owns the current diagonal index `k` and walks the state
//! machine
//!
//! ```text
//! Dispatching(k) ──dispatch──▶ AwaitingFeedback(k) ──record × n──▶ Advancing(k)
//!       ▲                                                              │
//!       └──────────────── k + 1 < N ◀──────────────────────────────────┤
//!                                                   k + 1 == N ──▶ Done
//! ```
//!
//! Diagonal `k + 1` is never dispatched before the feedback for diagonal `k`
//! adds up to exactly `N - k`. That barrier is what makes every write of
//! diagonal `k` visible to the readers of diagonal `k + 1`, and it is the only
//! synchronization the shared matrix needs.
//!
//! The coordinator does no I/O and spawns nothing. Engines drive it: they ask
//! it for the chunks of the active diagonal, deliver them over their own
//! transport, and feed every [`Feedback`] they get back into
//! [`Coordinator::record`].

use log::{debug, trace};
use serde::Serialize;

use crate::error::WavefrontError;
use crate::message::{Chunk, Feedback};
use crate::partition::PartitionPolicy;

/// Where the coordinator is in the per-diagonal cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Dispatching(usize),
    AwaitingFeedback(usize),
    Advancing(usize),
    Done,
}

/// Outcome of recording one feedback message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The active diagonal still has `remaining` entries outstanding.
    Pending { remaining: usize },
    /// Diagonal `completed` is finished and `next` is ready for dispatch.
    Advanced { completed: usize, next: usize },
    /// The last diagonal is finished.
    Finished { completed: usize },
}

/// Counters collected over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub diagonals_completed: usize,
    pub chunks_dispatched: usize,
    pub feedback_received: usize,
}

/// Per-diagonal accumulator of feedback counts.
///
/// Starts on diagonal 1. The accumulator resets to zero exactly when it
/// reaches the diagonal length `N - k`, at which point the barrier moves to
/// `k + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionBarrier {
    size: usize,
    diagonal: usize,
    received: usize,
}

impl CompletionBarrier {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            diagonal: 1,
            received: 0,
        }
    }

    /// The diagonal currently being accumulated.
    pub fn diagonal(&self) -> usize {
        self.diagonal
    }

    /// Length of the current diagonal.
    pub fn expected(&self) -> usize {
        self.size.saturating_sub(self.diagonal)
    }

    pub fn received(&self) -> usize {
        self.received
    }

    pub fn remaining(&self) -> usize {
        self.expected() - self.received
    }

    /// True once every diagonal has been accounted for.
    pub fn is_complete(&self) -> bool {
        self.diagonal >= self.size
    }

    /// Add one feedback count. Returns the diagonal index when this count
    /// completes it.
    pub fn add(&mut self, feedback: Feedback) -> Result<Option<usize>, WavefrontError> {
        if self.is_complete() {
            return Err(WavefrontError::Protocol(format!(
                "feedback of {} after the last diagonal",
                feedback.completed
            )));
        }
        if feedback.completed == 0 {
            return Err(WavefrontError::Protocol(format!(
                "empty feedback on diagonal {}",
                self.diagonal
            )));
        }

        let expected = self.expected();
        let total = self.received + feedback.completed;
        if total > expected {
            return Err(WavefrontError::FeedbackOverflow {
                diagonal: self.diagonal,
                received: total,
                expected,
            });
        }
        if total == expected {
            let completed = self.diagonal;
            self.received = 0;
            self.diagonal += 1;
            Ok(Some(completed))
        } else {
            self.received = total;
            Ok(None)
        }
    }
}

/// Drives the diagonals of an N×N matrix through the barrier protocol,
/// cutting each one into chunks with the policy `P`.
#[derive(Debug)]
pub struct Coordinator<P> {
    size: usize,
    workers: usize,
    policy: P,
    state: CoordinatorState,
    barrier: CompletionBarrier,
    stats: CoordinatorStats,
}

impl<P: PartitionPolicy> Coordinator<P> {
    /// Create a coordinator for an N×N matrix and `workers` workers.
    ///
    /// With `size == 1` there is nothing to compute and the coordinator
    /// starts in [`CoordinatorState::Done`].
    pub fn new(size: usize, workers: usize, policy: P) -> Result<Self, WavefrontError> {
        if size == 0 {
            return Err(WavefrontError::InvalidConfig(
                "matrix size N must be at least 1".into(),
            ));
        }
        if workers == 0 {
            return Err(WavefrontError::InvalidConfig(
                "worker count must be at least 1".into(),
            ));
        }
        policy.validate()?;

        let state = if size == 1 {
            CoordinatorState::Done
        } else {
            CoordinatorState::Dispatching(1)
        };
        Ok(Self {
            size,
            workers,
            policy,
            state,
            barrier: CompletionBarrier::new(size),
            stats: CoordinatorStats::default(),
        })
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// The active diagonal, or N once the run is done.
    pub fn diagonal(&self) -> usize {
        match self.state {
            CoordinatorState::Dispatching(k)
            | CoordinatorState::AwaitingFeedback(k)
            | CoordinatorState::Advancing(k) => k,
            CoordinatorState::Done => self.size,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == CoordinatorState::Done
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Entries of the active diagonal not yet reported back.
    pub fn outstanding(&self) -> usize {
        match self.state {
            CoordinatorState::AwaitingFeedback(_) => self.barrier.remaining(),
            CoordinatorState::Dispatching(k) => self.size - k,
            _ => 0,
        }
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.stats
    }

    /// Partition the active diagonal and move to `AwaitingFeedback`.
    ///
    /// The returned chunks tile the diagonal exactly; a policy that produces
    /// anything else is a contract violation and aborts the run.
    pub fn dispatch(&mut self) -> Result<Vec<Chunk>, WavefrontError> {
        let k = match self.state {
            CoordinatorState::Dispatching(k) => k,
            other => {
                return Err(WavefrontError::Protocol(format!(
                    "dispatch requested in state {:?}",
                    other
                )))
            }
        };

        let diagonal_len = self.size - k;
        let chunks: Vec<Chunk> = self
            .policy
            .split(self.size, diagonal_len, self.workers)?
            .into_iter()
            .map(|span| Chunk::new(k, span))
            .collect();

        let mut next_row = 0;
        for chunk in &chunks {
            chunk.validate(self.size)?;
            if chunk.start != next_row {
                return Err(WavefrontError::ChunkContract {
                    diagonal: k,
                    start: chunk.start,
                    len: chunk.len,
                    size: self.size,
                });
            }
            next_row += chunk.covered(self.size);
        }
        if next_row != diagonal_len {
            return Err(WavefrontError::ChunkContract {
                diagonal: k,
                start: next_row,
                len: diagonal_len - next_row.min(diagonal_len),
                size: self.size,
            });
        }

        debug!(
            "diagonal {}: dispatching {} chunk(s) over {} row(s)",
            k,
            chunks.len(),
            diagonal_len
        );
        self.stats.chunks_dispatched += chunks.len();
        self.state = CoordinatorState::AwaitingFeedback(k);
        Ok(chunks)
    }

    /// Account for one feedback message on the active diagonal.
    pub fn record(&mut self, feedback: Feedback) -> Result<Progress, WavefrontError> {
        let k = match self.state {
            CoordinatorState::AwaitingFeedback(k) => k,
            other => {
                return Err(WavefrontError::Protocol(format!(
                    "feedback of {} received in state {:?}",
                    feedback.completed, other
                )))
            }
        };
        debug_assert_eq!(k, self.barrier.diagonal());

        self.stats.feedback_received += 1;
        match self.barrier.add(feedback)? {
            None => {
                trace!(
                    "diagonal {}: +{} ({} outstanding)",
                    k,
                    feedback.completed,
                    self.barrier.remaining()
                );
                Ok(Progress::Pending {
                    remaining: self.barrier.remaining(),
                })
            }
            Some(completed) => {
                self.state = CoordinatorState::Advancing(completed);
                Ok(self.advance())
            }
        }
    }

    fn advance(&mut self) -> Progress {
        let completed = self.diagonal();
        self.stats.diagonals_completed += 1;
        let next = completed + 1;
        if next == self.size {
            debug!("diagonal {}: complete, run finished", completed);
            self.state = CoordinatorState::Done;
            Progress::Finished { completed }
        } else {
            debug!("diagonal {}: complete, advancing to {}", completed, next);
            self.state = CoordinatorState::Dispatching(next);
            Progress::Advanced { completed, next }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{ChunkSizing, Schedule, Span};
    use proptest::prelude::*;

    fn complete_diagonal<P: PartitionPolicy>(coordinator: &mut Coordinator<P>) -> Progress {
        let chunks = coordinator.dispatch().unwrap();
        let mut last = None;
        for chunk in chunks {
            let n = coordinator.size();
            last = Some(coordinator.record(Feedback::new(chunk.covered(n))).unwrap());
        }
        last.unwrap()
    }

    #[test]
    fn test_single_cell_matrix_is_done_immediately() {
        let mut c = Coordinator::new(1, 4, Schedule::default()).unwrap();
        assert!(c.is_done());
        assert_eq!(c.diagonal(), 1);
        assert!(matches!(c.dispatch(), Err(WavefrontError::Protocol(_))));
        assert_eq!(c.stats(), CoordinatorStats::default());
    }

    #[test]
    fn test_invalid_configuration() {
        assert!(Coordinator::new(0, 1, Schedule::default()).is_err());
        assert!(Coordinator::new(4, 0, Schedule::default()).is_err());
        assert!(Coordinator::new(4, 2, Schedule::OnDemand { chunk_size: 0 }).is_err());
    }

    #[test]
    fn test_two_by_two_processes_one_diagonal() {
        let mut c = Coordinator::new(2, 3, Schedule::default()).unwrap();
        let chunks = c.dispatch().unwrap();
        assert_eq!(chunks, vec![Chunk { diagonal: 1, start: 0, len: 1 }]);
        assert_eq!(
            c.record(Feedback::new(1)).unwrap(),
            Progress::Finished { completed: 1 }
        );
        assert_eq!(c.stats().diagonals_completed, 1);
    }

    #[test]
    fn test_four_by_four_two_workers_static() {
        let mut c = Coordinator::new(4, 2, Schedule::Static(ChunkSizing::FirstDiagonal)).unwrap();
        assert_eq!(c.state(), CoordinatorState::Dispatching(1));

        let chunks = c.dispatch().unwrap();
        assert_eq!(
            chunks,
            vec![
                Chunk { diagonal: 1, start: 0, len: 2 },
                Chunk { diagonal: 1, start: 2, len: 1 },
            ]
        );
        assert_eq!(c.state(), CoordinatorState::AwaitingFeedback(1));
        // Out-of-order feedback is fine.
        assert_eq!(
            c.record(Feedback::new(1)).unwrap(),
            Progress::Pending { remaining: 2 }
        );
        assert_eq!(
            c.record(Feedback::new(2)).unwrap(),
            Progress::Advanced { completed: 1, next: 2 }
        );

        assert_eq!(complete_diagonal(&mut c), Progress::Advanced { completed: 2, next: 3 });
        assert_eq!(complete_diagonal(&mut c), Progress::Finished { completed: 3 });
        assert!(c.is_done());
        assert_eq!(c.stats().diagonals_completed, 3);
    }

    #[test]
    fn test_feedback_overflow_is_fatal() {
        let mut c = Coordinator::new(4, 1, Schedule::default()).unwrap();
        c.dispatch().unwrap();
        assert_eq!(
            c.record(Feedback::new(4)),
            Err(WavefrontError::FeedbackOverflow {
                diagonal: 1,
                received: 4,
                expected: 3
            })
        );
    }

    #[test]
    fn test_feedback_before_dispatch_is_rejected() {
        let mut c = Coordinator::new(4, 1, Schedule::default()).unwrap();
        assert!(matches!(
            c.record(Feedback::new(1)),
            Err(WavefrontError::Protocol(_))
        ));
        c.dispatch().unwrap();
        assert!(matches!(c.dispatch(), Err(WavefrontError::Protocol(_))));
    }

    #[test]
    fn test_policy_with_gap_is_rejected() {
        struct Gappy;
        impl PartitionPolicy for Gappy {
            fn chunk_size(&self, _: usize, _: usize, _: usize) -> usize {
                1
            }
            fn split(&self, _: usize, len: usize, _: usize) -> Result<Vec<Span>, WavefrontError> {
                Ok(vec![Span { start: 1, len: len - 1 }])
            }
        }
        let mut c = Coordinator::new(5, 1, Gappy).unwrap();
        assert!(matches!(
            c.dispatch(),
            Err(WavefrontError::ChunkContract { diagonal: 1, .. })
        ));
    }

    #[test]
    fn test_barrier_resets_between_diagonals() {
        let mut barrier = CompletionBarrier::new(3);
        assert_eq!(barrier.add(Feedback::new(1)).unwrap(), None);
        assert_eq!(barrier.received(), 1);
        assert_eq!(barrier.add(Feedback::new(1)).unwrap(), Some(1));
        assert_eq!(barrier.received(), 0);
        assert_eq!(barrier.expected(), 1);
        assert_eq!(barrier.add(Feedback::new(1)).unwrap(), Some(2));
        assert!(barrier.is_complete());
        assert!(barrier.add(Feedback::new(1)).is_err());
    }

    fn shuffle<T>(items: &mut [T], mut seed: u64) {
        for i in (1..items.len()).rev() {
            seed = seed
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let j = (seed >> 33) as usize % (i + 1);
            items.swap(i, j);
        }
    }

    fn schedule_strategy() -> impl Strategy<Value = Schedule> {
        prop_oneof![
            Just(Schedule::Static(ChunkSizing::FirstDiagonal)),
            Just(Schedule::Static(ChunkSizing::PerDiagonal)),
            (1usize..6).prop_map(|rows| Schedule::Static(ChunkSizing::Fixed(rows))),
            (1usize..4).prop_map(|chunk_size| Schedule::OnDemand { chunk_size }),
        ]
    }

    proptest! {
        #[test]
        fn prop_every_diagonal_completes_exactly(
            size in 1usize..40,
            workers in 1usize..9,
            schedule in schedule_strategy(),
            seed in any::<u64>(),
        ) {
            let mut c = Coordinator::new(size, workers, schedule).unwrap();
            let mut advances = 0;
            while !c.is_done() {
                let k = c.diagonal();
                let mut chunks = c.dispatch().unwrap();
                shuffle(&mut chunks, seed ^ k as u64);

                let mut received = 0;
                for (i, chunk) in chunks.iter().enumerate() {
                    received += chunk.covered(size);
                    let progress = c.record(Feedback::new(chunk.covered(size))).unwrap();
                    let pending = matches!(progress, Progress::Pending { .. });
                    if i + 1 < chunks.len() {
                        prop_assert!(pending, "diagonal {} advanced early", k);
                    } else {
                        prop_assert_eq!(received, size - k);
                        prop_assert!(!pending, "diagonal {} never advanced", k);
                    }
                }
                advances += 1;
            }
            prop_assert_eq!(advances, size - 1);
            prop_assert_eq!(c.stats().diagonals_completed, size - 1);
        }
    }
}
