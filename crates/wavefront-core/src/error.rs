//! Error type shared by the kernel, partitioner, coordinator and worker.

use thiserror::Error;

/// Errors raised while scheduling or evaluating the wavefront recurrence.
///
/// Every variant is fatal for the run: the engines never retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WavefrontError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Chunk (k={diagonal}, start={start}, len={len}) violates the partition contract for N={size}")]
    ChunkContract {
        diagonal: usize,
        start: usize,
        len: usize,
        size: usize,
    },

    #[error("Kernel index out of bounds: k={diagonal}, m={row}, N={size}")]
    KernelBounds { diagonal: usize, row: usize, size: usize },

    #[error("Feedback overflow on diagonal {diagonal}: received {received}, expected {expected}")]
    FeedbackOverflow {
        diagonal: usize,
        received: usize,
        expected: usize,
    },

    #[error("Protocol violation: {0}")]
    Protocol(String),
}
