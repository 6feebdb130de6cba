//! Value-typed messages exchanged between the coordinator and its workers.

use serde::{Deserialize, Serialize};

use crate::error::WavefrontError;
use crate::partition::Span;

/// A unit of work: rows `[start, start + len)` of diagonal `diagonal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chunk {
    pub diagonal: usize,
    pub start: usize,
    pub len: usize,
}

impl Chunk {
    pub fn new(diagonal: usize, span: Span) -> Self {
        Self {
            diagonal,
            start: span.start,
            len: span.len,
        }
    }

    /// Rows actually covered in an N×N matrix. A chunk may nominally run
    /// past the end of its diagonal; the overrun is dropped here.
    pub fn covered(&self, size: usize) -> usize {
        let diagonal_len = size.saturating_sub(self.diagonal);
        self.len.min(diagonal_len.saturating_sub(self.start))
    }

    /// Check the chunk against an N×N matrix: the diagonal must be in
    /// `[1, N)`, the chunk non-empty, and its first row on the diagonal.
    pub fn validate(&self, size: usize) -> Result<(), WavefrontError> {
        let valid = self.diagonal >= 1
            && self.diagonal < size
            && self.len > 0
            && self.start < size - self.diagonal;
        if valid {
            Ok(())
        } else {
            Err(WavefrontError::ChunkContract {
                diagonal: self.diagonal,
                start: self.start,
                len: self.len,
                size,
            })
        }
    }
}

/// Number of matrix entries a worker finished. Carries no worker or
/// diagonal identity, so aggregation is order-independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub completed: usize,
}

impl Feedback {
    pub fn new(completed: usize) -> Self {
        Self { completed }
    }
}

/// Everything that travels over a work or feedback queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Chunk(Chunk),
    Feedback(Feedback),
    /// No more work will follow; the receiver should shut down.
    EndOfStream,
    /// A worker hit a fatal error and has stopped.
    WorkerFailed { worker: usize, reason: String },
}
