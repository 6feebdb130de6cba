//! The worker side of the protocol: evaluate a chunk, report a count.

use log::trace;

use crate::error::WavefrontError;
use crate::kernel::{compute_entry, Window};
use crate::message::{Chunk, Feedback};
use crate::types::CellStore;

/// Stateless across chunks apart from the kernel scratch windows, which are
/// resized per diagonal and otherwise reused.
#[derive(Debug, Default, Clone)]
pub struct Worker {
    window: Window,
}

impl Worker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the kernel on every row of `chunk` and return the number of
    /// entries completed, `min(len, (N - k) - start)`.
    ///
    /// A chunk outside the matrix is a contract violation and is returned
    /// as an error without touching the store.
    pub fn process<S: CellStore + ?Sized>(
        &mut self,
        store: &mut S,
        chunk: Chunk,
    ) -> Result<Feedback, WavefrontError> {
        let size = store.size();
        chunk.validate(size)?;

        let completed = chunk.covered(size);
        self.window.resize(chunk.diagonal);
        for m in chunk.start..chunk.start + completed {
            compute_entry(store, chunk.diagonal, m, &mut self.window)?;
        }

        trace!(
            "chunk (k={}, start={}, len={}) -> {} entries",
            chunk.diagonal,
            chunk.start,
            chunk.len,
            completed
        );
        Ok(Feedback::new(completed))
    }
}
