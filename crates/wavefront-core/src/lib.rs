//! # Wavefront Core
//!
//! The protocol half of the wavefront engines: an upper-triangular matrix
//! whose diagonal `k` depends on diagonals `< k`, and the barrier discipline
//! that lets many workers produce one diagonal at a time.
//!
//! ## Architecture
//!
//! A [`Coordinator`](coordinator::Coordinator) owns the active diagonal. It
//! cuts the diagonal into [`Chunk`](message::Chunk)s with a
//! [`PartitionPolicy`](partition::PartitionPolicy), hands them out, and
//! advances only when the [`Feedback`](message::Feedback) counts for the
//! diagonal add up to its length. [`Worker`](worker::Worker)s apply the
//! [`kernel`] to every row of a chunk. Transports (threads, message passing)
//! live in `wavefront-compute`; nothing here spawns or blocks.
//!
//! ## Modules
//!
//! - [`types`]: The matrix buffer and the `CellStore` access trait.
//! - [`kernel`]: The per-entry recurrence.
//! - [`partition`]: Chunking of a diagonal and scheduling policies.
//! - [`message`]: Chunk, feedback and the queue message union.
//! - [`coordinator`]: The diagonal-barrier state machine.
//! - [`worker`]: Chunk evaluation.
//! - [`reference`]: Sequential oracle used for validation.

pub mod coordinator;
pub mod error;
pub mod kernel;
pub mod message;
pub mod partition;
pub mod reference;
pub mod types;
pub mod worker;

pub use coordinator::{CompletionBarrier, Coordinator, CoordinatorState, CoordinatorStats, Progress};
pub use error::WavefrontError;
pub use message::{Chunk, Feedback, Message};
pub use partition::{Balanced, ChunkSizing, PartitionPolicy, Schedule, Span};
pub use types::{CellStore, WavefrontMatrix};
pub use worker::Worker;
