//! Work partitioning for one diagonal.
//!
//! A diagonal of length `L` is tiled into contiguous, non-empty row ranges.
//! How big those ranges are is a policy decision; the tiling itself is
//! always [`partition`] (fixed-size chunks, short tail) or
//! [`partition_balanced`] (one block per worker, sizes differing by at most
//! one row).

use serde::{Deserialize, Serialize};

use crate::error::WavefrontError;

/// A contiguous range of rows `[start, start + len)` within one diagonal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub len: usize,
}

impl Span {
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Tile `[0, diagonal_len)` with chunks of `chunk_size` rows; the final
/// chunk is clamped to what remains. Never yields an empty chunk.
pub fn partition(diagonal_len: usize, chunk_size: usize) -> Result<Vec<Span>, WavefrontError> {
    if chunk_size == 0 {
        return Err(WavefrontError::InvalidConfig(
            "chunk size must be at least 1".into(),
        ));
    }
    Ok((0..diagonal_len)
        .step_by(chunk_size)
        .map(|start| Span {
            start,
            len: chunk_size.min(diagonal_len - start),
        })
        .collect())
}

/// Split `[0, diagonal_len)` into at most `parts` contiguous blocks. The
/// first `diagonal_len % parts` blocks get one extra row; blocks that would
/// be empty are omitted.
pub fn partition_balanced(diagonal_len: usize, parts: usize) -> Result<Vec<Span>, WavefrontError> {
    if parts == 0 {
        return Err(WavefrontError::InvalidConfig(
            "cannot split a diagonal into zero parts".into(),
        ));
    }
    let base = diagonal_len / parts;
    let remainder = diagonal_len % parts;

    let mut spans = Vec::with_capacity(parts.min(diagonal_len));
    let mut start = 0;
    for i in 0..parts {
        let len = base + usize::from(i < remainder);
        if len == 0 {
            break;
        }
        spans.push(Span { start, len });
        start += len;
    }
    Ok(spans)
}

/// Decides how a diagonal is cut into chunks.
///
/// Any closure `Fn(diagonal_len, workers) -> chunk_size` is a policy, so
/// engines can be driven by ad-hoc sizing rules without a new type. A
/// closure policy is always static: every chunk of a diagonal is released
/// at once. Use [`Schedule::OnDemand`] or a type overriding
/// [`PartitionPolicy::streams`] for on-demand release.
pub trait PartitionPolicy: Send + Sync {
    /// Chunk size for a diagonal of length `diagonal_len` in an N×N matrix
    /// (`size` = N) shared between `workers` workers.
    fn chunk_size(&self, size: usize, diagonal_len: usize, workers: usize) -> usize;

    /// Chunks for one diagonal, in dispatch order.
    fn split(
        &self,
        size: usize,
        diagonal_len: usize,
        workers: usize,
    ) -> Result<Vec<Span>, WavefrontError> {
        partition(diagonal_len, self.chunk_size(size, diagonal_len, workers))
    }

    /// Whether chunks are released to idle workers one at a time rather
    /// than all at once.
    fn streams(&self) -> bool {
        false
    }

    /// Reject a policy that can never produce a valid chunk.
    fn validate(&self) -> Result<(), WavefrontError> {
        Ok(())
    }

    /// Short label for reports.
    fn name(&self) -> &'static str {
        "custom"
    }
}

impl<F> PartitionPolicy for F
where
    F: Fn(usize, usize) -> usize + Send + Sync,
{
    fn chunk_size(&self, _size: usize, diagonal_len: usize, workers: usize) -> usize {
        self(diagonal_len, workers)
    }
}

/// How the static schedule sizes its chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkSizing {
    /// `ceil((N - 1) / W)`, fixed for the whole run from the longest diagonal.
    FirstDiagonal,
    /// `ceil((N - k) / W)`, recomputed for every diagonal.
    PerDiagonal,
    /// A constant number of rows per chunk.
    Fixed(usize),
}

/// The scheduling strategies the engines support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Schedule {
    /// Bulk-synchronous: every chunk of the diagonal is handed out at once.
    Static(ChunkSizing),
    /// Chunks are streamed to workers as they become idle.
    OnDemand { chunk_size: usize },
}

impl Default for Schedule {
    fn default() -> Self {
        Schedule::Static(ChunkSizing::FirstDiagonal)
    }
}

impl Schedule {
    /// On-demand scheduling with single-row chunks.
    pub fn on_demand() -> Self {
        Schedule::OnDemand { chunk_size: 1 }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Schedule::Static(_) => "static",
            Schedule::OnDemand { .. } => "on-demand",
        }
    }
}

impl PartitionPolicy for Schedule {
    fn chunk_size(&self, size: usize, diagonal_len: usize, workers: usize) -> usize {
        let workers = workers.max(1);
        match *self {
            Schedule::Static(ChunkSizing::FirstDiagonal) => {
                size.saturating_sub(1).div_ceil(workers).max(1)
            }
            Schedule::Static(ChunkSizing::PerDiagonal) => diagonal_len.div_ceil(workers).max(1),
            Schedule::Static(ChunkSizing::Fixed(rows)) => rows,
            Schedule::OnDemand { chunk_size } => chunk_size,
        }
    }

    fn streams(&self) -> bool {
        matches!(self, Schedule::OnDemand { .. })
    }

    fn name(&self) -> &'static str {
        Schedule::name(self)
    }

    fn validate(&self) -> Result<(), WavefrontError> {
        match *self {
            Schedule::Static(ChunkSizing::Fixed(0)) | Schedule::OnDemand { chunk_size: 0 } => Err(
                WavefrontError::InvalidConfig("chunk size must be at least 1".into()),
            ),
            _ => Ok(()),
        }
    }
}

/// One block per worker, as even as possible. Used by the distributed
/// engine, where each rank receives exactly one chunk per diagonal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Balanced;

impl PartitionPolicy for Balanced {
    fn chunk_size(&self, _size: usize, diagonal_len: usize, workers: usize) -> usize {
        diagonal_len.div_ceil(workers.max(1)).max(1)
    }

    fn split(
        &self,
        _size: usize,
        diagonal_len: usize,
        workers: usize,
    ) -> Result<Vec<Span>, WavefrontError> {
        partition_balanced(diagonal_len, workers)
    }

    fn name(&self) -> &'static str {
        "block"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_tiles(spans: &[Span], diagonal_len: usize) {
        let mut next = 0;
        for span in spans {
            assert!(span.len > 0, "empty chunk {:?}", span);
            assert_eq!(span.start, next, "gap or overlap at {:?}", span);
            next = span.end();
        }
        assert_eq!(next, diagonal_len);
    }

    #[test]
    fn test_partition_clamps_tail() {
        let spans = partition(7, 3).unwrap();
        assert_eq!(
            spans,
            vec![
                Span { start: 0, len: 3 },
                Span { start: 3, len: 3 },
                Span { start: 6, len: 1 },
            ]
        );
    }

    #[test]
    fn test_partition_empty_diagonal() {
        assert!(partition(0, 4).unwrap().is_empty());
        assert!(partition_balanced(0, 4).unwrap().is_empty());
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        assert!(partition(5, 0).is_err());
        assert!(partition_balanced(5, 0).is_err());
        assert!(Schedule::OnDemand { chunk_size: 0 }.validate().is_err());
        assert!(Schedule::Static(ChunkSizing::Fixed(0)).validate().is_err());
        assert!(Schedule::default().validate().is_ok());
    }

    #[test]
    fn test_closure_policy_is_static() {
        let halves = |diagonal_len: usize, _workers: usize| diagonal_len.div_ceil(2).max(1);
        assert_eq!(halves.chunk_size(9, 5, 4), 3);
        assert!(!halves.streams());
        assert_eq!(halves.name(), "custom");
        assert_eq!(PartitionPolicy::name(&Schedule::on_demand()), "on-demand");
        assert_eq!(Balanced.name(), "block");
    }

    #[test]
    fn test_balanced_matches_block_distribution() {
        let spans = partition_balanced(10, 4).unwrap();
        let lens: Vec<usize> = spans.iter().map(|s| s.len).collect();
        assert_eq!(lens, vec![3, 3, 2, 2]);
        assert_tiles(&spans, 10);

        // Fewer rows than workers: the surplus workers get nothing.
        assert_eq!(partition_balanced(2, 4).unwrap().len(), 2);
    }

    #[test]
    fn test_schedule_chunk_sizes() {
        let first = Schedule::Static(ChunkSizing::FirstDiagonal);
        assert_eq!(first.chunk_size(9, 8, 3), 3);
        assert_eq!(first.chunk_size(9, 2, 3), 3);

        let per = Schedule::Static(ChunkSizing::PerDiagonal);
        assert_eq!(per.chunk_size(9, 8, 3), 3);
        assert_eq!(per.chunk_size(9, 2, 3), 1);

        assert_eq!(Schedule::on_demand().chunk_size(9, 8, 3), 1);
        assert!(Schedule::on_demand().streams());
        assert!(!first.streams());

        // A single-cell matrix still yields a usable size.
        assert_eq!(first.chunk_size(1, 0, 4), 1);
    }

    #[test]
    fn test_closure_policy() {
        let halves = |len: usize, _workers: usize| len.div_ceil(2).max(1);
        let spans = halves.split(10, 5, 8).unwrap();
        assert_eq!(spans.len(), 2);
        assert_tiles(&spans, 5);
    }

    proptest! {
        #[test]
        fn prop_partition_tiles_exactly(diagonal_len in 0usize..2_000, chunk_size in 1usize..300) {
            let spans = partition(diagonal_len, chunk_size).unwrap();
            assert_tiles(&spans, diagonal_len);
            prop_assert!(spans.iter().all(|s| s.len <= chunk_size));
        }

        #[test]
        fn prop_balanced_tiles_exactly(diagonal_len in 0usize..2_000, parts in 1usize..64) {
            let spans = partition_balanced(diagonal_len, parts).unwrap();
            assert_tiles(&spans, diagonal_len);
            prop_assert!(spans.len() <= parts);
            if let (Some(max), Some(min)) = (
                spans.iter().map(|s| s.len).max(),
                spans.iter().map(|s| s.len).min(),
            ) {
                prop_assert!(max - min <= 1);
            }
        }
    }
}
