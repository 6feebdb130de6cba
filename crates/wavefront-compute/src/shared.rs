//! A shared, lock-free view of the matrix for concurrent workers.

use std::marker::PhantomData;

use wavefront_core::{CellStore, WavefrontMatrix};

/// `Copy` handle to the matrix buffer, one per worker thread.
///
/// Workers read and write the same buffer without copying and without
/// per-cell locks. That is sound only under the barrier discipline: chunks
/// in flight at the same time belong to one diagonal and cover disjoint
/// rows, so no two handles write the same cell, and every cell they read
/// lies on a diagonal that was finished (and synchronized through the
/// feedback channel) before the current diagonal was dispatched.
///
/// `chunks_mut`-style splitting cannot express this: a chunk writes only its
/// own rows but reads the finished cells of rows that belong to other chunks.
#[derive(Clone, Copy)]
pub(crate) struct SharedCells<'a> {
    ptr: *mut f64,
    size: usize,
    _matrix: PhantomData<&'a mut WavefrontMatrix>,
}

// SAFETY: the pointer comes from a matrix mutably borrowed for `'a`, so it
// outlives every copy, and the engines only create handles inside a
// `thread::scope` or a Rayon `install` that joins before the borrow ends.
// Cell access follows the type-level invariant. `Sync` is needed because
// Rayon shares the loop closure, and the handle in it, across threads.
unsafe impl Send for SharedCells<'_> {}
unsafe impl Sync for SharedCells<'_> {}

impl<'a> SharedCells<'a> {
    /// # Safety
    ///
    /// While any copy of the handle is alive, concurrent writers must touch
    /// disjoint cells, and no cell may be read while another thread can
    /// write it. The owned matrix must not be accessed through any other
    /// path until every copy is dropped.
    pub(crate) unsafe fn new(matrix: &'a mut WavefrontMatrix) -> Self {
        let size = matrix.size();
        Self {
            ptr: matrix.as_mut_slice().as_mut_ptr(),
            size,
            _matrix: PhantomData,
        }
    }

    fn offset(&self, row: usize, col: usize) -> usize {
        assert!(
            row < self.size && col < self.size,
            "cell ({}, {}) outside {}x{} matrix",
            row,
            col,
            self.size,
            self.size
        );
        row * self.size + col
    }
}

impl CellStore for SharedCells<'_> {
    fn size(&self) -> usize {
        self.size
    }

    fn read(&self, row: usize, col: usize) -> f64 {
        let offset = self.offset(row, col);
        // SAFETY: in bounds; no concurrent writer per the constructor contract.
        unsafe { self.ptr.add(offset).read() }
    }

    fn write(&mut self, row: usize, col: usize, value: f64) {
        let offset = self.offset(row, col);
        // SAFETY: in bounds; this handle is the only writer of the cell.
        unsafe { self.ptr.add(offset).write(value) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_and_writes_reach_matrix() {
        let mut matrix = WavefrontMatrix::with_reference_seed(3).unwrap();
        {
            let mut cells = unsafe { SharedCells::new(&mut matrix) };
            assert_eq!(cells.read(2, 2), 1.0);
            cells.write(0, 2, 9.0);
        }
        assert_eq!(matrix.get(0, 2), 9.0);
    }

    #[test]
    #[should_panic(expected = "outside 3x3")]
    fn test_out_of_range_panics() {
        let mut matrix = WavefrontMatrix::new(3).unwrap();
        let cells = unsafe { SharedCells::new(&mut matrix) };
        cells.read(3, 0);
    }
}
