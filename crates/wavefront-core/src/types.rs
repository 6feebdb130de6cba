//! Core types shared across the wavefront engines.
//!
//! The matrix is a single contiguous N×N buffer of `f64`, row-major. Only
//! the main diagonal and the upper triangle are meaningful once a run has
//! finished; the lower triangle mirrors the upper triangle while diagonals
//! are being produced and is zeroed by [`WavefrontMatrix::clear_scratch`].

use ndarray::Array2;

use crate::error::WavefrontError;

/// Cell-level access to an N×N matrix buffer.
///
/// The kernel and the worker are written against this trait so that the
/// same code runs over an owned matrix, a shared handle used by concurrent
/// workers, or an instrumented store in tests.
pub trait CellStore {
    /// Matrix dimension N.
    fn size(&self) -> usize;

    /// Read cell (row, col).
    fn read(&self, row: usize, col: usize) -> f64;

    /// Write cell (row, col).
    fn write(&mut self, row: usize, col: usize, value: f64);
}

/// The N×N matrix the wavefront recurrence is evaluated over.
#[derive(Debug, Clone, PartialEq)]
pub struct WavefrontMatrix {
    cells: Array2<f64>,
}

impl WavefrontMatrix {
    /// Allocate a zeroed N×N matrix.
    pub fn new(size: usize) -> Result<Self, WavefrontError> {
        if size == 0 {
            return Err(WavefrontError::InvalidConfig(
                "matrix size N must be at least 1".into(),
            ));
        }
        Ok(Self {
            cells: Array2::zeros((size, size)),
        })
    }

    /// Allocate a matrix whose main diagonal holds `(i + 1) / N`.
    pub fn with_reference_seed(size: usize) -> Result<Self, WavefrontError> {
        let mut matrix = Self::new(size)?;
        let seed: Vec<f64> = (0..size)
            .map(|i| (i + 1) as f64 / size as f64)
            .collect();
        matrix.seed_diagonal(&seed)?;
        Ok(matrix)
    }

    /// Overwrite the main diagonal.
    pub fn seed_diagonal(&mut self, values: &[f64]) -> Result<(), WavefrontError> {
        if values.len() != self.size() {
            return Err(WavefrontError::InvalidConfig(format!(
                "seed has {} values, matrix size is {}",
                values.len(),
                self.size()
            )));
        }
        for (i, &value) in values.iter().enumerate() {
            self.cells[[i, i]] = value;
        }
        Ok(())
    }

    /// Matrix dimension N.
    pub fn size(&self) -> usize {
        self.cells.nrows()
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.cells[[row, col]]
    }

    /// Values of the main diagonal, top-left to bottom-right.
    pub fn main_diagonal(&self) -> Vec<f64> {
        self.cells.diag().to_vec()
    }

    /// Values `M[m, m + k]` for `m` in `[0, N - k)`. Empty when `k >= N`.
    pub fn upper_diagonal(&self, k: usize) -> Vec<f64> {
        let n = self.size();
        if k >= n {
            return Vec::new();
        }
        (0..n - k).map(|m| self.cells[[m, m + k]]).collect()
    }

    /// Install a complete upper diagonal `k >= 1`, writing both the final
    /// cell and its lower-triangle mirror.
    pub fn install_diagonal(&mut self, k: usize, values: &[f64]) -> Result<(), WavefrontError> {
        let n = self.size();
        if k == 0 || k >= n || values.len() != n - k {
            return Err(WavefrontError::ChunkContract {
                diagonal: k,
                start: 0,
                len: values.len(),
                size: n,
            });
        }
        for (m, &value) in values.iter().enumerate() {
            self.cells[[m + k, m]] = value;
            self.cells[[m, m + k]] = value;
        }
        Ok(())
    }

    /// Zero the lower triangle. Must run before the result is read.
    pub fn clear_scratch(&mut self) {
        let n = self.size();
        for row in 1..n {
            for col in 0..row {
                self.cells[[row, col]] = 0.0;
            }
        }
    }

    /// The top-right entry `M[0, N - 1]`, the last value the recurrence produces.
    pub fn corner(&self) -> f64 {
        self.cells[[0, self.size() - 1]]
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.cells
    }

    pub fn into_array(self) -> Array2<f64> {
        self.cells
    }

    /// Row-major view of the whole buffer.
    pub fn as_slice(&self) -> &[f64] {
        self.cells
            .as_slice()
            .expect("matrix is always allocated in standard layout")
    }

    /// Mutable row-major view of the whole buffer.
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        self.cells
            .as_slice_mut()
            .expect("matrix is always allocated in standard layout")
    }

    /// Replace every cell from a row-major buffer of length N².
    pub fn copy_from_slice(&mut self, values: &[f64]) -> Result<(), WavefrontError> {
        let n = self.size();
        if values.len() != n * n {
            return Err(WavefrontError::InvalidConfig(format!(
                "buffer has {} values, expected {}",
                values.len(),
                n * n
            )));
        }
        self.as_mut_slice().copy_from_slice(values);
        Ok(())
    }
}

impl CellStore for WavefrontMatrix {
    fn size(&self) -> usize {
        self.cells.nrows()
    }

    fn read(&self, row: usize, col: usize) -> f64 {
        self.cells[[row, col]]
    }

    fn write(&mut self, row: usize, col: usize, value: f64) {
        self.cells[[row, col]] = value;
    }
}
