//! The per-entry compute kernel.
//!
//! Entry `(m, m + k)` on diagonal `k` is the real cube root of the inner
//! product of two windows of length `k`:
//!
//! $$ M_{m,m+k} = \sqrt[3]{\sum_{j=0}^{k-1} M_{m,m+j} \, M_{m+k-j,m+k}} $$
//!
//! The second window is read through the lower-triangle mirror
//! `M[m + k][m + k - j]`, which is contiguous in memory. Every cell read lies
//! on a diagonal strictly below `k`; the kernel never looks at diagonal `k`
//! or later.

use crate::error::WavefrontError;
use crate::types::CellStore;

/// Scratch space for the two windows of one kernel evaluation.
///
/// Owned by a worker and resized per diagonal, so the allocation is reused
/// across every entry the worker computes.
#[derive(Debug, Default, Clone)]
pub struct Window {
    row: Vec<f64>,
    column: Vec<f64>,
}

impl Window {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resize both windows to `k` entries.
    pub fn resize(&mut self, k: usize) {
        self.row.resize(k, 0.0);
        self.column.resize(k, 0.0);
    }

    pub fn len(&self) -> usize {
        self.row.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row.is_empty()
    }

    fn load<S: CellStore + ?Sized>(&mut self, store: &S, k: usize, m: usize) {
        self.resize(k);
        let mk = m + k;
        for j in 0..k {
            self.row[j] = store.read(m, m + j);
            self.column[j] = store.read(mk, mk - j);
        }
    }

    fn dot(&self) -> f64 {
        self.row
            .iter()
            .zip(self.column.iter())
            .map(|(a, b)| a * b)
            .sum()
    }
}

/// Compute entry `(m, m + k)`, store it in both `M[m, m + k]` and the
/// scratch mirror `M[m + k, m]`, and return it.
///
/// Fails with [`WavefrontError::KernelBounds`] when `k == 0` or `m + k >= N`.
pub fn compute_entry<S: CellStore + ?Sized>(
    store: &mut S,
    k: usize,
    m: usize,
    window: &mut Window,
) -> Result<f64, WavefrontError> {
    let n = store.size();
    if k == 0 || m.checked_add(k).map_or(true, |mk| mk >= n) {
        return Err(WavefrontError::KernelBounds {
            diagonal: k,
            row: m,
            size: n,
        });
    }

    window.load(store, k, m);
    // f64::cbrt is the real cube root, so negative products keep their sign.
    let value = window.dot().cbrt();

    store.write(m + k, m, value);
    store.write(m, m + k, value);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WavefrontMatrix;
    use approx::assert_relative_eq;

    #[test]
    fn test_first_diagonal_is_cbrt_of_neighbour_product() {
        let mut m = WavefrontMatrix::with_reference_seed(4).unwrap();
        let mut window = Window::new();
        let value = compute_entry(&mut m, 1, 0, &mut window).unwrap();
        assert_relative_eq!(value, (0.25_f64 * 0.5).cbrt(), max_relative = 1e-12);
        assert_eq!(m.get(0, 1), value);
        assert_eq!(m.get(1, 0), value);
    }

    #[test]
    fn test_second_diagonal_uses_mirror() {
        let mut m = WavefrontMatrix::with_reference_seed(3).unwrap();
        let mut window = Window::new();
        let a = compute_entry(&mut m, 1, 0, &mut window).unwrap();
        let b = compute_entry(&mut m, 1, 1, &mut window).unwrap();
        let c = compute_entry(&mut m, 2, 0, &mut window).unwrap();

        // M[0,0]*M[2,2] + M[0,1]*M[1,2]
        let expected = (m.get(0, 0) * m.get(2, 2) + a * b).cbrt();
        assert_relative_eq!(c, expected, max_relative = 1e-12);
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_negative_product_keeps_sign() {
        let mut m = WavefrontMatrix::new(2).unwrap();
        m.seed_diagonal(&[-8.0, 1.0]).unwrap();
        let value = compute_entry(&mut m, 1, 0, &mut Window::new()).unwrap();
        assert_relative_eq!(value, -2.0, max_relative = 1e-12);
    }

    #[test]
    fn test_out_of_bounds_is_rejected() {
        let mut m = WavefrontMatrix::with_reference_seed(4).unwrap();
        let mut window = Window::new();
        assert_eq!(
            compute_entry(&mut m, 1, 3, &mut window),
            Err(WavefrontError::KernelBounds { diagonal: 1, row: 3, size: 4 })
        );
        assert!(compute_entry(&mut m, 0, 0, &mut window).is_err());
        assert!(compute_entry(&mut m, 4, 0, &mut window).is_err());
        assert!(compute_entry(&mut m, 1, usize::MAX, &mut window).is_err());
    }
}
