//! Sequential reference for the recurrence.
//!
//! Evaluates the same formula as [`crate::kernel::compute_entry`] with a
//! plain double loop, reading the second window from the upper triangle
//! (`M[m + k - j][m + k]`) instead of the mirror. Agreement with an engine
//! therefore checks the schedule and the mirror bookkeeping together.

use crate::types::WavefrontMatrix;

/// Compute every upper diagonal of `matrix` in place, leaving the lower
/// triangle zeroed. The main diagonal must already be seeded.
pub fn reference_wavefront(matrix: &mut WavefrontMatrix) {
    let n = matrix.size();
    let cells = matrix.as_mut_slice();

    for k in 1..n {
        for m in 0..n - k {
            let mk = m + k;
            let mut acc = 0.0;
            for j in 0..k {
                acc += cells[m * n + (m + j)] * cells[(mk - j) * n + mk];
            }
            cells[m * n + mk] = acc.cbrt();
        }
    }
    matrix.clear_scratch();
}

/// Corner value `M[0, N - 1]` of the reference-seeded N×N matrix.
pub fn reference_corner(size: usize) -> Option<f64> {
    let mut matrix = WavefrontMatrix::with_reference_seed(size).ok()?;
    reference_wavefront(&mut matrix);
    Some(matrix.corner())
}
