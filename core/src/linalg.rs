//! Dense-matrix helpers for the ensemble update.
//!
//! Public API:
//!     pub fn ensemble_mean(matrix: &EnsembleMatrix) -> ChannelVector
//!     pub fn deviation(matrix: &EnsembleMatrix, mean: &ChannelVector) -> EnsembleMatrix
//!     pub fn sample_covariance(deviation: &EnsembleMatrix) -> ChannelMatrix
//!     pub fn cross_covariance(a: &EnsembleMatrix, b: &EnsembleMatrix) -> ChannelMatrix
//!     pub fn symmetrize(m: &ChannelMatrix) -> ChannelMatrix
//!     pub fn lu_inverse(m: &ChannelMatrix) -> Option<ChannelMatrix>
//!     pub fn is_positive_semi_definite(m: &ChannelMatrix, tolerance: f64) -> bool
//!
//! All ensemble statistics use the unbiased `(E - 1)` denominator.

use nalgebra::linalg::SymmetricEigen;

use crate::{ChannelMatrix, ChannelVector, ENSEMBLE_SIZE, EnsembleMatrix, NUM_CHANNELS};

/// Arithmetic mean of the ensemble columns, per channel.
///
/// The mean is accumulated as offsets from the first member, so an ensemble whose members all
/// hold the same vector `v` yields exactly `v` (no rounding from summing then dividing).
///
/// # Arguments
/// * `matrix` - `NUM_CHANNELS x ENSEMBLE_SIZE` matrix, one column per member
///
/// # Returns
/// The per-channel mean as a column vector.
pub fn ensemble_mean(matrix: &EnsembleMatrix) -> ChannelVector {
    let reference = matrix.column(0).into_owned();
    let mut offset = ChannelVector::zeros();
    for j in 1..ENSEMBLE_SIZE {
        offset += matrix.column(j) - &reference;
    }
    reference + offset / ENSEMBLE_SIZE as f64
}
/// Broadcast subtraction of `mean` from every column of `matrix`.
pub fn deviation(matrix: &EnsembleMatrix, mean: &ChannelVector) -> EnsembleMatrix {
    let mut out = *matrix;
    for j in 0..ENSEMBLE_SIZE {
        for i in 0..NUM_CHANNELS {
            out[(i, j)] -= mean[i];
        }
    }
    out
}
/// Sample covariance `(1/(E-1)) A Aᵀ` of a deviation matrix.
pub fn sample_covariance(deviation: &EnsembleMatrix) -> ChannelMatrix {
    cross_covariance(deviation, deviation)
}
/// Sample cross covariance `(1/(E-1)) A Bᵀ` of two deviation matrices.
pub fn cross_covariance(a: &EnsembleMatrix, b: &EnsembleMatrix) -> ChannelMatrix {
    a * b.transpose() / (ENSEMBLE_SIZE - 1) as f64
}
/// Symmetrize a matrix: P ← 0.5 (P + Pᵀ)
///
/// Removes the round-off asymmetry that accumulates in covariance products.
#[inline]
pub fn symmetrize(m: &ChannelMatrix) -> ChannelMatrix {
    0.5 * (m + m.transpose())
}
/// Inverse by LU decomposition with partial pivoting.
///
/// # Arguments
/// * `m` - the square matrix to invert
///
/// # Returns
/// `None` if `m` holds a non-finite entry, is singular, or inverts to a non-finite matrix.
pub fn lu_inverse(m: &ChannelMatrix) -> Option<ChannelMatrix> {
    if m.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let lu = m.lu();
    if !lu.is_invertible() {
        return None;
    }
    lu.try_inverse()
        .filter(|inv| inv.iter().all(|v| v.is_finite()))
}
/// True if every eigenvalue of the symmetric part of `m` is at least `-tolerance`.
pub fn is_positive_semi_definite(m: &ChannelMatrix, tolerance: f64) -> bool {
    let eigen = SymmetricEigen::new(symmetrize(m));
    eigen.eigenvalues.iter().all(|&l| l >= -tolerance)
}

/* =============================== Tests ==================================== */
