//! Linear algebra utilities for covariance maintenance.
//!
//! Covariance matrices are symmetric positive semi-definite in exact
//! arithmetic, but repeated propagation and correction steps accumulate
//! floating-point asymmetry and can push eigenvalues slightly negative. This
//! module provides the helpers the filter uses to keep its covariance well
//! conditioned: explicit symmetrisation, an SPD linear solve with graceful
//! fallbacks (used for the Kalman gain), and an eigenvalue-clamping repair for
//! matrices that have drifted out of the PSD cone.

use nalgebra::linalg::SymmetricEigen;
use nalgebra::{DMatrix, Dyn};

/// Eigenvalues above this (negative) bound are treated as numerical noise.
pub const PSD_TOLERANCE: f64 = -1e-10;

/// Return the symmetric part of a square matrix, `(M + M^T) / 2`.
pub fn symmetrize(matrix: &DMatrix<f64>) -> DMatrix<f64> {
    debug_assert!(matrix.is_square());
    (matrix + matrix.transpose()) * 0.5
}

/// Solve `A X = B` for a symmetric positive (semi-)definite `A`.
///
/// Attempts a Cholesky factorisation first. If the matrix is only
/// semi-definite or slightly indefinite the solve falls back to LU, and as a
/// last resort to an SVD-based least-squares solution so the caller always
/// receives a finite result.
pub fn robust_spd_solve(a: &DMatrix<f64>, b: &DMatrix<f64>) -> DMatrix<f64> {
    debug_assert_eq!(a.nrows(), b.nrows());
    if let Some(cholesky) = a.clone().cholesky() {
        return cholesky.solve(b);
    }
    if let Some(solution) = a.clone().lu().solve(b) {
        return solution;
    }
    a.clone()
        .svd(true, true)
        .solve(b, 1e-12)
        .unwrap_or_else(|_| DMatrix::zeros(a.ncols(), b.ncols()))
}

/// Smallest eigenvalue of a symmetric matrix.
pub fn min_eigenvalue(matrix: &DMatrix<f64>) -> f64 {
    let eigen: SymmetricEigen<f64, Dyn> = matrix.clone().symmetric_eigen();
    eigen.eigenvalues.iter().cloned().fold(f64::INFINITY, f64::min)
}

/// Project a symmetric matrix back onto the PSD cone.
///
/// Eigenvalues below zero are clamped and the matrix is reassembled from its
/// eigenvectors. Returns the repaired matrix together with the smallest
/// eigenvalue found, so callers can count repairs that exceeded tolerance.
pub fn psd_repair(matrix: &DMatrix<f64>) -> (DMatrix<f64>, f64) {
    let eigen: SymmetricEigen<f64, Dyn> = matrix.clone().symmetric_eigen();
    let smallest = eigen.eigenvalues.iter().cloned().fold(f64::INFINITY, f64::min);
    if smallest >= 0.0 {
        return (matrix.clone(), smallest);
    }
    let clamped = eigen.eigenvalues.map(|v| v.max(0.0));
    let diag = DMatrix::from_diagonal(&clamped);
    let repaired = &eigen.eigenvectors * diag * eigen.eigenvectors.transpose();
    (symmetrize(&repaired), smallest)
}
