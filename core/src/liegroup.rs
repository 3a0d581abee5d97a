//! Matrix Lie group operations for SO(3) and SE_{K+2}(3)
//!
//! This module contains the group-theoretic building blocks used by the
//! invariant filter: the skew-symmetric (hat) map, the SO(3) exponential and
//! its left Jacobian, the exponential of the extended special Euclidean group
//! SE_{K+2}(3), the group inverse, and the adjoint representation. The group
//! elements are stored as square `DMatrix<f64>` blocks: the rotation occupies
//! the leading 3x3 block and each additional quantity (velocity, position,
//! contact landmarks) is a trailing column above an identity row.
//!
//! All exponentials switch to a truncated Taylor series below a small-angle
//! threshold so the results stay finite and accurate near the identity.

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

/// Angle magnitude below which the series expansions are used.
const SMALL_ANGLE: f64 = 1e-10;

/// Convert a three-element vector to its skew-symmetric matrix.
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v[2], v[1], //
        v[2], 0.0, -v[0], //
        -v[1], v[0], 0.0,
    )
}

/// Exponential map of so(3): returns the rotation matrix exp([phi]_x).
///
/// Uses the Rodrigues formula, falling back to the second-order series for
/// very small rotation vectors.
pub fn so3_exp(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    if theta < SMALL_ANGLE {
        return Matrix3::identity() + skew(phi);
    }
    let axis = skew(&(phi / theta));
    Matrix3::identity() + axis * theta.sin() + axis * axis * (1.0 - theta.cos())
}

/// Left Jacobian of SO(3).
///
/// Maps tangent-space translations through the rotation induced by `phi` so
/// that `sek3_exp` integrates the full group exponential rather than a
/// first-order approximation.
pub fn so3_left_jacobian(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    if theta < SMALL_ANGLE {
        return Matrix3::identity() + 0.5 * skew(phi);
    }
    let axis = skew(&(phi / theta));
    Matrix3::identity()
        + axis * ((1.0 - theta.cos()) / theta)
        + axis * axis * ((theta - theta.sin()) / theta)
}

/// Exponential map of se_{K+2}(3).
///
/// The tangent vector is laid out as `[phi, v_1, ..., v_{K+2}]` where `phi`
/// is the rotation part and each `v_j` maps to one trailing column of the
/// group matrix. The length must be a multiple of three and at least nine.
pub fn sek3_exp(xi: &DVector<f64>) -> DMatrix<f64> {
    debug_assert!(xi.len() % 3 == 0 && xi.len() >= 9);
    let columns = xi.len() / 3 - 1;
    let dim = columns + 3;
    let phi = Vector3::new(xi[0], xi[1], xi[2]);
    let rot = so3_exp(&phi);
    let jl = so3_left_jacobian(&phi);

    let mut x = DMatrix::<f64>::identity(dim, dim);
    x.fixed_view_mut::<3, 3>(0, 0).copy_from(&rot);
    for j in 0..columns {
        let v = Vector3::new(xi[3 + 3 * j], xi[4 + 3 * j], xi[5 + 3 * j]);
        x.fixed_view_mut::<3, 1>(0, 3 + j).copy_from(&(jl * v));
    }
    x
}

/// Inverse of an SE_{K+2}(3) element.
///
/// Exploits the block structure: the inverse rotation is the transpose and
/// each trailing column `b_j` maps to `-R^T b_j`.
pub fn sek3_inverse(x: &DMatrix<f64>) -> DMatrix<f64> {
    debug_assert!(x.is_square() && x.nrows() >= 5);
    let dim = x.nrows();
    let rot_t = x.fixed_view::<3, 3>(0, 0).transpose();

    let mut inv = DMatrix::<f64>::identity(dim, dim);
    inv.fixed_view_mut::<3, 3>(0, 0).copy_from(&rot_t);
    for j in 3..dim {
        let b: Vector3<f64> = x.fixed_view::<3, 1>(0, j).into_owned();
        inv.fixed_view_mut::<3, 1>(0, j).copy_from(&(-(rot_t * b)));
    }
    inv
}

/// Adjoint representation of an SE_{K+2}(3) element.
///
/// Returns the `3(K+2)+3` square matrix that maps tangent vectors between the
/// left- and right-invariant parameterisations:
///
/// ```text
/// Adj_X = [ R                      ]
///         [ [v]_x R   R            ]
///         [ [p]_x R       R        ]
///         [ [d_i]_x R         R    ]
/// ```
pub fn sek3_adjoint(x: &DMatrix<f64>) -> DMatrix<f64> {
    debug_assert!(x.is_square() && x.nrows() >= 5);
    let dim = x.nrows();
    let columns = dim - 3;
    let n = 3 * (columns + 1);
    let rot: Matrix3<f64> = x.fixed_view::<3, 3>(0, 0).into_owned();

    let mut adj = DMatrix::<f64>::zeros(n, n);
    adj.fixed_view_mut::<3, 3>(0, 0).copy_from(&rot);
    for j in 0..columns {
        let b: Vector3<f64> = x.fixed_view::<3, 1>(0, 3 + j).into_owned();
        let row = 3 + 3 * j;
        adj.fixed_view_mut::<3, 3>(row, 0).copy_from(&(skew(&b) * rot));
        adj.fixed_view_mut::<3, 3>(row, row).copy_from(&rot);
    }
    adj
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn assert_matrix_eq(a: &DMatrix<f64>, b: &DMatrix<f64>, tol: f64) {
        assert_eq!(a.shape(), b.shape());
        for i in 0..a.nrows() {
            for j in 0..a.ncols() {
                assert_approx_eq!(a[(i, j)], b[(i, j)], tol);
            }
        }
    }

    #[test]
    fn skew_is_antisymmetric() {
        let s = skew(&Vector3::new(1.0, -2.0, 3.0));
        assert_eq!(s.transpose(), -s);
        assert_eq!(s * Vector3::new(1.0, -2.0, 3.0), Vector3::zeros());
    }

    #[test]
    fn so3_exp_zero_is_exact_identity() {
        let r = so3_exp(&Vector3::zeros());
        assert_eq!(r, Matrix3::identity());
    }

    #[test]
    fn so3_exp_quarter_turn_about_z() {
        let r = so3_exp(&Vector3::new(0.0, 0.0, FRAC_PI_2));
        let rotated = r * Vector3::new(1.0, 0.0, 0.0);
        assert_approx_eq!(rotated[0], 0.0, 1e-12);
        assert_approx_eq!(rotated[1], 1.0, 1e-12);
        assert_approx_eq!(rotated[2], 0.0, 1e-12);
    }

    #[test]
    fn so3_exp_is_orthonormal() {
        let r = so3_exp(&Vector3::new(0.3, -1.2, 2.1));
        let should_be_identity = r * r.transpose();
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_approx_eq!(should_be_identity[(i, j)], expected, 1e-12);
            }
        }
        assert_approx_eq!(r.determinant(), 1.0, 1e-12);
    }

    #[test]
    fn left_jacobian_matches_finite_difference() {
        // J_l(phi) * v should equal the translation column of exp([phi, v]).
        let phi = Vector3::new(0.2, -0.1, 0.4);
        let v = Vector3::new(1.0, 2.0, -0.5);
        let mut xi = DVector::zeros(9);
        xi.fixed_rows_mut::<3>(0).copy_from(&phi);
        xi.fixed_rows_mut::<3>(3).copy_from(&v);
        let x = sek3_exp(&xi);
        let direct = so3_left_jacobian(&phi) * v;
        for i in 0..3 {
            assert_approx_eq!(x[(i, 3)], direct[i], 1e-12);
        }
    }

    #[test]
    fn sek3_exp_zero_is_identity() {
        let x = sek3_exp(&DVector::zeros(9));
        assert_matrix_eq(&x, &DMatrix::identity(5, 5), 0.0);
    }

    #[test]
    fn sek3_exp_with_landmark_column() {
        let mut xi = DVector::zeros(12);
        xi[2] = PI; // half turn about z
        xi[9] = 2.0; // landmark column translation
        let x = sek3_exp(&xi);
        assert_eq!(x.nrows(), 6);
        assert_approx_eq!(x[(0, 0)], -1.0, 1e-12);
        assert_approx_eq!(x[(1, 1)], -1.0, 1e-12);
        assert_approx_eq!(x[(5, 5)], 1.0, 1e-12);
    }

    #[test]
    fn inverse_round_trip() {
        let mut xi = DVector::zeros(12);
        for (i, v) in [0.1, -0.2, 0.3, 1.0, -2.0, 0.5, 0.2, 0.1, -0.7, 3.0, 0.0, 1.0]
            .iter()
            .enumerate()
        {
            xi[i] = *v;
        }
        let x = sek3_exp(&xi);
        let product = &x * sek3_inverse(&x);
        assert_matrix_eq(&product, &DMatrix::identity(6, 6), 1e-12);
    }

    #[test]
    fn adjoint_intertwines_exponentials() {
        // X exp(xi) X^-1 = exp(Adj_X xi)
        let mut base = DVector::zeros(9);
        base[0] = 0.4;
        base[4] = 1.0;
        base[8] = -2.0;
        let x = sek3_exp(&base);

        let mut xi = DVector::zeros(9);
        xi[1] = 0.05;
        xi[3] = 0.2;
        xi[6] = -0.1;

        let lhs = &x * sek3_exp(&xi) * sek3_inverse(&x);
        let rhs = sek3_exp(&(sek3_adjoint(&x) * &xi));
        assert_matrix_eq(&lhs, &rhs, 1e-8);
    }
}
