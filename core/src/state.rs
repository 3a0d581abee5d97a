//! Lie-group robot state container.
//!
//! The state is an element X of the extended special Euclidean group
//! SE_{K+2}(3) together with an IMU bias vector theta and a block covariance
//! P. X is a (5+K)x(5+K) matrix: rotation R in the leading 3x3 block, then
//! one trailing column each for world-frame velocity, world-frame position,
//! and K contact-foot landmarks, above an identity sub-block.
//!
//! The covariance is ordered to parallel the tangent space of X:
//! `[rotation, velocity, position, d_1 .. d_K, gyro bias, accel bias]`, three
//! rows per block, with the six bias rows present only when bias estimation
//! is enabled.
//!
//! Contact landmarks are appended with [`RobotState::augment`] when a foot
//! touches down and removed with [`RobotState::unaugment`] when it lifts off;
//! both keep X and P dimensionally consistent and P symmetric PSD.

use std::fmt::{self, Display};

use nalgebra::{DMatrix, Matrix3, Rotation3, Vector3, Vector6};

use crate::liegroup::sek3_inverse;
use crate::linalg::symmetrize;

/// Full filter state: group element, bias vector, and covariance.
#[derive(Clone, Debug)]
pub struct RobotState {
    time: f64,
    x: DMatrix<f64>,
    theta: Vector6<f64>,
    p: DMatrix<f64>,
    estimate_bias: bool,
}

impl Default for RobotState {
    fn default() -> Self {
        Self::new()
    }
}

impl RobotState {
    /// Identity state with bias estimation enabled.
    pub fn new() -> Self {
        Self::with_bias_estimation(true)
    }

    /// Identity state; `estimate_bias` controls whether the covariance
    /// carries the six bias rows.
    pub fn with_bias_estimation(estimate_bias: bool) -> Self {
        let dim_theta = if estimate_bias { 6 } else { 0 };
        RobotState {
            time: 0.0,
            x: DMatrix::identity(5, 5),
            theta: Vector6::zeros(),
            p: DMatrix::identity(9 + dim_theta, 9 + dim_theta),
            estimate_bias,
        }
    }

    // --- Dimensions -------------------------------------------------------

    /// Side length of the group matrix X.
    pub fn dim_x(&self) -> usize {
        self.x.nrows()
    }

    /// Number of bias states carried in the covariance (0 or 6).
    pub fn dim_theta(&self) -> usize {
        if self.estimate_bias {
            6
        } else {
            0
        }
    }

    /// Side length of the covariance P.
    pub fn dim_p(&self) -> usize {
        3 * (self.dim_x() - 2) + self.dim_theta()
    }

    /// Number of augmented contact landmarks.
    pub fn landmark_count(&self) -> usize {
        self.dim_x() - 5
    }

    pub fn estimates_bias(&self) -> bool {
        self.estimate_bias
    }

    /// Covariance row of the landmark stored in group column `column`.
    pub fn landmark_cov_index(&self, column: usize) -> usize {
        debug_assert!(column >= 5 && column < self.dim_x());
        9 + 3 * (column - 5)
    }

    // --- Group element accessors -----------------------------------------

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn set_time(&mut self, time: f64) {
        self.time = time;
    }

    /// The full group matrix X.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.x
    }

    /// X^-1, computed from the block structure.
    pub fn inverse_matrix(&self) -> DMatrix<f64> {
        sek3_inverse(&self.x)
    }

    pub fn rotation(&self) -> Matrix3<f64> {
        self.x.fixed_view::<3, 3>(0, 0).into_owned()
    }

    pub fn set_rotation(&mut self, rotation: &Matrix3<f64>) {
        self.x.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation);
    }

    pub fn velocity(&self) -> Vector3<f64> {
        self.x.fixed_view::<3, 1>(0, 3).into_owned()
    }

    pub fn set_velocity(&mut self, velocity: &Vector3<f64>) {
        self.x.fixed_view_mut::<3, 1>(0, 3).copy_from(velocity);
    }

    pub fn position(&self) -> Vector3<f64> {
        self.x.fixed_view::<3, 1>(0, 4).into_owned()
    }

    pub fn set_position(&mut self, position: &Vector3<f64>) {
        self.x.fixed_view_mut::<3, 1>(0, 4).copy_from(position);
    }

    /// World-frame position of the landmark in group column `column`.
    pub fn landmark(&self, column: usize) -> Vector3<f64> {
        debug_assert!(column >= 5 && column < self.dim_x());
        self.x.fixed_view::<3, 1>(0, column).into_owned()
    }

    pub fn set_landmark(&mut self, column: usize, value: &Vector3<f64>) {
        debug_assert!(column >= 5 && column < self.dim_x());
        self.x.fixed_view_mut::<3, 1>(0, column).copy_from(value);
    }

    /// Replace the whole group matrix. The new matrix must keep the current
    /// dimension; use [`RobotState::augment`]/[`RobotState::unaugment`] to
    /// change it.
    pub fn set_matrix(&mut self, x: DMatrix<f64>) {
        assert_eq!(x.nrows(), self.dim_x());
        assert_eq!(x.ncols(), self.dim_x());
        self.x = x;
    }

    // --- Bias accessors ---------------------------------------------------

    pub fn theta(&self) -> Vector6<f64> {
        self.theta
    }

    pub fn set_theta(&mut self, theta: Vector6<f64>) {
        self.theta = theta;
    }

    pub fn gyro_bias(&self) -> Vector3<f64> {
        self.theta.fixed_rows::<3>(0).into_owned()
    }

    pub fn set_gyro_bias(&mut self, bias: &Vector3<f64>) {
        self.theta.fixed_rows_mut::<3>(0).copy_from(bias);
    }

    pub fn accel_bias(&self) -> Vector3<f64> {
        self.theta.fixed_rows::<3>(3).into_owned()
    }

    pub fn set_accel_bias(&mut self, bias: &Vector3<f64>) {
        self.theta.fixed_rows_mut::<3>(3).copy_from(bias);
    }

    // --- Covariance accessors --------------------------------------------

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.p
    }

    pub fn set_covariance(&mut self, p: DMatrix<f64>) {
        assert_eq!(p.nrows(), self.dim_p());
        assert_eq!(p.ncols(), self.dim_p());
        self.p = p;
    }

    fn set_cov_block(&mut self, index: usize, block: &Matrix3<f64>) {
        self.p.fixed_view_mut::<3, 3>(index, index).copy_from(block);
    }

    pub fn set_rotation_covariance(&mut self, block: &Matrix3<f64>) {
        self.set_cov_block(0, block);
    }

    pub fn set_velocity_covariance(&mut self, block: &Matrix3<f64>) {
        self.set_cov_block(3, block);
    }

    pub fn set_position_covariance(&mut self, block: &Matrix3<f64>) {
        self.set_cov_block(6, block);
    }

    pub fn set_gyro_bias_covariance(&mut self, block: &Matrix3<f64>) {
        if self.estimate_bias {
            let index = self.dim_p() - 6;
            self.set_cov_block(index, block);
        }
    }

    pub fn set_accel_bias_covariance(&mut self, block: &Matrix3<f64>) {
        if self.estimate_bias {
            let index = self.dim_p() - 3;
            self.set_cov_block(index, block);
        }
    }

    // --- Structure maintenance -------------------------------------------

    /// Append a contact landmark at world position `d` with covariance block
    /// `cov`. Returns the new group column index.
    pub fn augment(&mut self, d: &Vector3<f64>, cov: &Matrix3<f64>) -> usize {
        let column = self.dim_x();
        let x = std::mem::replace(&mut self.x, DMatrix::zeros(0, 0));
        let mut x = x.insert_column(column, 0.0).insert_row(column, 0.0);
        x[(column, column)] = 1.0;
        x.fixed_view_mut::<3, 1>(0, column).copy_from(d);
        self.x = x;

        // New covariance rows sit just before the bias block.
        let index = 9 + 3 * (column - 5);
        let p = std::mem::replace(&mut self.p, DMatrix::zeros(0, 0));
        let mut p = p.insert_columns(index, 3, 0.0).insert_rows(index, 3, 0.0);
        p.fixed_view_mut::<3, 3>(index, index).copy_from(cov);
        self.p = p;
        column
    }

    /// Remove the landmark in group column `column`, marginalising its
    /// covariance rows. Columns above it shift down by one. Returns `false`
    /// if the column does not name a landmark.
    pub fn unaugment(&mut self, column: usize) -> bool {
        if column < 5 || column >= self.dim_x() {
            return false;
        }
        let x = std::mem::replace(&mut self.x, DMatrix::zeros(0, 0));
        self.x = x.remove_column(column).remove_row(column);

        let index = 9 + 3 * (column - 5);
        let p = std::mem::replace(&mut self.p, DMatrix::zeros(0, 0));
        self.p = p.remove_columns(index, 3).remove_rows(index, 3);
        true
    }

    // --- Numerical hygiene ------------------------------------------------

    /// Re-orthonormalise R to the nearest rotation matrix.
    pub fn normalize_rotation(&mut self) {
        let rotation = Rotation3::from_matrix(&self.rotation());
        self.set_rotation(rotation.matrix());
    }

    /// Re-orthonormalise R only when it has measurably drifted. Leaving an
    /// already-orthonormal R untouched keeps noiseless propagation
    /// bit-reproducible.
    pub fn normalize_rotation_if_drifted(&mut self) {
        let r = self.rotation();
        let drift = (r * r.transpose() - Matrix3::identity()).norm();
        if drift > 1e-12 {
            self.normalize_rotation();
        }
    }

    /// Replace P by its symmetric part.
    pub fn symmetrize_covariance(&mut self) {
        self.p = symmetrize(&self.p);
    }
}

impl Display for RobotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.position();
        let v = self.velocity();
        write!(
            f,
            "RobotState(t: {:.6}, p: [{:.3}, {:.3}, {:.3}], v: [{:.3}, {:.3}, {:.3}], landmarks: {})",
            self.time,
            p[0],
            p[1],
            p[2],
            v[0],
            v[1],
            v[2],
            self.landmark_count(),
        )
    }
}
