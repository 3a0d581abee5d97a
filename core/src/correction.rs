//! Correction framework: invariant measurement updates.
//!
//! Corrections are a tagged sum over the supported measurement models —
//! body-frame velocity, absolute position, and legged kinematics — dispatched
//! by a `match` on the variant. Each correction consumes at most one
//! measurement per cycle: it peeks its queue, returns `false` when the queue
//! is empty or the head is stamped after the current state time, and
//! otherwise pops the head into a local before doing any linear algebra (the
//! queue mutex is never held across filter math).
//!
//! All variants form their innovation `z`, Jacobian `H`, and noise `N` in
//! world-frame error coordinates and share one update routine:
//!
//! ```text
//! S  = H P H^T + N
//! K  = P H^T S^-1
//! xi = K z
//! X  <- retraction per error type, theta <- theta + xi_bias
//! P  <- (I - K H) P (I - K H)^T + K N K^T      (Joseph form)
//! ```
//!
//! When the filter runs the body-frame (`RightInvariant`) error type, the
//! covariance is conjugated through the group adjoint before and after the
//! update and the tangent increment is mapped into the body frame, so the
//! retraction is literally `X * exp(xi)`.

use log::debug;
use nalgebra::{DMatrix, DVector, Matrix3, Vector6};

use crate::augmentation::AugmentationManager;
use crate::config::{ErrorType, KinematicsCorrectionConfig, PositionCorrectionConfig};
use crate::error::{EstimatorError, EventCounters};
use crate::kinematics::{ForwardKinematics, LegJacobian};
use crate::liegroup::{sek3_adjoint, sek3_exp};
use crate::linalg::{robust_spd_solve, symmetrize};
use crate::measurements::{KinematicsMeasurement, PositionMeasurement, VelocityMeasurement};
use crate::queue::SensorQueue;
use crate::state::RobotState;

/// Which measurement model a correction implements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CorrectionKind {
    Velocity,
    Position,
    Kinematics,
}

/// Registered correction variants, applied in registration order each cycle.
pub enum Correction {
    Velocity(VelocityCorrection),
    Position(PositionCorrection),
    Kinematics(KinematicsCorrection),
}

impl Correction {
    pub fn kind(&self) -> CorrectionKind {
        match self {
            Correction::Velocity(_) => CorrectionKind::Velocity,
            Correction::Position(_) => CorrectionKind::Position,
            Correction::Kinematics(_) => CorrectionKind::Kinematics,
        }
    }
}

/// `blkdiag(Adj_X, I)` — maps body-frame tangent coordinates to world.
fn world_from_body_adjoint(state: &RobotState) -> DMatrix<f64> {
    let dim_p = state.dim_p();
    let group_dim = dim_p - state.dim_theta();
    let mut adjoint = DMatrix::identity(dim_p, dim_p);
    adjoint
        .view_mut((0, 0), (group_dim, group_dim))
        .copy_from(&sek3_adjoint(state.matrix()));
    adjoint
}

/// `blkdiag(Adj_{X^-1}, I)` — maps world-frame tangent coordinates to body.
fn body_from_world_adjoint(state: &RobotState) -> DMatrix<f64> {
    let dim_p = state.dim_p();
    let group_dim = dim_p - state.dim_theta();
    let mut adjoint = DMatrix::identity(dim_p, dim_p);
    adjoint
        .view_mut((0, 0), (group_dim, group_dim))
        .copy_from(&sek3_adjoint(&state.inverse_matrix()));
    adjoint
}

/// Apply one invariant Kalman update given a world-frame `(z, H, N)` triple.
pub(crate) fn apply_invariant_update(
    state: &mut RobotState,
    error_type: ErrorType,
    z: &DVector<f64>,
    h: &DMatrix<f64>,
    n: &DMatrix<f64>,
) {
    let dim_p = state.dim_p();
    let dim_theta = state.dim_theta();
    let group_dim = dim_p - dim_theta;
    debug_assert_eq!(h.ncols(), dim_p);
    debug_assert_eq!(h.nrows(), z.len());

    // Work in world-frame error coordinates throughout; a body-frame filter
    // conjugates its covariance in and back out through the adjoint.
    let mut p = state.covariance().clone();
    if error_type == ErrorType::RightInvariant {
        let to_world = world_from_body_adjoint(state);
        p = &to_world * p * to_world.transpose();
    }

    let innovation_cov = symmetrize(&(h * &p * h.transpose() + n));
    let gain_t = robust_spd_solve(&innovation_cov, &(h * &p));
    let gain = gain_t.transpose();
    let delta = &gain * z;

    let xi = delta.rows(0, group_dim).into_owned();
    match error_type {
        ErrorType::LeftInvariant => {
            let updated = sek3_exp(&xi) * state.matrix();
            state.set_matrix(updated);
        }
        ErrorType::RightInvariant => {
            let to_body = sek3_adjoint(&state.inverse_matrix());
            let xi_body = to_body * xi;
            let updated = state.matrix() * sek3_exp(&xi_body);
            state.set_matrix(updated);
        }
    }
    if dim_theta > 0 {
        let bias_delta = delta.rows(group_dim, dim_theta);
        let mut theta = state.theta();
        theta += Vector6::from_iterator(bias_delta.iter().cloned());
        state.set_theta(theta);
    }

    let identity = DMatrix::<f64>::identity(dim_p, dim_p);
    let ikh = &identity - &gain * h;
    let mut updated_p = &ikh * &p * ikh.transpose() + &gain * n * gain.transpose();
    if error_type == ErrorType::RightInvariant {
        let to_body = body_from_world_adjoint(state);
        updated_p = &to_body * updated_p * to_body.transpose();
    }
    state.set_covariance(symmetrize(&updated_p));
    state.normalize_rotation_if_drifted();
}

fn matrix3_to_dmatrix(m: &Matrix3<f64>) -> DMatrix<f64> {
    DMatrix::from_column_slice(3, 3, m.as_slice())
}

/// Body-frame velocity update.
pub struct VelocityCorrection {
    error_type: ErrorType,
    covariance: Matrix3<f64>,
    queue_index: usize,
}

impl VelocityCorrection {
    pub fn new(error_type: ErrorType, covariance: Matrix3<f64>, queue_index: usize) -> Self {
        VelocityCorrection {
            error_type,
            covariance,
            queue_index,
        }
    }

    pub fn queue_index(&self) -> usize {
        self.queue_index
    }

    /// Fuse at most one velocity measurement. Returns `true` when the state
    /// was updated.
    pub fn correct(
        &mut self,
        state: &mut RobotState,
        queue: &SensorQueue<VelocityMeasurement>,
    ) -> bool {
        let measurement = match queue.front() {
            Some(m) if m.time <= state.time() => {
                let _ = queue.pop();
                m
            }
            _ => return false,
        };

        let rotation = state.rotation();
        let innovation = rotation * measurement.velocity - state.velocity();
        let dim_p = state.dim_p();
        let mut h = DMatrix::<f64>::zeros(3, dim_p);
        h.fixed_view_mut::<3, 3>(0, 3).copy_from(&Matrix3::identity());
        let covariance = if measurement.covariance == Matrix3::zeros() {
            self.covariance
        } else {
            measurement.covariance
        };
        let noise = rotation * covariance * rotation.transpose();

        let z = DVector::from_column_slice(innovation.as_slice());
        apply_invariant_update(state, self.error_type, &z, &h, &matrix3_to_dmatrix(&noise));
        debug!("velocity correction applied at t = {:.6}", measurement.time);
        true
    }
}

/// Absolute world-frame position update.
pub struct PositionCorrection {
    error_type: ErrorType,
    config: PositionCorrectionConfig,
    queue_index: usize,
}

impl PositionCorrection {
    pub fn new(error_type: ErrorType, config: PositionCorrectionConfig, queue_index: usize) -> Self {
        PositionCorrection {
            error_type,
            config,
            queue_index,
        }
    }

    pub fn queue_index(&self) -> usize {
        self.queue_index
    }

    /// Fuse at most one position fix. Returns `true` when the state was
    /// updated.
    pub fn correct(
        &mut self,
        state: &mut RobotState,
        queue: &SensorQueue<PositionMeasurement>,
    ) -> bool {
        let measurement = match queue.front() {
            Some(m) if m.time <= state.time() => {
                let _ = queue.pop();
                m
            }
            _ => return false,
        };

        let innovation = measurement.position - state.position();
        let dim_p = state.dim_p();
        let mut h = DMatrix::<f64>::zeros(3, dim_p);
        h.fixed_view_mut::<3, 3>(0, 6).copy_from(&Matrix3::identity());
        let noise = if measurement.covariance == Matrix3::zeros() {
            self.config.covariance()
        } else {
            measurement.covariance
        };

        let z = DVector::from_column_slice(innovation.as_slice());
        apply_invariant_update(state, self.error_type, &z, &h, &matrix3_to_dmatrix(&noise));
        debug!("position correction applied at t = {:.6}", measurement.time);
        true
    }
}

/// Legged-kinematics update with contact augmentation.
pub struct KinematicsCorrection {
    error_type: ErrorType,
    config: KinematicsCorrectionConfig,
    forward_kinematics: Box<dyn ForwardKinematics>,
    manager: AugmentationManager,
    queue_index: usize,
}

impl KinematicsCorrection {
    pub fn new(
        error_type: ErrorType,
        config: KinematicsCorrectionConfig,
        forward_kinematics: Box<dyn ForwardKinematics>,
        queue_index: usize,
    ) -> Self {
        KinematicsCorrection {
            error_type,
            config,
            forward_kinematics,
            manager: AugmentationManager::new(),
            queue_index,
        }
    }

    pub fn queue_index(&self) -> usize {
        self.queue_index
    }

    /// Legs currently augmented into the state.
    pub fn augmented_legs(&self) -> usize {
        self.manager.len()
    }

    /// Landmark column currently assigned to `leg`, if any.
    pub fn landmark_column(&self, leg: usize) -> Option<usize> {
        self.manager.column_of(leg)
    }

    /// Drop the contact table (paired with a state reset by the coordinator).
    pub fn reset(&mut self) {
        self.manager.clear();
    }

    /// Foot-position noise in the body frame: encoder noise propagated
    /// through the Jacobian plus the configured prior.
    fn leg_noise(&self, leg: &LegJacobian) -> Matrix3<f64> {
        let encoder_var = self.config.encoder_std * self.config.encoder_std;
        let propagated = &leg.jacobian * leg.jacobian.transpose() * encoder_var;
        propagated + self.config.prior_cov()
    }

    /// Process at most one kinematics measurement: augment new contacts,
    /// marginalise lost ones, and stack every persisting contact into a
    /// single invariant update.
    pub fn correct(
        &mut self,
        state: &mut RobotState,
        queue: &SensorQueue<KinematicsMeasurement>,
        counters: &EventCounters,
    ) -> Result<bool, EstimatorError> {
        let measurement = match queue.front() {
            Some(m) if m.time <= state.time() => {
                let _ = queue.pop();
                m
            }
            _ => return Ok(false),
        };

        let legs = self.forward_kinematics.num_legs();
        if measurement.contacts.len() != legs {
            counters.count_dimension_reject();
            return Err(EstimatorError::DimensionMismatch {
                expected: legs,
                got: measurement.contacts.len(),
            });
        }

        let rotation = state.rotation();
        let position = state.position();
        let evaluated: Vec<Option<LegJacobian>> = (0..legs)
            .map(|leg| {
                measurement.contacts[leg]
                    .then(|| self.forward_kinematics.leg(leg, &measurement.encoders))
            })
            .collect();

        // Structural pass: landmark columns come and go with contact.
        let mut advanced = false;
        let mut fresh = vec![false; legs];
        for leg in 0..legs {
            let augmented = self.manager.column_of(leg).is_some();
            match (measurement.contacts[leg], augmented) {
                (true, false) => {
                    let evaluated_leg = evaluated[leg].as_ref().map(|l| l.clone());
                    if let Some(leg_fk) = evaluated_leg {
                        let noise = self.leg_noise(&leg_fk);
                        let landmark = position + rotation * leg_fk.position;
                        let block = rotation * noise * rotation.transpose();
                        self.manager.augment(state, leg, &landmark, &block);
                        fresh[leg] = true;
                        advanced = true;
                        debug!("leg {} made contact, landmark augmented", leg);
                    }
                }
                (false, true) => {
                    self.manager.unaugment(state, leg);
                    advanced = true;
                    debug!("leg {} broke contact, landmark marginalised", leg);
                }
                _ => {}
            }
        }

        // Measurement pass: persisting contacts stack into one update.
        // Columns are re-queried because marginalisation above may have
        // shifted them.
        let persisting: Vec<usize> = (0..legs)
            .filter(|&leg| measurement.contacts[leg] && !fresh[leg])
            .filter(|&leg| self.manager.column_of(leg).is_some())
            .collect();
        if !persisting.is_empty() {
            let dim_p = state.dim_p();
            let rows = 3 * persisting.len();
            let mut z = DVector::<f64>::zeros(rows);
            let mut h = DMatrix::<f64>::zeros(rows, dim_p);
            let mut n = DMatrix::<f64>::zeros(rows, rows);
            for (index, &leg) in persisting.iter().enumerate() {
                let column = self.manager.column_of(leg).unwrap_or(5);
                let leg_fk = evaluated[leg].as_ref().map(|l| l.clone()).unwrap_or_else(|| {
                    self.forward_kinematics.leg(leg, &measurement.encoders)
                });
                let row = 3 * index;
                let landmark = state.landmark(column);
                let innovation = rotation * leg_fk.position + position - landmark;
                z.fixed_rows_mut::<3>(row).copy_from(&innovation);
                h.fixed_view_mut::<3, 3>(row, 6)
                    .copy_from(&(-Matrix3::identity()));
                h.fixed_view_mut::<3, 3>(row, state.landmark_cov_index(column))
                    .copy_from(&Matrix3::identity());
                let noise = rotation * self.leg_noise(&leg_fk) * rotation.transpose();
                n.fixed_view_mut::<3, 3>(row, row).copy_from(&noise);
            }
            apply_invariant_update(state, self.error_type, &z, &h, &n);
            advanced = true;
            debug!(
                "kinematics correction applied at t = {:.6} over {} legs",
                measurement.time,
                persisting.len()
            );
        }

        Ok(advanced)
    }
}
