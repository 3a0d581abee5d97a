//! Inertial propagation of the filter state.
//!
//! The propagation stage drains the IMU queue each cycle and advances the
//! group state, bias vector, and covariance. The mean follows the usual
//! strapdown-style integration — rotation through the SO(3) exponential,
//! velocity and position by Euler steps under gravity — while contact
//! landmarks are held fixed in the world frame. The covariance follows the
//! linearised invariant error dynamics: `P <- Phi P Phi^T + Q_hat` with
//! `Phi = I + A dt` from the continuous-time generator of the configured
//! error parameterisation, and the process noise mapped through the group
//! adjoint for the world-frame error type.
//!
//! Before the filter can run, the IMU biases are initialised by averaging a
//! configured number of samples under a static-robot assumption; until that
//! completes, propagation drains the queue but leaves the state untouched.
//!
//! [`Propagation`] is a sum type with a single inertial variant today; the
//! variant point is where wheel-odometry or other propagators would slot in.

use log::{debug, info};
use nalgebra::{DMatrix, Matrix3, UnitQuaternion, Vector3};

use crate::config::{ErrorType, ImuPropagationConfig, NoiseParams};
use crate::error::EventCounters;
use crate::liegroup::{sek3_adjoint, skew, so3_exp};
use crate::linalg::symmetrize;
use crate::measurements::ImuMeasurement;
use crate::queue::SensorQueue;
use crate::state::RobotState;

/// Available propagation methods.
#[derive(Debug)]
pub enum Propagation {
    Imu(ImuPropagation),
}

impl Propagation {
    pub fn bias_initialized(&self) -> bool {
        match self {
            Propagation::Imu(p) => p.bias_initialized(),
        }
    }
}

/// IMU-driven propagation with online bias estimation.
#[derive(Debug)]
pub struct ImuPropagation {
    config: ImuPropagationConfig,
    noise: NoiseParams,
    error_type: ErrorType,
    t_prev: Option<f64>,
    bias_initialized: bool,
    gyro_sum: Vector3<f64>,
    accel_sum: Vector3<f64>,
    sample_count: usize,
    gyro_bias_estimate: Vector3<f64>,
    accel_bias_estimate: Vector3<f64>,
    latest_orientation: Option<UnitQuaternion<f64>>,
}

impl ImuPropagation {
    pub fn new(config: ImuPropagationConfig, noise: NoiseParams, error_type: ErrorType) -> Self {
        // Without bias estimation (or without the static-initialisation
        // phase) the filter starts immediately with zero biases.
        let bias_initialized = !config.estimate_bias || !config.static_bias_initialization;
        ImuPropagation {
            config,
            noise,
            error_type,
            t_prev: None,
            bias_initialized,
            gyro_sum: Vector3::zeros(),
            accel_sum: Vector3::zeros(),
            sample_count: 0,
            gyro_bias_estimate: Vector3::zeros(),
            accel_bias_estimate: Vector3::zeros(),
            latest_orientation: None,
        }
    }

    pub fn config(&self) -> &ImuPropagationConfig {
        &self.config
    }

    pub fn bias_initialized(&self) -> bool {
        self.bias_initialized
    }

    pub fn gyro_bias_estimate(&self) -> Vector3<f64> {
        self.gyro_bias_estimate
    }

    pub fn accel_bias_estimate(&self) -> Vector3<f64> {
        self.accel_bias_estimate
    }

    /// Most recent orientation reported by the IMU stream, if any.
    pub fn latest_orientation(&self) -> Option<UnitQuaternion<f64>> {
        self.latest_orientation
    }

    /// Timestamp of the last consumed sample.
    pub fn last_time(&self) -> Option<f64> {
        self.t_prev
    }

    /// Drain the queue into the bias accumulators. Called while the
    /// estimator is in its bias-initialisation phase; once enough samples
    /// have been averaged the bias estimates freeze and the flag flips.
    /// Further calls are no-ops on the estimates.
    pub fn init_bias(&mut self, queue: &SensorQueue<ImuMeasurement>) {
        if self.bias_initialized {
            return;
        }
        let samples = queue.take_all();
        self.accumulate(&samples);
    }

    fn accumulate(&mut self, samples: &[ImuMeasurement]) {
        for measurement in samples {
            if !self.bias_initialized {
                let rotation = self.config.imu_to_body_rotation();
                self.gyro_sum += rotation * measurement.angular_velocity;
                self.accel_sum += rotation * measurement.linear_acceleration;
                self.sample_count += 1;
            }
            if measurement.orientation.is_some() {
                self.latest_orientation = measurement.orientation;
            }
            self.t_prev = Some(measurement.time);
            if !self.bias_initialized && self.sample_count >= self.config.bias_init_samples {
                self.finalize_bias();
            }
        }
    }

    fn finalize_bias(&mut self) {
        let n = self.sample_count as f64;
        let mean_gyro = self.gyro_sum / n;
        let mean_accel = self.accel_sum / n;
        // Static robot: the mean angular rate is pure gyro bias, and the mean
        // specific force minus the reaction to gravity is accelerometer bias.
        let rotation = self.initial_rotation();
        self.gyro_bias_estimate = mean_gyro;
        self.accel_bias_estimate = mean_accel + rotation.transpose() * self.config.gravity_vector();
        self.bias_initialized = true;
        info!(
            "IMU bias initialised from {} samples: gyro [{:.5}, {:.5}, {:.5}], accel [{:.5}, {:.5}, {:.5}]",
            self.sample_count,
            self.gyro_bias_estimate[0],
            self.gyro_bias_estimate[1],
            self.gyro_bias_estimate[2],
            self.accel_bias_estimate[0],
            self.accel_bias_estimate[1],
            self.accel_bias_estimate[2],
        );
    }

    /// Rotation used for state initialisation: the IMU's own orientation
    /// estimate when configured and available, identity otherwise.
    pub fn initial_rotation(&self) -> Matrix3<f64> {
        if self.config.use_imu_orientation_for_init {
            if let Some(orientation) = self.latest_orientation {
                return *orientation.to_rotation_matrix().matrix();
            }
        }
        Matrix3::identity()
    }

    /// Drain the IMU queue and advance the state. Returns `true` when at
    /// least one sample moved the state forward. While biases are still
    /// being initialised this only feeds the accumulators.
    pub fn propagate(
        &mut self,
        state: &mut RobotState,
        queue: &SensorQueue<ImuMeasurement>,
        counters: &EventCounters,
    ) -> bool {
        let samples = queue.take_all();
        if samples.is_empty() {
            return false;
        }
        if !self.bias_initialized {
            self.accumulate(&samples);
            return false;
        }

        let mut advanced = false;
        for measurement in &samples {
            if measurement.orientation.is_some() {
                self.latest_orientation = measurement.orientation;
            }
            advanced |= self.step(state, measurement, counters);
        }
        if advanced {
            state.normalize_rotation_if_drifted();
        }
        advanced
    }

    fn step(
        &mut self,
        state: &mut RobotState,
        measurement: &ImuMeasurement,
        counters: &EventCounters,
    ) -> bool {
        let Some(t_prev) = self.t_prev else {
            // First sample anchors the clock; nothing to integrate yet.
            self.t_prev = Some(measurement.time);
            state.set_time(measurement.time);
            return false;
        };

        let mut dt = measurement.time - t_prev;
        if dt <= 0.0 {
            counters.count_clock_violation();
            debug!(
                "skipping IMU sample with non-increasing timestamp {:.6} (previous {:.6})",
                measurement.time, t_prev
            );
            return false;
        }
        if dt > self.config.max_dt {
            counters.count_staleness_clamp();
            debug!(
                "clamping IMU step of {:.3}s to the configured maximum {:.3}s",
                dt, self.config.max_dt
            );
            dt = self.config.max_dt;
        }
        self.t_prev = Some(measurement.time);

        let rotation_extrinsic = self.config.imu_to_body_rotation();
        let w = rotation_extrinsic * measurement.angular_velocity - state.gyro_bias();
        let a = rotation_extrinsic * measurement.linear_acceleration - state.accel_bias();

        // Covariance uses the pre-update mean.
        self.propagate_covariance(state, &w, &a, dt);

        let gravity = self.config.gravity_vector();
        let rotation = state.rotation();
        let accel_world = rotation * a + gravity;
        let velocity = state.velocity();

        state.set_position(&(state.position() + velocity * dt + 0.5 * accel_world * dt * dt));
        state.set_velocity(&(velocity + accel_world * dt));
        state.set_rotation(&(rotation * so3_exp(&(w * dt))));
        state.set_time(measurement.time);
        true
    }

    /// Linearised invariant error propagation: `P <- Phi P Phi^T + Q_hat`.
    fn propagate_covariance(
        &self,
        state: &mut RobotState,
        w: &Vector3<f64>,
        a: &Vector3<f64>,
        dt: f64,
    ) {
        let dim_p = state.dim_p();
        let dim_theta = state.dim_theta();
        let landmarks = state.landmark_count();
        let gravity = self.config.gravity_vector();
        let identity3 = Matrix3::identity();

        let mut generator = DMatrix::<f64>::zeros(dim_p, dim_p);
        match self.error_type {
            ErrorType::LeftInvariant => {
                // World-frame error: gravity couples rotation error into
                // velocity, and bias errors enter rotated into the world.
                generator
                    .fixed_view_mut::<3, 3>(3, 0)
                    .copy_from(&skew(&gravity));
                generator.fixed_view_mut::<3, 3>(6, 3).copy_from(&identity3);
                if dim_theta > 0 {
                    let q = dim_p - 6;
                    let rotation = state.rotation();
                    generator.fixed_view_mut::<3, 3>(0, q).copy_from(&(-rotation));
                    generator
                        .fixed_view_mut::<3, 3>(3, q)
                        .copy_from(&(-skew(&state.velocity()) * rotation));
                    generator
                        .fixed_view_mut::<3, 3>(3, q + 3)
                        .copy_from(&(-rotation));
                    generator
                        .fixed_view_mut::<3, 3>(6, q)
                        .copy_from(&(-skew(&state.position()) * rotation));
                    for k in 0..landmarks {
                        let row = 9 + 3 * k;
                        let d = state.landmark(5 + k);
                        generator
                            .fixed_view_mut::<3, 3>(row, q)
                            .copy_from(&(-skew(&d) * rotation));
                    }
                }
            }
            ErrorType::RightInvariant => {
                // Body-frame error: the error state rotates with the body.
                let w_hat = skew(w);
                generator.fixed_view_mut::<3, 3>(0, 0).copy_from(&(-w_hat));
                generator.fixed_view_mut::<3, 3>(3, 0).copy_from(&(-skew(a)));
                generator.fixed_view_mut::<3, 3>(3, 3).copy_from(&(-w_hat));
                generator.fixed_view_mut::<3, 3>(6, 3).copy_from(&identity3);
                generator.fixed_view_mut::<3, 3>(6, 6).copy_from(&(-w_hat));
                for k in 0..landmarks {
                    let row = 9 + 3 * k;
                    generator.fixed_view_mut::<3, 3>(row, row).copy_from(&(-w_hat));
                }
                if dim_theta > 0 {
                    let q = dim_p - 6;
                    generator.fixed_view_mut::<3, 3>(0, q).copy_from(&(-identity3));
                    generator
                        .fixed_view_mut::<3, 3>(3, q + 3)
                        .copy_from(&(-identity3));
                }
            }
        }

        let phi = DMatrix::<f64>::identity(dim_p, dim_p) + generator * dt;

        let mut process_noise = DMatrix::<f64>::zeros(dim_p, dim_p);
        process_noise
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&self.noise.gyro_cov());
        process_noise
            .fixed_view_mut::<3, 3>(3, 3)
            .copy_from(&self.noise.accel_cov());
        for k in 0..landmarks {
            let row = 9 + 3 * k;
            process_noise
                .fixed_view_mut::<3, 3>(row, row)
                .copy_from(&self.noise.contact_cov());
        }
        if dim_theta > 0 {
            let q = dim_p - 6;
            process_noise
                .fixed_view_mut::<3, 3>(q, q)
                .copy_from(&self.noise.gyro_bias_cov());
            process_noise
                .fixed_view_mut::<3, 3>(q + 3, q + 3)
                .copy_from(&self.noise.accel_bias_cov());
        }

        // For the world-frame error the white noise enters in the body frame
        // and must be carried through the group adjoint.
        let phi_adj = match self.error_type {
            ErrorType::LeftInvariant => {
                let mut adjoint_full = DMatrix::<f64>::identity(dim_p, dim_p);
                let group_dim = dim_p - dim_theta;
                adjoint_full
                    .view_mut((0, 0), (group_dim, group_dim))
                    .copy_from(&sek3_adjoint(state.matrix()));
                &phi * adjoint_full
            }
            ErrorType::RightInvariant => phi.clone(),
        };
        let discrete_noise = &phi_adj * process_noise * phi_adj.transpose() * dt;

        let propagated = &phi * state.covariance() * phi.transpose() + discrete_noise;
        state.set_covariance(symmetrize(&propagated));
    }

    /// Reset the propagation to its initial (pre-bias-init) condition.
    pub fn reset(&mut self) {
        self.t_prev = None;
        self.bias_initialized = !self.config.estimate_bias || !self.config.static_bias_initialization;
        self.gyro_sum = Vector3::zeros();
        self.accel_sum = Vector3::zeros();
        self.sample_count = 0;
        self.gyro_bias_estimate = Vector3::zeros();
        self.accel_bias_estimate = Vector3::zeros();
        self.latest_orientation = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::f64::consts::FRAC_PI_2;

    fn imu(t: f64, w: Vector3<f64>, a: Vector3<f64>) -> ImuMeasurement {
        ImuMeasurement::new(t, w, a)
    }

    fn instant_start_config() -> ImuPropagationConfig {
        ImuPropagationConfig {
            static_bias_initialization: false,
            ..ImuPropagationConfig::default()
        }
    }

    fn zero_noise() -> NoiseParams {
        NoiseParams {
            gyro_std: 0.0,
            accel_std: 0.0,
            gyro_bias_std: 0.0,
            accel_bias_std: 0.0,
            contact_std: 0.0,
        }
    }

    #[test]
    fn bias_initialises_after_configured_count() {
        let mut propagation = ImuPropagation::new(
            ImuPropagationConfig {
                bias_init_samples: 10,
                ..ImuPropagationConfig::default()
            },
            NoiseParams::default(),
            ErrorType::LeftInvariant,
        );
        let queue = SensorQueue::unbounded();
        for i in 0..10 {
            queue.push(imu(
                i as f64 * 0.005,
                Vector3::new(0.02, 0.0, 0.0),
                Vector3::new(0.0, 0.0, 9.81),
            ));
        }
        assert!(!propagation.bias_initialized());
        propagation.init_bias(&queue);
        assert!(propagation.bias_initialized());
        assert_approx_eq!(propagation.gyro_bias_estimate()[0], 0.02, 1e-12);
        // Static accel reading cancels gravity exactly.
        assert_approx_eq!(propagation.accel_bias_estimate().norm(), 0.0, 1e-12);
    }

    #[test]
    fn init_bias_is_idempotent_once_initialised() {
        let mut propagation = ImuPropagation::new(
            ImuPropagationConfig {
                bias_init_samples: 2,
                ..ImuPropagationConfig::default()
            },
            NoiseParams::default(),
            ErrorType::LeftInvariant,
        );
        let queue = SensorQueue::unbounded();
        queue.push(imu(0.0, Vector3::new(0.1, 0.0, 0.0), Vector3::new(0.0, 0.0, 9.81)));
        queue.push(imu(0.005, Vector3::new(0.1, 0.0, 0.0), Vector3::new(0.0, 0.0, 9.81)));
        propagation.init_bias(&queue);
        let frozen = propagation.gyro_bias_estimate();

        // A later burst with a very different mean must not move the estimate.
        queue.push(imu(0.010, Vector3::new(9.0, 9.0, 9.0), Vector3::zeros()));
        propagation.init_bias(&queue);
        assert_eq!(propagation.gyro_bias_estimate(), frozen);
    }

    #[test]
    fn propagate_is_noop_on_state_until_bias_initialised() {
        let mut propagation = ImuPropagation::new(
            ImuPropagationConfig::default(),
            NoiseParams::default(),
            ErrorType::LeftInvariant,
        );
        let queue = SensorQueue::unbounded();
        let counters = EventCounters::new();
        let mut state = RobotState::new();
        let covariance_before = state.covariance().clone();
        for i in 0..50 {
            queue.push(imu(i as f64 * 0.005, Vector3::zeros(), Vector3::new(0.0, 0.0, 9.81)));
        }
        assert!(!propagation.propagate(&mut state, &queue, &counters));
        assert!(queue.is_empty());
        assert_eq!(state.position(), Vector3::zeros());
        assert_eq!(state.covariance(), &covariance_before);
    }

    #[test]
    fn pure_rotation_about_z() {
        let mut propagation = ImuPropagation::new(
            instant_start_config(),
            NoiseParams::default(),
            ErrorType::LeftInvariant,
        );
        let queue = SensorQueue::unbounded();
        let counters = EventCounters::new();
        let mut state = RobotState::new();

        let rate = 200;
        let w = Vector3::new(0.0, 0.0, FRAC_PI_2);
        let a = Vector3::new(0.0, 0.0, 9.81);
        for i in 0..=rate {
            queue.push(imu(i as f64 / rate as f64, w, a));
        }
        assert!(propagation.propagate(&mut state, &queue, &counters));

        // After one second the body has yawed by pi/2.
        let rotated = state.rotation() * Vector3::new(1.0, 0.0, 0.0);
        assert_approx_eq!(rotated[0], 0.0, 1e-3);
        assert_approx_eq!(rotated[1], 1.0, 1e-3);
        assert_approx_eq!(state.velocity().norm(), 0.0, 1e-3);
        assert_approx_eq!(state.position().norm(), 0.0, 1e-3);
        assert_approx_eq!(state.time(), 1.0, 1e-12);
    }

    #[test]
    fn covariance_grows_under_propagation() {
        let mut propagation = ImuPropagation::new(
            instant_start_config(),
            NoiseParams::default(),
            ErrorType::LeftInvariant,
        );
        let queue = SensorQueue::unbounded();
        let counters = EventCounters::new();
        let mut state = RobotState::new();
        state.set_covariance(DMatrix::zeros(15, 15));

        let mut previous_yaw_var = 0.0;
        for i in 0..100 {
            queue.push(imu(
                i as f64 * 0.005,
                Vector3::zeros(),
                Vector3::new(0.0, 0.0, 9.81),
            ));
            propagation.propagate(&mut state, &queue, &counters);
            let yaw_var = state.covariance()[(2, 2)];
            assert!(yaw_var >= previous_yaw_var);
            previous_yaw_var = yaw_var;
        }
        assert!(previous_yaw_var > 0.0);
    }

    #[test]
    fn non_monotonic_timestamps_are_skipped_and_counted() {
        let mut propagation = ImuPropagation::new(
            instant_start_config(),
            NoiseParams::default(),
            ErrorType::LeftInvariant,
        );
        let queue = SensorQueue::unbounded();
        let counters = EventCounters::new();
        let mut state = RobotState::new();

        queue.push(imu(0.0, Vector3::zeros(), Vector3::new(0.0, 0.0, 9.81)));
        queue.push(imu(1.0, Vector3::zeros(), Vector3::new(0.0, 0.0, 9.81)));
        queue.push(imu(0.5, Vector3::zeros(), Vector3::new(0.0, 0.0, 9.81)));
        propagation.propagate(&mut state, &queue, &counters);
        assert_eq!(counters.snapshot().clock_violations, 1);
        assert_approx_eq!(state.time(), 1.0, 1e-12);
    }

    #[test]
    fn oversized_steps_are_clamped_and_counted() {
        let mut propagation = ImuPropagation::new(
            ImuPropagationConfig {
                max_dt: 0.1,
                ..instant_start_config()
            },
            NoiseParams::default(),
            ErrorType::LeftInvariant,
        );
        let queue = SensorQueue::unbounded();
        let counters = EventCounters::new();
        let mut state = RobotState::new();
        state.set_velocity(&Vector3::new(1.0, 0.0, 0.0));

        queue.push(imu(0.0, Vector3::zeros(), Vector3::new(0.0, 0.0, 9.81)));
        queue.push(imu(5.0, Vector3::zeros(), Vector3::new(0.0, 0.0, 9.81)));
        propagation.propagate(&mut state, &queue, &counters);
        assert_eq!(counters.snapshot().staleness_clamps, 1);
        // The 5 s gap integrated as only 0.1 s.
        assert_approx_eq!(state.position()[0], 0.1, 1e-9);
    }

    #[test]
    fn zero_input_with_zero_gravity_leaves_state_bitwise_unchanged() {
        let mut propagation = ImuPropagation::new(
            ImuPropagationConfig {
                gravity: [0.0, 0.0, 0.0],
                ..instant_start_config()
            },
            zero_noise(),
            ErrorType::LeftInvariant,
        );
        let queue = SensorQueue::unbounded();
        let counters = EventCounters::new();
        let mut state = RobotState::new();
        state.set_covariance(DMatrix::zeros(15, 15));
        let x_before = state.matrix().clone();
        let p_before = state.covariance().clone();

        for i in 0..10 {
            queue.push(imu(i as f64 * 0.01, Vector3::zeros(), Vector3::zeros()));
        }
        propagation.propagate(&mut state, &queue, &counters);
        assert_eq!(state.matrix(), &x_before);
        assert_eq!(state.covariance(), &p_before);
    }

    #[test]
    fn landmarks_stay_fixed_in_the_world_frame() {
        let mut propagation = ImuPropagation::new(
            instant_start_config(),
            NoiseParams::default(),
            ErrorType::LeftInvariant,
        );
        let queue = SensorQueue::unbounded();
        let counters = EventCounters::new();
        let mut state = RobotState::new();
        state.augment(&Vector3::new(0.3, 0.0, -0.3), &Matrix3::identity());

        for i in 0..=100 {
            queue.push(imu(
                i as f64 * 0.01,
                Vector3::new(0.0, 0.0, 1.0),
                Vector3::new(0.0, 0.0, 9.81),
            ));
        }
        propagation.propagate(&mut state, &queue, &counters);
        assert_approx_eq!(state.landmark(5)[0], 0.3, 1e-12);
        assert_approx_eq!(state.landmark(5)[2], -0.3, 1e-12);
    }

    #[test]
    fn right_invariant_covariance_stays_symmetric_psd() {
        let mut propagation = ImuPropagation::new(
            instant_start_config(),
            NoiseParams::default(),
            ErrorType::RightInvariant,
        );
        let queue = SensorQueue::unbounded();
        let counters = EventCounters::new();
        let mut state = RobotState::new();

        for i in 0..=200 {
            queue.push(imu(
                i as f64 * 0.005,
                Vector3::new(0.1, -0.05, 0.2),
                Vector3::new(0.3, 0.0, 9.81),
            ));
        }
        propagation.propagate(&mut state, &queue, &counters);
        let p = state.covariance();
        let asymmetry = (p - p.transpose()).norm();
        assert!(asymmetry < 1e-10);
        assert!(crate::linalg::min_eigenvalue(p) > -1e-10);
    }
}
