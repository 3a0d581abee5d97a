//! Invariant extended Kalman filtering for real-time robot state estimation
//!
//! This crate implements an invariant extended Kalman filter (InEKF) that
//! fuses a high-rate inertial stream with lower-rate correction sources —
//! legged-kinematics contacts, body-frame velocity, and absolute position —
//! into a continually updated estimate of a mobile robot's pose, velocity,
//! and IMU biases in a world frame.
//!
//! The filter state lives on the extended special Euclidean group
//! SE_{K+2}(3): a rotation, a world-frame velocity and position, and K
//! dynamically augmented contact-foot landmarks, together with a
//! six-dimensional IMU bias vector and a block covariance over the group's
//! tangent space. Formulating the filter on the group keeps the error
//! dynamics state-independent for this class of systems, which is what makes
//! the "invariant" EKF consistent where a quaternion EKF needs relinearising.
//! The formulation follows Hartley et al., "Contact-Aided Invariant Extended
//! Kalman Filtering for Robot State Estimation" (IJRR 2020). Variables are
//! generally named for the quantity they represent rather than the symbol
//! used in the paper.
//!
//! This crate is primarily built off of [`nalgebra`](https://crates.io/crates/nalgebra)
//! for the dynamically-sized group and covariance matrices, with
//! [`nav-types`](https://crates.io/crates/nav-types) supplying WGS84/ECEF
//! conversions for absolute position fixes.
//!
//! ## Crate overview
//!
//! - [`liegroup`]: SO(3) and SE_{K+2}(3) exponentials, inverse, and adjoint.
//! - [`linalg`]: covariance hygiene — symmetrisation, SPD solves, PSD repair.
//! - [`geodesy`]: WGS84 fixes to local tangent-plane coordinates.
//! - [`measurements`]: timestamped value objects for each sensor stream.
//! - [`queue`]: mutex-per-stream FIFOs and borrowed producer handles.
//! - [`state`]: the group state container with landmark augmentation.
//! - [`augmentation`]: the leg-to-landmark-column table.
//! - [`kinematics`]: the forward-kinematics collaborator interface.
//! - [`propagation`]: IMU propagation and static bias initialisation.
//! - [`correction`]: velocity, position, and legged-kinematics updates.
//! - [`estimator`]: the coordinator, its lifecycle, and the output queue.
//! - [`config`]: serde-backed configuration with JSON/YAML/TOML loaders.
//! - [`error`]: structural errors and operational fault counters.
//!
//! ## Threading model
//!
//! Producers (middleware adapters) push measurements through borrowed
//! [`queue::QueueHandle`]s from their own threads; one coordinator thread
//! drives [`estimator::StateEstimator::run_once`] in a loop and is the only
//! mutator of the filter state; a publisher thread drains the output queue.
//! Every queue has its own mutex, critical sections are single push/pop
//! operations, and no lock is ever held across two queues, so there is no
//! lock-ordering concern. Shutdown is a cooperative stop flag polled by each
//! loop.
//!
//! ## Example
//!
//! ```rust
//! use inekf::config::{EstimatorConfig, ImuPropagationConfig};
//! use inekf::estimator::StateEstimator;
//! use inekf::measurements::{ImuMeasurement, VelocityMeasurement};
//! use nalgebra::{Matrix3, Vector3};
//!
//! let mut estimator = StateEstimator::new(EstimatorConfig::default());
//! estimator.add_imu_propagation(ImuPropagationConfig {
//!     bias_init_samples: 2,
//!     ..ImuPropagationConfig::default()
//! });
//! let velocity = estimator.add_velocity_correction(Matrix3::identity() * 1e-4);
//!
//! // Adapters would push from their own threads; here we feed inline.
//! for i in 0..3 {
//!     estimator.imu_handle().push(ImuMeasurement::new(
//!         i as f64 * 0.005,
//!         Vector3::zeros(),
//!         Vector3::new(0.0, 0.0, 9.81),
//!     ));
//! }
//! estimator.run_once().unwrap(); // bias initialisation
//! estimator.imu_handle().push(ImuMeasurement::new(0.015, Vector3::zeros(), Vector3::new(0.0, 0.0, 9.81)));
//! estimator
//!     .velocity_handle(velocity)
//!     .push(VelocityMeasurement::new(0.015, Vector3::zeros()));
//! estimator.run_once().unwrap(); // state initialisation
//! assert!(estimator.is_enabled());
//! ```

pub mod augmentation;
pub mod config;
pub mod correction;
pub mod error;
pub mod estimator;
pub mod geodesy;
pub mod kinematics;
pub mod liegroup;
pub mod linalg;
pub mod measurements;
pub mod propagation;
pub mod queue;
pub mod state;

pub use config::{ErrorType, EstimatorConfig, NoiseParams};
pub use error::{CounterSnapshot, EstimatorError};
pub use estimator::{EstimatorStatus, StateEstimator};
pub use state::RobotState;
