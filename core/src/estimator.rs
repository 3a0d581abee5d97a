//! The estimator coordinator.
//!
//! [`StateEstimator`] owns the sensor queues, one propagation method, an
//! ordered list of corrections, and the output queue of published state
//! snapshots. Producers push measurements through borrowed queue handles from
//! their own threads; exactly one coordinator thread drives [`run_once`] in a
//! loop, which makes it the only mutator of the filter state; a publisher
//! thread drains the output queue at its own pace.
//!
//! The coordinator walks a three-state lifecycle:
//!
//! 1. **BiasInit** — IMU samples are averaged into gyro/accel bias estimates
//!    under a static-robot assumption.
//! 2. **StateInit** — once biases are frozen, the initial state is assembled
//!    from the front of the IMU and velocity queues and the covariance is
//!    seeded from the configured block diagonals.
//! 3. **Running** — each cycle propagates, applies every correction in
//!    registration order, re-symmetrises the covariance, and publishes a
//!    snapshot whenever any step advanced the state.
//!
//! [`run_once`]: StateEstimator::run_once

use std::sync::{Mutex, PoisonError};

use log::{info, warn};
use nalgebra::{DMatrix, Matrix3, Vector3};

use crate::config::{
    EstimatorConfig, ImuPropagationConfig, KinematicsCorrectionConfig, PositionCorrectionConfig,
};
use crate::correction::{Correction, CorrectionKind, KinematicsCorrection, PositionCorrection, VelocityCorrection};
use crate::error::{CounterSnapshot, EstimatorError, EventCounters};
use crate::kinematics::ForwardKinematics;
use crate::linalg::{min_eigenvalue, psd_repair, PSD_TOLERANCE};
use crate::measurements::{
    ImuMeasurement, KinematicsMeasurement, PositionMeasurement, VelocityMeasurement,
};
use crate::propagation::{ImuPropagation, Propagation};
use crate::queue::{QueueHandle, SensorQueue};
use crate::state::RobotState;

/// Lifecycle state of the coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EstimatorStatus {
    /// Accumulating IMU samples for static bias initialisation.
    BiasInit,
    /// Biases frozen; waiting for enough data to assemble the initial state.
    StateInit,
    /// Filtering.
    Running,
}

struct EstimatorCore {
    state: RobotState,
    propagation: Option<Propagation>,
    corrections: Vec<Correction>,
    status: EstimatorStatus,
}

/// Coordinates propagation, corrections, initialisation, and publication.
pub struct StateEstimator {
    config: EstimatorConfig,
    imu_queue: SensorQueue<ImuMeasurement>,
    velocity_queues: Vec<SensorQueue<VelocityMeasurement>>,
    position_queues: Vec<SensorQueue<PositionMeasurement>>,
    kinematics_queues: Vec<SensorQueue<KinematicsMeasurement>>,
    output: SensorQueue<RobotState>,
    counters: EventCounters,
    core: Mutex<EstimatorCore>,
}

impl StateEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        StateEstimator {
            config,
            imu_queue: SensorQueue::unbounded(),
            velocity_queues: Vec::new(),
            position_queues: Vec::new(),
            kinematics_queues: Vec::new(),
            output: SensorQueue::unbounded(),
            counters: EventCounters::new(),
            core: Mutex::new(EstimatorCore {
                state: RobotState::new(),
                propagation: None,
                corrections: Vec::new(),
                status: EstimatorStatus::BiasInit,
            }),
        }
    }

    fn core_mut(&mut self) -> &mut EstimatorCore {
        self.core.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Registration (setup phase, before threads start) ------------------

    /// Register IMU propagation. Producers push inertial samples through
    /// [`StateEstimator::imu_handle`].
    pub fn add_imu_propagation(&mut self, propagation_config: ImuPropagationConfig) {
        let propagation = ImuPropagation::new(
            propagation_config,
            self.config.noise,
            self.config.error_type,
        );
        self.core_mut().propagation = Some(Propagation::Imu(propagation));
    }

    /// Register a body-velocity correction with measurement covariance
    /// `covariance`. Returns the index used to fetch the producer handle.
    pub fn add_velocity_correction(&mut self, covariance: Matrix3<f64>) -> usize {
        let error_type = self.config.error_type;
        self.velocity_queues.push(SensorQueue::unbounded());
        let index = self.velocity_queues.len() - 1;
        self.core_mut()
            .corrections
            .push(Correction::Velocity(VelocityCorrection::new(
                error_type, covariance, index,
            )));
        index
    }

    /// Register a legged-kinematics correction driven by the given
    /// forward-kinematics evaluator. Returns the producer-handle index.
    pub fn add_kinematics_correction(
        &mut self,
        forward_kinematics: Box<dyn ForwardKinematics>,
        kinematics_config: KinematicsCorrectionConfig,
    ) -> usize {
        let error_type = self.config.error_type;
        self.kinematics_queues.push(SensorQueue::unbounded());
        let index = self.kinematics_queues.len() - 1;
        self.core_mut()
            .corrections
            .push(Correction::Kinematics(KinematicsCorrection::new(
                error_type,
                kinematics_config,
                forward_kinematics,
                index,
            )));
        index
    }

    /// Register an absolute-position correction. Returns the producer-handle
    /// index.
    pub fn add_position_correction(&mut self, position_config: PositionCorrectionConfig) -> usize {
        let error_type = self.config.error_type;
        self.position_queues.push(SensorQueue::unbounded());
        let index = self.position_queues.len() - 1;
        self.core_mut()
            .corrections
            .push(Correction::Position(PositionCorrection::new(
                error_type,
                position_config,
                index,
            )));
        index
    }

    // --- Queue handles ------------------------------------------------------

    pub fn imu_handle(&self) -> QueueHandle<'_, ImuMeasurement> {
        QueueHandle::new(&self.imu_queue)
    }

    pub fn velocity_handle(&self, index: usize) -> QueueHandle<'_, VelocityMeasurement> {
        QueueHandle::new(&self.velocity_queues[index])
    }

    pub fn position_handle(&self, index: usize) -> QueueHandle<'_, PositionMeasurement> {
        QueueHandle::new(&self.position_queues[index])
    }

    pub fn kinematics_handle(&self, index: usize) -> QueueHandle<'_, KinematicsMeasurement> {
        QueueHandle::new(&self.kinematics_queues[index])
    }

    /// The published-state queue, drained by the publisher thread.
    pub fn output_queue(&self) -> &SensorQueue<RobotState> {
        &self.output
    }

    // --- Introspection -------------------------------------------------------

    /// `true` once the filter is initialised and actively estimating.
    pub fn is_enabled(&self) -> bool {
        self.status() == EstimatorStatus::Running
    }

    pub fn status(&self) -> EstimatorStatus {
        self.lock_core().status
    }

    pub fn bias_initialized(&self) -> bool {
        self.lock_core()
            .propagation
            .as_ref()
            .map(|p| p.bias_initialized())
            .unwrap_or(false)
    }

    /// Snapshot of the current filter state.
    pub fn get_state(&self) -> RobotState {
        self.lock_core().state.clone()
    }

    /// Replace the filter state (e.g. from an external initialiser).
    pub fn set_state(&self, state: RobotState) {
        self.lock_core().state = state;
    }

    /// Operational fault counters.
    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    fn lock_core(&self) -> std::sync::MutexGuard<'_, EstimatorCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Lifecycle ------------------------------------------------------------

    /// Drive one coordinator cycle. In `BiasInit` and `StateInit` this runs
    /// the corresponding initialisation routine; in `Running` it propagates,
    /// corrects, and publishes. Returns `true` when the state advanced.
    pub fn run_once(&self) -> Result<bool, EstimatorError> {
        let status = self.status();
        match status {
            EstimatorStatus::BiasInit => {
                self.init_bias()?;
                Ok(false)
            }
            EstimatorStatus::StateInit => {
                self.init_state()?;
                Ok(false)
            }
            EstimatorStatus::Running => self.cycle(),
        }
    }

    /// Feed queued IMU samples into the bias accumulators. No-op once the
    /// biases are initialised.
    pub fn init_bias(&self) -> Result<(), EstimatorError> {
        let mut core = self.lock_core();
        let core = &mut *core;
        let Some(propagation) = core.propagation.as_mut() else {
            return Err(EstimatorError::MissingPropagation);
        };
        match propagation {
            Propagation::Imu(imu) => imu.init_bias(&self.imu_queue),
        }
        if propagation.bias_initialized() && core.status == EstimatorStatus::BiasInit {
            core.status = EstimatorStatus::StateInit;
            info!("bias initialisation complete, waiting for state initialisation");
        }
        Ok(())
    }

    /// Assemble the initial state from the queue fronts. Returns `true` when
    /// initialisation succeeded and the filter is enabled.
    pub fn init_state(&self) -> Result<bool, EstimatorError> {
        let mut core = self.lock_core();
        let core = &mut *core;
        if core.status == EstimatorStatus::Running {
            return Ok(true);
        }
        let Some(Propagation::Imu(imu)) = core.propagation.as_ref() else {
            return Err(EstimatorError::MissingPropagation);
        };
        if !imu.bias_initialized() {
            return Ok(false);
        }
        let Some(imu_front) = self.imu_queue.front() else {
            return Ok(false);
        };

        // The first-registered velocity correction seeds the initial
        // velocity. Robots without one start at rest once their kinematics
        // (or position) stream is flowing.
        let velocity_body = {
            let first_velocity = core.corrections.iter().find_map(|c| match c {
                Correction::Velocity(v) => Some(v),
                _ => None,
            });
            if let Some(velocity_correction) = first_velocity {
                match self.velocity_queues[velocity_correction.queue_index()].front() {
                    Some(m) => m.velocity,
                    None => return Ok(false),
                }
            } else if let Some(kinematics) = core.corrections.iter().find_map(|c| match c {
                Correction::Kinematics(k) => Some(k),
                _ => None,
            }) {
                if self.kinematics_queues[kinematics.queue_index()].is_empty() {
                    return Ok(false);
                }
                Vector3::zeros()
            } else {
                Vector3::zeros()
            }
        };

        let rotation = imu.initial_rotation();
        let estimate_bias = imu.config().estimate_bias;
        let mut state = RobotState::with_bias_estimation(estimate_bias);
        state.set_rotation(&rotation);
        state.set_velocity(&(rotation * velocity_body));
        state.set_position(&Vector3::zeros());
        state.set_gyro_bias(&imu.gyro_bias_estimate());
        state.set_accel_bias(&imu.accel_bias_estimate());
        state.set_time(imu_front.time);

        let dim_p = state.dim_p();
        state.set_covariance(DMatrix::zeros(dim_p, dim_p));
        let seed = self.config.initial_covariance;
        state.set_rotation_covariance(&(Matrix3::identity() * seed.rotation));
        state.set_velocity_covariance(&(Matrix3::identity() * seed.velocity));
        state.set_position_covariance(&(Matrix3::identity() * seed.position));
        state.set_gyro_bias_covariance(&(Matrix3::identity() * seed.gyro_bias));
        state.set_accel_bias_covariance(&(Matrix3::identity() * seed.accel_bias));

        core.state = state;
        core.status = EstimatorStatus::Running;
        info!("state initialised at t = {:.6}, filter enabled", imu_front.time);
        Ok(true)
    }

    /// One Running-mode cycle: propagate, correct in registration order,
    /// maintain the covariance, publish on any advance.
    fn cycle(&self) -> Result<bool, EstimatorError> {
        let mut core = self.lock_core();
        let core = &mut *core;
        let Some(propagation) = core.propagation.as_mut() else {
            return Err(EstimatorError::MissingPropagation);
        };

        let mut advanced = match propagation {
            Propagation::Imu(imu) => imu.propagate(&mut core.state, &self.imu_queue, &self.counters),
        };

        for correction in &mut core.corrections {
            let applied = match correction {
                Correction::Velocity(c) => {
                    let queue = &self.velocity_queues[c.queue_index()];
                    c.correct(&mut core.state, queue)
                }
                Correction::Position(c) => {
                    let queue = &self.position_queues[c.queue_index()];
                    c.correct(&mut core.state, queue)
                }
                Correction::Kinematics(c) => {
                    let queue = &self.kinematics_queues[c.queue_index()];
                    c.correct(&mut core.state, queue, &self.counters)?
                }
            };
            advanced |= applied;
        }

        if advanced {
            core.state.symmetrize_covariance();
            let smallest = min_eigenvalue(core.state.covariance());
            if smallest < PSD_TOLERANCE {
                self.counters.count_psd_repair();
                warn!(
                    "covariance left the PSD cone (min eigenvalue {:.3e}), repairing",
                    smallest
                );
                let (repaired, _) = psd_repair(core.state.covariance());
                core.state.set_covariance(repaired);
            }
            self.output.push(core.state.clone());
        }
        Ok(advanced)
    }

    /// Reset to the pre-initialisation condition: identity state, empty
    /// queues, bias accumulators cleared, status back to `BiasInit`.
    pub fn clear(&self) {
        let mut core = self.lock_core();
        let estimate_bias = match core.propagation.as_ref() {
            Some(Propagation::Imu(imu)) => imu.config().estimate_bias,
            None => true,
        };
        core.state = RobotState::with_bias_estimation(estimate_bias);
        if let Some(Propagation::Imu(imu)) = core.propagation.as_mut() {
            imu.reset();
        }
        for correction in &mut core.corrections {
            if let Correction::Kinematics(k) = correction {
                k.reset();
            }
        }
        core.status = EstimatorStatus::BiasInit;

        self.imu_queue.clear();
        for queue in &self.velocity_queues {
            queue.clear();
        }
        for queue in &self.position_queues {
            queue.clear();
        }
        for queue in &self.kinematics_queues {
            queue.clear();
        }
        info!("estimator cleared, returning to bias initialisation");
    }

    /// Kinds of the registered corrections, in registration order.
    pub fn correction_kinds(&self) -> Vec<CorrectionKind> {
        self.lock_core()
            .corrections
            .iter()
            .map(|c| c.kind())
            .collect()
    }
}
