//! Measurement value objects for the estimator's sensor streams.
//!
//! Each sensor stream delivers immutable value objects stamped with a
//! monotonic timestamp in seconds. Adapters construct these from middleware
//! messages and push them through a queue handle; the estimator pops them and
//! releases them when the cycle completes. Timestamps order measurements
//! within a stream — arrival order is irrelevant.

use std::fmt::{self, Display};

use nalgebra::{DVector, Matrix3, UnitQuaternion, Vector3};

use crate::geodesy::GeodeticReference;

/// Anything carrying a monotonic timestamp in seconds.
///
/// Queues use this to drain measurements up to a target time.
pub trait Stamped {
    fn time(&self) -> f64;
}

/// Inertial sample: angular velocity and linear acceleration in the sensor
/// frame, with an optional orientation estimate from the IMU's own fusion.
#[derive(Clone, Debug)]
pub struct ImuMeasurement {
    /// Monotonic timestamp in seconds.
    pub time: f64,
    /// Angular velocity in rad/s.
    pub angular_velocity: Vector3<f64>,
    /// Linear acceleration (specific force) in m/s^2.
    pub linear_acceleration: Vector3<f64>,
    /// Orientation reported by the IMU, if available.
    pub orientation: Option<UnitQuaternion<f64>>,
}

impl ImuMeasurement {
    pub fn new(time: f64, angular_velocity: Vector3<f64>, linear_acceleration: Vector3<f64>) -> Self {
        ImuMeasurement {
            time,
            angular_velocity,
            linear_acceleration,
            orientation: None,
        }
    }
}

impl Display for ImuMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ImuMeasurement(t: {:.6}, gyro: [{:.4}, {:.4}, {:.4}], accel: [{:.4}, {:.4}, {:.4}])",
            self.time,
            self.angular_velocity[0],
            self.angular_velocity[1],
            self.angular_velocity[2],
            self.linear_acceleration[0],
            self.linear_acceleration[1],
            self.linear_acceleration[2],
        )
    }
}

/// Body-frame linear velocity with its measurement covariance.
#[derive(Clone, Debug)]
pub struct VelocityMeasurement {
    /// Monotonic timestamp in seconds.
    pub time: f64,
    /// Linear velocity in the body frame, m/s.
    pub velocity: Vector3<f64>,
    /// Measurement covariance. A zero matrix means "use the correction's
    /// configured default".
    pub covariance: Matrix3<f64>,
}

impl VelocityMeasurement {
    pub fn new(time: f64, velocity: Vector3<f64>) -> Self {
        VelocityMeasurement {
            time,
            velocity,
            covariance: Matrix3::zeros(),
        }
    }

    pub fn with_covariance(time: f64, velocity: Vector3<f64>, covariance: Matrix3<f64>) -> Self {
        VelocityMeasurement {
            time,
            velocity,
            covariance,
        }
    }
}

impl Display for VelocityMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VelocityMeasurement(t: {:.6}, v: [{:.4}, {:.4}, {:.4}])",
            self.time, self.velocity[0], self.velocity[1], self.velocity[2],
        )
    }
}

/// Absolute position in the world frame with its measurement covariance.
#[derive(Clone, Debug)]
pub struct PositionMeasurement {
    /// Monotonic timestamp in seconds.
    pub time: f64,
    /// Position in the world frame, meters.
    pub position: Vector3<f64>,
    /// Measurement covariance. A zero matrix means "use the correction's
    /// configured default".
    pub covariance: Matrix3<f64>,
}

impl PositionMeasurement {
    pub fn new(time: f64, position: Vector3<f64>) -> Self {
        PositionMeasurement {
            time,
            position,
            covariance: Matrix3::zeros(),
        }
    }

    pub fn with_covariance(time: f64, position: Vector3<f64>, covariance: Matrix3<f64>) -> Self {
        PositionMeasurement {
            time,
            position,
            covariance,
        }
    }

    /// Build a position measurement from a WGS84 fix, expressed in the local
    /// east-north-up frame about `reference`. This is the adapter-side
    /// conversion for GNSS-style sources.
    pub fn from_geodetic(
        time: f64,
        latitude: f64,
        longitude: f64,
        altitude: f64,
        reference: &GeodeticReference,
        covariance: Matrix3<f64>,
    ) -> Self {
        PositionMeasurement {
            time,
            position: reference.to_enu(latitude, longitude, altitude),
            covariance,
        }
    }
}

impl Display for PositionMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PositionMeasurement(t: {:.6}, p: [{:.4}, {:.4}, {:.4}])",
            self.time, self.position[0], self.position[1], self.position[2],
        )
    }
}

/// Legged-kinematics sample: per-leg contact flags plus the joint encoder
/// vector. Foot positions and Jacobians are evaluated from the encoders by
/// the forward-kinematics collaborator inside the kinematics correction.
#[derive(Clone, Debug)]
pub struct KinematicsMeasurement {
    /// Monotonic timestamp in seconds.
    pub time: f64,
    /// Joint encoder values, radians.
    pub encoders: DVector<f64>,
    /// Per-leg contact flags, indexed by leg id.
    pub contacts: Vec<bool>,
}

impl KinematicsMeasurement {
    pub fn new(time: f64, encoders: DVector<f64>, contacts: Vec<bool>) -> Self {
        KinematicsMeasurement {
            time,
            encoders,
            contacts,
        }
    }
}

impl Stamped for ImuMeasurement {
    fn time(&self) -> f64 {
        self.time
    }
}

impl Stamped for VelocityMeasurement {
    fn time(&self) -> f64 {
        self.time
    }
}

impl Stamped for PositionMeasurement {
    fn time(&self) -> f64 {
        self.time
    }
}

impl Stamped for KinematicsMeasurement {
    fn time(&self) -> f64 {
        self.time
    }
}

impl Display for KinematicsMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "KinematicsMeasurement(t: {:.6}, joints: {}, contacts: {:?})",
            self.time,
            self.encoders.len(),
            self.contacts,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn imu_measurement_display() {
        let m = ImuMeasurement::new(
            1.25,
            Vector3::new(0.1, 0.0, -0.2),
            Vector3::new(0.0, 0.0, 9.81),
        );
        let s = format!("{}", m);
        assert!(s.contains("ImuMeasurement"));
        assert!(s.contains("1.25"));
        assert!(m.orientation.is_none());
    }

    #[test]
    fn velocity_measurement_default_covariance_is_zero() {
        let m = VelocityMeasurement::new(0.0, Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(m.covariance, Matrix3::zeros());
        let with_cov =
            VelocityMeasurement::with_covariance(0.0, m.velocity, Matrix3::identity() * 1e-4);
        assert_approx_eq!(with_cov.covariance[(0, 0)], 1e-4, 1e-15);
    }

    #[test]
    fn geodetic_fix_lands_in_local_frame() {
        let reference = GeodeticReference::new(42.0, -83.0, 250.0);
        let m = PositionMeasurement::from_geodetic(
            0.5,
            42.0,
            -83.0,
            260.0,
            &reference,
            Matrix3::identity() * 1e-2,
        );
        assert_approx_eq!(m.position[2], 10.0, 1e-3);
        assert!(m.position.fixed_rows::<2>(0).norm() < 0.1);
    }

    #[test]
    fn kinematics_measurement_carries_contacts() {
        let m = KinematicsMeasurement::new(
            2.0,
            DVector::from_vec(vec![0.1, 0.2, 0.3]),
            vec![true, false],
        );
        assert_eq!(m.contacts.len(), 2);
        assert_eq!(m.encoders.len(), 3);
        assert!(format!("{}", m).contains("contacts"));
    }
}
