//! Configuration types for the estimator and its filter stages.
//!
//! All configuration is plain serde-serialisable data so deployments can keep
//! their tuning in JSON, YAML, or TOML files next to the robot launch setup.
//! Defaults match a consumer-grade MEMS IMU on a small legged or wheeled
//! platform; every field can be overridden per robot.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use nalgebra::{Matrix3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// Which invariant error parameterisation the filter runs.
///
/// `LeftInvariant` places the error on the left of the state
/// (`X_hat = exp(xi) * X`, a world-frame error); `RightInvariant` places it on
/// the right (`X_hat = X * exp(xi)`, a body-frame error). The choice fixes the
/// linearised error dynamics during propagation and the retraction used by
/// every correction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    #[default]
    LeftInvariant,
    RightInvariant,
}

/// Continuous-time process noise densities, as standard deviations.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseParams {
    /// Gyroscope white noise, rad/s/sqrt(Hz).
    pub gyro_std: f64,
    /// Accelerometer white noise, m/s^2/sqrt(Hz).
    pub accel_std: f64,
    /// Gyroscope bias random walk, rad/s^2/sqrt(Hz).
    pub gyro_bias_std: f64,
    /// Accelerometer bias random walk, m/s^3/sqrt(Hz).
    pub accel_bias_std: f64,
    /// Contact-foot slip noise, m/s/sqrt(Hz).
    pub contact_std: f64,
}

impl Default for NoiseParams {
    fn default() -> Self {
        NoiseParams {
            gyro_std: 0.01,
            accel_std: 0.1,
            gyro_bias_std: 1e-5,
            accel_bias_std: 1e-4,
            contact_std: 0.1,
        }
    }
}

impl NoiseParams {
    pub fn gyro_cov(&self) -> Matrix3<f64> {
        Matrix3::identity() * self.gyro_std * self.gyro_std
    }

    pub fn accel_cov(&self) -> Matrix3<f64> {
        Matrix3::identity() * self.accel_std * self.accel_std
    }

    pub fn gyro_bias_cov(&self) -> Matrix3<f64> {
        Matrix3::identity() * self.gyro_bias_std * self.gyro_bias_std
    }

    pub fn accel_bias_cov(&self) -> Matrix3<f64> {
        Matrix3::identity() * self.accel_bias_std * self.accel_bias_std
    }

    pub fn contact_cov(&self) -> Matrix3<f64> {
        Matrix3::identity() * self.contact_std * self.contact_std
    }
}

/// Settings for the inertial propagation stage.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ImuPropagationConfig {
    /// Estimate gyroscope and accelerometer biases online.
    pub estimate_bias: bool,
    /// Initialise biases by averaging samples while the robot is static.
    pub static_bias_initialization: bool,
    /// Number of samples averaged during static bias initialisation.
    pub bias_init_samples: usize,
    /// Largest accepted inter-sample gap in seconds; larger gaps are clamped.
    pub max_dt: f64,
    /// Gravity vector in the world frame, m/s^2.
    pub gravity: [f64; 3],
    /// IMU-to-body extrinsic: translation (m) then roll, pitch, yaw (rad).
    pub imu_to_body: [f64; 6],
    /// Use the IMU's orientation estimate for the initial rotation instead of
    /// identity.
    pub use_imu_orientation_for_init: bool,
}

impl Default for ImuPropagationConfig {
    fn default() -> Self {
        ImuPropagationConfig {
            estimate_bias: true,
            static_bias_initialization: true,
            bias_init_samples: 250,
            max_dt: 1.0,
            gravity: [0.0, 0.0, -9.81],
            imu_to_body: [0.0; 6],
            use_imu_orientation_for_init: false,
        }
    }
}

impl ImuPropagationConfig {
    pub fn gravity_vector(&self) -> Vector3<f64> {
        Vector3::new(self.gravity[0], self.gravity[1], self.gravity[2])
    }

    pub fn imu_to_body_rotation(&self) -> Matrix3<f64> {
        *Rotation3::from_euler_angles(self.imu_to_body[3], self.imu_to_body[4], self.imu_to_body[5])
            .matrix()
    }

    pub fn imu_to_body_translation(&self) -> Vector3<f64> {
        Vector3::new(self.imu_to_body[0], self.imu_to_body[1], self.imu_to_body[2])
    }
}

/// Settings for the absolute-position correction.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionCorrectionConfig {
    /// Default per-axis measurement standard deviation, meters. Used when a
    /// measurement does not carry its own covariance.
    pub position_std: f64,
    /// WGS84 reference (latitude deg, longitude deg, altitude m) anchoring
    /// the local world frame for geodetic fixes. Conversion happens on the
    /// adapter side; this is recorded here so one config file describes the
    /// whole correction.
    pub reference: Option<[f64; 3]>,
}

impl Default for PositionCorrectionConfig {
    fn default() -> Self {
        PositionCorrectionConfig {
            position_std: 0.1,
            reference: None,
        }
    }
}

impl PositionCorrectionConfig {
    pub fn covariance(&self) -> Matrix3<f64> {
        Matrix3::identity() * self.position_std * self.position_std
    }
}

/// Settings for the legged-kinematics correction.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct KinematicsCorrectionConfig {
    /// Joint encoder noise, radians.
    pub encoder_std: f64,
    /// Prior foot-position noise added on top of the encoder-propagated
    /// term, meters.
    pub prior_std: f64,
}

impl Default for KinematicsCorrectionConfig {
    fn default() -> Self {
        KinematicsCorrectionConfig {
            encoder_std: 0.01,
            prior_std: 0.01,
        }
    }
}

impl KinematicsCorrectionConfig {
    pub fn prior_cov(&self) -> Matrix3<f64> {
        Matrix3::identity() * self.prior_std * self.prior_std
    }
}

/// Diagonal blocks used to seed the covariance at state initialisation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialCovariance {
    pub rotation: f64,
    pub velocity: f64,
    pub position: f64,
    pub gyro_bias: f64,
    pub accel_bias: f64,
}

impl Default for InitialCovariance {
    fn default() -> Self {
        InitialCovariance {
            rotation: 0.03,
            velocity: 0.01,
            position: 1e-5,
            gyro_bias: 1e-4,
            accel_bias: 2.5e-3,
        }
    }
}

/// Top-level estimator configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub error_type: ErrorType,
    pub noise: NoiseParams,
    pub initial_covariance: InitialCovariance,
}

impl EstimatorConfig {
    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }

    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }

    /// Write the configuration as YAML.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }

    /// Read the configuration from YAML.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }

    /// Write the configuration as TOML.
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }

    /// Read the configuration from TOML.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(io::Error::other)
    }

    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml).
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        let ext = p
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase());
        match ext.as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported config extension (expected .json, .yaml, .yml, or .toml)",
            )),
        }
    }
}
