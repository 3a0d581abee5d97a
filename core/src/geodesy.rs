//! Geodetic conversions for absolute position fixes.
//!
//! Absolute position sources (GNSS receivers, surveyed markers) report WGS84
//! geodetic coordinates, while the filter state lives in a local tangent-plane
//! world frame anchored at a configured reference point. This module converts
//! a (latitude, longitude, altitude) fix into east-north-up metres about that
//! reference. The `nav-types` crate handles the ellipsoidal WGS84-to-ECEF
//! conversion; the ECEF-to-local rotation is assembled directly since the
//! filter also needs it for covariance handling.
//!
//! The tangent-plane approximation is accurate for excursions of a few tens
//! of kilometres about the reference, which covers the operating envelope of
//! the mobile robots this estimator targets.

use nalgebra::{Matrix3, Vector3};
use nav_types::{ECEF, WGS84};

/// A WGS84 reference point anchoring the local world frame.
#[derive(Clone, Copy, Debug)]
pub struct GeodeticReference {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Altitude in meters above the ellipsoid.
    pub altitude: f64,
}

impl GeodeticReference {
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        GeodeticReference {
            latitude,
            longitude,
            altitude,
        }
    }

    /// Rotation from the ECEF frame to the local east-north-up frame at this
    /// reference point.
    pub fn ecef_to_enu_rotation(&self) -> Matrix3<f64> {
        let lat = self.latitude.to_radians();
        let lon = self.longitude.to_radians();
        let mut rot = Matrix3::zeros();
        rot[(0, 0)] = -lon.sin();
        rot[(0, 1)] = lon.cos();
        rot[(1, 0)] = -lat.sin() * lon.cos();
        rot[(1, 1)] = -lat.sin() * lon.sin();
        rot[(1, 2)] = lat.cos();
        rot[(2, 0)] = lat.cos() * lon.cos();
        rot[(2, 1)] = lat.cos() * lon.sin();
        rot[(2, 2)] = lat.sin();
        rot
    }

    /// Convert a geodetic fix to east-north-up meters about this reference.
    pub fn to_enu(&self, latitude: f64, longitude: f64, altitude: f64) -> Vector3<f64> {
        let reference: ECEF<f64> =
            ECEF::from(WGS84::from_degrees_and_meters(self.latitude, self.longitude, self.altitude));
        let point: ECEF<f64> =
            ECEF::from(WGS84::from_degrees_and_meters(latitude, longitude, altitude));
        let delta = Vector3::new(
            point.x() - reference.x(),
            point.y() - reference.y(),
            point.z() - reference.z(),
        );
        self.ecef_to_enu_rotation() * delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn reference_maps_to_origin() {
        let reference = GeodeticReference::new(42.3, -83.7, 270.0);
        let enu = reference.to_enu(42.3, -83.7, 270.0);
        assert_approx_eq!(enu.norm(), 0.0, 1e-9);
    }

    #[test]
    fn northward_displacement_is_positive_north() {
        let reference = GeodeticReference::new(0.0, 0.0, 0.0);
        // One degree of latitude is roughly 110.57 km at the equator.
        let enu = reference.to_enu(1.0, 0.0, 0.0);
        assert!(enu[1] > 110_000.0 && enu[1] < 111_500.0);
        assert_approx_eq!(enu[0], 0.0, 1.0);
    }

    #[test]
    fn altitude_maps_to_up() {
        let reference = GeodeticReference::new(45.0, 7.0, 100.0);
        let enu = reference.to_enu(45.0, 7.0, 110.0);
        assert_approx_eq!(enu[2], 10.0, 1e-3);
        assert!(enu.fixed_rows::<2>(0).norm() < 0.1);
    }

    #[test]
    fn enu_rotation_is_orthonormal() {
        let reference = GeodeticReference::new(37.0, -122.0, 0.0);
        let rot = reference.ecef_to_enu_rotation();
        let identity = rot * rot.transpose();
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_approx_eq!(identity[(i, j)], expected, 1e-12);
            }
        }
    }
}
