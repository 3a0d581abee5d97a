//! Forward-kinematics collaborator interface.
//!
//! Robot-specific kinematics live outside this crate: each robot supplies an
//! evaluator that, given the joint encoder vector, reports every foot's
//! position in the body frame together with the position Jacobian with
//! respect to the encoders. The kinematics correction is the only caller.

use nalgebra::{DVector, Matrix3xX, Vector3};

/// One leg's forward-kinematics result.
#[derive(Clone, Debug)]
pub struct LegJacobian {
    /// Foot position in the body frame, meters.
    pub position: Vector3<f64>,
    /// Jacobian of the foot position with respect to the encoder vector,
    /// 3 x n_joints.
    pub jacobian: Matrix3xX<f64>,
}

/// Per-robot forward-kinematics evaluator.
pub trait ForwardKinematics: Send {
    /// Number of legs this robot has. Kinematics measurements must carry
    /// exactly this many contact flags.
    fn num_legs(&self) -> usize;

    /// Evaluate foot position and Jacobian for `leg` at the given encoder
    /// vector.
    fn leg(&self, leg: usize, encoders: &DVector<f64>) -> LegJacobian;
}

#[cfg(test)]
pub mod testing {
    //! A trivially linear leg model for exercising the kinematics correction
    //! without a real robot.

    use super::*;

    /// Each leg's foot sits at a fixed body-frame offset plus a unit-gain
    /// contribution from its three dedicated joints.
    pub struct LinearLegModel {
        pub offsets: Vec<Vector3<f64>>,
    }

    impl LinearLegModel {
        pub fn new(offsets: Vec<Vector3<f64>>) -> Self {
            LinearLegModel { offsets }
        }
    }

    impl ForwardKinematics for LinearLegModel {
        fn num_legs(&self) -> usize {
            self.offsets.len()
        }

        fn leg(&self, leg: usize, encoders: &DVector<f64>) -> LegJacobian {
            let joints = encoders.len();
            let base = 3 * leg;
            let mut position = self.offsets[leg];
            let mut jacobian = Matrix3xX::zeros(joints);
            for axis in 0..3 {
                if base + axis < joints {
                    position[axis] += encoders[base + axis];
                    jacobian[(axis, base + axis)] = 1.0;
                }
            }
            LegJacobian { position, jacobian }
        }
    }
}
