use na::{Isometry3, Matrix3xX, Translation3, UnitQuaternion, UnitVector3};

use crate::{
    joint::OneDoFJointState,
    spatial::{geometric_jacobian::GeometricJacobian, transform::Transform3D},
    types::Float,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OneDoFJointType {
    Revolute,
    Prismatic,
}

/// Hinge or slider between a predecessor and a successor body. The axis is
/// expressed in the successor frame, which is also the joint frame.
pub struct OneDoFJoint {
    pub name: String,
    pub joint_type: OneDoFJointType,
    /// Successor to predecessor at q = 0
    pub zero_configuration: Isometry3<Float>,
    /// Successor to predecessor at the current q
    pub transform: Transform3D,
    pub axis: UnitVector3<Float>,

    pub state: OneDoFJointState,
}

impl OneDoFJoint {
    pub fn revolute(name: &str, transform: Transform3D, axis: UnitVector3<Float>) -> Self {
        Self::with_type(OneDoFJointType::Revolute, name, transform, axis)
    }

    pub fn prismatic(name: &str, transform: Transform3D, axis: UnitVector3<Float>) -> Self {
        Self::with_type(OneDoFJointType::Prismatic, name, transform, axis)
    }

    fn with_type(
        joint_type: OneDoFJointType,
        name: &str,
        transform: Transform3D,
        axis: UnitVector3<Float>,
    ) -> Self {
        OneDoFJoint {
            name: name.to_string(),
            joint_type,
            zero_configuration: transform.iso,
            transform,
            axis,
            state: OneDoFJointState::new(),
        }
    }

    pub fn with_limits(mut self, lower: Float, upper: Float) -> Self {
        self.state.lower_limit = lower;
        self.state.upper_limit = upper;
        self
    }

    /// Single column: the axis in the angular rows for a hinge, in the
    /// linear rows for a slider
    pub fn motion_subspace(&self) -> GeometricJacobian {
        let axis = Matrix3xX::from_column_slice(self.axis.as_slice());
        let (angular, linear) = match self.joint_type {
            OneDoFJointType::Revolute => (axis, Matrix3xX::zeros(1)),
            OneDoFJointType::Prismatic => (Matrix3xX::zeros(1), axis),
        };
        let successor = &self.transform.from;
        GeometricJacobian::new(successor, &self.transform.to, successor, angular, linear)
    }

    pub fn update(&mut self) {
        let q = self.state.q;
        let displacement = match self.joint_type {
            OneDoFJointType::Revolute => {
                Isometry3::from_parts(Translation3::identity(), UnitQuaternion::from_axis_angle(&self.axis, q))
            }
            OneDoFJointType::Prismatic => {
                Isometry3::from_parts(Translation3::from(self.axis.into_inner() * q), UnitQuaternion::identity())
            }
        };
        self.transform.iso = self.zero_configuration * displacement;
    }
}
