use floating::FloatingJoint;
use na::DVector;
use one_dof::OneDoFJoint;

use crate::{
    controller_core::lowlevel::OneDoFJointDesiredData,
    spatial::{geometric_jacobian::GeometricJacobian, transform::Transform3D},
    types::Float,
};

pub mod floating;
pub mod one_dof;

/// Position of a joint in the mechanism's tree joint list
pub type JointId = usize;

/// Measured state, limits and last written desireds of a one-DoF joint
#[derive(Clone, Debug, PartialEq)]
pub struct OneDoFJointState {
    pub q: Float,
    pub v: Float,
    pub lower_limit: Float,
    pub upper_limit: Float,
    pub desired: OneDoFJointDesiredData,
}

impl OneDoFJointState {
    pub fn new() -> Self {
        OneDoFJointState {
            q: 0.,
            v: 0.,
            lower_limit: Float::NEG_INFINITY,
            upper_limit: Float::INFINITY,
            desired: OneDoFJointDesiredData::default(),
        }
    }

    pub fn has_finite_limits(&self) -> bool {
        self.lower_limit.is_finite() && self.upper_limit.is_finite()
    }
}

impl Default for OneDoFJointState {
    fn default() -> Self {
        Self::new()
    }
}

pub enum Joint {
    OneDoF(OneDoFJoint),
    Floating(FloatingJoint),
}

impl Joint {
    pub fn name(&self) -> &str {
        match self {
            Joint::OneDoF(joint) => &joint.name,
            Joint::Floating(joint) => &joint.name,
        }
    }

    /// Successor body frame to predecessor body frame
    pub fn transform(&self) -> &Transform3D {
        match self {
            Joint::OneDoF(joint) => &joint.transform,
            Joint::Floating(joint) => &joint.transform,
        }
    }

    pub fn successor(&self) -> &str {
        &self.transform().from
    }

    pub fn predecessor(&self) -> &str {
        &self.transform().to
    }

    pub fn dof(&self) -> usize {
        match self {
            Joint::OneDoF(_) => 1,
            Joint::Floating(_) => 6,
        }
    }

    pub fn is_floating(&self) -> bool {
        matches!(self, Joint::Floating(_))
    }

    /// In the successor frame
    pub fn motion_subspace(&self) -> GeometricJacobian {
        match self {
            Joint::OneDoF(joint) => joint.motion_subspace(),
            Joint::Floating(joint) => joint.motion_subspace(),
        }
    }

    pub fn one_dof(&self) -> &OneDoFJointState {
        match self {
            Joint::OneDoF(joint) => &joint.state,
            Joint::Floating(joint) => panic!("joint {} is not a one-DoF joint", joint.name),
        }
    }

    pub fn one_dof_mut(&mut self) -> &mut OneDoFJointState {
        match self {
            Joint::OneDoF(joint) => &mut joint.state,
            Joint::Floating(joint) => panic!("joint {} is not a one-DoF joint", joint.name),
        }
    }

    /// Velocity in motion subspace coordinates
    pub fn velocity(&self) -> DVector<Float> {
        match self {
            Joint::OneDoF(joint) => DVector::from_element(1, joint.state.v),
            Joint::Floating(joint) => joint.velocity.as_dvector(),
        }
    }

    /// Refresh the joint transform from the configuration
    pub fn update(&mut self) {
        match self {
            Joint::OneDoF(joint) => joint.update(),
            Joint::Floating(joint) => joint.update(),
        }
    }
}

#[cfg(test)]
mod joint_tests {
    use na::Vector3;

    use crate::{spatial::transform::Transform3D, WORLD_FRAME};

    use super::*;

    fn root() -> Joint {
        Joint::Floating(FloatingJoint::new(
            "root",
            Transform3D::identity("pelvis", WORLD_FRAME),
        ))
    }

    #[test]
    #[should_panic(expected = "not a one-DoF joint")]
    fn one_dof_state_of_the_root_panics() {
        root().one_dof();
    }

    #[test]
    fn degrees_of_freedom_follow_the_joint_kind() {
        let hip = Joint::OneDoF(OneDoFJoint::revolute(
            "hip",
            Transform3D::identity("thigh", "pelvis"),
            Vector3::y_axis(),
        ));
        assert_eq!(hip.dof(), 1);
        assert!(!hip.is_floating());
        assert_eq!((hip.successor(), hip.predecessor()), ("thigh", "pelvis"));
        assert_eq!(root().dof(), 6);
        assert_eq!(root().velocity().len(), 6);
        assert_eq!(root().motion_subspace().to_matrix(), na::DMatrix::<Float>::identity(6, 6));
    }
}
