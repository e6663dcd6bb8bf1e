use na::{Isometry3, Matrix3xX};

use crate::{
    spatial::{
        geometric_jacobian::GeometricJacobian, pose::Pose, spatial_vector::SpatialVector,
        transform::Transform3D,
    },
    types::Float,
};

/// Six-DoF joint carrying the robot root. `pose` is applied on top of the
/// mounting transform; `velocity` is the root twist in the root frame.
pub struct FloatingJoint {
    pub name: String,
    pub mounting: Isometry3<Float>,
    pub transform: Transform3D,

    pub pose: Pose,
    pub velocity: SpatialVector,
}

impl FloatingJoint {
    pub fn new(name: &str, transform: Transform3D) -> Self {
        FloatingJoint {
            name: name.to_string(),
            mounting: transform.iso,
            transform,
            pose: Pose::identity(),
            velocity: SpatialVector::zero(),
        }
    }

    pub fn update(&mut self) {
        self.transform.iso = self.mounting * self.pose.to_isometry();
    }

    /// Identity: angular velocity drives the first three columns and linear
    /// velocity the last three
    pub fn motion_subspace(&self) -> GeometricJacobian {
        let angular = Matrix3xX::from_fn(6, |row, col| if row == col { 1. } else { 0. });
        let linear = Matrix3xX::from_fn(6, |row, col| if row + 3 == col { 1. } else { 0. });
        let root = &self.transform.from;
        GeometricJacobian::new(root, &self.transform.to, root, angular, linear)
    }
}
