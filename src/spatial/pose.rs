use na::{Isometry3, Translation3, UnitQuaternion, Vector3};

use crate::types::Float;

/// Orientation and position of a frame, e.g. the floating root in world
#[derive(Clone, Debug, PartialEq, Copy)]
pub struct Pose {
    pub rotation: UnitQuaternion<Float>,
    pub translation: Vector3<Float>,
}

impl Pose {
    pub fn identity() -> Self {
        Pose {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn to_isometry(&self) -> Isometry3<Float> {
        Isometry3::from_parts(Translation3::from(self.translation), self.rotation)
    }

    /// One explicit step under a twist held constant over dt. Both velocities
    /// are in the moving frame, `linear` being that of its origin.
    pub fn integrate(&self, angular: &Vector3<Float>, linear: &Vector3<Float>, dt: Float) -> Pose {
        Pose {
            rotation: self.rotation * UnitQuaternion::from_scaled_axis(angular * dt),
            translation: self.translation + self.rotation * linear * dt,
        }
    }
}
