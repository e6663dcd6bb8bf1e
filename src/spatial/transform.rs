use std::ops::Mul;

use na::{Isometry3, Matrix3, Translation3, UnitQuaternion, Vector3};

use crate::types::Float;

/// Rigid change of coordinates between two named frames: a point given in
/// `from` is mapped to its coordinates in `to`.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform3D {
    pub from: String,
    pub to: String,
    pub iso: Isometry3<Float>,
}

impl Transform3D {
    pub fn new(from: &str, to: &str, iso: &Isometry3<Float>) -> Self {
        Transform3D {
            from: from.to_string(),
            to: to.to_string(),
            iso: *iso,
        }
    }

    /// Translation xyz, then roll-pitch-yaw rotation
    pub fn new_xyz_rpy(from: &str, to: &str, xyz: &[Float; 3], rpy: &[Float; 3]) -> Self {
        let iso = Isometry3::from_parts(
            Translation3::from(Vector3::from(*xyz)),
            UnitQuaternion::from_euler_angles(rpy[0], rpy[1], rpy[2]),
        );
        Transform3D::new(from, to, &iso)
    }

    pub fn identity(from: &str, to: &str) -> Self {
        Transform3D::new(from, to, &Isometry3::identity())
    }

    pub fn move_xyz(from: &str, to: &str, x: Float, y: Float, z: Float) -> Self {
        Transform3D::new(from, to, &Isometry3::translation(x, y, z))
    }

    pub fn inv(&self) -> Self {
        Transform3D::new(&self.to, &self.from, &self.iso.inverse())
    }

    pub fn rot(&self) -> Matrix3<Float> {
        *self.iso.rotation.to_rotation_matrix().matrix()
    }

    pub fn trans(&self) -> Vector3<Float> {
        self.iso.translation.vector
    }

    pub fn transform_point(&self, point: &Vector3<Float>) -> Vector3<Float> {
        self.iso.transform_point(&(*point).into()).coords
    }

    /// Panics unless `frame` is the frame this transform maps from
    pub(crate) fn check_source(&self, quantity: &str, frame: &str) {
        if frame != self.from {
            panic!(
                "{} is expressed in {} but the transform maps from {}",
                quantity, frame, self.from
            );
        }
    }

    /// Motion vector [w; v] in `to` coordinates: [R w; R v + p x R w]
    pub(crate) fn map_motion(
        &self,
        angular: &Vector3<Float>,
        linear: &Vector3<Float>,
    ) -> (Vector3<Float>, Vector3<Float>) {
        let angular = self.iso.rotation * angular;
        let linear = self.iso.rotation * linear + self.trans().cross(&angular);
        (angular, linear)
    }

    /// Force vector [n; f] in `to` coordinates: [R n + p x R f; R f]
    pub(crate) fn map_force(
        &self,
        angular: &Vector3<Float>,
        linear: &Vector3<Float>,
    ) -> (Vector3<Float>, Vector3<Float>) {
        let linear = self.iso.rotation * linear;
        let angular = self.iso.rotation * angular + self.trans().cross(&linear);
        (angular, linear)
    }
}

impl<'a, 'b> Mul<&'b Transform3D> for &'a Transform3D {
    type Output = Transform3D;

    /// Chains `rhs` (a to b) with `self` (b to c) into a to c
    fn mul(self, rhs: &'b Transform3D) -> Transform3D {
        if rhs.to != self.from {
            panic!("cannot chain {} -> {} with {} -> {}", rhs.from, rhs.to, self.from, self.to);
        }
        Transform3D::new(&rhs.from, &self.to, &(self.iso * rhs.iso))
    }
}

impl Mul for Transform3D {
    type Output = Transform3D;

    fn mul(self, rhs: Self) -> Transform3D {
        &self * &rhs
    }
}
