use std::ops::{AddAssign, SubAssign};

use na::Vector3;

use crate::{
    spatial::{spatial_vector::SpatialVector, transform::Transform3D},
    types::Float,
};

/// Resultant of a system of forces, in the coordinates of `frame`:
/// `angular` is the total moment about the frame origin and `linear` the
/// total force.
#[derive(Debug, Clone, PartialEq)]
pub struct Wrench {
    pub frame: String,
    pub angular: Vector3<Float>,
    pub linear: Vector3<Float>,
}

impl Wrench {
    pub fn new(frame: &str, angular: Vector3<Float>, linear: Vector3<Float>) -> Self {
        Wrench {
            frame: frame.to_string(),
            angular,
            linear,
        }
    }

    pub fn zero(frame: &str) -> Self {
        Wrench::new(frame, Vector3::zeros(), Vector3::zeros())
    }

    /// Force applied at `point`
    pub fn from_force(point: &Vector3<Float>, force: &Vector3<Float>, frame: &str) -> Self {
        Wrench::new(frame, point.cross(force), *force)
    }

    pub fn transform(&self, transform: &Transform3D) -> Wrench {
        transform.check_source("wrench", &self.frame);
        let (angular, linear) = transform.map_force(&self.angular, &self.linear);
        Wrench::new(&transform.to, angular, linear)
    }

    pub fn as_spatial_vector(&self) -> SpatialVector {
        SpatialVector::new(self.angular, self.linear)
    }

    fn check_same_frame(&self, rhs: &Wrench) {
        if self.frame != rhs.frame {
            panic!("wrenches in {} and {} cannot be combined", self.frame, rhs.frame);
        }
    }
}

impl AddAssign<&Wrench> for Wrench {
    fn add_assign(&mut self, rhs: &Wrench) {
        self.check_same_frame(rhs);
        self.angular += rhs.angular;
        self.linear += rhs.linear;
    }
}

impl SubAssign<&Wrench> for Wrench {
    fn sub_assign(&mut self, rhs: &Wrench) {
        self.check_same_frame(rhs);
        self.angular -= rhs.angular;
        self.linear -= rhs.linear;
    }
}

#[cfg(test)]
mod wrench_tests {
    use na::vector;

    use crate::{assert_vec_close, PI, WORLD_FRAME};

    use super::*;

    #[test]
    fn force_at_offset_point_moves_to_origin() {
        // Arrange
        let w = Wrench::from_force(&vector![0., 0., 0.], &vector![0., 0., 10.], "foot");
        let foot_to_world = Transform3D::new_xyz_rpy("foot", WORLD_FRAME, &[1., 0., 0.], &[0., 0., PI]);

        // Act
        let w_world = w.transform(&foot_to_world);

        // Assert
        assert_vec_close!(w_world.linear, vector![0., 0., 10.], 1e-12);
        assert_vec_close!(w_world.angular, vector![0., -10., 0.], 1e-12);
    }

    #[test]
    fn opposite_forces_at_two_points_leave_a_couple() {
        let mut w = Wrench::from_force(&vector![0., 1., 0.], &vector![1., 0., 0.], WORLD_FRAME);
        w -= &Wrench::from_force(&vector![0., -1., 0.], &vector![1., 0., 0.], WORLD_FRAME);

        assert_vec_close!(w.linear, vector![0., 0., 0.], 1e-12);
        assert_vec_close!(w.angular, vector![0., 0., -2.], 1e-12);
    }
}
