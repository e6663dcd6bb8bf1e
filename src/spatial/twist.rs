use na::Vector3;

use crate::{
    spatial::{
        relative_motion_ops, spatial_acceleration::SpatialAcceleration,
        spatial_vector::SpatialVector, transform::Transform3D,
    },
    types::Float,
};

/// Velocity of `body` relative to `base`, in the coordinates of `frame`.
/// `linear` is the velocity of the body-fixed point currently at the origin
/// of `frame`.
#[derive(PartialEq, Debug, Clone)]
pub struct Twist {
    pub body: String,
    pub base: String,
    pub frame: String,
    pub angular: Vector3<Float>,
    pub linear: Vector3<Float>,
}

relative_motion_ops!(Twist);

impl Twist {
    pub fn new(body: &str, base: &str, frame: &str, angular: Vector3<Float>, linear: Vector3<Float>) -> Self {
        Twist {
            body: body.to_string(),
            base: base.to_string(),
            frame: frame.to_string(),
            angular,
            linear,
        }
    }

    pub fn zero(body: &str, base: &str, frame: &str) -> Self {
        Twist::new(body, base, frame, Vector3::zeros(), Vector3::zeros())
    }

    pub fn transform(&self, transform: &Transform3D) -> Twist {
        transform.check_source("twist", &self.frame);
        let (angular, linear) = transform.map_motion(&self.angular, &self.linear);
        Twist::new(&self.body, &self.base, &transform.to, angular, linear)
    }

    /// Spatial cross product self x rhs. Chaining a parent twist with a
    /// joint twist this way gives the joint's velocity-product acceleration.
    pub fn cross(&self, rhs: &Twist) -> SpatialAcceleration {
        if self.frame != rhs.frame {
            panic!("twists in {} and {} cannot be crossed", self.frame, rhs.frame);
        }
        let product = self.as_spatial_vector().cross_motion(&rhs.as_spatial_vector());
        SpatialAcceleration::new(&rhs.body, &rhs.base, &self.frame, product.angular, product.linear)
    }

    /// Velocity of the body-fixed point at `point` (frame coordinates)
    pub fn point_velocity(&self, point: &Vector3<Float>) -> Vector3<Float> {
        self.linear + self.angular.cross(point)
    }

    pub fn as_spatial_vector(&self) -> SpatialVector {
        SpatialVector::new(self.angular, self.linear)
    }
}

#[cfg(test)]
#[rustfmt::skip]
mod twist_tests {
    use na::vector;

    use crate::{assert_vec_close, PI};

    use super::*;

    #[test]
    fn spin_about_an_offset_axis_moves_the_origin() {
        // Arrange
        let twist_in_body = Twist::new("body", "base", "body", vector![0., 1., 0.], vector![0., 0., 0.]);
        let transform = Transform3D::new_xyz_rpy("body", "root", &[5., 0., 0.], &[PI / 2., 0., 0.]);

        // Act
        let twist_in_root = twist_in_body.transform(&transform);

        // Assert
        assert_eq!(twist_in_root.frame, "root");
        assert_vec_close!(twist_in_root.angular, vector![0., 0., 1.], 1e-12);
        assert_vec_close!(twist_in_root.linear, vector![0., -5., 0.], 1e-12);
    }

    #[test]
    fn relative_twist_by_subtraction() {
        // Arrange
        let a = Twist::new("foot", "world", "world", vector![0., 0., 2.], vector![1., 0., 0.]);
        let b = Twist::new("pelvis", "world", "world", vector![0., 0., 0.5], vector![0.5, 0., 0.]);

        // Act
        let rel = &a - &b;
        let recomposed = &b + &rel;

        // Assert
        assert_eq!((rel.body.as_str(), rel.base.as_str()), ("foot", "pelvis"));
        assert_vec_close!(rel.angular, vector![0., 0., 1.5], 1e-12);
        assert_eq!(recomposed, a);
    }

    #[test]
    #[should_panic(expected = "cannot compose")]
    fn composing_unrelated_twists_panics() {
        let a = Twist::zero("foot", "world", "world");
        let b = Twist::zero("hand", "world", "world");
        let _ = &a + &b;
    }

    #[test]
    fn point_velocity_adds_rotational_part() {
        let twist = Twist::new("b", "world", "world", vector![0., 0., 1.], vector![1., 0., 0.]);
        assert_vec_close!(twist.point_velocity(&vector![1., 0., 0.]), vector![1., 1., 0.], 1e-12);
    }
}
