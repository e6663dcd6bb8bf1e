use na::{DMatrix, Matrix3, Matrix6, Vector3};

use crate::{
    spatial::{
        geometric_jacobian::GeometricJacobian, spatial_vector::SpatialVector,
        transform::Transform3D, twist::Twist,
    },
    types::Float,
    util::skew_symmetric,
};

/// Mass distribution of a rigid body, in a given frame:
///     I = | J       [c]x |
///         | [c]x^T   m 1 |
/// `moment` is J, the rotational inertia about the frame origin (not about
/// the center of mass), and `cross_part` is c = m * com.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialInertia {
    pub frame: String,
    pub moment: Matrix3<Float>,
    pub cross_part: Vector3<Float>,
    pub mass: Float,
}

impl SpatialInertia {
    pub fn new(moment: Matrix3<Float>, cross_part: Vector3<Float>, mass: Float, frame: &str) -> Self {
        SpatialInertia {
            frame: frame.to_string(),
            moment,
            cross_part,
            mass,
        }
    }

    pub fn zero(frame: &str) -> Self {
        SpatialInertia::new(Matrix3::zeros(), Vector3::zeros(), 0., frame)
    }

    /// Solid box with edge lengths (w, d, h) along x, y, z, centered at the
    /// frame origin
    pub fn cuboid(mass: Float, w: Float, d: Float, h: Float, frame: &str) -> Self {
        let [wx, dy, hz] = [w * w, d * d, h * h];
        let moment = Matrix3::from_diagonal(&Vector3::new(dy + hz, wx + hz, wx + dy)) * (mass / 12.);
        SpatialInertia::new(moment, Vector3::zeros(), mass, frame)
    }

    pub fn point_mass(mass: Float, point: &Vector3<Float>, frame: &str) -> Self {
        let p = skew_symmetric(point);
        SpatialInertia::new(-mass * p * p, mass * point, mass, frame)
    }

    /// Re-express in the `to` frame of the transform. With y = R x + p for
    /// every material point x:
    ///     J' = R J R^T - [p][Rc] - [Rc][p] - m [p]^2,    c' = R c + m p
    pub fn transform(&self, transform: &Transform3D) -> SpatialInertia {
        transform.check_source("spatial inertia", &self.frame);

        let R = transform.rot();
        let p = skew_symmetric(&transform.trans());
        let c = R * self.cross_part;
        let c_hat = skew_symmetric(&c);
        let moment = R * self.moment * R.transpose() - p * c_hat - c_hat * p - self.mass * p * p;

        SpatialInertia::new(
            moment,
            c + self.mass * transform.trans(),
            self.mass,
            &transform.to,
        )
    }

    /// I [w; v]: the momentum of a body moving with motion [w; v]
    pub fn mul_motion(&self, motion: &SpatialVector) -> SpatialVector {
        SpatialVector::new(
            self.moment * motion.angular + self.cross_part.cross(&motion.linear),
            self.mass * motion.linear - self.cross_part.cross(&motion.angular),
        )
    }

    pub fn momentum(&self, twist: &Twist) -> SpatialVector {
        if self.frame != twist.frame {
            panic!("inertia in {} applied to a twist in {}", self.frame, twist.frame);
        }
        self.mul_motion(&twist.as_spatial_vector())
    }

    /// 6 x n momentum matrix I J, so that I J v is the body momentum
    pub fn momentum_matrix(&self, jacobian: &GeometricJacobian) -> DMatrix<Float> {
        if self.frame != jacobian.frame {
            panic!("inertia in {} applied to a jacobian in {}", self.frame, jacobian.frame);
        }
        let I = self.to_matrix();
        DMatrix::from_fn(6, 6, |r, c| I[(r, c)]) * jacobian.to_matrix()
    }

    pub fn to_matrix(&self) -> Matrix6<Float> {
        let c = skew_symmetric(&self.cross_part);
        let mut I = Matrix6::zeros();
        I.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.moment);
        I.fixed_view_mut::<3, 3>(0, 3).copy_from(&c);
        I.fixed_view_mut::<3, 3>(3, 0).copy_from(&c.transpose());
        I.fixed_view_mut::<3, 3>(3, 3).fill_diagonal(self.mass);
        I
    }
}

#[cfg(test)]
mod inertia_tests {
    use na::vector;

    use crate::{assert_close, assert_vec_close, util::test_utils::random_vector, WORLD_FRAME};

    use super::*;

    #[test]
    fn moved_point_mass_equals_point_mass_at_the_new_location() {
        // Arrange
        let m = 3.0;
        let body = SpatialInertia::point_mass(m, &vector![0.5, 0., 0.], "body");
        let body_to_world =
            Transform3D::new_xyz_rpy("body", WORLD_FRAME, &[1., 2., 3.], &[0., 0., crate::PI / 2.]);

        // Act
        let in_world = body.transform(&body_to_world);

        // Assert
        let expected = SpatialInertia::point_mass(m, &vector![1., 2.5, 3.], WORLD_FRAME);
        assert_vec_close!(in_world.moment, expected.moment, 1e-12);
        assert_vec_close!(in_world.cross_part, expected.cross_part, 1e-12);
        assert_close!(in_world.mass, m, 1e-12);
    }

    #[test]
    fn kinetic_energy_does_not_depend_on_the_frame() {
        // Arrange
        let mut rng = rand::rng();
        let inertia = SpatialInertia::cuboid(2.0, 0.3, 0.2, 0.5, "body");
        let twist = Twist::new(
            "body",
            WORLD_FRAME,
            "body",
            random_vector(&mut rng, 1.),
            random_vector(&mut rng, 1.),
        );
        let body_to_world =
            Transform3D::new_xyz_rpy("body", WORLD_FRAME, &[0.3, -1., 2.], &[0.1, 0.4, -0.7]);

        // Act
        let e_body = twist.as_spatial_vector().dot(&inertia.momentum(&twist)) / 2.;
        let twist_world = twist.transform(&body_to_world);
        let e_world = twist_world
            .as_spatial_vector()
            .dot(&inertia.transform(&body_to_world).momentum(&twist_world))
            / 2.;

        // Assert
        assert_close!(e_body, e_world, 1e-10);
    }

    #[test]
    fn matrix_form_matches_mul_motion() {
        let mut rng = rand::rng();
        let inertia = SpatialInertia::point_mass(1.5, &random_vector(&mut rng, 1.), "b");
        let motion = SpatialVector::new(random_vector(&mut rng, 1.), random_vector(&mut rng, 1.));

        let by_matrix = inertia.to_matrix() * motion.as_vector6();

        assert_vec_close!(by_matrix, inertia.mul_motion(&motion).as_vector6(), 1e-12);
    }
}
