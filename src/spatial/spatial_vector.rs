use std::ops::{Add, Neg, Sub};

use na::{DVector, Vector3, Vector6};

use crate::types::Float;

/// Plücker coordinates [angular; linear] without frame bookkeeping, used by
/// the recursive dynamics and for root desireds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpatialVector {
    pub angular: Vector3<Float>,
    pub linear: Vector3<Float>,
}

impl SpatialVector {
    pub fn new(angular: Vector3<Float>, linear: Vector3<Float>) -> Self {
        SpatialVector { angular, linear }
    }

    pub fn zero() -> Self {
        SpatialVector::new(Vector3::zeros(), Vector3::zeros())
    }

    /// Reads six values, angular first
    pub fn from_slice(data: &[Float]) -> Self {
        match data {
            [wx, wy, wz, vx, vy, vz] => {
                SpatialVector::new(Vector3::new(*wx, *wy, *wz), Vector3::new(*vx, *vy, *vz))
            }
            _ => panic!("a spatial vector has 6 components, got {}", data.len()),
        }
    }

    pub fn as_vector6(&self) -> Vector6<Float> {
        let mut stacked = Vector6::zeros();
        stacked.fixed_rows_mut::<3>(0).copy_from(&self.angular);
        stacked.fixed_rows_mut::<3>(3).copy_from(&self.linear);
        stacked
    }

    pub fn as_dvector(&self) -> DVector<Float> {
        DVector::from_column_slice(self.as_vector6().as_slice())
    }

    /// Pairing of a motion vector with a force vector
    pub fn dot(&self, rhs: &SpatialVector) -> Float {
        self.angular.dot(&rhs.angular) + self.linear.dot(&rhs.linear)
    }

    /// Motion cross product self x m
    pub fn cross_motion(&self, m: &SpatialVector) -> SpatialVector {
        SpatialVector::new(
            self.angular.cross(&m.angular),
            self.angular.cross(&m.linear) + self.linear.cross(&m.angular),
        )
    }

    /// Force cross product self x* f
    pub fn cross_force(&self, f: &SpatialVector) -> SpatialVector {
        SpatialVector::new(
            self.angular.cross(&f.angular) + self.linear.cross(&f.linear),
            self.angular.cross(&f.linear),
        )
    }
}

impl Add for SpatialVector {
    type Output = SpatialVector;

    fn add(self, rhs: Self) -> SpatialVector {
        SpatialVector::new(self.angular + rhs.angular, self.linear + rhs.linear)
    }
}

impl Sub for SpatialVector {
    type Output = SpatialVector;

    fn sub(self, rhs: Self) -> SpatialVector {
        self + (-rhs)
    }
}

impl Neg for SpatialVector {
    type Output = SpatialVector;

    fn neg(self) -> SpatialVector {
        SpatialVector::new(-self.angular, -self.linear)
    }
}

#[cfg(test)]
mod spatial_vector_tests {
    use na::vector;

    use crate::util::test_utils::random_vector;

    use super::*;

    #[test]
    fn motion_and_force_cross_products_are_adjoint() {
        // (v x m) . f = -m . (v x* f)
        let mut rng = rand::rng();
        let v = SpatialVector::new(random_vector(&mut rng, 1.), random_vector(&mut rng, 1.));
        let m = SpatialVector::new(random_vector(&mut rng, 1.), random_vector(&mut rng, 1.));
        let f = SpatialVector::new(random_vector(&mut rng, 1.), random_vector(&mut rng, 1.));

        let lhs = v.cross_motion(&m).dot(&f);
        let rhs = -m.dot(&v.cross_force(&f));

        assert!((lhs - rhs).abs() < 1e-12);
    }

    #[test]
    fn slice_layout_is_angular_first() {
        let v = SpatialVector::from_slice(&[1., 2., 3., 4., 5., 6.]);
        assert_eq!(v.angular, vector![1., 2., 3.]);
        assert_eq!(v.as_dvector().as_slice(), &[1., 2., 3., 4., 5., 6.]);
        assert_eq!(v - v, SpatialVector::zero());
    }
}
