use na::{DMatrix, DVector, Matrix3xX};

use crate::{
    spatial::{transform::Transform3D, twist::Twist},
    types::Float,
};

/// Maps joint velocities along a kinematic path to the twist of `body` with
/// respect to `base`, in `frame`. Column k is the unit twist of the k-th
/// path coordinate.
#[derive(PartialEq, Debug, Clone)]
pub struct GeometricJacobian {
    pub body: String,
    pub base: String,
    pub frame: String,
    pub angular: Matrix3xX<Float>,
    pub linear: Matrix3xX<Float>,
}

impl GeometricJacobian {
    pub fn new(
        body: &str,
        base: &str,
        frame: &str,
        angular: Matrix3xX<Float>,
        linear: Matrix3xX<Float>,
    ) -> Self {
        if angular.ncols() != linear.ncols() {
            panic!(
                "jacobian of {} has {} angular but {} linear columns",
                body,
                angular.ncols(),
                linear.ncols()
            );
        }
        GeometricJacobian {
            body: body.to_string(),
            base: base.to_string(),
            frame: frame.to_string(),
            angular,
            linear,
        }
    }

    pub fn zeros(body: &str, base: &str, frame: &str, ncols: usize) -> Self {
        GeometricJacobian::new(body, base, frame, Matrix3xX::zeros(ncols), Matrix3xX::zeros(ncols))
    }

    pub fn dim(&self) -> usize {
        self.angular.ncols()
    }

    /// Every column is a motion vector and is mapped as one
    pub fn transform(&self, transform: &Transform3D) -> GeometricJacobian {
        transform.check_source("jacobian", &self.frame);
        let mut mapped = GeometricJacobian::zeros(&self.body, &self.base, &transform.to, self.dim());
        for k in 0..self.dim() {
            let (angular, linear) = transform.map_motion(
                &self.angular.column(k).into_owned(),
                &self.linear.column(k).into_owned(),
            );
            mapped.angular.set_column(k, &angular);
            mapped.linear.set_column(k, &linear);
        }
        mapped
    }

    /// 6 x n, angular rows on top
    pub fn to_matrix(&self) -> DMatrix<Float> {
        let n = self.dim();
        DMatrix::from_fn(6, n, |row, col| {
            if row < 3 {
                self.angular[(row, col)]
            } else {
                self.linear[(row - 3, col)]
            }
        })
    }

    pub fn mul_velocity(&self, v: &DVector<Float>) -> Twist {
        if v.len() != self.dim() {
            panic!("{} joint velocities for a {}-column jacobian", v.len(), self.dim());
        }
        Twist::new(&self.body, &self.base, &self.frame, &self.angular * v, &self.linear * v)
    }
}
