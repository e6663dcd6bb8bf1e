use std::ops::RangeInclusive;

use na::{DMatrix, DVector};

use crate::types::Float;

/// Order of the piecewise polynomials, with the derivatives fixed at the
/// end points and kept continuous at the waypoints
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolynomialOrder {
    Cubic,
    Quintic,
    Septic,
}

impl PolynomialOrder {
    pub fn number_of_coefficients(&self) -> usize {
        match self {
            PolynomialOrder::Cubic => 4,
            PolynomialOrder::Quintic => 6,
            PolynomialOrder::Septic => 8,
        }
    }

    /// Position and velocity are set by the caller, higher derivatives are
    /// zero
    pub fn boundary_derivatives(&self) -> RangeInclusive<usize> {
        match self {
            PolynomialOrder::Cubic => 0..=1,
            PolynomialOrder::Quintic => 0..=2,
            PolynomialOrder::Septic => 0..=3,
        }
    }

    /// Position continuity comes from the waypoint constraints
    pub fn continuity_derivatives(&self) -> RangeInclusive<usize> {
        match self {
            PolynomialOrder::Cubic => 1..=1,
            PolynomialOrder::Quintic => 1..=3,
            PolynomialOrder::Septic => 1..=5,
        }
    }
}

/// Row r with r . c = d^derivative/dt^derivative of sum_j c_j t^j
pub fn basis_row(number_of_coefficients: usize, t: Float, derivative: usize) -> DVector<Float> {
    DVector::from_fn(number_of_coefficients, |j, _| {
        if j < derivative {
            return 0.;
        }
        let factor: Float = ((j - derivative + 1)..=j).map(|k| k as Float).product();
        factor * t.powi((j - derivative) as i32)
    })
}

/// Hessian of the integral of the squared acceleration over [t0, t1]:
///     H_jk = 2 j (j-1) k (k-1) (t1^p - t0^p) / p,   p = j + k - 3
pub fn acceleration_cost_hessian(number_of_coefficients: usize, t0: Float, t1: Float) -> DMatrix<Float> {
    let n = number_of_coefficients;
    DMatrix::from_fn(n, n, |j, k| {
        if j < 2 || k < 2 {
            return 0.;
        }
        let p = (j + k - 3) as i32;
        let scale = (j * (j - 1) * k * (k - 1)) as Float;
        2. * scale * (t1.powi(p) - t0.powi(p)) / p as Float
    })
}

#[cfg(test)]
mod polynomial_tests {
    use na::dvector;

    use crate::assert_close;

    use super::*;

    #[test]
    fn basis_rows_differentiate_monomials() {
        let t = 0.5;
        let c = dvector![1., 2., 3., 4.];

        let x = basis_row(4, t, 0).dot(&c);
        let xd = basis_row(4, t, 1).dot(&c);
        let xdd = basis_row(4, t, 2).dot(&c);
        let xddd = basis_row(4, t, 3).dot(&c);

        assert_close!(x, 1. + 2. * t + 3. * t * t + 4. * t * t * t, 1e-12);
        assert_close!(xd, 2. + 6. * t + 12. * t * t, 1e-12);
        assert_close!(xdd, 6. + 24. * t, 1e-12);
        assert_close!(xddd, 24., 1e-12);
        assert_eq!(basis_row(4, 0., 0), dvector![1., 0., 0., 0.]);
    }

    #[test]
    fn hessian_integrates_squared_acceleration() {
        // x = 3t^2 - 2t^3, x_dd = 6 - 12t, integral of x_dd^2 over [0, 1] is 12
        let c = dvector![0., 0., 3., -2.];
        let H = acceleration_cost_hessian(4, 0., 1.);

        assert_close!(0.5 * c.dot(&(&H * &c)), 12., 1e-12);
    }
}
