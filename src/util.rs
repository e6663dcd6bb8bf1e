use na::{DMatrix, DVector, Matrix3, Vector3};

use crate::types::Float;

/// Skew-symmetric matrix of a vector, i.e. the matrix form of the cross
/// product: skew_symmetric(a) * b = a x b
#[rustfmt::skip]
pub fn skew_symmetric(v: &Vector3<Float>) -> Matrix3<Float> {
    Matrix3::new(
        0., -v.z, v.y,
        v.z, 0., -v.x,
        -v.y, v.x, 0.,
    )
}

/// Sets the matrix to the given shape, reusing its storage when possible,
/// and fills it with zeros.
pub fn reshape_zeroed(matrix: &mut DMatrix<Float>, nrows: usize, ncols: usize) {
    if matrix.nrows() != nrows || matrix.ncols() != ncols {
        let owned = std::mem::replace(matrix, DMatrix::zeros(0, 0));
        *matrix = owned.resize(nrows, ncols, 0.);
    }
    matrix.fill(0.);
}

/// Vector counterpart of reshape_zeroed
pub fn resize_zeroed(vector: &mut DVector<Float>, nrows: usize) {
    if vector.nrows() != nrows {
        let owned = std::mem::replace(vector, DVector::zeros(0));
        *vector = owned.resize_vertically(nrows, 0.);
    }
    vector.fill(0.);
}

/// Panics unless |left - right| <= tolerance
#[macro_export]
macro_rules! assert_close {
    ($left:expr, $right:expr, $tolerance:expr) => {{
        let (left, right, tolerance) = ($left, $right, $tolerance);
        let difference = (left - right).abs();
        assert!(
            difference <= tolerance,
            "{} and {} differ by {} (tolerance {})",
            left,
            right,
            difference,
            tolerance
        );
    }};
}

/// Element-wise assert_close! over two iterable containers of equal shape
#[macro_export]
macro_rules! assert_vec_close {
    ($left:expr, $right:expr, $tolerance:expr) => {{
        let (left, right) = (&$left, &$right);
        assert_eq!(left.len(), right.len(), "length mismatch");
        for (l, r) in left.iter().zip(right.iter()) {
            $crate::assert_close!(*l, *r, $tolerance);
        }
    }};
}
