use na::{DMatrix, Matrix3};

use crate::types::Float;

/// Rows of an orthonormal matrix selecting a subspace of an n-dimensional
/// task quantity. `task_size` is the number of rows.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectionMatrix {
    matrix: DMatrix<Float>,
}

impl SelectionMatrix {
    pub fn identity(dimension: usize) -> Self {
        SelectionMatrix {
            matrix: DMatrix::identity(dimension, dimension),
        }
    }

    /// Selects nothing
    pub fn empty(dimension: usize) -> Self {
        SelectionMatrix {
            matrix: DMatrix::zeros(0, dimension),
        }
    }

    /// One row per selected axis, in the given order
    pub fn from_axes(dimension: usize, axes: &[usize]) -> Self {
        let mut matrix = DMatrix::zeros(axes.len(), dimension);
        for (row, axis) in axes.iter().enumerate() {
            if *axis >= dimension {
                panic!("axis {} out of range for dimension {}", axis, dimension);
            }
            matrix[(row, *axis)] = 1.;
        }
        SelectionMatrix { matrix }
    }

    /// Panics unless the rows are orthonormal
    pub fn from_rows(matrix: DMatrix<Float>) -> Self {
        let gram = &matrix * matrix.transpose();
        let identity = DMatrix::<Float>::identity(matrix.nrows(), matrix.nrows());
        if (gram - identity).abs().max() > 1e-8 {
            panic!("selection matrix rows are not orthonormal: {}", matrix);
        }
        SelectionMatrix { matrix }
    }

    /// Selection of the same axes, but of a quantity expressed in a frame
    /// rotated by R with respect to the frame the task is given in. Applies
    /// R^T to every 3-block.
    pub fn rotated(&self, R: &Matrix3<Float>) -> Self {
        let n = self.dimension();
        if n % 3 != 0 {
            panic!("cannot rotate a selection of dimension {}", n);
        }
        let mut block = DMatrix::zeros(n, n);
        for k in 0..n / 3 {
            block
                .view_mut((3 * k, 3 * k), (3, 3))
                .copy_from(&R.transpose());
        }
        SelectionMatrix {
            matrix: &self.matrix * block,
        }
    }

    pub fn task_size(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn dimension(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn matrix(&self) -> &DMatrix<Float> {
        &self.matrix
    }
}

#[cfg(test)]
mod selection_tests {
    use na::Rotation3;

    use crate::{assert_vec_close, PI};

    use super::*;

    #[test]
    fn rotated_selection_stays_orthonormal() {
        // Arrange
        let S = SelectionMatrix::from_axes(6, &[2, 3, 4]);
        let R = Rotation3::from_euler_angles(0.2, -0.4, PI / 3.).into_inner();

        // Act
        let rotated = S.rotated(&R);

        // Assert
        let gram = rotated.matrix() * rotated.matrix().transpose();
        assert_vec_close!(gram, DMatrix::<Float>::identity(3, 3), 1e-12);
        assert_eq!(rotated.task_size(), 3);
    }

    #[test]
    #[should_panic]
    fn non_orthonormal_rows_panic() {
        SelectionMatrix::from_rows(DMatrix::from_row_slice(1, 3, &[1., 1., 0.]));
    }
}
