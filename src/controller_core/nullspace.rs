use na::DMatrix;

use crate::types::Float;

/// Nullspace projector N = I - J^+ J, with the damped least-squares
/// pseudo-inverse J^+ = J^T (J J^T + alpha^2 I)^-1.
pub struct DampedLeastSquaresNullspaceCalculator {
    alpha: Float,
    nullspace_projector: DMatrix<Float>,
}

impl DampedLeastSquaresNullspaceCalculator {
    pub fn new(alpha: Float) -> Self {
        DampedLeastSquaresNullspaceCalculator {
            alpha,
            nullspace_projector: DMatrix::zeros(0, 0),
        }
    }

    pub fn alpha(&self) -> Float {
        self.alpha
    }

    pub fn compute_nullspace_projector(&mut self, J: &DMatrix<Float>) -> &DMatrix<Float> {
        let n = J.ncols();
        let J_pinv = self.damped_pseudo_inverse(J);
        self.nullspace_projector = DMatrix::identity(n, n) - J_pinv * J;
        &self.nullspace_projector
    }

    /// M <- M N(J)
    pub fn project_onto_nullspace(&mut self, M: &mut DMatrix<Float>, J: &DMatrix<Float>) {
        if M.ncols() != J.ncols() {
            panic!(
                "cannot project {} columns onto the nullspace of {} columns",
                M.ncols(),
                J.ncols()
            );
        }
        if J.nrows() == 0 {
            return;
        }
        let N = self.compute_nullspace_projector(J);
        *M = &*M * N;
    }

    pub fn damped_pseudo_inverse(&self, J: &DMatrix<Float>) -> DMatrix<Float> {
        let m = J.nrows();
        let JJt = J * J.transpose() + DMatrix::identity(m, m) * (self.alpha * self.alpha);
        match JJt.clone().cholesky() {
            Some(chol) => J.transpose() * chol.inverse(),
            None => match J.clone().pseudo_inverse(1e-12) {
                Ok(pinv) => pinv,
                Err(msg) => panic!("pseudo-inverse of task jacobian failed: {}", msg),
            },
        }
    }
}
