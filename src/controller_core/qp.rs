use clarabel::{
    algebra::CscMatrix,
    solver::{
        DefaultSettings, DefaultSolver, IPSolver, SolverStatus,
        SupportedConeT::{self, NonnegativeConeT, SecondOrderConeT, ZeroConeT},
    },
};
use na::{DMatrix, DVector, Vector3};

use crate::{
    controller_core::motion_qp_input::MotionQPInput, error::QPSolverError, types::Float,
};

/// Friction cone on a 3-D force block of the variables:
///     |t1.f, t2.f| <= mu n.f
struct FrictionCone {
    offset: usize,
    normal: Vector3<Float>,
    mu: Float,
}

/// Aggregates motion tasks into one convex QP and solves it with clarabel.
///
/// Variables are [motion (number_of_motion_variables); extra], where the
/// extra block holds e.g. contact forces. Soft tasks enter the cost
///     1/2 |J x - b|^2_W,
/// hard tasks become equality constraints.
pub struct MotionQPSolver {
    number_of_motion_variables: usize,
    number_of_variables: usize,
    H: DMatrix<Float>,
    f: DVector<Float>,
    A_eq: DMatrix<Float>,
    b_eq: DVector<Float>,
    lower_bounds: DVector<Float>,
    upper_bounds: DVector<Float>,
    friction_cones: Vec<FrictionCone>,
    number_of_solves: usize,
}

impl MotionQPSolver {
    pub fn new() -> Self {
        MotionQPSolver {
            number_of_motion_variables: 0,
            number_of_variables: 0,
            H: DMatrix::zeros(0, 0),
            f: DVector::zeros(0),
            A_eq: DMatrix::zeros(0, 0),
            b_eq: DVector::zeros(0),
            lower_bounds: DVector::zeros(0),
            upper_bounds: DVector::zeros(0),
            friction_cones: vec![],
            number_of_solves: 0,
        }
    }

    /// Clear the problem and size it for a new tick
    pub fn reset(&mut self, number_of_motion_variables: usize, number_of_extra_variables: usize) {
        let n = number_of_motion_variables + number_of_extra_variables;
        self.number_of_motion_variables = number_of_motion_variables;
        self.number_of_variables = n;
        self.H = DMatrix::zeros(n, n);
        self.f = DVector::zeros(n);
        self.A_eq = DMatrix::zeros(0, n);
        self.b_eq = DVector::zeros(0);
        self.lower_bounds = DVector::from_element(n, Float::NEG_INFINITY);
        self.upper_bounds = DVector::from_element(n, Float::INFINITY);
        self.friction_cones.clear();
    }

    pub fn number_of_variables(&self) -> usize {
        self.number_of_variables
    }

    /// How many times the numerical solver has run
    pub fn number_of_solves(&self) -> usize {
        self.number_of_solves
    }

    fn check_columns(&self, J: &DMatrix<Float>) {
        if J.ncols() != self.number_of_variables {
            panic!(
                "constraint has {} columns, problem has {} variables",
                J.ncols(),
                self.number_of_variables
            );
        }
    }

    /// Pad a motion-space Jacobian with zero columns for the extra variables
    fn pad(&self, J: &DMatrix<Float>) -> DMatrix<Float> {
        if J.ncols() != self.number_of_motion_variables {
            panic!(
                "task has {} columns, expected {} motion variables",
                J.ncols(),
                self.number_of_motion_variables
            );
        }
        let mut padded = DMatrix::zeros(J.nrows(), self.number_of_variables);
        padded.columns_mut(0, J.ncols()).copy_from(J);
        padded
    }

    pub fn add_motion_input(&mut self, input: &MotionQPInput) {
        if input.task_size() == 0 {
            return;
        }
        let J = self.pad(&input.task_jacobian);
        if input.is_motion_constraint {
            self.add_equality_constraint(&J, &input.task_objective);
        } else {
            let W = input.weight_matrix();
            self.add_cost(&J, &input.task_objective, &W);
        }
    }

    /// 1/2 |J x - b|^2_W over all variables
    pub fn add_cost(&mut self, J: &DMatrix<Float>, b: &DVector<Float>, W: &DMatrix<Float>) {
        self.check_columns(J);
        let JtW = J.transpose() * W;
        self.H += &JtW * J;
        self.f -= JtW * b;
    }

    /// weight/2 |x_i|^2 for each variable i in the range
    pub fn add_regularization(&mut self, offset: usize, size: usize, weight: Float) {
        for i in offset..offset + size {
            self.H[(i, i)] += weight;
        }
    }

    pub fn add_equality_constraint(&mut self, A: &DMatrix<Float>, b: &DVector<Float>) {
        self.check_columns(A);
        let rows = self.A_eq.nrows();
        let A_eq = std::mem::replace(&mut self.A_eq, DMatrix::zeros(0, 0));
        let mut A_eq = A_eq.resize_vertically(rows + A.nrows(), 0.);
        A_eq.rows_mut(rows, A.nrows()).copy_from(A);
        self.A_eq = A_eq;

        let b_eq = std::mem::replace(&mut self.b_eq, DVector::zeros(0));
        let mut b_eq = b_eq.resize_vertically(rows + b.len(), 0.);
        b_eq.rows_mut(rows, b.len()).copy_from(b);
        self.b_eq = b_eq;
    }

    /// Intersect the bounds of the variables starting at `offset`
    pub fn set_variable_bounds(&mut self, offset: usize, lower: &DVector<Float>, upper: &DVector<Float>) {
        for k in 0..lower.len() {
            let i = offset + k;
            self.lower_bounds[i] = self.lower_bounds[i].max(lower[k]);
            self.upper_bounds[i] = self.upper_bounds[i].min(upper[k]);
        }
    }

    /// Constrain the 3 variables at `offset` to a friction cone around the
    /// unit normal
    pub fn add_friction_cone(&mut self, offset: usize, normal: &Vector3<Float>, mu: Float) {
        if offset + 3 > self.number_of_variables {
            panic!(
                "friction cone at {} exceeds {} variables",
                offset, self.number_of_variables
            );
        }
        self.friction_cones.push(FrictionCone {
            offset,
            normal: normal.normalize(),
            mu,
        });
    }

    /// Two unit tangents orthogonal to the normal
    fn tangents(normal: &Vector3<Float>) -> (Vector3<Float>, Vector3<Float>) {
        let reference = if normal.x.abs() < 0.9 {
            Vector3::x()
        } else {
            Vector3::y()
        };
        let t1 = normal.cross(&reference).normalize();
        let t2 = normal.cross(&t1);
        (t1, t2)
    }

    pub fn solve(&mut self) -> Result<DVector<Float>, QPSolverError> {
        let n = self.number_of_variables;
        let data = self.H.iter().chain(self.f.iter());
        if data.chain(self.A_eq.iter()).chain(self.b_eq.iter()).any(|v| !v.is_finite()) {
            return Err(QPSolverError::NonFiniteProblem);
        }
        let mut rows: Vec<DVector<Float>> = vec![];
        let mut b: Vec<Float> = vec![];
        let mut cones: Vec<SupportedConeT<Float>> = vec![];

        // A x + s = b, s in zero cone
        for (row, value) in self.A_eq.row_iter().zip(self.b_eq.iter()) {
            rows.push(row.transpose());
            b.push(*value);
        }
        if self.A_eq.nrows() > 0 {
            cones.push(ZeroConeT(self.A_eq.nrows()));
        }

        // x <= u and -x <= -l, s in nonnegative cone
        let mut number_of_bounds = 0;
        for i in 0..n {
            if self.upper_bounds[i].is_finite() {
                let mut row = DVector::zeros(n);
                row[i] = 1.;
                rows.push(row);
                b.push(self.upper_bounds[i]);
                number_of_bounds += 1;
            }
            if self.lower_bounds[i].is_finite() {
                let mut row = DVector::zeros(n);
                row[i] = -1.;
                rows.push(row);
                b.push(-self.lower_bounds[i]);
                number_of_bounds += 1;
            }
        }
        if number_of_bounds > 0 {
            cones.push(NonnegativeConeT(number_of_bounds));
        }

        // s = -A f = (mu n.f, t1.f, t2.f) in second order cone
        for cone in self.friction_cones.iter() {
            let (t1, t2) = Self::tangents(&cone.normal);
            for direction in [cone.normal * cone.mu, t1, t2] {
                let mut row = DVector::zeros(n);
                row.rows_mut(cone.offset, 3).copy_from(&(-direction));
                rows.push(row);
                b.push(0.);
            }
            cones.push(SecondOrderConeT(3));
        }

        let P = CscMatrix::from(self.H.upper_triangle().row_iter());
        let A = if rows.is_empty() {
            CscMatrix::zeros((0, n))
        } else {
            let A = DMatrix::from_columns(&rows).transpose();
            CscMatrix::from(A.row_iter())
        };

        let mut settings = DefaultSettings::default();
        settings.verbose = false;
        let mut solver = DefaultSolver::new(&P, self.f.as_slice(), &A, &b, &cones, settings);
        solver.solve();
        self.number_of_solves += 1;

        match solver.solution.status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => {}
            status => {
                return Err(QPSolverError::NotSolved {
                    status: format!("{:?}", status),
                })
            }
        }

        let x = DVector::from_column_slice(&solver.solution.x);
        if x.iter().any(|v| !v.is_finite()) {
            return Err(QPSolverError::NonFiniteSolution);
        }
        Ok(x)
    }
}

impl Default for MotionQPSolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod qp_tests {
    use na::{dvector, vector};

    use crate::{
        assert_close, assert_vec_close, controller_core::motion_qp_input::TaskWeight,
    };

    use super::*;

    #[test]
    fn soft_task_with_bounds() {
        // Arrange
        let mut qp = MotionQPSolver::new();
        qp.reset(2, 0);
        let mut input = MotionQPInput::new(2);
        input.reshape(2, 2);
        input.task_jacobian = DMatrix::identity(2, 2);
        input.task_objective = dvector![3., -1.];
        input.weight = TaskWeight::Scalar(1.);
        qp.add_motion_input(&input);
        qp.set_variable_bounds(0, &dvector![-2., -2.], &dvector![2., 2.]);

        // Act
        let x = qp.solve().unwrap();

        // Assert
        assert_vec_close!(&x, &dvector![2., -1.], 1e-5);
        assert_eq!(qp.number_of_solves(), 1);
    }

    #[test]
    fn hard_task_wins_over_soft_task() {
        let mut qp = MotionQPSolver::new();
        qp.reset(2, 0);
        qp.add_cost(
            &DMatrix::identity(2, 2),
            &dvector![1., 1.],
            &DMatrix::identity(2, 2),
        );
        qp.add_equality_constraint(&DMatrix::from_row_slice(1, 2, &[1., 1.]), &dvector![0.]);

        let x = qp.solve().unwrap();

        assert_close!(x[0] + x[1], 0., 1e-6);
        assert_close!(x[0], x[1], 1e-6);
    }

    #[test]
    fn friction_cone_limits_tangential_force() {
        // Arrange
        let mu = 0.5;
        let mut qp = MotionQPSolver::new();
        qp.reset(0, 3);
        // pull sideways, push down
        qp.add_cost(
            &DMatrix::identity(3, 3),
            &dvector![10., 0., 4.],
            &DMatrix::identity(3, 3),
        );
        qp.add_friction_cone(0, &vector![0., 0., 1.], mu);

        // Act
        let f = qp.solve().unwrap();

        // Assert
        let tangential = (f[0] * f[0] + f[1] * f[1]).sqrt();
        assert!(tangential <= mu * f[2] + 1e-6);
        assert!(f[2] > 0.);
        assert!(f[0] > 0.);
    }

    #[test]
    fn infeasible_problem_is_an_error() {
        let mut qp = MotionQPSolver::new();
        qp.reset(1, 0);
        qp.add_equality_constraint(&DMatrix::from_row_slice(1, 1, &[1.]), &dvector![5.]);
        qp.set_variable_bounds(0, &dvector![-1.], &dvector![1.]);

        assert!(matches!(qp.solve(), Err(QPSolverError::NotSolved { .. })));
    }

    #[test]
    fn nan_objective_is_rejected_before_solving() {
        let mut qp = MotionQPSolver::new();
        qp.reset(2, 0);
        qp.add_cost(
            &DMatrix::identity(2, 2),
            &dvector![Float::NAN, 0.],
            &DMatrix::identity(2, 2),
        );

        assert_eq!(qp.solve(), Err(QPSolverError::NonFiniteProblem));
        assert_eq!(qp.number_of_solves(), 0);
    }
}
