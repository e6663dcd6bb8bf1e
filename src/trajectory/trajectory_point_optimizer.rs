use na::{DMatrix, DVector};
use tracing::warn;

use crate::{
    error::TrajectoryOptimizerError,
    trajectory::polynomial::{acceleration_cost_hessian, basis_row, PolynomialOrder},
    types::Float,
};

pub const MAX_WAYPOINTS: usize = 10;

const INITIAL_TIME_GAIN: Float = 1e-3;
const TIME_EPSILON: Float = 1e-4;
const MAX_STEP_RATIO: Float = 0.4;

/// Minimum-acceleration piecewise polynomial from a start point through
/// waypoints to a target point, over dimensionless time [0, 1].
///
/// The waypoint times are free: an outer gradient descent moves them to
/// lower the total squared acceleration, each step solving the inner
/// equality-constrained QP through its KKT system.
pub struct TrajectoryPointOptimizer {
    dimensions: usize,
    order: PolynomialOrder,
    max_iterations: usize,
    cost_epsilon: Float,

    start_position: DVector<Float>,
    start_velocity: DVector<Float>,
    target_position: DVector<Float>,
    target_velocity: DVector<Float>,
    waypoints: Vec<DVector<Float>>,

    computed: bool,
    intervals: Vec<Float>,
    coefficients: Vec<DVector<Float>>,
    cost: Float,
    cost_history: Vec<Float>,
    iterations: usize,
}

impl TrajectoryPointOptimizer {
    pub fn new(dimensions: usize, order: PolynomialOrder) -> Self {
        TrajectoryPointOptimizer {
            dimensions,
            order,
            max_iterations: 20,
            cost_epsilon: 0.1,
            start_position: DVector::zeros(dimensions),
            start_velocity: DVector::zeros(dimensions),
            target_position: DVector::zeros(dimensions),
            target_velocity: DVector::zeros(dimensions),
            waypoints: vec![],
            computed: false,
            intervals: vec![],
            coefficients: vec![],
            cost: 0.,
            cost_history: vec![],
            iterations: 0,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_cost_epsilon(mut self, cost_epsilon: Float) -> Self {
        self.cost_epsilon = cost_epsilon;
        self
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn order(&self) -> PolynomialOrder {
        self.order
    }

    fn check_dimension(&self, vector: &DVector<Float>) -> Result<(), TrajectoryOptimizerError> {
        if vector.len() != self.dimensions {
            return Err(TrajectoryOptimizerError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    pub fn set_end_points(
        &mut self,
        start_position: DVector<Float>,
        start_velocity: DVector<Float>,
        target_position: DVector<Float>,
        target_velocity: DVector<Float>,
    ) -> Result<(), TrajectoryOptimizerError> {
        for vector in [&start_position, &start_velocity, &target_position, &target_velocity] {
            self.check_dimension(vector)?;
        }
        self.start_position = start_position;
        self.start_velocity = start_velocity;
        self.target_position = target_position;
        self.target_velocity = target_velocity;
        self.computed = false;
        Ok(())
    }

    pub fn set_waypoints(&mut self, waypoints: Vec<DVector<Float>>) -> Result<(), TrajectoryOptimizerError> {
        if waypoints.len() > MAX_WAYPOINTS {
            return Err(TrajectoryOptimizerError::TooManyWaypoints {
                count: waypoints.len(),
                max: MAX_WAYPOINTS,
            });
        }
        for waypoint in waypoints.iter() {
            self.check_dimension(waypoint)?;
        }
        self.waypoints = waypoints;
        self.computed = false;
        Ok(())
    }

    pub fn number_of_intervals(&self) -> usize {
        self.waypoints.len() + 1
    }

    pub fn compute(&mut self) -> Result<(), TrajectoryOptimizerError> {
        let n_intervals = self.number_of_intervals();
        let mut intervals = vec![1. / n_intervals as Float; n_intervals];
        let (mut coefficients, mut cost) = self.solve_min_acceleration(&intervals)?;
        self.cost_history = vec![cost];
        self.iterations = 0;

        if n_intervals > 1 {
            let mut time_gain = INITIAL_TIME_GAIN;
            let mut converged = false;
            while self.iterations < self.max_iterations {
                self.iterations += 1;

                let gradient = self.cost_gradient(&intervals)?;
                let min_interval = intervals.iter().cloned().fold(Float::INFINITY, Float::min);
                let mut step: Vec<Float> = gradient.iter().map(|g| -time_gain * g).collect();
                let largest = step.iter().fold(0., |m: Float, s| m.max(s.abs()));
                let max_step = MAX_STEP_RATIO * min_interval;
                if largest > max_step {
                    step.iter_mut().for_each(|s| *s *= max_step / largest);
                }
                // first order decrease of the step; time_gain never grows
                let predicted_decrease = -gradient.iter().zip(step.iter()).map(|(g, s)| g * s).sum::<Float>();
                if predicted_decrease < self.cost_epsilon {
                    converged = true;
                    break;
                }

                let candidate: Vec<Float> = intervals.iter().zip(step.iter()).map(|(t, s)| t + s).collect();
                let (candidate_coefficients, candidate_cost) = self.solve_min_acceleration(&candidate)?;
                if candidate_cost < cost {
                    let improvement = cost - candidate_cost;
                    intervals = candidate;
                    coefficients = candidate_coefficients;
                    cost = candidate_cost;
                    self.cost_history.push(cost);
                    if improvement < self.cost_epsilon {
                        converged = true;
                        break;
                    }
                } else {
                    time_gain *= 0.5;
                }
            }
            if !converged {
                warn!(
                    iterations = self.iterations,
                    cost, "trajectory timing optimization reached the iteration limit"
                );
            }
        }

        self.intervals = intervals;
        self.coefficients = coefficients;
        self.cost = cost;
        self.computed = true;
        Ok(())
    }

    /// Mean-free finite difference gradient of the cost with respect to the
    /// interval durations. Perturbing one interval moves the others the
    /// opposite way so the total stays 1.
    fn cost_gradient(&self, intervals: &[Float]) -> Result<Vec<Float>, TrajectoryOptimizerError> {
        let n = intervals.len();
        let min_interval = intervals.iter().cloned().fold(Float::INFINITY, Float::min);
        let epsilon = TIME_EPSILON.min(0.1 * min_interval);
        let mut gradient = Vec::with_capacity(n);
        for i in 0..n {
            let perturbed = |sign: Float| -> Vec<Float> {
                intervals
                    .iter()
                    .enumerate()
                    .map(|(k, t)| {
                        if k == i {
                            t + sign * epsilon
                        } else {
                            t - sign * epsilon / (n - 1) as Float
                        }
                    })
                    .collect()
            };
            let (_, cost_plus) = self.solve_min_acceleration(&perturbed(1.))?;
            let (_, cost_minus) = self.solve_min_acceleration(&perturbed(-1.))?;
            gradient.push((cost_plus - cost_minus) / (2. * epsilon));
        }
        let mean = gradient.iter().sum::<Float>() / n as Float;
        Ok(gradient.iter().map(|g| g - mean).collect())
    }

    fn interval_start_times(intervals: &[Float]) -> Vec<Float> {
        let mut t = 0.;
        intervals
            .iter()
            .map(|duration| {
                let start = t;
                t += duration;
                start
            })
            .collect()
    }

    /// Per dimension, the stacked coefficients minimizing the squared
    /// acceleration for the given interval durations, and the total cost
    fn solve_min_acceleration(
        &self,
        intervals: &[Float],
    ) -> Result<(Vec<DVector<Float>>, Float), TrajectoryOptimizerError> {
        let n_c = self.order.number_of_coefficients();
        let n_intervals = intervals.len();
        let n = n_c * n_intervals;
        let starts = Self::interval_start_times(intervals);
        let end = starts[n_intervals - 1] + intervals[n_intervals - 1];

        let mut H = DMatrix::zeros(n, n);
        for (k, (t0, duration)) in starts.iter().zip(intervals.iter()).enumerate() {
            H.view_mut((k * n_c, k * n_c), (n_c, n_c))
                .copy_from(&acceleration_cost_hessian(n_c, *t0, t0 + duration));
        }

        // rows of A, each with the dimension-independent part of its value
        let mut rows: Vec<(DVector<Float>, Constraint)> = vec![];
        let row_at = |interval: usize, t: Float, derivative: usize, sign: Float| {
            let mut row = DVector::zeros(n);
            row.rows_mut(interval * n_c, n_c)
                .copy_from(&(basis_row(n_c, t, derivative) * sign));
            row
        };
        for derivative in self.order.boundary_derivatives() {
            rows.push((row_at(0, 0., derivative, 1.), Constraint::Start(derivative)));
            rows.push((
                row_at(n_intervals - 1, end, derivative, 1.),
                Constraint::Target(derivative),
            ));
        }
        for waypoint in 0..n_intervals - 1 {
            let t = starts[waypoint + 1];
            rows.push((row_at(waypoint, t, 0, 1.), Constraint::Waypoint(waypoint)));
            rows.push((row_at(waypoint + 1, t, 0, 1.), Constraint::Waypoint(waypoint)));
            for derivative in self.order.continuity_derivatives() {
                let mut row = row_at(waypoint, t, derivative, 1.);
                row += row_at(waypoint + 1, t, derivative, -1.);
                rows.push((row, Constraint::Continuity));
            }
        }

        let m = rows.len();
        let mut kkt = DMatrix::zeros(n + m, n + m);
        kkt.view_mut((0, 0), (n, n)).copy_from(&H);
        for (i, (row, _)) in rows.iter().enumerate() {
            kkt.view_mut((n + i, 0), (1, n)).copy_from(&row.transpose());
            kkt.view_mut((0, n + i), (n, 1)).copy_from(row);
        }
        let lu = kkt.lu();

        let mut coefficients = Vec::with_capacity(self.dimensions);
        let mut cost = 0.;
        for dimension in 0..self.dimensions {
            let mut rhs = DVector::zeros(n + m);
            for (i, (_, constraint)) in rows.iter().enumerate() {
                rhs[n + i] = self.constraint_value(constraint, dimension);
            }
            let solution = lu.solve(&rhs).ok_or(TrajectoryOptimizerError::SingularSystem)?;
            let x = solution.rows(0, n).into_owned();
            cost += 0.5 * x.dot(&(&H * &x));
            coefficients.push(x);
        }
        Ok((coefficients, cost))
    }

    fn constraint_value(&self, constraint: &Constraint, dimension: usize) -> Float {
        match constraint {
            Constraint::Start(0) => self.start_position[dimension],
            Constraint::Start(1) => self.start_velocity[dimension],
            Constraint::Target(0) => self.target_position[dimension],
            Constraint::Target(1) => self.target_velocity[dimension],
            Constraint::Start(_) | Constraint::Target(_) => 0.,
            Constraint::Waypoint(k) => self.waypoints[*k][dimension],
            Constraint::Continuity => 0.,
        }
    }

    fn check_computed(&self) -> Result<(), TrajectoryOptimizerError> {
        if !self.computed {
            return Err(TrajectoryOptimizerError::NotComputed);
        }
        Ok(())
    }

    /// Durations of the intervals, summing to 1
    pub fn interval_durations(&self) -> Result<&[Float], TrajectoryOptimizerError> {
        self.check_computed()?;
        Ok(&self.intervals)
    }

    /// Time at which each waypoint is passed
    pub fn waypoint_times(&self) -> Result<Vec<Float>, TrajectoryOptimizerError> {
        self.check_computed()?;
        Ok(Self::interval_start_times(&self.intervals)[1..].to_vec())
    }

    /// dimensions x coefficients matrix of one interval, in absolute time:
    /// x_d(t) = sum_j C[(d, j)] t^j
    pub fn polynomial_coefficients(&self, interval: usize) -> Result<DMatrix<Float>, TrajectoryOptimizerError> {
        self.check_computed()?;
        let n_c = self.order.number_of_coefficients();
        Ok(DMatrix::from_fn(self.dimensions, n_c, |d, j| {
            self.coefficients[d][interval * n_c + j]
        }))
    }

    /// Derivative of the trajectory at time t in [0, 1]
    pub fn evaluate(&self, t: Float, derivative: usize) -> Result<DVector<Float>, TrajectoryOptimizerError> {
        self.check_computed()?;
        let t = t.clamp(0., 1.);
        let starts = Self::interval_start_times(&self.intervals);
        let interval = starts.iter().rposition(|start| *start <= t).unwrap_or(0);
        Ok(self.evaluate_in_interval(interval, t, derivative))
    }

    fn evaluate_in_interval(&self, interval: usize, t: Float, derivative: usize) -> DVector<Float> {
        let n_c = self.order.number_of_coefficients();
        let row = basis_row(n_c, t, derivative);
        DVector::from_fn(self.dimensions, |d, _| {
            row.dot(&self.coefficients[d].rows(interval * n_c, n_c))
        })
    }

    pub fn position(&self, t: Float) -> Result<DVector<Float>, TrajectoryOptimizerError> {
        self.evaluate(t, 0)
    }

    pub fn velocity(&self, t: Float) -> Result<DVector<Float>, TrajectoryOptimizerError> {
        self.evaluate(t, 1)
    }

    pub fn acceleration(&self, t: Float) -> Result<DVector<Float>, TrajectoryOptimizerError> {
        self.evaluate(t, 2)
    }

    pub fn waypoint_velocities(&self) -> Result<Vec<DVector<Float>>, TrajectoryOptimizerError> {
        let times = self.waypoint_times()?;
        Ok(times
            .iter()
            .enumerate()
            .map(|(waypoint, t)| self.evaluate_in_interval(waypoint, *t, 1))
            .collect())
    }

    pub fn cost(&self) -> Result<Float, TrajectoryOptimizerError> {
        self.check_computed()?;
        Ok(self.cost)
    }

    /// Cost of the initial solution followed by the cost of every accepted
    /// timing step
    pub fn cost_history(&self) -> &[Float] {
        &self.cost_history
    }

    pub fn iterations_used(&self) -> usize {
        self.iterations
    }
}

enum Constraint {
    Start(usize),
    Target(usize),
    Waypoint(usize),
    Continuity,
}

#[cfg(test)]
mod trajectory_point_optimizer_tests {
    use approx::assert_relative_eq;
    use na::dvector;

    use crate::assert_close;

    use super::*;

    #[test]
    fn single_cubic_meets_its_boundary_values() {
        // Arrange
        let mut optimizer = TrajectoryPointOptimizer::new(1, PolynomialOrder::Cubic);
        optimizer
            .set_end_points(dvector![0.], dvector![0.], dvector![1.], dvector![0.])
            .unwrap();

        // Act
        optimizer.compute().unwrap();

        // Assert
        assert_close!(optimizer.position(0.).unwrap()[0], 0., 1e-6);
        assert_close!(optimizer.position(1.).unwrap()[0], 1., 1e-6);
        assert_close!(optimizer.velocity(0.).unwrap()[0], 0., 1e-6);
        assert_close!(optimizer.velocity(1.).unwrap()[0], 0., 1e-6);
        // x = 3t^2 - 2t^3
        assert_close!(optimizer.position(0.5).unwrap()[0], 0.5, 1e-9);
        assert_close!(optimizer.cost().unwrap(), 12., 1e-6);
        assert_eq!(optimizer.iterations_used(), 0);
        assert!(optimizer.cost_history().windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn waypoints_are_passed_smoothly() {
        // Arrange
        let mut optimizer = TrajectoryPointOptimizer::new(2, PolynomialOrder::Quintic);
        optimizer
            .set_end_points(dvector![0., 0.], dvector![0., 0.], dvector![1., -1.], dvector![0., 0.])
            .unwrap();
        let waypoints = vec![dvector![0.2, 0.5], dvector![0.9, -0.2]];
        optimizer.set_waypoints(waypoints.clone()).unwrap();

        // Act
        optimizer.compute().unwrap();

        // Assert
        let times = optimizer.waypoint_times().unwrap();
        assert_eq!(times.len(), 2);
        for (k, (t, waypoint)) in times.iter().zip(waypoints.iter()).enumerate() {
            for derivative in 0..=3 {
                let left = optimizer.evaluate_in_interval(k, *t, derivative);
                let right = optimizer.evaluate_in_interval(k + 1, *t, derivative);
                assert_relative_eq!(left, right, epsilon = 1e-6);
            }
            assert_relative_eq!(optimizer.position(*t).unwrap(), waypoint.clone(), epsilon = 1e-6);
        }
        let total: Float = optimizer.interval_durations().unwrap().iter().sum();
        assert_close!(total, 1., 1e-9);
        assert!(optimizer.interval_durations().unwrap().iter().all(|t| *t > 0.));
        assert_relative_eq!(optimizer.acceleration(1.).unwrap(), dvector![0., 0.], epsilon = 1e-6);
    }

    #[test]
    fn optimal_initial_timing_stops_at_once() {
        // Arrange
        let mut optimizer = TrajectoryPointOptimizer::new(1, PolynomialOrder::Cubic);
        optimizer
            .set_end_points(dvector![0.], dvector![0.], dvector![1.], dvector![0.])
            .unwrap();
        optimizer.set_waypoints(vec![dvector![0.5]]).unwrap();

        // Act
        optimizer.compute().unwrap();

        // Assert
        assert_eq!(optimizer.iterations_used(), 1);
        assert_eq!(optimizer.cost_history().len(), 1);
        assert_eq!(optimizer.waypoint_times().unwrap(), vec![0.5]);
        // the two pieces join into x = 3t^2 - 2t^3
        for derivative in 0..=2 {
            let left = optimizer.evaluate_in_interval(0, 0.5, derivative);
            let right = optimizer.evaluate_in_interval(1, 0.5, derivative);
            assert_relative_eq!(left, right, epsilon = 1e-6);
        }
        assert_close!(optimizer.position(0.5).unwrap()[0], 0.5, 1e-9);
        assert_close!(optimizer.cost().unwrap(), 12., 1e-6);
        let velocities = optimizer.waypoint_velocities().unwrap();
        assert_eq!(velocities.len(), 1);
        assert_close!(velocities[0][0], 1.5, 1e-6);
    }

    #[test]
    fn timing_optimization_never_increases_cost() {
        let mut optimizer = TrajectoryPointOptimizer::new(1, PolynomialOrder::Cubic).with_cost_epsilon(1e-6);
        optimizer
            .set_end_points(dvector![0.], dvector![0.], dvector![1.], dvector![0.])
            .unwrap();
        optimizer
            .set_waypoints(vec![dvector![0.9], dvector![0.95]])
            .unwrap();

        optimizer.compute().unwrap();

        let history = optimizer.cost_history();
        assert!(history.windows(2).all(|w| w[1] < w[0]));
        assert_eq!(*history.last().unwrap(), optimizer.cost().unwrap());
        assert!(optimizer.iterations_used() <= 20);
    }

    #[test]
    fn invalid_inputs_are_errors() {
        let mut optimizer = TrajectoryPointOptimizer::new(2, PolynomialOrder::Septic);

        assert_eq!(
            optimizer.position(0.),
            Err(TrajectoryOptimizerError::NotComputed)
        );
        assert_eq!(
            optimizer.set_waypoints(vec![dvector![0., 0.]; MAX_WAYPOINTS + 1]),
            Err(TrajectoryOptimizerError::TooManyWaypoints {
                count: MAX_WAYPOINTS + 1,
                max: MAX_WAYPOINTS
            })
        );
        assert_eq!(
            optimizer.set_end_points(dvector![0.], dvector![0., 0.], dvector![0., 0.], dvector![0., 0.]),
            Err(TrajectoryOptimizerError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        );
    }
}
