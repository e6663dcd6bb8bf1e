//! Error types of the controller core.
//!
//! Programming errors (missing control modes, one-DoF casts of multi-DoF
//! joints, mismatched dimensions) panic. Only conditions a running
//! controller can meet are errors.

use na::DVector;
use thiserror::Error;

use crate::types::Float;

/// Failure of the numerical QP solver
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QPSolverError {
    /// The solver terminated without a usable solution
    #[error("QP solver failed with status {status}")]
    NotSolved { status: String },

    /// The cost or the equality constraints contain NaN or infinite entries
    #[error("QP problem data is not finite")]
    NonFiniteProblem,

    /// The solution contains NaN or infinite entries
    #[error("QP solution is not finite")]
    NonFiniteSolution,
}

/// Failure that ends the current control tick
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControllerCoreError {
    #[error("inverse dynamics optimization failed: {0}")]
    InverseDynamics(#[source] QPSolverError),

    #[error("inverse kinematics optimization failed: {0}")]
    InverseKinematics(#[source] QPSolverError),
}

/// Virtual model control optimization failure, carrying the solution of
/// the previous tick to fall back on
#[derive(Debug, Error, Clone, PartialEq)]
#[error("virtual model control optimization failed: {cause}")]
pub struct VirtualModelControlFault {
    #[source]
    pub cause: QPSolverError,
    pub previous_solution: DVector<Float>,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrajectoryOptimizerError {
    #[error("too many waypoints: {count} > {max}")]
    TooManyWaypoints { count: usize, max: usize },

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("minimum acceleration KKT system is singular")]
    SingularSystem,

    #[error("trajectory has not been computed")]
    NotComputed,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: Float },

    #[error("{field} must not be negative, got {value}")]
    Negative { field: &'static str, value: Float },
}
