pub mod polynomial;
pub mod trajectory_point_optimizer;
