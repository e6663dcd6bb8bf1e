use na::{DMatrix, DVector};

use crate::{
    types::Float,
    util::{reshape_zeroed, resize_zeroed},
};

#[derive(Clone, Debug, PartialEq)]
pub enum TaskWeight {
    Scalar(Float),
    /// Symmetric positive semi-definite, task_size x task_size
    Matrix(DMatrix<Float>),
}

/// One task's contribution to the motion QP, in the joint index space:
/// either the hard constraint J x = b, or the cost 1/2 |J x - b|^2_W
#[derive(Clone, Debug, PartialEq)]
pub struct MotionQPInput {
    pub task_jacobian: DMatrix<Float>,
    pub task_objective: DVector<Float>,
    pub weight: TaskWeight,
    pub is_motion_constraint: bool,
}

impl MotionQPInput {
    pub fn new(number_of_dofs: usize) -> Self {
        MotionQPInput {
            task_jacobian: DMatrix::zeros(0, number_of_dofs),
            task_objective: DVector::zeros(0),
            weight: TaskWeight::Scalar(0.),
            is_motion_constraint: false,
        }
    }

    /// Resize to task_size rows and clear all values
    pub fn reshape(&mut self, task_size: usize, number_of_dofs: usize) {
        reshape_zeroed(&mut self.task_jacobian, task_size, number_of_dofs);
        resize_zeroed(&mut self.task_objective, task_size);
        self.weight = TaskWeight::Scalar(0.);
        self.is_motion_constraint = false;
    }

    pub fn task_size(&self) -> usize {
        self.task_jacobian.nrows()
    }

    pub fn number_of_dofs(&self) -> usize {
        self.task_jacobian.ncols()
    }

    /// The weight as a full matrix
    pub fn weight_matrix(&self) -> DMatrix<Float> {
        match &self.weight {
            TaskWeight::Scalar(w) => DMatrix::identity(self.task_size(), self.task_size()) * *w,
            TaskWeight::Matrix(W) => W.clone(),
        }
    }
}
