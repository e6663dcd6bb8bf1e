use std::collections::HashMap;

use na::DMatrix;

use crate::{
    joint::{Joint, JointId},
    types::Float,
    util::reshape_zeroed,
};

/// Maps each controlled joint to its columns in the flat joint vector the
/// optimizer works with. Built once, immutable afterwards.
pub struct JointIndexHandler {
    indexed_joints: Vec<JointId>,
    indexed_one_dof_joints: Vec<JointId>,
    joint_indices: HashMap<JointId, Vec<usize>>,
    joint_dofs: Vec<usize>,
    model_velocity_offsets: Vec<usize>,
    number_of_dofs: usize,
}

impl JointIndexHandler {
    /// `controlled_joints` gives the column order; `model_joints` is the full
    /// joint list of the robot.
    pub fn new(controlled_joints: &[JointId], model_joints: &[Joint]) -> Self {
        let joint_dofs: Vec<usize> = model_joints.iter().map(|j| j.dof()).collect();
        let mut model_velocity_offsets = vec![];
        let mut offset = 0;
        for dof in joint_dofs.iter() {
            model_velocity_offsets.push(offset);
            offset += dof;
        }

        let mut joint_indices = HashMap::new();
        let mut indexed_one_dof_joints = vec![];
        let mut column = 0;
        for joint in controlled_joints.iter() {
            if *joint >= model_joints.len() {
                panic!(
                    "controlled joint {} does not exist, model has {} joints",
                    joint,
                    model_joints.len()
                );
            }
            if joint_indices.contains_key(joint) {
                panic!(
                    "joint {} is listed twice",
                    model_joints[*joint].name()
                );
            }
            let dof = joint_dofs[*joint];
            joint_indices.insert(*joint, (column..column + dof).collect());
            column += dof;
            if dof == 1 {
                indexed_one_dof_joints.push(*joint);
            }
        }

        JointIndexHandler {
            indexed_joints: controlled_joints.to_vec(),
            indexed_one_dof_joints,
            joint_indices,
            joint_dofs,
            model_velocity_offsets,
            number_of_dofs: column,
        }
    }

    pub fn number_of_dofs(&self) -> usize {
        self.number_of_dofs
    }

    pub fn indexed_joints(&self) -> &[JointId] {
        &self.indexed_joints
    }

    pub fn indexed_one_dof_joints(&self) -> &[JointId] {
        &self.indexed_one_dof_joints
    }

    /// Columns of the joint, None if the joint is not indexed
    pub fn joint_indices(&self, joint: JointId) -> Option<&[usize]> {
        self.joint_indices.get(&joint).map(|v| v.as_slice())
    }

    pub fn is_joint_indexed(&self, joint: JointId) -> bool {
        self.joint_indices.contains_key(&joint)
    }

    pub fn one_dof_joint_index(&self, joint: JointId) -> usize {
        match self.joint_indices.get(&joint) {
            Some(indices) if indices.len() == 1 => indices[0],
            Some(indices) => panic!(
                "joint {} has {} DoFs, expected a one-DoF joint",
                joint,
                indices.len()
            ),
            None => panic!("joint {} is not indexed", joint),
        }
    }

    pub fn are_joints_indexed(&self, joints: &[JointId]) -> bool {
        joints.iter().all(|j| self.is_joint_indexed(*j))
    }

    /// Offset of the joint in the model's velocity vector
    pub fn model_velocity_offset(&self, joint: JointId) -> usize {
        self.model_velocity_offsets[joint]
    }

    pub fn joint_dof(&self, joint: JointId) -> usize {
        self.joint_dofs[joint]
    }

    fn check_compact_columns(&self, joints: &[JointId], compact: &DMatrix<Float>) {
        let ncols: usize = joints.iter().map(|j| self.joint_dofs[*j]).sum();
        if ncols != compact.ncols() {
            panic!(
                "compact block has {} columns, joints have {} DoFs",
                compact.ncols(),
                ncols
            );
        }
    }

    /// Scatter the columns of `compact`, laid out joint after joint, into
    /// the full joint index space. Returns false if a joint is not indexed,
    /// in which case `full` must not be used.
    pub fn compact_block_to_full_block(
        &self,
        joints: &[JointId],
        compact: &DMatrix<Float>,
        full: &mut DMatrix<Float>,
    ) -> bool {
        self.check_compact_columns(joints, compact);
        reshape_zeroed(full, compact.nrows(), self.number_of_dofs);

        let mut compact_col = 0;
        for joint in joints.iter() {
            let indices = match self.joint_indices.get(joint) {
                Some(indices) => indices,
                None => return false,
            };
            for index in indices.iter() {
                full.set_column(*index, &compact.column(compact_col));
                compact_col += 1;
            }
        }
        true
    }

    /// Same as compact_block_to_full_block, but the columns of unindexed
    /// joints are skipped
    pub fn compact_block_to_full_block_ignore_unindexed_joints(
        &self,
        joints: &[JointId],
        compact: &DMatrix<Float>,
        full: &mut DMatrix<Float>,
    ) {
        self.check_compact_columns(joints, compact);
        reshape_zeroed(full, compact.nrows(), self.number_of_dofs);

        let mut compact_col = 0;
        for joint in joints.iter() {
            match self.joint_indices.get(joint) {
                Some(indices) => {
                    for index in indices.iter() {
                        full.set_column(*index, &compact.column(compact_col));
                        compact_col += 1;
                    }
                }
                None => compact_col += self.joint_dofs[*joint],
            }
        }
    }

    /// Gather the columns of the given joints from the full space. Unindexed
    /// joints get zero columns.
    pub fn full_block_to_compact_block(
        &self,
        joints: &[JointId],
        full: &DMatrix<Float>,
    ) -> DMatrix<Float> {
        if full.ncols() != self.number_of_dofs {
            panic!(
                "full block has {} columns, expected {}",
                full.ncols(),
                self.number_of_dofs
            );
        }
        let ncols: usize = joints.iter().map(|j| self.joint_dofs[*j]).sum();
        let mut compact = DMatrix::zeros(full.nrows(), ncols);
        let mut compact_col = 0;
        for joint in joints.iter() {
            match self.joint_indices.get(joint) {
                Some(indices) => {
                    for index in indices.iter() {
                        compact.set_column(compact_col, &full.column(*index));
                        compact_col += 1;
                    }
                }
                None => compact_col += self.joint_dofs[*joint],
            }
        }
        compact
    }
}

#[cfg(test)]
mod joint_index_tests {
    use crate::{
        helpers::build_floating_biped, kinematics::RobotModel,
        util::test_utils::random_matrix,
    };

    use super::*;

    #[test]
    fn compact_to_full_round_trip() {
        // Arrange
        let mut rng = rand::rng();
        let robot = build_floating_biped();
        let joints = robot.joints();
        let controlled: Vec<JointId> = vec![0, 3, 1, 4, 2];
        let handler = JointIndexHandler::new(&controlled, joints);

        // Act & Assert
        assert_eq!(handler.number_of_dofs(), 10);
        for joint in controlled.iter() {
            let compact = random_matrix(&mut rng, 4, joints[*joint].dof(), 1.);
            let mut full = DMatrix::zeros(0, 0);
            assert!(handler.compact_block_to_full_block(&[*joint], &compact, &mut full));
            assert_eq!(full.shape(), (4, 10));
            let back = handler.full_block_to_compact_block(&[*joint], &full);
            assert_eq!(back, compact);
        }
    }

    #[test]
    fn multi_joint_block_lands_in_joint_columns() {
        // Arrange
        let robot = build_floating_biped();
        let handler = JointIndexHandler::new(&[0, 1, 2], robot.joints());
        let compact = DMatrix::from_fn(2, 2, |i, j| (10 * i + j + 1) as Float);

        // Act
        let mut full = DMatrix::zeros(0, 0);
        let ok = handler.compact_block_to_full_block(&[2, 1], &compact, &mut full);

        // Assert
        assert!(ok);
        assert_eq!(handler.one_dof_joint_index(1), 6);
        assert_eq!(handler.one_dof_joint_index(2), 7);
        assert_eq!(full[(0, 7)], 1.);
        assert_eq!(full[(0, 6)], 2.);
        assert_eq!(full[(1, 6)], 12.);
        assert_eq!(full.columns(0, 6).sum(), 0.);
    }

    #[test]
    fn unindexed_joint_fails_or_is_skipped() {
        // Arrange
        let robot = build_floating_biped();
        let handler = JointIndexHandler::new(&[1, 2], robot.joints());
        let compact = DMatrix::from_fn(1, 7, |_, j| j as Float);

        // Act
        let mut full = DMatrix::zeros(0, 0);
        let ok = handler.compact_block_to_full_block(&[0, 1], &compact, &mut full);
        let mut ignoring = DMatrix::zeros(0, 0);
        handler.compact_block_to_full_block_ignore_unindexed_joints(
            &[0, 1],
            &compact,
            &mut ignoring,
        );

        // Assert
        assert!(!ok);
        assert!(!handler.are_joints_indexed(&[0, 1]));
        assert!(handler.joint_indices(0).is_none());
        assert_eq!(ignoring.shape(), (1, 2));
        assert_eq!(ignoring[(0, 0)], 6.);
        assert_eq!(ignoring[(0, 1)], 0.);
    }

    #[test]
    #[should_panic]
    fn one_dof_index_of_floating_joint_panics() {
        let robot = build_floating_biped();
        let handler = JointIndexHandler::new(&[0], robot.joints());
        handler.one_dof_joint_index(0);
    }
}
