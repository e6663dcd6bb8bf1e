use na::{DMatrix, DVector, Vector3, Vector6};

use crate::{
    controller_core::joint_index::JointIndexHandler,
    joint::JointId,
    kinematics::RobotModel,
    types::Float,
    WORLD_FRAME,
};

/// Centroidal momentum matrix A and convective term A_dot * v, with
///     h = A v,    h_dot = A v_dot + A_dot * v
/// where h = [angular; linear] is the momentum about the center of mass in a
/// world-aligned frame. Recomputed once per control tick.
pub struct CentroidalMomentumHandler {
    centroidal_momentum_matrix: DMatrix<Float>,
    convective_term: Vector6<Float>,
    joint_velocities: DVector<Float>,
    center_of_mass: Vector3<Float>,
    total_mass: Float,
    full_block: DMatrix<Float>,
}

impl CentroidalMomentumHandler {
    pub fn new(number_of_dofs: usize) -> Self {
        CentroidalMomentumHandler {
            centroidal_momentum_matrix: DMatrix::zeros(6, number_of_dofs),
            convective_term: Vector6::zeros(),
            joint_velocities: DVector::zeros(number_of_dofs),
            center_of_mass: Vector3::zeros(),
            total_mass: 0.,
            full_block: DMatrix::zeros(6, number_of_dofs),
        }
    }

    pub fn compute(&mut self, model: &dyn RobotModel, index: &JointIndexHandler) {
        let n = index.number_of_dofs();
        self.centroidal_momentum_matrix = DMatrix::zeros(6, n);
        let mut convective_term = Vector6::zeros();

        for body in model.body_names() {
            let inertia = model.inertia(&body);
            if inertia.mass == 0. {
                continue;
            }
            let chain = model.jacobian(WORLD_FRAME, &body, WORLD_FRAME);
            let block = inertia.momentum_matrix(&chain.jacobian);
            index.compact_block_to_full_block_ignore_unindexed_joints(
                &chain.joints,
                &block,
                &mut self.full_block,
            );
            self.centroidal_momentum_matrix += &self.full_block;

            let bias = model.convective_term(WORLD_FRAME, &body, WORLD_FRAME);
            let twist = model.twist(&body).as_spatial_vector();
            let rate = inertia.mul_motion(&bias.as_spatial_vector())
                + twist.cross_force(&inertia.mul_motion(&twist));
            convective_term += rate.as_vector6();
        }

        // Moment point from the world origin to the center of mass
        let c = model.center_of_mass();
        for mut column in self.centroidal_momentum_matrix.column_iter_mut() {
            let linear = Vector3::new(column[3], column[4], column[5]);
            let shift = c.cross(&linear);
            column[0] -= shift.x;
            column[1] -= shift.y;
            column[2] -= shift.z;
        }
        let shift = c.cross(&convective_term.fixed_rows::<3>(3).into_owned());
        convective_term[0] -= shift.x;
        convective_term[1] -= shift.y;
        convective_term[2] -= shift.z;
        self.convective_term = convective_term;

        self.joint_velocities = DVector::zeros(n);
        let joints = model.joints();
        for joint in index.indexed_joints() {
            if let Some(columns) = index.joint_indices(*joint) {
                let v = joints[*joint].velocity();
                for (k, column) in columns.iter().enumerate() {
                    self.joint_velocities[*column] = v[k];
                }
            }
        }
        self.center_of_mass = c;
        self.total_mass = model.total_mass();
    }

    pub fn centroidal_momentum_matrix(&self) -> &DMatrix<Float> {
        &self.centroidal_momentum_matrix
    }

    pub fn centroidal_momentum_convective_term(&self) -> &Vector6<Float> {
        &self.convective_term
    }

    /// Columns of A belonging to the given joints, joint after joint
    pub fn get_centroidal_momentum_matrix_part(
        &self,
        index: &JointIndexHandler,
        joints: &[JointId],
    ) -> DMatrix<Float> {
        index.full_block_to_compact_block(joints, &self.centroidal_momentum_matrix)
    }

    /// Momentum rate achieved by the given accelerations of the given joints:
    ///     A_part * v_dot + A_dot * v
    pub fn compute_centroidal_momentum_rate(
        &self,
        index: &JointIndexHandler,
        joints: &[JointId],
        accelerations: &DVector<Float>,
    ) -> Vector6<Float> {
        let A_part = self.get_centroidal_momentum_matrix_part(index, joints);
        if A_part.ncols() != accelerations.len() {
            panic!(
                "{} accelerations given for {} joint DoFs",
                accelerations.len(),
                A_part.ncols()
            );
        }
        let rate = A_part * accelerations;
        Vector6::from_column_slice(rate.as_slice()) + self.convective_term
    }

    /// h = A v over the indexed joints
    pub fn centroidal_momentum(&self) -> Vector6<Float> {
        let h = &self.centroidal_momentum_matrix * &self.joint_velocities;
        Vector6::from_column_slice(h.as_slice())
    }

    pub fn center_of_mass(&self) -> &Vector3<Float> {
        &self.center_of_mass
    }

    pub fn total_mass(&self) -> Float {
        self.total_mass
    }
}

#[cfg(test)]
mod centroidal_momentum_tests {
    use na::vector;

    use crate::{
        assert_close, assert_vec_close,
        helpers::{build_floating_biped, build_planar_arm},
        spatial::{pose::Pose, spatial_vector::SpatialVector},
        util::test_utils::{random_quaternion, random_vector},
    };

    use super::*;

    #[test]
    fn momentum_matches_sum_of_body_momenta() {
        // Arrange
        let mut rng = rand::rng();
        let mut robot = build_floating_biped();
        robot.set_floating_state(
            "floating_base",
            Pose {
                rotation: random_quaternion(&mut rng, 0.3),
                translation: vector![0.1, -0.2, 0.9],
            },
            SpatialVector::new(random_vector(&mut rng, 1.), random_vector(&mut rng, 1.)),
        );
        robot.set_joint_q("left_hip", 0.3);
        robot.set_joint_v("left_hip", -0.7);
        robot.set_joint_q("right_knee", 0.9);
        robot.set_joint_v("right_knee", 1.3);
        robot.update();
        let all: Vec<JointId> = (0..robot.joints().len()).collect();
        let index = JointIndexHandler::new(&all, robot.joints());
        let mut handler = CentroidalMomentumHandler::new(index.number_of_dofs());

        // Act
        handler.compute(&robot, &index);
        let h = handler.centroidal_momentum();

        // Assert
        let c = robot.center_of_mass();
        let mut expected = Vector6::zeros();
        for body in robot.body_names() {
            let momentum = robot.inertia(&body).momentum(&robot.twist(&body));
            expected += momentum.as_vector6();
        }
        let linear = expected.fixed_rows::<3>(3).into_owned();
        let angular = expected.fixed_rows::<3>(0).into_owned() - c.cross(&linear);
        assert_vec_close!(h.fixed_rows::<3>(0), angular, 1e-10);
        assert_vec_close!(h.fixed_rows::<3>(3), linear, 1e-10);
        assert_close!(handler.total_mass(), robot.total_mass(), 1e-12);
    }

    #[test]
    fn convective_term_matches_momentum_finite_difference() {
        // Arrange
        let (q0, q1, v0, v1) = (0.3, -0.6, 1.1, -0.4);
        let mut robot = build_planar_arm();
        robot.set_joint_q("shoulder", q0);
        robot.set_joint_q("elbow", q1);
        robot.set_joint_v("shoulder", v0);
        robot.set_joint_v("elbow", v1);
        robot.update();
        let index = JointIndexHandler::new(&[0, 1], robot.joints());
        let mut handler = CentroidalMomentumHandler::new(index.number_of_dofs());
        handler.compute(&robot, &index);
        let h0 = handler.centroidal_momentum();
        let convective = *handler.centroidal_momentum_convective_term();

        // Act
        let dt = 1e-6;
        robot.set_joint_q("shoulder", q0 + v0 * dt);
        robot.set_joint_q("elbow", q1 + v1 * dt);
        robot.update();
        handler.compute(&robot, &index);
        let h_dot = (handler.centroidal_momentum() - h0) / dt;

        // Assert
        assert_vec_close!(h_dot, convective, 1e-4);
    }

    #[test]
    fn momentum_rate_over_joint_subset() {
        // Arrange
        let robot = build_planar_arm();
        let index = JointIndexHandler::new(&[0, 1], robot.joints());
        let mut handler = CentroidalMomentumHandler::new(index.number_of_dofs());
        handler.compute(&robot, &index);

        // Act
        let rate = handler.compute_centroidal_momentum_rate(&index, &[1], &na::dvector![2.0]);

        // Assert
        let A = handler.centroidal_momentum_matrix();
        let expected = A.column(1) * 2.0;
        assert_vec_close!(rate, expected, 1e-12);
    }
}
