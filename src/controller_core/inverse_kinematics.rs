use na::DVector;

use crate::{
    config::ControllerCoreOptimizationSettings,
    controller_core::{
        commands::InverseKinematicsCommand,
        joint_index::JointIndexHandler,
        lowlevel::{
            JointDesiredControlMode, LowLevelOneDoFJointDesiredDataHolder,
            RootJointDesiredConfigurationData,
        },
        motion_qp_input::MotionQPInput,
        motion_qp_input_calculator::MotionQPInputCalculator,
        qp::MotionQPSolver,
    },
    error::QPSolverError,
    joint::Joint,
    kinematics::RobotModel,
    spatial::spatial_vector::SpatialVector,
    types::Float,
};

/// Solves for the joint velocities that best achieve the submitted
/// velocity tasks, and integrates them over one control period into
/// desired joint positions.
pub struct InverseKinematicsSolver {
    joint_velocity_weight: Float,
    control_dt: Float,

    qp: MotionQPSolver,
    motion_input: MotionQPInput,
    commands: Vec<InverseKinematicsCommand>,

    joint_velocities: DVector<Float>,
    lowlevel_output: LowLevelOneDoFJointDesiredDataHolder,
    root_output: RootJointDesiredConfigurationData,
}

impl InverseKinematicsSolver {
    pub fn new(index: &JointIndexHandler, settings: &ControllerCoreOptimizationSettings) -> Self {
        InverseKinematicsSolver {
            joint_velocity_weight: settings.joint_velocity_weight,
            control_dt: settings.control_dt,
            qp: MotionQPSolver::new(),
            motion_input: MotionQPInput::new(index.number_of_dofs()),
            commands: vec![],
            joint_velocities: DVector::zeros(index.number_of_dofs()),
            lowlevel_output: LowLevelOneDoFJointDesiredDataHolder::new(),
            root_output: RootJointDesiredConfigurationData::default(),
        }
    }

    pub fn reset(&mut self) {
        self.commands.clear();
        self.lowlevel_output.clear();
        self.root_output.clear();
    }

    pub fn submit(&mut self, commands: Vec<InverseKinematicsCommand>) {
        self.commands.extend(commands);
    }

    pub fn number_of_solves(&self) -> usize {
        self.qp.number_of_solves()
    }

    /// Solved velocities, in the joint index space
    pub fn joint_velocities(&self) -> &DVector<Float> {
        &self.joint_velocities
    }

    pub fn lowlevel_output(&self) -> &LowLevelOneDoFJointDesiredDataHolder {
        &self.lowlevel_output
    }

    pub fn root_output(&self) -> &RootJointDesiredConfigurationData {
        &self.root_output
    }

    pub fn solve(
        &mut self,
        model: &dyn RobotModel,
        index: &JointIndexHandler,
        calculator: &mut MotionQPInputCalculator,
    ) -> Result<(), QPSolverError> {
        let commands = std::mem::take(&mut self.commands);
        for command in commands.iter() {
            match command {
                InverseKinematicsCommand::PrivilegedConfiguration(privileged) => {
                    calculator.submit_privileged_configuration_command(privileged, model)
                }
                InverseKinematicsCommand::JointLimitReduction(reduction) => {
                    calculator.submit_joint_limit_reduction_command(reduction)
                }
                _ => {}
            }
        }

        let n = index.number_of_dofs();
        self.qp.reset(n, 0);

        for command in commands.iter() {
            let converted = match command {
                InverseKinematicsCommand::SpatialVelocity(command) => calculator
                    .convert_spatial_velocity_command(model, index, command, &mut self.motion_input),
                InverseKinematicsCommand::Momentum(command) => {
                    calculator.convert_momentum_command(index, command, &mut self.motion_input)
                }
                InverseKinematicsCommand::JointspaceVelocity(command) => calculator
                    .convert_jointspace_velocity_command(index, command, &mut self.motion_input),
                InverseKinematicsCommand::PrivilegedConfiguration(_)
                | InverseKinematicsCommand::JointLimitReduction(_) => false,
            };
            if converted {
                self.qp.add_motion_input(&self.motion_input);
            }
        }

        if calculator.compute_privileged_joint_velocities(model, index, &mut self.motion_input) {
            self.qp.add_motion_input(&self.motion_input);
        }

        let (qd_min, qd_max) = calculator.compute_joint_velocity_limits(model, index);
        self.qp.set_variable_bounds(0, &qd_min, &qd_max);
        self.qp.add_regularization(0, n, self.joint_velocity_weight);

        self.joint_velocities = self.qp.solve()?;
        self.write_output(model, index);
        Ok(())
    }

    fn write_output(&mut self, model: &dyn RobotModel, index: &JointIndexHandler) {
        self.lowlevel_output.clear();
        self.root_output.clear();

        let dt = self.control_dt;
        for joint in index.indexed_joints() {
            let column = match index.joint_indices(*joint) {
                Some(columns) => columns[0],
                None => continue,
            };
            match &model.joints()[*joint] {
                Joint::Floating(floating) => {
                    let qd = self.joint_velocities.fixed_rows::<6>(column);
                    let velocity = SpatialVector::from_slice(qd.as_slice());
                    self.root_output.desired_pose =
                        Some(floating.pose.integrate(&velocity.angular, &velocity.linear, dt));
                    self.root_output.desired_velocity = Some(velocity);
                }
                joint_model => {
                    let qd = self.joint_velocities[column];
                    let data = self.lowlevel_output.get_or_insert(*joint);
                    data.control_mode = Some(JointDesiredControlMode::Position);
                    data.desired_velocity = Some(qd);
                    data.desired_position = Some(joint_model.one_dof().q + qd * dt);
                }
            }
        }
    }
}

#[cfg(test)]
mod inverse_kinematics_tests {
    use na::{dvector, vector, Vector6};

    use crate::{
        assert_close, assert_vec_close,
        controller_core::{
            commands::{JointspaceVelocityCommand, MomentumCommand, SpatialVelocityCommand},
            selection::SelectionMatrix,
        },
        helpers::{build_floating_biped, build_planar_arm},
        joint::JointId,
        util::skew_symmetric,
        WORLD_FRAME,
    };

    use super::*;

    fn setup(model: &dyn RobotModel) -> (JointIndexHandler, MotionQPInputCalculator, InverseKinematicsSolver) {
        let controlled: Vec<JointId> = (0..model.joints().len()).collect();
        let index = JointIndexHandler::new(&controlled, model.joints());
        let settings = ControllerCoreOptimizationSettings::default();
        let mut calculator = MotionQPInputCalculator::new(&index, &settings);
        calculator.initialize(model, &index);
        let solver = InverseKinematicsSolver::new(&index, &settings);
        (index, calculator, solver)
    }

    #[test]
    fn hand_velocity_in_the_arm_plane() {
        // Arrange
        let mut arm = build_planar_arm();
        arm.set_joint_q("shoulder", 0.4);
        arm.set_joint_q("elbow", 0.8);
        arm.update();
        let (index, mut calculator, mut solver) = setup(&arm);
        let mut command = SpatialVelocityCommand::new(WORLD_FRAME, "forearm");
        command.control_point = vector![0.4, 0., 0.];
        command.desired_linear_velocity = vector![0.2, 0., -0.1];
        command.selection = SelectionMatrix::from_axes(6, &[3, 5]);
        solver.submit(vec![InverseKinematicsCommand::SpatialVelocity(command)]);

        // Act
        solver.solve(&arm, &index, &mut calculator).unwrap();

        // Assert
        let tip = arm.frame_to_world("hand").trans();
        let J = arm.jacobian(WORLD_FRAME, "forearm", WORLD_FRAME).jacobian;
        let J_tip = &J.linear - skew_symmetric(&tip) * &J.angular;
        let v_tip = J_tip * solver.joint_velocities();
        assert_close!(v_tip.x, 0.2, 1e-5);
        assert_close!(v_tip.z, -0.1, 1e-5);

        let dt = ControllerCoreOptimizationSettings::default().control_dt;
        let elbow = solver.lowlevel_output().get(1).unwrap();
        assert_eq!(elbow.control_mode, Some(JointDesiredControlMode::Position));
        assert_close!(
            elbow.desired_position.unwrap(),
            0.8 + solver.joint_velocities()[1] * dt,
            1e-12
        );
    }

    #[test]
    fn velocity_limits_clip_joint_velocity_tasks() {
        let arm = build_planar_arm();
        let (index, mut calculator, mut solver) = setup(&arm);
        let mut command = JointspaceVelocityCommand::default();
        command.add_one_dof_joint(0, 50.);
        command.add_one_dof_joint(1, -0.5);
        command.weights = Some(vec![1., 1.]);
        solver.submit(vec![InverseKinematicsCommand::JointspaceVelocity(command)]);

        solver.solve(&arm, &index, &mut calculator).unwrap();

        let max = ControllerCoreOptimizationSettings::default().maximum_joint_velocity;
        assert_close!(solver.joint_velocities()[0], max, 1e-4);
        assert_close!(solver.joint_velocities()[1], -0.5, 1e-2);
    }

    #[test]
    fn momentum_task_moves_the_whole_robot() {
        // Arrange
        let biped = build_floating_biped();
        let (index, mut calculator, mut solver) = setup(&biped);
        let linear_momentum = vector![0.2, 0., 0.] * biped.total_mass();
        let mut command = MomentumCommand::new(Vector6::new(
            0.,
            0.,
            0.,
            linear_momentum.x,
            linear_momentum.y,
            linear_momentum.z,
        ));
        command.selection = SelectionMatrix::from_axes(6, &[3, 4, 5]);
        solver.submit(vec![InverseKinematicsCommand::Momentum(command)]);

        // Act
        solver.solve(&biped, &index, &mut calculator).unwrap();

        // Assert
        let A = calculator.centroidal_momentum_handler().centroidal_momentum_matrix();
        let h = A * solver.joint_velocities();
        assert_vec_close!(&h.rows(3, 3), &linear_momentum, 1e-6);
        let root = solver.root_output();
        assert!(root.desired_velocity.as_ref().unwrap().linear.x > 0.);
    }

    #[test]
    fn floating_base_pose_is_integrated() {
        // Arrange
        let biped = build_floating_biped();
        let (index, mut calculator, mut solver) = setup(&biped);
        let mut command = JointspaceVelocityCommand::default();
        command.joints.push(0);
        command.desired.push(dvector![0., 0., 0., 0., 0., 0.5]);
        for joint in 1..biped.joints().len() {
            command.add_one_dof_joint(joint, 0.);
        }
        solver.submit(vec![InverseKinematicsCommand::JointspaceVelocity(command)]);

        // Act
        solver.solve(&biped, &index, &mut calculator).unwrap();

        // Assert
        let dt = ControllerCoreOptimizationSettings::default().control_dt;
        let root = solver.root_output();
        let pose = root.desired_pose.unwrap();
        assert_vec_close!(root.desired_velocity.as_ref().unwrap().linear, vector![0., 0., 0.5], 1e-6);
        assert_close!(pose.translation.z, 0.9 + 0.5 * dt, 1e-6);
    }
}
