use na::Vector6;
use tracing::{debug, warn};

use crate::{
    config::ControllerCoreOptimizationSettings,
    controller_core::{
        commands::{
            FeedbackControlCommand, InverseDynamicsCommand, InverseKinematicsCommand,
            VirtualModelControlCommand,
        },
        feedback::WholeBodyFeedbackController,
        inverse_dynamics::InverseDynamicsSolver,
        inverse_kinematics::InverseKinematicsSolver,
        joint_index::JointIndexHandler,
        lowlevel::{LowLevelOneDoFJointDesiredDataHolder, RootJointDesiredConfigurationData},
        motion_qp_input_calculator::MotionQPInputCalculator,
        virtual_model_control::VirtualModelControlSolver,
    },
    error::ControllerCoreError,
    joint::JointId,
    kinematics::RobotModel,
    types::Float,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WholeBodyControllerCoreMode {
    Off,
    InverseDynamics,
    InverseKinematics,
    VirtualModel,
}

/// Everything the core needs for one control tick. Only the sublists of
/// the selected mode are used.
#[derive(Clone, Debug)]
pub struct ControllerCoreCommand {
    pub mode: WholeBodyControllerCoreMode,
    pub feedback_control_commands: Vec<FeedbackControlCommand>,
    pub inverse_dynamics_commands: Vec<InverseDynamicsCommand>,
    pub inverse_kinematics_commands: Vec<InverseKinematicsCommand>,
    pub virtual_model_control_commands: Vec<VirtualModelControlCommand>,
    /// Completes the solver output: joints and fields the solver leaves
    /// unset are taken from here
    pub lowlevel_desired_data: LowLevelOneDoFJointDesiredDataHolder,
}

impl ControllerCoreCommand {
    pub fn new(mode: WholeBodyControllerCoreMode) -> Self {
        ControllerCoreCommand {
            mode,
            feedback_control_commands: vec![],
            inverse_dynamics_commands: vec![],
            inverse_kinematics_commands: vec![],
            virtual_model_control_commands: vec![],
            lowlevel_desired_data: LowLevelOneDoFJointDesiredDataHolder::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ControllerCoreOutput {
    pub lowlevel: LowLevelOneDoFJointDesiredDataHolder,
    pub root: RootJointDesiredConfigurationData,
    /// Centroidal momentum rate achieved by the inverse dynamics solution
    pub achieved_momentum_rate: Option<Vector6<Float>>,
}

impl ControllerCoreOutput {
    pub fn clear(&mut self) {
        self.lowlevel.clear();
        self.root.clear();
        self.achieved_momentum_rate = None;
    }
}

/// Mode state machine dispatching each tick's commands to the inverse
/// dynamics, inverse kinematics or virtual model control solver, and
/// writing the result to the joints of the robot model
pub struct WholeBodyControllerCore {
    mode: WholeBodyControllerCoreMode,
    index: JointIndexHandler,
    calculator: MotionQPInputCalculator,
    feedback_controller: WholeBodyFeedbackController,
    inverse_dynamics_solver: InverseDynamicsSolver,
    inverse_kinematics_solver: InverseKinematicsSolver,
    virtual_model_control_solver: VirtualModelControlSolver,

    feedback_control_commands: Vec<FeedbackControlCommand>,
    lowlevel_desired_data: LowLevelOneDoFJointDesiredDataHolder,
    output: ControllerCoreOutput,
}

impl WholeBodyControllerCore {
    pub fn new(
        model: &dyn RobotModel,
        controlled_joints: &[JointId],
        settings: &ControllerCoreOptimizationSettings,
    ) -> Self {
        let index = JointIndexHandler::new(controlled_joints, model.joints());
        WholeBodyControllerCore {
            mode: WholeBodyControllerCoreMode::Off,
            calculator: MotionQPInputCalculator::new(&index, settings),
            feedback_controller: WholeBodyFeedbackController::new(),
            inverse_dynamics_solver: InverseDynamicsSolver::new(&index, settings),
            inverse_kinematics_solver: InverseKinematicsSolver::new(&index, settings),
            virtual_model_control_solver: VirtualModelControlSolver::new(settings),
            index,
            feedback_control_commands: vec![],
            lowlevel_desired_data: LowLevelOneDoFJointDesiredDataHolder::new(),
            output: ControllerCoreOutput::default(),
        }
    }

    pub fn current_mode(&self) -> WholeBodyControllerCoreMode {
        self.mode
    }

    pub fn joint_index_handler(&self) -> &JointIndexHandler {
        &self.index
    }

    pub fn output(&self) -> &ControllerCoreOutput {
        &self.output
    }

    pub fn inverse_dynamics_solver(&self) -> &InverseDynamicsSolver {
        &self.inverse_dynamics_solver
    }

    pub fn inverse_kinematics_solver(&self) -> &InverseKinematicsSolver {
        &self.inverse_kinematics_solver
    }

    pub fn virtual_model_control_solver(&self) -> &VirtualModelControlSolver {
        &self.virtual_model_control_solver
    }

    /// Number of QP solves run since construction, over all modes
    pub fn number_of_optimizations(&self) -> usize {
        self.inverse_dynamics_solver.number_of_solves()
            + self.inverse_kinematics_solver.number_of_solves()
            + self.virtual_model_control_solver.number_of_solves()
    }

    pub fn submit_controller_core_command(&mut self, command: ControllerCoreCommand) {
        self.inverse_dynamics_solver.reset();
        self.inverse_kinematics_solver.reset();
        self.virtual_model_control_solver.reset();
        self.output.clear();

        if command.mode != self.mode {
            debug!(from = ?self.mode, to = ?command.mode, "controller core mode change");
        }
        self.mode = command.mode;

        match self.mode {
            WholeBodyControllerCoreMode::Off => {}
            WholeBodyControllerCoreMode::InverseDynamics => self
                .inverse_dynamics_solver
                .submit(command.inverse_dynamics_commands),
            WholeBodyControllerCoreMode::InverseKinematics => self
                .inverse_kinematics_solver
                .submit(command.inverse_kinematics_commands),
            WholeBodyControllerCoreMode::VirtualModel => self
                .virtual_model_control_solver
                .submit(command.virtual_model_control_commands),
        }
        self.feedback_control_commands = command.feedback_control_commands;
        self.lowlevel_desired_data = command.lowlevel_desired_data;
    }

    pub fn compute(&mut self, model: &mut dyn RobotModel) -> Result<(), ControllerCoreError> {
        let feedback_control_commands = std::mem::take(&mut self.feedback_control_commands);

        match self.mode {
            WholeBodyControllerCoreMode::Off => {}
            WholeBodyControllerCoreMode::InverseDynamics => {
                self.calculator.initialize(&*model, &self.index);
                let commands = self
                    .feedback_controller
                    .compute_inverse_dynamics_commands(&*model, &feedback_control_commands);
                self.inverse_dynamics_solver.submit(commands);
                self.inverse_dynamics_solver
                    .solve(&*model, &self.index, &mut self.calculator)
                    .map_err(ControllerCoreError::InverseDynamics)?;

                let solver = &self.inverse_dynamics_solver;
                self.output.lowlevel.overwrite_with(solver.lowlevel_output());
                self.output.root = solver.root_output().clone();
                self.output.achieved_momentum_rate = Some(*solver.achieved_momentum_rate());
            }
            WholeBodyControllerCoreMode::InverseKinematics => {
                self.calculator.initialize(&*model, &self.index);
                self.inverse_kinematics_solver
                    .solve(&*model, &self.index, &mut self.calculator)
                    .map_err(ControllerCoreError::InverseKinematics)?;

                let solver = &self.inverse_kinematics_solver;
                self.output.lowlevel.overwrite_with(solver.lowlevel_output());
                self.output.root = solver.root_output().clone();
            }
            WholeBodyControllerCoreMode::VirtualModel => {
                self.calculator.initialize(&*model, &self.index);
                let commands = self
                    .feedback_controller
                    .compute_virtual_model_control_commands(&*model, &feedback_control_commands);
                self.virtual_model_control_solver.submit(commands);
                if let Err(fault) =
                    self.virtual_model_control_solver
                        .solve(&*model, &self.index, &self.calculator)
                {
                    warn!(cause = %fault.cause, "virtual model control failed, reusing previous solution");
                    self.virtual_model_control_solver.compute_joint_torques(
                        &*model,
                        &self.index,
                        &fault.previous_solution,
                    );
                }
                self.output
                    .lowlevel
                    .overwrite_with(self.virtual_model_control_solver.lowlevel_output());
            }
        }

        self.output.lowlevel.complete_with(&self.lowlevel_desired_data);
        parse_lowlevel_desired_data(model, &self.output.lowlevel);
        Ok(())
    }
}

/// Write the desired data to the joints. Fields absent from a record leave
/// the joint's value untouched.
///
/// Panics if a record has no control mode.
pub fn parse_lowlevel_desired_data(model: &mut dyn RobotModel, data: &LowLevelOneDoFJointDesiredDataHolder) {
    for (joint, record) in data.iter() {
        if !record.has_control_mode() {
            panic!(
                "joint {} has desired data but no control mode",
                model.joints()[*joint].name()
            );
        }
        model.joints_mut()[*joint]
            .one_dof_mut()
            .desired
            .overwrite_with(record);
    }
}

#[cfg(test)]
mod whole_body_controller_tests {
    use na::vector;

    use crate::{
        assert_close,
        controller_core::{
            commands::{
                ContactStateCommand, JointspaceVelocityCommand, MomentumRateCommand,
                OneDoFJointFeedbackCommand, PDGains,
            },
            lowlevel::JointDesiredControlMode,
        },
        error::QPSolverError,
        helpers::{biped_sole_contact_points, build_floating_biped, build_planar_arm},
    };

    use super::*;

    fn arm_core(arm: &dyn RobotModel) -> WholeBodyControllerCore {
        WholeBodyControllerCore::new(arm, &[0, 1], &ControllerCoreOptimizationSettings::default())
    }

    #[test]
    fn off_mode_leaves_desired_values_untouched() {
        // Arrange
        let mut arm = build_planar_arm();
        arm.joints_mut()[1].one_dof_mut().desired.desired_torque = Some(3.);
        let mut core = arm_core(&arm);

        // Act
        core.submit_controller_core_command(ControllerCoreCommand::new(WholeBodyControllerCoreMode::Off));
        core.compute(&mut arm).unwrap();

        // Assert
        assert_eq!(core.current_mode(), WholeBodyControllerCoreMode::Off);
        assert_eq!(arm.joints()[1].one_dof().desired.desired_torque, Some(3.));
        assert_eq!(core.number_of_optimizations(), 0);
    }

    #[test]
    #[should_panic(expected = "no control mode")]
    fn desired_data_without_control_mode_panics() {
        let mut arm = build_planar_arm();
        let mut core = arm_core(&arm);
        let mut command = ControllerCoreCommand::new(WholeBodyControllerCoreMode::Off);
        command.lowlevel_desired_data.set_desired_position(0, 0.1);

        core.submit_controller_core_command(command);
        let _ = core.compute(&mut arm);
    }

    #[test]
    fn inverse_dynamics_torques_reach_the_joints() {
        // Arrange
        let mut arm = build_planar_arm();
        arm.set_joint_q("elbow", 0.3);
        arm.update();
        let mut core = arm_core(&arm);
        let mut command = ControllerCoreCommand::new(WholeBodyControllerCoreMode::InverseDynamics);
        for joint in [0, 1] {
            command
                .feedback_control_commands
                .push(FeedbackControlCommand::OneDoFJoint(OneDoFJointFeedbackCommand {
                    joint,
                    desired_position: 0.,
                    desired_velocity: 0.,
                    feedforward_acceleration: 0.,
                    gains: PDGains { kp: 10., kd: 1. },
                    weight: None,
                }));
        }

        // Act
        core.submit_controller_core_command(command);
        core.compute(&mut arm).unwrap();

        // Assert
        let qdd = core.inverse_dynamics_solver().joint_accelerations().clone();
        assert_close!(qdd[0], 0., 1e-5);
        assert_close!(qdd[1], -3., 1e-5);
        let tau = arm.mass_matrix() * &qdd + arm.bias_forces();
        for joint in [0, 1] {
            let desired = &arm.joints()[joint].one_dof().desired;
            assert_eq!(desired.control_mode, Some(JointDesiredControlMode::Effort));
            assert_close!(desired.desired_torque.unwrap(), tau[joint], 1e-8);
        }
        assert_eq!(core.number_of_optimizations(), 1);
        assert!(core.output().achieved_momentum_rate.is_some());
    }

    #[test]
    fn inverse_dynamics_failure_is_an_error() {
        let mut arm = build_planar_arm();
        let mut core = arm_core(&arm);
        let mut command = ControllerCoreCommand::new(WholeBodyControllerCoreMode::InverseDynamics);
        command
            .feedback_control_commands
            .push(FeedbackControlCommand::OneDoFJoint(OneDoFJointFeedbackCommand {
                joint: 0,
                desired_position: Float::NAN,
                desired_velocity: 0.,
                feedforward_acceleration: 0.,
                gains: PDGains { kp: 10., kd: 1. },
                weight: None,
            }));

        core.submit_controller_core_command(command);
        let result = core.compute(&mut arm);

        assert_eq!(
            result,
            Err(ControllerCoreError::InverseDynamics(QPSolverError::NonFiniteProblem))
        );
    }

    #[test]
    fn user_desired_data_completes_inverse_kinematics_output() {
        // Arrange
        let mut arm = build_planar_arm();
        let mut core = arm_core(&arm);
        let mut command = ControllerCoreCommand::new(WholeBodyControllerCoreMode::InverseKinematics);
        let mut velocity = JointspaceVelocityCommand::default();
        velocity.add_one_dof_joint(0, 0.5);
        velocity.add_one_dof_joint(1, 0.);
        command
            .inverse_kinematics_commands
            .push(InverseKinematicsCommand::JointspaceVelocity(velocity));
        command.lowlevel_desired_data.set_control_mode(1, JointDesiredControlMode::Effort);
        command.lowlevel_desired_data.set_desired_torque(1, 1.5);

        // Act
        core.submit_controller_core_command(command);
        core.compute(&mut arm).unwrap();

        // Assert
        let dt = ControllerCoreOptimizationSettings::default().control_dt;
        let shoulder = &arm.joints()[0].one_dof().desired;
        assert_eq!(shoulder.control_mode, Some(JointDesiredControlMode::Position));
        assert_close!(shoulder.desired_position.unwrap(), 0.5 * dt, 1e-6);
        let elbow = &arm.joints()[1].one_dof().desired;
        // the solver's mode wins, the torque comes from the user
        assert_eq!(elbow.control_mode, Some(JointDesiredControlMode::Position));
        assert_eq!(elbow.desired_torque, Some(1.5));
    }

    #[test]
    fn virtual_model_control_failure_reuses_previous_forces() {
        // Arrange
        let mut biped = build_floating_biped();
        let controlled: Vec<JointId> = (0..biped.joints().len()).collect();
        let mut core =
            WholeBodyControllerCore::new(&biped, &controlled, &ControllerCoreOptimizationSettings::default());
        let stand = |rate: Vector6<Float>| {
            let mut command = ControllerCoreCommand::new(WholeBodyControllerCoreMode::VirtualModel);
            command
                .virtual_model_control_commands
                .push(VirtualModelControlCommand::MomentumRate(MomentumRateCommand::new(rate)));
            for body in ["left_shin", "right_shin"] {
                command
                    .virtual_model_control_commands
                    .push(VirtualModelControlCommand::ContactState(ContactStateCommand::new(
                        body,
                        biped_sole_contact_points(),
                    )));
            }
            command
        };
        core.submit_controller_core_command(stand(Vector6::zeros()));
        core.compute(&mut biped).unwrap();
        let knee_torque = biped.joints()[2].one_dof().desired.desired_torque.unwrap();

        // Act
        core.submit_controller_core_command(stand(vector![0., 0., 0., 0., 0., Float::NAN]));
        let result = core.compute(&mut biped);

        // Assert
        assert!(result.is_ok());
        assert_eq!(core.number_of_optimizations(), 1);
        assert_eq!(biped.joints()[2].one_dof().desired.desired_torque, Some(knee_torque));
    }
}
