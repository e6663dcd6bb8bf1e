use na::{DMatrix, Vector3};

use crate::{
    controller_core::commands::{
        FeedbackControlCommand, InverseDynamicsCommand, JointTorqueCommand,
        JointspaceAccelerationCommand, OneDoFJointFeedbackCommand, SpatialAccelerationCommand,
        SpatialFeedbackCommand, VirtualModelControlCommand, VirtualWrenchCommand,
    },
    kinematics::RobotModel,
    spatial::wrench::Wrench,
    types::Float,
    WORLD_FRAME,
};

/// Feedback output of a spatial controller: angular and linear
/// acceleration of the control point, in world
struct SpatialFeedback {
    angular: Vector3<Float>,
    linear: Vector3<Float>,
    position: Vector3<Float>,
}

/// PD controllers that turn feedback commands into inverse dynamics or
/// virtual model control commands
#[derive(Default)]
pub struct WholeBodyFeedbackController {}

impl WholeBodyFeedbackController {
    pub fn new() -> Self {
        WholeBodyFeedbackController {}
    }

    /// Control point pose and velocity tracking, in world:
    ///     alpha = alpha_ff + kp_o e_o + kd_o (w_des - w)
    ///     a     = a_ff + kp_p (p_des - p) + kd_p (v_des - v)
    /// with e_o the rotation vector of R_des R^T
    fn spatial_feedback(model: &dyn RobotModel, command: &SpatialFeedbackCommand) -> SpatialFeedback {
        let ee_to_world = model.body_to_world(&command.end_effector);
        let position = ee_to_world.transform_point(&command.control_point);
        let rotation = ee_to_world.iso.rotation;

        let ee_twist = model.twist(&command.end_effector);
        let base_twist = model.twist(&command.base);
        let relative = &ee_twist - &base_twist;
        let angular_velocity = relative.angular;
        let linear_velocity = relative.point_velocity(&position);

        let orientation_error = (command.desired_pose.rotation * rotation.inverse()).scaled_axis();
        let position_error = command.desired_pose.translation - position;

        let o = command.orientation_gains;
        let p = command.position_gains;
        SpatialFeedback {
            angular: command.feedforward_angular_acceleration
                + orientation_error * o.kp
                + (command.desired_angular_velocity - angular_velocity) * o.kd,
            linear: command.feedforward_linear_acceleration
                + position_error * p.kp
                + (command.desired_linear_velocity - linear_velocity) * p.kd,
            position,
        }
    }

    fn joint_feedback(model: &dyn RobotModel, command: &OneDoFJointFeedbackCommand) -> Float {
        let state = model.joints()[command.joint].one_dof();
        command.feedforward_acceleration
            + command.gains.kp * (command.desired_position - state.q)
            + command.gains.kd * (command.desired_velocity - state.v)
    }

    pub fn compute_inverse_dynamics_commands(
        &self,
        model: &dyn RobotModel,
        commands: &[FeedbackControlCommand],
    ) -> Vec<InverseDynamicsCommand> {
        commands
            .iter()
            .map(|command| match command {
                FeedbackControlCommand::Spatial(command) => {
                    let feedback = Self::spatial_feedback(model, command);
                    let mut acceleration =
                        SpatialAccelerationCommand::new(&command.base, &command.end_effector);
                    acceleration.control_point = command.control_point;
                    acceleration.expressed_in = WORLD_FRAME.to_string();
                    acceleration.desired_angular_acceleration = feedback.angular;
                    acceleration.desired_linear_acceleration = feedback.linear;
                    acceleration.selection = command.selection.clone();
                    acceleration.weight = command.weight.clone();
                    acceleration.hard_constraint = command.weight.is_none();
                    acceleration.primary_base = command.primary_base.clone();
                    InverseDynamicsCommand::SpatialAcceleration(acceleration)
                }
                FeedbackControlCommand::OneDoFJoint(command) => {
                    let mut acceleration = JointspaceAccelerationCommand::default();
                    acceleration.add_one_dof_joint(command.joint, Self::joint_feedback(model, command));
                    match command.weight {
                        Some(weight) => acceleration.weights = Some(vec![weight]),
                        None => acceleration.hard_constraint = true,
                    }
                    InverseDynamicsCommand::JointspaceAcceleration(acceleration)
                }
            })
            .collect()
    }

    /// Spatial feedback becomes a virtual wrench [tau + p x F; F] in world,
    /// with the feedback accelerations read as torque and force at the
    /// control point. Joint feedback becomes a joint torque.
    pub fn compute_virtual_model_control_commands(
        &self,
        model: &dyn RobotModel,
        commands: &[FeedbackControlCommand],
    ) -> Vec<VirtualModelControlCommand> {
        commands
            .iter()
            .map(|command| match command {
                FeedbackControlCommand::Spatial(command) => {
                    let feedback = Self::spatial_feedback(model, command);
                    let (torque, force) = Self::select(command, &feedback);
                    let wrench = Wrench::new(
                        WORLD_FRAME,
                        torque + feedback.position.cross(&force),
                        force,
                    );
                    VirtualModelControlCommand::VirtualWrench(VirtualWrenchCommand {
                        body: command.end_effector.clone(),
                        wrench,
                    })
                }
                FeedbackControlCommand::OneDoFJoint(command) => {
                    VirtualModelControlCommand::JointTorque(JointTorqueCommand {
                        joints: vec![command.joint],
                        desired_torques: vec![Self::joint_feedback(model, command)],
                    })
                }
            })
            .collect()
    }

    /// Keep only the selected components: S^T S [torque; force]
    fn select(command: &SpatialFeedbackCommand, feedback: &SpatialFeedback) -> (Vector3<Float>, Vector3<Float>) {
        let S = command.selection.matrix();
        let mut full = DMatrix::zeros(6, 1);
        full.fixed_view_mut::<3, 1>(0, 0).copy_from(&feedback.angular);
        full.fixed_view_mut::<3, 1>(3, 0).copy_from(&feedback.linear);
        let selected = S.transpose() * (S * full);
        (
            selected.fixed_view::<3, 1>(0, 0).into_owned(),
            selected.fixed_view::<3, 1>(3, 0).into_owned(),
        )
    }
}

#[cfg(test)]
mod feedback_tests {
    use na::{vector, UnitQuaternion};

    use crate::{
        assert_close, assert_vec_close,
        controller_core::{commands::PDGains, selection::SelectionMatrix},
        helpers::build_planar_arm,
        spatial::pose::Pose,
    };

    use super::*;

    #[test]
    fn joint_feedback_is_pd_plus_feedforward() {
        // Arrange
        let mut arm = build_planar_arm();
        arm.set_joint_q("elbow", 0.5);
        arm.set_joint_v("elbow", -0.2);
        arm.update();
        let command = FeedbackControlCommand::OneDoFJoint(OneDoFJointFeedbackCommand {
            joint: 1,
            desired_position: 1.0,
            desired_velocity: 0.,
            feedforward_acceleration: 0.3,
            gains: PDGains { kp: 100., kd: 20. },
            weight: Some(2.),
        });
        let controller = WholeBodyFeedbackController::new();

        // Act
        let id = controller.compute_inverse_dynamics_commands(&arm, &[command.clone()]);
        let vmc = controller.compute_virtual_model_control_commands(&arm, &[command]);

        // Assert
        let expected = 0.3 + 100. * 0.5 + 20. * 0.2;
        match &id[0] {
            InverseDynamicsCommand::JointspaceAcceleration(c) => {
                assert_close!(c.desired[0][0], expected, 1e-12);
                assert_eq!(c.weights, Some(vec![2.]));
                assert!(!c.hard_constraint);
            }
            other => panic!("unexpected command {:?}", other),
        }
        match &vmc[0] {
            VirtualModelControlCommand::JointTorque(c) => {
                assert_close!(c.desired_torques[0], expected, 1e-12)
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn spatial_feedback_pulls_toward_desired_pose() {
        // Arrange
        let arm = build_planar_arm();
        let desired = Pose {
            rotation: UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.1),
            translation: vector![0.8, 0., 0.1],
        };
        let mut command = SpatialFeedbackCommand::new(WORLD_FRAME, "forearm", desired);
        command.control_point = vector![0.4, 0., 0.];
        command.orientation_gains = PDGains { kp: 10., kd: 1. };
        command.position_gains = PDGains { kp: 50., kd: 5. };
        let command = FeedbackControlCommand::Spatial(command);
        let controller = WholeBodyFeedbackController::new();

        // Act
        let id = controller.compute_inverse_dynamics_commands(&arm, &[command]);

        // Assert
        match &id[0] {
            InverseDynamicsCommand::SpatialAcceleration(c) => {
                assert_vec_close!(c.desired_angular_acceleration, vector![0., 1., 0.], 1e-10);
                assert_vec_close!(c.desired_linear_acceleration, vector![-5., 0., 5.], 1e-10);
                assert!(c.hard_constraint);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn selected_spatial_feedback_becomes_a_virtual_force() {
        let arm = build_planar_arm();
        let mut desired = Pose::identity();
        desired.translation = vector![0.9, 0., 0.2];
        let mut command = SpatialFeedbackCommand::new(WORLD_FRAME, "forearm", desired);
        command.control_point = vector![0.4, 0., 0.];
        command.position_gains = PDGains { kp: 10., kd: 0. };
        command.orientation_gains = PDGains { kp: 10., kd: 0. };
        command.selection = SelectionMatrix::from_axes(6, &[3, 4, 5]);
        let controller = WholeBodyFeedbackController::new();

        let vmc =
            controller.compute_virtual_model_control_commands(&arm, &[FeedbackControlCommand::Spatial(command)]);

        match &vmc[0] {
            VirtualModelControlCommand::VirtualWrench(c) => {
                let force = vector![0., 0., 2.];
                let tip = vector![0.9, 0., 0.];
                assert_eq!(c.body, "forearm");
                assert_vec_close!(c.wrench.linear, force, 1e-10);
                assert_vec_close!(c.wrench.angular, tip.cross(&force), 1e-10);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
