//! Task commands submitted to the controller core, grouped per mode.

use na::{DMatrix, DVector, Vector3, Vector6};

use crate::{
    controller_core::selection::SelectionMatrix,
    joint::JointId,
    spatial::{pose::Pose, wrench::Wrench},
    types::Float,
    WORLD_FRAME,
};

/// Desired angular acceleration and linear acceleration of a control point
/// fixed to `end_effector`, relative to `base`, expressed in `expressed_in`.
#[derive(Clone, Debug)]
pub struct SpatialAccelerationCommand {
    pub base: String,
    pub end_effector: String,
    /// Control point in the end effector frame
    pub control_point: Vector3<Float>,
    pub expressed_in: String,
    pub desired_angular_acceleration: Vector3<Float>,
    pub desired_linear_acceleration: Vector3<Float>,
    pub selection: SelectionMatrix,
    /// 6 x 6 weight in the expressed-in frame; None makes the task hard
    pub weight: Option<DMatrix<Float>>,
    pub hard_constraint: bool,
    /// Joints at or above this body get their columns scaled by the
    /// secondary task joints weight
    pub primary_base: Option<String>,
    pub alpha_task_priority: Float,
}

impl SpatialAccelerationCommand {
    pub fn new(base: &str, end_effector: &str) -> Self {
        SpatialAccelerationCommand {
            base: base.to_string(),
            end_effector: end_effector.to_string(),
            control_point: Vector3::zeros(),
            expressed_in: WORLD_FRAME.to_string(),
            desired_angular_acceleration: Vector3::zeros(),
            desired_linear_acceleration: Vector3::zeros(),
            selection: SelectionMatrix::identity(6),
            weight: None,
            hard_constraint: false,
            primary_base: None,
            alpha_task_priority: 1.,
        }
    }

    pub fn set_weight(&mut self, weight: Float) {
        self.weight = Some(DMatrix::identity(6, 6) * weight);
    }

    pub fn set_weights(&mut self, angular: Float, linear: Float) {
        let diagonal = DVector::from_vec(vec![angular, angular, angular, linear, linear, linear]);
        self.weight = Some(DMatrix::from_diagonal(&diagonal));
    }
}

/// Linear acceleration of a point fixed to `end_effector`
#[derive(Clone, Debug)]
pub struct PointAccelerationCommand {
    pub base: String,
    pub end_effector: String,
    pub body_fixed_point: Vector3<Float>,
    pub expressed_in: String,
    pub desired_acceleration: Vector3<Float>,
    pub selection: SelectionMatrix,
    pub weight: Option<DMatrix<Float>>,
    pub hard_constraint: bool,
    pub alpha_task_priority: Float,
}

impl PointAccelerationCommand {
    pub fn new(base: &str, end_effector: &str, body_fixed_point: Vector3<Float>) -> Self {
        PointAccelerationCommand {
            base: base.to_string(),
            end_effector: end_effector.to_string(),
            body_fixed_point,
            expressed_in: WORLD_FRAME.to_string(),
            desired_acceleration: Vector3::zeros(),
            selection: SelectionMatrix::identity(3),
            weight: None,
            hard_constraint: false,
            alpha_task_priority: 1.,
        }
    }

    pub fn set_weight(&mut self, weight: Float) {
        self.weight = Some(DMatrix::identity(3, 3) * weight);
    }
}

/// Velocity counterpart of SpatialAccelerationCommand
#[derive(Clone, Debug)]
pub struct SpatialVelocityCommand {
    pub base: String,
    pub end_effector: String,
    pub control_point: Vector3<Float>,
    pub expressed_in: String,
    pub desired_angular_velocity: Vector3<Float>,
    pub desired_linear_velocity: Vector3<Float>,
    pub selection: SelectionMatrix,
    pub weight: Option<DMatrix<Float>>,
    pub hard_constraint: bool,
    pub alpha_task_priority: Float,
}

impl SpatialVelocityCommand {
    pub fn new(base: &str, end_effector: &str) -> Self {
        SpatialVelocityCommand {
            base: base.to_string(),
            end_effector: end_effector.to_string(),
            control_point: Vector3::zeros(),
            expressed_in: WORLD_FRAME.to_string(),
            desired_angular_velocity: Vector3::zeros(),
            desired_linear_velocity: Vector3::zeros(),
            selection: SelectionMatrix::identity(6),
            weight: None,
            hard_constraint: false,
            alpha_task_priority: 1.,
        }
    }

    pub fn set_weight(&mut self, weight: Float) {
        self.weight = Some(DMatrix::identity(6, 6) * weight);
    }
}

/// Desired rate of change of the centroidal momentum [angular; linear].
/// `alpha_task_priority` holds one priority per momentum axis.
#[derive(Clone, Debug)]
pub struct MomentumRateCommand {
    pub desired_momentum_rate: Vector6<Float>,
    pub selection: SelectionMatrix,
    pub weight: Option<DMatrix<Float>>,
    pub hard_constraint: bool,
    pub alpha_task_priority: Vector6<Float>,
}

impl MomentumRateCommand {
    pub fn new(desired_momentum_rate: Vector6<Float>) -> Self {
        MomentumRateCommand {
            desired_momentum_rate,
            selection: SelectionMatrix::identity(6),
            weight: None,
            hard_constraint: false,
            alpha_task_priority: Vector6::repeat(1.),
        }
    }

    pub fn set_weight(&mut self, weight: Float) {
        self.weight = Some(DMatrix::identity(6, 6) * weight);
    }

    /// Priority of each selected row, from the momentum axes it selects:
    /// alpha_row = sum_j S_ij^2 alpha_j
    pub fn row_task_priorities(&self) -> Vec<Float> {
        self.selection
            .matrix()
            .row_iter()
            .map(|row| {
                row.iter()
                    .zip(self.alpha_task_priority.iter())
                    .map(|(s, alpha)| s * s * alpha)
                    .sum::<Float>()
            })
            .collect()
    }
}

/// Desired centroidal momentum, for inverse kinematics
#[derive(Clone, Debug)]
pub struct MomentumCommand {
    pub desired_momentum: Vector6<Float>,
    pub selection: SelectionMatrix,
    pub weight: Option<DMatrix<Float>>,
    pub hard_constraint: bool,
}

impl MomentumCommand {
    pub fn new(desired_momentum: Vector6<Float>) -> Self {
        MomentumCommand {
            desired_momentum,
            selection: SelectionMatrix::identity(6),
            weight: None,
            hard_constraint: false,
        }
    }

    pub fn set_weight(&mut self, weight: Float) {
        self.weight = Some(DMatrix::identity(6, 6) * weight);
    }
}

/// Desired accelerations of individual joints. `desired[i]` has one entry
/// per DoF of `joints[i]`. Without weights the command is hard.
#[derive(Clone, Debug, Default)]
pub struct JointspaceAccelerationCommand {
    pub joints: Vec<JointId>,
    pub desired: Vec<DVector<Float>>,
    pub weights: Option<Vec<Float>>,
    pub hard_constraint: bool,
}

impl JointspaceAccelerationCommand {
    pub fn add_one_dof_joint(&mut self, joint: JointId, desired: Float) {
        self.joints.push(joint);
        self.desired.push(DVector::from_element(1, desired));
    }
}

/// Velocity counterpart of JointspaceAccelerationCommand
#[derive(Clone, Debug, Default)]
pub struct JointspaceVelocityCommand {
    pub joints: Vec<JointId>,
    pub desired: Vec<DVector<Float>>,
    pub weights: Option<Vec<Float>>,
    pub hard_constraint: bool,
}

impl JointspaceVelocityCommand {
    pub fn add_one_dof_joint(&mut self, joint: JointId, desired: Float) {
        self.joints.push(joint);
        self.desired.push(DVector::from_element(1, desired));
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrivilegedConfigurationOption {
    AtZero,
    AtMidRangeOfMotion,
    /// Captured when the command is submitted
    AtCurrent,
}

/// Overrides for one joint. Unset fields take the command defaults.
#[derive(Clone, Debug, Default)]
pub struct PrivilegedJointSettings {
    pub joint: JointId,
    pub configuration: Option<Float>,
    pub option: Option<PrivilegedConfigurationOption>,
    pub weight: Option<Float>,
    pub configuration_gain: Option<Float>,
    pub velocity_gain: Option<Float>,
    pub max_velocity: Option<Float>,
    pub max_acceleration: Option<Float>,
}

/// Kinematic chain getting its own nullspace block
#[derive(Clone, Debug, PartialEq)]
pub struct KinematicChain {
    pub base: String,
    pub end_effector: String,
}

/// Posture bias acting in the nullspace of the other tasks. The enabled
/// state persists until a command disables it.
#[derive(Clone, Debug)]
pub struct PrivilegedConfigurationCommand {
    pub enable: bool,
    pub default_option: Option<PrivilegedConfigurationOption>,
    pub default_weight: Option<Float>,
    pub default_configuration_gain: Option<Float>,
    pub default_velocity_gain: Option<Float>,
    pub default_max_velocity: Option<Float>,
    pub default_max_acceleration: Option<Float>,
    pub joints: Vec<PrivilegedJointSettings>,
    pub chains: Vec<KinematicChain>,
}

impl PrivilegedConfigurationCommand {
    pub fn enabled(default_option: PrivilegedConfigurationOption) -> Self {
        PrivilegedConfigurationCommand {
            enable: true,
            default_option: Some(default_option),
            default_weight: None,
            default_configuration_gain: None,
            default_velocity_gain: None,
            default_max_velocity: None,
            default_max_acceleration: None,
            joints: vec![],
            chains: vec![],
        }
    }

    pub fn disabled() -> Self {
        PrivilegedConfigurationCommand {
            enable: false,
            default_option: None,
            ..Self::enabled(PrivilegedConfigurationOption::AtZero)
        }
    }

    pub fn add_joint(&mut self, joint: JointId, configuration: Float) {
        self.joints.push(PrivilegedJointSettings {
            joint,
            configuration: Some(configuration),
            ..Default::default()
        });
    }
}

/// Shrinks the range of motion of each joint by factor * range on each side
#[derive(Clone, Debug, Default)]
pub struct JointLimitReductionCommand {
    pub joints: Vec<JointId>,
    pub factors: Vec<Float>,
}

/// Contact between a body and the environment. An empty point list means
/// the body is not in contact.
#[derive(Clone, Debug)]
pub struct ContactStateCommand {
    pub body: String,
    /// Contact points in the body frame
    pub contact_points: Vec<Vector3<Float>>,
    /// Contact normal in the world frame, pointing into the body
    pub contact_normal: Vector3<Float>,
    /// Falls back to the default friction coefficient of the settings
    pub coefficient_of_friction: Option<Float>,
}

impl ContactStateCommand {
    pub fn new(body: &str, contact_points: Vec<Vector3<Float>>) -> Self {
        ContactStateCommand {
            body: body.to_string(),
            contact_points,
            contact_normal: Vector3::z(),
            coefficient_of_friction: None,
        }
    }

    pub fn with_friction(mut self, coefficient_of_friction: Float) -> Self {
        self.coefficient_of_friction = Some(coefficient_of_friction);
        self
    }

    pub fn is_in_contact(&self) -> bool {
        !self.contact_points.is_empty()
    }
}

/// Known wrench applied by the environment on a body, in the world frame
#[derive(Clone, Debug)]
pub struct ExternalWrenchCommand {
    pub body: String,
    pub wrench: Wrench,
}

/// Joint torques added on top of the solver output
#[derive(Clone, Debug, Default)]
pub struct JointTorqueCommand {
    pub joints: Vec<JointId>,
    pub desired_torques: Vec<Float>,
}

/// Wrench a body should exert, in the world frame. Mapped to joint torques
/// through the Jacobian transpose from the root body.
#[derive(Clone, Debug)]
pub struct VirtualWrenchCommand {
    pub body: String,
    pub wrench: Wrench,
}

/// Integrate the solved accelerations of these joints into desired
/// velocities and positions, and position-control them
#[derive(Clone, Debug, Default)]
pub struct JointAccelerationIntegrationCommand {
    pub joints: Vec<JointId>,
}

/// PD gains of a feedback controller
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PDGains {
    pub kp: Float,
    pub kd: Float,
}

/// Tracks a pose and twist of a control point fixed to `end_effector`.
/// Desireds are in the world frame.
#[derive(Clone, Debug)]
pub struct SpatialFeedbackCommand {
    pub base: String,
    pub end_effector: String,
    pub control_point: Vector3<Float>,
    pub desired_pose: Pose,
    pub desired_angular_velocity: Vector3<Float>,
    pub desired_linear_velocity: Vector3<Float>,
    pub feedforward_angular_acceleration: Vector3<Float>,
    pub feedforward_linear_acceleration: Vector3<Float>,
    pub orientation_gains: PDGains,
    pub position_gains: PDGains,
    pub selection: SelectionMatrix,
    pub weight: Option<DMatrix<Float>>,
    pub primary_base: Option<String>,
}

impl SpatialFeedbackCommand {
    pub fn new(base: &str, end_effector: &str, desired_pose: Pose) -> Self {
        SpatialFeedbackCommand {
            base: base.to_string(),
            end_effector: end_effector.to_string(),
            control_point: Vector3::zeros(),
            desired_pose,
            desired_angular_velocity: Vector3::zeros(),
            desired_linear_velocity: Vector3::zeros(),
            feedforward_angular_acceleration: Vector3::zeros(),
            feedforward_linear_acceleration: Vector3::zeros(),
            orientation_gains: PDGains { kp: 0., kd: 0. },
            position_gains: PDGains { kp: 0., kd: 0. },
            selection: SelectionMatrix::identity(6),
            weight: None,
            primary_base: None,
        }
    }
}

/// Tracks a position and velocity of a one-DoF joint
#[derive(Clone, Debug)]
pub struct OneDoFJointFeedbackCommand {
    pub joint: JointId,
    pub desired_position: Float,
    pub desired_velocity: Float,
    pub feedforward_acceleration: Float,
    pub gains: PDGains,
    pub weight: Option<Float>,
}

#[derive(Clone, Debug)]
pub enum InverseDynamicsCommand {
    SpatialAcceleration(SpatialAccelerationCommand),
    PointAcceleration(PointAccelerationCommand),
    MomentumRate(MomentumRateCommand),
    JointspaceAcceleration(JointspaceAccelerationCommand),
    PrivilegedConfiguration(PrivilegedConfigurationCommand),
    JointLimitReduction(JointLimitReductionCommand),
    ContactState(ContactStateCommand),
    ExternalWrench(ExternalWrenchCommand),
    JointAccelerationIntegration(JointAccelerationIntegrationCommand),
}

#[derive(Clone, Debug)]
pub enum InverseKinematicsCommand {
    SpatialVelocity(SpatialVelocityCommand),
    Momentum(MomentumCommand),
    JointspaceVelocity(JointspaceVelocityCommand),
    PrivilegedConfiguration(PrivilegedConfigurationCommand),
    JointLimitReduction(JointLimitReductionCommand),
}

#[derive(Clone, Debug)]
pub enum VirtualModelControlCommand {
    MomentumRate(MomentumRateCommand),
    ContactState(ContactStateCommand),
    VirtualWrench(VirtualWrenchCommand),
    JointTorque(JointTorqueCommand),
}

#[derive(Clone, Debug)]
pub enum FeedbackControlCommand {
    Spatial(SpatialFeedbackCommand),
    OneDoFJoint(OneDoFJointFeedbackCommand),
}
