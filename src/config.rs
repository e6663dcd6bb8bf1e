use serde::Deserialize;

use crate::{error::ConfigError, types::Float};

/// Tuning parameters of the controller core, loadable from TOML.
/// Missing fields take their default values.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerCoreOptimizationSettings {
    /// Control period in seconds
    pub control_dt: Float,
    /// Damping of the pseudo-inverse used for nullspace projection
    pub nullspace_projection_alpha: Float,
    /// Column scaling applied to joints above a task's primary base
    pub secondary_task_joints_weight: Float,
    pub maximum_joint_acceleration: Float,
    pub maximum_joint_velocity: Float,
    /// Regularization of the joint accelerations in inverse dynamics
    pub joint_acceleration_weight: Float,
    /// Regularization of the joint velocities in inverse kinematics
    pub joint_velocity_weight: Float,
    /// Regularization of the contact force magnitudes
    pub rho_weight: Float,
    /// Regularization of the contact forces in virtual model control
    pub virtual_model_control_force_weight: Float,
    pub default_friction_coefficient: Float,
    pub privileged: PrivilegedConfigurationDefaults,
}

impl Default for ControllerCoreOptimizationSettings {
    fn default() -> Self {
        ControllerCoreOptimizationSettings {
            control_dt: 0.004,
            nullspace_projection_alpha: 0.005,
            secondary_task_joints_weight: 1.0,
            maximum_joint_acceleration: 200.,
            maximum_joint_velocity: 10.,
            joint_acceleration_weight: 0.005,
            joint_velocity_weight: 0.001,
            rho_weight: 1e-5,
            virtual_model_control_force_weight: 1e-4,
            default_friction_coefficient: 0.7,
            privileged: PrivilegedConfigurationDefaults::default(),
        }
    }
}

/// Gains and limits applied to every privileged joint unless overridden
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PrivilegedConfigurationDefaults {
    pub weight: Float,
    pub configuration_gain: Float,
    pub velocity_gain: Float,
    pub max_velocity: Float,
    pub max_acceleration: Float,
}

impl Default for PrivilegedConfigurationDefaults {
    fn default() -> Self {
        PrivilegedConfigurationDefaults {
            weight: 5.,
            configuration_gain: 40.,
            velocity_gain: 6.,
            max_velocity: 2.,
            max_acceleration: Float::INFINITY,
        }
    }
}

impl ControllerCoreOptimizationSettings {
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let settings: ControllerCoreOptimizationSettings = toml::from_str(toml_str)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.control_dt > 0.) {
            return Err(ConfigError::NonPositive {
                field: "control_dt",
                value: self.control_dt,
            });
        }
        for (field, value) in [
            ("nullspace_projection_alpha", self.nullspace_projection_alpha),
            ("secondary_task_joints_weight", self.secondary_task_joints_weight),
            ("maximum_joint_acceleration", self.maximum_joint_acceleration),
            ("maximum_joint_velocity", self.maximum_joint_velocity),
            ("joint_acceleration_weight", self.joint_acceleration_weight),
            ("joint_velocity_weight", self.joint_velocity_weight),
            ("rho_weight", self.rho_weight),
            ("default_friction_coefficient", self.default_friction_coefficient),
        ] {
            if value < 0. {
                return Err(ConfigError::Negative { field, value });
            }
        }
        Ok(())
    }
}
