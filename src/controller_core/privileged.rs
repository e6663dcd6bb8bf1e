use std::collections::BTreeMap;

use crate::{
    config::PrivilegedConfigurationDefaults,
    controller_core::{
        commands::{KinematicChain, PrivilegedConfigurationCommand, PrivilegedConfigurationOption},
        joint_index::JointIndexHandler,
    },
    joint::JointId,
    kinematics::RobotModel,
    types::Float,
};

/// Home position, gains and limits of one privileged joint
#[derive(Clone, Debug, PartialEq)]
pub struct PrivilegedJointConfiguration {
    pub configuration: Float,
    pub weight: Float,
    pub configuration_gain: Float,
    pub velocity_gain: Float,
    pub max_velocity: Float,
    pub max_acceleration: Float,
}

/// Holds the privileged configuration of every indexed one-DoF joint.
/// State persists across ticks; a command only changes what it names.
pub struct PrivilegedConfigurationHandler {
    enabled: bool,
    joints: BTreeMap<JointId, PrivilegedJointConfiguration>,
    chains: Vec<KinematicChain>,
}

impl PrivilegedConfigurationHandler {
    pub fn new(index: &JointIndexHandler, defaults: &PrivilegedConfigurationDefaults) -> Self {
        let joints = index
            .indexed_one_dof_joints()
            .iter()
            .map(|joint| {
                (
                    *joint,
                    PrivilegedJointConfiguration {
                        configuration: 0.,
                        weight: defaults.weight,
                        configuration_gain: defaults.configuration_gain,
                        velocity_gain: defaults.velocity_gain,
                        max_velocity: defaults.max_velocity,
                        max_acceleration: defaults.max_acceleration,
                    },
                )
            })
            .collect();

        PrivilegedConfigurationHandler {
            enabled: false,
            joints,
            chains: vec![],
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn chains(&self) -> &[KinematicChain] {
        &self.chains
    }

    pub fn joints(&self) -> &BTreeMap<JointId, PrivilegedJointConfiguration> {
        &self.joints
    }

    pub fn submit(&mut self, command: &PrivilegedConfigurationCommand, model: &dyn RobotModel) {
        if !command.enable {
            self.enabled = false;
            return;
        }
        self.enabled = true;

        for (joint, config) in self.joints.iter_mut() {
            if let Some(weight) = command.default_weight {
                config.weight = weight;
            }
            if let Some(gain) = command.default_configuration_gain {
                config.configuration_gain = gain;
            }
            if let Some(gain) = command.default_velocity_gain {
                config.velocity_gain = gain;
            }
            if let Some(max) = command.default_max_velocity {
                config.max_velocity = max;
            }
            if let Some(max) = command.default_max_acceleration {
                config.max_acceleration = max;
            }
            if let Some(option) = command.default_option {
                config.configuration = Self::configuration_from_option(model, *joint, option);
            }
        }

        for settings in command.joints.iter() {
            let config = match self.joints.get_mut(&settings.joint) {
                Some(config) => config,
                None => panic!(
                    "privileged configuration for joint {} which is not an indexed one-DoF joint",
                    settings.joint
                ),
            };
            if let Some(option) = settings.option {
                config.configuration = Self::configuration_from_option(model, settings.joint, option);
            }
            if let Some(q) = settings.configuration {
                config.configuration = q;
            }
            if let Some(weight) = settings.weight {
                config.weight = weight;
            }
            if let Some(gain) = settings.configuration_gain {
                config.configuration_gain = gain;
            }
            if let Some(gain) = settings.velocity_gain {
                config.velocity_gain = gain;
            }
            if let Some(max) = settings.max_velocity {
                config.max_velocity = max;
            }
            if let Some(max) = settings.max_acceleration {
                config.max_acceleration = max;
            }
        }

        if !command.chains.is_empty() {
            self.chains = command.chains.clone();
        }
    }

    fn configuration_from_option(
        model: &dyn RobotModel,
        joint: JointId,
        option: PrivilegedConfigurationOption,
    ) -> Float {
        let state = model.joints()[joint].one_dof();
        match option {
            PrivilegedConfigurationOption::AtZero => 0.,
            PrivilegedConfigurationOption::AtMidRangeOfMotion => {
                if state.has_finite_limits() {
                    0.5 * (state.lower_limit + state.upper_limit)
                } else {
                    0.
                }
            }
            PrivilegedConfigurationOption::AtCurrent => state.q,
        }
    }

    /// q_dd = clamp(kp (q_priv - q) - kd qd, +-max_acceleration)
    pub fn privileged_acceleration(&self, joint: JointId, q: Float, qd: Float) -> Float {
        let config = &self.joints[&joint];
        let qdd = config.configuration_gain * (config.configuration - q) - config.velocity_gain * qd;
        qdd.clamp(-config.max_acceleration, config.max_acceleration)
    }

    /// qd = clamp(kp (q_priv - q), +-max_velocity)
    pub fn privileged_velocity(&self, joint: JointId, q: Float) -> Float {
        let config = &self.joints[&joint];
        let qd = config.configuration_gain * (config.configuration - q);
        qd.clamp(-config.max_velocity, config.max_velocity)
    }

    pub fn weight(&self, joint: JointId) -> Float {
        self.joints[&joint].weight
    }
}

#[cfg(test)]
mod privileged_tests {
    use crate::{
        assert_close,
        controller_core::commands::PrivilegedJointSettings,
        helpers::build_planar_arm,
    };

    use super::*;

    #[test]
    fn enabled_state_is_sticky() {
        // Arrange
        let mut arm = build_planar_arm();
        arm.set_joint_q("shoulder", 0.3);
        arm.update();
        let index = JointIndexHandler::new(&[0, 1], arm.joints());
        let mut handler =
            PrivilegedConfigurationHandler::new(&index, &PrivilegedConfigurationDefaults::default());
        assert!(!handler.is_enabled());

        // Act
        handler.submit(
            &PrivilegedConfigurationCommand::enabled(PrivilegedConfigurationOption::AtCurrent),
            &arm,
        );
        arm.set_joint_q("shoulder", -0.2);
        arm.update();

        // Assert
        assert!(handler.is_enabled());
        assert_eq!(handler.joints()[&0].configuration, 0.3);
        assert_eq!(handler.joints()[&1].configuration, 0.);

        handler.submit(&PrivilegedConfigurationCommand::disabled(), &arm);
        assert!(!handler.is_enabled());
        assert_eq!(handler.joints()[&0].configuration, 0.3);
    }

    #[test]
    fn per_joint_settings_override_defaults() {
        // Arrange
        let arm = build_planar_arm();
        let index = JointIndexHandler::new(&[0, 1], arm.joints());
        let defaults = PrivilegedConfigurationDefaults::default();
        let mut handler = PrivilegedConfigurationHandler::new(&index, &defaults);
        let mut command =
            PrivilegedConfigurationCommand::enabled(PrivilegedConfigurationOption::AtMidRangeOfMotion);
        command.joints.push(PrivilegedJointSettings {
            joint: 1,
            option: Some(PrivilegedConfigurationOption::AtZero),
            configuration_gain: Some(10.),
            max_acceleration: Some(1.),
            ..Default::default()
        });
        command.add_joint(0, 1.0);

        // Act
        handler.submit(&command, &arm);

        // Assert
        assert_eq!(handler.joints()[&0].configuration, 1.0);
        assert_eq!(handler.joints()[&1].configuration, 0.);
        assert_close!(
            handler.privileged_acceleration(0, 0.5, 0.1),
            defaults.configuration_gain * 0.5 - defaults.velocity_gain * 0.1,
            1e-12
        );
        // clamped by the overridden max acceleration
        assert_eq!(handler.privileged_acceleration(1, 0.5, 0.), -1.);
        assert_eq!(handler.privileged_velocity(0, -10.), defaults.max_velocity);
    }
}
