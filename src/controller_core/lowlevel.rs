use std::collections::BTreeMap;

use crate::{
    joint::JointId,
    spatial::{pose::Pose, spatial_vector::SpatialVector},
    types::Float,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JointDesiredControlMode {
    Effort,
    Position,
}

/// Desired values for one one-DoF joint. Absent fields are left untouched
/// when written to the joint.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OneDoFJointDesiredData {
    pub control_mode: Option<JointDesiredControlMode>,
    pub desired_position: Option<Float>,
    pub desired_velocity: Option<Float>,
    pub desired_acceleration: Option<Float>,
    pub desired_torque: Option<Float>,
}

impl OneDoFJointDesiredData {
    pub fn has_control_mode(&self) -> bool {
        self.control_mode.is_some()
    }

    pub fn clear(&mut self) {
        *self = OneDoFJointDesiredData::default();
    }

    /// Fill the fields this record lacks from `other`
    pub fn complete_with(&mut self, other: &OneDoFJointDesiredData) {
        self.control_mode = self.control_mode.or(other.control_mode);
        self.desired_position = self.desired_position.or(other.desired_position);
        self.desired_velocity = self.desired_velocity.or(other.desired_velocity);
        self.desired_acceleration = self.desired_acceleration.or(other.desired_acceleration);
        self.desired_torque = self.desired_torque.or(other.desired_torque);
    }

    /// Overwrite with the fields present in `other`
    pub fn overwrite_with(&mut self, other: &OneDoFJointDesiredData) {
        self.control_mode = other.control_mode.or(self.control_mode);
        self.desired_position = other.desired_position.or(self.desired_position);
        self.desired_velocity = other.desired_velocity.or(self.desired_velocity);
        self.desired_acceleration = other.desired_acceleration.or(self.desired_acceleration);
        self.desired_torque = other.desired_torque.or(self.desired_torque);
    }
}

/// Per-joint low-level output of the controller core
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LowLevelOneDoFJointDesiredDataHolder {
    data: BTreeMap<JointId, OneDoFJointDesiredData>,
}

impl LowLevelOneDoFJointDesiredDataHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn get(&self, joint: JointId) -> Option<&OneDoFJointDesiredData> {
        self.data.get(&joint)
    }

    pub fn get_or_insert(&mut self, joint: JointId) -> &mut OneDoFJointDesiredData {
        self.data.entry(joint).or_default()
    }

    pub fn insert(&mut self, joint: JointId, data: OneDoFJointDesiredData) {
        self.data.insert(joint, data);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&JointId, &OneDoFJointDesiredData)> {
        self.data.iter()
    }

    pub fn set_control_mode(&mut self, joint: JointId, mode: JointDesiredControlMode) {
        self.get_or_insert(joint).control_mode = Some(mode);
    }

    pub fn set_desired_position(&mut self, joint: JointId, q: Float) {
        self.get_or_insert(joint).desired_position = Some(q);
    }

    pub fn set_desired_velocity(&mut self, joint: JointId, qd: Float) {
        self.get_or_insert(joint).desired_velocity = Some(qd);
    }

    pub fn set_desired_acceleration(&mut self, joint: JointId, qdd: Float) {
        self.get_or_insert(joint).desired_acceleration = Some(qdd);
    }

    pub fn set_desired_torque(&mut self, joint: JointId, tau: Float) {
        self.get_or_insert(joint).desired_torque = Some(tau);
    }

    /// Fill missing joints and fields from `other`
    pub fn complete_with(&mut self, other: &LowLevelOneDoFJointDesiredDataHolder) {
        for (joint, data) in other.data.iter() {
            self.get_or_insert(*joint).complete_with(data);
        }
    }

    /// Overwrite with the joints and fields present in `other`
    pub fn overwrite_with(&mut self, other: &LowLevelOneDoFJointDesiredDataHolder) {
        for (joint, data) in other.data.iter() {
            self.get_or_insert(*joint).overwrite_with(data);
        }
    }
}

/// Desired state of the floating root, for the layer that closes the loop
/// on it
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RootJointDesiredConfigurationData {
    pub desired_pose: Option<Pose>,
    pub desired_velocity: Option<SpatialVector>,
    pub desired_acceleration: Option<SpatialVector>,
}

impl RootJointDesiredConfigurationData {
    pub fn clear(&mut self) {
        *self = RootJointDesiredConfigurationData::default();
    }
}
