use std::collections::HashMap;

use crate::{joint::JointId, types::Float};

/// Acceleration bounds that keep the joint within [lower, upper] after one
/// control step, by double finite difference. qdd_min lies in
/// [-abs_max, 0] and qdd_max in [0, abs_max].
pub fn compute_acceleration_bounds(
    q: Float,
    qd: Float,
    lower: Float,
    upper: Float,
    dt: Float,
    abs_max: Float,
) -> (Float, Float) {
    let qd_min = (lower - q) / dt;
    let qd_max = (upper - q) / dt;
    let qdd_min = ((qd_min - qd) / dt).clamp(-abs_max, 0.);
    let qdd_max = ((qd_max - qd) / dt).clamp(0., abs_max);
    (qdd_min, qdd_max)
}

/// First-order counterpart of compute_acceleration_bounds
pub fn compute_velocity_bounds(
    q: Float,
    lower: Float,
    upper: Float,
    dt: Float,
    abs_max: Float,
) -> (Float, Float) {
    let qd_min = ((lower - q) / dt).clamp(-abs_max, 0.);
    let qd_max = ((upper - q) / dt).clamp(0., abs_max);
    (qd_min, qd_max)
}

/// Per-joint shrinking of the range of motion. A factor f moves each limit
/// inwards by f * (upper - lower).
#[derive(Default)]
pub struct JointLimitReductionHandler {
    factors: HashMap<JointId, Float>,
}

impl JointLimitReductionHandler {
    pub fn set_reduction(&mut self, joint: JointId, factor: Float) {
        if !(0. ..0.5).contains(&factor) {
            panic!(
                "joint limit reduction factor {} for joint {} must be in [0, 0.5)",
                factor, joint
            );
        }
        self.factors.insert(joint, factor);
    }

    pub fn clear(&mut self) {
        self.factors.clear();
    }

    pub fn reduced_limits(&self, joint: JointId, lower: Float, upper: Float) -> (Float, Float) {
        match self.factors.get(&joint) {
            Some(factor) if lower.is_finite() && upper.is_finite() => {
                let margin = factor * (upper - lower);
                (lower + margin, upper - margin)
            }
            _ => (lower, upper),
        }
    }
}
