use na::{DMatrix, DVector, Vector3};

use crate::{
    inertia::SpatialInertia,
    joint::{Joint, JointId},
    spatial::{
        geometric_jacobian::GeometricJacobian, spatial_acceleration::SpatialAcceleration,
        transform::Transform3D, twist::Twist, wrench::Wrench,
    },
    types::Float,
    WORLD_FRAME,
};

/// Jacobian of a kinematic chain together with the joints its columns belong
/// to, in column order. A joint with k DoFs owns k consecutive columns.
#[derive(Clone, Debug, PartialEq)]
pub struct ChainJacobian {
    pub joints: Vec<JointId>,
    pub jacobian: GeometricJacobian,
}

impl ChainJacobian {
    pub fn to_matrix(&self) -> DMatrix<Float> {
        self.jacobian.to_matrix()
    }
}

/// Kinematic and dynamic queries the controller core makes on the robot.
///
/// All velocity-ordered quantities (mass matrix, bias forces, velocity
/// offsets) follow the order of `joints()`.
pub trait RobotModel {
    fn joints(&self) -> &[Joint];

    fn joints_mut(&mut self) -> &mut [Joint];

    fn joint_id(&self, name: &str) -> Option<JointId> {
        self.joints().iter().position(|joint| joint.name() == name)
    }

    /// Names of all rigid bodies, excluding the world
    fn body_names(&self) -> Vec<String>;

    /// Body attached to the world by a floating joint, or the world itself
    /// for a fixed-base robot
    fn root_body(&self) -> &str;

    /// Joints on the path from `base` to `end_effector`: base side joints
    /// walking up to the common ancestor, then end effector side joints
    /// walking down.
    fn kinematic_path(&self, base: &str, end_effector: &str) -> Vec<JointId>;

    /// Jacobian of the twist of `end_effector` with respect to `base`,
    /// expressed in `frame`
    fn jacobian(&self, base: &str, end_effector: &str, frame: &str) -> ChainJacobian;

    /// The J_dot * v term of the spatial acceleration of `end_effector` with
    /// respect to `base`, expressed in `frame`
    fn convective_term(&self, base: &str, end_effector: &str, frame: &str)
        -> SpatialAcceleration;

    /// Twist of the body with respect to the world, expressed in the world frame
    fn twist(&self, body: &str) -> Twist;

    fn body_to_world(&self, body: &str) -> Transform3D;

    /// Transform of any named frame (world, body or fixed frame) to world
    fn frame_to_world(&self, frame: &str) -> Transform3D;

    /// Spatial inertia of the body, expressed in the world frame
    fn inertia(&self, body: &str) -> SpatialInertia;

    fn total_mass(&self) -> Float;

    fn center_of_mass(&self) -> Vector3<Float>;

    /// Joint-space mass matrix M(q)
    fn mass_matrix(&self) -> DMatrix<Float>;

    /// Joint-space bias forces c(q, v), gravity included
    fn bias_forces(&self) -> DVector<Float>;

    /// Offset of each joint in the velocity vector
    fn velocity_offsets(&self) -> Vec<usize> {
        let mut offset = 0;
        self.joints()
            .iter()
            .map(|joint| {
                let start = offset;
                offset += joint.dof();
                start
            })
            .collect()
    }

    fn number_of_velocities(&self) -> usize {
        self.joints().iter().map(|joint| joint.dof()).sum()
    }

    /// Generalized force of a wrench acting on `body`, through the Jacobian
    /// of `body` with respect to `base`. The wrench is expressed in world.
    fn wrench_to_joint_torques(&self, base: &str, body: &str, wrench: &Wrench) -> DVector<Float> {
        if wrench.frame != WORLD_FRAME {
            panic!("wrench on {} is expressed in {}, not world", body, wrench.frame);
        }
        let chain = self.jacobian(base, body, WORLD_FRAME);
        let torques = chain.to_matrix().transpose() * wrench.as_spatial_vector().as_dvector();

        let offsets = self.velocity_offsets();
        let mut tau = DVector::zeros(self.number_of_velocities());
        let mut column = 0;
        for joint in chain.joints.iter() {
            let dof = self.joints()[*joint].dof();
            let mut rows = tau.rows_mut(offsets[*joint], dof);
            rows += torques.rows(column, dof);
            column += dof;
        }
        tau
    }

    /// Joint velocity vector
    fn velocity(&self) -> DVector<Float> {
        let mut v = DVector::zeros(self.number_of_velocities());
        for (joint, offset) in self.joints().iter().zip(self.velocity_offsets()) {
            v.rows_mut(offset, joint.dof()).copy_from(&joint.velocity());
        }
        v
    }
}
