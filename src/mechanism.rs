use std::collections::HashMap;

use na::{DMatrix, DVector, Vector3};

use crate::{
    inertia::SpatialInertia,
    joint::{Joint, JointId},
    kinematics::{ChainJacobian, RobotModel},
    rigid_body::RigidBody,
    spatial::{
        geometric_jacobian::GeometricJacobian, pose::Pose,
        spatial_acceleration::SpatialAcceleration, spatial_vector::SpatialVector,
        transform::Transform3D, twist::Twist,
    },
    types::Float,
    WORLD_FRAME,
};

/// MechanismState stores the state information about the mechanism, plus
/// the kinematic quantities derived from it at the last `update()`.
///
/// Body 0 is the world; body i + 1 is the successor of tree joint i.
pub struct MechanismState {
    pub treejoints: Vec<Joint>,
    pub bodies: Vec<RigidBody>,
    pub parents: Vec<usize>, // predecessor body id of each tree joint
    frames: HashMap<String, (usize, Transform3D)>, // fixed frames attached to bodies
    body_ids: HashMap<String, usize>,

    bodies_to_root: Vec<Transform3D>,
    twists: Vec<Twist>,
    bias_accels: Vec<SpatialAcceleration>,
    motion_subspaces: Vec<GeometricJacobian>, // per joint, in world frame
}

impl MechanismState {
    /// Joints must be listed so that every predecessor body appears before
    /// its successors. bodies[i] is the successor of treejoints[i].
    pub fn new(treejoints: Vec<Joint>, bodies: Vec<RigidBody>) -> Self {
        if treejoints.len() != bodies.len() {
            panic!(
                "number of joints {} != number of bodies {}",
                treejoints.len(),
                bodies.len()
            );
        }

        let mut body_ids = HashMap::new();
        body_ids.insert(WORLD_FRAME.to_string(), 0);
        let mut parents = vec![];
        for (i, (joint, body)) in treejoints.iter().zip(bodies.iter()).enumerate() {
            if joint.successor() != body.name {
                panic!(
                    "joint {} successor frame {} != body {}",
                    joint.name(),
                    joint.successor(),
                    body.name
                );
            }
            let parent = match body_ids.get(joint.predecessor()) {
                Some(id) => *id,
                None => panic!(
                    "joint {} predecessor {} is not defined before it",
                    joint.name(),
                    joint.predecessor()
                ),
            };
            parents.push(parent);
            body_ids.insert(body.name.clone(), i + 1);
        }

        let mut state = MechanismState {
            treejoints,
            bodies,
            parents,
            frames: HashMap::new(),
            body_ids,
            bodies_to_root: vec![],
            twists: vec![],
            bias_accels: vec![],
            motion_subspaces: vec![],
        };
        state.update();
        state
    }

    /// Attach a fixed frame to a body. `frame_to_body.from` names the frame.
    pub fn add_frame(&mut self, frame_to_body: Transform3D) {
        let body = self.body_id(&frame_to_body.to);
        self.frames
            .insert(frame_to_body.from.clone(), (body, frame_to_body));
    }

    pub fn body_id(&self, body: &str) -> usize {
        match self.body_ids.get(body) {
            Some(id) => *id,
            None => panic!("body {} does not exist", body),
        }
    }

    fn joint(&mut self, name: &str) -> &mut Joint {
        match self.treejoints.iter_mut().find(|j| j.name() == name) {
            Some(joint) => joint,
            None => panic!("joint {} does not exist", name),
        }
    }

    pub fn set_joint_q(&mut self, name: &str, q: Float) {
        self.joint(name).one_dof_mut().q = q;
    }

    pub fn set_joint_v(&mut self, name: &str, v: Float) {
        self.joint(name).one_dof_mut().v = v;
    }

    pub fn set_joint_limits(&mut self, name: &str, lower: Float, upper: Float) {
        let state = self.joint(name).one_dof_mut();
        state.lower_limit = lower;
        state.upper_limit = upper;
    }

    /// Set pose and body-frame twist of a floating joint
    pub fn set_floating_state(&mut self, name: &str, pose: Pose, velocity: SpatialVector) {
        match self.joint(name) {
            Joint::Floating(joint) => {
                joint.pose = pose;
                joint.velocity = velocity;
            }
            _ => panic!("joint {} is not a floating joint", name),
        }
    }

    /// Recompute body poses, twists and bias accelerations from the current
    /// joint configuration and velocity.
    /// Bias accelerations exclude gravity.
    pub fn update(&mut self) {
        let mut bodies_to_root = vec![Transform3D::identity(WORLD_FRAME, WORLD_FRAME)];
        let mut twists = vec![Twist::zero(WORLD_FRAME, WORLD_FRAME, WORLD_FRAME)];
        let mut bias_accels = vec![SpatialAcceleration::zero(
            WORLD_FRAME,
            WORLD_FRAME,
            WORLD_FRAME,
        )];
        let mut motion_subspaces = vec![];

        for (joint, parent) in self.treejoints.iter_mut().zip(self.parents.iter()) {
            joint.update();
            let body_to_root = &bodies_to_root[*parent] * joint.transform();
            let S = joint.motion_subspace().transform(&body_to_root);
            let joint_twist = S.mul_velocity(&joint.velocity());
            let twist = &twists[*parent] + &joint_twist;
            let bias = &bias_accels[*parent] + &twist.cross(&joint_twist);

            bodies_to_root.push(body_to_root);
            twists.push(twist);
            bias_accels.push(bias);
            motion_subspaces.push(S);
        }

        self.bodies_to_root = bodies_to_root;
        self.twists = twists;
        self.bias_accels = bias_accels;
        self.motion_subspaces = motion_subspaces;
    }

    /// Joints from `body` up to the world, deepest first
    fn ancestors(&self, body: usize) -> Vec<JointId> {
        let mut path = vec![];
        let mut b = body;
        while b != 0 {
            let jointid = b - 1;
            path.push(jointid);
            b = self.parents[jointid];
        }
        path
    }

    /// Split the path between two bodies into the joints only on the base
    /// side (deepest first) and only on the end effector side (deepest last)
    fn split_path(&self, base: &str, end_effector: &str) -> (Vec<JointId>, Vec<JointId>) {
        let base_path = self.ancestors(self.body_id(base));
        let ee_path = self.ancestors(self.body_id(end_effector));
        let base_side: Vec<JointId> = base_path
            .iter()
            .filter(|j| !ee_path.contains(j))
            .cloned()
            .collect();
        let ee_side: Vec<JointId> = ee_path
            .iter()
            .rev()
            .filter(|j| !base_path.contains(j))
            .cloned()
            .collect();
        (base_side, ee_side)
    }

    /// Recursive Newton-Euler: joint forces giving acceleration vdot.
    /// Gravity is emulated by accelerating the world upwards.
    ///
    /// Reference: Table 5.1 in "Robot Dynamics Algorithms" by Roy Featherstone
    fn inverse_dynamics(
        &self,
        vdot: &DVector<Float>,
        with_gravity: bool,
        with_velocity: bool,
    ) -> DVector<Float> {
        let offsets = self.velocity_offsets();
        let root_accel = if with_gravity {
            SpatialAcceleration::inv_gravitational_spatial_acceleration().as_spatial_vector()
        } else {
            SpatialVector::zero()
        };

        let nbodies = self.bodies.len() + 1;
        let mut accels = vec![root_accel; nbodies];
        let mut wrenches = vec![SpatialVector::zero(); nbodies];
        for (jointid, joint) in self.treejoints.iter().enumerate() {
            let bodyid = jointid + 1;
            let parent = self.parents[jointid];
            let S = &self.motion_subspaces[jointid];
            let S = S.to_matrix();
            let qdd = vdot.rows(offsets[jointid], joint.dof());
            let mut a = accels[parent] + SpatialVector::from_slice((&S * qdd).as_slice());

            let v = if with_velocity {
                self.twists[bodyid].as_spatial_vector()
            } else {
                SpatialVector::zero()
            };
            if with_velocity {
                let joint_twist = SpatialVector::from_slice((&S * joint.velocity()).as_slice());
                a = a + v.cross_motion(&joint_twist);
            }
            accels[bodyid] = a;

            let I = self.bodies[jointid]
                .inertia
                .transform(&self.bodies_to_root[bodyid]);
            wrenches[bodyid] = I.mul_motion(&a) + v.cross_force(&I.mul_motion(&v));
        }

        let mut tau = DVector::zeros(vdot.len());
        for (jointid, joint) in self.treejoints.iter().enumerate().rev() {
            let bodyid = jointid + 1;
            let f = wrenches[bodyid];
            let parent = self.parents[jointid];
            wrenches[parent] = wrenches[parent] + f;

            let S = &self.motion_subspaces[jointid];
            for k in 0..joint.dof() {
                tau[offsets[jointid] + k] =
                    S.angular.column(k).dot(&f.angular) + S.linear.column(k).dot(&f.linear);
            }
        }
        tau
    }
}

impl RobotModel for MechanismState {
    fn joints(&self) -> &[Joint] {
        &self.treejoints
    }

    fn joints_mut(&mut self) -> &mut [Joint] {
        &mut self.treejoints
    }

    fn body_names(&self) -> Vec<String> {
        self.bodies.iter().map(|b| b.name.clone()).collect()
    }

    fn root_body(&self) -> &str {
        match (self.treejoints.first(), self.bodies.first()) {
            (Some(Joint::Floating(_)), Some(body)) => &body.name,
            _ => WORLD_FRAME,
        }
    }

    fn kinematic_path(&self, base: &str, end_effector: &str) -> Vec<JointId> {
        let (mut path, ee_side) = self.split_path(base, end_effector);
        path.extend(ee_side);
        path
    }

    fn jacobian(&self, base: &str, end_effector: &str, frame: &str) -> ChainJacobian {
        let (base_side, ee_side) = self.split_path(base, end_effector);
        let ncols: usize = base_side
            .iter()
            .chain(ee_side.iter())
            .map(|j| self.treejoints[*j].dof())
            .sum();

        let mut J = GeometricJacobian::zeros(end_effector, base, WORLD_FRAME, ncols);
        let mut col = 0;
        for (jointid, sign) in base_side
            .iter()
            .map(|j| (*j, -1.))
            .chain(ee_side.iter().map(|j| (*j, 1.)))
        {
            let S = &self.motion_subspaces[jointid];
            let dof = S.dim();
            J.angular.columns_mut(col, dof).copy_from(&(&S.angular * sign));
            J.linear.columns_mut(col, dof).copy_from(&(&S.linear * sign));
            col += dof;
        }

        let world_to_frame = self.frame_to_world(frame).inv();
        let mut joints = base_side;
        joints.extend(ee_side);
        ChainJacobian {
            joints,
            jacobian: J.transform(&world_to_frame),
        }
    }

    fn convective_term(
        &self,
        base: &str,
        end_effector: &str,
        frame: &str,
    ) -> SpatialAcceleration {
        let ee = &self.bias_accels[self.body_id(end_effector)];
        let base = &self.bias_accels[self.body_id(base)];
        let relative = ee - base;
        relative.transform(&self.frame_to_world(frame).inv())
    }

    fn twist(&self, body: &str) -> Twist {
        self.twists[self.body_id(body)].clone()
    }

    fn body_to_world(&self, body: &str) -> Transform3D {
        self.bodies_to_root[self.body_id(body)].clone()
    }

    fn frame_to_world(&self, frame: &str) -> Transform3D {
        if let Some((body, frame_to_body)) = self.frames.get(frame) {
            return &self.bodies_to_root[*body] * frame_to_body;
        }
        self.body_to_world(frame)
    }

    fn inertia(&self, body: &str) -> SpatialInertia {
        let bodyid = self.body_id(body);
        if bodyid == 0 {
            return SpatialInertia::zero(WORLD_FRAME);
        }
        self.bodies[bodyid - 1]
            .inertia
            .transform(&self.bodies_to_root[bodyid])
    }

    fn total_mass(&self) -> Float {
        self.bodies.iter().map(|b| b.inertia.mass).sum()
    }

    fn center_of_mass(&self) -> Vector3<Float> {
        let mut mc = Vector3::zeros();
        let mut m = 0.;
        for (bodyid, body) in self.bodies.iter().enumerate() {
            let inertia = body.inertia.transform(&self.bodies_to_root[bodyid + 1]);
            mc += inertia.cross_part;
            m += inertia.mass;
        }
        mc / m
    }

    fn mass_matrix(&self) -> DMatrix<Float> {
        let n = self.number_of_velocities();
        let mut M = DMatrix::zeros(n, n);
        for k in 0..n {
            let mut unit = DVector::zeros(n);
            unit[k] = 1.;
            M.set_column(k, &self.inverse_dynamics(&unit, false, false));
        }
        M
    }

    fn bias_forces(&self) -> DVector<Float> {
        self.inverse_dynamics(&DVector::zeros(self.number_of_velocities()), true, true)
    }
}

#[cfg(test)]
mod mechanism_tests {
    use na::{dvector, vector, UnitQuaternion};

    use crate::{
        assert_close, assert_vec_close,
        helpers::{build_floating_biped, build_pendulum, build_planar_arm},
        util::test_utils::{random_quaternion, random_vector},
        GRAVITY,
    };

    use super::*;

    #[test]
    fn horizontal_pendulum_gravity_torque() {
        // Arrange
        let m = 5.0;
        let l = 0.7;
        let state = build_pendulum(m, l);

        // Act
        let c = state.bias_forces();

        // Assert
        // holding the point mass horizontal against gravity
        assert_vec_close!(c, dvector![-m * GRAVITY * l], 1e-10);
        assert_vec_close!(state.mass_matrix(), dvector![m * l * l], 1e-10);
    }

    #[test]
    fn mass_matrix_is_symmetric_positive_definite() {
        // Arrange
        let mut rng = rand::rng();
        let mut state = build_floating_biped();
        state.set_floating_state(
            "floating_base",
            Pose {
                rotation: random_quaternion(&mut rng, 0.5),
                translation: random_vector(&mut rng, 1.),
            },
            SpatialVector::new(random_vector(&mut rng, 1.), random_vector(&mut rng, 1.)),
        );
        state.set_joint_q("left_knee", 0.4);
        state.set_joint_q("right_hip", -0.3);
        state.update();

        // Act
        let M = state.mass_matrix();

        // Assert
        assert_vec_close!(&M, &M.transpose(), 1e-10);
        assert!(M.clone().cholesky().is_some());
        assert_close!(M[(3, 3)], state.total_mass(), 1e-10);
    }

    #[test]
    fn jacobian_reproduces_body_twist() {
        // Arrange
        let mut state = build_planar_arm();
        state.set_joint_q("shoulder", 0.3);
        state.set_joint_q("elbow", -0.8);
        state.set_joint_v("shoulder", 1.2);
        state.set_joint_v("elbow", -0.5);
        state.update();

        // Act
        let J = state.jacobian(WORLD_FRAME, "forearm", WORLD_FRAME);
        let twist = J.jacobian.mul_velocity(&state.velocity());

        // Assert
        assert_eq!(J.joints, vec![0, 1]);
        let expected = state.twist("forearm");
        assert_vec_close!(twist.angular, expected.angular, 1e-12);
        assert_vec_close!(twist.linear, expected.linear, 1e-12);
    }

    #[test]
    fn relative_jacobian_negates_base_side() {
        // Arrange
        let state = build_planar_arm();

        // Act
        let J = state.jacobian("forearm", "upper_arm", WORLD_FRAME);

        // Assert
        assert_eq!(J.joints, vec![1]);
        assert_vec_close!(J.jacobian.angular.column(0), -Vector3::<Float>::y(), 1e-12);
        assert_eq!(state.kinematic_path("forearm", "upper_arm"), vec![1]);
    }

    #[test]
    fn convective_term_matches_finite_difference() {
        // Arrange
        let mut state = build_planar_arm();
        state.set_joint_q("shoulder", 0.2);
        state.set_joint_q("elbow", 0.5);
        state.set_joint_v("shoulder", 0.7);
        state.set_joint_v("elbow", -1.1);
        state.update();
        let v = state.velocity();
        let J0 = state.jacobian(WORLD_FRAME, "forearm", WORLD_FRAME).to_matrix();
        let bias = state.convective_term(WORLD_FRAME, "forearm", WORLD_FRAME);

        // Act
        let dt = 1e-6;
        state.set_joint_q("shoulder", 0.2 + 0.7 * dt);
        state.set_joint_q("elbow", 0.5 - 1.1 * dt);
        state.update();
        let J1 = state.jacobian(WORLD_FRAME, "forearm", WORLD_FRAME).to_matrix();
        let Jdot_v = (J1 - J0) / dt * v;

        // Assert
        assert_vec_close!(
            Jdot_v,
            bias.as_spatial_vector().as_dvector(),
            1e-4
        );
    }

    #[test]
    fn floating_base_free_fall_bias() {
        // Arrange
        let mut state = build_floating_biped();
        state.set_floating_state(
            "floating_base",
            Pose {
                rotation: UnitQuaternion::identity(),
                translation: vector![0., 0., 1.],
            },
            SpatialVector::zero(),
        );
        state.update();

        // Act
        let c = state.bias_forces();

        // Assert
        // only the weight, pushing on the vertical root direction
        assert_close!(c[5], state.total_mass() * GRAVITY, 1e-10);
        assert_close!(c[3], 0., 1e-10);
        assert_close!(c[4], 0., 1e-10);
    }
}
