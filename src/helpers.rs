use na::{vector, Vector3};

use crate::{
    joint::{floating::FloatingJoint, one_dof::OneDoFJoint, Joint},
    mechanism::MechanismState,
    rigid_body::RigidBody,
    spatial::{pose::Pose, spatial_vector::SpatialVector, transform::Transform3D},
    types::Float,
    WORLD_FRAME,
};

/// Height of the pelvis when the biped stands with straight legs and its
/// soles on the ground
pub const BIPED_STANDING_HEIGHT: Float = 0.9;

/// A point mass m on a massless rod of length l, hinged about the y axis at
/// the world origin, lying along +x at q = 0
pub fn build_pendulum(m: Float, l: Float) -> MechanismState {
    let rod_frame = "rod";
    let rod = RigidBody::new_point_mass(m, &vector![l, 0., 0.], rod_frame);
    let rod_to_world = Transform3D::identity(rod_frame, WORLD_FRAME);
    let joint = OneDoFJoint::revolute("pivot", rod_to_world, Vector3::y_axis());

    MechanismState::new(vec![Joint::OneDoF(joint)], vec![rod])
}

/// Two-link arm with pitch joints about y, links along +x at q = 0.
/// A "hand" frame sits at the tip of the forearm.
pub fn build_planar_arm() -> MechanismState {
    let l_upper = 0.5;
    let l_fore = 0.4;

    let upper_arm_frame = "upper_arm";
    let upper_arm = RigidBody::new_cuboid_at(
        vector![l_upper / 2., 0., 0.],
        1.0,
        l_upper,
        0.05,
        0.05,
        upper_arm_frame,
    );
    let shoulder = OneDoFJoint::revolute(
        "shoulder",
        Transform3D::identity(upper_arm_frame, WORLD_FRAME),
        Vector3::y_axis(),
    )
    .with_limits(-1.5, 1.5);

    let forearm_frame = "forearm";
    let forearm = RigidBody::new_cuboid_at(
        vector![l_fore / 2., 0., 0.],
        0.8,
        l_fore,
        0.05,
        0.05,
        forearm_frame,
    );
    let elbow = OneDoFJoint::revolute(
        "elbow",
        Transform3D::move_xyz(forearm_frame, upper_arm_frame, l_upper, 0., 0.),
        Vector3::y_axis(),
    )
    .with_limits(-2.5, 2.5);

    let mut state = MechanismState::new(
        vec![Joint::OneDoF(shoulder), Joint::OneDoF(elbow)],
        vec![upper_arm, forearm],
    );
    state.add_frame(Transform3D::move_xyz("hand", forearm_frame, l_fore, 0., 0.));
    state
}

/// Floating-base biped: a pelvis with two legs, each a hip pitch and a knee
/// pitch joint. Feet are the bottom ends of the shins, with "left_foot" and
/// "right_foot" frames at the soles.
pub fn build_floating_biped() -> MechanismState {
    let hip_offset_y = 0.1;
    let hip_offset_z = -0.1;
    let l_thigh = 0.4;
    let l_shin = 0.4;

    let pelvis_frame = "pelvis";
    let pelvis = RigidBody::new_cuboid(10.0, 0.2, 0.3, 0.2, pelvis_frame);
    let floating = FloatingJoint::new(
        "floating_base",
        Transform3D::identity(pelvis_frame, WORLD_FRAME),
    );

    let mut treejoints = vec![Joint::Floating(floating)];
    let mut bodies = vec![pelvis];
    for (side, y) in [("left", hip_offset_y), ("right", -hip_offset_y)] {
        let thigh_frame = format!("{}_thigh", side);
        let thigh = RigidBody::new_cuboid_at(
            vector![0., 0., -l_thigh / 2.],
            2.0,
            0.08,
            0.08,
            l_thigh,
            &thigh_frame,
        );
        let hip = OneDoFJoint::revolute(
            &format!("{}_hip", side),
            Transform3D::move_xyz(&thigh_frame, pelvis_frame, 0., y, hip_offset_z),
            Vector3::y_axis(),
        )
        .with_limits(-1.5, 1.5);

        let shin_frame = format!("{}_shin", side);
        let shin = RigidBody::new_cuboid_at(
            vector![0., 0., -l_shin / 2.],
            1.5,
            0.06,
            0.06,
            l_shin,
            &shin_frame,
        );
        let knee = OneDoFJoint::revolute(
            &format!("{}_knee", side),
            Transform3D::move_xyz(&shin_frame, &thigh_frame, 0., 0., -l_thigh),
            Vector3::y_axis(),
        )
        .with_limits(-0.1, 2.5);

        treejoints.push(Joint::OneDoF(hip));
        treejoints.push(Joint::OneDoF(knee));
        bodies.push(thigh);
        bodies.push(shin);
    }

    let mut state = MechanismState::new(treejoints, bodies);
    for side in ["left", "right"] {
        state.add_frame(Transform3D::move_xyz(
            &format!("{}_foot", side),
            &format!("{}_shin", side),
            0.,
            0.,
            -l_shin,
        ));
    }
    state.set_floating_state(
        "floating_base",
        Pose {
            rotation: na::UnitQuaternion::identity(),
            translation: vector![0., 0., BIPED_STANDING_HEIGHT],
        },
        SpatialVector::zero(),
    );
    state.update();
    state
}

/// Corners of a biped sole, expressed in the shin frame
pub fn biped_sole_contact_points() -> Vec<Vector3<Float>> {
    let z = -0.4;
    vec![
        vector![0.08, 0.04, z],
        vector![0.08, -0.04, z],
        vector![-0.08, 0.04, z],
        vector![-0.08, -0.04, z],
    ]
}
