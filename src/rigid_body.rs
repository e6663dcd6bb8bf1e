use na::{Matrix3, Vector3};

use crate::{inertia::SpatialInertia, spatial::transform::Transform3D, types::Float};

#[derive(Clone, PartialEq, Debug)]
pub struct RigidBody {
    pub name: String,
    pub inertia: SpatialInertia,
}

impl RigidBody {
    /// Body named after the frame of its inertia
    pub fn new(inertia: SpatialInertia) -> Self {
        RigidBody {
            name: inertia.frame.clone(),
            inertia,
        }
    }

    pub fn new_cuboid(mass: Float, w: Float, d: Float, h: Float, frame: &str) -> Self {
        RigidBody::new(SpatialInertia::cuboid(mass, w, d, h, frame))
    }

    /// Cuboid whose center of mass sits at `com` in the body frame
    pub fn new_cuboid_at(
        com: Vector3<Float>,
        mass: Float,
        w: Float,
        d: Float,
        h: Float,
        frame: &str,
    ) -> Self {
        let com_frame = format!("{}_com", frame);
        let inertia = SpatialInertia::cuboid(mass, w, d, h, &com_frame);
        let com_to_body = Transform3D::move_xyz(&com_frame, frame, com.x, com.y, com.z);
        RigidBody::new(inertia.transform(&com_to_body))
    }

    pub fn new_point_mass(mass: Float, point: &Vector3<Float>, frame: &str) -> Self {
        RigidBody::new(SpatialInertia::point_mass(mass, point, frame))
    }

    /// Massless body, e.g. an intermediate link of a multi-axis joint
    pub fn new_massless(frame: &str) -> Self {
        RigidBody::new(SpatialInertia::new(
            Matrix3::zeros(),
            Vector3::zeros(),
            0.,
            frame,
        ))
    }
}
