use na::Vector3;

use crate::{
    spatial::{relative_motion_ops, spatial_vector::SpatialVector, transform::Transform3D},
    types::Float,
    GRAVITY, WORLD_FRAME,
};

/// Time derivative of a twist, with the same body / base / frame tags
#[derive(PartialEq, Debug, Clone)]
pub struct SpatialAcceleration {
    pub body: String,
    pub base: String,
    pub frame: String,
    pub angular: Vector3<Float>,
    pub linear: Vector3<Float>,
}

relative_motion_ops!(SpatialAcceleration);

impl SpatialAcceleration {
    pub fn new(body: &str, base: &str, frame: &str, angular: Vector3<Float>, linear: Vector3<Float>) -> Self {
        SpatialAcceleration {
            body: body.to_string(),
            base: base.to_string(),
            frame: frame.to_string(),
            angular,
            linear,
        }
    }

    pub fn zero(body: &str, base: &str, frame: &str) -> Self {
        SpatialAcceleration::new(body, base, frame, Vector3::zeros(), Vector3::zeros())
    }

    pub fn transform(&self, transform: &Transform3D) -> SpatialAcceleration {
        transform.check_source("spatial acceleration", &self.frame);
        let (angular, linear) = transform.map_motion(&self.angular, &self.linear);
        SpatialAcceleration::new(&self.body, &self.base, &transform.to, angular, linear)
    }

    /// World accelerating upwards at g, which stands in for gravity in the
    /// recursive dynamics
    pub fn inv_gravitational_spatial_acceleration() -> SpatialAcceleration {
        SpatialAcceleration::new(
            WORLD_FRAME,
            WORLD_FRAME,
            WORLD_FRAME,
            Vector3::zeros(),
            Vector3::z() * GRAVITY,
        )
    }

    pub fn as_spatial_vector(&self) -> SpatialVector {
        SpatialVector::new(self.angular, self.linear)
    }
}
