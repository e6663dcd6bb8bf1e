pub mod geometric_jacobian;
pub mod pose;
pub mod spatial_acceleration;
pub mod spatial_vector;
pub mod transform;
pub mod twist;
pub mod wrench;

/// Composition and difference of relative motions of `body` with respect to
/// `base`, for twists and spatial accelerations alike:
///     (A to B) + (B to C) = A to C
///     (A to C) - (A to B) = B to C
macro_rules! relative_motion_ops {
    ($motion:ident) => {
        impl<'a, 'b> std::ops::Add<&'b $motion> for &'a $motion {
            type Output = $motion;

            fn add(self, rhs: &'b $motion) -> $motion {
                if self.frame != rhs.frame || self.body != rhs.base {
                    panic!(
                        "cannot compose {} ({} wrt {} in {}) with ({} wrt {} in {})",
                        stringify!($motion),
                        self.body, self.base, self.frame,
                        rhs.body, rhs.base, rhs.frame
                    );
                }
                $motion {
                    body: rhs.body.clone(),
                    base: self.base.clone(),
                    frame: self.frame.clone(),
                    angular: self.angular + rhs.angular,
                    linear: self.linear + rhs.linear,
                }
            }
        }

        impl<'a, 'b> std::ops::Sub<&'b $motion> for &'a $motion {
            type Output = $motion;

            fn sub(self, rhs: &'b $motion) -> $motion {
                if self.frame != rhs.frame || self.base != rhs.base {
                    panic!(
                        "cannot subtract {} ({} wrt {} in {}) from ({} wrt {} in {})",
                        stringify!($motion),
                        rhs.body, rhs.base, rhs.frame,
                        self.body, self.base, self.frame
                    );
                }
                $motion {
                    body: self.body.clone(),
                    base: rhs.body.clone(),
                    frame: self.frame.clone(),
                    angular: self.angular - rhs.angular,
                    linear: self.linear - rhs.linear,
                }
            }
        }
    };
}

pub(crate) use relative_motion_ops;
