#![allow(non_snake_case)]

use types::Float;
pub extern crate nalgebra as na;

pub mod config;
pub mod controller_core;
pub mod error;
pub mod inertia;
pub mod joint;
pub mod kinematics;
pub mod mechanism;
pub mod rigid_body;
pub mod spatial;
pub mod trajectory;
pub mod types;
pub mod util;

pub mod helpers;

pub const GRAVITY: Float = 9.81;

pub const PI: Float = std::f64::consts::PI;

pub const WORLD_FRAME: &str = "world";
