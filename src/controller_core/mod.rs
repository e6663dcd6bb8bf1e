pub mod centroidal_momentum;
pub mod commands;
pub mod feedback;
pub mod inverse_dynamics;
pub mod inverse_kinematics;
pub mod joint_index;
pub mod joint_limits;
pub mod lowlevel;
pub mod motion_qp_input;
pub mod motion_qp_input_calculator;
pub mod nullspace;
pub mod privileged;
pub mod qp;
pub mod selection;
pub mod virtual_model_control;
pub mod whole_body_controller;
