use itertools::izip;
use na::{DMatrix, DVector, Matrix3, Vector3, Vector6};

use crate::{
    config::ControllerCoreOptimizationSettings,
    controller_core::{
        commands::{
            ContactStateCommand, JointTorqueCommand, MomentumRateCommand, VirtualModelControlCommand,
            VirtualWrenchCommand,
        },
        joint_index::JointIndexHandler,
        lowlevel::{JointDesiredControlMode, LowLevelOneDoFJointDesiredDataHolder},
        motion_qp_input::MotionQPInput,
        motion_qp_input_calculator::{MotionQPInputCalculator, MIN_ALPHA_TASK_PRIORITY},
        qp::MotionQPSolver,
    },
    error::VirtualModelControlFault,
    kinematics::RobotModel,
    spatial::wrench::Wrench,
    types::Float,
    util::skew_symmetric,
    GRAVITY, WORLD_FRAME,
};

/// Distributes a desired centroidal momentum rate over the contact points,
/// then maps contact forces, virtual wrenches and direct joint torques to
/// joint torques through the Jacobian transpose. A virtual wrench on a body
/// in contact is handed to the force optimization as the reaction its
/// contact forces must produce.
pub struct VirtualModelControlSolver {
    force_weight: Float,
    default_friction_coefficient: Float,

    qp: MotionQPSolver,
    momentum_rate_command: Option<MomentumRateCommand>,
    contacts: Vec<ContactStateCommand>,
    virtual_wrenches: Vec<VirtualWrenchCommand>,
    joint_torque_commands: Vec<JointTorqueCommand>,

    contact_points: Vec<(String, Vec<Vector3<Float>>)>,
    previous_solution: DVector<Float>,
    joint_torques: DVector<Float>,
    lowlevel_output: LowLevelOneDoFJointDesiredDataHolder,
}

impl VirtualModelControlSolver {
    pub fn new(settings: &ControllerCoreOptimizationSettings) -> Self {
        VirtualModelControlSolver {
            force_weight: settings.virtual_model_control_force_weight,
            default_friction_coefficient: settings.default_friction_coefficient,
            qp: MotionQPSolver::new(),
            momentum_rate_command: None,
            contacts: vec![],
            virtual_wrenches: vec![],
            joint_torque_commands: vec![],
            contact_points: vec![],
            previous_solution: DVector::zeros(0),
            joint_torques: DVector::zeros(0),
            lowlevel_output: LowLevelOneDoFJointDesiredDataHolder::new(),
        }
    }

    /// Drop pending commands and outputs. Contact states are kept until
    /// new ones are submitted.
    pub fn reset(&mut self) {
        self.momentum_rate_command = None;
        self.virtual_wrenches.clear();
        self.joint_torque_commands.clear();
        self.lowlevel_output.clear();
    }

    pub fn submit(&mut self, commands: Vec<VirtualModelControlCommand>) {
        let mut new_contacts = vec![];
        for command in commands {
            match command {
                VirtualModelControlCommand::MomentumRate(command) => {
                    self.momentum_rate_command = Some(command)
                }
                VirtualModelControlCommand::ContactState(contact) => new_contacts.push(contact),
                VirtualModelControlCommand::VirtualWrench(wrench) => self.virtual_wrenches.push(wrench),
                VirtualModelControlCommand::JointTorque(torque) => {
                    if torque.joints.len() != torque.desired_torques.len() {
                        panic!(
                            "{} joints but {} desired torques",
                            torque.joints.len(),
                            torque.desired_torques.len()
                        );
                    }
                    self.joint_torque_commands.push(torque)
                }
            }
        }
        if !new_contacts.is_empty() {
            self.contacts = new_contacts;
        }
    }

    pub fn number_of_solves(&self) -> usize {
        self.qp.number_of_solves()
    }

    /// Contact forces of the last successful solve, 3 per contact point
    pub fn previous_solution(&self) -> &DVector<Float> {
        &self.previous_solution
    }

    /// Joint torques, in the model's velocity order
    pub fn joint_torques(&self) -> &DVector<Float> {
        &self.joint_torques
    }

    pub fn lowlevel_output(&self) -> &LowLevelOneDoFJointDesiredDataHolder {
        &self.lowlevel_output
    }

    /// Solve for the contact forces and compute the joint torques. On
    /// failure nothing is written and the fault carries the previous
    /// solution for `compute_joint_torques`.
    pub fn solve(
        &mut self,
        model: &dyn RobotModel,
        index: &JointIndexHandler,
        calculator: &MotionQPInputCalculator,
    ) -> Result<(), VirtualModelControlFault> {
        self.contact_points = self
            .contacts
            .iter()
            .filter(|contact| contact.is_in_contact())
            .map(|contact| {
                let body_to_world = model.body_to_world(&contact.body);
                let points = contact
                    .contact_points
                    .iter()
                    .map(|p| body_to_world.transform_point(p))
                    .collect();
                (contact.body.clone(), points)
            })
            .collect();
        let number_of_forces: usize = self.contact_points.iter().map(|(_, points)| 3 * points.len()).sum();

        let forces = if number_of_forces == 0 {
            DVector::zeros(0)
        } else {
            self.qp.reset(0, number_of_forces);
            if let Some(command) = &self.momentum_rate_command {
                let handler = calculator.centroidal_momentum_handler();
                Self::add_momentum_rate_task(
                    &mut self.qp,
                    &self.contact_points,
                    command,
                    handler.center_of_mass(),
                    handler.total_mass(),
                );
            }
            for virtual_wrench in self.virtual_wrenches.iter() {
                if let Some(columns) = Self::contact_columns(&self.contact_points, &virtual_wrench.body) {
                    let (G, w) = Self::reaction_task(&self.contact_points, columns, &virtual_wrench.wrench);
                    self.qp.add_cost(&G, &w, &DMatrix::identity(6, 6));
                }
            }
            self.qp.add_regularization(0, number_of_forces, self.force_weight);

            let mut offset = 0;
            for contact in self.contacts.iter().filter(|contact| contact.is_in_contact()) {
                for _ in contact.contact_points.iter() {
                    self.qp.add_friction_cone(
                        offset,
                        &contact.contact_normal,
                        contact.coefficient_of_friction.unwrap_or(self.default_friction_coefficient),
                    );
                    offset += 3;
                }
            }

            match self.qp.solve() {
                Ok(forces) => forces,
                Err(cause) => {
                    return Err(VirtualModelControlFault {
                        cause,
                        previous_solution: self.previous_solution.clone(),
                    })
                }
            }
        };

        self.compute_joint_torques(model, index, &forces);
        self.previous_solution = forces;
        Ok(())
    }

    /// Add the momentum rate task on the contact forces. The contact wrench
    /// about the center of mass must produce the desired momentum rate
    /// against gravity. Weighting and priorities follow the inverse
    /// dynamics conversion of the same command.
    fn add_momentum_rate_task(
        qp: &mut MotionQPSolver,
        contact_points: &[(String, Vec<Vector3<Float>>)],
        command: &MomentumRateCommand,
        center_of_mass: &Vector3<Float>,
        total_mass: Float,
    ) {
        let task_size = command.selection.task_size();
        if task_size == 0 || command.alpha_task_priority.max() < MIN_ALPHA_TASK_PRIORITY {
            return;
        }
        let points: Vec<&Vector3<Float>> = contact_points.iter().flat_map(|(_, points)| points.iter()).collect();
        let mut G = DMatrix::zeros(6, 3 * points.len());
        for (k, p) in points.iter().enumerate() {
            G.fixed_view_mut::<3, 3>(0, 3 * k)
                .copy_from(&skew_symmetric(&(*p - center_of_mass)));
            G.fixed_view_mut::<3, 3>(3, 3 * k)
                .copy_from(&Matrix3::identity());
        }
        let gravity_compensation = Vector6::new(0., 0., 0., 0., 0., total_mass * GRAVITY);
        let w = command.desired_momentum_rate + gravity_compensation;

        let mut input = MotionQPInput::new(G.ncols());
        input.reshape(task_size, G.ncols());
        MotionQPInputCalculator::assign_weight(
            &mut input,
            &command.selection,
            &command.weight,
            command.hard_constraint,
        );
        let S = command.selection.matrix();
        input.task_jacobian = S * G;
        input.task_objective = S * DVector::from_column_slice(w.as_slice());
        MotionQPInputCalculator::scale_rows(&mut input, &command.row_task_priorities());

        if input.is_motion_constraint {
            qp.add_equality_constraint(&input.task_jacobian, &input.task_objective);
        } else {
            qp.add_cost(&input.task_jacobian, &input.task_objective, &input.weight_matrix());
        }
    }

    /// Range of force variables belonging to the contact points of `body`
    fn contact_columns(contact_points: &[(String, Vec<Vector3<Float>>)], body: &str) -> Option<(usize, usize)> {
        let mut offset = 0;
        for (name, points) in contact_points.iter() {
            if name == body {
                return Some((offset, 3 * points.len()));
            }
            offset += 3 * points.len();
        }
        None
    }

    /// Wrench about the world origin of the forces at one body's contact
    /// points, set equal to the reaction of its virtual wrench
    fn reaction_task(
        contact_points: &[(String, Vec<Vector3<Float>>)],
        (offset, size): (usize, usize),
        wrench: &Wrench,
    ) -> (DMatrix<Float>, DVector<Float>) {
        if wrench.frame != WORLD_FRAME {
            panic!("virtual wrench is expressed in {}, not world", wrench.frame);
        }
        let points = contact_points.iter().flat_map(|(_, points)| points.iter());
        let number_of_forces = 3 * contact_points.iter().map(|(_, points)| points.len()).sum::<usize>();
        let mut G = DMatrix::zeros(6, number_of_forces);
        for (k, p) in points.enumerate() {
            let column = 3 * k;
            if column < offset || column >= offset + size {
                continue;
            }
            G.fixed_view_mut::<3, 3>(0, column).copy_from(&skew_symmetric(p));
            G.fixed_view_mut::<3, 3>(3, column).copy_from(&Matrix3::identity());
        }
        let reaction = -wrench.as_spatial_vector().as_vector6();
        (G, DVector::from_column_slice(reaction.as_slice()))
    }

    /// Joint torques realizing the given contact forces together with the
    /// submitted virtual wrenches and joint torques. A force vector that
    /// does not match the current contact points is replaced by zeros.
    pub fn compute_joint_torques(
        &mut self,
        model: &dyn RobotModel,
        index: &JointIndexHandler,
        forces: &DVector<Float>,
    ) {
        let number_of_forces: usize = self.contact_points.iter().map(|(_, points)| 3 * points.len()).sum();
        let forces = if forces.len() == number_of_forces {
            forces.clone()
        } else {
            DVector::zeros(number_of_forces)
        };

        let root = model.root_body();
        let mut tau = DVector::zeros(model.number_of_velocities());
        let mut k = 0;
        for (body, points) in self.contact_points.iter() {
            let mut wrench = Wrench::zero(WORLD_FRAME);
            for p in points.iter() {
                let f: Vector3<Float> = forces.fixed_rows::<3>(3 * k).into_owned();
                wrench += &Wrench::from_force(p, &f, WORLD_FRAME);
                k += 1;
            }
            tau -= model.wrench_to_joint_torques(root, body, &wrench);
        }

        // wrenches on contact bodies are realized through the contact forces
        for virtual_wrench in self.virtual_wrenches.iter() {
            if Self::contact_columns(&self.contact_points, &virtual_wrench.body).is_none() {
                tau += model.wrench_to_joint_torques(root, &virtual_wrench.body, &virtual_wrench.wrench);
            }
        }

        let offsets = model.velocity_offsets();
        for command in self.joint_torque_commands.iter() {
            for (joint, torque) in izip!(command.joints.iter(), command.desired_torques.iter()) {
                tau[offsets[*joint]] += torque;
            }
        }

        self.lowlevel_output.clear();
        for joint in index.indexed_one_dof_joints() {
            let data = self.lowlevel_output.get_or_insert(*joint);
            data.control_mode = Some(JointDesiredControlMode::Effort);
            data.desired_torque = Some(tau[offsets[*joint]]);
        }
        self.joint_torques = tau;
    }
}

#[cfg(test)]
mod virtual_model_control_tests {
    use na::vector;

    use crate::{
        assert_close, assert_vec_close,
        controller_core::commands::ContactStateCommand,
        error::QPSolverError,
        helpers::{biped_sole_contact_points, build_floating_biped, build_planar_arm},
        joint::JointId,
    };

    use super::*;

    fn setup(
        model: &dyn RobotModel,
    ) -> (JointIndexHandler, MotionQPInputCalculator, VirtualModelControlSolver) {
        let controlled: Vec<JointId> = (0..model.joints().len()).collect();
        let index = JointIndexHandler::new(&controlled, model.joints());
        let settings = ControllerCoreOptimizationSettings::default();
        let mut calculator = MotionQPInputCalculator::new(&index, &settings);
        calculator.initialize(model, &index);
        (index, calculator, VirtualModelControlSolver::new(&settings))
    }

    fn stand(desired_momentum_rate: Vector6<Float>) -> Vec<VirtualModelControlCommand> {
        let mut commands = vec![VirtualModelControlCommand::MomentumRate(MomentumRateCommand::new(
            desired_momentum_rate,
        ))];
        for body in ["left_shin", "right_shin"] {
            commands.push(VirtualModelControlCommand::ContactState(ContactStateCommand::new(
                body,
                biped_sole_contact_points(),
            )));
        }
        commands
    }

    #[test]
    fn virtual_force_at_the_hand() {
        // Arrange
        let arm = build_planar_arm();
        let (index, calculator, mut solver) = setup(&arm);
        let F = 10.;
        let tip = vector![0.9, 0., 0.];
        solver.submit(vec![VirtualModelControlCommand::VirtualWrench(VirtualWrenchCommand {
            body: "forearm".to_string(),
            wrench: Wrench::from_force(&tip, &vector![0., 0., F], WORLD_FRAME),
        })]);

        // Act
        solver.solve(&arm, &index, &calculator).unwrap();

        // Assert
        let tau = solver.joint_torques();
        assert_close!(tau[0], -0.9 * F, 1e-10);
        assert_close!(tau[1], -0.4 * F, 1e-10);
        assert_eq!(solver.number_of_solves(), 0);
        let shoulder = solver.lowlevel_output().get(0).unwrap();
        assert_eq!(shoulder.control_mode, Some(JointDesiredControlMode::Effort));
    }

    #[test]
    fn joint_torque_commands_add_up() {
        let arm = build_planar_arm();
        let (index, calculator, mut solver) = setup(&arm);
        solver.submit(vec![
            VirtualModelControlCommand::JointTorque(JointTorqueCommand {
                joints: vec![1],
                desired_torques: vec![2.],
            }),
            VirtualModelControlCommand::JointTorque(JointTorqueCommand {
                joints: vec![0, 1],
                desired_torques: vec![-1., 0.5],
            }),
        ]);

        solver.solve(&arm, &index, &calculator).unwrap();

        assert_close!(solver.joint_torques()[0], -1., 1e-12);
        assert_close!(solver.joint_torques()[1], 2.5, 1e-12);
    }

    #[test]
    fn standing_contact_forces_carry_the_weight() {
        // Arrange
        let biped = build_floating_biped();
        let (index, calculator, mut solver) = setup(&biped);
        solver.submit(stand(Vector6::zeros()));

        // Act
        solver.solve(&biped, &index, &calculator).unwrap();

        // Assert
        let forces = solver.previous_solution();
        assert_eq!(forces.len(), 24);
        let total_z: Float = (0..8).map(|k| forces[3 * k + 2]).sum();
        let weight = biped.total_mass() * GRAVITY;
        assert_close!(total_z, weight, 0.01 * weight);
        // floating joint is not actuated
        assert!(solver.joint_torques().rows(0, 6).norm() < 1e-12);
    }

    #[test]
    fn virtual_wrench_on_a_stance_foot_is_pushed_into_the_ground() {
        // Arrange
        let biped = build_floating_biped();
        let (index, calculator, mut solver) = setup(&biped);
        let F = 50.;
        let sole = biped.body_to_world("left_shin").transform_point(&vector![0., 0., -0.4]);
        let mut commands: Vec<VirtualModelControlCommand> = stand(Vector6::zeros()).into_iter().skip(1).collect();
        commands.push(VirtualModelControlCommand::VirtualWrench(VirtualWrenchCommand {
            body: "left_shin".to_string(),
            wrench: Wrench::from_force(&sole, &vector![0., 0., -F], WORLD_FRAME),
        }));
        solver.submit(commands);

        // Act
        solver.solve(&biped, &index, &calculator).unwrap();

        // Assert
        let forces = solver.previous_solution().clone();
        assert_eq!(forces.len(), 24);
        let left_z: Float = (0..4).map(|k| forces[3 * k + 2]).sum();
        assert_close!(left_z, F, 1e-3 * F);
        assert!(forces.rows(12, 12).norm() < 1e-4 * F);

        // the wrench acts only through the contact forces
        let (_, _, mut without_wrench) = setup(&biped);
        without_wrench.submit(stand(Vector6::zeros()).into_iter().skip(1).collect());
        without_wrench.solve(&biped, &index, &calculator).unwrap();
        without_wrench.compute_joint_torques(&biped, &index, &forces);
        assert_vec_close!(solver.joint_torques(), without_wrench.joint_torques(), 1e-9);
    }

    #[test]
    fn momentum_rate_task_without_priority_is_dropped() {
        // Arrange
        let biped = build_floating_biped();
        let (index, calculator, mut solver) = setup(&biped);
        let mut commands = stand(Vector6::zeros());
        if let VirtualModelControlCommand::MomentumRate(command) = &mut commands[0] {
            command.alpha_task_priority = Vector6::zeros();
        }
        solver.submit(commands);

        // Act
        solver.solve(&biped, &index, &calculator).unwrap();

        // Assert
        assert_eq!(solver.number_of_solves(), 1);
        assert!(solver.previous_solution().norm() < 1e-6);
    }

    #[test]
    fn weighted_momentum_rate_task_is_soft() {
        // Arrange
        let biped = build_floating_biped();
        let (index, calculator, mut hard) = setup(&biped);
        let (_, _, mut soft) = setup(&biped);
        let mut commands = stand(Vector6::zeros());
        hard.submit(commands.clone());
        if let VirtualModelControlCommand::MomentumRate(command) = &mut commands[0] {
            command.set_weight(1e-5);
        }
        soft.submit(commands);

        // Act
        hard.solve(&biped, &index, &calculator).unwrap();
        soft.solve(&biped, &index, &calculator).unwrap();

        // Assert
        let weight = biped.total_mass() * GRAVITY;
        let total_z = |forces: &DVector<Float>| -> Float { (0..8).map(|k| forces[3 * k + 2]).sum() };
        assert_close!(total_z(hard.previous_solution()), weight, 1e-4 * weight);
        // a task weight below the force regularization leaves it mostly undone
        assert!(total_z(soft.previous_solution()) < 0.6 * weight);
    }

    #[test]
    fn contacts_without_friction_coefficient_use_the_default() {
        // Arrange
        let biped = build_floating_biped();
        let (index, calculator, _) = setup(&biped);
        let settings = ControllerCoreOptimizationSettings {
            default_friction_coefficient: 0.1,
            ..Default::default()
        };
        let mut solver = VirtualModelControlSolver::new(&settings);
        let weight = biped.total_mass() * GRAVITY;
        let mut commands = stand(Vector6::new(0., 0., 0., 0.5 * weight, 0., 0.));
        if let VirtualModelControlCommand::MomentumRate(command) = &mut commands[0] {
            command.set_weight(1.);
        }
        solver.submit(commands);

        // Act
        solver.solve(&biped, &index, &calculator).unwrap();

        // Assert
        let forces = solver.previous_solution();
        for k in 0..8 {
            let f: Vector3<Float> = forces.fixed_rows::<3>(3 * k).into_owned();
            assert!(f.xy().norm() <= 0.1 * f.z + 1e-6);
        }
        let total_x: Float = (0..8).map(|k| forces[3 * k]).sum();
        assert!(total_x < 0.12 * weight);
    }

    #[test]
    fn non_finite_momentum_rate_falls_back_to_previous_solution() {
        // Arrange
        let biped = build_floating_biped();
        let (index, calculator, mut solver) = setup(&biped);
        solver.submit(stand(Vector6::zeros()));
        solver.solve(&biped, &index, &calculator).unwrap();
        let torques = solver.joint_torques().clone();
        let solution = solver.previous_solution().clone();

        // Act
        solver.reset();
        solver.submit(stand(Vector6::repeat(Float::NAN)));
        let fault = solver.solve(&biped, &index, &calculator).unwrap_err();
        solver.compute_joint_torques(&biped, &index, &fault.previous_solution);

        // Assert
        assert_eq!(fault.cause, QPSolverError::NonFiniteProblem);
        assert_eq!(fault.previous_solution, solution);
        assert_eq!(solver.joint_torques(), &torques);
    }
}
