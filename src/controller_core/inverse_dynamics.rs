use na::{DMatrix, DVector, Vector3, Vector6};

use crate::{
    config::ControllerCoreOptimizationSettings,
    controller_core::{
        commands::{ContactStateCommand, ExternalWrenchCommand, InverseDynamicsCommand},
        joint_index::JointIndexHandler,
        lowlevel::{
            JointDesiredControlMode, LowLevelOneDoFJointDesiredDataHolder,
            RootJointDesiredConfigurationData,
        },
        motion_qp_input::MotionQPInput,
        motion_qp_input_calculator::MotionQPInputCalculator,
        qp::MotionQPSolver,
    },
    error::QPSolverError,
    joint::{Joint, JointId},
    kinematics::RobotModel,
    spatial::{spatial_vector::SpatialVector, wrench::Wrench},
    types::Float,
    util::skew_symmetric,
    WORLD_FRAME,
};

/// 3 x nv Jacobian of a body-fixed point given in world, in the model's
/// velocity order
pub(crate) fn point_jacobian(model: &dyn RobotModel, body: &str, point: &Vector3<Float>) -> DMatrix<Float> {
    let chain = model.jacobian(WORLD_FRAME, body, WORLD_FRAME);
    let J = &chain.jacobian;
    let J_point = &J.linear - skew_symmetric(point) * &J.angular;

    let offsets = model.velocity_offsets();
    let mut full = DMatrix::zeros(3, model.number_of_velocities());
    let mut column = 0;
    for joint in chain.joints.iter() {
        let dof = model.joints()[*joint].dof();
        full.columns_mut(offsets[*joint], dof)
            .copy_from(&J_point.columns(column, dof));
        column += dof;
    }
    full
}

/// Contact points of the active contacts, in world, grouped per body
fn active_contact_points(
    model: &dyn RobotModel,
    contacts: &[ContactStateCommand],
) -> Vec<(String, Vec<Vector3<Float>>)> {
    contacts
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
        .collect()
}

/// Solves for joint accelerations and contact forces
///     x = [v_dot; rho]
/// that best achieve the submitted tasks, subject to the floating base
/// dynamics, friction cones and joint limits. Torques follow from
///     tau = H v_dot + C - sum J_c^T rho - sum J_ext^T w_ext.
pub struct InverseDynamicsSolver {
    joint_acceleration_weight: Float,
    rho_weight: Float,
    default_friction_coefficient: Float,
    control_dt: Float,

    qp: MotionQPSolver,
    motion_input: MotionQPInput,
    commands: Vec<InverseDynamicsCommand>,
    contacts: Vec<ContactStateCommand>,

    joint_accelerations: DVector<Float>,
    joint_torques: DVector<Float>,
    contact_forces: Vec<(String, Vec<Vector3<Float>>)>,
    achieved_momentum_rate: Vector6<Float>,
    lowlevel_output: LowLevelOneDoFJointDesiredDataHolder,
    root_output: RootJointDesiredConfigurationData,
}

impl InverseDynamicsSolver {
    pub fn new(index: &JointIndexHandler, settings: &ControllerCoreOptimizationSettings) -> Self {
        InverseDynamicsSolver {
            joint_acceleration_weight: settings.joint_acceleration_weight,
            rho_weight: settings.rho_weight,
            default_friction_coefficient: settings.default_friction_coefficient,
            control_dt: settings.control_dt,
            qp: MotionQPSolver::new(),
            motion_input: MotionQPInput::new(index.number_of_dofs()),
            commands: vec![],
            contacts: vec![],
            joint_accelerations: DVector::zeros(index.number_of_dofs()),
            joint_torques: DVector::zeros(0),
            contact_forces: vec![],
            achieved_momentum_rate: Vector6::zeros(),
            lowlevel_output: LowLevelOneDoFJointDesiredDataHolder::new(),
            root_output: RootJointDesiredConfigurationData::default(),
        }
    }

    /// Drop pending commands and outputs. Contact states are kept until
    /// new ones are submitted.
    pub fn reset(&mut self) {
        self.commands.clear();
        self.lowlevel_output.clear();
        self.root_output.clear();
    }

    pub fn submit(&mut self, commands: Vec<InverseDynamicsCommand>) {
        self.commands.extend(commands);
    }

    pub fn number_of_solves(&self) -> usize {
        self.qp.number_of_solves()
    }

    /// Solved accelerations, in the joint index space
    pub fn joint_accelerations(&self) -> &DVector<Float> {
        &self.joint_accelerations
    }

    /// Joint torques, in the model's velocity order
    pub fn joint_torques(&self) -> &DVector<Float> {
        &self.joint_torques
    }

    /// Contact forces in world, per contact point
    pub fn contact_forces(&self) -> &[(String, Vec<Vector3<Float>>)] {
        &self.contact_forces
    }

    /// Total wrench in world exerted by the environment on each contact body
    pub fn contact_wrenches(&self, model: &dyn RobotModel) -> Vec<(String, Wrench)> {
        active_contact_points(model, &self.contacts)
            .iter()
            .zip(self.contact_forces.iter())
            .map(|((body, points), (_, forces))| {
                let mut wrench = Wrench::zero(WORLD_FRAME);
                for (p, f) in points.iter().zip(forces.iter()) {
                    wrench += &Wrench::from_force(p, f, WORLD_FRAME);
                }
                (body.clone(), wrench)
            })
            .collect()
    }

    /// Centroidal momentum rate the solved accelerations produce
    pub fn achieved_momentum_rate(&self) -> &Vector6<Float> {
        &self.achieved_momentum_rate
    }

    pub fn lowlevel_output(&self) -> &LowLevelOneDoFJointDesiredDataHolder {
        &self.lowlevel_output
    }

    pub fn root_output(&self) -> &RootJointDesiredConfigurationData {
        &self.root_output
    }

    pub fn solve(
        &mut self,
        model: &dyn RobotModel,
        index: &JointIndexHandler,
        calculator: &mut MotionQPInputCalculator,
    ) -> Result<(), QPSolverError> {
        let commands = std::mem::take(&mut self.commands);

        let mut new_contacts: Vec<ContactStateCommand> = vec![];
        let mut external_wrenches: Vec<ExternalWrenchCommand> = vec![];
        let mut integrated_joints: Vec<JointId> = vec![];
        for command in commands.iter() {
            match command {
                InverseDynamicsCommand::ContactState(contact) => new_contacts.push(contact.clone()),
                InverseDynamicsCommand::ExternalWrench(wrench) => external_wrenches.push(wrench.clone()),
                InverseDynamicsCommand::JointAccelerationIntegration(integration) => {
                    integrated_joints.extend(integration.joints.iter())
                }
                InverseDynamicsCommand::PrivilegedConfiguration(privileged) => {
                    calculator.submit_privileged_configuration_command(privileged, model)
                }
                InverseDynamicsCommand::JointLimitReduction(reduction) => {
                    calculator.submit_joint_limit_reduction_command(reduction)
                }
                InverseDynamicsCommand::SpatialAcceleration(_)
                | InverseDynamicsCommand::PointAcceleration(_)
                | InverseDynamicsCommand::MomentumRate(_)
                | InverseDynamicsCommand::JointspaceAcceleration(_) => {}
            }
        }
        if !new_contacts.is_empty() {
            self.contacts = new_contacts;
        }

        let n = index.number_of_dofs();
        let contact_points = active_contact_points(model, &self.contacts);
        let number_of_forces: usize = contact_points.iter().map(|(_, points)| 3 * points.len()).sum();
        self.qp.reset(n, number_of_forces);

        for command in commands.iter() {
            let converted = match command {
                InverseDynamicsCommand::SpatialAcceleration(command) => calculator
                    .convert_spatial_acceleration_command(model, index, command, &mut self.motion_input),
                InverseDynamicsCommand::PointAcceleration(command) => calculator
                    .convert_point_acceleration_command(model, index, command, &mut self.motion_input),
                InverseDynamicsCommand::MomentumRate(command) => {
                    calculator.convert_momentum_rate_command(index, command, &mut self.motion_input)
                }
                InverseDynamicsCommand::JointspaceAcceleration(command) => calculator
                    .convert_jointspace_acceleration_command(index, command, &mut self.motion_input),
                InverseDynamicsCommand::PrivilegedConfiguration(_)
                | InverseDynamicsCommand::JointLimitReduction(_)
                | InverseDynamicsCommand::ContactState(_)
                | InverseDynamicsCommand::ExternalWrench(_)
                | InverseDynamicsCommand::JointAccelerationIntegration(_) => false,
            };
            if converted {
                self.qp.add_motion_input(&self.motion_input);
            }
        }

        if calculator.compute_privileged_joint_accelerations(model, index, &mut self.motion_input) {
            self.qp.add_motion_input(&self.motion_input);
        }

        let (qdd_min, qdd_max) = calculator.compute_joint_acceleration_limits(model, index);
        self.qp.set_variable_bounds(0, &qdd_min, &qdd_max);
        self.qp.add_regularization(0, n, self.joint_acceleration_weight);
        self.qp.add_regularization(n, number_of_forces, self.rho_weight);

        let mut contact_jacobians: Vec<DMatrix<Float>> = vec![];
        let mut offset = n;
        for (contact, (body, points)) in self
            .contacts
            .iter()
            .filter(|contact| contact.is_in_contact())
            .zip(contact_points.iter())
        {
            for p in points.iter() {
                contact_jacobians.push(point_jacobian(model, body, p));
                self.qp.add_friction_cone(
                    offset,
                    &contact.contact_normal,
                    contact.coefficient_of_friction.unwrap_or(self.default_friction_coefficient),
                );
                offset += 3;
            }
        }

        let mut external_torques = DVector::zeros(model.number_of_velocities());
        for external in external_wrenches.iter() {
            external_torques += model.wrench_to_joint_torques(WORLD_FRAME, &external.body, &external.wrench);
        }

        let H = model.mass_matrix();
        let C = model.bias_forces();
        self.add_floating_base_dynamics(model, index, &H, &C, &contact_jacobians, &external_torques);

        let solution = self.qp.solve()?;
        self.joint_accelerations = solution.rows(0, n).into_owned();
        let forces: Vec<Vector3<Float>> = (0..contact_jacobians.len())
            .map(|k| solution.fixed_rows::<3>(n + 3 * k).into_owned())
            .collect();

        let qdd_model = Self::index_to_model(model, index, &self.joint_accelerations);
        let mut tau = &H * &qdd_model + &C - &external_torques;
        for (J_c, f) in contact_jacobians.iter().zip(forces.iter()) {
            tau -= J_c.transpose() * f;
        }
        self.joint_torques = tau;

        let mut forces = forces.into_iter();
        self.contact_forces = contact_points
            .iter()
            .map(|(body, points)| (body.clone(), forces.by_ref().take(points.len()).collect()))
            .collect();

        self.achieved_momentum_rate = calculator.centroidal_momentum_handler().compute_centroidal_momentum_rate(
            index,
            index.indexed_joints(),
            &self.joint_accelerations,
        );

        self.write_output(model, index, &integrated_joints);
        Ok(())
    }

    fn index_to_model(
        model: &dyn RobotModel,
        index: &JointIndexHandler,
        values: &DVector<Float>,
    ) -> DVector<Float> {
        let mut full = DVector::zeros(model.number_of_velocities());
        for joint in index.indexed_joints() {
            if let Some(columns) = index.joint_indices(*joint) {
                let offset = index.model_velocity_offset(*joint);
                for (k, column) in columns.iter().enumerate() {
                    full[offset + k] = values[*column];
                }
            }
        }
        full
    }

    /// Rows of the floating joints in H v_dot + C = sum J_c^T rho + tau_ext
    fn add_floating_base_dynamics(
        &mut self,
        model: &dyn RobotModel,
        index: &JointIndexHandler,
        H: &DMatrix<Float>,
        C: &DVector<Float>,
        contact_jacobians: &[DMatrix<Float>],
        external_torques: &DVector<Float>,
    ) {
        let n = index.number_of_dofs();
        for (joint_id, joint) in model.joints().iter().enumerate() {
            if !joint.is_floating() || !index.is_joint_indexed(joint_id) {
                continue;
            }
            let offset = index.model_velocity_offset(joint_id);
            let dof = joint.dof();
            let mut A = DMatrix::zeros(dof, self.qp.number_of_variables());
            for other in index.indexed_joints() {
                if let Some(columns) = index.joint_indices(*other) {
                    let other_offset = index.model_velocity_offset(*other);
                    for (k, column) in columns.iter().enumerate() {
                        A.view_mut((0, *column), (dof, 1))
                            .copy_from(&H.view((offset, other_offset + k), (dof, 1)));
                    }
                }
            }
            for (k, J_c) in contact_jacobians.iter().enumerate() {
                let Jt = J_c.columns(offset, dof).transpose();
                A.view_mut((0, n + 3 * k), (dof, 3)).copy_from(&(-Jt));
            }
            let b = -C.rows(offset, dof) + external_torques.rows(offset, dof);
            self.qp.add_equality_constraint(&A, &b);
        }
    }

    fn write_output(&mut self, model: &dyn RobotModel, index: &JointIndexHandler, integrated_joints: &[JointId]) {
        self.lowlevel_output.clear();
        self.root_output.clear();

        for joint in index.indexed_joints() {
            let column = match index.joint_indices(*joint) {
                Some(columns) => columns[0],
                None => continue,
            };
            let offset = index.model_velocity_offset(*joint);
            match &model.joints()[*joint] {
                Joint::Floating(_) => {
                    let qdd = self.joint_accelerations.rows(column, 6);
                    self.root_output.desired_acceleration = Some(SpatialVector::from_slice(qdd.as_slice()));
                }
                _ => {
                    let data = self.lowlevel_output.get_or_insert(*joint);
                    data.control_mode = Some(JointDesiredControlMode::Effort);
                    data.desired_acceleration = Some(self.joint_accelerations[column]);
                    data.desired_torque = Some(self.joint_torques[offset]);
                }
            }
        }

        for joint in integrated_joints.iter() {
            let column = index.one_dof_joint_index(*joint);
            let state = model.joints()[*joint].one_dof();
            let qd_desired = state.v + self.joint_accelerations[column] * self.control_dt;
            let q_desired = state.q + qd_desired * self.control_dt;
            let data = self.lowlevel_output.get_or_insert(*joint);
            data.control_mode = Some(JointDesiredControlMode::Position);
            data.desired_velocity = Some(qd_desired);
            data.desired_position = Some(q_desired);
        }
    }
}
