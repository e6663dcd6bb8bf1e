use std::collections::HashMap;

use na::{DMatrix, DVector, Matrix3, Vector3, Vector6};

use crate::{
    config::ControllerCoreOptimizationSettings,
    controller_core::{
        centroidal_momentum::CentroidalMomentumHandler,
        commands::{
            JointLimitReductionCommand, JointspaceAccelerationCommand, JointspaceVelocityCommand,
            MomentumCommand, MomentumRateCommand, PointAccelerationCommand,
            PrivilegedConfigurationCommand, SpatialAccelerationCommand, SpatialVelocityCommand,
        },
        joint_index::JointIndexHandler,
        joint_limits::{compute_acceleration_bounds, compute_velocity_bounds, JointLimitReductionHandler},
        motion_qp_input::{MotionQPInput, TaskWeight},
        nullspace::DampedLeastSquaresNullspaceCalculator,
        privileged::PrivilegedConfigurationHandler,
        selection::SelectionMatrix,
    },
    joint::JointId,
    kinematics::{ChainJacobian, RobotModel},
    types::Float,
    util::skew_symmetric,
    WORLD_FRAME,
};

/// Tasks with a priority below this are dropped
pub(crate) const MIN_ALPHA_TASK_PRIORITY: Float = 1e-5;

/// Jacobian rows [angular; linear] of a body-fixed control point relative to
/// a base, in world coordinates, with the matching convective term
struct ControlPointJacobian {
    joints: Vec<JointId>,
    jacobian: DMatrix<Float>,
    convective_term: Vector6<Float>,
}

/// Converts task commands into MotionQPInputs in the joint index space.
///
/// Every converted task is also stacked into `all_task_jacobian`, the
/// nullspace of which the privileged configuration acts in. Call
/// `initialize` once per tick before converting.
pub struct MotionQPInputCalculator {
    control_dt: Float,
    secondary_task_joints_weight: Float,
    maximum_joint_acceleration: Float,
    maximum_joint_velocity: Float,

    centroidal_momentum_handler: CentroidalMomentumHandler,
    privileged_configuration_handler: PrivilegedConfigurationHandler,
    joint_limit_reduction_handler: JointLimitReductionHandler,
    /// A reduction command was merged since the last `initialize`
    joint_limit_reduction_submitted: bool,
    nullspace_calculator: DampedLeastSquaresNullspaceCalculator,

    jacobian_cache: HashMap<(String, String, String), ChainJacobian>,
    all_task_jacobian: DMatrix<Float>,
    full_block: DMatrix<Float>,
}

impl MotionQPInputCalculator {
    pub fn new(index: &JointIndexHandler, settings: &ControllerCoreOptimizationSettings) -> Self {
        let n = index.number_of_dofs();
        MotionQPInputCalculator {
            control_dt: settings.control_dt,
            secondary_task_joints_weight: settings.secondary_task_joints_weight,
            maximum_joint_acceleration: settings.maximum_joint_acceleration,
            maximum_joint_velocity: settings.maximum_joint_velocity,
            centroidal_momentum_handler: CentroidalMomentumHandler::new(n),
            privileged_configuration_handler: PrivilegedConfigurationHandler::new(
                index,
                &settings.privileged,
            ),
            joint_limit_reduction_handler: JointLimitReductionHandler::default(),
            joint_limit_reduction_submitted: false,
            nullspace_calculator: DampedLeastSquaresNullspaceCalculator::new(
                settings.nullspace_projection_alpha,
            ),
            jacobian_cache: HashMap::new(),
            all_task_jacobian: DMatrix::zeros(0, n),
            full_block: DMatrix::zeros(0, n),
        }
    }

    /// Start of a control tick: clears the Jacobian cache and the stacked
    /// task Jacobian, and recomputes the centroidal momentum
    pub fn initialize(&mut self, model: &dyn RobotModel, index: &JointIndexHandler) {
        self.jacobian_cache.clear();
        self.joint_limit_reduction_submitted = false;
        self.all_task_jacobian = DMatrix::zeros(0, index.number_of_dofs());
        self.centroidal_momentum_handler.compute(model, index);
    }

    pub fn all_task_jacobian(&self) -> &DMatrix<Float> {
        &self.all_task_jacobian
    }

    pub fn centroidal_momentum_handler(&self) -> &CentroidalMomentumHandler {
        &self.centroidal_momentum_handler
    }

    pub fn privileged_configuration_handler(&self) -> &PrivilegedConfigurationHandler {
        &self.privileged_configuration_handler
    }

    pub fn submit_privileged_configuration_command(
        &mut self,
        command: &PrivilegedConfigurationCommand,
        model: &dyn RobotModel,
    ) {
        self.privileged_configuration_handler.submit(command, model);
    }

    /// The first reduction command of a tick replaces the reductions held
    /// so far; later ones in the same tick are merged, joint by joint.
    pub fn submit_joint_limit_reduction_command(&mut self, command: &JointLimitReductionCommand) {
        if command.joints.len() != command.factors.len() {
            panic!(
                "{} joints but {} reduction factors",
                command.joints.len(),
                command.factors.len()
            );
        }
        if !self.joint_limit_reduction_submitted {
            self.joint_limit_reduction_handler.clear();
            self.joint_limit_reduction_submitted = true;
        }
        for (joint, factor) in command.joints.iter().zip(command.factors.iter()) {
            self.joint_limit_reduction_handler.set_reduction(*joint, *factor);
        }
    }

    /// World-frame chain Jacobian, computed at most once per tick
    fn chain_jacobian(&mut self, model: &dyn RobotModel, base: &str, end_effector: &str) -> ChainJacobian {
        self.jacobian_cache
            .entry((
                base.to_string(),
                end_effector.to_string(),
                WORLD_FRAME.to_string(),
            ))
            .or_insert_with(|| model.jacobian(base, end_effector, WORLD_FRAME))
            .clone()
    }

    /// Angular rows and linear rows of the control point, i.e.
    ///     v_p = v - p x w,    a_p = J_p v_dot + c - p x c_w + w x p_dot
    /// where p is the control point in world and p_dot its velocity.
    fn control_point_jacobian(
        &mut self,
        model: &dyn RobotModel,
        base: &str,
        end_effector: &str,
        control_point: &Vector3<Float>,
    ) -> ControlPointJacobian {
        let chain = self.chain_jacobian(model, base, end_effector);
        let p = model.frame_to_world(end_effector).transform_point(control_point);
        let p_skew = skew_symmetric(&p);

        let J = &chain.jacobian;
        let mut jacobian = DMatrix::zeros(6, J.dim());
        jacobian.view_mut((0, 0), (3, J.dim())).copy_from(&J.angular);
        jacobian
            .view_mut((3, 0), (3, J.dim()))
            .copy_from(&(&J.linear - p_skew * &J.angular));

        let convective = model.convective_term(base, end_effector, WORLD_FRAME);
        let ee_twist = model.twist(end_effector);
        let omega = ee_twist.angular - model.twist(base).angular;
        let p_dot = ee_twist.point_velocity(&p);
        let linear = convective.linear - p.cross(&convective.angular) + omega.cross(&p_dot);
        let convective_term = Vector6::new(
            convective.angular.x,
            convective.angular.y,
            convective.angular.z,
            linear.x,
            linear.y,
            linear.z,
        );

        ControlPointJacobian {
            joints: chain.joints,
            jacobian,
            convective_term,
        }
    }

    fn rotation_to_world(model: &dyn RobotModel, frame: &str) -> Matrix3<Float> {
        model.frame_to_world(frame).rot()
    }

    /// Hard constraint when asked for or when no weight is given, otherwise
    /// weighted with S W S^T
    pub(crate) fn assign_weight(
        output: &mut MotionQPInput,
        selection: &SelectionMatrix,
        weight: &Option<DMatrix<Float>>,
        hard_constraint: bool,
    ) {
        match weight {
            Some(W) if !hard_constraint => {
                if W.nrows() != selection.dimension() || W.ncols() != selection.dimension() {
                    panic!(
                        "weight is {}x{}, task dimension is {}",
                        W.nrows(),
                        W.ncols(),
                        selection.dimension()
                    );
                }
                let S = selection.matrix();
                output.weight = TaskWeight::Matrix(S * W * S.transpose());
                output.is_motion_constraint = false;
            }
            _ => output.is_motion_constraint = true,
        }
    }

    pub(crate) fn scale_rows(output: &mut MotionQPInput, alphas: &[Float]) {
        for row in (0..output.task_size()).rev() {
            let alpha = alphas[row];
            output.task_jacobian.row_mut(row).scale_mut(alpha);
            output.task_objective[row] *= alpha;
        }
    }

    fn append_to_all_task_jacobian(&mut self, task_jacobian: &DMatrix<Float>) {
        let rows = self.all_task_jacobian.nrows();
        let owned = std::mem::replace(&mut self.all_task_jacobian, DMatrix::zeros(0, 0));
        let mut stacked = owned.resize_vertically(rows + task_jacobian.nrows(), 0.);
        stacked
            .rows_mut(rows, task_jacobian.nrows())
            .copy_from(task_jacobian);
        self.all_task_jacobian = stacked;
    }

    /// Scatter the selected rows of a compact control point task into the
    /// output. Returns false if a joint of the chain is not indexed.
    fn scatter_task(
        &mut self,
        index: &JointIndexHandler,
        joints: &[JointId],
        compact: &DMatrix<Float>,
        output: &mut MotionQPInput,
    ) -> bool {
        if !index.compact_block_to_full_block(joints, compact, &mut self.full_block) {
            return false;
        }
        output.task_jacobian.copy_from(&self.full_block);
        true
    }

    pub fn convert_spatial_acceleration_command(
        &mut self,
        model: &dyn RobotModel,
        index: &JointIndexHandler,
        command: &SpatialAccelerationCommand,
        output: &mut MotionQPInput,
    ) -> bool {
        let task_size = command.selection.task_size();
        if task_size == 0 || command.alpha_task_priority < MIN_ALPHA_TASK_PRIORITY {
            return false;
        }
        output.reshape(task_size, index.number_of_dofs());
        Self::assign_weight(
            output,
            &command.selection,
            &command.weight,
            command.hard_constraint,
        );

        let control_point = self.control_point_jacobian(
            model,
            &command.base,
            &command.end_effector,
            &command.control_point,
        );
        let R = Self::rotation_to_world(model, &command.expressed_in);
        let rotated = command.selection.rotated(&R);
        let compact = rotated.matrix() * &control_point.jacobian;
        if !self.scatter_task(index, &control_point.joints, &compact, output) {
            return false;
        }

        let desired = Vector6::new(
            command.desired_angular_acceleration.x,
            command.desired_angular_acceleration.y,
            command.desired_angular_acceleration.z,
            command.desired_linear_acceleration.x,
            command.desired_linear_acceleration.y,
            command.desired_linear_acceleration.z,
        );
        output.task_objective = command.selection.matrix() * DVector::from_column_slice(desired.as_slice())
            - rotated.matrix() * DVector::from_column_slice(control_point.convective_term.as_slice());

        Self::scale_rows(output, &vec![command.alpha_task_priority; task_size]);

        if let Some(primary_base) = &command.primary_base {
            for joint in model.kinematic_path(WORLD_FRAME, primary_base) {
                if let Some(columns) = index.joint_indices(joint) {
                    for column in columns.iter() {
                        output
                            .task_jacobian
                            .column_mut(*column)
                            .scale_mut(self.secondary_task_joints_weight);
                    }
                }
            }
        }

        self.append_to_all_task_jacobian(&output.task_jacobian);
        true
    }

    pub fn convert_point_acceleration_command(
        &mut self,
        model: &dyn RobotModel,
        index: &JointIndexHandler,
        command: &PointAccelerationCommand,
        output: &mut MotionQPInput,
    ) -> bool {
        let task_size = command.selection.task_size();
        if task_size == 0 || command.alpha_task_priority < MIN_ALPHA_TASK_PRIORITY {
            return false;
        }
        output.reshape(task_size, index.number_of_dofs());
        Self::assign_weight(
            output,
            &command.selection,
            &command.weight,
            command.hard_constraint,
        );

        let control_point = self.control_point_jacobian(
            model,
            &command.base,
            &command.end_effector,
            &command.body_fixed_point,
        );
        let R = Self::rotation_to_world(model, &command.expressed_in);
        let rotated = command.selection.rotated(&R);
        let linear_rows = control_point.jacobian.rows(3, 3).into_owned();
        let compact = rotated.matrix() * linear_rows;
        if !self.scatter_task(index, &control_point.joints, &compact, output) {
            return false;
        }

        let convective = control_point.convective_term.fixed_rows::<3>(3).into_owned();
        output.task_objective = command.selection.matrix()
            * DVector::from_column_slice(command.desired_acceleration.as_slice())
            - rotated.matrix() * DVector::from_column_slice(convective.as_slice());

        Self::scale_rows(output, &vec![command.alpha_task_priority; task_size]);
        self.append_to_all_task_jacobian(&output.task_jacobian);
        true
    }

    pub fn convert_spatial_velocity_command(
        &mut self,
        model: &dyn RobotModel,
        index: &JointIndexHandler,
        command: &SpatialVelocityCommand,
        output: &mut MotionQPInput,
    ) -> bool {
        let task_size = command.selection.task_size();
        if task_size == 0 || command.alpha_task_priority < MIN_ALPHA_TASK_PRIORITY {
            return false;
        }
        output.reshape(task_size, index.number_of_dofs());
        Self::assign_weight(
            output,
            &command.selection,
            &command.weight,
            command.hard_constraint,
        );

        let control_point = self.control_point_jacobian(
            model,
            &command.base,
            &command.end_effector,
            &command.control_point,
        );
        let R = Self::rotation_to_world(model, &command.expressed_in);
        let rotated = command.selection.rotated(&R);
        let compact = rotated.matrix() * &control_point.jacobian;
        if !self.scatter_task(index, &control_point.joints, &compact, output) {
            return false;
        }

        let desired = DVector::from_vec(vec![
            command.desired_angular_velocity.x,
            command.desired_angular_velocity.y,
            command.desired_angular_velocity.z,
            command.desired_linear_velocity.x,
            command.desired_linear_velocity.y,
            command.desired_linear_velocity.z,
        ]);
        output.task_objective = command.selection.matrix() * desired;

        Self::scale_rows(output, &vec![command.alpha_task_priority; task_size]);
        self.append_to_all_task_jacobian(&output.task_jacobian);
        true
    }

    /// Rows are scaled by `MomentumRateCommand::row_task_priorities`
    pub fn convert_momentum_rate_command(
        &mut self,
        index: &JointIndexHandler,
        command: &MomentumRateCommand,
        output: &mut MotionQPInput,
    ) -> bool {
        let task_size = command.selection.task_size();
        if task_size == 0 || command.alpha_task_priority.max() < MIN_ALPHA_TASK_PRIORITY {
            return false;
        }
        output.reshape(task_size, index.number_of_dofs());
        Self::assign_weight(
            output,
            &command.selection,
            &command.weight,
            command.hard_constraint,
        );

        let S = command.selection.matrix();
        let handler = &self.centroidal_momentum_handler;
        output.task_jacobian = S * handler.centroidal_momentum_matrix();
        let objective = command.desired_momentum_rate - handler.centroidal_momentum_convective_term();
        output.task_objective = S * DVector::from_column_slice(objective.as_slice());

        Self::scale_rows(output, &command.row_task_priorities());

        self.append_to_all_task_jacobian(&output.task_jacobian);
        true
    }

    pub fn convert_momentum_command(
        &mut self,
        index: &JointIndexHandler,
        command: &MomentumCommand,
        output: &mut MotionQPInput,
    ) -> bool {
        let task_size = command.selection.task_size();
        if task_size == 0 {
            return false;
        }
        output.reshape(task_size, index.number_of_dofs());
        Self::assign_weight(
            output,
            &command.selection,
            &command.weight,
            command.hard_constraint,
        );

        let S = command.selection.matrix();
        output.task_jacobian = S * self.centroidal_momentum_handler.centroidal_momentum_matrix();
        output.task_objective = S * DVector::from_column_slice(command.desired_momentum.as_slice());

        self.append_to_all_task_jacobian(&output.task_jacobian);
        true
    }

    /// Shared by the acceleration and velocity jointspace commands
    fn convert_jointspace_command(
        &mut self,
        index: &JointIndexHandler,
        joints: &[JointId],
        desired: &[DVector<Float>],
        weights: &Option<Vec<Float>>,
        hard_constraint: bool,
        output: &mut MotionQPInput,
    ) -> bool {
        if joints.len() != desired.len() {
            panic!(
                "{} joints but {} desired values",
                joints.len(),
                desired.len()
            );
        }
        let task_size: usize = joints.iter().map(|j| index.joint_dof(*j)).sum();
        if task_size == 0 {
            return false;
        }
        output.reshape(task_size, index.number_of_dofs());

        let compact = DMatrix::identity(task_size, task_size);
        if !index.compact_block_to_full_block(joints, &compact, &mut self.full_block) {
            return false;
        }
        output.task_jacobian.copy_from(&self.full_block);

        let weights = weights.as_ref().filter(|_| !hard_constraint);
        if let Some(weights) = weights {
            if weights.len() != joints.len() {
                panic!("{} joints but {} weights", joints.len(), weights.len());
            }
        }

        let mut row = 0;
        let mut diagonal = DVector::zeros(task_size);
        for (i, (joint, values)) in joints.iter().zip(desired.iter()).enumerate() {
            let dof = index.joint_dof(*joint);
            if values.len() != dof {
                panic!(
                    "joint {} has {} DoFs, got {} desired values",
                    joint,
                    dof,
                    values.len()
                );
            }
            output.task_objective.rows_mut(row, dof).copy_from(values);
            if let Some(weights) = weights {
                diagonal.rows_mut(row, dof).fill(weights[i]);
            }
            row += dof;
        }

        match weights {
            Some(_) => output.weight = TaskWeight::Matrix(DMatrix::from_diagonal(&diagonal)),
            None => output.is_motion_constraint = true,
        }

        self.append_to_all_task_jacobian(&output.task_jacobian);
        true
    }

    pub fn convert_jointspace_acceleration_command(
        &mut self,
        index: &JointIndexHandler,
        command: &JointspaceAccelerationCommand,
        output: &mut MotionQPInput,
    ) -> bool {
        self.convert_jointspace_command(
            index,
            &command.joints,
            &command.desired,
            &command.weights,
            command.hard_constraint,
            output,
        )
    }

    pub fn convert_jointspace_velocity_command(
        &mut self,
        index: &JointIndexHandler,
        command: &JointspaceVelocityCommand,
        output: &mut MotionQPInput,
    ) -> bool {
        self.convert_jointspace_command(
            index,
            &command.joints,
            &command.desired,
            &command.weights,
            command.hard_constraint,
            output,
        )
    }

    pub fn compute_privileged_joint_accelerations(
        &mut self,
        model: &dyn RobotModel,
        index: &JointIndexHandler,
        output: &mut MotionQPInput,
    ) -> bool {
        if !self.privileged_configuration_handler.is_enabled() {
            return false;
        }
        let handler = &self.privileged_configuration_handler;
        let joints: Vec<JointId> = handler.joints().keys().cloned().collect();
        let objective: Vec<Float> = joints
            .iter()
            .map(|joint| {
                let state = model.joints()[*joint].one_dof();
                handler.privileged_acceleration(*joint, state.q, state.v)
            })
            .collect();
        self.privileged_task(model, index, &joints, &objective, output)
    }

    pub fn compute_privileged_joint_velocities(
        &mut self,
        model: &dyn RobotModel,
        index: &JointIndexHandler,
        output: &mut MotionQPInput,
    ) -> bool {
        if !self.privileged_configuration_handler.is_enabled() {
            return false;
        }
        let handler = &self.privileged_configuration_handler;
        let joints: Vec<JointId> = handler.joints().keys().cloned().collect();
        let objective: Vec<Float> = joints
            .iter()
            .map(|joint| {
                let state = model.joints()[*joint].one_dof();
                handler.privileged_velocity(*joint, state.q)
            })
            .collect();
        self.privileged_task(model, index, &joints, &objective, output)
    }

    /// One row per privileged joint, selecting the joint and projected into
    /// the nullspace of all tasks converted so far. Joints on a declared
    /// kinematic chain are projected with the chain's own block.
    fn privileged_task(
        &mut self,
        model: &dyn RobotModel,
        index: &JointIndexHandler,
        joints: &[JointId],
        objective: &[Float],
        output: &mut MotionQPInput,
    ) -> bool {
        if joints.is_empty() {
            return false;
        }
        let n = index.number_of_dofs();
        output.reshape(joints.len(), n);
        output.task_objective.copy_from_slice(objective);
        let weights = DVector::from_iterator(
            joints.len(),
            joints
                .iter()
                .map(|j| self.privileged_configuration_handler.weight(*j)),
        );
        output.weight = TaskWeight::Matrix(DMatrix::from_diagonal(&weights));
        output.is_motion_constraint = false;

        let columns: Vec<usize> = joints.iter().map(|j| index.one_dof_joint_index(*j)).collect();
        let mut projected = vec![false; joints.len()];

        let chains = self.privileged_configuration_handler.chains().to_vec();
        for chain in chains.iter() {
            let chain_columns: Vec<usize> = model
                .kinematic_path(&chain.base, &chain.end_effector)
                .iter()
                .filter_map(|joint| index.joint_indices(*joint))
                .flatten()
                .cloned()
                .collect();
            if chain_columns.is_empty() {
                continue;
            }
            let m = chain_columns.len();
            let J_chain = self.all_task_jacobian.select_columns(chain_columns.iter());
            let N = if J_chain.nrows() == 0 {
                DMatrix::identity(m, m)
            } else {
                self.nullspace_calculator
                    .compute_nullspace_projector(&J_chain)
                    .clone()
            };
            for (row, column) in columns.iter().enumerate() {
                if projected[row] {
                    continue;
                }
                if let Some(k) = chain_columns.iter().position(|c| c == column) {
                    for (l, chain_column) in chain_columns.iter().enumerate() {
                        output.task_jacobian[(row, *chain_column)] = N[(k, l)];
                    }
                    projected[row] = true;
                }
            }
        }

        let remaining: Vec<usize> = (0..joints.len()).filter(|row| !projected[*row]).collect();
        if !remaining.is_empty() {
            let mut selection = DMatrix::zeros(remaining.len(), n);
            for (i, row) in remaining.iter().enumerate() {
                selection[(i, columns[*row])] = 1.;
            }
            self.nullspace_calculator
                .project_onto_nullspace(&mut selection, &self.all_task_jacobian);
            for (i, row) in remaining.iter().enumerate() {
                output.task_jacobian.set_row(*row, &selection.row(i));
            }
        }
        true
    }

    /// Per-DoF acceleration bounds in the joint index space. Joints
    /// without finite limits and multi-DoF joints get the absolute maximum.
    pub fn compute_joint_acceleration_limits(
        &self,
        model: &dyn RobotModel,
        index: &JointIndexHandler,
    ) -> (DVector<Float>, DVector<Float>) {
        let abs_max = self.maximum_joint_acceleration;
        self.joint_limits(model, index, abs_max, |q, qd, lower, upper| {
            compute_acceleration_bounds(q, qd, lower, upper, self.control_dt, abs_max)
        })
    }

    pub fn compute_joint_velocity_limits(
        &self,
        model: &dyn RobotModel,
        index: &JointIndexHandler,
    ) -> (DVector<Float>, DVector<Float>) {
        let abs_max = self.maximum_joint_velocity;
        self.joint_limits(model, index, abs_max, |q, _, lower, upper| {
            compute_velocity_bounds(q, lower, upper, self.control_dt, abs_max)
        })
    }

    fn joint_limits<F>(
        &self,
        model: &dyn RobotModel,
        index: &JointIndexHandler,
        abs_max: Float,
        bounds: F,
    ) -> (DVector<Float>, DVector<Float>)
    where
        F: Fn(Float, Float, Float, Float) -> (Float, Float),
    {
        let n = index.number_of_dofs();
        let mut min = DVector::from_element(n, -abs_max);
        let mut max = DVector::from_element(n, abs_max);
        for joint in index.indexed_one_dof_joints() {
            let state = model.joints()[*joint].one_dof();
            if !state.has_finite_limits() {
                continue;
            }
            let (lower, upper) = self.joint_limit_reduction_handler.reduced_limits(
                *joint,
                state.lower_limit,
                state.upper_limit,
            );
            let column = index.one_dof_joint_index(*joint);
            let (lo, hi) = bounds(state.q, state.v, lower, upper);
            min[column] = lo;
            max[column] = hi;
        }
        (min, max)
    }
}
