//! Cascaded control corrected by a learned model of the translational
//! acceleration error.
//!
//! The learner predicts the unmodeled acceleration `e(p, v, u)` and its
//! sensitivities `∂e/∂p`, `∂e/∂v`. The prediction is removed from the desired
//! specific force, and its first and second time derivatives along the
//! reference are removed from the desired jerk and snap:
//!
//! ```text
//! ė ≈ ∂e/∂v · a_ref + ∂e/∂p · v_ref
//! ë ≈ ∂e/∂v · j_ref + ∂e/∂p · a_ref
//! ```
//!
//! This treats `e` as depending on time only through position and velocity,
//! with constant sensitivities over the tick.

use nalgebra::{Matrix3, Vector3};

use crate::control::{ControlLaw, Controller, ControllerConfig};
use crate::dynamics::{Command, Model, VehicleState};
use crate::error::ControlError;
use crate::flatness::FlatnessInput;
use crate::reference::Reference;

/// Online model of the acceleration error.
///
/// `control` is the uncorrected desired specific force of the current tick.
pub trait AccelLearner {
    fn testpoint(&self, t: f64, state: &VehicleState, control: &Vector3<f64>) -> Vector3<f64>;
    fn dpos(&self, t: f64, state: &VehicleState, control: &Vector3<f64>) -> Matrix3<f64>;
    fn dvel(&self, t: f64, state: &VehicleState, control: &Vector3<f64>) -> Matrix3<f64>;

    /// Records the command issued at `(t, state)` as a training example.
    fn add_datapoint(&mut self, t: f64, state: &VehicleState, command: &Command);
}

impl<L: AccelLearner + ?Sized> AccelLearner for &mut L {
    fn testpoint(&self, t: f64, state: &VehicleState, control: &Vector3<f64>) -> Vector3<f64> {
        (**self).testpoint(t, state, control)
    }
    fn dpos(&self, t: f64, state: &VehicleState, control: &Vector3<f64>) -> Matrix3<f64> {
        (**self).dpos(t, state, control)
    }
    fn dvel(&self, t: f64, state: &VehicleState, control: &Vector3<f64>) -> Matrix3<f64> {
        (**self).dvel(t, state, control)
    }
    fn add_datapoint(&mut self, t: f64, state: &VehicleState, command: &Command) {
        (**self).add_datapoint(t, state, command)
    }
}

/// One recorded control decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Datapoint {
    pub t: f64,
    pub state: VehicleState,
    pub command: Command,
}

/// Learner that predicts no error. Still records its dataset.
#[derive(Debug, Clone, Default)]
pub struct ZeroLearner {
    datapoints: Vec<Datapoint>,
}

impl ZeroLearner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every datapoint recorded so far, oldest first.
    pub fn datapoints(&self) -> &[Datapoint] {
        &self.datapoints
    }
}

impl AccelLearner for ZeroLearner {
    fn testpoint(&self, _t: f64, _state: &VehicleState, _control: &Vector3<f64>) -> Vector3<f64> {
        Vector3::zeros()
    }
    fn dpos(&self, _t: f64, _state: &VehicleState, _control: &Vector3<f64>) -> Matrix3<f64> {
        Matrix3::zeros()
    }
    fn dvel(&self, _t: f64, _state: &VehicleState, _control: &Vector3<f64>) -> Matrix3<f64> {
        Matrix3::zeros()
    }
    fn add_datapoint(&mut self, t: f64, state: &VehicleState, command: &Command) {
        self.datapoints.push(Datapoint {
            t,
            state: *state,
            command: *command,
        });
    }
}

/// Affine error model `e = bias + Dp·p + Dv·v`.
#[derive(Debug, Clone)]
pub struct LinearLearner {
    pub bias: Vector3<f64>,
    pub dpos: Matrix3<f64>,
    pub dvel: Matrix3<f64>,
    datapoints: Vec<Datapoint>,
}

impl LinearLearner {
    pub fn new(bias: Vector3<f64>, dpos: Matrix3<f64>, dvel: Matrix3<f64>) -> Self {
        Self {
            bias,
            dpos,
            dvel,
            datapoints: Vec::new(),
        }
    }

    /// Every datapoint recorded so far, oldest first.
    pub fn datapoints(&self) -> &[Datapoint] {
        &self.datapoints
    }
}

impl AccelLearner for LinearLearner {
    fn testpoint(&self, _t: f64, state: &VehicleState, _control: &Vector3<f64>) -> Vector3<f64> {
        self.bias + self.dpos * state.position + self.dvel * state.velocity
    }
    fn dpos(&self, _t: f64, _state: &VehicleState, _control: &Vector3<f64>) -> Matrix3<f64> {
        self.dpos
    }
    fn dvel(&self, _t: f64, _state: &VehicleState, _control: &Vector3<f64>) -> Matrix3<f64> {
        self.dvel
    }
    fn add_datapoint(&mut self, t: f64, state: &VehicleState, command: &Command) {
        self.datapoints.push(Datapoint {
            t,
            state: *state,
            command: *command,
        });
    }
}

/// [`crate::CascadedController`] with a learned acceleration correction.
///
/// Every successful `response` hands the issued command to the learner
/// through [`AccelLearner::add_datapoint`]. A response that fails records nothing.
/// The controller is the learner's only writer while it holds it.
pub struct LearningCascadedController<'r, L: AccelLearner> {
    reference: &'r dyn Reference,
    law: ControlLaw,
    learner: L,
}

impl<'r, L: AccelLearner> LearningCascadedController<'r, L> {
    /// Learning controller with the default gains, `thrust_project_z` and the ZYX Euler metric.
    pub fn new(model: Model, reference: &'r dyn Reference, learner: L) -> Self {
        Self::from_config(model, reference, learner, &ControllerConfig::default())
    }

    /// Learning controller configured from `config`.
    ///
    /// # Arguments
    /// * `model` - Vehicle mass, gravity and inertia
    /// * `reference` - Trajectory to track
    /// * `learner` - Correction model, owned or borrowed as `&mut L`
    /// * `config` - Gains and plug-point selectors
    pub fn from_config(
        model: Model,
        reference: &'r dyn Reference,
        learner: L,
        config: &ControllerConfig,
    ) -> Self {
        log::debug!(
            "learning cascaded controller: mass = {}, thrust policy = {:?}, metric = {:?}",
            model.mass,
            config.thrust_policy,
            config.rotation_metric
        );
        Self {
            reference,
            law: ControlLaw::new(model, config),
            learner,
        }
    }

    /// Switches to a new trajectory. The learner keeps its datapoints.
    pub fn set_reference(&mut self, reference: &'r dyn Reference) {
        self.reference = reference;
    }

    /// The shared control law, for inspection.
    pub fn law(&self) -> &ControlLaw {
        &self.law
    }

    pub fn learner(&self) -> &L {
        &self.learner
    }

    /// Mutable access to the learner, e.g. to refit it between runs.
    pub fn learner_mut(&mut self) -> &mut L {
        &mut self.learner
    }

    /// Consumes the controller and returns the learner with its datapoints.
    pub fn into_learner(self) -> L {
        self.learner
    }

    /// Specific force, jerk and snap after the learned correction. No side effects.
    pub fn corrected_input(&self, t: f64, state: &VehicleState) -> FlatnessInput {
        let sample = self.reference.sample(t);
        let accel = self.law.specific_force(state, &sample);

        let acc_error = self.learner.testpoint(t, state, &accel);
        let dpos = self.learner.dpos(t, state, &accel);
        let dvel = self.learner.dvel(t, state, &accel);

        let err_d1 = dvel * sample.acc + dpos * sample.vel;
        let err_d2 = dvel * sample.jerk + dpos * sample.acc;

        log::trace!("learned acceleration error {:?}", acc_error.as_slice());

        FlatnessInput {
            accel: accel - acc_error,
            jerk: sample.jerk - err_d1,
            snap: sample.snap - err_d2,
            yaw: sample.yaw,
            yaw_rate: sample.yawvel,
            yaw_accel: sample.yawacc,
        }
    }
}

impl<L: AccelLearner> Controller for LearningCascadedController<'_, L> {
    fn response(&mut self, t: f64, state: &VehicleState) -> Result<Command, ControlError> {
        let input = self.corrected_input(t, state);

        let (command, _) = self.law.command(state, &input).map_err(|e| {
            log::warn!("t = {:.3}: {}", t, e);
            e
        })?;

        self.learner.add_datapoint(t, state, &command);

        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{run_closed_loop, CascadedController};
    use crate::reference::{CircleReference, ConstantReference};
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;

    fn unit_model() -> Model {
        Model::diagonal(1.0, 9.81, 0.01, 0.01, 0.02).unwrap()
    }

    fn perturbed_states() -> Vec<VehicleState> {
        vec![
            VehicleState::default(),
            VehicleState {
                position: Vector3::new(1.2, -0.4, 0.9),
                velocity: Vector3::new(0.3, 0.8, -0.1),
                orientation: Rotation3::from_euler_angles(0.1, -0.05, 0.4),
                angular_velocity: Vector3::new(0.2, -0.1, 0.05),
            },
        ]
    }

    #[test]
    fn test_zero_learner_matches_base_controller() {
        let reference = CircleReference::new(Vector3::new(0.0, 0.0, 1.0), 1.0, 0.7).with_yaw(0.2, 0.3);
        let mut base = CascadedController::new(unit_model(), &reference);
        let mut learning = LearningCascadedController::new(unit_model(), &reference, ZeroLearner::new());

        for (k, state) in perturbed_states().iter().enumerate() {
            let t = 0.5 + k as f64;
            let expected = base.response(t, state).unwrap();
            let actual = learning.response(t, state).unwrap();

            assert_relative_eq!(actual.thrust, expected.thrust, epsilon = 1e-12);
            assert_relative_eq!(actual.torque, expected.torque, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_one_datapoint_per_response() {
        let reference = ConstantReference::origin();
        let mut learner = ZeroLearner::new();
        let states = perturbed_states();

        {
            let mut controller = LearningCascadedController::new(unit_model(), &reference, &mut learner);
            for (k, state) in states.iter().enumerate() {
                controller.response(k as f64 * 0.01, state).unwrap();
                assert_eq!(controller.learner().datapoints().len(), k + 1);
            }
        }

        assert_eq!(learner.datapoints().len(), states.len());
        for (k, (point, state)) in learner.datapoints().iter().zip(states.iter()).enumerate() {
            assert_eq!(point.t, k as f64 * 0.01);
            assert_eq!(point.state, *state);
        }
    }

    #[test]
    fn test_recorded_command_matches_response() {
        let reference = ConstantReference::new(Vector3::new(0.0, 0.0, 1.0), 0.2);
        let mut controller = LearningCascadedController::new(unit_model(), &reference, ZeroLearner::new());

        let state = perturbed_states()[1];
        let command = controller.response(2.0, &state).unwrap();

        let learner = controller.into_learner();
        assert_eq!(learner.datapoints()[0].command, command);
    }

    #[test]
    fn test_failed_response_records_nothing() {
        let reference = ConstantReference::origin();
        // A learned error equal to gravity cancels the specific force.
        let learner = LinearLearner::new(Vector3::new(0.0, 0.0, 9.81), Matrix3::zeros(), Matrix3::zeros());
        let mut controller = LearningCascadedController::new(unit_model(), &reference, learner);

        let result = controller.response(0.0, &VehicleState::default());

        assert!(matches!(result, Err(ControlError::SingularSpecificForce { .. })));
        assert!(controller.learner().datapoints().is_empty());
    }

    #[test]
    fn test_bias_is_removed_from_specific_force() {
        let reference = ConstantReference::origin();
        let learner = LinearLearner::new(Vector3::new(0.0, 0.0, 1.0), Matrix3::zeros(), Matrix3::zeros());
        let mut controller = LearningCascadedController::new(unit_model(), &reference, learner);

        let command = controller.response(0.0, &VehicleState::default()).unwrap();

        assert_relative_eq!(command.thrust, 8.81, epsilon = 1e-12);
        assert_relative_eq!(command.torque, Vector3::zeros(), epsilon = 1e-12);
    }

    #[test]
    fn test_sensitivities_correct_jerk_and_snap() {
        let reference = CircleReference::new(Vector3::zeros(), 2.0, 0.5);
        let dpos = Matrix3::from_diagonal(&Vector3::new(0.1, 0.2, 0.3));
        let dvel = Matrix3::from_diagonal(&Vector3::new(-0.4, 0.5, 0.6));
        let learner = LinearLearner::new(Vector3::zeros(), dpos, dvel);
        let controller = LearningCascadedController::new(unit_model(), &reference, learner);

        let t = 1.1;
        let state = VehicleState::at_rest(reference.pos(t));
        let input = controller.corrected_input(t, &state);

        let expected_jerk = reference.jerk(t) - (dvel * reference.acc(t) + dpos * reference.vel(t));
        let expected_snap = reference.snap(t) - (dvel * reference.jerk(t) + dpos * reference.acc(t));
        assert_relative_eq!(input.jerk, expected_jerk, epsilon = 1e-12);
        assert_relative_eq!(input.snap, expected_snap, epsilon = 1e-12);

        let base = CascadedController::new(unit_model(), &reference);
        let base_accel = base.law().specific_force(&state, &reference.sample(t));
        let error = dpos * state.position;
        assert_relative_eq!(input.accel, base_accel - error, epsilon = 1e-12);
    }

    /// A constant disturbance the learner knows about is cancelled in closed loop.
    #[test]
    fn test_learned_bias_compensates_disturbance_in_closed_loop() {
        struct Disturbed<'a, C: Controller> {
            inner: C,
            model: &'a Model,
            disturbance: Vector3<f64>,
        }
        impl<C: Controller> Controller for Disturbed<'_, C> {
            fn response(&mut self, t: f64, state: &VehicleState) -> Result<Command, ControlError> {
                // Unmodeled extra thrust: the disturbance's component along body z.
                let mut command = self.inner.response(t, state)?;
                let body_z = state.orientation.transform_vector(&Vector3::z());
                command.thrust += self.model.mass * self.disturbance.dot(&body_z);
                Ok(command)
            }
        }

        let model = unit_model();
        let reference = ConstantReference::new(Vector3::new(0.0, 0.0, 1.0), 0.0);
        let disturbance = Vector3::new(0.0, 0.0, 2.0);
        let learner = LinearLearner::new(disturbance, Matrix3::zeros(), Matrix3::zeros());
        let mut controller = Disturbed {
            inner: LearningCascadedController::new(model, &reference, learner),
            model: &model,
            disturbance,
        };

        let initial = VehicleState::at_rest(Vector3::new(0.0, 0.0, 1.0));
        let final_state =
            run_closed_loop(&mut controller, &model, &initial, (0.0, 3.0), 0.005, |_, _, _| {})
                .unwrap();

        assert!((final_state.position - reference.position).norm() < 1e-6);
        assert_eq!(controller.inner.learner().datapoints().len(), 600);
    }
}
