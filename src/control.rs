use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::dynamics::{simulate_vehicle, torque_from_aa, Command, Model, VehicleState};
use crate::error::{ConfigError, ControlError, SimulationError};
use crate::flatness::{invert_flatness, FlatnessInput, FlatnessOutput, ThrustFn, ThrustPolicy};
use crate::reference::{Reference, ReferenceSample};
use crate::rot_metrics::{RotationMetricFn, RotationMetricKind};

/// Diagonal gains of the cascaded loops.
///
/// Each vector holds the diagonal of a 3×3 gain matrix. The attitude and
/// rate loops use softer gains on the yaw axis.
///
/// * `kpos` - Position error to acceleration (1/s²)
/// * `kvel` - Velocity error to acceleration (1/s)
/// * `krot` - Attitude error to angular acceleration (1/s²)
/// * `kang` - Body-rate error to angular acceleration (1/s)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Gains {
    pub kpos: Vector3<f64>,
    pub kvel: Vector3<f64>,
    pub krot: Vector3<f64>,
    pub kang: Vector3<f64>,
}

impl Default for Gains {
    fn default() -> Self {
        Self {
            kpos: Vector3::repeat(6.0),
            kvel: Vector3::repeat(4.0),
            krot: Vector3::new(120.0, 120.0, 30.0),
            kang: Vector3::new(16.0, 16.0, 10.0),
        }
    }
}

impl Gains {
    /// Checks that every gain is finite and non-negative.
    ///
    /// # Returns
    /// * `Err(ConfigError::Invalid)` naming the first offending gain
    pub fn validate(&self) -> Result<(), ConfigError> {
        let named = [
            ("kpos", &self.kpos),
            ("kvel", &self.kvel),
            ("krot", &self.krot),
            ("kang", &self.kang),
        ];
        for (name, gain) in named.iter() {
            if gain.iter().any(|k| !k.is_finite() || *k < 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be finite and non-negative, got {:?}",
                    name,
                    gain.as_slice()
                )));
            }
        }
        Ok(())
    }
}

/// Everything about a cascaded controller that is not the vehicle model.
///
/// ```toml
/// thrust_policy = "project_z"
/// rotation_metric = "euler_zyx"
///
/// [gains]
/// kpos = [6.0, 6.0, 6.0]
/// kvel = [4.0, 4.0, 4.0]
/// krot = [120.0, 120.0, 30.0]
/// kang = [16.0, 16.0, 10.0]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub gains: Gains,
    pub thrust_policy: ThrustPolicy,
    pub rotation_metric: RotationMetricKind,
}

impl ControllerConfig {
    /// Parses and validates a TOML controller config. Missing keys take their defaults.
    ///
    /// # Arguments
    /// * `s` - TOML document
    ///
    /// # Returns
    /// * `Err(ConfigError::Parse)` on malformed TOML or unknown enum values
    /// * `Err(ConfigError::Invalid)` on out-of-range gains
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the gains; the selectors are valid by construction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.gains.validate()
    }
}

/// A controller evaluated once per control tick.
pub trait Controller {
    /// Command for time `t` given the measured state.
    fn response(&mut self, t: f64, state: &VehicleState) -> Result<Command, ControlError>;
}

/// The cascaded control law shared by every controller variant.
///
/// Holds only immutable parameters; both stages are pure functions of
/// their arguments.
#[derive(Debug, Clone, Copy)]
pub struct ControlLaw {
    pub model: Model,
    pub gains: Gains,
    pub rot_metric: RotationMetricFn,
    pub thrust_fn: ThrustFn,
}

impl ControlLaw {
    /// Resolves the config's policy and metric selectors into function pointers.
    pub fn new(model: Model, config: &ControllerConfig) -> Self {
        Self {
            model,
            gains: config.gains,
            rot_metric: config.rotation_metric.as_fn(),
            thrust_fn: config.thrust_policy.as_fn(),
        }
    }

    /// Position loop: desired specific force
    ///
    /// a_des = −Kpos (p − p_ref) − Kvel (v − v_ref) − g_vec + a_ref
    pub fn specific_force(&self, state: &VehicleState, sample: &ReferenceSample) -> Vector3<f64> {
        let pos_error = state.position - sample.pos;
        let vel_error = state.velocity - sample.vel;

        -self.gains.kpos.component_mul(&pos_error) - self.gains.kvel.component_mul(&vel_error)
            - self.model.gravity_vector()
            + sample.acc
    }

    /// Flatness inversion followed by the attitude loop.
    ///
    /// `input` carries the (possibly corrected) specific force, jerk and snap.
    pub fn command(
        &self,
        state: &VehicleState,
        input: &FlatnessInput,
    ) -> Result<(Command, FlatnessOutput), ControlError> {
        let flat = invert_flatness(input, &state.orientation, self.thrust_fn)?;

        let rot_error = (self.rot_metric)(&state.orientation, &flat.rot_des);
        let angaccel = -self.gains.krot.component_mul(&rot_error)
            - self.gains.kang.component_mul(&(state.angular_velocity - flat.angvel_des_body))
            + flat.angacc_des_body;

        let thrust = self.model.mass * flat.thrust_accel;
        let torque = torque_from_aa(&angaccel, &self.model.inertia, &state.angular_velocity);
        let command = Command::new(thrust, torque);

        if !command.is_finite() {
            return Err(ControlError::NonFinite);
        }

        log::trace!(
            "u = {:.4}, rot_error = {:?}, angaccel = {:?}",
            flat.thrust_accel,
            rot_error.as_slice(),
            angaccel.as_slice()
        );

        Ok((command, flat))
    }
}

/// Cascaded geometric controller with flatness-based feedforward.
///
/// # Control Architecture
///
/// Reference (p, v, a, j, s, ψ, ψ̇, ψ̈) → Position Loop → Desired Specific Force
///                                                     ↓
///                    Flatness Inversion → R_des, ω_des, α_des
///                                                     ↓
///                    Attitude Loop → Angular Acceleration → τ = Iα + ω×Iω
pub struct CascadedController<'r> {
    reference: &'r dyn Reference,
    law: ControlLaw,
}

impl<'r> CascadedController<'r> {
    /// Controller with the default gains, `thrust_project_z` and the ZYX Euler metric.
    pub fn new(model: Model, reference: &'r dyn Reference) -> Self {
        Self::from_config(model, reference, &ControllerConfig::default())
    }

    /// Controller with gains, thrust policy and metric taken from `config`.
    ///
    /// # Arguments
    /// * `model` - Vehicle mass, gravity and inertia
    /// * `reference` - Trajectory to track, borrowed for the controller's lifetime
    /// * `config` - Gains and plug-point selectors
    pub fn from_config(model: Model, reference: &'r dyn Reference, config: &ControllerConfig) -> Self {
        log::debug!(
            "cascaded controller: mass = {}, thrust policy = {:?}, metric = {:?}",
            model.mass,
            config.thrust_policy,
            config.rotation_metric
        );
        Self {
            reference,
            law: ControlLaw::new(model, config),
        }
    }

    /// Replaces the attitude-error metric, e.g. with a custom function.
    pub fn with_rot_metric(mut self, rot_metric: RotationMetricFn) -> Self {
        self.law.rot_metric = rot_metric;
        self
    }

    /// Replaces the thrust-extraction policy.
    pub fn with_thrust_fn(mut self, thrust_fn: ThrustFn) -> Self {
        self.law.thrust_fn = thrust_fn;
        self
    }

    /// Switches to a new trajectory. Gains and plug points are kept.
    pub fn set_reference(&mut self, reference: &'r dyn Reference) {
        self.reference = reference;
    }

    /// The shared control law, for inspection.
    pub fn law(&self) -> &ControlLaw {
        &self.law
    }

    /// Like [`Controller::response`], also returning the flatness outputs.
    pub fn evaluate(
        &self,
        t: f64,
        state: &VehicleState,
    ) -> Result<(Command, FlatnessOutput), ControlError> {
        let sample = self.reference.sample(t);
        let accel = self.law.specific_force(state, &sample);

        let input = FlatnessInput {
            accel,
            jerk: sample.jerk,
            snap: sample.snap,
            yaw: sample.yaw,
            yaw_rate: sample.yawvel,
            yaw_accel: sample.yawacc,
        };

        self.law.command(state, &input).map_err(|e| {
            log::warn!("t = {:.3}: {}", t, e);
            e
        })
    }
}

impl Controller for CascadedController<'_> {
    fn response(&mut self, t: f64, state: &VehicleState) -> Result<Command, ControlError> {
        self.evaluate(t, state).map(|(command, _)| command)
    }
}

/// Runs `controller` in closed loop with [`simulate_vehicle`].
///
/// The command is recomputed every `dt` seconds and held in between.
/// `observer` sees each tick's time, state and command before integration.
pub fn run_closed_loop<C, F>(
    controller: &mut C,
    model: &Model,
    initial_state: &VehicleState,
    time_span: (f64, f64),
    dt: f64,
    mut observer: F,
) -> Result<VehicleState, SimulationError>
where
    C: Controller + ?Sized,
    F: FnMut(f64, &VehicleState, &Command),
{
    if !(dt > 0.0) {
        return Err(SimulationError::InvalidModel(format!("dt must be positive, got {}", dt)));
    }

    let (t0, t1) = time_span;
    // Absorbs rounding in (t1 - t0) / dt so an exact multiple does not add a sliver step.
    let steps = ((t1 - t0) / dt - 1e-9).ceil().max(0.0) as usize;

    let mut state = *initial_state;
    for k in 0..steps {
        let t = t0 + k as f64 * dt;
        let t_next = (t0 + (k + 1) as f64 * dt).min(t1);
        let command = controller.response(t, &state)?;
        observer(t, &state, &command);
        state = simulate_vehicle(&state, model, &command, (t, t_next), 1e-8)?;
    }
    Ok(state)
}
