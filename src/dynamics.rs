use fast_ode;
use nalgebra::{Matrix3, Quaternion, Rotation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::SimulationError;

/// Complete rigid-body state of the vehicle at one instant.
///
/// Produced by the simulator (or an estimator) once per tick and consumed
/// read-only by the controllers.
///
/// # Fields
///
/// * `position` - Position in the world frame (m)
/// * `velocity` - Linear velocity in the world frame (m/s)
/// * `orientation` - Body-to-world rotation
/// * `angular_velocity` - Angular velocity expressed in the body frame (rad/s)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VehicleState {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    pub orientation: Rotation3<f64>,
    pub angular_velocity: Vector3<f64>,
}

impl Default for VehicleState {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            orientation: Rotation3::identity(),
            angular_velocity: Vector3::zeros(),
        }
    }
}

impl VehicleState {
    /// A state at rest at `position` with identity attitude.
    pub fn at_rest(position: Vector3<f64>) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Packs the state into the 13-element layout integrated by [`RigidBodyOde`].
    ///
    /// Order: [pos(3), vel(3), quat w/x/y/z (4), angular velocity (3)]
    pub fn to_array(&self) -> [f64; 13] {
        let q = UnitQuaternion::from_rotation_matrix(&self.orientation);
        [
            self.position.x,
            self.position.y,
            self.position.z,
            self.velocity.x,
            self.velocity.y,
            self.velocity.z,
            q.w,
            q.i,
            q.j,
            q.k,
            self.angular_velocity.x,
            self.angular_velocity.y,
            self.angular_velocity.z,
        ]
    }

    /// Rebuilds a state from the layout of [`VehicleState::to_array`].
    ///
    /// The quaternion is normalized here, so integrator drift never reaches
    /// the orientation handed to a controller.
    pub fn from_array(arr: &[f64; 13]) -> Self {
        let q = UnitQuaternion::new_normalize(Quaternion::new(arr[6], arr[7], arr[8], arr[9]));
        VehicleState {
            position: Vector3::new(arr[0], arr[1], arr[2]),
            velocity: Vector3::new(arr[3], arr[4], arr[5]),
            orientation: q.to_rotation_matrix(),
            angular_velocity: Vector3::new(arr[10], arr[11], arr[12]),
        }
    }
}

/// Physical parameters of the vehicle.
///
/// * `mass` - Total mass (kg), strictly positive
/// * `g` - Gravitational acceleration magnitude (m/s²), acting along -z
/// * `inertia` - Body-frame inertia tensor (kg⋅m²), positive definite
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub mass: f64,
    pub g: f64,
    pub inertia: Matrix3<f64>,
}

impl Model {
    /// Validated model.
    ///
    /// # Arguments
    /// * `mass` - Vehicle mass (kg), positive
    /// * `g` - Gravity magnitude (m/s²)
    /// * `inertia` - Body-frame inertia tensor (kg⋅m²), invertible
    pub fn new(mass: f64, g: f64, inertia: Matrix3<f64>) -> Result<Self, SimulationError> {
        let model = Self { mass, g, inertia };
        model.validate()?;
        Ok(model)
    }

    /// Model with a diagonal inertia tensor.
    pub fn diagonal(mass: f64, g: f64, ixx: f64, iyy: f64, izz: f64) -> Result<Self, SimulationError> {
        Self::new(mass, g, Matrix3::from_diagonal(&Vector3::new(ixx, iyy, izz)))
    }

    /// Crazyflie 2.x parameters.
    pub fn crazyflie() -> Self {
        Self {
            mass: 0.027,
            g: 9.81,
            inertia: Matrix3::from_diagonal(&Vector3::new(1.4e-5, 1.4e-5, 2.17e-5)),
        }
    }

    /// Rejects non-positive mass, non-finite gravity and a singular inertia tensor.
    pub fn validate(&self) -> Result<(), SimulationError> {
        if !(self.mass.is_finite() && self.mass > 0.0) {
            return Err(SimulationError::InvalidModel(format!(
                "mass must be positive, got {}",
                self.mass
            )));
        }
        if !self.g.is_finite() {
            return Err(SimulationError::InvalidModel("gravity must be finite".into()));
        }
        if self.inertia.try_inverse().is_none() {
            return Err(SimulationError::InvalidModel("inertia tensor is singular".into()));
        }
        Ok(())
    }

    /// World-frame gravity vector `(0, 0, -g)`.
    pub fn gravity_vector(&self) -> Vector3<f64> {
        Vector3::new(0.0, 0.0, -self.g)
    }
}

/// Collective thrust along body z (N) and body torque (N⋅m).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Command {
    pub thrust: f64,
    pub torque: Vector3<f64>,
}

impl Command {
    pub fn new(thrust: f64, torque: Vector3<f64>) -> Self {
        Self { thrust, torque }
    }

    /// True when thrust and every torque component are finite.
    pub fn is_finite(&self) -> bool {
        self.thrust.is_finite() && self.torque.iter().all(|v| v.is_finite())
    }
}

/// Euler's rotational equation solved for torque: `τ = I·α + ω × (I·ω)`.
///
/// `angular_accel` and `angular_velocity` are body-frame quantities.
pub fn torque_from_aa(
    angular_accel: &Vector3<f64>,
    inertia: &Matrix3<f64>,
    angular_velocity: &Vector3<f64>,
) -> Vector3<f64> {
    inertia * angular_accel + angular_velocity.cross(&(inertia * angular_velocity))
}

/// Rigid-body ODE of a vehicle with one thrust axis and full torque authority.
///
/// The command is held constant over the integration span.
pub struct RigidBodyOde {
    pub model: Model,
    pub inertia_inv: Matrix3<f64>,
    pub command: Command,
}

impl fast_ode::DifferentialEquation<13> for RigidBodyOde {
    /// Evaluates
    ///
    /// ṗ = v
    /// v̇ = (f/m)·R e3 − g e3
    /// q̇ = ½ q ⊗ (0, ω)
    /// ω̇ = I⁻¹ (τ − ω × Iω)
    fn ode_dot_y(&self, _t: f64, y: &fast_ode::Coord<13>) -> (fast_ode::Coord<13>, bool) {
        let s = y.0;

        let vel = Vector3::new(s[3], s[4], s[5]);
        let q = Quaternion::new(s[6], s[7], s[8], s[9]);
        let omega = Vector3::new(s[10], s[11], s[12]);

        let body_z = UnitQuaternion::new_normalize(q).transform_vector(&Vector3::z());
        let accel = body_z * (self.command.thrust / self.model.mass) + self.model.gravity_vector();

        let q_dot = q * Quaternion::from_imag(omega) * 0.5;

        let inertia = self.model.inertia;
        let omega_dot = self.inertia_inv * (self.command.torque - omega.cross(&(inertia * omega)));

        let mut dot_y = [0.0; 13];
        dot_y[0] = vel.x;
        dot_y[1] = vel.y;
        dot_y[2] = vel.z;
        dot_y[3] = accel.x;
        dot_y[4] = accel.y;
        dot_y[5] = accel.z;
        dot_y[6] = q_dot.w;
        dot_y[7] = q_dot.i;
        dot_y[8] = q_dot.j;
        dot_y[9] = q_dot.k;
        dot_y[10] = omega_dot.x;
        dot_y[11] = omega_dot.y;
        dot_y[12] = omega_dot.z;

        let ok = dot_y.iter().all(|v| v.is_finite());
        (fast_ode::Coord(dot_y), ok)
    }
}

/// Integrates the vehicle under a constant command over `time_span`.
///
/// # Arguments
///
/// * `initial_state` - State at `time_span.0`
/// * `model` - Physical parameters
/// * `command` - Thrust/torque held over the span (zero-order hold)
/// * `time_span` - `(t_start, t_end)` in seconds
/// * `tolerance` - Absolute tolerance handed to the adaptive integrator
pub fn simulate_vehicle(
    initial_state: &VehicleState,
    model: &Model,
    command: &Command,
    time_span: (f64, f64),
    tolerance: f64,
) -> Result<VehicleState, SimulationError> {
    let inertia_inv = model
        .inertia
        .try_inverse()
        .ok_or_else(|| SimulationError::InvalidModel("inertia tensor is singular".into()))?;

    let ode = RigidBodyOde {
        model: *model,
        inertia_inv,
        command: *command,
    };

    let initial_coord = fast_ode::Coord(initial_state.to_array());

    let result = fast_ode::solve_ivp(
        &ode,
        time_span,
        initial_coord,
        |_, _| true,
        tolerance,
        tolerance * 10.0,
    );

    match result {
        fast_ode::IvpResult::FinalTimeReached(final_coord) => {
            Ok(VehicleState::from_array(&final_coord.0))
        }
        _ => {
            log::warn!("integration over {:?} did not reach the final time", time_span);
            Err(SimulationError::IntegrationFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn model() -> Model {
        Model::diagonal(1.0, 9.81, 0.1, 0.1, 0.2).unwrap()
    }

    /// Thrust equal to weight keeps the vehicle in place.
    #[test]
    fn test_hover_simulation() {
        let initial_state = VehicleState::at_rest(Vector3::new(0.0, 0.0, 1.0));
        let model = model();
        let command = Command::new(model.mass * model.g, Vector3::zeros());

        let final_state =
            simulate_vehicle(&initial_state, &model, &command, (0.0, 1.0), 1e-6).unwrap();

        assert!((final_state.position.z - 1.0).abs() < 1e-3);
        assert!(final_state.velocity.norm() < 1e-3);
    }

    /// Compares against z = z0 - ½gt².
    #[test]
    fn test_free_fall() {
        let initial_state = VehicleState::at_rest(Vector3::new(0.0, 0.0, 10.0));
        let model = model();
        let command = Command::new(0.0, Vector3::zeros());

        let t = 1.0;
        let final_state =
            simulate_vehicle(&initial_state, &model, &command, (0.0, t), 1e-6).unwrap();

        let expected_z = 10.0 - 0.5 * 9.81 * t * t;
        let expected_vz = -9.81 * t;

        assert!((final_state.position.z - expected_z).abs() < 0.01);
        assert!((final_state.velocity.z - expected_vz).abs() < 0.01);
    }

    #[test]
    fn test_constant_yaw_rate_rotates_about_z() {
        let mut initial_state = VehicleState::default();
        initial_state.angular_velocity = Vector3::new(0.0, 0.0, 0.5);
        let model = model();
        let command = Command::new(model.mass * model.g, Vector3::zeros());

        let final_state =
            simulate_vehicle(&initial_state, &model, &command, (0.0, 1.0), 1e-8).unwrap();

        let expected = Rotation3::from_axis_angle(&Vector3::z_axis(), 0.5);
        assert_relative_eq!(
            *final_state.orientation.matrix(),
            *expected.matrix(),
            epsilon = 1e-4
        );
        assert_relative_eq!(final_state.angular_velocity.z, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_array_layout_preserves_state() {
        let state = VehicleState {
            position: Vector3::new(1.0, 2.0, 3.0),
            velocity: Vector3::new(-1.0, 0.5, 0.0),
            orientation: Rotation3::from_euler_angles(0.1, -0.2, 0.3),
            angular_velocity: Vector3::new(0.01, 0.02, 0.03),
        };
        let back = VehicleState::from_array(&state.to_array());

        assert_relative_eq!(back.position, state.position);
        assert_relative_eq!(back.velocity, state.velocity);
        assert_relative_eq!(
            *back.orientation.matrix(),
            *state.orientation.matrix(),
            epsilon = 1e-12
        );
        assert_relative_eq!(back.angular_velocity, state.angular_velocity);
    }

    #[test]
    fn test_torque_from_aa_includes_gyroscopic_term() {
        let inertia = Matrix3::from_diagonal(&Vector3::new(0.1, 0.2, 0.3));
        let alpha = Vector3::new(1.0, 0.0, 0.0);
        let omega = Vector3::new(0.0, 1.0, 1.0);

        let torque = torque_from_aa(&alpha, &inertia, &omega);

        // I·α = (0.1, 0, 0); ω × Iω = (0,1,1) × (0,0.2,0.3) = (0.1, 0, 0)
        assert_relative_eq!(torque, Vector3::new(0.2, 0.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_model_validation() {
        assert!(Model::diagonal(0.0, 9.81, 0.1, 0.1, 0.2).is_err());
        assert!(Model::diagonal(1.0, 9.81, 0.1, 0.0, 0.2).is_err());
        assert!(Model::crazyflie().validate().is_ok());
    }
}
