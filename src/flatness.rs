//! Differential-flatness inversion for a single-thrust-axis vehicle.
//!
//! The desired specific force `a` fixes the desired body z-axis and, through a
//! thrust-extraction policy, the thrust magnitude `u`. Its time derivatives
//! (jerk and snap) then fix the tilt part of the desired angular velocity and
//! acceleration, while the yaw reference and its derivatives fix the part
//! about the body z-axis.
//!
//! ```text
//! z_b   = a / |a|
//! ż_b   = (j − (j·z_b) z_b) / u
//! z̈_b   = (s − 2 (j·z_b) ż_b − (s·z_b + u ż_b·ż_b) z_b) / u
//! ω⊥    = z_b × ż_b
//! α⊥    = z_b × (z̈_b − ω⊥ × ż_b)
//! ω_z   = ẋ_b · y_b
//! α_z   = (ẍ_b − ω × ẋ_b) · y_b
//! ```

use nalgebra::{Matrix3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::ControlError;
use crate::{E1, E2, E3};

/// Norms below this are treated as singular by [`invert_flatness`].
pub const SINGULAR_EPS: f64 = 1e-6;

/// Largest thrust per unit mass [`invert_flatness`] accepts from a policy (m/s²).
pub const MAX_THRUST_ACCEL: f64 = 1e6;

/// Thrust-extraction policy: `(desired specific force, current rotation) -> thrust / mass`.
pub type ThrustFn = fn(&Vector3<f64>, &Rotation3<f64>) -> f64;

/// Projection of the desired specific force onto the current body z-axis.
///
/// Decouples the thrust magnitude from the attitude tracking error: a tilted
/// vehicle asks for less thrust instead of accelerating in the wrong direction.
pub fn thrust_project_z(accel_des: &Vector3<f64>, rot: &Rotation3<f64>) -> f64 {
    accel_des.dot(&rot.transform_vector(&E3))
}

/// Euclidean norm of the desired specific force. Ignores the current attitude.
pub fn thrust_norm_accel(accel_des: &Vector3<f64>, _rot: &Rotation3<f64>) -> f64 {
    accel_des.norm()
}

/// Thrust that keeps the world-z acceleration exact under the current tilt.
///
/// Returns NaN when the body z-axis is within [`SINGULAR_EPS`] of horizontal,
/// where the divisor `(R e3)·e3` vanishes.
pub fn thrust_maintain_z(accel_des: &Vector3<f64>, rot: &Rotation3<f64>) -> f64 {
    let vertical = rot.transform_vector(&E3).dot(&E3);
    if vertical.abs() < SINGULAR_EPS {
        return f64::NAN;
    }
    accel_des.dot(&E3) / vertical
}

/// Serializable selector over the built-in thrust policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrustPolicy {
    #[default]
    ProjectZ,
    NormAccel,
    MaintainZ,
}

impl ThrustPolicy {
    /// The policy function this selector names.
    pub fn as_fn(self) -> ThrustFn {
        match self {
            ThrustPolicy::ProjectZ => thrust_project_z,
            ThrustPolicy::NormAccel => thrust_norm_accel,
            ThrustPolicy::MaintainZ => thrust_maintain_z,
        }
    }
}

fn rotation_from_columns(x_b: Vector3<f64>, y_b: Vector3<f64>, z_b: Vector3<f64>) -> Rotation3<f64> {
    Rotation3::from_matrix_unchecked(Matrix3::from_columns(&[x_b, y_b, z_b]))
}

/// Body frame with z-axis along `z` and ZYX-Euler yaw `yaw`.
///
/// The intermediate axis `y_c = (−sin ψ, cos ψ, 0)` is the body y-axis after
/// the yaw rotation alone. `z` must be non-zero and not parallel to `y_c`.
pub fn rot_from_z_yaw_zyx(z: &Vector3<f64>, yaw: f64) -> Rotation3<f64> {
    let z = z.normalize();

    let y_c = Vector3::new(-yaw.sin(), yaw.cos(), 0.0);
    let x_b = y_c.cross(&z).normalize();
    let y_b = z.cross(&x_b);

    rotation_from_columns(x_b, y_b, z)
}

/// Body frame with z-axis along `z` and ZXY-Euler yaw `yaw`.
///
/// The intermediate axis `x_c = (cos ψ, sin ψ, 0)` is the body x-axis after
/// the yaw rotation alone. `z` must be non-zero and not parallel to `x_c`.
pub fn rot_from_z_yaw_zxy(z: &Vector3<f64>, yaw: f64) -> Rotation3<f64> {
    let z = z.normalize();

    let x_c = Vector3::new(yaw.cos(), yaw.sin(), 0.0);
    let y_b = z.cross(&x_c).normalize();
    let x_b = y_b.cross(&z);

    rotation_from_columns(x_b, y_b, z)
}

/// First and second time derivatives of the body x-axis of a ZYX yaw frame.
///
/// The frame of [`rot_from_z_yaw_zyx`] is pinned by three constraints on
/// `x_b`: `x_b·y_c(ψ) = 0`, `x_b·z_b = 0` and `|x_b| = 1`. Differentiating
/// them once and twice gives the components of `ẋ_b` and `ẍ_b` along
/// `y_c`, `z_b` and `x_b`, which are solved for in the `(x_b, y_b, z_b)` basis.
///
/// Requires `y_b·y_c ≠ 0`, which is the same condition as
/// `z_b ∦ y_c` for the frame construction.
pub fn x_b_derivatives(
    yaw: f64,
    yaw_rate: f64,
    yaw_accel: f64,
    x_b: &Vector3<f64>,
    z_b: &Vector3<f64>,
    z_dot: &Vector3<f64>,
    z_ddot: &Vector3<f64>,
) -> (Vector3<f64>, Vector3<f64>) {
    let (s, c) = yaw.sin_cos();
    let x_c = Vector3::new(c, s, 0.0);
    let y_c = Vector3::new(-s, c, 0.0);
    let y_b = z_b.cross(x_b);

    let yy = y_b.dot(&y_c);
    let zy = z_b.dot(&y_c);

    // ẏ_c = −ψ̇ x_c
    let x_dot_z = -x_b.dot(z_dot);
    let x_dot_yc = yaw_rate * x_b.dot(&x_c);
    let x_dot_y = (x_dot_yc - x_dot_z * zy) / yy;
    let x_dot = y_b * x_dot_y + z_b * x_dot_z;

    // ÿ_c = −ψ̈ x_c − ψ̇² y_c, and x_b·y_c = 0
    let x_ddot_x = -x_dot.norm_squared();
    let x_ddot_z = -2.0 * x_dot.dot(z_dot) - x_b.dot(z_ddot);
    let x_ddot_yc = 2.0 * yaw_rate * x_dot.dot(&x_c) + yaw_accel * x_b.dot(&x_c);
    let x_ddot_y = (x_ddot_yc - x_ddot_z * zy) / yy;
    let x_ddot = x_b * x_ddot_x + y_b * x_ddot_y + z_b * x_ddot_z;

    (x_dot, x_ddot)
}

/// Desired specific force with its first two derivatives and the yaw reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlatnessInput {
    pub accel: Vector3<f64>,
    pub jerk: Vector3<f64>,
    pub snap: Vector3<f64>,
    pub yaw: f64,
    pub yaw_rate: f64,
    pub yaw_accel: f64,
}

/// Attitude-level references recovered by [`invert_flatness`].
///
/// `*_body` vectors are expressed in the *current* body frame, not the
/// desired one, because that is the frame the inner loop compares against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlatnessOutput {
    pub rot_des: Rotation3<f64>,
    /// Thrust per unit mass.
    pub thrust_accel: f64,
    pub z_dot: Vector3<f64>,
    pub z_ddot: Vector3<f64>,
    pub angvel_des_world: Vector3<f64>,
    pub angacc_des_world: Vector3<f64>,
    pub angvel_des_body: Vector3<f64>,
    pub angacc_des_body: Vector3<f64>,
}

/// Inverts the flatness map at one instant.
///
/// # Errors
///
/// * [`ControlError::SingularSpecificForce`] if `|a|` is below [`SINGULAR_EPS`]
/// * [`ControlError::SingularYawFrame`] if `z_b` is parallel to the yaw axis `y_c`
/// * [`ControlError::SingularThrust`] if the policy returns `|u|` below [`SINGULAR_EPS`],
///   above [`MAX_THRUST_ACCEL`], or not finite
pub fn invert_flatness(
    input: &FlatnessInput,
    current: &Rotation3<f64>,
    thrust_fn: ThrustFn,
) -> Result<FlatnessOutput, ControlError> {
    let norm = input.accel.norm();
    if !(norm >= SINGULAR_EPS) {
        return Err(ControlError::SingularSpecificForce { norm });
    }
    let z_b = input.accel / norm;

    let y_c = Vector3::new(-input.yaw.sin(), input.yaw.cos(), 0.0);
    if y_c.cross(&z_b).norm() < SINGULAR_EPS {
        return Err(ControlError::SingularYawFrame);
    }

    let rot_des = rot_from_z_yaw_zyx(&z_b, input.yaw);
    let x_b = rot_des.transform_vector(&E1);
    let y_b = rot_des.transform_vector(&E2);

    let u = thrust_fn(&input.accel, current);
    if !(u.abs() >= SINGULAR_EPS && u.abs() <= MAX_THRUST_ACCEL) {
        return Err(ControlError::SingularThrust { thrust: u });
    }

    let jerk = input.jerk;
    let snap = input.snap;

    let u_dot = jerk.dot(&z_b);
    let z_dot = (jerk - z_b * u_dot) / u;
    let u_ddot = snap.dot(&z_b) + u * z_dot.dot(&z_dot);
    let z_ddot = (snap - z_dot * (2.0 * u_dot) - z_b * u_ddot) / u;

    let angvel_xy_w = z_b.cross(&z_dot);
    // Transport term uses only the tilt part of the angular velocity.
    let angacc_xy_w = z_b.cross(&(z_ddot - angvel_xy_w.cross(&z_dot)));

    let (x_dot, x_ddot) = x_b_derivatives(
        input.yaw,
        input.yaw_rate,
        input.yaw_accel,
        &x_b,
        &z_b,
        &z_dot,
        &z_ddot,
    );

    let omega_z = x_dot.dot(&y_b);
    let angvel_xy_bdes = rot_des.inverse_transform_vector(&angvel_xy_w);
    let angvel_bdes = Vector3::new(angvel_xy_bdes.x, angvel_xy_bdes.y, omega_z);
    let angvel_des_world = rot_des.transform_vector(&angvel_bdes);

    let alpha_z = (x_ddot - angvel_des_world.cross(&x_dot)).dot(&y_b);
    let angacc_xy_bdes = rot_des.inverse_transform_vector(&angacc_xy_w);
    let angacc_bdes = Vector3::new(angacc_xy_bdes.x, angacc_xy_bdes.y, alpha_z);
    let angacc_des_world = rot_des.transform_vector(&angacc_bdes);

    Ok(FlatnessOutput {
        rot_des,
        thrust_accel: u,
        z_dot,
        z_ddot,
        angvel_des_world,
        angacc_des_world,
        angvel_des_body: current.inverse_transform_vector(&angvel_des_world),
        angacc_des_body: current.inverse_transform_vector(&angacc_des_world),
    })
}
