//! Attitude error metrics.
//!
//! Each metric maps `(current, desired)` to a 3-vector that is zero when the
//! rotations coincide and, to first order, equals the small body-frame rotation
//! taking the desired attitude to the current one: `R = R_des · exp([e]×)`.

use nalgebra::{Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// `(current rotation, desired rotation) -> attitude error`.
pub type RotationMetricFn = fn(&Rotation3<f64>, &Rotation3<f64>) -> Vector3<f64>;

fn error_rotation(rot: &Rotation3<f64>, rot_des: &Rotation3<f64>) -> Rotation3<f64> {
    rot_des.inverse() * rot
}

/// ZYX Euler angles of `R_desᵀ R`, returned as `(roll, pitch, yaw)`.
pub fn euler_zyx(rot: &Rotation3<f64>, rot_des: &Rotation3<f64>) -> Vector3<f64> {
    let (roll, pitch, yaw) = error_rotation(rot, rot_des).euler_angles();
    Vector3::new(roll, pitch, yaw)
}

/// Rotation vector (axis × angle) of `R_desᵀ R`.
pub fn so3_log(rot: &Rotation3<f64>, rot_des: &Rotation3<f64>) -> Vector3<f64> {
    error_rotation(rot, rot_des).scaled_axis()
}

/// `½ (R_desᵀ R − Rᵀ R_des)^∨`, the geometric SO(3) error.
pub fn vee(rot: &Rotation3<f64>, rot_des: &Rotation3<f64>) -> Vector3<f64> {
    let e = error_rotation(rot, rot_des);
    let m = e.matrix() - e.matrix().transpose();
    Vector3::new(m[(2, 1)], m[(0, 2)], m[(1, 0)]) * 0.5
}

/// Serializable selector over the built-in metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationMetricKind {
    #[default]
    EulerZyx,
    So3Log,
    Vee,
}

impl RotationMetricKind {
    /// The metric function this selector names.
    pub fn as_fn(self) -> RotationMetricFn {
        match self {
            RotationMetricKind::EulerZyx => euler_zyx,
            RotationMetricKind::So3Log => so3_log,
            RotationMetricKind::Vee => vee,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const METRICS: [RotationMetricKind; 3] = [
        RotationMetricKind::EulerZyx,
        RotationMetricKind::So3Log,
        RotationMetricKind::Vee,
    ];

    #[test]
    fn test_aligned_rotations_have_zero_error() {
        let rot = Rotation3::from_euler_angles(0.3, -0.2, 2.0);
        for kind in METRICS.iter() {
            assert_relative_eq!(kind.as_fn()(&rot, &rot), Vector3::zeros(), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_metrics_agree_for_small_errors() {
        let rot_des = Rotation3::from_euler_angles(0.1, 0.2, -1.0);
        let delta = Vector3::new(1e-4, -2e-4, 3e-4);
        let rot = rot_des * Rotation3::new(delta);

        for kind in METRICS.iter() {
            assert_relative_eq!(kind.as_fn()(&rot, &rot_des), delta, epsilon = 1e-7);
        }
    }

    #[test]
    fn test_yaw_lag_gives_negative_yaw_error() {
        let rot = Rotation3::identity();
        let rot_des = Rotation3::from_axis_angle(&Vector3::z_axis(), 0.5);

        assert_relative_eq!(euler_zyx(&rot, &rot_des), Vector3::new(0.0, 0.0, -0.5), epsilon = 1e-12);
        assert_relative_eq!(so3_log(&rot, &rot_des), Vector3::new(0.0, 0.0, -0.5), epsilon = 1e-12);
        assert_relative_eq!(
            vee(&rot, &rot_des),
            Vector3::new(0.0, 0.0, -(0.5_f64.sin())),
            epsilon = 1e-12
        );
    }
}
