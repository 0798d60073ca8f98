use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Time-indexed reference trajectory.
///
/// Implementations must return derivatives that are consistent with each
/// other up to snap; the controllers do not check this.
pub trait Reference {
    fn pos(&self, t: f64) -> Vector3<f64>;
    fn vel(&self, t: f64) -> Vector3<f64>;
    fn acc(&self, t: f64) -> Vector3<f64>;
    fn jerk(&self, t: f64) -> Vector3<f64>;
    fn snap(&self, t: f64) -> Vector3<f64>;
    fn yaw(&self, t: f64) -> f64;
    fn yawvel(&self, t: f64) -> f64;
    fn yawacc(&self, t: f64) -> f64;

    /// Samples every quantity at `t`.
    fn sample(&self, t: f64) -> ReferenceSample {
        ReferenceSample {
            pos: self.pos(t),
            vel: self.vel(t),
            acc: self.acc(t),
            jerk: self.jerk(t),
            snap: self.snap(t),
            yaw: self.yaw(t),
            yawvel: self.yawvel(t),
            yawacc: self.yawacc(t),
        }
    }
}

/// All reference quantities at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceSample {
    pub pos: Vector3<f64>,
    pub vel: Vector3<f64>,
    pub acc: Vector3<f64>,
    pub jerk: Vector3<f64>,
    pub snap: Vector3<f64>,
    pub yaw: f64,
    pub yawvel: f64,
    pub yawacc: f64,
}

/// Fixed position and yaw with all derivatives zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConstantReference {
    pub position: Vector3<f64>,
    pub yaw: f64,
}

impl ConstantReference {
    pub fn new(position: Vector3<f64>, yaw: f64) -> Self {
        Self { position, yaw }
    }

    pub fn origin() -> Self {
        Self::new(Vector3::zeros(), 0.0)
    }
}

impl Reference for ConstantReference {
    fn pos(&self, _t: f64) -> Vector3<f64> {
        self.position
    }
    fn vel(&self, _t: f64) -> Vector3<f64> {
        Vector3::zeros()
    }
    fn acc(&self, _t: f64) -> Vector3<f64> {
        Vector3::zeros()
    }
    fn jerk(&self, _t: f64) -> Vector3<f64> {
        Vector3::zeros()
    }
    fn snap(&self, _t: f64) -> Vector3<f64> {
        Vector3::zeros()
    }
    fn yaw(&self, _t: f64) -> f64 {
        self.yaw
    }
    fn yawvel(&self, _t: f64) -> f64 {
        0.0
    }
    fn yawacc(&self, _t: f64) -> f64 {
        0.0
    }
}

/// Horizontal circle at constant angular rate, with yaw turning at a constant rate.
///
/// `p(t) = center + radius·(cos ωt, sin ωt, 0)`, `ψ(t) = yaw0 + yaw_rate·t`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircleReference {
    pub center: Vector3<f64>,
    pub radius: f64,
    /// Angular rate around the circle (rad/s)
    pub omega: f64,
    pub yaw0: f64,
    pub yaw_rate: f64,
}

impl CircleReference {
    pub fn new(center: Vector3<f64>, radius: f64, omega: f64) -> Self {
        Self {
            center,
            radius,
            omega,
            yaw0: 0.0,
            yaw_rate: 0.0,
        }
    }

    pub fn with_yaw(mut self, yaw0: f64, yaw_rate: f64) -> Self {
        self.yaw0 = yaw0;
        self.yaw_rate = yaw_rate;
        self
    }

    /// `k`-th derivative of the planar offset: `r·ω^k·(cos(ωt + kπ/2), sin(ωt + kπ/2), 0)`.
    fn offset_derivative(&self, t: f64, k: i32) -> Vector3<f64> {
        let phase = self.omega * t + k as f64 * std::f64::consts::FRAC_PI_2;
        let scale = self.radius * self.omega.powi(k);
        Vector3::new(scale * phase.cos(), scale * phase.sin(), 0.0)
    }
}

impl Reference for CircleReference {
    fn pos(&self, t: f64) -> Vector3<f64> {
        self.center + self.offset_derivative(t, 0)
    }
    fn vel(&self, t: f64) -> Vector3<f64> {
        self.offset_derivative(t, 1)
    }
    fn acc(&self, t: f64) -> Vector3<f64> {
        self.offset_derivative(t, 2)
    }
    fn jerk(&self, t: f64) -> Vector3<f64> {
        self.offset_derivative(t, 3)
    }
    fn snap(&self, t: f64) -> Vector3<f64> {
        self.offset_derivative(t, 4)
    }
    fn yaw(&self, t: f64) -> f64 {
        self.yaw0 + self.yaw_rate * t
    }
    fn yawvel(&self, _t: f64) -> f64 {
        self.yaw_rate
    }
    fn yawacc(&self, _t: f64) -> f64 {
        0.0
    }
}
