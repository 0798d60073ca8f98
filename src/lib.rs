//! # uav_cascade
//!
//! Geometric cascaded flight controller for quadrotor-class vehicles (one
//! collective thrust axis, full torque authority).
//!
//! A reference trajectory given up to snap, plus yaw and its first two
//! derivatives, is inverted through the vehicle's differential-flatness map
//! into a desired attitude, body rate and body angular acceleration. Nested
//! position and attitude loops close the feedback around that feedforward.
//!
//! - [`flatness`]: thrust-extraction policies, yaw frame construction and
//!   the flatness inversion
//! - [`control`]: the cascaded controller and its gains/config
//! - [`learning`]: the variant corrected by a learned acceleration error
//! - [`rot_metrics`]: attitude error metrics
//! - [`reference`]: reference trajectory oracles
//! - [`dynamics`]: vehicle model, state, command and a rigid-body simulator

pub mod control;
pub mod dynamics;
pub mod error;
pub mod flatness;
pub mod learning;
pub mod reference;
pub mod rot_metrics;

use nalgebra::Vector3;

pub use control::{CascadedController, Controller, ControllerConfig, Gains};
pub use dynamics::{simulate_vehicle, torque_from_aa, Command, Model, VehicleState};
pub use error::{ConfigError, ControlError, SimulationError};
pub use learning::{AccelLearner, LearningCascadedController};
pub use reference::Reference;

/// World/body x basis vector.
pub const E1: Vector3<f64> = Vector3::new(1.0, 0.0, 0.0);
/// World/body y basis vector.
pub const E2: Vector3<f64> = Vector3::new(0.0, 1.0, 0.0);
/// World/body z basis vector.
pub const E3: Vector3<f64> = Vector3::new(0.0, 0.0, 1.0);
