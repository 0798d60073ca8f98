use thiserror::Error;

/// Errors raised while evaluating a control law.
///
/// Every variant is produced before any output is packaged, so a failed
/// `response` never leaves a partially computed command behind.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControlError {
    #[error("desired specific force is singular (norm {norm:e})")]
    SingularSpecificForce { norm: f64 },

    #[error("thrust magnitude is singular (u = {thrust:e})")]
    SingularThrust { thrust: f64 },

    #[error("yaw reference axis is parallel to the desired thrust axis")]
    SingularYawFrame,

    #[error("control law produced a non-finite command")]
    NonFinite,
}

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("integration failed")]
    IntegrationFailed,

    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("controller failed: {0}")]
    Control(#[from] ControlError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
