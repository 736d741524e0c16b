//! Error types shared across Blog Platform services

use thiserror::Error;

/// Common error type for Blog Platform crates
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        key: Option<String>,
    },

    #[error("Telemetry error: {0}")]
    Telemetry(String),
}

impl PlatformError {
    /// Environment key a configuration error refers to, if any
    pub fn config_key(&self) -> Option<&str> {
        match self {
            Self::Configuration { key, .. } => key.as_deref(),
            _ => None,
        }
    }
}
