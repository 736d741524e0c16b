//! Structured logging initialisation
//!
//! Builds a `tracing-subscriber` registry with an `EnvFilter` and either JSON
//! or human readable output.

use crate::error::PlatformError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(PlatformError::Configuration {
                message: format!("Unknown log format '{}'", other),
                key: Some("BLOG_PLATFORM_LOG_FORMAT".to_string()),
            }),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name attached to the startup line
    pub service_name: String,
    /// Default filter directive when `RUST_LOG` is unset
    pub default_filter: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "blog-platform".to_string(),
            default_filter: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl LogConfig {
    /// Read `SERVICE_NAME` and `BLOG_PLATFORM_LOG_FORMAT` from the environment
    pub fn from_env(service_name: &str) -> Result<Self, PlatformError> {
        let format = match std::env::var("BLOG_PLATFORM_LOG_FORMAT") {
            Ok(value) => value.parse()?,
            Err(_) => LogFormat::Json,
        };

        Ok(Self {
            service_name: std::env::var("SERVICE_NAME")
                .unwrap_or_else(|_| service_name.to_string()),
            format,
            ..Default::default()
        })
    }
}

/// Install the global tracing subscriber
///
/// Must be called once at startup.
pub fn init_tracing(config: &LogConfig) -> Result<(), PlatformError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_filter.as_str()));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match config.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .try_init(),
    };
    result.map_err(|e| PlatformError::Telemetry(e.to_string()))?;

    tracing::info!(
        service_name = %config.service_name,
        format = ?config.format,
        "Logging initialized"
    );

    Ok(())
}
