//! Shared configuration loader for Blog Platform services
//!
//! All configuration is read from environment variables carrying the
//! `BLOG_PLATFORM_` prefix, with an optional `.env` file loaded first.
//! Override hierarchy: defaults < .env < environment.
//!
//! # Example
//!
//! ```no_run
//! use blog_platform_core::config::{load_dotenv, ConfigLoader, DatabaseConfig, RedisConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! load_dotenv();
//!
//! let db_config = DatabaseConfig::from_env()?;
//! let redis_config = RedisConfig::from_env()?;
//!
//! db_config.validate()?;
//! redis_config.validate()?;
//! # Ok(())
//! # }
//! ```

use crate::error::PlatformError;
use std::time::Duration;
use url::Url;

/// Configuration loader trait
///
/// Provides standardized methods for loading and validating configuration from
/// environment variables.
pub trait ConfigLoader: Sized {
    /// Load configuration from environment variables, using defaults for
    /// missing optional values.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if a required variable is missing or a
    /// value cannot be parsed.
    fn from_env() -> Result<Self, PlatformError>;

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if any validation check fails.
    fn validate(&self) -> Result<(), PlatformError>;
}

/// PostgreSQL connection settings
///
/// # Environment Variables
///
/// - `BLOG_PLATFORM_DATABASE_URL` (required, falls back to `DATABASE_URL`)
/// - `BLOG_PLATFORM_DATABASE_MAX_CONNECTIONS` (default: 20)
/// - `BLOG_PLATFORM_DATABASE_MIN_CONNECTIONS` (default: 2)
/// - `BLOG_PLATFORM_DATABASE_CONNECT_TIMEOUT` seconds (default: 30)
/// - `BLOG_PLATFORM_DATABASE_IDLE_TIMEOUT` seconds (default: 600)
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    pub min_connections: u32,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Idle connection timeout duration
    pub idle_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/blog_platform".to_string(),
            max_connections: 20,
            min_connections: 2,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl ConfigLoader for DatabaseConfig {
    fn from_env() -> Result<Self, PlatformError> {
        let url = std::env::var("BLOG_PLATFORM_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .map_err(|_| PlatformError::Configuration {
                message: "DATABASE_URL or BLOG_PLATFORM_DATABASE_URL must be set".to_string(),
                key: Some("BLOG_PLATFORM_DATABASE_URL".to_string()),
            })?;

        let defaults = DatabaseConfig::default();
        let max_connections =
            parse_env_var("BLOG_PLATFORM_DATABASE_MAX_CONNECTIONS", defaults.max_connections)?;
        let min_connections =
            parse_env_var("BLOG_PLATFORM_DATABASE_MIN_CONNECTIONS", defaults.min_connections)?;
        let connect_timeout_secs = parse_env_var("BLOG_PLATFORM_DATABASE_CONNECT_TIMEOUT", 30u64)?;
        let idle_timeout_secs = parse_env_var("BLOG_PLATFORM_DATABASE_IDLE_TIMEOUT", 600u64)?;

        Ok(Self {
            url,
            max_connections,
            min_connections,
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            idle_timeout: Duration::from_secs(idle_timeout_secs),
        })
    }

    fn validate(&self) -> Result<(), PlatformError> {
        Url::parse(&self.url).map_err(|e| PlatformError::Configuration {
            message: format!("Invalid DATABASE_URL: {}", e),
            key: Some("BLOG_PLATFORM_DATABASE_URL".to_string()),
        })?;

        if self.max_connections == 0 {
            return Err(PlatformError::Configuration {
                message: "max_connections must be greater than 0".to_string(),
                key: Some("BLOG_PLATFORM_DATABASE_MAX_CONNECTIONS".to_string()),
            });
        }

        if self.min_connections > self.max_connections {
            return Err(PlatformError::Configuration {
                message: format!(
                    "min_connections ({}) cannot exceed max_connections ({})",
                    self.min_connections, self.max_connections
                ),
                key: Some("BLOG_PLATFORM_DATABASE_MIN_CONNECTIONS".to_string()),
            });
        }

        if self.connect_timeout.as_secs() == 0 {
            return Err(PlatformError::Configuration {
                message: "connect_timeout must be greater than 0 seconds".to_string(),
                key: Some("BLOG_PLATFORM_DATABASE_CONNECT_TIMEOUT".to_string()),
            });
        }

        Ok(())
    }
}

/// Redis connection settings
///
/// # Environment Variables
///
/// - `BLOG_PLATFORM_REDIS_URL` (required, falls back to `REDIS_URL`)
/// - `BLOG_PLATFORM_REDIS_RESPONSE_TIMEOUT` seconds (default: 5)
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,
    /// Response timeout duration
    pub response_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            response_timeout: Duration::from_secs(5),
        }
    }
}

impl ConfigLoader for RedisConfig {
    fn from_env() -> Result<Self, PlatformError> {
        let url = std::env::var("BLOG_PLATFORM_REDIS_URL")
            .or_else(|_| std::env::var("REDIS_URL"))
            .map_err(|_| PlatformError::Configuration {
                message: "REDIS_URL or BLOG_PLATFORM_REDIS_URL must be set".to_string(),
                key: Some("BLOG_PLATFORM_REDIS_URL".to_string()),
            })?;

        let response_timeout_secs = parse_env_var("BLOG_PLATFORM_REDIS_RESPONSE_TIMEOUT", 5u64)?;

        Ok(Self {
            url,
            response_timeout: Duration::from_secs(response_timeout_secs),
        })
    }

    fn validate(&self) -> Result<(), PlatformError> {
        Url::parse(&self.url).map_err(|e| PlatformError::Configuration {
            message: format!("Invalid REDIS_URL: {}", e),
            key: Some("BLOG_PLATFORM_REDIS_URL".to_string()),
        })?;

        if self.response_timeout.as_secs() == 0 {
            return Err(PlatformError::Configuration {
                message: "response_timeout must be greater than 0 seconds".to_string(),
                key: Some("BLOG_PLATFORM_REDIS_RESPONSE_TIMEOUT".to_string()),
            });
        }

        Ok(())
    }
}

/// HTTP service bind settings
///
/// # Environment Variables
///
/// - `BLOG_PLATFORM_SERVICE_HOST` (default: "0.0.0.0", falls back to `HOST`)
/// - `BLOG_PLATFORM_SERVICE_PORT` (default: 8082, falls back to `PORT`)
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Service bind host
    pub host: String,
    /// Service bind port
    pub port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8082,
        }
    }
}

impl ConfigLoader for ServiceConfig {
    fn from_env() -> Result<Self, PlatformError> {
        let defaults = ServiceConfig::default();

        let host = std::env::var("BLOG_PLATFORM_SERVICE_HOST")
            .or_else(|_| std::env::var("HOST"))
            .unwrap_or(defaults.host);

        let port = match std::env::var("BLOG_PLATFORM_SERVICE_PORT") {
            Ok(_) => parse_env_var("BLOG_PLATFORM_SERVICE_PORT", defaults.port)?,
            Err(_) => parse_env_var("PORT", defaults.port)?,
        };

        Ok(Self { host, port })
    }

    fn validate(&self) -> Result<(), PlatformError> {
        if self.port == 0 {
            return Err(PlatformError::Configuration {
                message: "port must be greater than 0".to_string(),
                key: Some("BLOG_PLATFORM_SERVICE_PORT".to_string()),
            });
        }

        Ok(())
    }
}

/// Parse an environment variable, falling back to `default` when unset
///
/// # Errors
///
/// Returns a `Configuration` error if the variable is set but cannot be parsed
pub fn parse_env_var<T>(key: &str, default: T) -> Result<T, PlatformError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    std::env::var(key)
        .ok()
        .map(|v| {
            v.parse::<T>().map_err(|e| PlatformError::Configuration {
                message: format!("Failed to parse {}: {}", key, e),
                key: Some(key.to_string()),
            })
        })
        .unwrap_or(Ok(default))
}

/// Load .env file if present
///
/// Missing files are ignored; other failures are reported on stderr because
/// tracing is usually not initialized yet.
pub fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_database_config_default() {
        let config = DatabaseConfig::default();
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_database_config_validation_invalid_url() {
        let config = DatabaseConfig {
            url: "not-a-valid-url".to_string(),
            ..Default::default()
        };

        let result = config.validate();
        assert!(matches!(result, Err(PlatformError::Configuration { .. })));
    }

    #[test]
    fn test_database_config_validation_min_exceeds_max() {
        let config = DatabaseConfig {
            min_connections: 30,
            max_connections: 20,
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redis_config_validation() {
        assert!(RedisConfig::default().validate().is_ok());

        let config = RedisConfig {
            url: "invalid-redis-url".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_service_config_zero_port() {
        let config = ServiceConfig {
            port: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_env_var_with_default() {
        let result: u32 = parse_env_var("BLOG_PLATFORM_TEST_UNSET_VAR", 42).unwrap();
        assert_eq!(result, 42);
    }

    #[test]
    fn test_parse_env_var_with_value() {
        env::set_var("BLOG_PLATFORM_TEST_PARSE_VAR", "100");
        let result: u32 = parse_env_var("BLOG_PLATFORM_TEST_PARSE_VAR", 42).unwrap();
        assert_eq!(result, 100);
        env::remove_var("BLOG_PLATFORM_TEST_PARSE_VAR");
    }

    #[test]
    fn test_parse_env_var_invalid_value() {
        env::set_var("BLOG_PLATFORM_TEST_INVALID_VAR", "not-a-number");
        let result: Result<u32, _> = parse_env_var("BLOG_PLATFORM_TEST_INVALID_VAR", 42);
        assert!(result.is_err());
        env::remove_var("BLOG_PLATFORM_TEST_INVALID_VAR");
    }
}
