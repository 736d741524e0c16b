//! # Blog Platform Core
//!
//! Shared building blocks for Blog Platform services.
//!
//! ## Modules
//!
//! - `error`: Common error type
//! - `config`: Environment configuration loading and validation
//! - `telemetry`: Structured logging initialisation
//! - `math`: Vector similarity helpers

pub mod config;
pub mod error;
pub mod math;
pub mod telemetry;

pub use config::{
    load_dotenv, parse_env_var, ConfigLoader, DatabaseConfig, RedisConfig, ServiceConfig,
};
pub use error::PlatformError;
pub use math::{cosine_similarity, dot_product, sparse_cosine_similarity};
pub use telemetry::{init_tracing, LogConfig, LogFormat};

/// Result type alias for Blog Platform operations
pub type Result<T> = std::result::Result<T, PlatformError>;
