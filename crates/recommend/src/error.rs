//! Error type for the recommendation subsystem

use crate::cache::CacheError;
use blog_platform_core::PlatformError;

/// Common error type for recommendation operations
#[derive(Debug, thiserror::Error)]
pub enum RecommendError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Training failed: {0}")]
    Training(String),

    #[error("Configuration error: {0}")]
    Config(#[from] PlatformError),

    #[error("Task queue is shut down")]
    Shutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for RecommendError {
    fn from(err: tokio::task::JoinError) -> Self {
        RecommendError::Internal(format!("background task failed: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, RecommendError>;
