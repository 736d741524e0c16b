//! Blog Platform Recommendation Engine
//!
//! Collaborative filtering on a biased matrix factorization model, behavior
//! weighted user profiles, and a service that blends collaborative,
//! content-based and popularity candidates into one ranked result.
//!
//! ## Modules
//!
//! - `rating_matrix`: thread-safe sparse user-item ratings
//! - `matrix_factorization`: SGD-trained latent factor model
//! - `collaborative`: matrix + model with atomic model replacement
//! - `behavior`: behavior kind weights and time decay
//! - `profile`: user profile aggregation
//! - `service`: request orchestration, caching and background updates
//! - `scheduler`: periodic retrain, profile refresh and cleanup
//! - `storage` / `cache`: collaborator contracts with Postgres, Redis and
//!   in-memory implementations

pub mod behavior;
pub mod cache;
pub mod collaborative;
pub mod config;
pub mod error;
pub mod matrix_factorization;
pub mod profile;
pub mod rating_matrix;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod tasks;
pub mod types;

pub use behavior::BehaviorWeighting;
pub use cache::{CacheError, InMemoryCache, JsonCache, RecommendationCache, RedisCache};
pub use collaborative::{CollaborativeFilter, CollaborativeStats};
pub use config::{
    CacheTtlConfig, FactorizationConfig, ProfileConfig, RecommendConfig, ScheduleConfig,
};
pub use error::{RecommendError, Result};
pub use matrix_factorization::{MatrixFactorizationModel, TrainingReport};
pub use profile::{user_similarity, BehaviorStats, ProfileMetadata, UserProfile, UserProfileBuilder};
pub use rating_matrix::{MatrixSnapshot, RatingMatrix};
pub use scheduler::{RetrainerHandle, ScheduledRetrainer};
pub use service::{dedup_candidates, CleanupReport, RecommendationService, RefreshReport};
pub use storage::{
    InMemoryRecommendationStore, PostgresRecommendationStore, RecommendationStore, StoredProfile,
};
pub use tasks::TaskQueue;
pub use types::*;
