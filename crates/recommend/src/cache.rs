//! TTL cache for recommendation results and user profiles
//!
//! Values are stored as JSON strings. Typed reads that fail to deserialize
//! are logged and treated as misses so a bad entry never fails a request.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::types::{ItemKind, UserId};

const PREFIX_RECOMMENDATION: &str = "rec";
const PREFIX_PROFILE: &str = "profile";

/// Error types for cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Key for a cached recommendation result
pub fn recommendation_key(kind: ItemKind, user_id: UserId, limit: usize) -> String {
    format!("{}:{}:{}:{}", PREFIX_RECOMMENDATION, kind, user_id, limit)
}

/// Key for a cached user profile
pub fn profile_key(user_id: UserId) -> String {
    format!("{}:{}", PREFIX_PROFILE, user_id)
}

/// Key/value store with per-entry TTL
#[async_trait]
pub trait RecommendationCache: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Typed helpers over any [`RecommendationCache`]
///
/// Both directions swallow errors after logging them: a failed read is a
/// miss and a failed write is skipped.
#[derive(Clone)]
pub struct JsonCache {
    inner: Arc<dyn RecommendationCache>,
}

impl JsonCache {
    pub fn new(inner: Arc<dyn RecommendationCache>) -> Self {
        Self { inner }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.inner.get_raw(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key = %key, "Cache miss");
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!(key = %key, "Cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                warn!(key = %key, error = %e, "Skipping cache write, serialization failed");
                return;
            }
        };

        if let Err(e) = self.inner.set_raw(key, json, ttl).await {
            warn!(key = %key, error = %e, "Cache write failed");
        }
    }

    pub async fn delete(&self, key: &str) {
        if let Err(e) = self.inner.delete(key).await {
            warn!(key = %key, error = %e, "Cache delete failed");
        }
    }
}

/// Redis-backed cache sharing one multiplexed connection
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    /// Connect and verify the server answers `PING`
    #[instrument(skip(redis_url))]
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        info!("Initializing Redis cache connection");

        let client = Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;

        let mut conn = manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        info!("Redis cache initialized successfully");
        Ok(Self { manager })
    }
}

#[async_trait]
impl RecommendationCache for RedisCache {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let ttl_secs = ttl.as_secs().max(1);
        let mut conn = self.manager.clone();
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        debug!(key = %key, ttl = ttl_secs, "Cache set");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        let _: u64 = conn.del(key).await?;
        Ok(())
    }
}

/// Process-local cache with lazy expiry
#[derive(Default)]
pub struct InMemoryCache {
    entries: DashMap<String, (String, Instant)>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Store a raw value without going through serialization
    pub fn insert_raw(&self, key: &str, value: &str, ttl: Duration) {
        self.entries
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
    }
}

#[async_trait]
impl RecommendationCache for InMemoryCache {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let value = match self.entries.get(key) {
            Some(entry) if entry.1 > now => Some(entry.0.clone()),
            Some(_) => None,
            None => return Ok(None),
        };

        if value.is_none() {
            self.entries.remove(key);
        }
        Ok(value)
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}
