//! Durable storage contract for behaviors, profiles and recommendation logs

mod memory;
mod postgres;

pub use memory::InMemoryRecommendationStore;
pub use postgres::PostgresRecommendationStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::types::{BehaviorEvent, CatalogItem, ItemId, ItemKind, RecommendationLog, UserId};

/// Persisted profile record
///
/// The four aggregates are stored as independent JSON documents so each can
/// be read or migrated on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredProfile {
    pub user_id: UserId,
    pub preferences: serde_json::Value,
    pub interests: serde_json::Value,
    pub stats: serde_json::Value,
    pub metadata: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Storage operations the recommendation engine depends on
#[async_trait]
pub trait RecommendationStore: Send + Sync {
    /// Append a raw behavior event
    async fn insert_behavior(&self, event: &BehaviorEvent) -> Result<()>;

    /// Behaviors recorded in the last `hours`, newest first, at most `limit`
    async fn behaviors_since(&self, hours: i64, limit: i64) -> Result<Vec<BehaviorEvent>>;

    /// Full behavior history of a user, oldest first
    async fn user_behaviors(&self, user_id: UserId) -> Result<Vec<BehaviorEvent>>;

    async fn count_user_behaviors(&self, user_id: UserId) -> Result<i64>;

    /// Distinct users with at least one behavior in the last `hours`
    async fn active_users_since(&self, hours: i64) -> Result<Vec<UserId>>;

    async fn load_profile(&self, user_id: UserId) -> Result<Option<StoredProfile>>;

    /// Insert or replace the profile record
    async fn save_profile(&self, profile: &StoredProfile) -> Result<()>;

    /// Items of `kind` ranked by behavior count in the last `hours`
    async fn popular_items(
        &self,
        kind: ItemKind,
        hours: i64,
        limit: i64,
    ) -> Result<Vec<(ItemId, f64)>>;

    /// Catalog items of `kind` carrying any weighted tag, skipping `exclude`
    ///
    /// Each item is scored by the summed weight of its matching tags and the
    /// result is ranked by that score (item id ascending on ties) before
    /// `limit` is applied.
    async fn content_candidates(
        &self,
        kind: ItemKind,
        tag_weights: &BTreeMap<String, f64>,
        exclude: &[ItemId],
        limit: i64,
    ) -> Result<Vec<CatalogItem>>;

    /// Tags attached to an item
    async fn item_tags(&self, item_id: ItemId, kind: ItemKind) -> Result<Vec<String>>;

    async fn insert_recommendation_log(&self, log: &RecommendationLog) -> Result<()>;

    /// Returns the number of deleted rows
    async fn delete_behaviors_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Returns the number of deleted rows
    async fn delete_recommendation_logs_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}
