//! Shared domain types for the recommendation subsystem

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::RecommendError;

pub type UserId = i64;
pub type ItemId = i64;

/// Kind of user interaction with an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorKind {
    View,
    Like,
    Share,
    Comment,
    Collect,
}

impl BehaviorKind {
    pub const ALL: [BehaviorKind; 5] = [
        BehaviorKind::View,
        BehaviorKind::Like,
        BehaviorKind::Share,
        BehaviorKind::Comment,
        BehaviorKind::Collect,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BehaviorKind::View => "view",
            BehaviorKind::Like => "like",
            BehaviorKind::Share => "share",
            BehaviorKind::Comment => "comment",
            BehaviorKind::Collect => "collect",
        }
    }
}

impl fmt::Display for BehaviorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BehaviorKind {
    type Err = RecommendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(BehaviorKind::View),
            "like" => Ok(BehaviorKind::Like),
            "share" => Ok(BehaviorKind::Share),
            "comment" => Ok(BehaviorKind::Comment),
            "collect" => Ok(BehaviorKind::Collect),
            other => Err(RecommendError::Validation(format!(
                "unknown behavior kind '{}'",
                other
            ))),
        }
    }
}

/// Kind of recommendable item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Article,
    Tag,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Article => "article",
            ItemKind::Tag => "tag",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = RecommendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "article" => Ok(ItemKind::Article),
            "tag" => Ok(ItemKind::Tag),
            other => Err(RecommendError::Validation(format!(
                "unknown item kind '{}'",
                other
            ))),
        }
    }
}

/// A single recorded user behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorEvent {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub item_kind: ItemKind,
    pub kind: BehaviorKind,
    /// Explicit score supplied by the user, if any
    pub score: Option<f64>,
    /// Content tags of the item at the time of the behavior
    #[serde(default)]
    pub tags: Vec<String>,
    /// Free-form client context (device, referrer, ...)
    #[serde(default)]
    pub context: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl BehaviorEvent {
    pub fn new(user_id: UserId, item_id: ItemId, item_kind: ItemKind, kind: BehaviorKind) -> Self {
        Self {
            user_id,
            item_id,
            item_kind,
            kind,
            score: None,
            tags: Vec::new(),
            context: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Which signal produced a recommended item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationSource {
    CollaborativeFiltering,
    ContentBased,
    Popular,
}

impl RecommendationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationSource::CollaborativeFiltering => "collaborative_filtering",
            RecommendationSource::ContentBased => "content_based",
            RecommendationSource::Popular => "popular",
        }
    }
}

/// Overall label of a recommendation response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    CollaborativeFiltering,
    ContentBased,
    Hybrid,
    Popular,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::CollaborativeFiltering => "collaborative_filtering",
            Algorithm::ContentBased => "content_based",
            Algorithm::Hybrid => "hybrid",
            Algorithm::Popular => "popular",
        }
    }

    /// Label a merged result by the sources it contains
    pub fn from_items(items: &[RecommendedItem]) -> Self {
        let has = |source| items.iter().any(|item| item.reason == source);
        let collaborative = has(RecommendationSource::CollaborativeFiltering);
        let content = has(RecommendationSource::ContentBased);

        match (collaborative, content) {
            (true, true) => Algorithm::Hybrid,
            (true, false) => Algorithm::CollaborativeFiltering,
            (false, true) => Algorithm::ContentBased,
            (false, false) => Algorithm::Popular,
        }
    }
}

impl FromStr for Algorithm {
    type Err = RecommendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "collaborative_filtering" => Ok(Algorithm::CollaborativeFiltering),
            "content_based" => Ok(Algorithm::ContentBased),
            "hybrid" => Ok(Algorithm::Hybrid),
            "popular" => Ok(Algorithm::Popular),
            other => Err(RecommendError::Validation(format!(
                "unknown algorithm '{}'",
                other
            ))),
        }
    }
}

/// One ranked item in a recommendation response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedItem {
    pub item_id: ItemId,
    pub score: f64,
    pub reason: RecommendationSource,
}

impl RecommendedItem {
    pub fn new(item_id: ItemId, score: f64, reason: RecommendationSource) -> Self {
        Self {
            item_id,
            score,
            reason,
        }
    }
}

/// Inbound recommendation request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendationRequest {
    pub user_id: UserId,
    pub limit: usize,
    #[serde(default)]
    pub exclude_ids: Vec<ItemId>,
    #[serde(default)]
    pub include_tags: Vec<String>,
}

impl RecommendationRequest {
    pub fn new(user_id: UserId, limit: usize) -> Self {
        Self {
            user_id,
            limit,
            ..Default::default()
        }
    }
}

/// Ranked recommendation result with its algorithm label
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub user_id: UserId,
    pub item_kind: ItemKind,
    pub items: Vec<RecommendedItem>,
    pub algorithm: Algorithm,
    pub generated_at: DateTime<Utc>,
}

/// Append-only audit record of a served recommendation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationLog {
    pub id: Uuid,
    pub user_id: UserId,
    pub request_type: ItemKind,
    pub algorithm: Algorithm,
    pub item_ids: Vec<ItemId>,
    pub scores: Vec<f64>,
    pub created_at: DateTime<Utc>,
}

impl RecommendationLog {
    pub fn from_response(response: &RecommendationResponse) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: response.user_id,
            request_type: response.item_kind,
            algorithm: response.algorithm,
            item_ids: response.items.iter().map(|i| i.item_id).collect(),
            scores: response.items.iter().map(|i| i.score).collect(),
            created_at: Utc::now(),
        }
    }
}

/// Catalog entry matched by tag for content-based candidates
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogItem {
    pub item_id: ItemId,
    pub kind: ItemKind,
    /// Tags of the item that matched the query
    pub tags: Vec<String>,
    /// Summed weight of the matched tags
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_behavior_kind_round_trip_str() {
        for kind in BehaviorKind::ALL {
            assert_eq!(kind.as_str().parse::<BehaviorKind>().unwrap(), kind);
        }
        assert!("dislike".parse::<BehaviorKind>().is_err());
    }

    #[test]
    fn test_algorithm_label_from_sources() {
        let cf = RecommendedItem::new(1, 4.0, RecommendationSource::CollaborativeFiltering);
        let content = RecommendedItem::new(2, 0.5, RecommendationSource::ContentBased);
        let popular = RecommendedItem::new(3, 10.0, RecommendationSource::Popular);

        assert_eq!(
            Algorithm::from_items(&[cf.clone(), content.clone()]),
            Algorithm::Hybrid
        );
        assert_eq!(
            Algorithm::from_items(&[cf, popular.clone()]),
            Algorithm::CollaborativeFiltering
        );
        assert_eq!(
            Algorithm::from_items(&[content, popular.clone()]),
            Algorithm::ContentBased
        );
        assert_eq!(Algorithm::from_items(&[popular]), Algorithm::Popular);
        assert_eq!(Algorithm::from_items(&[]), Algorithm::Popular);
    }

    #[test]
    fn test_source_serializes_as_reason_tag() {
        let json = serde_json::to_string(&RecommendationSource::CollaborativeFiltering).unwrap();
        assert_eq!(json, "\"collaborative_filtering\"");
    }
}
