//! In-memory recommendation store for tests and local development

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use super::{RecommendationStore, StoredProfile};
use crate::error::{RecommendError, Result};
use crate::types::{BehaviorEvent, CatalogItem, ItemId, ItemKind, RecommendationLog, UserId};

#[derive(Default)]
struct State {
    behaviors: Vec<BehaviorEvent>,
    profiles: HashMap<UserId, StoredProfile>,
    logs: Vec<RecommendationLog>,
    catalog: HashMap<(ItemKind, ItemId), BTreeSet<String>>,
}

/// Recommendation store holding everything behind one lock
#[derive(Default)]
pub struct InMemoryRecommendationStore {
    state: RwLock<State>,
    fail_content_queries: AtomicBool,
}

impl InMemoryRecommendationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a catalog item with its tags
    pub fn add_catalog_item<I, S>(&self, kind: ItemKind, item_id: ItemId, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state
            .write()
            .catalog
            .entry((kind, item_id))
            .or_default()
            .extend(tags.into_iter().map(Into::into));
    }

    /// Make `content_candidates` fail until reset
    pub fn fail_content_queries(&self, fail: bool) {
        self.fail_content_queries.store(fail, Ordering::SeqCst);
    }

    pub fn behaviors(&self) -> Vec<BehaviorEvent> {
        self.state.read().behaviors.clone()
    }

    pub fn recommendation_logs(&self) -> Vec<RecommendationLog> {
        self.state.read().logs.clone()
    }

    pub fn stored_profile_count(&self) -> usize {
        self.state.read().profiles.len()
    }
}

#[async_trait]
impl RecommendationStore for InMemoryRecommendationStore {
    async fn insert_behavior(&self, event: &BehaviorEvent) -> Result<()> {
        let mut state = self.state.write();
        if !event.tags.is_empty() {
            state
                .catalog
                .entry((event.item_kind, event.item_id))
                .or_default()
                .extend(event.tags.iter().cloned());
        }
        state.behaviors.push(event.clone());
        Ok(())
    }

    async fn behaviors_since(&self, hours: i64, limit: i64) -> Result<Vec<BehaviorEvent>> {
        let start = Utc::now() - Duration::hours(hours);
        let state = self.state.read();

        let mut events: Vec<BehaviorEvent> = state
            .behaviors
            .iter()
            .filter(|e| e.timestamp >= start)
            .cloned()
            .collect();
        // later inserts come first among equal timestamps
        events.sort_by_key(|e| e.timestamp);
        events.reverse();
        events.truncate(limit.max(0) as usize);
        Ok(events)
    }

    async fn user_behaviors(&self, user_id: UserId) -> Result<Vec<BehaviorEvent>> {
        let mut events: Vec<BehaviorEvent> = self
            .state
            .read()
            .behaviors
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    async fn count_user_behaviors(&self, user_id: UserId) -> Result<i64> {
        let count = self
            .state
            .read()
            .behaviors
            .iter()
            .filter(|e| e.user_id == user_id)
            .count();
        Ok(count as i64)
    }

    async fn active_users_since(&self, hours: i64) -> Result<Vec<UserId>> {
        let start = Utc::now() - Duration::hours(hours);
        let users: BTreeSet<UserId> = self
            .state
            .read()
            .behaviors
            .iter()
            .filter(|e| e.timestamp >= start)
            .map(|e| e.user_id)
            .collect();
        Ok(users.into_iter().collect())
    }

    async fn load_profile(&self, user_id: UserId) -> Result<Option<StoredProfile>> {
        Ok(self.state.read().profiles.get(&user_id).cloned())
    }

    async fn save_profile(&self, profile: &StoredProfile) -> Result<()> {
        self.state
            .write()
            .profiles
            .insert(profile.user_id, profile.clone());
        Ok(())
    }

    async fn popular_items(
        &self,
        kind: ItemKind,
        hours: i64,
        limit: i64,
    ) -> Result<Vec<(ItemId, f64)>> {
        let start = Utc::now() - Duration::hours(hours);
        let mut counts: BTreeMap<ItemId, f64> = BTreeMap::new();
        for event in self
            .state
            .read()
            .behaviors
            .iter()
            .filter(|e| e.item_kind == kind && e.timestamp >= start)
        {
            *counts.entry(event.item_id).or_default() += 1.0;
        }

        let mut ranked: Vec<(ItemId, f64)> = counts.into_iter().collect();
        // BTreeMap order gives item_id ascending among equal counts
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(limit.max(0) as usize);
        Ok(ranked)
    }

    async fn content_candidates(
        &self,
        kind: ItemKind,
        tag_weights: &BTreeMap<String, f64>,
        exclude: &[ItemId],
        limit: i64,
    ) -> Result<Vec<CatalogItem>> {
        if self.fail_content_queries.load(Ordering::SeqCst) {
            return Err(RecommendError::Internal(
                "content query failure injected".to_string(),
            ));
        }

        let excluded: HashSet<ItemId> = exclude.iter().copied().collect();

        let mut matches: Vec<CatalogItem> = self
            .state
            .read()
            .catalog
            .iter()
            .filter(|((item_kind, item_id), _)| *item_kind == kind && !excluded.contains(item_id))
            .filter_map(|((_, item_id), item_tags)| {
                let matched: Vec<String> = item_tags
                    .iter()
                    .filter(|tag| tag_weights.contains_key(*tag))
                    .cloned()
                    .collect();
                let score = matched.iter().filter_map(|tag| tag_weights.get(tag)).sum();
                (!matched.is_empty()).then(|| CatalogItem {
                    item_id: *item_id,
                    kind,
                    tags: matched,
                    score,
                })
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.item_id.cmp(&b.item_id)));
        matches.truncate(limit.max(0) as usize);
        Ok(matches)
    }

    async fn item_tags(&self, item_id: ItemId, kind: ItemKind) -> Result<Vec<String>> {
        Ok(self
            .state
            .read()
            .catalog
            .get(&(kind, item_id))
            .map(|tags| tags.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_recommendation_log(&self, log: &RecommendationLog) -> Result<()> {
        self.state.write().logs.push(log.clone());
        Ok(())
    }

    async fn delete_behaviors_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write();
        let before = state.behaviors.len();
        state.behaviors.retain(|e| e.timestamp >= cutoff);
        Ok((before - state.behaviors.len()) as u64)
    }

    async fn delete_recommendation_logs_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write();
        let before = state.logs.len();
        state.logs.retain(|log| log.created_at >= cutoff);
        Ok((before - state.logs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BehaviorKind;

    fn event(user: UserId, item: ItemId, hours_ago: i64) -> BehaviorEvent {
        BehaviorEvent::new(user, item, ItemKind::Article, BehaviorKind::View)
            .at(Utc::now() - Duration::hours(hours_ago))
    }

    #[tokio::test]
    async fn test_windowed_reads() {
        let store = InMemoryRecommendationStore::new();
        store.insert_behavior(&event(1, 10, 50)).await.unwrap();
        store.insert_behavior(&event(1, 11, 2)).await.unwrap();
        store.insert_behavior(&event(2, 10, 1)).await.unwrap();

        let recent = store.behaviors_since(24, 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].user_id, 2);

        assert_eq!(store.behaviors_since(24, 1).await.unwrap().len(), 1);
        assert_eq!(store.active_users_since(24).await.unwrap(), vec![1, 2]);
        assert_eq!(store.count_user_behaviors(1).await.unwrap(), 2);

        let history = store.user_behaviors(1).await.unwrap();
        assert_eq!(history[0].item_id, 10);
    }

    #[tokio::test]
    async fn test_popular_items_ranked_by_count() {
        let store = InMemoryRecommendationStore::new();
        for user in 1..=3 {
            store.insert_behavior(&event(user, 20, 1)).await.unwrap();
        }
        store.insert_behavior(&event(1, 21, 1)).await.unwrap();
        store.insert_behavior(&event(1, 19, 1)).await.unwrap();

        let popular = store.popular_items(ItemKind::Article, 24, 10).await.unwrap();
        assert_eq!(popular, vec![(20, 3.0), (19, 1.0), (21, 1.0)]);
        assert!(store
            .popular_items(ItemKind::Tag, 24, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_content_candidates_match_tags() {
        let store = InMemoryRecommendationStore::new();
        store.add_catalog_item(ItemKind::Article, 1, ["rust", "async"]);
        store.add_catalog_item(ItemKind::Article, 2, ["rust"]);
        store.add_catalog_item(ItemKind::Article, 3, ["python"]);

        let tags = BTreeMap::from([("rust".to_string(), 0.6), ("async".to_string(), 0.4)]);
        let found = store
            .content_candidates(ItemKind::Article, &tags, &[], 10)
            .await
            .unwrap();
        let ids: Vec<ItemId> = found.iter().map(|c| c.item_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!((found[0].score - 1.0).abs() < 1e-9);
        assert!((found[1].score - 0.6).abs() < 1e-9);

        let found = store
            .content_candidates(ItemKind::Article, &tags, &[1], 10)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        store.fail_content_queries(true);
        assert!(store
            .content_candidates(ItemKind::Article, &tags, &[], 10)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_content_candidates_rank_by_weight_before_limit() {
        let store = InMemoryRecommendationStore::new();
        store.add_catalog_item(ItemKind::Article, 60, ["rust", "python"]);
        store.add_catalog_item(ItemKind::Article, 61, ["golang"]);

        let tags = BTreeMap::from([
            ("golang".to_string(), 0.9),
            ("python".to_string(), 0.05),
            ("rust".to_string(), 0.05),
        ]);
        let found = store
            .content_candidates(ItemKind::Article, &tags, &[], 1)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].item_id, 61);
    }

    #[tokio::test]
    async fn test_retention_deletes() {
        let store = InMemoryRecommendationStore::new();
        store.insert_behavior(&event(1, 10, 24 * 100)).await.unwrap();
        store.insert_behavior(&event(1, 11, 1)).await.unwrap();

        let deleted = store
            .delete_behaviors_before(Utc::now() - Duration::days(90))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.behaviors().len(), 1);
    }
}
