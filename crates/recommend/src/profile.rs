//! User profile aggregation
//!
//! A profile is always rebuilt from the user's complete behavior history.
//! Every behavior contributes `kind_weight * time_decay(age) * explicit_weight`
//! to each tag of its item; the per-tag sums are normalized into preferences
//! that add up to 1.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::behavior::BehaviorWeighting;
use crate::config::ProfileConfig;
use crate::error::Result;
use crate::storage::{RecommendationStore, StoredProfile};
use crate::types::{BehaviorEvent, ItemId, ItemKind, UserId};
use blog_platform_core::sparse_cosine_similarity;

const PREFERENCE_SIMILARITY_WEIGHT: f64 = 0.7;
const INTEREST_SIMILARITY_WEIGHT: f64 = 0.3;

/// Per-kind counts and activity histograms
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BehaviorStats {
    /// behavior kind -> count
    pub counts: BTreeMap<String, u64>,
    pub total: u64,
    /// Mean of the explicit scores, 0.0 when none were given
    pub average_score: f64,
    /// Hour of day (UTC, 0-23) with the most behaviors
    pub most_active_hour: Option<u32>,
    /// Day of week (0 = Monday) with the most behaviors
    pub most_active_weekday: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileMetadata {
    pub first_behavior_at: Option<DateTime<Utc>>,
    pub last_behavior_at: Option<DateTime<Utc>>,
    pub time_span_days: f64,
    pub active_days: u64,
    pub avg_behaviors_per_day: f64,
    pub unique_items: u64,
    pub unique_tags: u64,
    /// unique items / total behaviors
    pub diversity_score: f64,
}

/// Aggregated view of one user's interests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    /// tag -> normalized weight
    pub preferences: BTreeMap<String, f64>,
    /// Top tags by weight, strongest first
    pub interests: Vec<String>,
    pub stats: BehaviorStats,
    pub metadata: ProfileMetadata,
    pub last_updated: DateTime<Utc>,
}

impl UserProfile {
    /// Profile of a user without usable history
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            preferences: BTreeMap::new(),
            interests: Vec::new(),
            stats: BehaviorStats::default(),
            metadata: ProfileMetadata::default(),
            last_updated: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.preferences.is_empty() && self.interests.is_empty()
    }

    pub fn to_stored(&self) -> Result<StoredProfile> {
        Ok(StoredProfile {
            user_id: self.user_id,
            preferences: serde_json::to_value(&self.preferences)?,
            interests: serde_json::to_value(&self.interests)?,
            stats: serde_json::to_value(&self.stats)?,
            metadata: serde_json::to_value(&self.metadata)?,
            updated_at: self.last_updated,
        })
    }

    pub fn from_stored(stored: StoredProfile) -> Result<Self> {
        Ok(Self {
            user_id: stored.user_id,
            preferences: serde_json::from_value(stored.preferences)?,
            interests: serde_json::from_value(stored.interests)?,
            stats: serde_json::from_value(stored.stats)?,
            metadata: serde_json::from_value(stored.metadata)?,
            last_updated: stored.updated_at,
        })
    }
}

/// Blend of preference cosine and interest overlap, in [0, 1] for
/// non-negative preferences
pub fn user_similarity(a: &UserProfile, b: &UserProfile) -> f64 {
    let prefs_a: HashMap<String, f64> = a.preferences.clone().into_iter().collect();
    let prefs_b: HashMap<String, f64> = b.preferences.clone().into_iter().collect();
    let cosine = sparse_cosine_similarity(&prefs_a, &prefs_b);

    let interests_a: HashSet<&String> = a.interests.iter().collect();
    let interests_b: HashSet<&String> = b.interests.iter().collect();
    let union = interests_a.union(&interests_b).count();
    let jaccard = if union == 0 {
        0.0
    } else {
        interests_a.intersection(&interests_b).count() as f64 / union as f64
    };

    PREFERENCE_SIMILARITY_WEIGHT * cosine + INTEREST_SIMILARITY_WEIGHT * jaccard
}

/// Index of the largest bucket, lowest index on ties
fn busiest_bucket(buckets: &[u64]) -> Option<u32> {
    let mut best: Option<(usize, u64)> = None;
    for (idx, &count) in buckets.iter().enumerate() {
        if count > 0 && best.map_or(true, |(_, c)| count > c) {
            best = Some((idx, count));
        }
    }
    best.map(|(idx, _)| idx as u32)
}

/// Builds profiles from stored behavior history
pub struct UserProfileBuilder {
    store: Arc<dyn RecommendationStore>,
    weighting: BehaviorWeighting,
    config: ProfileConfig,
    max_rating: f64,
}

impl UserProfileBuilder {
    pub fn new(
        store: Arc<dyn RecommendationStore>,
        weighting: BehaviorWeighting,
        config: ProfileConfig,
        max_rating: f64,
    ) -> Self {
        Self {
            store,
            weighting,
            config,
            max_rating,
        }
    }

    /// Rebuild a profile from the user's full history
    ///
    /// Users below the minimum behavior count get the empty profile.
    #[instrument(skip(self))]
    pub async fn build_profile(&self, user_id: UserId) -> Result<UserProfile> {
        let count = self.store.count_user_behaviors(user_id).await?;
        if count < self.config.min_behaviors as i64 {
            debug!(user_id, count, "Not enough behaviors for a profile");
            return Ok(UserProfile::empty(user_id));
        }

        let mut behaviors = self.store.user_behaviors(user_id).await?;

        let mut resolved: HashMap<(ItemKind, ItemId), Vec<String>> = HashMap::new();
        for event in behaviors.iter_mut().filter(|e| e.tags.is_empty()) {
            let key = (event.item_kind, event.item_id);
            if !resolved.contains_key(&key) {
                let tags = self.store.item_tags(event.item_id, event.item_kind).await?;
                resolved.insert(key, tags);
            }
            if let Some(tags) = resolved.get(&key) {
                event.tags = tags.clone();
            }
        }

        Ok(self.aggregate(user_id, &behaviors, Utc::now()))
    }

    /// Aggregate behaviors into a profile as of `now`
    pub fn aggregate(
        &self,
        user_id: UserId,
        behaviors: &[BehaviorEvent],
        now: DateTime<Utc>,
    ) -> UserProfile {
        if behaviors.len() < self.config.min_behaviors || behaviors.is_empty() {
            return UserProfile::empty(user_id);
        }

        let mut tag_weights: BTreeMap<String, f64> = BTreeMap::new();
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        let mut hours = [0u64; 24];
        let mut weekdays = [0u64; 7];
        let mut score_sum = 0.0;
        let mut scored = 0u64;
        let mut items: HashSet<(ItemKind, ItemId)> = HashSet::new();
        let mut days = BTreeSet::new();

        for event in behaviors {
            let age_hours = (now - event.timestamp).num_seconds() as f64 / 3600.0;
            let weight = self.weighting.weight(event.kind)
                * self.weighting.time_decay(age_hours)
                * self.weighting.explicit_weight(event.score, self.max_rating);

            let tags: BTreeSet<&String> = event.tags.iter().collect();
            for tag in tags {
                *tag_weights.entry(tag.clone()).or_default() += weight;
            }

            *counts.entry(event.kind.as_str().to_string()).or_default() += 1;
            hours[event.timestamp.hour() as usize] += 1;
            weekdays[event.timestamp.weekday().num_days_from_monday() as usize] += 1;
            if let Some(score) = event.score {
                score_sum += score;
                scored += 1;
            }
            items.insert((event.item_kind, event.item_id));
            days.insert(event.timestamp.date_naive());
        }

        let total_weight: f64 = tag_weights.values().sum();
        let preferences: BTreeMap<String, f64> = if total_weight > 0.0 {
            tag_weights
                .iter()
                .map(|(tag, w)| (tag.clone(), w / total_weight))
                .collect()
        } else {
            BTreeMap::new()
        };

        let mut ranked: Vec<(&String, &f64)> = preferences.iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(b.0))
        });
        let interests: Vec<String> = ranked
            .into_iter()
            .take(self.config.top_interests)
            .map(|(tag, _)| tag.clone())
            .collect();

        let total = behaviors.len() as u64;
        let stats = BehaviorStats {
            counts,
            total,
            average_score: if scored > 0 {
                score_sum / scored as f64
            } else {
                0.0
            },
            most_active_hour: busiest_bucket(&hours),
            most_active_weekday: busiest_bucket(&weekdays),
        };

        let first = behaviors.iter().map(|e| e.timestamp).min();
        let last = behaviors.iter().map(|e| e.timestamp).max();
        let time_span_days = match (first, last) {
            (Some(first), Some(last)) => (last - first).num_seconds() as f64 / 86_400.0,
            _ => 0.0,
        };
        let active_days = days.len() as u64;

        let metadata = ProfileMetadata {
            first_behavior_at: first,
            last_behavior_at: last,
            time_span_days,
            active_days,
            avg_behaviors_per_day: if active_days > 0 {
                total as f64 / active_days as f64
            } else {
                0.0
            },
            unique_items: items.len() as u64,
            unique_tags: tag_weights.len() as u64,
            diversity_score: items.len() as f64 / total as f64,
        };

        UserProfile {
            user_id,
            preferences,
            interests,
            stats,
            metadata,
            last_updated: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryRecommendationStore;
    use crate::types::BehaviorKind;
    use chrono::{Duration, TimeZone};

    fn builder(store: Arc<dyn RecommendationStore>) -> UserProfileBuilder {
        UserProfileBuilder::new(
            store,
            BehaviorWeighting::default(),
            ProfileConfig::default(),
            5.0,
        )
    }

    fn offline_builder() -> UserProfileBuilder {
        builder(Arc::new(InMemoryRecommendationStore::new()))
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    fn like(item: ItemId, tags: &[&str], at: DateTime<Utc>) -> BehaviorEvent {
        BehaviorEvent::new(1, item, ItemKind::Article, BehaviorKind::Like)
            .with_tags(tags.iter().copied())
            .at(at)
    }

    #[test]
    fn test_single_tag_history() {
        let b = offline_builder();
        let behaviors = vec![
            like(1, &["golang"], now() - Duration::days(6)),
            like(2, &["golang"], now() - Duration::days(3)),
            like(3, &["golang"], now() - Duration::days(1)),
        ];

        let profile = b.aggregate(1, &behaviors, now());
        assert!((profile.preferences["golang"] - 1.0).abs() < 1e-9);
        assert_eq!(profile.interests, vec!["golang".to_string()]);
        assert_eq!(profile.stats.counts["like"], 3);
        assert_eq!(profile.metadata.unique_items, 3);
        assert_eq!(profile.metadata.active_days, 3);
        assert!((profile.metadata.time_span_days - 5.0).abs() < 1e-9);
        assert!((profile.metadata.diversity_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_below_minimum_is_empty() {
        let b = offline_builder();
        let behaviors = vec![like(1, &["rust"], now()), like(2, &["rust"], now())];
        let profile = b.aggregate(1, &behaviors, now());

        assert!(profile.preferences.is_empty());
        assert!(profile.interests.is_empty());
        assert!(profile.is_empty());
    }

    #[test]
    fn test_preferences_sum_to_one() {
        let b = offline_builder();
        let behaviors = vec![
            like(1, &["rust", "async"], now() - Duration::days(40)),
            BehaviorEvent::new(1, 2, ItemKind::Article, BehaviorKind::View)
                .with_tags(["python"])
                .at(now() - Duration::hours(5)),
            BehaviorEvent::new(1, 3, ItemKind::Article, BehaviorKind::Collect)
                .with_tags(["rust", "databases"])
                .with_score(4.0)
                .at(now()),
        ];

        let profile = b.aggregate(1, &behaviors, now());
        let sum: f64 = profile.preferences.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert_eq!(profile.interests[0], "rust");
        assert_eq!(profile.metadata.unique_tags, 4);
        assert!((profile.stats.average_score - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_untagged_history_has_no_preferences() {
        let b = offline_builder();
        let behaviors: Vec<BehaviorEvent> = (0..4).map(|i| like(i, &[], now())).collect();
        let profile = b.aggregate(1, &behaviors, now());

        assert!(profile.preferences.is_empty());
        assert!(profile.interests.is_empty());
        assert_eq!(profile.stats.total, 4);
    }

    #[test]
    fn test_interest_ties_break_by_name() {
        let b = offline_builder();
        let at = now();
        let behaviors = vec![
            like(1, &["zig"], at),
            like(2, &["ada"], at),
            like(3, &["nim"], at),
        ];

        let profile = b.aggregate(1, &behaviors, at);
        assert_eq!(profile.interests, vec!["ada", "nim", "zig"]);
    }

    #[test]
    fn test_recent_behaviors_weigh_more() {
        let b = offline_builder();
        let behaviors = vec![
            like(1, &["old"], now() - Duration::days(60)),
            like(2, &["new"], now()),
            like(3, &["new"], now()),
        ];
        let profile = b.aggregate(1, &behaviors, now());

        assert!(profile.preferences["new"] > profile.preferences["old"]);
        assert!(profile.preferences["old"] > 0.0);
    }

    #[test]
    fn test_activity_histogram_ties_use_lowest_index() {
        let b = offline_builder();
        // 2024-03-11 is a Monday
        let monday_9 = Utc.with_ymd_and_hms(2024, 3, 11, 9, 0, 0).unwrap();
        let tuesday_17 = Utc.with_ymd_and_hms(2024, 3, 12, 17, 0, 0).unwrap();
        let behaviors = vec![
            like(1, &["a"], tuesday_17),
            like(2, &["a"], monday_9),
            like(3, &["a"], tuesday_17 + Duration::minutes(5)),
            like(4, &["a"], monday_9 + Duration::minutes(5)),
        ];

        let profile = b.aggregate(1, &behaviors, tuesday_17 + Duration::hours(1));
        assert_eq!(profile.stats.most_active_hour, Some(9));
        assert_eq!(profile.stats.most_active_weekday, Some(0));
        assert!((profile.metadata.avg_behaviors_per_day - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_stored_round_trip_keeps_all_fields() {
        let b = offline_builder();
        let behaviors = vec![
            like(1, &["rust"], now() - Duration::days(2)),
            like(2, &["go"], now() - Duration::days(1)),
            like(3, &["rust"], now()),
        ];
        let profile = b.aggregate(1, &behaviors, now());

        let stored = profile.to_stored().unwrap();
        assert!(stored.preferences.is_object());
        assert!(stored.interests.is_array());

        let restored = UserProfile::from_stored(stored).unwrap();
        assert_eq!(restored.interests, profile.interests);
        assert_eq!(restored.stats.counts, profile.stats.counts);
        assert_eq!(restored.metadata.active_days, profile.metadata.active_days);
        assert_eq!(restored.last_updated, profile.last_updated);
        for (tag, weight) in &profile.preferences {
            assert!((restored.preferences[tag] - weight).abs() < 1e-12);
        }
    }

    #[test]
    fn test_user_similarity() {
        let b = offline_builder();
        let rust_fan = b.aggregate(
            1,
            &[
                like(1, &["rust"], now()),
                like(2, &["rust"], now()),
                like(3, &["rust"], now()),
            ],
            now(),
        );
        let mut twin = rust_fan.clone();
        twin.user_id = 2;

        assert!((user_similarity(&rust_fan, &twin) - 1.0).abs() < 1e-9);
        assert_eq!(user_similarity(&rust_fan, &UserProfile::empty(3)), 0.0);
    }

    #[test]
    fn test_user_similarity_blends_cosine_and_overlap() {
        let mut a = UserProfile::empty(1);
        a.preferences = BTreeMap::from([("go".to_string(), 0.5), ("rust".to_string(), 0.5)]);
        a.interests = vec!["rust".to_string(), "go".to_string()];

        let mut b = UserProfile::empty(2);
        b.preferences = BTreeMap::from([("go".to_string(), 0.5), ("python".to_string(), 0.5)]);
        b.interests = vec!["go".to_string(), "python".to_string()];

        // cosine 0.5 over {go, python, rust}, interest overlap 1 of 3
        let expected = 0.7 * 0.5 + 0.3 * (1.0 / 3.0);
        assert!((user_similarity(&a, &b) - expected).abs() < 1e-9);
        assert!((user_similarity(&b, &a) - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_build_profile_resolves_missing_tags() {
        let store = Arc::new(InMemoryRecommendationStore::new());
        store.add_catalog_item(ItemKind::Article, 10, ["databases"]);

        for item in [10, 10, 10] {
            let event = BehaviorEvent::new(5, item, ItemKind::Article, BehaviorKind::View);
            store.insert_behavior(&event).await.unwrap();
        }

        let profile = builder(store).build_profile(5).await.unwrap();
        assert_eq!(profile.interests, vec!["databases".to_string()]);
        assert!((profile.metadata.diversity_score - 1.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_build_profile_for_unknown_user_is_empty() {
        let store = Arc::new(InMemoryRecommendationStore::new());
        let profile = builder(store).build_profile(77).await.unwrap();
        assert!(profile.is_empty());
        assert_eq!(profile.user_id, 77);
    }
}
