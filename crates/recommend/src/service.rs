//! Recommendation orchestration
//!
//! Blends collaborative, content-based and popularity candidates into one
//! ranked list, caches results and profiles, and dispatches behavior-driven
//! model and profile updates onto the background task queue.

use chrono::{Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::behavior::BehaviorWeighting;
use crate::cache::{profile_key, recommendation_key, JsonCache, RecommendationCache};
use crate::collaborative::CollaborativeFilter;
use crate::config::{RecommendConfig, MAX_RETENTION_DAYS, MAX_WINDOW_HOURS};
use crate::error::{RecommendError, Result};
use crate::matrix_factorization::TrainingReport;
use crate::profile::{UserProfile, UserProfileBuilder};
use crate::storage::RecommendationStore;
use crate::tasks::TaskQueue;
use crate::types::{
    Algorithm, BehaviorEvent, ItemId, ItemKind, RecommendationLog, RecommendationRequest,
    RecommendationResponse, RecommendationSource, RecommendedItem, UserId,
};

/// Outcome of a batched profile refresh
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Rows removed by a retention cleanup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub behaviors_deleted: u64,
    pub logs_deleted: u64,
}

/// Keep the first occurrence of every item, preserving order, up to `limit`
pub fn dedup_candidates(candidates: Vec<RecommendedItem>, limit: usize) -> Vec<RecommendedItem> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|item| seen.insert(item.item_id))
        .take(limit)
        .collect()
}

/// Entry point for recommendation requests and behavior reports
#[derive(Clone)]
pub struct RecommendationService {
    store: Arc<dyn RecommendationStore>,
    cache: JsonCache,
    filter: Arc<CollaborativeFilter>,
    profiles: Arc<UserProfileBuilder>,
    weighting: BehaviorWeighting,
    tasks: Arc<TaskQueue>,
    config: Arc<RecommendConfig>,
}

impl RecommendationService {
    pub fn new(
        store: Arc<dyn RecommendationStore>,
        cache: Arc<dyn RecommendationCache>,
        config: RecommendConfig,
    ) -> Self {
        let weighting = BehaviorWeighting::from_config(&config.profile);
        let profiles = UserProfileBuilder::new(
            Arc::clone(&store),
            weighting.clone(),
            config.profile.clone(),
            config.factorization.max_rating,
        );

        Self {
            filter: Arc::new(CollaborativeFilter::new(config.factorization.clone())),
            profiles: Arc::new(profiles),
            tasks: Arc::new(TaskQueue::new(config.background_concurrency)),
            cache: JsonCache::new(cache),
            store,
            weighting,
            config: Arc::new(config),
        }
    }

    pub fn filter(&self) -> &Arc<CollaborativeFilter> {
        &self.filter
    }

    pub fn tasks(&self) -> &Arc<TaskQueue> {
        &self.tasks
    }

    pub fn config(&self) -> &RecommendConfig {
        &self.config
    }

    pub async fn recommend_articles(
        &self,
        request: RecommendationRequest,
    ) -> Result<RecommendationResponse> {
        self.recommend(ItemKind::Article, request).await
    }

    pub async fn recommend_tags(
        &self,
        request: RecommendationRequest,
    ) -> Result<RecommendationResponse> {
        self.recommend(ItemKind::Tag, request).await
    }

    /// Serve one recommendation request
    ///
    /// Any failure while gathering personalized candidates degrades to the
    /// popularity ranking.
    #[instrument(skip(self, request), fields(user_id = request.user_id, kind = %kind))]
    pub async fn recommend(
        &self,
        kind: ItemKind,
        request: RecommendationRequest,
    ) -> Result<RecommendationResponse> {
        if request.user_id == 0 {
            return Err(RecommendError::Validation("user_id is required".to_string()));
        }
        if request.limit == 0 {
            return Err(RecommendError::Validation(
                "limit must be greater than 0".to_string(),
            ));
        }
        let limit = request.limit.min(self.config.max_limit);

        // filtered requests are not cacheable under a (user, kind, limit) key
        let cacheable = request.exclude_ids.is_empty() && request.include_tags.is_empty();
        let key = recommendation_key(kind, request.user_id, limit);
        if cacheable {
            if let Some(cached) = self.cache.get::<RecommendationResponse>(&key).await {
                debug!("Serving cached recommendations");
                return Ok(cached);
            }
        }

        let items = match self.personalized(kind, &request, limit).await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Personalized recommendation failed, using popular items");
                let excluded: HashSet<ItemId> = request.exclude_ids.iter().copied().collect();
                self.popular(kind, limit, &excluded).await?
            }
        };

        let response = RecommendationResponse {
            user_id: request.user_id,
            item_kind: kind,
            algorithm: Algorithm::from_items(&items),
            items,
            generated_at: Utc::now(),
        };

        if cacheable {
            self.cache
                .set(&key, &response, self.config.cache.recommendation_ttl)
                .await;
        }
        self.log_async(&response);

        info!(
            algorithm = response.algorithm.as_str(),
            count = response.items.len(),
            "Recommendations generated"
        );
        Ok(response)
    }

    /// Collaborative candidates first, then content-based, then popular
    ///
    /// Excluded ids and articles the user already rated never appear.
    async fn personalized(
        &self,
        kind: ItemKind,
        request: &RecommendationRequest,
        limit: usize,
    ) -> Result<Vec<RecommendedItem>> {
        let profile = self.get_user_profile(request.user_id).await?;

        let mut excluded: HashSet<ItemId> = request.exclude_ids.iter().copied().collect();
        if kind == ItemKind::Article {
            excluded.extend(self.filter.matrix().get_user_ratings(request.user_id).into_keys());
        }

        let mut candidates = Vec::with_capacity(limit);
        if kind == ItemKind::Article {
            candidates.extend(
                self.filter
                    .recommend(request.user_id, &request.exclude_ids, limit)
                    .into_iter()
                    .map(|(item_id, score)| {
                        RecommendedItem::new(
                            item_id,
                            score,
                            RecommendationSource::CollaborativeFiltering,
                        )
                    }),
            );
        }

        if candidates.len() < limit {
            let mut skip = excluded.clone();
            skip.extend(candidates.iter().map(|item| item.item_id));
            let content = self
                .content_based(kind, request, &profile, &skip, limit)
                .await?;
            candidates.extend(content);
        }

        let mut merged = dedup_candidates(candidates, limit);
        if merged.len() < limit {
            let mut skip = excluded;
            skip.extend(merged.iter().map(|item| item.item_id));
            let popular = self.popular(kind, limit - merged.len(), &skip).await?;
            merged.extend(popular);
        }

        Ok(dedup_candidates(merged, limit))
    }

    /// Items sharing tags with the request or the user's interests
    ///
    /// Scored by the summed preference weight of the matched tags.
    async fn content_based(
        &self,
        kind: ItemKind,
        request: &RecommendationRequest,
        profile: &UserProfile,
        excluded: &HashSet<ItemId>,
        limit: usize,
    ) -> Result<Vec<RecommendedItem>> {
        let tag_weights: BTreeMap<String, f64> = if request.include_tags.is_empty() {
            profile
                .interests
                .iter()
                .map(|tag| (tag.clone(), profile.preferences.get(tag).copied().unwrap_or(0.0)))
                .collect()
        } else {
            let uniform = 1.0 / request.include_tags.len() as f64;
            request
                .include_tags
                .iter()
                .map(|tag| {
                    let weight = profile.preferences.get(tag).copied().unwrap_or(uniform);
                    (tag.clone(), weight)
                })
                .collect()
        };
        if tag_weights.is_empty() {
            return Ok(Vec::new());
        }

        let mut exclude: Vec<ItemId> = excluded.iter().copied().collect();
        exclude.sort_unstable();

        // the store ranks by summed tag weight before applying the limit
        let catalog = self
            .store
            .content_candidates(kind, &tag_weights, &exclude, limit as i64)
            .await?;

        Ok(catalog
            .into_iter()
            .map(|item| {
                RecommendedItem::new(item.item_id, item.score, RecommendationSource::ContentBased)
            })
            .collect())
    }

    /// Most interacted-with items in the popularity window, minus `excluded`
    async fn popular(
        &self,
        kind: ItemKind,
        limit: usize,
        excluded: &HashSet<ItemId>,
    ) -> Result<Vec<RecommendedItem>> {
        let fetch = limit + excluded.len();
        let popular = self
            .store
            .popular_items(kind, self.config.popular_window_hours, fetch as i64)
            .await?;

        Ok(popular
            .into_iter()
            .filter(|(item_id, _)| !excluded.contains(item_id))
            .take(limit)
            .map(|(item_id, score)| RecommendedItem::new(item_id, score, RecommendationSource::Popular))
            .collect())
    }

    fn log_async(&self, response: &RecommendationResponse) {
        let log = RecommendationLog::from_response(response);
        let store = Arc::clone(&self.store);
        let spawned = self.tasks.spawn("recommendation_log", async move {
            store.insert_recommendation_log(&log).await
        });
        if let Err(e) = spawned {
            warn!(error = %e, "Recommendation log dropped");
        }
    }

    /// Durably record a behavior, then update the rating matrix and the
    /// user's profile in the background
    ///
    /// Returns once the raw event is stored; the background updates may
    /// still be running.
    #[instrument(skip(self, event), fields(user_id = event.user_id, item_id = event.item_id, kind = %event.kind))]
    pub async fn report_behavior(&self, event: BehaviorEvent) -> Result<()> {
        if event.user_id == 0 {
            return Err(RecommendError::Validation("user_id is required".to_string()));
        }
        if event.item_id == 0 {
            return Err(RecommendError::Validation("item_id is required".to_string()));
        }
        if event.score.is_some_and(|s| !s.is_finite()) {
            return Err(RecommendError::Validation(
                "score must be a finite number".to_string(),
            ));
        }

        self.store.insert_behavior(&event).await?;

        if event.item_kind == ItemKind::Article {
            let filter = Arc::clone(&self.filter);
            let rating = self.weighting.implicit_rating(event.kind, event.score);
            let (user_id, item_id) = (event.user_id, event.item_id);
            if let Err(e) = self.tasks.spawn("rating_update", async move {
                filter.add_rating(user_id, item_id, rating);
                Ok(())
            }) {
                warn!(error = %e, "Rating update not scheduled");
            }
        }

        let service = self.clone();
        let user_id = event.user_id;
        if let Err(e) = self.tasks.spawn("profile_rebuild", async move {
            service.update_user_profile(user_id).await.map(|_| ())
        }) {
            warn!(error = %e, "Profile rebuild not scheduled");
        }

        Ok(())
    }

    /// Rebuild the rating matrix from the recent behavior window and retrain
    ///
    /// Ratings older than the window, or deleted by retention cleanup, do not
    /// survive into the next model.
    #[instrument(skip(self))]
    pub async fn train_model(&self) -> Result<TrainingReport> {
        let schedule = &self.config.schedule;
        let behaviors = self
            .store
            .behaviors_since(schedule.training_window_hours, schedule.training_max_events)
            .await?;

        // oldest first so the most recent behavior on a pair wins
        let ratings: Vec<(UserId, ItemId, f64)> = behaviors
            .iter()
            .rev()
            .filter(|e| e.item_kind == ItemKind::Article)
            .map(|e| {
                (
                    e.user_id,
                    e.item_id,
                    self.weighting.implicit_rating(e.kind, e.score),
                )
            })
            .collect();
        info!(
            behaviors = behaviors.len(),
            ratings = ratings.len(),
            "Training model"
        );
        self.filter.reload_ratings(ratings);

        let filter = Arc::clone(&self.filter);
        let report = tokio::task::spawn_blocking(move || filter.train())
            .await
            .map_err(|e| RecommendError::Training(e.to_string()))?;
        Ok(report)
    }

    /// Cached profile, then the stored one, then the empty profile
    pub async fn get_user_profile(&self, user_id: UserId) -> Result<UserProfile> {
        if user_id == 0 {
            return Err(RecommendError::Validation("user_id is required".to_string()));
        }

        let key = profile_key(user_id);
        if let Some(profile) = self.cache.get::<UserProfile>(&key).await {
            return Ok(profile);
        }

        let Some(stored) = self.store.load_profile(user_id).await? else {
            debug!(user_id, "No stored profile, using empty profile");
            return Ok(UserProfile::empty(user_id));
        };

        match UserProfile::from_stored(stored) {
            Ok(profile) => {
                self.cache
                    .set(&key, &profile, self.config.cache.profile_ttl)
                    .await;
                Ok(profile)
            }
            Err(e) => {
                warn!(user_id, error = %e, "Stored profile unreadable, using empty profile");
                Ok(UserProfile::empty(user_id))
            }
        }
    }

    /// Rebuild, persist and cache a user's profile
    #[instrument(skip(self))]
    pub async fn update_user_profile(&self, user_id: UserId) -> Result<UserProfile> {
        if user_id == 0 {
            return Err(RecommendError::Validation("user_id is required".to_string()));
        }

        let profile = self.profiles.build_profile(user_id).await?;
        self.store.save_profile(&profile.to_stored()?).await?;
        self.cache
            .set(&profile_key(user_id), &profile, self.config.cache.profile_ttl)
            .await;

        debug!(user_id, interests = profile.interests.len(), "Profile updated");
        Ok(profile)
    }

    /// Rebuild profiles of users active in the last `hours`, at most
    /// `concurrency` at a time
    #[instrument(skip(self))]
    pub async fn refresh_active_profiles(
        &self,
        hours: i64,
        concurrency: usize,
    ) -> Result<RefreshReport> {
        if !(1..=MAX_WINDOW_HOURS).contains(&hours) {
            return Err(RecommendError::Validation(format!(
                "active window must lie in [1, {}] hours",
                MAX_WINDOW_HOURS
            )));
        }
        let users = self.store.active_users_since(hours).await?;
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut jobs = JoinSet::new();

        for user_id in users.iter().copied() {
            let service = self.clone();
            let permits = Arc::clone(&permits);
            jobs.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| RecommendError::Shutdown)?;
                service.update_user_profile(user_id).await.map(|_| ())
            });
        }

        let mut report = RefreshReport {
            total: users.len(),
            ..Default::default()
        };
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok(Ok(())) => report.succeeded += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(error = %e, "Profile refresh failed");
                }
                Err(e) => {
                    report.failed += 1;
                    error!(error = %e, "Profile refresh task aborted");
                }
            }
        }

        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            "Active profile refresh finished"
        );
        Ok(report)
    }

    /// Delete behaviors and recommendation logs older than `retention_days`
    #[instrument(skip(self))]
    pub async fn cleanup(&self, retention_days: i64) -> Result<CleanupReport> {
        if !(1..=MAX_RETENTION_DAYS).contains(&retention_days) {
            return Err(RecommendError::Validation(format!(
                "retention_days must lie in [1, {}]",
                MAX_RETENTION_DAYS
            )));
        }
        let cutoff = Utc::now() - Duration::days(retention_days);
        let behaviors_deleted = self.store.delete_behaviors_before(cutoff).await?;
        let logs_deleted = self.store.delete_recommendation_logs_before(cutoff).await?;

        info!(behaviors_deleted, logs_deleted, "Retention cleanup finished");
        Ok(CleanupReport {
            behaviors_deleted,
            logs_deleted,
        })
    }

    /// Reject new background work and wait for queued updates
    pub async fn shutdown(&self) {
        self.tasks.shutdown().await;
    }
}
