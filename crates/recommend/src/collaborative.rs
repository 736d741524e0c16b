//! Collaborative filtering over the live rating matrix
//!
//! Ratings are written straight into the matrix. Training snapshots the
//! matrix, fits a freshly sized model off-lock, and swaps the result in so
//! concurrent readers see either the old model or the new one, never a mix.

use crate::config::FactorizationConfig;
use crate::matrix_factorization::{MatrixFactorizationModel, TrainingReport};
use crate::rating_matrix::RatingMatrix;
use crate::types::{ItemId, UserId};
use blog_platform_core::cosine_similarity;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// A trained model together with the id <-> index maps of its snapshot
#[derive(Debug)]
struct TrainedModel {
    model: MatrixFactorizationModel,
    user_index: HashMap<UserId, usize>,
    item_index: HashMap<ItemId, usize>,
    items: Vec<ItemId>,
    report: TrainingReport,
    trained_at: DateTime<Utc>,
}

impl TrainedModel {
    fn user_vector(&self, user_id: UserId) -> Option<Vec<f64>> {
        let idx = *self.user_index.get(&user_id)?;
        self.model.user_vector(idx).map(|row| row.to_vec())
    }

    fn item_vector(&self, item_id: ItemId) -> Option<Vec<f64>> {
        let idx = *self.item_index.get(&item_id)?;
        self.model.item_vector(idx).map(|row| row.to_vec())
    }
}

/// Point-in-time statistics for health reporting
#[derive(Debug, Clone, serde::Serialize)]
pub struct CollaborativeStats {
    pub users: usize,
    pub items: usize,
    pub ratings: usize,
    pub trained: bool,
    pub model_users: usize,
    pub model_items: usize,
    pub last_rmse: Option<f64>,
    pub trained_at: Option<DateTime<Utc>>,
}

/// Collaborative filter owning the rating matrix and the current model
pub struct CollaborativeFilter {
    config: FactorizationConfig,
    matrix: RatingMatrix,
    model: RwLock<Option<Arc<TrainedModel>>>,
    /// Serializes training runs within this process
    training: Mutex<()>,
}

impl CollaborativeFilter {
    pub fn new(config: FactorizationConfig) -> Self {
        Self {
            config,
            matrix: RatingMatrix::new(),
            model: RwLock::new(None),
            training: Mutex::new(()),
        }
    }

    pub fn matrix(&self) -> &RatingMatrix {
        &self.matrix
    }

    /// Upsert a rating, clamped to the configured range
    ///
    /// The model is not retrained; the rating takes effect on the next `train`.
    pub fn add_rating(&self, user_id: UserId, item_id: ItemId, rating: f64) {
        let rating = rating.clamp(self.config.min_rating, self.config.max_rating);
        self.matrix.set(user_id, item_id, rating);
    }

    /// Replace every rating with `ratings`, clamped like `add_rating`
    pub fn reload_ratings<I>(&self, ratings: I)
    where
        I: IntoIterator<Item = (UserId, ItemId, f64)>,
    {
        let (min, max) = (self.config.min_rating, self.config.max_rating);
        self.matrix.replace(
            ratings
                .into_iter()
                .map(|(user_id, item_id, rating)| (user_id, item_id, rating.clamp(min, max))),
        );
    }

    pub fn is_trained(&self) -> bool {
        self.model.read().is_some()
    }

    fn current(&self) -> Option<Arc<TrainedModel>> {
        self.model.read().clone()
    }

    /// Fit a new model on the current matrix and swap it in
    ///
    /// CPU-bound; async callers should run it on a blocking thread.
    pub fn train(&self) -> TrainingReport {
        let _guard = self.training.lock();

        let snapshot = self.matrix.snapshot();
        let started = std::time::Instant::now();

        let mut model = MatrixFactorizationModel::new(
            snapshot.users.len(),
            snapshot.items.len(),
            &self.config,
        );
        let report = model.train(&snapshot.ratings, &self.config);

        if report.epochs_run == 0 {
            info!(
                users = snapshot.users.len(),
                items = snapshot.items.len(),
                "Skipping model swap, nothing to train"
            );
            return report;
        }

        let trained = TrainedModel {
            model,
            user_index: snapshot
                .users
                .iter()
                .enumerate()
                .map(|(idx, id)| (*id, idx))
                .collect(),
            item_index: snapshot
                .items
                .iter()
                .enumerate()
                .map(|(idx, id)| (*id, idx))
                .collect(),
            items: snapshot.items,
            report,
            trained_at: Utc::now(),
        };

        *self.model.write() = Some(Arc::new(trained));

        info!(
            users = snapshot.users.len(),
            ratings = snapshot.ratings.len(),
            epochs = report.epochs_run,
            initial_rmse = report.initial_rmse,
            final_rmse = report.final_rmse,
            converged = report.converged,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Collaborative model trained"
        );

        report
    }

    /// Rank every trained item the user has neither rated nor excluded
    ///
    /// Empty for unknown users or before the first training run.
    pub fn recommend(
        &self,
        user_id: UserId,
        exclude_items: &[ItemId],
        limit: usize,
    ) -> Vec<(ItemId, f64)> {
        if limit == 0 {
            return Vec::new();
        }
        let Some(trained) = self.current() else {
            debug!(user_id, "No trained model available");
            return Vec::new();
        };
        let Some(&user_idx) = trained.user_index.get(&user_id) else {
            debug!(user_id, "User unknown to the trained model");
            return Vec::new();
        };

        let rated = self.matrix.get_user_ratings(user_id);
        let excluded: HashSet<ItemId> = exclude_items.iter().copied().collect();

        let mut scored: Vec<(ItemId, f64)> = trained
            .items
            .iter()
            .enumerate()
            .filter(|(_, item_id)| !rated.contains_key(item_id) && !excluded.contains(item_id))
            .map(|(item_idx, item_id)| (*item_id, trained.model.predict(user_idx, item_idx)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(limit);
        scored
    }

    /// Predicted rating for a pair, falling back to the model's global mean
    pub fn predict(&self, user_id: UserId, item_id: ItemId) -> Option<f64> {
        let trained = self.current()?;
        let u = trained.user_index.get(&user_id).copied().unwrap_or(usize::MAX);
        let i = trained.item_index.get(&item_id).copied().unwrap_or(usize::MAX);
        Some(trained.model.predict(u, i))
    }

    /// Cosine similarity of two users' latent vectors, 0.0 if either is unknown
    pub fn get_user_similarity(&self, a: UserId, b: UserId) -> f64 {
        let Some(trained) = self.current() else {
            return 0.0;
        };
        match (trained.user_vector(a), trained.user_vector(b)) {
            (Some(va), Some(vb)) => cosine_similarity(&va, &vb),
            _ => 0.0,
        }
    }

    /// Cosine similarity of two items' latent vectors, 0.0 if either is unknown
    pub fn get_item_similarity(&self, a: ItemId, b: ItemId) -> f64 {
        let Some(trained) = self.current() else {
            return 0.0;
        };
        match (trained.item_vector(a), trained.item_vector(b)) {
            (Some(va), Some(vb)) => cosine_similarity(&va, &vb),
            _ => 0.0,
        }
    }

    pub fn stats(&self) -> CollaborativeStats {
        let current = self.current();
        CollaborativeStats {
            users: self.matrix.num_users(),
            items: self.matrix.num_items(),
            ratings: self.matrix.num_ratings(),
            trained: current.is_some(),
            model_users: current.as_ref().map_or(0, |t| t.model.num_users()),
            model_items: current.as_ref().map_or(0, |t| t.model.num_items()),
            last_rmse: current.as_ref().map(|t| t.report.final_rmse),
            trained_at: current.as_ref().map(|t| t.trained_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_filter() -> CollaborativeFilter {
        let filter = CollaborativeFilter::new(FactorizationConfig {
            factors: 4,
            ..Default::default()
        });
        filter.add_rating(1, 10, 5.0);
        filter.add_rating(1, 11, 1.0);
        filter.add_rating(2, 10, 4.5);
        filter
    }

    #[test]
    fn test_untrained_filter_returns_nothing() {
        let filter = scenario_filter();
        assert!(!filter.is_trained());
        assert!(filter.recommend(2, &[], 5).is_empty());
        assert_eq!(filter.get_user_similarity(1, 2), 0.0);
        assert_eq!(filter.get_item_similarity(10, 11), 0.0);
        assert!(filter.predict(1, 10).is_none());
    }

    #[test]
    fn test_recommend_after_training_excludes_rated() {
        let filter = scenario_filter();
        let report = filter.train();
        assert!(report.epochs_run > 0);
        assert!(filter.is_trained());

        let recs = filter.recommend(2, &[], 5);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].0, 11);
        for (item, score) in &recs {
            assert_ne!(*item, 10);
            assert!((0.0..=5.0).contains(score));
        }
    }

    #[test]
    fn test_recommend_honors_exclusions_and_limit() {
        let filter = scenario_filter();
        filter.add_rating(3, 12, 3.0);
        filter.add_rating(3, 13, 4.0);
        filter.train();

        let recs = filter.recommend(2, &[11], 5);
        let ids: Vec<ItemId> = recs.iter().map(|r| r.0).collect();
        assert!(!ids.contains(&10));
        assert!(!ids.contains(&11));
        assert_eq!(ids.len(), 2);

        assert_eq!(filter.recommend(2, &[], 1).len(), 1);
        assert!(filter.recommend(2, &[], 0).is_empty());
    }

    #[test]
    fn test_unknown_user_gets_empty_result() {
        let filter = scenario_filter();
        filter.train();
        assert!(filter.recommend(42, &[], 5).is_empty());
    }

    #[test]
    fn test_new_users_after_training_are_not_in_model() {
        let filter = scenario_filter();
        filter.train();
        filter.add_rating(9, 10, 2.0);

        assert!(filter.recommend(9, &[], 5).is_empty());
        let predicted = filter.predict(9, 10).unwrap();
        assert!((0.0..=5.0).contains(&predicted));

        filter.train();
        assert_eq!(filter.stats().model_users, 3);
    }

    #[test]
    fn test_similarity_bounds() {
        let filter = scenario_filter();
        filter.train();

        let self_sim = filter.get_user_similarity(1, 1);
        assert!((self_sim - 1.0).abs() < 1e-9);

        let sim = filter.get_item_similarity(10, 11);
        assert!((-1.0..=1.0).contains(&sim));
        assert_eq!(filter.get_item_similarity(10, 999), 0.0);
    }

    #[test]
    fn test_ratings_are_clamped() {
        let filter = CollaborativeFilter::new(FactorizationConfig::default());
        filter.add_rating(1, 1, 12.0);
        filter.add_rating(1, 2, -3.0);
        assert_eq!(filter.matrix().get(1, 1), 5.0);
        assert_eq!(filter.matrix().get(1, 2), 0.0);
    }

    #[test]
    fn test_reload_replaces_and_clamps() {
        let filter = scenario_filter();
        filter.reload_ratings(vec![(1, 11, 2.0), (4, 14, 9.0)]);

        assert_eq!(filter.matrix().num_ratings(), 2);
        assert_eq!(filter.matrix().get(1, 10), 0.0);
        assert_eq!(filter.matrix().get(4, 14), 5.0);

        filter.train();
        assert_eq!(filter.stats().model_users, 2);
        assert!(filter.recommend(2, &[], 5).is_empty());
    }

    #[test]
    fn test_concurrent_readers_during_training() {
        let filter = Arc::new(scenario_filter());
        filter.train();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let filter = Arc::clone(&filter);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        for (_, score) in filter.recommend(2, &[], 5) {
                            assert!((0.0..=5.0).contains(&score));
                        }
                    }
                })
            })
            .collect();

        for _ in 0..3 {
            filter.train();
        }
        for reader in readers {
            reader.join().unwrap();
        }
        assert!(filter.is_trained());
    }
}
