//! Biased matrix factorization trained with stochastic gradient descent
//!
//! Decomposes the rating matrix into user and item latent factors plus
//! per-user and per-item biases around the global mean:
//!
//! `predict(u, i) = clamp(mu + b_u + b_i + p_u . q_i, min_rating, max_rating)`

use crate::config::FactorizationConfig;
use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;
use tracing::debug;

/// Outcome of one training run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingReport {
    pub epochs_run: usize,
    pub initial_rmse: f64,
    pub final_rmse: f64,
    pub converged: bool,
}

/// Latent factor model sized to one matrix snapshot
///
/// Indices are only meaningful relative to the snapshot the model was built
/// for. When the user or item universe grows the model must be rebuilt.
#[derive(Debug, Clone)]
pub struct MatrixFactorizationModel {
    /// [num_users x factors]
    user_factors: Array2<f64>,
    /// [num_items x factors]
    item_factors: Array2<f64>,
    user_bias: Array1<f64>,
    item_bias: Array1<f64>,
    global_mean: f64,
    min_rating: f64,
    max_rating: f64,
}

impl MatrixFactorizationModel {
    /// Allocate a model with factors drawn from the thread RNG
    pub fn new(num_users: usize, num_items: usize, config: &FactorizationConfig) -> Self {
        Self::with_rng(num_users, num_items, config, &mut rand::thread_rng())
    }

    /// Allocate a model with factors drawn from `rng`
    pub fn with_rng<R: Rng>(
        num_users: usize,
        num_items: usize,
        config: &FactorizationConfig,
        rng: &mut R,
    ) -> Self {
        let k = config.factors;
        let range = config.init_range;

        let user_factors =
            Array2::from_shape_fn((num_users, k), |_| rng.gen_range(-range..=range));
        let item_factors =
            Array2::from_shape_fn((num_items, k), |_| rng.gen_range(-range..=range));

        Self {
            user_factors,
            item_factors,
            user_bias: Array1::zeros(num_users),
            item_bias: Array1::zeros(num_items),
            global_mean: (config.min_rating + config.max_rating) / 2.0,
            min_rating: config.min_rating,
            max_rating: config.max_rating,
        }
    }

    pub fn num_users(&self) -> usize {
        self.user_factors.nrows()
    }

    pub fn num_items(&self) -> usize {
        self.item_factors.nrows()
    }

    pub fn num_factors(&self) -> usize {
        self.user_factors.ncols()
    }

    pub fn global_mean(&self) -> f64 {
        self.global_mean
    }

    fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min_rating, self.max_rating)
    }

    /// Predicted rating, always within `[min_rating, max_rating]`
    ///
    /// Indices outside the trained universe fall back to the global mean.
    pub fn predict(&self, user_idx: usize, item_idx: usize) -> f64 {
        if user_idx >= self.num_users() || item_idx >= self.num_items() {
            return self.clamp(self.global_mean);
        }

        let dot = self
            .user_factors
            .row(user_idx)
            .dot(&self.item_factors.row(item_idx));

        self.clamp(self.global_mean + self.user_bias[user_idx] + self.item_bias[item_idx] + dot)
    }

    /// Root mean squared error over the given ratings
    pub fn rmse(&self, ratings: &[(usize, usize, f64)]) -> f64 {
        if ratings.is_empty() {
            return 0.0;
        }

        let sum: f64 = ratings
            .iter()
            .map(|&(u, i, r)| (r - self.predict(u, i)).powi(2))
            .sum();

        (sum / ratings.len() as f64).sqrt()
    }

    /// Run SGD over every known rating until the epoch budget is spent or
    /// RMSE drops below the convergence threshold
    ///
    /// A model with no users or no items is left untouched.
    pub fn train(
        &mut self,
        ratings: &[(usize, usize, f64)],
        config: &FactorizationConfig,
    ) -> TrainingReport {
        if self.num_users() == 0 || self.num_items() == 0 || ratings.is_empty() {
            return TrainingReport {
                epochs_run: 0,
                initial_rmse: 0.0,
                final_rmse: 0.0,
                converged: false,
            };
        }

        self.global_mean = ratings.iter().map(|&(_, _, r)| r).sum::<f64>() / ratings.len() as f64;

        let lr = config.learning_rate;
        let reg = config.regularization;
        let k = self.num_factors();
        let check_interval = config.rmse_check_interval.max(1);

        let initial_rmse = self.rmse(ratings);
        let mut final_rmse = initial_rmse;
        let mut epochs_run = 0;
        let mut converged = false;

        for epoch in 0..config.epochs {
            for &(u, i, rating) in ratings {
                if u >= self.num_users() || i >= self.num_items() {
                    continue;
                }

                let error = rating - self.predict(u, i);

                self.user_bias[u] += lr * (error - reg * self.user_bias[u]);
                self.item_bias[i] += lr * (error - reg * self.item_bias[i]);

                for f in 0..k {
                    let pu = self.user_factors[[u, f]];
                    let qi = self.item_factors[[i, f]];
                    self.user_factors[[u, f]] += lr * (error * qi - reg * pu);
                    self.item_factors[[i, f]] += lr * (error * pu - reg * qi);
                }
            }
            epochs_run = epoch + 1;

            if epochs_run % check_interval == 0 {
                final_rmse = self.rmse(ratings);
                debug!(epoch = epochs_run, rmse = final_rmse, "SGD epoch completed");

                if final_rmse < config.convergence_threshold {
                    converged = true;
                    break;
                }
            }
        }

        if epochs_run % check_interval != 0 {
            final_rmse = self.rmse(ratings);
        }

        TrainingReport {
            epochs_run,
            initial_rmse,
            final_rmse,
            converged,
        }
    }

    pub fn user_vector(&self, user_idx: usize) -> Option<ArrayView1<'_, f64>> {
        (user_idx < self.num_users()).then(|| self.user_factors.row(user_idx))
    }

    pub fn item_vector(&self, item_idx: usize) -> Option<ArrayView1<'_, f64>> {
        (item_idx < self.num_items()).then(|| self.item_factors.row(item_idx))
    }
}
