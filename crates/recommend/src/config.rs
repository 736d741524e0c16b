//! Recommendation engine configuration
//!
//! Every value can be overridden with a `BLOG_PLATFORM_RECOMMEND_*`
//! environment variable.

use blog_platform_core::{parse_env_var, ConfigLoader, PlatformError};
use std::time::Duration;

/// Longest accepted look-back window, in hours (ten years)
pub const MAX_WINDOW_HOURS: i64 = 10 * 365 * 24;

/// Longest accepted retention period, in days (ten years)
pub const MAX_RETENTION_DAYS: i64 = 10 * 365;

/// Matrix factorization hyper-parameters
#[derive(Debug, Clone)]
pub struct FactorizationConfig {
    /// Length of every latent vector
    pub factors: usize,
    pub learning_rate: f64,
    /// L2 penalty applied to biases and factors
    pub regularization: f64,
    /// Upper bound on SGD passes
    pub epochs: usize,
    /// Training stops once RMSE falls below this value
    pub convergence_threshold: f64,
    /// RMSE is evaluated every this many epochs
    pub rmse_check_interval: usize,
    /// Latent factors start uniformly in [-init_range, init_range]
    pub init_range: f64,
    pub min_rating: f64,
    pub max_rating: f64,
}

impl Default for FactorizationConfig {
    fn default() -> Self {
        Self {
            factors: 20,
            learning_rate: 0.01,
            regularization: 0.02,
            epochs: 100,
            convergence_threshold: 0.001,
            rmse_check_interval: 10,
            init_range: 0.05,
            min_rating: 0.0,
            max_rating: 5.0,
        }
    }
}

/// Profile aggregation settings
#[derive(Debug, Clone)]
pub struct ProfileConfig {
    /// Below this many behaviors a user keeps the empty profile
    pub min_behaviors: usize,
    /// Length of the ranked interest list
    pub top_interests: usize,
    /// Time decay half-life in hours
    pub half_life_hours: f64,
    /// Floor applied to the decay factor
    pub min_decay: f64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            min_behaviors: 3,
            top_interests: 10,
            half_life_hours: 30.0 * 24.0,
            min_decay: 0.1,
        }
    }
}

/// Cache TTLs
#[derive(Debug, Clone)]
pub struct CacheTtlConfig {
    pub recommendation_ttl: Duration,
    pub profile_ttl: Duration,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            recommendation_ttl: Duration::from_secs(30 * 60),
            profile_ttl: Duration::from_secs(3600),
        }
    }
}

/// Background job schedule and windows
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Full model retrain interval (1 hour)
    pub retrain_interval: Duration,
    /// Active-user profile refresh interval (10 minutes)
    pub profile_refresh_interval: Duration,
    /// Retention cleanup interval (24 hours)
    pub cleanup_interval: Duration,
    /// Behavior history window fed into training, in hours
    pub training_window_hours: i64,
    /// Maximum number of behaviors loaded for one training run
    pub training_max_events: i64,
    /// Users active within this many hours get their profile refreshed
    pub active_user_window_hours: i64,
    /// Behaviors and recommendation logs older than this are deleted
    pub retention_days: i64,
    /// Concurrent profile rebuilds during a refresh
    pub refresh_concurrency: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            retrain_interval: Duration::from_secs(3600),
            profile_refresh_interval: Duration::from_secs(600),
            cleanup_interval: Duration::from_secs(24 * 3600),
            training_window_hours: 30 * 24,
            training_max_events: 100_000,
            active_user_window_hours: 1,
            retention_days: 90,
            refresh_concurrency: 10,
        }
    }
}

/// Top-level recommendation engine configuration
#[derive(Debug, Clone)]
pub struct RecommendConfig {
    pub factorization: FactorizationConfig,
    pub profile: ProfileConfig,
    pub cache: CacheTtlConfig,
    pub schedule: ScheduleConfig,
    /// Window of behavior counts used for the popularity ranking, in hours
    pub popular_window_hours: i64,
    /// Hard cap on the requested result size
    pub max_limit: usize,
    /// Concurrent behavior-triggered background updates
    pub background_concurrency: usize,
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self {
            factorization: FactorizationConfig::default(),
            profile: ProfileConfig::default(),
            cache: CacheTtlConfig::default(),
            schedule: ScheduleConfig::default(),
            popular_window_hours: 7 * 24,
            max_limit: 100,
            background_concurrency: 16,
        }
    }
}

fn invalid(key: &str, message: impl Into<String>) -> PlatformError {
    PlatformError::Configuration {
        message: message.into(),
        key: Some(key.to_string()),
    }
}

impl ConfigLoader for RecommendConfig {
    fn from_env() -> Result<Self, PlatformError> {
        let d = RecommendConfig::default();

        let factorization = FactorizationConfig {
            factors: parse_env_var("BLOG_PLATFORM_RECOMMEND_FACTORS", d.factorization.factors)?,
            learning_rate: parse_env_var(
                "BLOG_PLATFORM_RECOMMEND_LEARNING_RATE",
                d.factorization.learning_rate,
            )?,
            regularization: parse_env_var(
                "BLOG_PLATFORM_RECOMMEND_REGULARIZATION",
                d.factorization.regularization,
            )?,
            epochs: parse_env_var("BLOG_PLATFORM_RECOMMEND_EPOCHS", d.factorization.epochs)?,
            convergence_threshold: parse_env_var(
                "BLOG_PLATFORM_RECOMMEND_CONVERGENCE_THRESHOLD",
                d.factorization.convergence_threshold,
            )?,
            rmse_check_interval: parse_env_var(
                "BLOG_PLATFORM_RECOMMEND_RMSE_CHECK_INTERVAL",
                d.factorization.rmse_check_interval,
            )?,
            init_range: d.factorization.init_range,
            min_rating: parse_env_var(
                "BLOG_PLATFORM_RECOMMEND_MIN_RATING",
                d.factorization.min_rating,
            )?,
            max_rating: parse_env_var(
                "BLOG_PLATFORM_RECOMMEND_MAX_RATING",
                d.factorization.max_rating,
            )?,
        };

        let profile = ProfileConfig {
            min_behaviors: parse_env_var(
                "BLOG_PLATFORM_RECOMMEND_MIN_BEHAVIORS",
                d.profile.min_behaviors,
            )?,
            top_interests: parse_env_var(
                "BLOG_PLATFORM_RECOMMEND_TOP_INTERESTS",
                d.profile.top_interests,
            )?,
            half_life_hours: parse_env_var(
                "BLOG_PLATFORM_RECOMMEND_HALF_LIFE_HOURS",
                d.profile.half_life_hours,
            )?,
            min_decay: parse_env_var("BLOG_PLATFORM_RECOMMEND_MIN_DECAY", d.profile.min_decay)?,
        };

        let cache = CacheTtlConfig {
            recommendation_ttl: Duration::from_secs(parse_env_var(
                "BLOG_PLATFORM_RECOMMEND_RESULT_TTL",
                d.cache.recommendation_ttl.as_secs(),
            )?),
            profile_ttl: Duration::from_secs(parse_env_var(
                "BLOG_PLATFORM_RECOMMEND_PROFILE_TTL",
                d.cache.profile_ttl.as_secs(),
            )?),
        };

        let schedule = ScheduleConfig {
            retrain_interval: Duration::from_secs(parse_env_var(
                "BLOG_PLATFORM_RECOMMEND_RETRAIN_INTERVAL",
                d.schedule.retrain_interval.as_secs(),
            )?),
            profile_refresh_interval: Duration::from_secs(parse_env_var(
                "BLOG_PLATFORM_RECOMMEND_PROFILE_REFRESH_INTERVAL",
                d.schedule.profile_refresh_interval.as_secs(),
            )?),
            cleanup_interval: Duration::from_secs(parse_env_var(
                "BLOG_PLATFORM_RECOMMEND_CLEANUP_INTERVAL",
                d.schedule.cleanup_interval.as_secs(),
            )?),
            training_window_hours: parse_env_var(
                "BLOG_PLATFORM_RECOMMEND_TRAINING_WINDOW_HOURS",
                d.schedule.training_window_hours,
            )?,
            training_max_events: parse_env_var(
                "BLOG_PLATFORM_RECOMMEND_TRAINING_MAX_EVENTS",
                d.schedule.training_max_events,
            )?,
            active_user_window_hours: parse_env_var(
                "BLOG_PLATFORM_RECOMMEND_ACTIVE_USER_WINDOW_HOURS",
                d.schedule.active_user_window_hours,
            )?,
            retention_days: parse_env_var(
                "BLOG_PLATFORM_RECOMMEND_RETENTION_DAYS",
                d.schedule.retention_days,
            )?,
            refresh_concurrency: parse_env_var(
                "BLOG_PLATFORM_RECOMMEND_REFRESH_CONCURRENCY",
                d.schedule.refresh_concurrency,
            )?,
        };

        Ok(Self {
            factorization,
            profile,
            cache,
            schedule,
            popular_window_hours: parse_env_var(
                "BLOG_PLATFORM_RECOMMEND_POPULAR_WINDOW_HOURS",
                d.popular_window_hours,
            )?,
            max_limit: parse_env_var("BLOG_PLATFORM_RECOMMEND_MAX_LIMIT", d.max_limit)?,
            background_concurrency: parse_env_var(
                "BLOG_PLATFORM_RECOMMEND_BACKGROUND_CONCURRENCY",
                d.background_concurrency,
            )?,
        })
    }

    fn validate(&self) -> Result<(), PlatformError> {
        let f = &self.factorization;
        if f.factors == 0 {
            return Err(invalid(
                "BLOG_PLATFORM_RECOMMEND_FACTORS",
                "factors must be greater than 0",
            ));
        }
        if f.learning_rate <= 0.0 || f.regularization < 0.0 {
            return Err(invalid(
                "BLOG_PLATFORM_RECOMMEND_LEARNING_RATE",
                "learning_rate must be positive and regularization non-negative",
            ));
        }
        if f.rmse_check_interval == 0 {
            return Err(invalid(
                "BLOG_PLATFORM_RECOMMEND_RMSE_CHECK_INTERVAL",
                "rmse_check_interval must be greater than 0",
            ));
        }
        if f.min_rating >= f.max_rating {
            return Err(invalid(
                "BLOG_PLATFORM_RECOMMEND_MIN_RATING",
                format!(
                    "min_rating ({}) must be below max_rating ({})",
                    f.min_rating, f.max_rating
                ),
            ));
        }

        let p = &self.profile;
        if p.half_life_hours <= 0.0 {
            return Err(invalid(
                "BLOG_PLATFORM_RECOMMEND_HALF_LIFE_HOURS",
                "half_life_hours must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&p.min_decay) {
            return Err(invalid(
                "BLOG_PLATFORM_RECOMMEND_MIN_DECAY",
                "min_decay must lie in [0, 1]",
            ));
        }
        if p.top_interests == 0 {
            return Err(invalid(
                "BLOG_PLATFORM_RECOMMEND_TOP_INTERESTS",
                "top_interests must be greater than 0",
            ));
        }

        let s = &self.schedule;
        if s.retrain_interval.is_zero()
            || s.profile_refresh_interval.is_zero()
            || s.cleanup_interval.is_zero()
        {
            return Err(invalid(
                "BLOG_PLATFORM_RECOMMEND_RETRAIN_INTERVAL",
                "schedule intervals must be greater than 0",
            ));
        }
        if s.refresh_concurrency == 0 || self.background_concurrency == 0 {
            return Err(invalid(
                "BLOG_PLATFORM_RECOMMEND_REFRESH_CONCURRENCY",
                "concurrency limits must be greater than 0",
            ));
        }
        if s.training_max_events <= 0 {
            return Err(invalid(
                "BLOG_PLATFORM_RECOMMEND_TRAINING_MAX_EVENTS",
                "training_max_events must be greater than 0",
            ));
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&s.retention_days) {
            return Err(invalid(
                "BLOG_PLATFORM_RECOMMEND_RETENTION_DAYS",
                format!("retention_days must lie in [1, {}]", MAX_RETENTION_DAYS),
            ));
        }
        for (key, hours) in [
            (
                "BLOG_PLATFORM_RECOMMEND_TRAINING_WINDOW_HOURS",
                s.training_window_hours,
            ),
            (
                "BLOG_PLATFORM_RECOMMEND_ACTIVE_USER_WINDOW_HOURS",
                s.active_user_window_hours,
            ),
            (
                "BLOG_PLATFORM_RECOMMEND_POPULAR_WINDOW_HOURS",
                self.popular_window_hours,
            ),
        ] {
            if !(1..=MAX_WINDOW_HOURS).contains(&hours) {
                return Err(invalid(
                    key,
                    format!("window must lie in [1, {}] hours", MAX_WINDOW_HOURS),
                ));
            }
        }

        if self.max_limit == 0 {
            return Err(invalid(
                "BLOG_PLATFORM_RECOMMEND_MAX_LIMIT",
                "max_limit must be greater than 0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RecommendConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rating_range_validation() {
        let mut config = RecommendConfig::default();
        config.factorization.min_rating = 5.0;
        config.factorization.max_rating = 1.0;
        let err = config.validate().unwrap_err();
        assert_eq!(err.config_key(), Some("BLOG_PLATFORM_RECOMMEND_MIN_RATING"));
    }

    #[test]
    fn test_window_bounds() {
        let mut config = RecommendConfig {
            popular_window_hours: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.config_key(),
            Some("BLOG_PLATFORM_RECOMMEND_POPULAR_WINDOW_HOURS")
        );

        config.popular_window_hours = MAX_WINDOW_HOURS;
        assert!(config.validate().is_ok());

        config.schedule.training_window_hours = i64::MAX;
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.config_key(),
            Some("BLOG_PLATFORM_RECOMMEND_TRAINING_WINDOW_HOURS")
        );

        config.schedule.training_window_hours = 24;
        config.schedule.retention_days = i64::MAX / 2;
        let err = config.validate().unwrap_err();
        assert_eq!(err.config_key(), Some("BLOG_PLATFORM_RECOMMEND_RETENTION_DAYS"));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = RecommendConfig::default();
        config.schedule.refresh_concurrency = 0;
        assert!(config.validate().is_err());
    }
}
