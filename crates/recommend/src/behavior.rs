//! Behavior weighting and time decay
//!
//! Each behavior kind carries a relative interest strength. Older behaviors
//! decay exponentially with a fixed half-life, floored so they never vanish.

use crate::config::ProfileConfig;
use crate::types::BehaviorKind;

/// Weight table plus decay parameters
#[derive(Debug, Clone)]
pub struct BehaviorWeighting {
    view: f64,
    like: f64,
    comment: f64,
    share: f64,
    collect: f64,
    half_life_hours: f64,
    min_decay: f64,
}

impl Default for BehaviorWeighting {
    fn default() -> Self {
        Self::from_config(&ProfileConfig::default())
    }
}

impl BehaviorWeighting {
    pub fn from_config(config: &ProfileConfig) -> Self {
        Self {
            view: 1.0,
            like: 3.0,
            comment: 4.0,
            share: 4.0,
            collect: 5.0,
            half_life_hours: config.half_life_hours,
            min_decay: config.min_decay,
        }
    }

    /// Relative interest strength of a behavior kind
    pub fn weight(&self, kind: BehaviorKind) -> f64 {
        match kind {
            BehaviorKind::View => self.view,
            BehaviorKind::Like => self.like,
            BehaviorKind::Comment => self.comment,
            BehaviorKind::Share => self.share,
            BehaviorKind::Collect => self.collect,
        }
    }

    /// `max(0.5^(age / half_life), min_decay)`
    ///
    /// Negative ages (clock skew, future timestamps) count as fresh.
    pub fn time_decay(&self, age_hours: f64) -> f64 {
        let age = age_hours.max(0.0);
        let decay = 0.5_f64.powf(age / self.half_life_hours);
        decay.max(self.min_decay)
    }

    /// Multiplier derived from an explicit user score
    ///
    /// No score leaves the weight untouched; otherwise the score scales the
    /// weight between 0.5 (lowest rating) and 1.5 (highest rating).
    pub fn explicit_weight(&self, score: Option<f64>, max_rating: f64) -> f64 {
        match score {
            Some(score) if max_rating > 0.0 => 0.5 + (score / max_rating).clamp(0.0, 1.0),
            _ => 1.0,
        }
    }

    /// Value fed into the rating matrix for a behavior
    pub fn implicit_rating(&self, kind: BehaviorKind, score: Option<f64>) -> f64 {
        score.unwrap_or_else(|| self.weight(kind))
    }
}
