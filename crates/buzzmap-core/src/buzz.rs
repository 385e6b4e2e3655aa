//! Pure per-post trend scoring.
//!
//! `score = like_count * platform_weight * 0.5 ^ (age_hours / half_life_hours)`

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::posts::{Platform, RawPost, ScoredPost};
use crate::sources::SourcesFile;

#[derive(Debug, Clone, PartialEq)]
pub struct BuzzWeights {
    pub platform_weights: HashMap<Platform, f64>,
    pub half_life_hours: f64,
}

impl BuzzWeights {
    #[must_use]
    pub fn new(half_life_hours: f64) -> Self {
        Self {
            platform_weights: HashMap::new(),
            half_life_hours,
        }
    }

    #[must_use]
    pub fn with_weight(mut self, platform: Platform, weight: f64) -> Self {
        self.platform_weights.insert(platform, weight);
        self
    }

    /// Build weights from the configured sources.
    #[must_use]
    pub fn from_sources(sources: &SourcesFile, half_life_hours: f64) -> Self {
        let platform_weights = sources
            .sources
            .iter()
            .map(|s| (s.platform, s.weight))
            .collect();
        Self {
            platform_weights,
            half_life_hours,
        }
    }

    /// Unknown platforms weigh 1.0; negative or non-finite weights count as 0.
    #[must_use]
    pub fn weight_for(&self, platform: Platform) -> f64 {
        match self.platform_weights.get(&platform) {
            Some(w) if w.is_finite() => w.max(0.0),
            Some(_) => 0.0,
            None => 1.0,
        }
    }
}

/// Exponential half-life decay. Negative ages are clamped to zero.
#[must_use]
pub fn recency_decay(age_hours: f64, half_life_hours: f64) -> f64 {
    if !half_life_hours.is_finite() || half_life_hours <= 0.0 || age_hours.is_nan() {
        return 1.0;
    }
    0.5_f64.powf(age_hours.max(0.0) / half_life_hours)
}

#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn buzz_score(post: &RawPost, weights: &BuzzWeights, now: DateTime<Utc>) -> f64 {
    if post.like_count == 0 {
        return 0.0;
    }
    let age_hours = (now - post.timestamp).num_seconds() as f64 / 3600.0;
    let score =
        post.like_count as f64 * weights.weight_for(post.platform) * recency_decay(age_hours, weights.half_life_hours);
    if score.is_finite() {
        score.max(0.0)
    } else {
        0.0
    }
}

#[must_use]
pub fn score_post(post: RawPost, weights: &BuzzWeights, now: DateTime<Utc>) -> ScoredPost {
    let buzz_score = buzz_score(&post, weights, now);
    ScoredPost { post, buzz_score }
}

/// Map a score to a 1-5 band on a log10 scale.
#[must_use]
pub fn buzz_level(score: f64) -> u8 {
    match score {
        s if s.is_nan() || s < 10.0 => 1,
        s if s < 100.0 => 2,
        s if s < 1_000.0 => 3,
        s if s < 10_000.0 => 4,
        _ => 5,
    }
}
