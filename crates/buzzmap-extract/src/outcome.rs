//! Thresholding and retry around a [`TextExtractor`], producing a tagged
//! per-post outcome.

use buzzmap_core::{ExtractedEntity, ScoredPost};

use crate::error::{ExtractionError, ExtractorError};
use crate::extractor::TextExtractor;
use crate::retry::retry_with_backoff;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractionSettings {
    pub confidence_threshold: f64,
    /// Applied when the collaborator reports no confidence.
    pub default_confidence: f64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            default_confidence: 0.8,
            max_attempts: 5,
            backoff_base_ms: 2_000,
        }
    }
}

#[derive(Debug)]
pub enum ExtractionOutcome {
    /// At least one entity cleared the threshold.
    Entities {
        entities: Vec<ExtractedEntity>,
        dropped_low_confidence: usize,
        malformed: usize,
    },
    /// Candidates existed but none cleared the threshold.
    LowConfidence { candidates: usize, malformed: usize },
    NoEntities { malformed: usize },
    Failed(ExtractionError),
}

impl ExtractionOutcome {
    #[must_use]
    pub fn entities(&self) -> &[ExtractedEntity] {
        match self {
            ExtractionOutcome::Entities { entities, .. } => entities,
            _ => &[],
        }
    }

    #[must_use]
    pub fn malformed(&self) -> usize {
        match self {
            ExtractionOutcome::Entities { malformed, .. }
            | ExtractionOutcome::LowConfidence { malformed, .. }
            | ExtractionOutcome::NoEntities { malformed } => *malformed,
            ExtractionOutcome::Failed(_) => 0,
        }
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, ExtractionOutcome::Failed(_))
    }
}

/// Runs a [`TextExtractor`] over scored posts.
pub struct EntityExtractor<E> {
    extractor: E,
    settings: ExtractionSettings,
}

impl<E: TextExtractor> EntityExtractor<E> {
    pub fn new(extractor: E, settings: ExtractionSettings) -> Self {
        Self {
            extractor,
            settings,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &ExtractionSettings {
        &self.settings
    }

    /// Extract restaurant entities from one post.
    ///
    /// Retryable collaborator failures are retried with back-off up to
    /// `max_attempts`; candidates without a name are counted as malformed and
    /// candidates below `confidence_threshold` are dropped.
    pub async fn extract(&self, scored: &ScoredPost) -> ExtractionOutcome {
        let post = &scored.post;
        if post.text.trim().is_empty() {
            return ExtractionOutcome::NoEntities { malformed: 0 };
        }

        let result = retry_with_backoff(
            self.settings.max_attempts,
            self.settings.backoff_base_ms,
            || self.extractor.extract(&post.text),
        )
        .await;

        let candidates = match result {
            Ok(candidates) => candidates,
            Err(err) => {
                let retryable = ExtractorError::is_retryable(&err);
                tracing::warn!(
                    platform = %post.platform,
                    post_id = %post.post_id,
                    provider = self.extractor.name(),
                    retryable,
                    error = %err,
                    "extraction failed, skipping post for this run"
                );
                return ExtractionOutcome::Failed(ExtractionError {
                    post_id: post.post_id.clone(),
                    retryable,
                    source: err,
                });
            }
        };

        let mut malformed = 0usize;
        let mut dropped = 0usize;
        let mut entities = Vec::new();

        for candidate in candidates {
            let Some(name) = candidate.name.filter(|n| !n.trim().is_empty()) else {
                malformed += 1;
                continue;
            };
            let confidence = candidate
                .confidence
                .unwrap_or(self.settings.default_confidence);
            if confidence < self.settings.confidence_threshold {
                dropped += 1;
                continue;
            }
            entities.push(ExtractedEntity {
                platform: post.platform,
                source_post_id: post.post_id.clone(),
                post_url: post.url.clone(),
                restaurant_name: name.trim().to_owned(),
                raw_address: candidate.address,
                confidence,
                buzz_score: scored.buzz_score,
                posted_at: post.timestamp,
            });
        }

        tracing::debug!(
            post_id = %post.post_id,
            kept = entities.len(),
            dropped_low_confidence = dropped,
            malformed,
            "extracted candidates"
        );

        if !entities.is_empty() {
            ExtractionOutcome::Entities {
                entities,
                dropped_low_confidence: dropped,
                malformed,
            }
        } else if dropped > 0 {
            ExtractionOutcome::LowConfidence {
                candidates: dropped,
                malformed,
            }
        } else {
            ExtractionOutcome::NoEntities { malformed }
        }
    }
}
