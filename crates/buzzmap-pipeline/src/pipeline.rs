//! The staged run: collect, score, extract, geocode, commit.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use buzzmap_collector::{collect_all, sources_from_config, CollectionError, PostSource};
use buzzmap_core::{
    merge_records, score_post, AppConfig, BuzzWeights, DatasetStore, ExtractedEntity,
    GeocodeCache, GeocodeStatus, GeocodedRestaurant, RawPost, RestaurantRecord, ScoredPost,
    SourcesFile, UpsertOutcome,
};
use buzzmap_extract::{
    EntityExtractor, ExtractionOutcome, ExtractionSettings, GeminiExtractor, TextExtractor,
};
use buzzmap_geocode::{
    Geocoder, GeocoderSettings, GeocodingProvider, NominatimClient, NominatimSettings,
};
use chrono::Utc;
use futures::stream::{self, StreamExt};

use crate::coordinator::{RunContext, RunExecutor, TriggerSource};
use crate::error::PipelineError;
use crate::report::{RunCounts, RunOutcome, RunReport};
use crate::stage::RunStage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub extract_concurrency: usize,
    pub geocode_concurrency: usize,
    pub commit_concurrency: usize,
    pub max_post_refs: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            extract_concurrency: 4,
            geocode_concurrency: 4,
            commit_concurrency: 4,
            max_post_refs: 20,
        }
    }
}

impl PipelineSettings {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            extract_concurrency: config.extract_concurrency.max(1),
            geocode_concurrency: config.geocode_concurrency.max(1),
            max_post_refs: config.max_post_refs,
            ..Self::default()
        }
    }
}

/// Everything a [`Pipeline`] is assembled from. Tests build this directly
/// with fakes; production code goes through [`Pipeline::from_config`].
pub struct PipelineParts {
    pub sources: Vec<Arc<dyn PostSource>>,
    /// Sources that could not be built, reported as collection errors on
    /// every run.
    pub unavailable_sources: Vec<CollectionError>,
    pub weights: BuzzWeights,
    pub extractor: Arc<dyn TextExtractor>,
    pub extraction: ExtractionSettings,
    pub provider: Arc<dyn GeocodingProvider>,
    pub cache: Arc<dyn GeocodeCache>,
    pub geocoding: GeocoderSettings,
    pub store: Arc<dyn DatasetStore>,
    pub settings: PipelineSettings,
}

pub struct Pipeline {
    sources: Vec<Arc<dyn PostSource>>,
    unavailable_sources: Vec<CollectionError>,
    weights: BuzzWeights,
    extractor: EntityExtractor<Arc<dyn TextExtractor>>,
    geocoder: Geocoder<Arc<dyn GeocodingProvider>, Arc<dyn GeocodeCache>>,
    store: Arc<dyn DatasetStore>,
    settings: PipelineSettings,
}

impl Pipeline {
    #[must_use]
    pub fn new(parts: PipelineParts) -> Self {
        Self {
            sources: parts.sources,
            unavailable_sources: parts.unavailable_sources,
            weights: parts.weights,
            extractor: EntityExtractor::new(parts.extractor, parts.extraction),
            geocoder: Geocoder::new(parts.provider, parts.cache, parts.geocoding),
            store: parts.store,
            settings: parts.settings,
        }
    }

    /// Wire the production adapters from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingCredential`] when no extraction API
    /// key is configured, [`PipelineError::InvalidSetting`] for a zero
    /// request rate, or an adapter construction error.
    pub fn from_config(
        config: &AppConfig,
        sources: &SourcesFile,
        store: Arc<dyn DatasetStore>,
        cache: Arc<dyn GeocodeCache>,
    ) -> Result<Self, PipelineError> {
        let (post_sources, unavailable_sources) = sources_from_config(config, sources);

        let api_key = config
            .gemini_api_key
            .as_deref()
            .ok_or(PipelineError::MissingCredential {
                var: "GEMINI_API_KEY",
            })?;
        let rpm = NonZeroU32::new(config.extract_requests_per_minute).ok_or_else(|| {
            PipelineError::InvalidSetting {
                name: "BUZZMAP_EXTRACT_REQUESTS_PER_MINUTE",
                reason: "must be greater than zero".to_owned(),
            }
        })?;
        let gemini = GeminiExtractor::new(
            api_key,
            &config.gemini_model,
            rpm,
            config.http_request_timeout_secs,
        )?;

        let nominatim = NominatimClient::new(&NominatimSettings {
            base_url: config.geocoder_base_url.clone(),
            country_codes: config.geocoder_country_codes.clone(),
            timeout_secs: config.http_request_timeout_secs,
            user_agent: config.http_user_agent.clone(),
        })?;

        Ok(Self::new(PipelineParts {
            sources: post_sources,
            unavailable_sources,
            weights: BuzzWeights::from_sources(sources, config.buzz_half_life_hours),
            extractor: Arc::new(gemini),
            extraction: ExtractionSettings {
                confidence_threshold: config.extract_confidence_threshold,
                default_confidence: config.extract_default_confidence,
                max_attempts: config.extract_max_attempts,
                backoff_base_ms: config.extract_backoff_base_ms,
            },
            provider: Arc::new(nominatim),
            cache,
            geocoding: GeocoderSettings {
                max_attempts: config.geocode_max_attempts,
                backoff_base_ms: config.http_retry_backoff_base_ms,
            },
            store,
            settings: PipelineSettings::from_config(config),
        }))
    }

    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Execute one full run. Never panics on item failures; the report
    /// carries per-stage counts and the outcome.
    pub async fn run(&self, ctx: &RunContext) -> RunReport {
        let started_at = Utc::now();
        let mut counts = RunCounts::default();

        let outcome = match self.run_stages(ctx, &mut counts).await {
            Ok(()) => RunOutcome::Succeeded,
            Err(stopped) => stopped,
        };
        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds();

        match &outcome {
            RunOutcome::Succeeded => tracing::info!(
                collected = counts.collected,
                entities = counts.entities,
                resolved = counts.resolved,
                unresolved = counts.unresolved,
                committed = counts.committed(),
                failed = counts.failed_items(),
                duration_ms,
                "pipeline run succeeded"
            ),
            RunOutcome::Failed { stage, message } => {
                ctx.fail(*stage);
                tracing::error!(
                    stage = %stage,
                    succeeded = counts.committed(),
                    failed = counts.failed_items(),
                    error = %message,
                    duration_ms,
                    "pipeline run failed"
                );
            }
            RunOutcome::Cancelled { stage } => tracing::warn!(
                stage = %stage,
                succeeded = counts.committed(),
                failed = counts.failed_items(),
                duration_ms,
                "pipeline run cancelled"
            ),
        }

        RunReport {
            started_at,
            finished_at,
            counts,
            outcome,
        }
    }

    async fn run_stages(&self, ctx: &RunContext, counts: &mut RunCounts) -> Result<(), RunOutcome> {
        let posts = self.collect(ctx, counts).await?;
        let scored = self.score(ctx, counts, posts)?;
        let entities = self.extract(ctx, counts, &scored).await?;
        let geocoded = self.geocode(ctx, counts, entities).await?;
        self.commit(ctx, counts, geocoded).await
    }

    async fn collect(
        &self,
        ctx: &RunContext,
        counts: &mut RunCounts,
    ) -> Result<Vec<RawPost>, RunOutcome> {
        ctx.enter(RunStage::Collecting);
        for unavailable in &self.unavailable_sources {
            tracing::warn!(
                platform = %unavailable.platform,
                error = %unavailable.source,
                "skipping unavailable source"
            );
        }
        if self.sources.is_empty() {
            counts.collection_errors = self.unavailable_sources.len();
            return Err(failed(RunStage::Collecting, "no post source is available"));
        }

        let report = collect_all(&self.sources).await;
        counts.collected = report.posts.len();
        counts.collection_errors = report.errors.len() + self.unavailable_sources.len();

        if report.succeeded.is_empty() && report.posts.is_empty() {
            return Err(failed(
                RunStage::Collecting,
                "every platform failed to collect",
            ));
        }
        checkpoint(ctx, RunStage::Collecting)?;
        Ok(report.posts)
    }

    fn score(
        &self,
        ctx: &RunContext,
        counts: &mut RunCounts,
        posts: Vec<RawPost>,
    ) -> Result<Vec<ScoredPost>, RunOutcome> {
        ctx.enter(RunStage::Scoring);
        let now = Utc::now();
        let mut scored: Vec<ScoredPost> = posts
            .into_iter()
            .map(|post| score_post(post, &self.weights, now))
            .collect();
        // Hottest posts reach the extractor first.
        scored.sort_by(|a, b| b.buzz_score.total_cmp(&a.buzz_score));
        counts.scored = scored.len();
        checkpoint(ctx, RunStage::Scoring)?;
        Ok(scored)
    }

    async fn extract(
        &self,
        ctx: &RunContext,
        counts: &mut RunCounts,
        scored: &[ScoredPost],
    ) -> Result<Vec<ExtractedEntity>, RunOutcome> {
        ctx.enter(RunStage::Extracting);
        let mut outcomes = stream::iter(scored.iter().cloned())
            .map(|post| async move {
                if ctx.is_cancelled() {
                    return None;
                }
                Some(self.extractor.extract(&post).await)
            })
            .buffer_unordered(self.settings.extract_concurrency.max(1));

        let mut entities = Vec::new();
        while let Some(outcome) = outcomes.next().await {
            let Some(outcome) = outcome else { continue };
            counts.malformed_candidates += outcome.malformed();
            match outcome {
                ExtractionOutcome::Entities {
                    entities: found,
                    dropped_low_confidence,
                    ..
                } => {
                    counts.posts_with_entities += 1;
                    counts.entities += found.len();
                    counts.dropped_low_confidence += dropped_low_confidence;
                    entities.extend(found);
                }
                ExtractionOutcome::LowConfidence { candidates, .. } => {
                    counts.posts_without_entities += 1;
                    counts.dropped_low_confidence += candidates;
                }
                ExtractionOutcome::NoEntities { .. } => counts.posts_without_entities += 1,
                ExtractionOutcome::Failed(_) => counts.extraction_failed += 1,
            }
        }
        drop(outcomes);

        checkpoint(ctx, RunStage::Extracting)?;
        Ok(entities)
    }

    async fn geocode(
        &self,
        ctx: &RunContext,
        counts: &mut RunCounts,
        entities: Vec<ExtractedEntity>,
    ) -> Result<Vec<GeocodedRestaurant>, RunOutcome> {
        ctx.enter(RunStage::Geocoding);
        let mut results = stream::iter(entities)
            .map(|entity| async move {
                if ctx.is_cancelled() {
                    return None;
                }
                let post_id = entity.source_post_id.clone();
                Some((post_id, self.geocoder.geocode(entity).await))
            })
            .buffer_unordered(self.settings.geocode_concurrency.max(1));

        let mut geocoded = Vec::new();
        while let Some(result) = results.next().await {
            match result {
                None => {}
                Some((_, Ok(restaurant))) => {
                    match restaurant.status {
                        GeocodeStatus::Resolved => counts.resolved += 1,
                        GeocodeStatus::Unresolved => counts.unresolved += 1,
                    }
                    geocoded.push(restaurant);
                }
                Some((post_id, Err(err))) => {
                    counts.geocode_failed += 1;
                    tracing::warn!(
                        post_id = %post_id,
                        error = %err,
                        "geocoding gave up, skipping entity this run"
                    );
                }
            }
        }
        drop(results);

        checkpoint(ctx, RunStage::Geocoding)?;
        Ok(geocoded)
    }

    async fn commit(
        &self,
        ctx: &RunContext,
        counts: &mut RunCounts,
        geocoded: Vec<GeocodedRestaurant>,
    ) -> Result<(), RunOutcome> {
        ctx.enter(RunStage::Committing);
        let records = group_by_identity(&geocoded, self.settings.max_post_refs);
        if records.is_empty() {
            return Ok(());
        }

        let total = records.len();
        let mut commits = stream::iter(records)
            .map(|record| async move {
                if ctx.is_cancelled() {
                    return None;
                }
                let result = self.store.upsert(&record).await;
                Some((record.identity, result))
            })
            .buffer_unordered(self.settings.commit_concurrency.max(1));

        let mut processed = 0usize;
        let mut last_error: Option<String> = None;
        while let Some(result) = commits.next().await {
            let Some((identity, result)) = result else { continue };
            processed += 1;
            match result {
                Ok(UpsertOutcome::Inserted) => counts.inserted += 1,
                Ok(UpsertOutcome::Merged) => counts.merged += 1,
                Err(err) => {
                    counts.commit_failed += 1;
                    tracing::warn!(
                        identity = %identity,
                        error = %err,
                        "failed to commit restaurant"
                    );
                    last_error = Some(err.to_string());
                }
            }
        }
        drop(commits);

        if counts.committed() == 0 && counts.commit_failed > 0 {
            let reason = last_error.unwrap_or_default();
            return Err(failed(
                RunStage::Committing,
                &format!("dataset store unreachable: {reason}"),
            ));
        }
        if processed < total {
            return Err(RunOutcome::Cancelled {
                stage: RunStage::Committing,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RunExecutor for Pipeline {
    async fn execute(&self, trigger: TriggerSource, ctx: RunContext) -> RunReport {
        tracing::debug!(trigger = %trigger, "executing pipeline");
        self.run(&ctx).await
    }
}

/// Fold this run's geocoded entities into one record per identity so a
/// restaurant mentioned by several posts costs one upsert.
fn group_by_identity(
    geocoded: &[GeocodedRestaurant],
    max_post_refs: usize,
) -> Vec<RestaurantRecord> {
    let seen_at = Utc::now();
    let mut by_identity: HashMap<String, RestaurantRecord> = HashMap::new();
    for restaurant in geocoded {
        let record = RestaurantRecord::from_geocoded(restaurant, seen_at);
        match by_identity.get_mut(&record.identity) {
            Some(prior) => *prior = merge_records(prior, &record, max_post_refs),
            None => {
                by_identity.insert(record.identity.clone(), record);
            }
        }
    }
    let mut records: Vec<_> = by_identity.into_values().collect();
    records.sort_by(|a, b| a.identity.cmp(&b.identity));
    records
}

fn failed(stage: RunStage, message: &str) -> RunOutcome {
    RunOutcome::Failed {
        stage,
        message: message.to_owned(),
    }
}

fn checkpoint(ctx: &RunContext, stage: RunStage) -> Result<(), RunOutcome> {
    if ctx.is_cancelled() {
        return Err(RunOutcome::Cancelled { stage });
    }
    Ok(())
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod tests;
