use std::sync::Arc;

use anyhow::Context;
use buzzmap_core::{AppConfig, DatasetStore, GeocodeCache};
use buzzmap_db::{MemoryDatasetStore, PgDatasetStore, PgGeocodeCache};
use buzzmap_geocode::MemoryGeocodeCache;
use buzzmap_pipeline::{
    JournaledRunner, Pipeline, RunContext, RunCoordinator, RunOutcome, RunReport, TriggerSource,
};

/// Run the pipeline once in the foreground.
///
/// A dry run keeps everything in memory and prints what would have been
/// committed; otherwise the run is journaled and written to Postgres, and
/// Ctrl-C cancels it between items.
pub(crate) async fn run_once(config: &AppConfig, dry_run: bool) -> anyhow::Result<()> {
    let sources = buzzmap_core::load_sources(&config.sources_path)
        .with_context(|| format!("loading {}", config.sources_path.display()))?;

    let report = if dry_run {
        let store = Arc::new(MemoryDatasetStore::new(config.max_post_refs));
        let cache: Arc<dyn GeocodeCache> = Arc::new(MemoryGeocodeCache::new());
        let pipeline = Pipeline::from_config(
            config,
            &sources,
            Arc::clone(&store) as Arc<dyn DatasetStore>,
            cache,
        )?;
        let report = pipeline.run(&RunContext::detached()).await;

        let mut records = store.all().await;
        records.sort_by(|a, b| b.buzz_score.total_cmp(&a.buzz_score));
        for record in &records {
            let location = record.coordinates.map_or_else(
                || "unresolved".to_string(),
                |c| format!("{:.5},{:.5}", c.lat(), c.lon()),
            );
            println!(
                "{:>9.1}  {:<32}  {:<22}  {}",
                record.buzz_score,
                record.name,
                location,
                record.address.as_deref().unwrap_or("-"),
            );
        }
        report
    } else {
        let pool_config = buzzmap_db::PoolConfig::from_app_config(config);
        let pool = buzzmap_db::connect_pool(&config.database_url, pool_config).await?;
        let store: Arc<dyn DatasetStore> =
            Arc::new(PgDatasetStore::new(pool.clone(), config.max_post_refs));
        let cache: Arc<dyn GeocodeCache> = Arc::new(PgGeocodeCache::new(pool.clone()));
        let pipeline = Arc::new(Pipeline::from_config(config, &sources, store, cache)?);
        let coordinator = RunCoordinator::new(Arc::new(JournaledRunner::new(pipeline, pool)));

        coordinator.trigger(TriggerSource::Cli);
        tokio::select! {
            () = coordinator.wait_idle() => {}
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "failed to listen for ctrl-c");
                }
                tracing::info!("interrupted, cancelling run");
                coordinator.shutdown().await;
            }
        }

        coordinator
            .last_report()
            .context("pipeline run ended without a report")?
    };

    print_summary(&report, dry_run);
    match report.outcome {
        RunOutcome::Succeeded => Ok(()),
        RunOutcome::Failed { stage, message } => {
            anyhow::bail!("pipeline run failed while {stage}: {message}")
        }
        RunOutcome::Cancelled { stage } => anyhow::bail!("pipeline run cancelled while {stage}"),
    }
}

fn print_summary(report: &RunReport, dry_run: bool) {
    let counts = &report.counts;
    let elapsed = report.finished_at - report.started_at;
    println!();
    println!(
        "{} finished in {} ms",
        if dry_run { "dry run" } else { "run" },
        elapsed.num_milliseconds()
    );
    println!(
        "  collected {} post(s), {} platform error(s)",
        counts.collected, counts.collection_errors
    );
    println!(
        "  extracted {} entit(ies) from {} post(s); {} failed, {} low confidence",
        counts.entities,
        counts.posts_with_entities,
        counts.extraction_failed,
        counts.dropped_low_confidence
    );
    println!(
        "  geocoded {} resolved, {} unresolved, {} failed",
        counts.resolved, counts.unresolved, counts.geocode_failed
    );
    println!(
        "  committed {} new, {} merged, {} failed",
        counts.inserted, counts.merged, counts.commit_failed
    );
}
