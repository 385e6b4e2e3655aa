use anyhow::Context;
use buzzmap_core::{
    buzz_level, rank_search_results, AppConfig, BoundingRegion, Coordinates, DatasetStore,
};
use buzzmap_db::PgDatasetStore;
use chrono::{Duration, Utc};
use sqlx::PgPool;

/// Validate search arguments the same way the HTTP API does.
pub(crate) fn search_region(
    lat: f64,
    lon: f64,
    radius: Option<f64>,
    default_radius_km: f64,
    max_radius_km: f64,
) -> anyhow::Result<BoundingRegion> {
    let center = Coordinates::new(lat, lon)
        .context("lat must be within [-90, 90] and lon within [-180, 180]")?;
    let radius = radius.unwrap_or(default_radius_km);
    if !radius.is_finite() || radius <= 0.0 || radius > max_radius_km {
        anyhow::bail!("radius must be greater than 0 and at most {max_radius_km} km");
    }
    Ok(BoundingRegion::around(center, radius))
}

pub(crate) async fn search(
    pool: &PgPool,
    config: &AppConfig,
    lat: f64,
    lon: f64,
    radius: Option<f64>,
    json: bool,
) -> anyhow::Result<()> {
    let region = search_region(
        lat,
        lon,
        radius,
        config.query_default_radius_km,
        config.query_max_radius_km,
    )?;
    let store = PgDatasetStore::new(pool.clone(), config.max_post_refs);
    let records = store.query(&region).await?;

    let fresh_since = (config.freshness_days > 0)
        .then(|| Utc::now() - Duration::days(i64::from(config.freshness_days)));
    let hits = rank_search_results(records, &region, fresh_since);

    if json {
        let items: Vec<serde_json::Value> = hits
            .iter()
            .filter_map(|hit| {
                let c = hit.record.coordinates?;
                Some(serde_json::json!({
                    "name": hit.record.name,
                    "lat": c.lat(),
                    "lon": c.lon(),
                    "buzz_score": hit.record.buzz_score,
                    "buzz_level": buzz_level(hit.record.buzz_score),
                    "address": hit.record.address,
                    "distance_km": hit.distance_km,
                }))
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("no restaurants within {} km", region.radius_km);
        return Ok(());
    }
    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "{:>3}. {:<32} buzz {:>9.1} (level {})  {:>5.2} km  {}",
            rank + 1,
            hit.record.name,
            hit.record.buzz_score,
            buzz_level(hit.record.buzz_score),
            hit.distance_km,
            hit.record.address.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

pub(crate) async fn list_runs(pool: &PgPool, limit: i64) -> anyhow::Result<()> {
    let runs = buzzmap_db::list_pipeline_runs(pool, limit.clamp(1, 200)).await?;
    if runs.is_empty() {
        println!("no pipeline runs recorded");
        return Ok(());
    }
    for run in runs {
        let started = run
            .started_at
            .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string());
        let detail = match (&run.failed_stage, &run.error_message) {
            (Some(stage), Some(message)) => format!("{stage}: {message}"),
            (Some(stage), None) => stage.clone(),
            (None, Some(message)) => message.clone(),
            (None, None) => run.counts.to_string(),
        };
        println!(
            "{}  {:<9}  {:<9}  {}  {}",
            run.public_id, run.trigger_source, run.status, started, detail
        );
    }
    Ok(())
}
