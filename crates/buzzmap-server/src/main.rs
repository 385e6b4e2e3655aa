mod api;
mod middleware;
mod scheduler;

use std::sync::Arc;

use anyhow::Context;
use buzzmap_core::{DatasetStore, GeocodeCache};
use buzzmap_db::{PgDatasetStore, PgGeocodeCache};
use buzzmap_pipeline::{JournaledRunner, Pipeline, RunCoordinator};
use tracing_subscriber::EnvFilter;

use crate::api::{build_app, default_rate_limit_state, AppState, SearchSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = buzzmap_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = buzzmap_db::PoolConfig::from_app_config(&config);
    let pool = buzzmap_db::connect_pool(&config.database_url, pool_config).await?;
    let applied = buzzmap_db::run_migrations(&pool).await?;
    tracing::info!(applied, "migrations up to date");

    let sources = buzzmap_core::load_sources(&config.sources_path)
        .with_context(|| format!("loading {}", config.sources_path.display()))?;

    let store: Arc<dyn DatasetStore> =
        Arc::new(PgDatasetStore::new(pool.clone(), config.max_post_refs));
    let cache: Arc<dyn GeocodeCache> = Arc::new(PgGeocodeCache::new(pool.clone()));
    let pipeline = Arc::new(Pipeline::from_config(
        &config,
        &sources,
        Arc::clone(&store),
        cache,
    )?);
    let coordinator = RunCoordinator::new(Arc::new(JournaledRunner::new(pipeline, pool.clone())));

    let mut scheduler =
        scheduler::build_scheduler(coordinator.clone(), &config.schedule_crons).await?;

    let app = build_app(
        AppState {
            pool,
            store,
            search: SearchSettings::from_app_config(&config),
            run_state: coordinator.subscribe(),
        },
        default_rate_limit_state(),
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!(error = %e, "scheduler did not shut down cleanly");
    }
    coordinator.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
