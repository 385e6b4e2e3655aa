//! Background job scheduler.
//!
//! Registers one cron job per configured expression. Every job only asks the
//! [`RunCoordinator`] for a run; single-flight and coalescing live there.

use buzzmap_pipeline::{RunCoordinator, TriggerSource};
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

/// Builds and starts the background job scheduler.
///
/// Returns the running [`JobScheduler`] handle, which must be kept alive for
/// the lifetime of the process. Dropping it shuts down all scheduled jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised, a
/// cron expression is rejected, or the scheduler fails to start.
pub async fn build_scheduler(
    coordinator: RunCoordinator,
    crons: &[String],
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    for cron in crons {
        register_pipeline_job(&scheduler, coordinator.clone(), cron).await?;
    }

    scheduler.start().await?;
    Ok(scheduler)
}

async fn register_pipeline_job(
    scheduler: &JobScheduler,
    coordinator: RunCoordinator,
    cron: &str,
) -> Result<(), JobSchedulerError> {
    let schedule = cron.to_owned();
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let coordinator = coordinator.clone();
        let schedule = schedule.clone();

        Box::pin(async move {
            let outcome = coordinator.trigger(TriggerSource::Scheduler);
            tracing::info!(schedule = %schedule, ?outcome, "scheduler: pipeline run requested");
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(schedule = cron, "scheduler: registered pipeline job");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use buzzmap_pipeline::{RunContext, RunCounts, RunExecutor, RunOutcome, RunReport};
    use chrono::Utc;

    use super::*;

    struct NoopExecutor;

    #[async_trait]
    impl RunExecutor for NoopExecutor {
        async fn execute(&self, _trigger: TriggerSource, _ctx: RunContext) -> RunReport {
            RunReport {
                started_at: Utc::now(),
                finished_at: Utc::now(),
                counts: RunCounts::default(),
                outcome: RunOutcome::Succeeded,
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_cron_is_rejected() {
        let coordinator = RunCoordinator::new(Arc::new(NoopExecutor));
        let result = build_scheduler(coordinator, &["every morning".to_owned()]).await;
        assert!(result.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn default_crons_register() {
        let coordinator = RunCoordinator::new(Arc::new(NoopExecutor));
        let crons = vec!["0 0 8,13,19 * * *".to_owned(), "0 30 3 * * SUN".to_owned()];
        let mut scheduler = build_scheduler(coordinator, &crons)
            .await
            .expect("valid crons should register");
        scheduler.shutdown().await.unwrap();
    }
}
