//! Records every run in `pipeline_runs`.

use std::sync::Arc;

use async_trait::async_trait;
use buzzmap_db::{
    complete_pipeline_run, create_pipeline_run, fail_pipeline_run, start_pipeline_run,
};
use sqlx::PgPool;

use crate::coordinator::{RunContext, RunExecutor, TriggerSource};
use crate::pipeline::Pipeline;
use crate::report::{RunOutcome, RunReport};

/// Wraps a [`Pipeline`] so each run is journaled
/// `queued -> running -> succeeded | failed`.
///
/// Journal writes are best-effort: a database hiccup while recording a run
/// is logged and never stops the run itself.
pub struct JournaledRunner {
    pipeline: Arc<Pipeline>,
    pool: PgPool,
}

impl JournaledRunner {
    #[must_use]
    pub fn new(pipeline: Arc<Pipeline>, pool: PgPool) -> Self {
        Self { pipeline, pool }
    }

    async fn open(&self, trigger: TriggerSource) -> Option<i64> {
        let run = match create_pipeline_run(&self.pool, trigger.as_str()).await {
            Ok(run) => run,
            Err(e) => {
                tracing::error!(
                    trigger = %trigger,
                    error = %e,
                    "failed to create pipeline run record"
                );
                return None;
            }
        };
        if let Err(e) = start_pipeline_run(&self.pool, run.id).await {
            tracing::error!(run_id = run.id, error = %e, "failed to mark pipeline run running");
            return None;
        }
        tracing::info!(
            run_id = run.id,
            public_id = %run.public_id,
            trigger = %trigger,
            "pipeline run journaled"
        );
        Some(run.id)
    }

    async fn close(&self, run_id: i64, report: &RunReport) {
        let counts = report.counts.to_json();
        let result = match &report.outcome {
            RunOutcome::Succeeded => complete_pipeline_run(&self.pool, run_id, &counts).await,
            RunOutcome::Failed { stage, message } => {
                fail_pipeline_run(&self.pool, run_id, stage.as_str(), message, &counts).await
            }
            RunOutcome::Cancelled { stage } => {
                fail_pipeline_run(&self.pool, run_id, stage.as_str(), "cancelled", &counts).await
            }
        };
        if let Err(e) = result {
            tracing::error!(run_id, error = %e, "failed to record pipeline run outcome");
        }
    }
}

#[async_trait]
impl RunExecutor for JournaledRunner {
    async fn execute(&self, trigger: TriggerSource, ctx: RunContext) -> RunReport {
        let run_id = self.open(trigger).await;
        let report = self.pipeline.run(&ctx).await;
        if let Some(run_id) = run_id {
            self.close(run_id, &report).await;
        }
        report
    }
}
