use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::stage::RunStage;

/// Per-stage item counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub collected: usize,
    pub collection_errors: usize,
    pub scored: usize,
    pub posts_with_entities: usize,
    pub entities: usize,
    pub dropped_low_confidence: usize,
    pub malformed_candidates: usize,
    pub posts_without_entities: usize,
    pub extraction_failed: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub geocode_failed: usize,
    pub inserted: usize,
    pub merged: usize,
    pub commit_failed: usize,
}

impl RunCounts {
    /// Records written this run.
    #[must_use]
    pub fn committed(&self) -> usize {
        self.inserted + self.merged
    }

    /// Items excluded by a permanent or exhausted error.
    #[must_use]
    pub fn failed_items(&self) -> usize {
        self.collection_errors + self.extraction_failed + self.geocode_failed + self.commit_failed
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed { stage: RunStage, message: String },
    /// Shutdown stopped the run between items.
    Cancelled { stage: RunStage },
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub counts: RunCounts,
    pub outcome: RunOutcome,
}

impl RunReport {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }

    /// Stage the run stopped in, when it did not succeed.
    #[must_use]
    pub fn stopped_stage(&self) -> Option<RunStage> {
        match &self.outcome {
            RunOutcome::Succeeded => None,
            RunOutcome::Failed { stage, .. } | RunOutcome::Cancelled { stage } => Some(*stage),
        }
    }
}
