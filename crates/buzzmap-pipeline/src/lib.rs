//! Run orchestration: the staged pipeline, single-flight run coordination,
//! and the `pipeline_runs` journal.

pub mod coordinator;
pub mod error;
pub mod journal;
pub mod pipeline;
pub mod report;
pub mod stage;

pub use coordinator::{RunContext, RunCoordinator, RunExecutor, TriggerOutcome, TriggerSource};
pub use error::PipelineError;
pub use journal::JournaledRunner;
pub use pipeline::{Pipeline, PipelineParts, PipelineSettings};
pub use report::{RunCounts, RunOutcome, RunReport};
pub use stage::{RunStage, RunState};
