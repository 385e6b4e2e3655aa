//! Single-flight run coordination.
//!
//! At most one run executes at a time. A trigger that arrives during a run
//! fills a one-slot pending queue; further triggers coalesce into it.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tokio::sync::watch;

use crate::report::{RunCounts, RunOutcome, RunReport};
use crate::stage::{RunStage, RunState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Scheduler,
    Cli,
}

impl TriggerSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerSource::Scheduler => "scheduler",
            TriggerSource::Cli => "cli",
        }
    }
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    Queued,
    /// A run was already pending; this trigger merged into it.
    Coalesced,
    ShuttingDown,
}

/// Handed to each run: a cancellation signal and the shared state channel.
#[derive(Debug, Clone)]
pub struct RunContext {
    cancel: watch::Receiver<bool>,
    state: Arc<watch::Sender<RunState>>,
}

impl RunContext {
    /// A context not attached to any coordinator, for one-off runs.
    #[must_use]
    pub fn detached() -> Self {
        let (_cancel_tx, cancel) = watch::channel(false);
        let (state, _state_rx) = watch::channel(RunState::Idle);
        Self {
            cancel,
            state: Arc::new(state),
        }
    }

    #[cfg(test)]
    pub(crate) fn cancelled() -> Self {
        let (_cancel_tx, cancel) = watch::channel(true);
        let (state, _state_rx) = watch::channel(RunState::Idle);
        Self {
            cancel,
            state: Arc::new(state),
        }
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub fn enter(&self, stage: RunStage) {
        tracing::debug!(stage = %stage, "entering stage");
        self.state.send_replace(RunState::Running(stage));
    }

    pub fn fail(&self, stage: RunStage) {
        self.state.send_replace(RunState::Failed(stage));
    }
}

/// Something that performs one run.
#[async_trait]
pub trait RunExecutor: Send + Sync + 'static {
    async fn execute(&self, trigger: TriggerSource, ctx: RunContext) -> RunReport;
}

#[derive(Debug, Default)]
struct Slots {
    running: bool,
    pending: Option<TriggerSource>,
    shutting_down: bool,
}

struct Inner {
    executor: Arc<dyn RunExecutor>,
    slots: Mutex<Slots>,
    busy_tx: watch::Sender<bool>,
    state_tx: Arc<watch::Sender<RunState>>,
    cancel_tx: watch::Sender<bool>,
    completed_runs: AtomicU64,
    last_report: Mutex<Option<RunReport>>,
}

#[derive(Clone)]
pub struct RunCoordinator {
    inner: Arc<Inner>,
}

impl RunCoordinator {
    pub fn new(executor: Arc<dyn RunExecutor>) -> Self {
        let (busy_tx, _) = watch::channel(false);
        let (state_tx, _) = watch::channel(RunState::Idle);
        let (cancel_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                executor,
                slots: Mutex::new(Slots::default()),
                busy_tx,
                state_tx: Arc::new(state_tx),
                cancel_tx,
                completed_runs: AtomicU64::new(0),
                last_report: Mutex::new(None),
            }),
        }
    }

    /// Request a run. Never blocks on the run itself.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn trigger(&self, source: TriggerSource) -> TriggerOutcome {
        let mut slots = self
            .inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if slots.shutting_down {
            return TriggerOutcome::ShuttingDown;
        }
        if slots.running {
            let outcome = if slots.pending.is_none() {
                slots.pending = Some(source);
                TriggerOutcome::Queued
            } else {
                TriggerOutcome::Coalesced
            };
            tracing::info!(trigger = %source, ?outcome, "run already in progress");
            return outcome;
        }

        slots.running = true;
        self.inner.busy_tx.send_replace(true);
        drop(slots);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.drive(source).await });
        TriggerOutcome::Started
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        *self.inner.state_tx.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.inner.state_tx.subscribe()
    }

    #[must_use]
    pub fn completed_runs(&self) -> u64 {
        self.inner.completed_runs.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn last_report(&self) -> Option<RunReport> {
        self.inner
            .last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolves once no run is executing or pending.
    pub async fn wait_idle(&self) {
        let mut busy = self.inner.busy_tx.subscribe();
        let _ = busy.wait_for(|b| !*b).await;
    }

    /// Drop any pending run, cancel the current one between items, and wait
    /// for it to stop.
    pub async fn shutdown(&self) {
        {
            let mut slots = self
                .inner
                .slots
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            slots.shutting_down = true;
            slots.pending = None;
        }
        self.inner.cancel_tx.send_replace(true);
        self.wait_idle().await;
    }
}

impl Inner {
    /// A panicking run is reported as failed in the stage it reached so the
    /// coordinator stays usable.
    async fn execute_guarded(&self, source: TriggerSource, ctx: RunContext) -> RunReport {
        let started_at = Utc::now();
        match AssertUnwindSafe(self.executor.execute(source, ctx))
            .catch_unwind()
            .await
        {
            Ok(report) => report,
            Err(_) => {
                let stage = match *self.state_tx.borrow() {
                    RunState::Running(stage) | RunState::Failed(stage) => stage,
                    RunState::Idle => RunStage::Collecting,
                };
                tracing::error!(trigger = %source, stage = %stage, "pipeline run panicked");
                RunReport {
                    started_at,
                    finished_at: Utc::now(),
                    counts: RunCounts::default(),
                    outcome: RunOutcome::Failed {
                        stage,
                        message: "panicked".to_string(),
                    },
                }
            }
        }
    }

    async fn drive(&self, first: TriggerSource) {
        let mut next = Some(first);
        while let Some(source) = next {
            let ctx = RunContext {
                cancel: self.cancel_tx.subscribe(),
                state: Arc::clone(&self.state_tx),
            };
            tracing::info!(trigger = %source, "pipeline run starting");
            let report = self.execute_guarded(source, ctx).await;
            self.state_tx.send_replace(RunState::Idle);
            self.completed_runs.fetch_add(1, Ordering::SeqCst);
            *self
                .last_report
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(report);

            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            next = if slots.shutting_down {
                None
            } else {
                slots.pending.take()
            };
            if next.is_none() {
                slots.running = false;
                self.busy_tx.send_replace(false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::Semaphore;

    use super::*;

    /// Blocks each run until the test releases a permit.
    struct GatedExecutor {
        gate: Semaphore,
        runs: AtomicUsize,
        triggers: Mutex<Vec<TriggerSource>>,
    }

    impl GatedExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(0),
                runs: AtomicUsize::new(0),
                triggers: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl RunExecutor for GatedExecutor {
        async fn execute(&self, trigger: TriggerSource, ctx: RunContext) -> RunReport {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.triggers.lock().unwrap().push(trigger);
            ctx.enter(RunStage::Collecting);

            let mut cancel = ctx.cancel.clone();
            let outcome = tokio::select! {
                permit = self.gate.acquire() => {
                    permit.unwrap().forget();
                    RunOutcome::Succeeded
                }
                _ = cancel.wait_for(|c| *c) => RunOutcome::Cancelled {
                    stage: RunStage::Collecting,
                },
            };
            RunReport {
                started_at: Utc::now(),
                finished_at: Utc::now(),
                counts: RunCounts::default(),
                outcome,
            }
        }
    }

    async fn wait_for_state(coordinator: &RunCoordinator, state: RunState) {
        let mut rx = coordinator.subscribe();
        let _ = rx.wait_for(|s| *s == state).await;
    }

    #[tokio::test]
    async fn one_run_at_a_time_with_single_pending_slot() {
        let executor = GatedExecutor::new();
        let coordinator = RunCoordinator::new(Arc::clone(&executor) as Arc<dyn RunExecutor>);

        assert_eq!(coordinator.trigger(TriggerSource::Scheduler), TriggerOutcome::Started);
        wait_for_state(&coordinator, RunState::Running(RunStage::Collecting)).await;

        assert_eq!(coordinator.trigger(TriggerSource::Cli), TriggerOutcome::Queued);
        assert_eq!(coordinator.trigger(TriggerSource::Scheduler), TriggerOutcome::Coalesced);
        assert_eq!(coordinator.trigger(TriggerSource::Scheduler), TriggerOutcome::Coalesced);
        assert_eq!(executor.runs.load(Ordering::SeqCst), 1);

        executor.gate.add_permits(2);
        coordinator.wait_idle().await;

        assert_eq!(executor.runs.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.completed_runs(), 2);
        assert_eq!(
            *executor.triggers.lock().unwrap(),
            vec![TriggerSource::Scheduler, TriggerSource::Cli]
        );
        assert_eq!(coordinator.state(), RunState::Idle);
    }

    #[tokio::test]
    async fn idle_coordinator_starts_again_after_completion() {
        let executor = GatedExecutor::new();
        executor.gate.add_permits(2);
        let coordinator = RunCoordinator::new(Arc::clone(&executor) as Arc<dyn RunExecutor>);

        assert_eq!(coordinator.trigger(TriggerSource::Scheduler), TriggerOutcome::Started);
        coordinator.wait_idle().await;
        assert_eq!(coordinator.trigger(TriggerSource::Scheduler), TriggerOutcome::Started);
        coordinator.wait_idle().await;

        assert_eq!(coordinator.completed_runs(), 2);
        assert!(coordinator.last_report().unwrap().succeeded());
    }

    #[tokio::test]
    async fn shutdown_cancels_running_and_drops_pending() {
        let executor = GatedExecutor::new();
        let coordinator = RunCoordinator::new(Arc::clone(&executor) as Arc<dyn RunExecutor>);

        coordinator.trigger(TriggerSource::Scheduler);
        wait_for_state(&coordinator, RunState::Running(RunStage::Collecting)).await;
        assert_eq!(coordinator.trigger(TriggerSource::Cli), TriggerOutcome::Queued);

        coordinator.shutdown().await;

        assert_eq!(executor.runs.load(Ordering::SeqCst), 1);
        assert_eq!(
            coordinator.last_report().unwrap().outcome,
            RunOutcome::Cancelled {
                stage: RunStage::Collecting
            }
        );
        assert_eq!(
            coordinator.trigger(TriggerSource::Scheduler),
            TriggerOutcome::ShuttingDown
        );
    }

    /// Panics on its first run, succeeds afterwards.
    struct PanicOnceExecutor {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl RunExecutor for PanicOnceExecutor {
        async fn execute(&self, _trigger: TriggerSource, ctx: RunContext) -> RunReport {
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            ctx.enter(RunStage::Extracting);
            assert!(run > 0, "extractor blew up");
            RunReport {
                started_at: Utc::now(),
                finished_at: Utc::now(),
                counts: RunCounts::default(),
                outcome: RunOutcome::Succeeded,
            }
        }
    }

    #[tokio::test]
    async fn panicking_run_is_failed_and_does_not_block_the_next() {
        let executor = Arc::new(PanicOnceExecutor {
            runs: AtomicUsize::new(0),
        });
        let coordinator = RunCoordinator::new(Arc::clone(&executor) as Arc<dyn RunExecutor>);

        assert_eq!(coordinator.trigger(TriggerSource::Scheduler), TriggerOutcome::Started);
        tokio::time::timeout(std::time::Duration::from_secs(5), coordinator.wait_idle())
            .await
            .expect("coordinator went idle after the panic");

        assert_eq!(
            coordinator.last_report().unwrap().outcome,
            RunOutcome::Failed {
                stage: RunStage::Extracting,
                message: "panicked".to_string()
            }
        );
        assert_eq!(coordinator.state(), RunState::Idle);

        assert_eq!(coordinator.trigger(TriggerSource::Scheduler), TriggerOutcome::Started);
        tokio::time::timeout(std::time::Duration::from_secs(5), coordinator.wait_idle())
            .await
            .expect("second run finished");

        assert_eq!(executor.runs.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.completed_runs(), 2);
        assert!(coordinator.last_report().unwrap().succeeded());
    }
}
