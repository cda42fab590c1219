//! `PhaseCoordinator`: sequences a whole run through execution,
//! synthesis, and revision, per §4.7. [`crate::engine::ExecutionEngine`]
//! owns per-group consolidation internally; this coordinator only decides
//! what happens once every group is consolidated.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::EngineConfig;
use crate::engine::ExecutionEngine;
use crate::error::EngineError;
use crate::instance::InstanceHost;
use crate::observer::{Phase, SessionObserver};
use crate::revision::RevisionEngine;
use crate::sentinel::{TaskSentinel, TASK_SENTINEL_FILENAME};
use crate::synthesis::{SynthesisEngine, TaskSummary};

/// Outcome of a full coordinated run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// All groups consolidated and synthesis found nothing (or
    /// synthesis was disabled).
    Complete,
    /// Dispatch paused on a partial-group-failure decision; the caller
    /// must resolve it and invoke the coordinator again.
    AwaitingDecision,
    /// A Mode A consolidation paused on an unresolved cherry-pick conflict;
    /// the caller must resolve it on disk, call
    /// [`ExecutionEngine::resume_consolidation`], and invoke the
    /// coordinator again.
    AwaitingConflictResolution,
    /// Synthesis found nothing to revise, but `synthesis_auto_advance`
    /// is off: the caller must call [`PhaseCoordinator::approve_synthesis`]
    /// to finish the run.
    AwaitingSynthesisApproval,
    /// Revision rounds were exhausted with synthesis still unhappy.
    RevisionBudgetExhausted,
}

/// Drives one [`ExecutionEngine`] through its full lifecycle: dispatch,
/// then (if enabled) synthesis, then up to `config.max_revisions` rounds
/// of revision-then-resynthesis.
pub struct PhaseCoordinator {
    engine: Arc<ExecutionEngine>,
    config: EngineConfig,
    host: Arc<dyn InstanceHost>,
    observer: Option<Arc<dyn SessionObserver>>,
}

impl PhaseCoordinator {
    pub fn new(
        engine: Arc<ExecutionEngine>,
        config: EngineConfig,
        host: Arc<dyn InstanceHost>,
        observer: Option<Arc<dyn SessionObserver>>,
    ) -> Self {
        Self { engine, config, host, observer }
    }

    fn set_phase(&self, phase: Phase) {
        if let Some(observer) = &self.observer {
            observer.on_phase_change(phase);
        }
    }

    /// Run execution to completion (or to a paused decision point), then,
    /// if synthesis is enabled, the synthesis/revision loop.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunOutcome, EngineError> {
        self.set_phase(Phase::Executing);
        self.engine.execute(cancel.clone()).await?;

        if self.engine.is_awaiting_decision().await {
            return Ok(RunOutcome::AwaitingDecision);
        }

        if self.engine.is_consolidation_conflict_paused().await {
            return Ok(RunOutcome::AwaitingConflictResolution);
        }

        if !self.config.synthesis_enabled {
            self.set_phase(Phase::Complete);
            self.notify_complete(true, "execution complete, synthesis disabled");
            return Ok(RunOutcome::Complete);
        }

        self.synthesis_loop(cancel).await
    }

    /// Resume a coordinated run after a caller resolved a paused
    /// partial-failure decision (via one of `ExecutionEngine`'s decision
    /// methods). Re-enters `execute` to pick up where dispatch left off.
    pub async fn resume(&self, cancel: CancellationToken) -> Result<RunOutcome, EngineError> {
        self.run(cancel).await
    }

    /// Finish a run that paused at `AwaitingSynthesisApproval`.
    pub fn approve_synthesis(&self) -> RunOutcome {
        self.set_phase(Phase::Complete);
        self.notify_complete(true, "synthesis approved by operator");
        RunOutcome::Complete
    }

    async fn synthesis_loop(&self, cancel: CancellationToken) -> Result<RunOutcome, EngineError> {
        let mut revision_round = 0u32;

        loop {
            if cancel.is_cancelled() {
                self.set_phase(Phase::Cancelled);
                return Err(EngineError::Cancelled);
            }

            self.set_phase(Phase::Synthesis);
            let outcome = self.run_synthesis(revision_round).await?;

            if outcome.issues_needing_revision.is_empty() {
                if !self.config.synthesis_auto_advance {
                    return Ok(RunOutcome::AwaitingSynthesisApproval);
                }
                self.set_phase(Phase::Complete);
                self.notify_complete(true, "synthesis found no outstanding issues");
                return Ok(RunOutcome::Complete);
            }

            if revision_round >= self.config.max_revisions {
                self.set_phase(Phase::Failed);
                self.notify_complete(
                    false,
                    &format!("synthesis still reports issues after {revision_round} revision round(s)"),
                );
                return Ok(RunOutcome::RevisionBudgetExhausted);
            }

            revision_round += 1;
            self.set_phase(Phase::Revision);

            let revision_engine = RevisionEngine::new(
                Arc::clone(&self.host),
                self.config.poll_interval,
                max_polls(&self.config),
            );
            let locations = self.engine.task_locations().await;
            let results = revision_engine
                .run(&self.engine.plan().objective, revision_round, &outcome.issues_needing_revision, &locations)
                .await;

            for result in &results {
                info!(task_id = %result.task_id, succeeded = result.succeeded, "revision round finished for task");
            }
        }
    }

    async fn run_synthesis(&self, revision_round: u32) -> Result<crate::synthesis::SynthesisOutcome, EngineError> {
        let branch_name = self
            .engine
            .final_consolidated_branch()
            .await
            .ok_or_else(|| EngineError::Synthesis("no consolidated branch to review".to_string()))?;

        let info = self
            .engine
            .git()
            .create_worktree_from_branch(&format!("{branch_name}-synthesis"), &branch_name)
            .map_err(EngineError::Git)?;

        let summaries = self.collect_task_summaries().await;

        let synthesis_engine =
            SynthesisEngine::new(Arc::clone(&self.host), self.config.poll_interval, max_polls(&self.config));
        let result = synthesis_engine
            .run(&self.engine.plan().objective, &summaries, revision_round, &info.path, &branch_name)
            .await;

        let _ = self.engine.git().remove_worktree(&info.path);

        result.map_err(EngineError::Synthesis)
    }

    /// Build one [`TaskSummary`] per dispatched task from its original
    /// worktree's task sentinel, falling back to an empty summary if the
    /// sentinel can no longer be read (the worktree may already be gone).
    async fn collect_task_summaries(&self) -> Vec<TaskSummary> {
        let locations = self.engine.task_locations().await;
        let mut summaries = Vec::with_capacity(locations.len());

        for location in &locations {
            let task = self.engine.plan().find_task(&location.task_id);
            let title = task.map(|t| t.title.clone()).unwrap_or_else(|| location.task_id.clone());
            let sentinel: Option<TaskSentinel> =
                crate::sentinel::read_sentinel(&location.worktree_path, TASK_SENTINEL_FILENAME)
                    .unwrap_or(None);
            let commit_count = self.engine.commit_count(&location.task_id).await;

            summaries.push(TaskSummary {
                task_id: location.task_id.clone(),
                title,
                summary: sentinel.map(|s| s.summary).unwrap_or_default(),
                commit_count,
            });
        }

        summaries
    }

    fn notify_complete(&self, success: bool, summary: &str) {
        if let Some(observer) = &self.observer {
            observer.on_complete(success, summary);
        }
    }
}

fn max_polls(config: &EngineConfig) -> u32 {
    ((config.task_timeout.as_secs() / config.poll_interval.as_secs().max(1)).max(1)) as u32
}
