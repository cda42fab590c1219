//! `ExecutionEngine`: bounded-parallel dispatch of a plan's groups, with
//! sentinel-driven completion detection, per-group consolidation, and the
//! partial-failure decision points that pause dispatch for an operator.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConsolidationModeKind, EngineConfig};
use crate::consolidate::{ConsolidationError, ConsolidationMode, ConsolidationOutcome, GroupConsolidator, TaskBranch};
use crate::error::EngineError;
use crate::git::GitOps;
use crate::instance::{Instance, InstanceHost, InstanceStatus};
use crate::observer::{Phase, SessionObserver};
use crate::plan::{Plan, Task};
use crate::sentinel::TASK_SENTINEL_FILENAME;
use crate::state::{ExecutionState, ExecutionStateSnapshot, GroupDecision};
use crate::tracker::GroupTracker;
use crate::verify::TaskVerifier;

/// What a task monitor reports back to the single completion consumer.
#[derive(Debug, Clone)]
struct TaskCompletion {
    task_id: String,
    success: bool,
    needs_retry: bool,
    error: Option<String>,
    commit_count: u32,
    files_modified: Vec<String>,
}

/// Where a task's worktree and branch live, plus its last known commit
/// count — the engine's bookkeeping for consolidation and redispatch.
#[derive(Debug, Clone)]
struct TaskRuntime {
    worktree_path: PathBuf,
    branch_name: String,
    commit_count: u32,
}

/// A Mode A consolidation paused mid cherry-pick by a conflict, per
/// [`EngineError::ConflictPause`]. Kept until [`ExecutionEngine::resume_consolidation`]
/// either finishes or re-pauses it on the next branch.
#[derive(Debug, Clone)]
struct PendingConflict {
    group: usize,
    worktree_path: PathBuf,
    base_branch: String,
    consolidated_branch: String,
    task_branches: Vec<TaskBranch>,
    resume_index: usize,
    conflict_task_id: Option<String>,
    conflict_files: Vec<String>,
}

struct EngineInner {
    state: ExecutionState,
    current_group: usize,
    consolidated_branches: HashMap<usize, String>,
    group_contexts: HashMap<usize, crate::consolidate::GroupConsolidationContext>,
    task_runtime: HashMap<String, TaskRuntime>,
    pending_conflict: Option<PendingConflict>,
}

enum CompletionOutcome {
    Continue,
    Paused,
    ConflictPaused,
    Done,
}

/// The specification bounds revision rounds via `max_revisions` but leaves
/// a single task's own dispatch-retry count unbounded; without a ceiling a
/// worker that reliably writes a sentinel with zero commits would retry
/// forever. Chosen generously since a real retry is cheap relative to a
/// human decision point.
const MAX_TASK_RETRIES: u32 = 10;

/// Per §4.3. Owns the group-stepped dispatch loop and the per-group
/// consolidator; does not itself run synthesis or revision — those are
/// [`crate::coordinator::PhaseCoordinator`]'s job once all groups are
/// consolidated.
pub struct ExecutionEngine {
    plan: Plan,
    config: EngineConfig,
    git: GitOps,
    host: Arc<dyn InstanceHost>,
    consolidator: GroupConsolidator,
    observer: Option<Arc<dyn SessionObserver>>,
    cancel: CancellationToken,
    inner: Mutex<EngineInner>,
}

impl ExecutionEngine {
    pub fn new(
        plan: Plan,
        config: EngineConfig,
        git: GitOps,
        host: Arc<dyn InstanceHost>,
        observer: Option<Arc<dyn SessionObserver>>,
    ) -> Result<Self, EngineError> {
        plan.validate().map_err(|e| EngineError::Validation(e.to_string()))?;

        let max_polls =
            ((config.task_timeout.as_secs() / config.poll_interval.as_secs().max(1)).max(1)) as u32;
        let mode = match config.consolidation_mode {
            ConsolidationModeKind::ProgrammaticCherryPick => ConsolidationMode::ProgrammaticCherryPick,
            ConsolidationModeKind::DelegatedWorker => ConsolidationMode::DelegatedWorker {
                host: Arc::clone(&host),
                poll_interval: config.poll_interval,
                max_polls,
            },
        };

        let total_tasks = plan.total_tasks();
        let consolidator = GroupConsolidator::new(git.clone(), mode);

        Ok(Self {
            plan,
            config,
            git,
            host,
            consolidator,
            observer,
            cancel: CancellationToken::new(),
            inner: Mutex::new(EngineInner {
                state: ExecutionState::new(total_tasks),
                current_group: 0,
                consolidated_branches: HashMap::new(),
                group_contexts: HashMap::new(),
                task_runtime: HashMap::new(),
                pending_conflict: None,
            }),
        })
    }

    /// The engine's own cancellation handle, to pass to [`Self::execute`].
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Idempotent cooperative stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run the dispatch loop until every group is consolidated, the run is
    /// cancelled, a fatal error occurs, or a partial-failure decision
    /// pauses dispatch (in which case this returns `Ok(())` with
    /// [`Self::is_awaiting_decision`] true; the caller resolves the
    /// decision and calls `execute` again to resume).
    pub async fn execute(&self, cancel: CancellationToken) -> Result<(), EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let (tx, mut rx) = mpsc::channel::<TaskCompletion>(self.config.max_parallel + 4);

        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            if self.is_finished().await {
                return Ok(());
            }

            while let Some(task) = self.next_ready_task().await {
                self.dispatch_task(&task, tx.clone(), cancel.clone()).await?;
            }

            if self.inner.lock().await.state.is_awaiting_decision() {
                return Ok(());
            }

            if self.is_consolidation_conflict_paused().await {
                return Ok(());
            }

            if self.dispatch_stalled().await {
                return Err(EngineError::Validation(
                    "dispatch stalled: no running or ready tasks in the current group".to_string(),
                ));
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                msg = rx.recv() => {
                    let Some(completion) = msg else { return Ok(()) };
                    match self.handle_completion(completion).await? {
                        CompletionOutcome::Continue => {}
                        CompletionOutcome::Paused | CompletionOutcome::ConflictPaused | CompletionOutcome::Done => {
                            return Ok(())
                        }
                    }
                }
            }
        }
    }

    pub async fn state(&self) -> ExecutionStateSnapshot {
        self.inner.lock().await.state.snapshot()
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn git(&self) -> &GitOps {
        &self.git
    }

    /// The consolidated branch for the plan's final group, once it exists
    /// — the base a synthesis review worker runs against.
    pub async fn final_consolidated_branch(&self) -> Option<String> {
        let last = self.plan.total_groups().checked_sub(1)?;
        self.inner.lock().await.consolidated_branches.get(&last).cloned()
    }

    /// Every dispatched task's worktree and branch, for revision's worker
    /// reuse.
    pub async fn task_locations(&self) -> Vec<crate::revision::TaskLocation> {
        self.inner
            .lock()
            .await
            .task_runtime
            .iter()
            .map(|(id, rt)| crate::revision::TaskLocation {
                task_id: id.clone(),
                worktree_path: rt.worktree_path.clone(),
                branch_name: rt.branch_name.clone(),
            })
            .collect()
    }

    pub async fn commit_count(&self, task_id: &str) -> u32 {
        self.inner.lock().await.task_runtime.get(task_id).map(|rt| rt.commit_count).unwrap_or(0)
    }

    /// Clears counters and bookkeeping, rewinding to group 0. Any
    /// in-flight monitors from a prior `execute` are not affected by this
    /// call directly; callers should only `reset` between runs.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.state.reset();
        inner.current_group = 0;
        inner.consolidated_branches.clear();
        inner.group_contexts.clear();
        inner.task_runtime.clear();
        inner.pending_conflict = None;
    }

    pub async fn has_partial_group_failure(&self, group: usize) -> bool {
        let inner = self.inner.lock().await;
        let tracker = GroupTracker::new(&self.plan);
        tracker.has_partial_failure(group, inner.state.succeeded_tasks(), inner.state.failed_tasks())
    }

    pub async fn group_decision(&self) -> Option<GroupDecision> {
        self.inner.lock().await.state.group_decision().cloned()
    }

    pub async fn is_awaiting_decision(&self) -> bool {
        self.inner.lock().await.state.is_awaiting_decision()
    }

    /// Whether a Mode A consolidation is paused on an unresolved cherry-pick
    /// conflict, per [`EngineError::ConflictPause`].
    pub async fn is_consolidation_conflict_paused(&self) -> bool {
        self.inner.lock().await.pending_conflict.is_some()
    }

    /// The worktree and files a paused consolidation conflict needs
    /// resolved on disk before [`Self::resume_consolidation`] can proceed.
    pub async fn conflict_info(&self) -> Option<EngineError> {
        let inner = self.inner.lock().await;
        inner.pending_conflict.as_ref().map(|pc| EngineError::ConflictPause {
            conflict_task_id: pc.conflict_task_id.clone(),
            conflict_worktree: pc.worktree_path.clone(),
            conflict_files: pc.conflict_files.clone(),
        })
    }

    /// Finish a paused consolidation once its conflict has been resolved on
    /// disk (staged, not committed — the same contract as `git cherry-pick
    /// --continue`). Re-pauses with an updated [`Self::conflict_info`] if
    /// another branch conflicts further along the sequence.
    pub async fn resume_consolidation(&self) -> Result<(), EngineError> {
        let pending = {
            let mut inner = self.inner.lock().await;
            inner.pending_conflict.take().ok_or(EngineError::NoPendingDecision)?
        };

        match self
            .consolidator
            .resume_mode_a(
                &pending.worktree_path,
                &pending.base_branch,
                &pending.consolidated_branch,
                &pending.task_branches,
                pending.resume_index,
            )
            .await
        {
            Ok(outcome) => {
                self.apply_consolidation(pending.group, outcome).await;
                if let Some(observer) = &self.observer {
                    observer.on_group_complete(pending.group);
                }
                Ok(())
            }
            Err(ConsolidationError::Fatal(message)) => {
                Err(EngineError::Consolidation { group: pending.group, message })
            }
            Err(ConsolidationError::ConflictPause { conflict_task_id, conflict_worktree, conflict_files }) => {
                let resume_index = pending
                    .task_branches
                    .iter()
                    .position(|b| Some(&b.task_id) == conflict_task_id.as_ref())
                    .unwrap_or(pending.resume_index + 1);
                let mut inner = self.inner.lock().await;
                inner.pending_conflict = Some(PendingConflict {
                    resume_index,
                    conflict_task_id,
                    conflict_files,
                    worktree_path: conflict_worktree,
                    ..pending
                });
                Ok(())
            }
        }
    }

    /// Consolidate the pending group over its succeeded tasks only,
    /// skipping the failed ones, then clear the decision.
    pub async fn resume_with_partial_work(&self) -> Result<(), EngineError> {
        let decision = {
            let inner = self.inner.lock().await;
            inner.state.group_decision().cloned().ok_or(EngineError::NoPendingDecision)?
        };

        if let Some(observer) = &self.observer {
            observer.on_phase_change(Phase::Consolidating);
        }

        if let Some(outcome) = self.run_consolidation(decision.group_index, &decision.succeeded_tasks).await? {
            self.apply_consolidation(decision.group_index, outcome).await;
            if let Some(observer) = &self.observer {
                observer.on_group_complete(decision.group_index);
            }
        }

        {
            let mut inner = self.inner.lock().await;
            inner.state.clear_group_decision();
        }

        Ok(())
    }

    /// Clears the pending group's failed tasks from `processed_tasks` so
    /// the next `execute` call redispatches them.
    pub async fn retry_failed_tasks(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        let decision = inner.state.group_decision().cloned().ok_or(EngineError::NoPendingDecision)?;
        for task_id in &decision.failed_tasks {
            inner.state.clear_failed_task(task_id);
        }
        inner.state.clear_group_decision();
        Ok(())
    }

    /// Clears all bookkeeping for groups `>= group` and rewinds
    /// `current_group` to it, so the next `execute` call restarts from
    /// there.
    pub async fn retrigger_group(&self, group: usize) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;

        if group >= self.plan.total_groups() {
            return Err(EngineError::RetriggerRejected { group, reason: "group index out of range".into() });
        }
        if inner.state.is_awaiting_decision() {
            return Err(EngineError::RetriggerRejected {
                group,
                reason: "a group decision is already pending".into(),
            });
        }
        if inner.state.running_count() > 0 {
            return Err(EngineError::RetriggerRejected { group, reason: "tasks are still running".into() });
        }

        let mut task_ids = Vec::new();
        for g in group..self.plan.total_groups() {
            for task in &self.plan.groups[g].tasks {
                task_ids.push(task.id.clone());
            }
        }

        inner.state.clear_tasks(&task_ids);
        for g in group..self.plan.total_groups() {
            inner.consolidated_branches.remove(&g);
            inner.group_contexts.remove(&g);
        }
        for id in &task_ids {
            inner.task_runtime.remove(id);
        }
        inner.current_group = group;

        Ok(())
    }

    async fn is_finished(&self) -> bool {
        self.inner.lock().await.current_group >= self.plan.total_groups()
    }

    async fn next_ready_task(&self) -> Option<Task> {
        let inner = self.inner.lock().await;
        if inner.state.is_awaiting_decision() {
            return None;
        }
        if inner.state.running_count() >= self.config.max_parallel {
            return None;
        }
        let group = self.plan.groups.get(inner.current_group)?;
        group
            .tasks
            .iter()
            .find(|t| !inner.state.processed_tasks().contains(&t.id) && !inner.state.is_running(&t.id))
            .cloned()
    }

    async fn dispatch_stalled(&self) -> bool {
        let inner = self.inner.lock().await;
        if inner.state.is_awaiting_decision() || inner.state.running_count() > 0 {
            return false;
        }
        match self.plan.groups.get(inner.current_group) {
            None => false,
            Some(group) => group.tasks.iter().all(|t| inner.state.processed_tasks().contains(&t.id)),
        }
    }

    async fn base_branch_for_group(&self, group: usize) -> String {
        if group == 0 {
            return self.plan.base_branch.clone();
        }
        let inner = self.inner.lock().await;
        inner.consolidated_branches.get(&(group - 1)).cloned().unwrap_or_else(|| self.plan.base_branch.clone())
    }

    async fn build_task_prompt(&self, task: &Task, group: usize, is_retry: bool) -> String {
        let mut prompt = format!(
            "Objective: {}\n\nTask `{}` ({}): {}\n",
            self.plan.objective, task.id, task.title, task.description
        );
        if !task.files.is_empty() {
            prompt.push_str(&format!("Relevant files: {}\n", task.files.join(", ")));
        }

        if group > 0 {
            let context = self.inner.lock().await.group_contexts.get(&(group - 1)).cloned();
            if let Some(context) = context {
                if !context.notes.is_empty() {
                    prompt.push_str(&format!("\nNotes from the previous group's consolidation: {}\n", context.notes));
                }
                if !context.issues_for_next_group.is_empty() {
                    prompt.push_str(&format!(
                        "\nCarried-over issues to watch for: {}\n",
                        context.issues_for_next_group.join("; ")
                    ));
                }
            }
        }

        if is_retry {
            prompt.push_str("\nThis is a retry: the previous attempt left no valid completion sentinel or commit.\n");
        }

        prompt.push_str(&format!("\nWrite the result to `{TASK_SENTINEL_FILENAME}` in this worktree when done."));
        prompt
    }

    async fn dispatch_task(
        &self,
        task: &Task,
        tx: mpsc::Sender<TaskCompletion>,
        cancel: CancellationToken,
    ) -> Result<(), EngineError> {
        let group = self.inner.lock().await.current_group;
        let base_branch = self.base_branch_for_group(group).await;
        let branch_name = self.plan.task_branch_name(task);

        let existing = self.inner.lock().await.task_runtime.get(&task.id).cloned();

        let (worktree_path, branch_name, instance, is_retry) = if let Some(runtime) = existing {
            let prompt = self.build_task_prompt(task, group, true).await;
            let instance = self
                .host
                .add_instance_to_worktree(&prompt, &runtime.worktree_path, &runtime.branch_name, Some(&task.id))
                .await
                .map_err(|e| EngineError::Dispatch { task_id: task.id.clone(), message: e.to_string() })?;
            (runtime.worktree_path, runtime.branch_name, instance, true)
        } else {
            let info = self.git.create_worktree_from_branch(&branch_name, &base_branch)?;
            let prompt = self.build_task_prompt(task, group, false).await;
            let instance = match self.host.add_instance_from_branch(&prompt, &info.path, &branch_name, Some(&task.id)).await {
                Ok(instance) => instance,
                Err(e) => {
                    let _ = self.git.remove_worktree(&info.path);
                    return Err(EngineError::Dispatch { task_id: task.id.clone(), message: e.to_string() });
                }
            };
            (info.path, branch_name, instance, false)
        };

        if let Err(e) = self.host.start_instance(&instance).await {
            let _ = self.host.stop_instance(&instance).await;
            return Err(EngineError::Dispatch { task_id: task.id.clone(), message: e.to_string() });
        }

        {
            let mut inner = self.inner.lock().await;
            inner.state.dispatch(task.id.clone(), instance.id);
            inner.task_runtime.entry(task.id.clone()).or_insert_with(|| TaskRuntime {
                worktree_path: worktree_path.clone(),
                branch_name: branch_name.clone(),
                commit_count: 0,
            });
        }

        if let Some(observer) = &self.observer {
            observer.on_task_start(&task.id, instance.id);
        }

        debug!(task_id = %task.id, retry = is_retry, "dispatched task");

        let git = self.git.clone();
        let host = Arc::clone(&self.host);
        let poll_interval = self.config.poll_interval;
        let task_clone = task.clone();
        tokio::spawn(async move {
            monitor_task(git, host, task_clone, instance, base_branch, worktree_path, poll_interval, tx, cancel).await;
        });

        Ok(())
    }

    async fn handle_completion(&self, completion: TaskCompletion) -> Result<CompletionOutcome, EngineError> {
        let task_id = completion.task_id.clone();

        let group = {
            let mut inner = self.inner.lock().await;

            if inner.state.processed_tasks().contains(&task_id) {
                return Ok(CompletionOutcome::Continue);
            }

            if completion.needs_retry {
                let retry = inner.state.retry_state_mut(&task_id, MAX_TASK_RETRIES);
                retry.retry_count += 1;
                retry.last_error = completion.error.clone();
                if retry.retry_count <= MAX_TASK_RETRIES {
                    inner.state.requeue(&task_id);
                    return Ok(CompletionOutcome::Continue);
                }
                warn!(task_id = %task_id, "task exhausted its retry budget, marking failed");
            }

            inner.state.complete_task(&task_id, completion.success, completion.files_modified.clone());
            if let Some(runtime) = inner.task_runtime.get_mut(&task_id) {
                runtime.commit_count = completion.commit_count;
            }
            inner.current_group
        };

        if let Some(observer) = &self.observer {
            if completion.success {
                observer.on_task_complete(&task_id);
            } else {
                observer.on_task_failed(&task_id, completion.error.as_deref().unwrap_or("unknown error"));
            }
            let (completed, total) = self.progress_counts().await;
            observer.on_progress(completed, total, Phase::Executing);
        }

        self.check_group_advancement(group).await
    }

    async fn progress_counts(&self) -> (usize, usize) {
        let snapshot = self.inner.lock().await.state.snapshot();
        (snapshot.completed_count + snapshot.failed_count, snapshot.total_tasks)
    }

    async fn check_group_advancement(&self, group: usize) -> Result<CompletionOutcome, EngineError> {
        let tracker = GroupTracker::new(&self.plan);
        let (complete, partial, succeeded, failed) = {
            let inner = self.inner.lock().await;
            let succeeded = inner.state.succeeded_tasks().clone();
            let failed = inner.state.failed_tasks().clone();
            let complete = tracker.is_group_complete(group, &succeeded, &failed);
            let partial = complete && tracker.has_partial_failure(group, &succeeded, &failed);
            (complete, partial, succeeded, failed)
        };

        if !complete {
            return Ok(CompletionOutcome::Continue);
        }

        if partial {
            let group_tasks = tracker.group_tasks(group);
            let succeeded_tasks: Vec<String> =
                group_tasks.iter().map(|t| t.id.clone()).filter(|id| succeeded.contains(id)).collect();
            let failed_tasks: Vec<String> =
                group_tasks.iter().map(|t| t.id.clone()).filter(|id| failed.contains(id)).collect();

            let mut inner = self.inner.lock().await;
            inner.state.set_group_decision(GroupDecision {
                group_index: group,
                succeeded_tasks,
                failed_tasks,
                awaiting_decision: true,
            });
            return Ok(CompletionOutcome::Paused);
        }

        let group_tasks = tracker.group_tasks(group);
        let task_ids: Vec<String> = group_tasks.iter().map(|t| t.id.clone()).collect();

        if let Some(observer) = &self.observer {
            observer.on_phase_change(Phase::Consolidating);
        }

        let Some(outcome) = self.run_consolidation(group, &task_ids).await? else {
            return Ok(CompletionOutcome::ConflictPaused);
        };
        self.apply_consolidation(group, outcome).await;

        if let Some(observer) = &self.observer {
            observer.on_group_complete(group);
        }

        if group + 1 >= self.plan.total_groups() {
            Ok(CompletionOutcome::Done)
        } else {
            Ok(CompletionOutcome::Continue)
        }
    }

    async fn task_branches_for(&self, task_ids: &[String]) -> Vec<TaskBranch> {
        let inner = self.inner.lock().await;
        task_ids
            .iter()
            .filter_map(|id| {
                inner.task_runtime.get(id).map(|rt| TaskBranch {
                    task_id: id.clone(),
                    branch_name: rt.branch_name.clone(),
                    commit_count: rt.commit_count,
                })
            })
            .collect()
    }

    /// Runs consolidation for `group`. Returns `Ok(None)` if a cherry-pick
    /// conflict paused it — the pause is recorded in `pending_conflict` for
    /// [`Self::resume_consolidation`] to pick up.
    async fn run_consolidation(
        &self,
        group: usize,
        task_ids: &[String],
    ) -> Result<Option<ConsolidationOutcome>, EngineError> {
        let base_branch = self.base_branch_for_group(group).await;
        let task_branches = self.task_branches_for(task_ids).await;

        match self
            .consolidator
            .consolidate(&self.plan.id_prefix(), &self.config.branch_prefix, group, &base_branch, &task_branches)
            .await
        {
            Ok(outcome) => Ok(Some(outcome)),
            Err(ConsolidationError::Fatal(message)) => Err(EngineError::Consolidation { group, message }),
            Err(ConsolidationError::ConflictPause { conflict_task_id, conflict_worktree, conflict_files }) => {
                let consolidated_branch = format!(
                    "{}/ultraplan-{}-group-{}",
                    self.config.branch_prefix,
                    self.plan.id_prefix(),
                    group + 1
                );
                let resume_index = task_branches
                    .iter()
                    .position(|b| Some(&b.task_id) == conflict_task_id.as_ref())
                    .unwrap_or(task_branches.len());

                let mut inner = self.inner.lock().await;
                inner.pending_conflict = Some(PendingConflict {
                    group,
                    worktree_path: conflict_worktree,
                    base_branch,
                    consolidated_branch,
                    task_branches,
                    resume_index,
                    conflict_task_id,
                    conflict_files,
                });
                Ok(None)
            }
        }
    }

    async fn apply_consolidation(&self, group: usize, outcome: ConsolidationOutcome) {
        let mut inner = self.inner.lock().await;
        info!(group, branch = %outcome.branch_name, "group consolidated");
        inner.consolidated_branches.insert(group, outcome.branch_name);
        inner.group_contexts.insert(group, outcome.context);
        inner.current_group = group + 1;
    }
}

#[allow(clippy::too_many_arguments)]
async fn monitor_task(
    git: GitOps,
    host: Arc<dyn InstanceHost>,
    task: Task,
    instance: Instance,
    base_branch: String,
    worktree_path: PathBuf,
    poll_interval: Duration,
    tx: mpsc::Sender<TaskCompletion>,
    cancel: CancellationToken,
) {
    let verifier = TaskVerifier::new(&git);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(poll_interval) => {}
        }
        if cancel.is_cancelled() {
            return;
        }

        let (sentinel_exists, _) = TaskVerifier::check_completion_file(&worktree_path);
        if sentinel_exists {
            let status = host.status(instance.id).await;
            let visibly_failed = status.is_some_and(InstanceStatus::is_terminal_failure);
            let result = verifier.verify(&worktree_path, &instance.branch, &base_branch, task.no_code, visibly_failed);
            let _ = host.stop_instance(&instance).await;
            let _ = tx
                .send(TaskCompletion {
                    task_id: task.id.clone(),
                    success: result.success,
                    needs_retry: result.needs_retry,
                    error: result.error,
                    commit_count: result.commit_count,
                    files_modified: result.files_modified,
                })
                .await;
            return;
        }

        match host.status(instance.id).await {
            None => {
                let _ = tx
                    .send(TaskCompletion {
                        task_id: task.id.clone(),
                        success: false,
                        needs_retry: false,
                        error: Some("instance not found".to_string()),
                        commit_count: 0,
                        files_modified: vec![],
                    })
                    .await;
                return;
            }
            Some(status) if status.is_terminal_failure() => {
                let _ = host.stop_instance(&instance).await;
                let _ = tx
                    .send(TaskCompletion {
                        task_id: task.id.clone(),
                        success: false,
                        needs_retry: false,
                        error: Some(format!("instance entered terminal status {status:?}")),
                        commit_count: 0,
                        files_modified: vec![],
                    })
                    .await;
                return;
            }
            Some(InstanceStatus::Completed) => {
                let _ = host.stop_instance(&instance).await;
                let _ = tx
                    .send(TaskCompletion {
                        task_id: task.id.clone(),
                        success: false,
                        needs_retry: false,
                        error: Some("worker exited without writing a completion sentinel".to_string()),
                        commit_count: 0,
                        files_modified: vec![],
                    })
                    .await;
                return;
            }
            _ => {
                if !host.session_exists(instance.id).await {
                    warn!(task_id = %task.id, "instance session vanished mid-poll");
                }
            }
        }
    }
}
