//! `ExecutionState`: the engine's mutex-protected bookkeeping. Holds no
//! logic of its own beyond the invariants it enforces at every mutation;
//! [`crate::engine`] is the only writer.

use std::collections::{HashMap, HashSet};

use crate::instance::InstanceId;

/// Per-task retry bookkeeping, per §3.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub commit_counts_per_attempt: Vec<u32>,
    pub succeeded: bool,
}

/// Raised when a group completes with a mix of successes and failures;
/// blocks further dispatch and automatic advance until resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDecision {
    pub group_index: usize,
    pub succeeded_tasks: Vec<String>,
    pub failed_tasks: Vec<String>,
    pub awaiting_decision: bool,
}

/// A deep-copyable snapshot of [`ExecutionState`], returned by `State()`.
/// Mutating the snapshot never affects the live engine state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionStateSnapshot {
    pub running_tasks: HashMap<String, InstanceId>,
    pub running_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub total_tasks: usize,
    pub processed_tasks: HashSet<String>,
    pub group_decision: Option<GroupDecision>,
    pub files_modified: HashMap<String, Vec<String>>,
}

/// Engine-owned execution bookkeeping. Every mutating method keeps the
/// invariants from holding:
/// - `running_count == running_tasks.len()`
/// - `completed_count + failed_count <= total_tasks`
/// - a task ID enters `processed_tasks` at most once
#[derive(Debug, Default)]
pub struct ExecutionState {
    running_tasks: HashMap<String, InstanceId>,
    completed_count: usize,
    failed_count: usize,
    total_tasks: usize,
    processed_tasks: HashSet<String>,
    succeeded_tasks: HashSet<String>,
    failed_tasks: HashSet<String>,
    group_decision: Option<GroupDecision>,
    retry_states: HashMap<String, RetryState>,
    files_modified: HashMap<String, Vec<String>>,
}

impl ExecutionState {
    pub fn new(total_tasks: usize) -> Self {
        Self { total_tasks, ..Default::default() }
    }

    pub fn running_count(&self) -> usize {
        self.running_tasks.len()
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.running_tasks.contains_key(task_id)
    }

    pub fn dispatch(&mut self, task_id: impl Into<String>, instance_id: InstanceId) {
        self.running_tasks.insert(task_id.into(), instance_id);
    }

    /// Records one task's completion exactly once; a duplicate signal for
    /// an already-processed task is a no-op (per the idempotence
    /// invariant). Returns whether this call actually applied.
    pub fn complete_task(&mut self, task_id: &str, success: bool, files_modified: Vec<String>) -> bool {
        if self.processed_tasks.contains(task_id) {
            return false;
        }
        self.running_tasks.remove(task_id);
        self.processed_tasks.insert(task_id.to_string());
        if success {
            self.completed_count += 1;
            self.succeeded_tasks.insert(task_id.to_string());
        } else {
            self.failed_count += 1;
            self.failed_tasks.insert(task_id.to_string());
        }
        if !files_modified.is_empty() {
            self.files_modified.insert(task_id.to_string(), files_modified);
        }
        true
    }

    pub fn files_modified(&self, task_id: &str) -> Option<&[String]> {
        self.files_modified.get(task_id).map(|v| v.as_slice())
    }

    /// Remove a task from `running_tasks` without marking it processed,
    /// for the `needs_retry` completion path: the next dispatch loop
    /// iteration sees it as ready again.
    pub fn requeue(&mut self, task_id: &str) {
        self.running_tasks.remove(task_id);
    }

    pub fn succeeded_tasks(&self) -> &HashSet<String> {
        &self.succeeded_tasks
    }

    pub fn failed_tasks(&self) -> &HashSet<String> {
        &self.failed_tasks
    }

    pub fn processed_tasks(&self) -> &HashSet<String> {
        &self.processed_tasks
    }

    pub fn retry_state(&self, task_id: &str) -> Option<&RetryState> {
        self.retry_states.get(task_id)
    }

    pub fn retry_state_mut(&mut self, task_id: &str, max_retries: u32) -> &mut RetryState {
        self.retry_states
            .entry(task_id.to_string())
            .or_insert_with(|| RetryState { max_retries, ..Default::default() })
    }

    pub fn set_group_decision(&mut self, decision: GroupDecision) {
        self.group_decision = Some(decision);
    }

    pub fn clear_group_decision(&mut self) {
        self.group_decision = None;
    }

    pub fn is_awaiting_decision(&self) -> bool {
        self.group_decision.as_ref().is_some_and(|d| d.awaiting_decision)
    }

    pub fn group_decision(&self) -> Option<&GroupDecision> {
        self.group_decision.as_ref()
    }

    /// Undo a failed task's processed/failed marking so it can be
    /// redispatched, per `RetryFailedTasks`.
    pub fn clear_failed_task(&mut self, task_id: &str) {
        if self.failed_tasks.remove(task_id) {
            self.failed_count = self.failed_count.saturating_sub(1);
            self.processed_tasks.remove(task_id);
        }
    }

    /// Clears all bookkeeping for the given task IDs, used by
    /// `RetriggerGroup` to reset groups at or after the retriggered index.
    pub fn clear_tasks(&mut self, task_ids: &[String]) {
        for id in task_ids {
            self.processed_tasks.remove(id);
            self.succeeded_tasks.remove(id);
            self.failed_tasks.remove(id);
            self.running_tasks.remove(id);
            self.retry_states.remove(id);
            self.files_modified.remove(id);
        }
        self.completed_count = self.succeeded_tasks.len();
        self.failed_count = self.failed_tasks.len();
    }

    pub fn reset(&mut self) {
        self.running_tasks.clear();
        self.completed_count = 0;
        self.failed_count = 0;
        self.processed_tasks.clear();
        self.succeeded_tasks.clear();
        self.failed_tasks.clear();
        self.group_decision = None;
        self.retry_states.clear();
        self.files_modified.clear();
    }

    pub fn snapshot(&self) -> ExecutionStateSnapshot {
        ExecutionStateSnapshot {
            running_tasks: self.running_tasks.clone(),
            running_count: self.running_tasks.len(),
            completed_count: self.completed_count,
            failed_count: self.failed_count,
            total_tasks: self.total_tasks,
            processed_tasks: self.processed_tasks.clone(),
            group_decision: self.group_decision.clone(),
            files_modified: self.files_modified.clone(),
        }
    }
}
