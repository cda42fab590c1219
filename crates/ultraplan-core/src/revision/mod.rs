//! `RevisionEngine`: re-dispatches workers into their original worktrees
//! to address synthesis-flagged issues.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::warn;

use crate::instance::InstanceHost;
use crate::plan::slugify;
use crate::sentinel::{self, SynthesisIssue, REVISION_SENTINEL_FILENAME};

/// Where to find a task's existing worktree and branch, for reuse.
#[derive(Debug, Clone)]
pub struct TaskLocation {
    pub task_id: String,
    pub worktree_path: std::path::PathBuf,
    pub branch_name: String,
}

#[derive(Debug, Clone)]
pub struct RevisionOutcome {
    pub task_id: String,
    pub succeeded: bool,
    pub summary: String,
}

#[derive(Clone)]
pub struct RevisionEngine {
    host: Arc<dyn InstanceHost>,
    poll_interval: Duration,
    max_polls: u32,
}

impl RevisionEngine {
    pub fn new(host: Arc<dyn InstanceHost>, poll_interval: Duration, max_polls: u32) -> Self {
        Self { host, poll_interval, max_polls }
    }

    /// Group `issues` by affected task (cross-cutting issues with an
    /// empty `task_id` are fanned out to every known task, per the policy
    /// recorded in DESIGN.md) and run one revision worker per task,
    /// concurrently via a `JoinSet`.
    pub async fn run(
        &self,
        objective: &str,
        revision_round: u32,
        issues: &[SynthesisIssue],
        locations: &[TaskLocation],
    ) -> Vec<RevisionOutcome> {
        let by_task = group_issues_by_task(issues, locations);

        let mut join_set: JoinSet<RevisionOutcome> = JoinSet::new();
        for (task_id, task_issues) in by_task {
            let Some(location) = find_location(&task_id, locations).cloned() else {
                warn!(task_id, "revision issue references unknown task, skipping");
                continue;
            };
            let prompt = build_revision_prompt(objective, revision_round, &location.task_id, &task_issues);
            let engine = self.clone();
            join_set.spawn(async move { engine.run_one(location, prompt).await });
        }

        let mut outcomes = Vec::new();
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(error = %e, "revision task panicked"),
            }
        }
        outcomes
    }

    async fn run_one(&self, location: TaskLocation, prompt: String) -> RevisionOutcome {
        let instance = match self
            .host
            .add_instance_to_worktree(&prompt, &location.worktree_path, &location.branch_name, Some(&location.task_id))
            .await
        {
            Ok(instance) => instance,
            Err(e) => {
                return RevisionOutcome {
                    task_id: location.task_id,
                    succeeded: false,
                    summary: format!("failed to spawn revision worker: {e}"),
                };
            }
        };

        let outcome = self.poll(&location.worktree_path).await;
        let _ = self.host.stop_instance(&instance).await;

        match outcome {
            Ok(summary) => RevisionOutcome { task_id: location.task_id, succeeded: true, summary },
            Err(e) => RevisionOutcome { task_id: location.task_id, succeeded: false, summary: e },
        }
    }

    async fn poll(&self, worktree_path: &Path) -> Result<String, String> {
        for _ in 0..self.max_polls {
            tokio::time::sleep(self.poll_interval).await;

            let sentinel = sentinel::read_sentinel(worktree_path, REVISION_SENTINEL_FILENAME)
                .map_err(|e| format!("failed to read revision sentinel: {e}"))?;

            if let Some(s) = sentinel {
                return Ok(s.summary);
            }
        }
        Err("revision worker timed out waiting for sentinel".to_string())
    }
}

/// Locate a task's worktree/branch, tolerating naming drift between the
/// issue's `task_id` and the engine's own bookkeeping (per §9's
/// dual-matching note): an exact task-ID match is tried first, then a
/// fallback that treats `task_id` as a title and looks for its slug
/// inside each location's branch name.
fn find_location<'a>(task_id: &str, locations: &'a [TaskLocation]) -> Option<&'a TaskLocation> {
    if let Some(exact) = locations.iter().find(|l| l.task_id == task_id) {
        return Some(exact);
    }
    let slug = slugify(task_id);
    if slug.is_empty() {
        return None;
    }
    locations.iter().find(|l| l.branch_name.contains(&slug))
}

fn group_issues_by_task(
    issues: &[SynthesisIssue],
    locations: &[TaskLocation],
) -> HashMap<String, Vec<SynthesisIssue>> {
    let mut by_task: HashMap<String, Vec<SynthesisIssue>> = HashMap::new();
    for issue in issues {
        if issue.is_cross_cutting() {
            // Cross-cutting issues with no task_id are fanned out to every
            // task with a known location (see DESIGN.md's resolution of
            // this policy question).
            for location in locations {
                by_task.entry(location.task_id.clone()).or_default().push(issue.clone());
            }
        } else {
            by_task.entry(issue.task_id.clone()).or_default().push(issue.clone());
        }
    }
    by_task
}

fn build_revision_prompt(
    objective: &str,
    revision_round: u32,
    task_id: &str,
    issues: &[SynthesisIssue],
) -> String {
    let mut prompt = format!(
        "Revision round {revision_round} for task `{task_id}`, in service of the objective:\n\n{objective}\n\nAddress the following issues:\n"
    );
    for issue in issues {
        prompt.push_str(&format!(
            "- [{:?}] {} (files: {})\n  suggestion: {}\n",
            issue.severity,
            issue.description,
            issue.files.join(", "),
            issue.suggestion
        ));
    }
    prompt.push_str(&format!("\nWrite the result to `{REVISION_SENTINEL_FILENAME}` in this worktree when done."));
    prompt
}
