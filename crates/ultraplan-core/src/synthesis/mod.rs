//! `SynthesisEngine`: runs a single review pass over a completed plan and
//! decides whether the work needs another revision round.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::instance::InstanceHost;
use crate::sentinel::{self, SynthesisIssue, SynthesisSentinel, SYNTHESIS_SENTINEL_FILENAME};

/// One task's contribution to the synthesis review prompt.
pub struct TaskSummary {
    pub task_id: String,
    pub title: String,
    pub summary: String,
    pub commit_count: u32,
}

#[derive(Debug, Clone)]
pub struct SynthesisOutcome {
    pub sentinel: SynthesisSentinel,
    pub issues_needing_revision: Vec<SynthesisIssue>,
}

pub struct SynthesisEngine {
    host: Arc<dyn InstanceHost>,
    poll_interval: Duration,
    max_polls: u32,
}

impl SynthesisEngine {
    pub fn new(host: Arc<dyn InstanceHost>, poll_interval: Duration, max_polls: u32) -> Self {
        Self { host, poll_interval, max_polls }
    }

    /// Spawn a review worker in `worktree_path` on `branch_name`, poll for
    /// its synthesis sentinel, and return the parsed outcome.
    ///
    /// `waiting_input` status does not end the poll loop: synthesis review
    /// is allowed to be a multi-turn conversation with its worker.
    pub async fn run(
        &self,
        objective: &str,
        task_summaries: &[TaskSummary],
        revision_round: u32,
        worktree_path: &Path,
        branch_name: &str,
    ) -> Result<SynthesisOutcome, String> {
        let prompt = build_synthesis_prompt(objective, task_summaries, revision_round);
        let instance = self
            .host
            .add_instance_from_branch(&prompt, worktree_path, branch_name, None)
            .await
            .map_err(|e| format!("failed to spawn synthesis worker: {e}"))?;

        let mut result = None;
        for _ in 0..self.max_polls {
            tokio::time::sleep(self.poll_interval).await;

            let sentinel: Option<SynthesisSentinel> =
                sentinel::read_sentinel(worktree_path, SYNTHESIS_SENTINEL_FILENAME)
                    .map_err(|e| format!("failed to read synthesis sentinel: {e}"))?;

            if let Some(s) = sentinel {
                if !s.status.is_empty() {
                    result = Some(Ok(s));
                    break;
                }
            }

            if let Some(status) = self.host.status(instance.id).await {
                if status.is_terminal_failure() {
                    result = Some(Err(format!("synthesis worker entered terminal status {status:?}")));
                    break;
                }
                // `waiting_input` is a legitimate in-progress state for a
                // multi-turn review; keep polling.
            }
        }

        let _ = self.host.stop_instance(&instance).await;

        let sentinel = match result {
            Some(r) => r?,
            None => return Err("synthesis worker timed out waiting for sentinel".to_string()),
        };

        let issues_needing_revision: Vec<SynthesisIssue> =
            sentinel.issues_found.iter().filter(|i| i.needs_revision()).cloned().collect();

        info!(
            status = %sentinel.status,
            issues = issues_needing_revision.len(),
            "synthesis pass complete"
        );

        Ok(SynthesisOutcome { sentinel, issues_needing_revision })
    }
}

fn build_synthesis_prompt(objective: &str, task_summaries: &[TaskSummary], revision_round: u32) -> String {
    let mut prompt = format!(
        "Review the combined result of this plan against its objective:\n\n{objective}\n\nRevision round: {revision_round}\n\nTasks:\n"
    );
    for task in task_summaries {
        let verify_note = if task.commit_count == 0 { " (zero commits — verify this task)" } else { "" };
        prompt.push_str(&format!(
            "- {} ({}): {}{}\n",
            task.task_id, task.title, task.summary, verify_note
        ));
    }
    prompt.push_str(&format!(
        "\nWrite the result to `{SYNTHESIS_SENTINEL_FILENAME}` in this worktree when done."
    ));
    prompt
}
