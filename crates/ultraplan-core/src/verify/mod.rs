//! `TaskVerifier`: decides whether a task's work is real.

use std::path::Path;

use crate::git::GitOps;
use crate::sentinel::{self, TaskSentinel, TASK_SENTINEL_FILENAME};

/// Outcome of verifying one task's worktree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyResult {
    pub success: bool,
    pub error: Option<String>,
    pub needs_retry: bool,
    pub commit_count: u32,
    /// Files touched by the task's commits, for the Instance's observable
    /// `files_modified` field. Empty when verification didn't reach the
    /// commit-counting step.
    pub files_modified: Vec<String>,
}

/// Reads a task's sentinel file and counts verified commits.
pub struct TaskVerifier<'a> {
    git: &'a GitOps,
}

impl<'a> TaskVerifier<'a> {
    pub fn new(git: &'a GitOps) -> Self {
        Self { git }
    }

    /// Cheap existence poll, independent of parsing: `(exists, error)`.
    pub fn check_completion_file(worktree_path: &Path) -> (bool, Option<String>) {
        sentinel::check_completion_file(worktree_path, TASK_SENTINEL_FILENAME)
    }

    /// Verify a task given its worktree and base branch, per §4.1:
    ///
    /// 1. Read the sentinel; absence means "needs retry" unless the
    ///    instance already visibly failed (`instance_visibly_failed`).
    /// 2. Count commits unique to the task branch relative to base.
    /// 3. `no_code == false` and zero commits => failure, needs retry.
    /// 4. Sentinel present but zero commits => verification failure, not
    ///    a retry (the worker claimed success dishonestly).
    /// 5. Sentinel plus positive commits (or `no_code == true`) => success.
    pub fn verify(
        &self,
        worktree_path: &Path,
        branch_name: &str,
        base_branch: &str,
        no_code: bool,
        instance_visibly_failed: bool,
    ) -> VerifyResult {
        let sentinel: Option<TaskSentinel> =
            match sentinel::read_sentinel(worktree_path, TASK_SENTINEL_FILENAME) {
                Ok(s) => s,
                Err(e) => {
                    return VerifyResult {
                        success: false,
                        error: Some(format!("failed to read task sentinel: {e}")),
                        needs_retry: !instance_visibly_failed,
                        commit_count: 0,
                        files_modified: vec![],
                    };
                }
            };

        if sentinel.is_none() {
            return VerifyResult {
                success: false,
                error: if instance_visibly_failed {
                    Some("instance failed without writing a sentinel".to_string())
                } else {
                    None
                },
                needs_retry: !instance_visibly_failed,
                commit_count: 0,
                files_modified: vec![],
            };
        }

        let commit_count = match self.git.count_commits_between(worktree_path, base_branch, branch_name) {
            Ok(n) => n,
            Err(e) => {
                return VerifyResult {
                    success: false,
                    error: Some(format!("failed to count commits: {e}")),
                    needs_retry: false,
                    commit_count: 0,
                    files_modified: vec![],
                };
            }
        };

        if !no_code && commit_count == 0 {
            return VerifyResult {
                success: false,
                error: Some("sentinel present but no commits found".to_string()),
                needs_retry: false,
                commit_count: 0,
                files_modified: vec![],
            };
        }

        let files_modified = self.git.changed_files_between(worktree_path, base_branch, branch_name);

        VerifyResult { success: true, error: None, needs_retry: false, commit_count, files_modified }
    }
}
