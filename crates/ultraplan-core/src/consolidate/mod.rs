//! `GroupConsolidator`: merges a completed group's verified task branches
//! onto a single branch, in one of two modes selected at construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::git::{CherryPickResult, GitOps};
use crate::instance::InstanceHost;
use crate::sentinel::{self, GroupConsolidationSentinel, GROUP_CONSOLIDATION_SENTINEL_FILENAME};

/// Why a [`GroupConsolidator::consolidate`] call did not produce an
/// outcome. `ConflictPause` is recoverable: the worktree is left exactly
/// as git left it (mid cherry-pick, conflict markers staged) for an
/// operator to resolve on disk, then finished via
/// [`GroupConsolidator::resume_mode_a`].
#[derive(Debug, Clone)]
pub enum ConsolidationError {
    Fatal(String),
    ConflictPause { conflict_task_id: Option<String>, conflict_worktree: PathBuf, conflict_files: Vec<String> },
}

impl std::fmt::Display for ConsolidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsolidationError::Fatal(message) => write!(f, "{message}"),
            ConsolidationError::ConflictPause { conflict_worktree, conflict_files, .. } => {
                write!(f, "cherry-pick conflict in {}: {:?}", conflict_worktree.display(), conflict_files)
            }
        }
    }
}

/// Context threaded from one group's consolidation into the next group's
/// task prompts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupConsolidationContext {
    pub notes: String,
    pub issues_for_next_group: Vec<String>,
    pub verification_success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidationOutcome {
    pub branch_name: String,
    pub context: GroupConsolidationContext,
}

/// A task branch ready for consolidation: its verified commit count is
/// provided by the caller (from [`crate::verify::TaskVerifier`]).
#[derive(Debug, Clone)]
pub struct TaskBranch {
    pub task_id: String,
    pub branch_name: String,
    pub commit_count: u32,
}

/// Which strategy a [`GroupConsolidator`] uses.
pub enum ConsolidationMode {
    /// Cherry-pick every verified task branch programmatically.
    ProgrammaticCherryPick,
    /// Delegate to a worker process that performs the merge itself and
    /// reports back via the group-consolidation sentinel.
    DelegatedWorker { host: Arc<dyn InstanceHost>, poll_interval: Duration, max_polls: u32 },
}

pub struct GroupConsolidator {
    git: GitOps,
    mode: ConsolidationMode,
}

impl GroupConsolidator {
    pub fn new(git: GitOps, mode: ConsolidationMode) -> Self {
        Self { git, mode }
    }

    /// Consolidate group `group_index` (0-based) onto a new branch built
    /// from `base_branch`, given its verified task branches.
    pub async fn consolidate(
        &self,
        plan_id_prefix: &str,
        branch_prefix: &str,
        group_index: usize,
        base_branch: &str,
        task_branches: &[TaskBranch],
    ) -> Result<ConsolidationOutcome, ConsolidationError> {
        let verified: Vec<TaskBranch> =
            task_branches.iter().filter(|b| b.commit_count > 0).cloned().collect();
        if verified.is_empty() {
            return Err(ConsolidationError::Fatal("no verified commits in group".to_string()));
        }

        let consolidated_branch =
            format!("{branch_prefix}/ultraplan-{plan_id_prefix}-group-{}", group_index + 1);

        match &self.mode {
            ConsolidationMode::ProgrammaticCherryPick => {
                self.consolidate_mode_a(base_branch, &consolidated_branch, &verified).await
            }
            ConsolidationMode::DelegatedWorker { host, poll_interval, max_polls } => self
                .consolidate_mode_b(base_branch, &consolidated_branch, &verified, host.as_ref(), *poll_interval, *max_polls)
                .await
                .map_err(ConsolidationError::Fatal),
        }
    }

    async fn consolidate_mode_a(
        &self,
        base_branch: &str,
        consolidated_branch: &str,
        task_branches: &[TaskBranch],
    ) -> Result<ConsolidationOutcome, ConsolidationError> {
        let info = self
            .git
            .create_worktree_from_branch(consolidated_branch, base_branch)
            .map_err(|e| ConsolidationError::Fatal(format!("failed to create consolidation worktree: {e}")))?;

        self.cherry_pick_from(&info.path, base_branch, consolidated_branch, task_branches, 0).await
    }

    /// Finish a Mode A consolidation paused by
    /// [`ConsolidationError::ConflictPause`]: continue the in-progress
    /// cherry-pick (failing again if conflicts remain unresolved on disk),
    /// then cherry-pick the rest of `task_branches` starting at
    /// `resume_index`.
    pub async fn resume_mode_a(
        &self,
        worktree_path: &Path,
        base_branch: &str,
        consolidated_branch: &str,
        task_branches: &[TaskBranch],
        resume_index: usize,
    ) -> Result<ConsolidationOutcome, ConsolidationError> {
        match self.git.continue_cherry_pick(worktree_path) {
            Ok(CherryPickResult::Success) => {}
            Ok(CherryPickResult::Conflict { files }) => {
                return Err(ConsolidationError::ConflictPause {
                    conflict_task_id: task_branches.get(resume_index).map(|b| b.task_id.clone()),
                    conflict_worktree: worktree_path.to_path_buf(),
                    conflict_files: files,
                });
            }
            Err(e) => {
                return Err(ConsolidationError::Fatal(format!("failed to continue cherry-pick: {e}")));
            }
        }

        self.cherry_pick_from(worktree_path, base_branch, consolidated_branch, task_branches, resume_index + 1).await
    }

    /// Cherry-pick `task_branches[start_index..]` in order onto
    /// `worktree_path`, stopping (without aborting or cleaning up) at the
    /// first conflict so it can be resolved on disk and resumed.
    async fn cherry_pick_from(
        &self,
        worktree_path: &Path,
        base_branch: &str,
        consolidated_branch: &str,
        task_branches: &[TaskBranch],
        start_index: usize,
    ) -> Result<ConsolidationOutcome, ConsolidationError> {
        for (index, branch) in task_branches.iter().enumerate().skip(start_index) {
            match self.git.cherry_pick_branch(worktree_path, base_branch, &branch.branch_name) {
                Ok(CherryPickResult::Success) => {}
                Ok(CherryPickResult::Conflict { files }) => {
                    warn!(branch = %branch.branch_name, "cherry-pick conflict, pausing consolidation");
                    return Err(ConsolidationError::ConflictPause {
                        conflict_task_id: Some(branch.task_id.clone()),
                        conflict_worktree: worktree_path.to_path_buf(),
                        conflict_files: files,
                    });
                }
                Err(e) => {
                    let _ = self.git.abort_cherry_pick(worktree_path);
                    let cleanup = self.git.remove_worktree(worktree_path);
                    if let Err(cleanup_err) = cleanup {
                        warn!(error = %cleanup_err, "failed to remove consolidation worktree");
                    }
                    return Err(ConsolidationError::Fatal(format!(
                        "cherry-pick of {} failed: {e}",
                        branch.branch_name
                    )));
                }
            }
            let _ = index;
        }

        let commit_count = self
            .git
            .count_commits_between(worktree_path, base_branch, "HEAD")
            .map_err(|e| ConsolidationError::Fatal(format!("failed to count consolidated commits: {e}")));

        let cleanup = self.git.remove_worktree(worktree_path);
        if let Err(e) = cleanup {
            warn!(error = %e, "failed to remove consolidation worktree");
        }

        let commit_count = commit_count?;
        if commit_count == 0 {
            return Err(ConsolidationError::Fatal("consolidated branch has zero commits".to_string()));
        }

        if let Err(e) = self.git.push(self.git.repo_path(), consolidated_branch, false) {
            warn!(error = %e, branch = consolidated_branch, "failed to push consolidated branch");
        }

        Ok(ConsolidationOutcome {
            branch_name: consolidated_branch.to_string(),
            context: GroupConsolidationContext {
                notes: format!("merged {} task branch(es) via cherry-pick", task_branches.len()),
                issues_for_next_group: vec![],
                verification_success: true,
            },
        })
    }

    async fn consolidate_mode_b(
        &self,
        base_branch: &str,
        consolidated_branch: &str,
        task_branches: &[TaskBranch],
        host: &dyn InstanceHost,
        poll_interval: Duration,
        max_polls: u32,
    ) -> Result<ConsolidationOutcome, String> {
        let info = self
            .git
            .create_worktree_from_branch(consolidated_branch, base_branch)
            .map_err(|e| format!("failed to create consolidation worktree: {e}"))?;

        let prompt = build_consolidation_prompt(base_branch, consolidated_branch, task_branches);
        let instance = host
            .add_instance_from_branch(&prompt, &info.path, consolidated_branch, None)
            .await
            .map_err(|e| format!("failed to spawn consolidation worker: {e}"))?;

        let mut outcome = None;
        for _ in 0..max_polls {
            tokio::time::sleep(poll_interval).await;

            let sentinel: Option<GroupConsolidationSentinel> =
                sentinel::read_sentinel(&info.path, GROUP_CONSOLIDATION_SENTINEL_FILENAME)
                    .map_err(|e| format!("failed to read consolidation sentinel: {e}"))?;

            if let Some(s) = sentinel {
                outcome = Some(if s.status == "complete" {
                    Ok(ConsolidationOutcome {
                        branch_name: s.branch_name,
                        context: GroupConsolidationContext {
                            notes: s.notes,
                            issues_for_next_group: s.issues_for_next_group,
                            verification_success: s.verification.overall_success,
                        },
                    })
                } else {
                    Err(format!("consolidation worker reported status={}", s.status))
                });
                break;
            }

            let status = host.status(instance.id).await;
            let session_alive = host.session_exists(instance.id).await;
            if let Some(status) = status {
                if status.is_terminal_failure() {
                    outcome = Some(Err(format!("consolidation worker entered terminal status {status:?}")));
                    break;
                }
            }
            if !session_alive {
                outcome = Some(Err("consolidation worker session vanished without a sentinel".to_string()));
                break;
            }
        }

        let _ = host.stop_instance(&instance).await;
        let cleanup = self.git.remove_worktree(&info.path);
        if let Err(e) = cleanup {
            warn!(error = %e, "failed to remove consolidation worktree");
        }

        match outcome {
            Some(result) => {
                info!(branch = consolidated_branch, "group consolidation finished");
                result
            }
            None => Err("consolidation worker timed out waiting for sentinel".to_string()),
        }
    }
}

fn build_consolidation_prompt(base_branch: &str, target_branch: &str, task_branches: &[TaskBranch]) -> String {
    let mut prompt = format!(
        "Consolidate the following task branches onto `{target_branch}` (based on `{base_branch}`) by merging their commits, resolving any conflicts, and verifying the result builds:\n\n"
    );
    for branch in task_branches {
        prompt.push_str(&format!("- {} (task {})\n", branch.branch_name, branch.task_id));
    }
    prompt.push_str(&format!(
        "\nWrite the result to `{GROUP_CONSOLIDATION_SENTINEL_FILENAME}` in this worktree when done."
    ));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::NoopInstanceHost;
    use std::process::Command;
    use tempfile::TempDir;

    fn init_repo() -> (TempDir, GitOps) {
        let dir = TempDir::new().unwrap();
        Command::new("git").args(["init", "-b", "main"]).current_dir(dir.path()).output().unwrap();
        Command::new("git").args(["config", "user.email", "t@t.dev"]).current_dir(dir.path()).output().unwrap();
        Command::new("git").args(["config", "user.name", "T"]).current_dir(dir.path()).output().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        Command::new("git").args(["add", "."]).current_dir(dir.path()).output().unwrap();
        Command::new("git").args(["commit", "-m", "init"]).current_dir(dir.path()).output().unwrap();
        let base = dir.path().parent().unwrap().join(format!("{}-wts", dir.path().file_name().unwrap().to_str().unwrap()));
        let git = GitOps::new(dir.path(), Some(base)).unwrap();
        (dir, git)
    }

    fn commit_on_branch(git: &GitOps, branch: &str, base: &str, filename: &str) -> TaskBranch {
        let info = git.create_worktree_from_branch(branch, base).unwrap();
        std::fs::write(info.path.join(filename), "content").unwrap();
        Command::new("git").args(["add", "."]).current_dir(&info.path).output().unwrap();
        Command::new("git").args(["commit", "-m", format!("add {filename}")]).current_dir(&info.path).output().unwrap();
        let count = git.count_commits_between(&info.path, base, branch).unwrap();
        git.remove_worktree(&info.path).unwrap();
        TaskBranch { task_id: filename.to_string(), branch_name: branch.to_string(), commit_count: count }
    }

    #[tokio::test]
    async fn mode_a_rejects_empty_group() {
        let (_dir, git) = init_repo();
        let consolidator = GroupConsolidator::new(git, ConsolidationMode::ProgrammaticCherryPick);
        let result = consolidator.consolidate("abcd1234", "ultraplan", 0, "main", &[]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn mode_a_merges_verified_branches() {
        let (_dir, git) = init_repo();
        let branch_a = commit_on_branch(&git, "ultraplan/task-a", "main", "a_out.txt");
        let branch_b = commit_on_branch(&git, "ultraplan/task-b", "main", "b_out.txt");

        let consolidator = GroupConsolidator::new(git, ConsolidationMode::ProgrammaticCherryPick);
        let outcome = consolidator
            .consolidate("abcd1234", "ultraplan", 0, "main", &[branch_a, branch_b])
            .await
            .unwrap();

        assert_eq!(outcome.branch_name, "ultraplan/ultraplan-abcd1234-group-1");
        assert!(outcome.context.verification_success);
    }

    #[tokio::test]
    async fn mode_a_skips_unverified_branches() {
        let (_dir, git) = init_repo();
        let branch_a = commit_on_branch(&git, "ultraplan/task-a", "main", "a_out.txt");
        let unverified = TaskBranch { task_id: "zero".into(), branch_name: "main".into(), commit_count: 0 };

        let consolidator = GroupConsolidator::new(git, ConsolidationMode::ProgrammaticCherryPick);
        let outcome = consolidator
            .consolidate("abcd1234", "ultraplan", 0, "main", &[branch_a, unverified])
            .await
            .unwrap();

        assert!(outcome.context.verification_success);
    }

    fn commit_conflicting(git: &GitOps, branch: &str, base: &str, contents: &str) -> TaskBranch {
        let info = git.create_worktree_from_branch(branch, base).unwrap();
        std::fs::write(info.path.join("shared.txt"), contents).unwrap();
        Command::new("git").args(["add", "."]).current_dir(&info.path).output().unwrap();
        Command::new("git").args(["commit", "-m", "edit shared"]).current_dir(&info.path).output().unwrap();
        let count = git.count_commits_between(&info.path, base, branch).unwrap();
        git.remove_worktree(&info.path).unwrap();
        TaskBranch { task_id: branch.to_string(), branch_name: branch.to_string(), commit_count: count }
    }

    #[tokio::test]
    async fn mode_a_pauses_on_conflict_and_resumes() {
        let (dir, git) = init_repo();
        std::fs::write(dir.path().join("shared.txt"), "base").unwrap();
        Command::new("git").args(["add", "."]).current_dir(dir.path()).output().unwrap();
        Command::new("git").args(["commit", "-m", "add shared"]).current_dir(dir.path()).output().unwrap();

        let branch_a = commit_conflicting(&git, "ultraplan/task-a", "main", "from a");
        let branch_b = commit_conflicting(&git, "ultraplan/task-b", "main", "from b");
        let branches = vec![branch_a, branch_b];

        let consolidator = GroupConsolidator::new(git.clone(), ConsolidationMode::ProgrammaticCherryPick);
        let err = consolidator
            .consolidate("abcd1234", "ultraplan", 0, "main", &branches)
            .await
            .unwrap_err();

        let (worktree, conflict_task) = match err {
            ConsolidationError::ConflictPause { conflict_worktree, conflict_task_id, conflict_files } => {
                assert!(conflict_files.contains(&"shared.txt".to_string()));
                (conflict_worktree, conflict_task_id)
            }
            ConsolidationError::Fatal(message) => panic!("expected ConflictPause, got Fatal({message})"),
        };
        assert_eq!(conflict_task.as_deref(), Some("ultraplan/task-b"));
        assert!(git.is_cherry_pick_in_progress(&worktree));

        std::fs::write(worktree.join("shared.txt"), "resolved").unwrap();
        Command::new("git").args(["add", "shared.txt"]).current_dir(&worktree).output().unwrap();

        let consolidated_branch = "ultraplan/ultraplan-abcd1234-group-1";
        let outcome = consolidator
            .resume_mode_a(&worktree, "main", consolidated_branch, &branches, 1)
            .await
            .unwrap();

        assert_eq!(outcome.branch_name, consolidated_branch);
        assert!(!worktree.exists(), "worktree should be cleaned up once consolidation finishes");
    }

    /// Waits for a Mode B consolidation worktree to appear under `git`'s
    /// worktree base, then writes `sentinel_json` into it — the stand-in
    /// for the delegated worker's own sentinel write.
    fn auto_respond_mode_b(git: GitOps, consolidated_branch: String, sentinel_json: &'static str) {
        tokio::spawn(async move {
            let dir_name = consolidated_branch.replace('/', "--");
            let path = git.worktree_base().join(dir_name);
            for _ in 0..200 {
                tokio::time::sleep(Duration::from_millis(10)).await;
                if path.exists() {
                    std::fs::write(path.join(GROUP_CONSOLIDATION_SENTINEL_FILENAME), sentinel_json).ok();
                    return;
                }
            }
        });
    }

    #[tokio::test]
    async fn mode_b_completes_on_success_sentinel() {
        let (_dir, git) = init_repo();
        let branch_a = commit_on_branch(&git, "ultraplan/task-a", "main", "a_out.txt");
        let consolidated_branch = "ultraplan/ultraplan-abcd1234-group-1".to_string();

        auto_respond_mode_b(
            git.clone(),
            consolidated_branch.clone(),
            r#"{"group_index":0,"status":"complete","branch_name":"ultraplan/ultraplan-abcd1234-group-1","tasks_consolidated":["task-a"],"conflicts_resolved":[],"verification":{"project_type":"rust","commands_run":[],"overall_success":true,"summary":"ok"},"notes":"merged cleanly","issues_for_next_group":["watch the auth module"]}"#,
        );

        let host = Arc::new(NoopInstanceHost::new());
        let mode = ConsolidationMode::DelegatedWorker {
            host: host as Arc<dyn InstanceHost>,
            poll_interval: Duration::from_millis(20),
            max_polls: 200,
        };
        let consolidator = GroupConsolidator::new(git, mode);
        let outcome = consolidator
            .consolidate("abcd1234", "ultraplan", 0, "main", &[branch_a])
            .await
            .unwrap();

        assert_eq!(outcome.branch_name, consolidated_branch);
        assert!(outcome.context.verification_success);
        assert_eq!(outcome.context.notes, "merged cleanly");
        assert_eq!(outcome.context.issues_for_next_group, vec!["watch the auth module".to_string()]);
    }

    #[tokio::test]
    async fn mode_b_fails_on_status_failed_sentinel() {
        let (_dir, git) = init_repo();
        let branch_a = commit_on_branch(&git, "ultraplan/task-a", "main", "a_out.txt");
        let consolidated_branch = "ultraplan/ultraplan-abcd1234-group-1".to_string();

        auto_respond_mode_b(
            git.clone(),
            consolidated_branch,
            r#"{"group_index":0,"status":"failed","branch_name":"","tasks_consolidated":[],"conflicts_resolved":[],"verification":{"project_type":"","commands_run":[],"overall_success":false,"summary":""},"notes":"merge conflict the worker couldn't resolve","issues_for_next_group":[]}"#,
        );

        let host = Arc::new(NoopInstanceHost::new());
        let mode = ConsolidationMode::DelegatedWorker {
            host: host as Arc<dyn InstanceHost>,
            poll_interval: Duration::from_millis(20),
            max_polls: 200,
        };
        let consolidator = GroupConsolidator::new(git, mode);
        let err = consolidator.consolidate("abcd1234", "ultraplan", 0, "main", &[branch_a]).await.unwrap_err();

        match err {
            ConsolidationError::Fatal(message) => assert!(message.contains("status=failed")),
            other => panic!("expected Fatal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn mode_b_fails_when_session_vanishes_without_sentinel() {
        let (_dir, git) = init_repo();
        let branch_a = commit_on_branch(&git, "ultraplan/task-a", "main", "a_out.txt");

        let host = Arc::new(NoopInstanceHost::new());
        let host_for_watcher = Arc::clone(&host);
        let consolidated_branch = "ultraplan/ultraplan-abcd1234-group-1".to_string();
        {
            let git = git.clone();
            let consolidated_branch = consolidated_branch.clone();
            tokio::spawn(async move {
                let dir_name = consolidated_branch.replace('/', "--");
                let path = git.worktree_base().join(dir_name);
                for _ in 0..200 {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    if path.exists() {
                        // No sentinel ever shows up; simulate the worker's
                        // backing session disappearing instead.
                        host_for_watcher.clear_all_statuses();
                        return;
                    }
                }
            });
        }

        let mode = ConsolidationMode::DelegatedWorker {
            host: host as Arc<dyn InstanceHost>,
            poll_interval: Duration::from_millis(20),
            max_polls: 200,
        };
        let consolidator = GroupConsolidator::new(git, mode);
        let err = consolidator.consolidate("abcd1234", "ultraplan", 0, "main", &[branch_a]).await.unwrap_err();

        match err {
            ConsolidationError::Fatal(message) => assert!(message.contains("vanished")),
            other => panic!("expected Fatal, got {other:?}"),
        }
    }
}
