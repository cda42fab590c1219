//! Git worktree and branch operations.
//!
//! Each Instance runs in its own git worktree, giving filesystem isolation
//! without the overhead of a full repository clone. Worktrees share the
//! object store of the main repository but have independent working
//! directories and index files.
//!
//! This module is the concrete implementation of the "git/worktree
//! library" the engine consumes as a set of named verbs: branch/worktree
//! lifecycle, cherry-pick based consolidation, and conflict inspection.
//! Git does not support concurrent worktree/index operations on the same
//! repository, so all mutating operations are serialised through an
//! internal mutex.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Errors that can occur during git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// The main repository path does not exist or is not a git repository.
    #[error("not a git repository: {0}")]
    NotAGitRepo(PathBuf),

    /// A git command failed to execute (e.g. the `git` binary is missing).
    #[error("git command failed: {message}")]
    CommandFailed {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// A git command exited with a non-zero status.
    #[error("git {command} failed (exit {code}): {stderr}")]
    Exit {
        command: String,
        code: i32,
        stderr: String,
    },

    /// The worktree path already exists but is associated with a different
    /// branch than expected.
    #[error("worktree path exists but has unexpected branch: expected {expected}, found {found}")]
    BranchMismatch { expected: String, found: String },

    /// A cherry-pick stopped with conflicts.
    #[error("cherry-pick conflict in {worktree}: {files:?}")]
    CherryPickConflict { worktree: PathBuf, files: Vec<String> },

    /// Failed to parse porcelain output from `git worktree list`.
    #[error("failed to parse git output: {0}")]
    ParseError(String),
}

/// Outcome of a cherry-pick attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CherryPickResult {
    /// All commits applied cleanly.
    Success,
    /// The cherry-pick stopped with conflicts; caller must abort or resolve.
    Conflict { files: Vec<String> },
}

/// Information about a single git worktree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    /// Absolute path to the worktree directory.
    pub path: PathBuf,
    /// Branch checked out in this worktree, if any.
    pub branch: Option<String>,
    /// HEAD commit SHA.
    pub head_commit: String,
}

/// Manages git worktrees and branches for the engine.
///
/// Operates relative to a main repository and places worktrees in a
/// configurable base directory (defaulting to a sibling directory of the
/// main repo named `<repo-name>-ultraplan-worktrees`).
#[derive(Debug)]
pub struct GitOps {
    repo_path: PathBuf,
    worktree_base: PathBuf,
    git_lock: Arc<Mutex<()>>,
}

impl Clone for GitOps {
    fn clone(&self) -> Self {
        Self {
            repo_path: self.repo_path.clone(),
            worktree_base: self.worktree_base.clone(),
            git_lock: Arc::clone(&self.git_lock),
        }
    }
}

impl GitOps {
    /// Create a new `GitOps` bound to a repository.
    ///
    /// # Errors
    ///
    /// Returns [`GitError::NotAGitRepo`] if `repo_path` is not a git
    /// repository.
    pub fn new(repo_path: impl Into<PathBuf>, worktree_base: Option<PathBuf>) -> Result<Self, GitError> {
        let repo_path = repo_path.into();

        let output = Command::new("git")
            .arg("rev-parse")
            .arg("--git-dir")
            .current_dir(&repo_path)
            .output()
            .map_err(|e| GitError::CommandFailed {
                message: "failed to run git rev-parse".into(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(GitError::NotAGitRepo(repo_path));
        }

        let worktree_base = worktree_base.unwrap_or_else(|| {
            let repo_name = repo_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("repo");
            let base_name = format!("{repo_name}-ultraplan-worktrees");
            repo_path
                .parent()
                .map(|p| p.join(&base_name))
                .unwrap_or_else(|| PathBuf::from(base_name))
        });

        Ok(Self {
            repo_path,
            worktree_base,
            git_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn worktree_base(&self) -> &Path {
        &self.worktree_base
    }

    /// Return the repository's main branch: the checked-out branch of the
    /// main worktree.
    pub fn find_main_branch(&self) -> Result<String, GitError> {
        let output = Command::new("git")
            .args(["symbolic-ref", "--short", "HEAD"])
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| GitError::CommandFailed {
                message: "failed to run git symbolic-ref".into(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(GitError::Exit {
                command: "symbolic-ref".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Create a new branch from a base branch/commit-ish without checking
    /// it out anywhere. Idempotent: an existing branch pointed at the same
    /// tip is left alone.
    pub fn create_branch_from(&self, new_branch: &str, base: &str) -> Result<(), GitError> {
        let _lock = self.lock();

        if self.branch_exists(new_branch)? {
            tracing::debug!(branch = new_branch, "branch already exists, reusing");
            return Ok(());
        }

        let output = Command::new("git")
            .args(["branch", new_branch, base])
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| GitError::CommandFailed {
                message: "failed to run git branch".into(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(GitError::Exit {
                command: "branch".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(())
    }

    /// Create (or reuse) a worktree checked out on `branch_name`, creating
    /// the branch from `base` if it does not already exist.
    ///
    /// Idempotent: if a worktree already exists at the expected path with
    /// the expected branch, it is returned as-is.
    pub fn create_worktree_from_branch(
        &self,
        branch_name: &str,
        base: &str,
    ) -> Result<WorktreeInfo, GitError> {
        let _lock = self.lock();

        let dir_name = branch_name.replace('/', "--");
        let worktree_path = self.worktree_base.join(&dir_name);

        if let Ok(existing) = self.find_worktree_by_path(&worktree_path) {
            if let Some(ref branch) = existing.branch {
                if branch == branch_name {
                    tracing::info!(path = %worktree_path.display(), branch = branch_name, "worktree already exists, returning existing");
                    return Ok(existing);
                }
                return Err(GitError::BranchMismatch {
                    expected: branch_name.to_string(),
                    found: branch.clone(),
                });
            }
            return Ok(existing);
        }

        if !self.worktree_base.exists() {
            std::fs::create_dir_all(&self.worktree_base).map_err(|e| GitError::CommandFailed {
                message: format!(
                    "failed to create worktree base directory: {}",
                    self.worktree_base.display()
                ),
                source: e,
            })?;
        }

        let branch_exists = self.branch_exists(branch_name)?;

        let output = if branch_exists {
            Command::new("git")
                .args(["worktree", "add"])
                .arg(&worktree_path)
                .arg(branch_name)
                .current_dir(&self.repo_path)
                .output()
        } else {
            Command::new("git")
                .args(["worktree", "add", "-b"])
                .arg(branch_name)
                .arg(&worktree_path)
                .arg(base)
                .current_dir(&self.repo_path)
                .output()
        }
        .map_err(|e| GitError::CommandFailed {
            message: "failed to run git worktree add".into(),
            source: e,
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            self.cleanup_partial(&worktree_path);
            return Err(GitError::Exit {
                command: "worktree add".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        self.find_worktree_by_path(&worktree_path)
    }

    /// Remove a worktree by its path. No-op if it does not exist.
    pub fn remove_worktree(&self, path: &Path) -> Result<(), GitError> {
        let _lock = self.lock();

        if self.find_worktree_by_path(path).is_err() {
            if path.exists() {
                tracing::warn!(path = %path.display(), "directory exists but not registered as worktree, removing");
                let _ = std::fs::remove_dir_all(path);
            }
            return Ok(());
        }

        let output = Command::new("git")
            .args(["worktree", "remove", "--force"])
            .arg(path)
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| GitError::CommandFailed {
                message: "failed to run git worktree remove".into(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            if stderr.contains("is not a working tree") {
                return Ok(());
            }
            return Err(GitError::Exit {
                command: "worktree remove".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(())
    }

    pub fn list_worktrees(&self) -> Result<Vec<WorktreeInfo>, GitError> {
        let output = Command::new("git")
            .args(["worktree", "list", "--porcelain"])
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| GitError::CommandFailed {
                message: "failed to run git worktree list".into(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(GitError::Exit {
                command: "worktree list".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        parse_porcelain_output(&String::from_utf8_lossy(&output.stdout))
    }

    pub fn branch_exists(&self, branch_name: &str) -> Result<bool, GitError> {
        let output = Command::new("git")
            .args(["rev-parse", "--verify"])
            .arg(format!("refs/heads/{branch_name}"))
            .current_dir(&self.repo_path)
            .output()
            .map_err(|e| GitError::CommandFailed {
                message: "failed to run git rev-parse --verify".into(),
                source: e,
            })?;

        Ok(output.status.success())
    }

    /// Cherry-pick every commit unique to `source_branch` (relative to
    /// `HEAD` of the worktree at `worktree_path`) onto that worktree's
    /// current branch. Runs `git cherry-pick base..source_branch` so the
    /// whole range applies as one pick sequence.
    pub fn cherry_pick_branch(
        &self,
        worktree_path: &Path,
        base: &str,
        source_branch: &str,
    ) -> Result<CherryPickResult, GitError> {
        let _lock = self.lock();

        let range = format!("{base}..{source_branch}");
        let output = Command::new("git")
            .args(["cherry-pick", &range])
            .current_dir(worktree_path)
            .output()
            .map_err(|e| GitError::CommandFailed {
                message: "failed to run git cherry-pick".into(),
                source: e,
            })?;

        if output.status.success() {
            return Ok(CherryPickResult::Success);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();

        if self.is_cherry_pick_in_progress(worktree_path)
            || stderr.contains("CONFLICT")
            || stdout.contains("CONFLICT")
            || stderr.contains("after resolving the conflicts")
        {
            let files = self.get_conflicting_files(worktree_path)?;
            return Ok(CherryPickResult::Conflict { files });
        }

        Err(GitError::Exit {
            command: "cherry-pick".into(),
            code: output.status.code().unwrap_or(-1),
            stderr,
        })
    }

    /// Abort an in-progress cherry-pick. No-op if none is in progress.
    pub fn abort_cherry_pick(&self, worktree_path: &Path) -> Result<(), GitError> {
        let _lock = self.lock();

        if !self.is_cherry_pick_in_progress(worktree_path) {
            return Ok(());
        }

        let output = Command::new("git")
            .args(["cherry-pick", "--abort"])
            .current_dir(worktree_path)
            .output()
            .map_err(|e| GitError::CommandFailed {
                message: "failed to run git cherry-pick --abort".into(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(GitError::Exit {
                command: "cherry-pick --abort".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(())
    }

    /// Continue an in-progress cherry-pick (after conflicts have been
    /// staged). Fails if conflicts remain unresolved.
    pub fn continue_cherry_pick(&self, worktree_path: &Path) -> Result<CherryPickResult, GitError> {
        let _lock = self.lock();

        let remaining = self.get_conflicting_files(worktree_path)?;
        if !remaining.is_empty() {
            return Ok(CherryPickResult::Conflict { files: remaining });
        }

        let output = Command::new("git")
            .args(["-c", "core.editor=true", "cherry-pick", "--continue"])
            .current_dir(worktree_path)
            .output()
            .map_err(|e| GitError::CommandFailed {
                message: "failed to run git cherry-pick --continue".into(),
                source: e,
            })?;

        if output.status.success() {
            return Ok(CherryPickResult::Success);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if self.is_cherry_pick_in_progress(worktree_path) {
            let files = self.get_conflicting_files(worktree_path)?;
            return Ok(CherryPickResult::Conflict { files });
        }

        Err(GitError::Exit {
            command: "cherry-pick --continue".into(),
            code: output.status.code().unwrap_or(-1),
            stderr,
        })
    }

    /// Whether a cherry-pick sequencer is currently in progress in the
    /// given worktree.
    pub fn is_cherry_pick_in_progress(&self, worktree_path: &Path) -> bool {
        worktree_path.join(".git").exists()
            && (git_dir_for(worktree_path).join("CHERRY_PICK_HEAD").exists())
    }

    /// Files with unresolved conflict markers (unmerged index entries) in
    /// the given worktree.
    pub fn get_conflicting_files(&self, worktree_path: &Path) -> Result<Vec<String>, GitError> {
        let output = Command::new("git")
            .args(["diff", "--name-only", "--diff-filter=U"])
            .current_dir(worktree_path)
            .output()
            .map_err(|e| GitError::CommandFailed {
                message: "failed to run git diff --diff-filter=U".into(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(GitError::Exit {
                command: "diff --diff-filter=U".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// Count commits reachable from `head` but not from `base`.
    pub fn count_commits_between(&self, worktree_path: &Path, base: &str, head: &str) -> Result<u32, GitError> {
        let range = format!("{base}..{head}");
        let output = Command::new("git")
            .args(["rev-list", "--count", &range])
            .current_dir(worktree_path)
            .output()
            .map_err(|e| GitError::CommandFailed {
                message: "failed to run git rev-list --count".into(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(GitError::Exit {
                command: "rev-list --count".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<u32>()
            .map_err(|_| GitError::ParseError("non-numeric rev-list --count output".into()))
    }

    /// Files touched by commits reachable from `head` but not `base`, for
    /// the engine's `files_modified` observability field. Best-effort: a
    /// parse failure yields an empty list rather than propagating, since
    /// this is informational only.
    pub fn changed_files_between(&self, worktree_path: &Path, base: &str, head: &str) -> Vec<String> {
        let range = format!("{base}..{head}");
        let output = Command::new("git")
            .args(["diff", "--name-only", &range])
            .current_dir(worktree_path)
            .output();

        match output {
            Ok(o) if o.status.success() => String::from_utf8_lossy(&o.stdout)
                .lines()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Push a branch from a worktree to its configured remote. Failure is
    /// not fatal to callers that treat this as best-effort (see
    /// `GroupConsolidator` Mode A), but the operation itself always
    /// reports success/failure honestly.
    pub fn push(&self, worktree_path: &Path, branch_name: &str, force: bool) -> Result<(), GitError> {
        let _lock = self.lock();

        let mut args = vec!["push", "origin"];
        if force {
            args.push("--force");
        }
        args.push(branch_name);

        let output = Command::new("git")
            .args(&args)
            .current_dir(worktree_path)
            .output()
            .map_err(|e| GitError::CommandFailed {
                message: "failed to run git push".into(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(GitError::Exit {
                command: "push".into(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.git_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn find_worktree_by_path(&self, path: &Path) -> Result<WorktreeInfo, GitError> {
        let worktrees = self.list_worktrees()?;
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        for wt in worktrees {
            let wt_canonical = wt.path.canonicalize().unwrap_or_else(|_| wt.path.clone());
            if wt_canonical == canonical {
                return Ok(wt);
            }
        }

        Err(GitError::ParseError(format!(
            "worktree not found at path: {}",
            path.display()
        )))
    }

    fn cleanup_partial(&self, path: &Path) {
        if path.exists() {
            tracing::warn!(path = %path.display(), "cleaning up partial worktree directory");
            let _ = std::fs::remove_dir_all(path);
        }
        let _ = Command::new("git")
            .args(["worktree", "prune"])
            .current_dir(&self.repo_path)
            .output();
    }
}

/// Resolve the real `.git` directory for a worktree (worktrees keep their
/// own gitdir under the main repo's `.git/worktrees/<name>`, pointed to by
/// a `gitdir:` file at `<worktree>/.git`).
fn git_dir_for(worktree_path: &Path) -> PathBuf {
    let dotgit = worktree_path.join(".git");
    if dotgit.is_dir() {
        return dotgit;
    }
    if let Ok(contents) = std::fs::read_to_string(&dotgit) {
        if let Some(rest) = contents.trim().strip_prefix("gitdir: ") {
            let p = PathBuf::from(rest);
            return if p.is_absolute() { p } else { worktree_path.join(p) };
        }
    }
    dotgit
}

/// Parse the porcelain output of `git worktree list --porcelain`.
fn parse_porcelain_output(output: &str) -> Result<Vec<WorktreeInfo>, GitError> {
    let mut worktrees = Vec::new();
    let mut current_path: Option<PathBuf> = None;
    let mut current_head: Option<String> = None;
    let mut current_branch: Option<String> = None;

    for line in output.lines() {
        if line.is_empty() {
            if let (Some(path), Some(head)) = (current_path.take(), current_head.take()) {
                worktrees.push(WorktreeInfo {
                    path,
                    branch: current_branch.take(),
                    head_commit: head,
                });
            } else {
                current_path = None;
                current_head = None;
                current_branch = None;
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("worktree ") {
            current_path = Some(PathBuf::from(rest));
        } else if let Some(rest) = line.strip_prefix("HEAD ") {
            current_head = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("branch ") {
            let branch = rest.strip_prefix("refs/heads/").unwrap_or(rest).to_string();
            current_branch = Some(branch);
        }
    }

    if let (Some(path), Some(head)) = (current_path, current_head) {
        worktrees.push(WorktreeInfo {
            path,
            branch: current_branch,
            head_commit: head,
        });
    }

    Ok(worktrees)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_temp_repo() -> (TempDir, PathBuf) {
        let dir = TempDir::new().expect("failed to create temp dir");
        let repo_path = dir.path().to_path_buf();

        let status = Command::new("git")
            .args(["init", "-b", "main"])
            .current_dir(&repo_path)
            .output()
            .expect("failed to run git init");
        assert!(status.status.success(), "git init failed");

        let _ = Command::new("git")
            .args(["config", "user.email", "test@ultraplan.dev"])
            .current_dir(&repo_path)
            .output();
        let _ = Command::new("git")
            .args(["config", "user.name", "Ultraplan Test"])
            .current_dir(&repo_path)
            .output();

        std::fs::write(repo_path.join("README.md"), "initial\n").unwrap();
        let _ = Command::new("git")
            .args(["add", "."])
            .current_dir(&repo_path)
            .output();
        let status = Command::new("git")
            .args(["commit", "-m", "initial commit"])
            .current_dir(&repo_path)
            .output()
            .expect("failed to commit");
        assert!(status.status.success());

        (dir, repo_path)
    }

    fn commit_file(repo_path: &Path, name: &str, contents: &str, message: &str) {
        std::fs::write(repo_path.join(name), contents).unwrap();
        let _ = Command::new("git").args(["add", "."]).current_dir(repo_path).output();
        let status = Command::new("git")
            .args(["commit", "-m", message])
            .current_dir(repo_path)
            .output()
            .unwrap();
        assert!(status.status.success());
    }

    #[test]
    fn new_with_valid_repo() {
        let (_dir, repo_path) = create_temp_repo();
        let ops = GitOps::new(&repo_path, None);
        assert!(ops.is_ok());
    }

    #[test]
    fn new_with_invalid_repo_fails() {
        let dir = TempDir::new().unwrap();
        let result = GitOps::new(dir.path(), None);
        assert!(matches!(result, Err(GitError::NotAGitRepo(_))));
    }

    #[test]
    fn find_main_branch_returns_checked_out_branch() {
        let (_dir, repo_path) = create_temp_repo();
        let ops = GitOps::new(&repo_path, None).unwrap();
        assert_eq!(ops.find_main_branch().unwrap(), "main");
    }

    #[test]
    fn create_and_list_worktree() {
        let (_dir, repo_path) = create_temp_repo();
        let base = repo_path.parent().unwrap().join("worktrees");
        let ops = GitOps::new(&repo_path, Some(base)).unwrap();

        let info = ops.create_worktree_from_branch("ultraplan/t1", "main").unwrap();
        assert_eq!(info.branch.as_deref(), Some("ultraplan/t1"));

        let worktrees = ops.list_worktrees().unwrap();
        assert!(worktrees.iter().any(|w| w.path == info.path));
    }

    #[test]
    fn create_worktree_idempotent() {
        let (_dir, repo_path) = create_temp_repo();
        let base = repo_path.parent().unwrap().join("worktrees");
        let ops = GitOps::new(&repo_path, Some(base)).unwrap();

        let first = ops.create_worktree_from_branch("ultraplan/t1", "main").unwrap();
        let second = ops.create_worktree_from_branch("ultraplan/t1", "main").unwrap();
        assert_eq!(first.path, second.path);
    }

    #[test]
    fn remove_worktree_idempotent() {
        let (_dir, repo_path) = create_temp_repo();
        let base = repo_path.parent().unwrap().join("worktrees");
        let ops = GitOps::new(&repo_path, Some(base)).unwrap();

        let info = ops.create_worktree_from_branch("ultraplan/t1", "main").unwrap();
        ops.remove_worktree(&info.path).unwrap();
        // Second removal is a no-op, not an error.
        ops.remove_worktree(&info.path).unwrap();
    }

    #[test]
    fn count_commits_between_counts_new_commits() {
        let (_dir, repo_path) = create_temp_repo();
        let base = repo_path.parent().unwrap().join("worktrees");
        let ops = GitOps::new(&repo_path, Some(base)).unwrap();

        let info = ops.create_worktree_from_branch("ultraplan/t1", "main").unwrap();
        commit_file(&info.path, "a.txt", "a", "add a");
        commit_file(&info.path, "b.txt", "b", "add b");

        let count = ops.count_commits_between(&info.path, "main", "ultraplan/t1").unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn cherry_pick_branch_applies_cleanly() {
        let (_dir, repo_path) = create_temp_repo();
        let base = repo_path.parent().unwrap().join("worktrees");
        let ops = GitOps::new(&repo_path, Some(base)).unwrap();

        let task_wt = ops.create_worktree_from_branch("ultraplan/t1", "main").unwrap();
        commit_file(&task_wt.path, "feature.txt", "feature", "add feature");

        ops.create_branch_from("ultraplan/group-1", "main").unwrap();
        let consolidated_wt = ops
            .create_worktree_from_branch("ultraplan/group-1", "main")
            .unwrap();

        let result = ops
            .cherry_pick_branch(&consolidated_wt.path, "main", "ultraplan/t1")
            .unwrap();
        assert_eq!(result, CherryPickResult::Success);
        assert!(consolidated_wt.path.join("feature.txt").exists());
    }

    #[test]
    fn cherry_pick_branch_detects_conflict() {
        let (_dir, repo_path) = create_temp_repo();
        let base = repo_path.parent().unwrap().join("worktrees");
        let ops = GitOps::new(&repo_path, Some(base)).unwrap();

        let task_wt = ops.create_worktree_from_branch("ultraplan/t1", "main").unwrap();
        commit_file(&task_wt.path, "README.md", "from task\n", "edit readme in task");

        ops.create_branch_from("ultraplan/group-1", "main").unwrap();
        let consolidated_wt = ops
            .create_worktree_from_branch("ultraplan/group-1", "main")
            .unwrap();
        commit_file(&consolidated_wt.path, "README.md", "from group\n", "edit readme in group");

        let result = ops
            .cherry_pick_branch(&consolidated_wt.path, "main", "ultraplan/t1")
            .unwrap();
        match result {
            CherryPickResult::Conflict { files } => {
                assert!(files.iter().any(|f| f == "README.md"));
            }
            CherryPickResult::Success => panic!("expected conflict"),
        }

        assert!(ops.is_cherry_pick_in_progress(&consolidated_wt.path));
        ops.abort_cherry_pick(&consolidated_wt.path).unwrap();
        assert!(!ops.is_cherry_pick_in_progress(&consolidated_wt.path));
    }

    #[test]
    fn parse_porcelain_output_handles_trailing_newline() {
        let output = "worktree /repo\nHEAD abc123\nbranch refs/heads/main\n\n";
        let parsed = parse_porcelain_output(output).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].branch.as_deref(), Some("main"));
    }

    #[test]
    fn parse_porcelain_output_handles_no_trailing_newline() {
        let output = "worktree /repo\nHEAD abc123\nbranch refs/heads/main";
        let parsed = parse_porcelain_output(output).unwrap();
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn parse_porcelain_output_handles_empty() {
        let parsed = parse_porcelain_output("").unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn delete_branch_is_idempotent() {
        let (_dir, repo_path) = create_temp_repo();
        let ops = GitOps::new(&repo_path, None).unwrap();
        ops.create_branch_from("throwaway", "main").unwrap();

        let output = Command::new("git")
            .args(["branch", "-D", "throwaway"])
            .current_dir(&repo_path)
            .output()
            .unwrap();
        assert!(output.status.success());

        // Deleting again via the raw command is what delete_branch wraps;
        // verify branch_exists reflects the deletion.
        assert!(!ops.branch_exists("throwaway").unwrap());
    }
}
