//! Error taxonomy for the phase execution engine.
//!
//! Typed variants cover the categories a caller needs to match on
//! ([`EngineError`] at public boundaries, [`crate::git::GitError`] inside
//! the git module); everything else narrates through `anyhow::Result`.

use std::path::PathBuf;

use thiserror::Error;

use crate::git::GitError;

/// Errors surfaced by the public engine API.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Cooperative stop requested via [`crate::engine::ExecutionEngine::cancel`].
    /// Terminal, and not an error to a caller that initiated the cancel itself.
    #[error("execution cancelled")]
    Cancelled,

    /// A required dependency (instance host, plan, git ops) was missing at
    /// construction time.
    #[error("validation error: {0}")]
    Validation(String),

    /// Worker creation or start failed; task state is rolled back before
    /// this error is returned.
    #[error("dispatch error for task {task_id}: {message}")]
    Dispatch { task_id: String, message: String },

    /// Sentinel present but no commits, or sentinel missing on apparent
    /// success.
    #[error("verification failed for task {task_id}: {message}")]
    Verification { task_id: String, message: String },

    /// Branch creation, cherry-pick, or commit-count guard failed while
    /// consolidating a group. Fatal to the group.
    #[error("consolidation failed for group {group}: {message}")]
    Consolidation { group: usize, message: String },

    /// A cherry-pick conflict paused consolidation. Recoverable via
    /// `resume_consolidation` once the conflict is resolved on disk.
    #[error("consolidation paused by conflict in {conflict_worktree:?}: {conflict_files:?}")]
    ConflictPause {
        conflict_task_id: Option<String>,
        conflict_worktree: PathBuf,
        conflict_files: Vec<String>,
    },

    /// The synthesis review worker failed or could not be parsed.
    #[error("synthesis failed: {0}")]
    Synthesis(String),

    /// A revision sub-operation failed.
    #[error("revision failed: {0}")]
    Revision(String),

    /// No group decision is currently pending (`ResumeWithPartialWork`,
    /// `RetryFailedTasks` called without a preceding partial failure).
    #[error("no group decision is pending")]
    NoPendingDecision,

    /// `RetriggerGroup` was called with an index that is out of range,
    /// or while tasks are still running, or while a decision is pending.
    #[error("cannot retrigger group {group}: {reason}")]
    RetriggerRejected { group: usize, reason: String },

    /// A git operation failed.
    #[error(transparent)]
    Git(#[from] GitError),

    /// Filesystem I/O failure (sentinel read, worktree probe, etc).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
