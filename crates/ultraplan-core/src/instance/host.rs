//! The `InstanceHost` trait: the worker-operations surface the engine
//! consumes from the coding-agent backend (an external collaborator, per
//! the specification; this trait is the seam at which a real backend
//! adapter plugs in).

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use super::{Instance, InstanceId, InstanceStatus};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to spawn instance: {0}")]
    SpawnFailed(String),
    #[error("instance {0} not found")]
    NotFound(InstanceId),
    #[error("failed to stop instance {0}: {1}")]
    StopFailed(InstanceId, String),
}

/// Operations consumed from the instance host, matching the
/// specification's worker-operations surface:
/// `AddInstance`, `AddInstanceFromBranch`, `AddInstanceToWorktree`,
/// `StartInstance`, `StopInstance`, `GetInstance`, `TmuxSessionExists`.
#[async_trait]
pub trait InstanceHost: Send + Sync {
    /// Spawn a worker in a freshly created worktree. The caller (the
    /// engine) has already created `worktree_path` on `branch_name` via
    /// [`crate::git::GitOps`] before calling this; the host's job is only
    /// to launch the worker process inside it.
    async fn add_instance_from_branch(
        &self,
        prompt: &str,
        worktree_path: &Path,
        branch_name: &str,
        task_id: Option<&str>,
    ) -> Result<Instance, HostError>;

    /// Spawn a worker reusing an existing worktree and branch (used by
    /// revision to stack fixes atop a task's original commits).
    async fn add_instance_to_worktree(
        &self,
        prompt: &str,
        worktree_path: &Path,
        branch_name: &str,
        task_id: Option<&str>,
    ) -> Result<Instance, HostError>;

    /// Start the worker process for a previously-created instance.
    async fn start_instance(&self, instance: &Instance) -> Result<(), HostError>;

    /// Stop (kill) the worker process. Idempotent.
    async fn stop_instance(&self, instance: &Instance) -> Result<(), HostError>;

    /// Look up the current status of an instance.
    async fn status(&self, id: InstanceId) -> Option<InstanceStatus>;

    /// Whether the instance's backing session (tmux session, subprocess,
    /// container) still exists at all, independent of its reported
    /// status. Used by Mode B consolidation's "completed without
    /// sentinel" heuristic (see DESIGN.md).
    async fn session_exists(&self, id: InstanceId) -> bool;
}

const _: () = {
    fn _assert_object_safe(_: &dyn InstanceHost) {}
};
