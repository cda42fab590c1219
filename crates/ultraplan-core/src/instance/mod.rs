//! Instance management: the abstraction over a running worker process.
//!
//! # Architecture
//!
//! ```text
//! ExecutionEngine / RevisionEngine / SynthesisEngine
//!     |
//!     v
//! dyn InstanceHost --add_instance(prompt)--> Instance
//!     |                                          |
//!     |   start_instance(&instance) -------------+
//!     |   stop_instance(&instance)
//!     |   status(&instance) --> InstanceStatus
//! ```
//!
//! An `Instance` owns exactly one [`crate::git::WorktreeInfo`]-rooted
//! worktree and branch for its lifetime; the worker itself is an opaque
//! black box (per the specification, the coding-agent backend is an
//! external collaborator) that this crate only observes through status
//! polling and sentinel files.

pub mod host;
pub mod noop_host;
pub mod process_host;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use host::InstanceHost;
pub use noop_host::NoopInstanceHost;
pub use process_host::ProcessInstanceHost;

/// Opaque identifier for an Instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Observable status of a worker process, per the specification's
/// `{pending, running, completed, waiting_input, error, timeout, stuck}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    Running,
    Completed,
    WaitingInput,
    Error,
    Timeout,
    Stuck,
}

impl InstanceStatus {
    /// Statuses a monitor should stop polling on even without a sentinel.
    pub fn is_terminal_failure(self) -> bool {
        matches!(self, InstanceStatus::Error | InstanceStatus::Timeout | InstanceStatus::Stuck)
    }
}

/// A running (or finished) worker process bound to a worktree and branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: InstanceId,
    pub worktree_path: PathBuf,
    pub branch: String,
    /// The task ID this instance was dispatched for, if any (the
    /// consolidation/synthesis/review instances are not task-bound).
    pub task_id: Option<String>,
}

impl Instance {
    pub fn new(worktree_path: PathBuf, branch: String, task_id: Option<String>) -> Self {
        Self { id: InstanceId::new(), worktree_path, branch, task_id }
    }
}
