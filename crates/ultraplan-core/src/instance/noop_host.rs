//! Test double for [`InstanceHost`]: records calls and lets tests drive
//! status/sentinel writes directly, mirroring this codebase's existing
//! no-op harness test adapter.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use super::host::{HostError, InstanceHost};
use super::{Instance, InstanceId, InstanceStatus};

/// A host whose instances never actually run anything; tests set each
/// instance's status explicitly via [`NoopInstanceHost::set_status`] and
/// write sentinel files into the worktree directly.
#[derive(Default)]
pub struct NoopInstanceHost {
    statuses: Mutex<HashMap<InstanceId, InstanceStatus>>,
    stopped: Mutex<Vec<InstanceId>>,
}

impl NoopInstanceHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, id: InstanceId, status: InstanceStatus) {
        self.statuses.lock().unwrap().insert(id, status);
    }

    pub fn stopped_instances(&self) -> Vec<InstanceId> {
        self.stopped.lock().unwrap().clone()
    }

    /// Drops every registered instance's status, so `status()` returns
    /// `None` and `session_exists()` returns `false` for all of them —
    /// simulates a worker's backing session vanishing without a sentinel.
    pub fn clear_all_statuses(&self) {
        self.statuses.lock().unwrap().clear();
    }
}

#[async_trait]
impl InstanceHost for NoopInstanceHost {
    async fn add_instance_from_branch(
        &self,
        _prompt: &str,
        worktree_path: &Path,
        branch_name: &str,
        task_id: Option<&str>,
    ) -> Result<Instance, HostError> {
        let instance = Instance::new(worktree_path.to_path_buf(), branch_name.to_string(), task_id.map(str::to_string));
        self.statuses.lock().unwrap().insert(instance.id, InstanceStatus::Running);
        Ok(instance)
    }

    async fn add_instance_to_worktree(
        &self,
        prompt: &str,
        worktree_path: &Path,
        branch_name: &str,
        task_id: Option<&str>,
    ) -> Result<Instance, HostError> {
        self.add_instance_from_branch(prompt, worktree_path, branch_name, task_id).await
    }

    async fn start_instance(&self, _instance: &Instance) -> Result<(), HostError> {
        Ok(())
    }

    async fn stop_instance(&self, instance: &Instance) -> Result<(), HostError> {
        self.stopped.lock().unwrap().push(instance.id);
        Ok(())
    }

    async fn status(&self, id: InstanceId) -> Option<InstanceStatus> {
        self.statuses.lock().unwrap().get(&id).copied()
    }

    async fn session_exists(&self, id: InstanceId) -> bool {
        self.statuses.lock().unwrap().contains_key(&id)
    }
}
