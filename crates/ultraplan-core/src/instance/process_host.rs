//! Subprocess-backed [`InstanceHost`].
//!
//! Spawns a configured "harness command" as a child process per instance,
//! writes the prompt to its stdin, and tracks liveness via OS process
//! status. This is the concrete stand-in for the out-of-scope coding-agent
//! backend: any real backend adapter (a wrapped CLI agent, a container
//! runtime) can be swapped in behind the same [`InstanceHost`] trait.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::host::{HostError, InstanceHost};
use super::{Instance, InstanceId, InstanceStatus};

struct ProcessState {
    child: Child,
}

/// Spawns `harness_command` (split on whitespace; the first token is the
/// executable, the rest are fixed leading arguments) once per instance,
/// in the instance's worktree, piping the prompt to its stdin.
#[derive(Clone)]
pub struct ProcessInstanceHost {
    harness_command: Vec<String>,
    processes: Arc<Mutex<HashMap<InstanceId, ProcessState>>>,
}

impl ProcessInstanceHost {
    /// `harness_command` example: `"claude -p --output-format stream-json"`.
    pub fn new(harness_command: impl Into<String>) -> Self {
        let harness_command: Vec<String> =
            harness_command.into().split_whitespace().map(str::to_string).collect();
        Self { harness_command, processes: Arc::new(Mutex::new(HashMap::new())) }
    }

    async fn spawn_in(
        &self,
        worktree_path: &Path,
        branch_name: &str,
        prompt: &str,
        task_id: Option<&str>,
    ) -> Result<Instance, HostError> {
        let (program, args) = self
            .harness_command
            .split_first()
            .ok_or_else(|| HostError::SpawnFailed("empty harness command".into()))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(worktree_path)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| HostError::SpawnFailed(format!("failed to spawn harness command: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                warn!(error = %e, "failed to write prompt to harness stdin");
            }
        }

        let instance = Instance::new(
            worktree_path.to_path_buf(),
            branch_name.to_string(),
            task_id.map(str::to_string),
        );

        self.processes.lock().await.insert(instance.id, ProcessState { child });
        debug!(instance_id = %instance.id, worktree = %worktree_path.display(), "spawned harness process");

        Ok(instance)
    }
}

#[async_trait]
impl InstanceHost for ProcessInstanceHost {
    async fn add_instance_from_branch(
        &self,
        prompt: &str,
        worktree_path: &Path,
        branch_name: &str,
        task_id: Option<&str>,
    ) -> Result<Instance, HostError> {
        self.spawn_in(worktree_path, branch_name, prompt, task_id).await
    }

    async fn add_instance_to_worktree(
        &self,
        prompt: &str,
        worktree_path: &Path,
        branch_name: &str,
        task_id: Option<&str>,
    ) -> Result<Instance, HostError> {
        self.spawn_in(worktree_path, branch_name, prompt, task_id).await
    }

    async fn start_instance(&self, _instance: &Instance) -> Result<(), HostError> {
        // The process is already running once spawned; `start` exists as
        // a distinct verb (per the specification's worker-operations
        // surface) for hosts where creation and start are separate steps.
        Ok(())
    }

    async fn stop_instance(&self, instance: &Instance) -> Result<(), HostError> {
        let mut processes = self.processes.lock().await;
        if let Some(mut state) = processes.remove(&instance.id) {
            let _ = state.child.start_kill();
            let _ = state.child.wait().await;
        }
        Ok(())
    }

    async fn status(&self, id: InstanceId) -> Option<InstanceStatus> {
        let mut processes = self.processes.lock().await;
        let state = processes.get_mut(&id)?;
        match state.child.try_wait() {
            Ok(Some(exit)) if exit.success() => Some(InstanceStatus::Completed),
            Ok(Some(_)) => Some(InstanceStatus::Error),
            Ok(None) => Some(InstanceStatus::Running),
            Err(_) => Some(InstanceStatus::Error),
        }
    }

    async fn session_exists(&self, id: InstanceId) -> bool {
        self.processes.lock().await.contains_key(&id)
    }
}

/// Build a worktree-rooted path for a branch. Exposed so the engine can
/// hand `ProcessInstanceHost` the same path `GitOps` created.
pub fn worktree_path_for(base: &Path, branch_name: &str) -> PathBuf {
    base.join(branch_name.replace('/', "--"))
}
