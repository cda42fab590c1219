//! The session observer contract: callbacks the [`crate::engine::ExecutionEngine`]
//! and [`crate::coordinator::PhaseCoordinator`] fire as a run progresses,
//! per §6's "Session callbacks". A host (TUI, CLI progress printer, log
//! sink) implements this to watch a run without polling `State()`.

use crate::instance::InstanceId;

/// Phase identifiers exposed to an observer, per §6/§4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Planning,
    Executing,
    Consolidating,
    Synthesis,
    Revision,
    Complete,
    Failed,
    Cancelled,
}

/// All methods default to a no-op so an observer only needs to implement
/// the callbacks it cares about.
pub trait SessionObserver: Send + Sync {
    fn on_phase_change(&self, _phase: Phase) {}
    fn on_task_start(&self, _task_id: &str, _instance_id: InstanceId) {}
    fn on_task_complete(&self, _task_id: &str) {}
    fn on_task_failed(&self, _task_id: &str, _reason: &str) {}
    fn on_group_complete(&self, _group: usize) {}
    fn on_progress(&self, _completed: usize, _total: usize, _phase: Phase) {}
    fn on_complete(&self, _success: bool, _summary: &str) {}
}
