//! A [`SessionObserver`] that prints progress to stdout, in lieu of the
//! out-of-scope TUI dashboard.

use ultraplan_core::instance::InstanceId;
use ultraplan_core::observer::{Phase, SessionObserver};

pub struct CliObserver;

fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Planning => "planning",
        Phase::Executing => "executing",
        Phase::Consolidating => "consolidating",
        Phase::Synthesis => "synthesis",
        Phase::Revision => "revision",
        Phase::Complete => "complete",
        Phase::Failed => "failed",
        Phase::Cancelled => "cancelled",
    }
}

impl SessionObserver for CliObserver {
    fn on_phase_change(&self, phase: Phase) {
        println!("==> {}", phase_label(phase));
    }

    fn on_task_start(&self, task_id: &str, instance_id: InstanceId) {
        println!("  [{task_id}] started ({instance_id})");
    }

    fn on_task_complete(&self, task_id: &str) {
        println!("  [{task_id}] complete");
    }

    fn on_task_failed(&self, task_id: &str, reason: &str) {
        println!("  [{task_id}] failed: {reason}");
    }

    fn on_group_complete(&self, group: usize) {
        println!("  group {} consolidated", group + 1);
    }

    fn on_progress(&self, completed: usize, total: usize, phase: Phase) {
        println!("  progress: {completed}/{total} ({})", phase_label(phase));
    }

    fn on_complete(&self, success: bool, summary: &str) {
        if success {
            println!("run complete: {summary}");
        } else {
            println!("run failed: {summary}");
        }
    }
}
