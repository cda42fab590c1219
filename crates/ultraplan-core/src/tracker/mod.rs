//! `GroupTracker`: a read-mostly, pure-function projection over a [`Plan`]
//! and the set of task IDs the engine has processed so far. Holds no
//! state of its own; every query recomputes from its inputs.

use std::collections::HashSet;

use crate::plan::Plan;

/// Borrowed view over a plan plus the engine's processed-task bookkeeping.
pub struct GroupTracker<'a> {
    plan: &'a Plan,
}

impl<'a> GroupTracker<'a> {
    pub fn new(plan: &'a Plan) -> Self {
        Self { plan }
    }

    pub fn total_groups(&self) -> usize {
        self.plan.groups.len()
    }

    /// The index of the group containing `task_id`, if any.
    pub fn group_index(&self, task_id: &str) -> Option<usize> {
        self.plan
            .groups
            .iter()
            .position(|g| g.tasks.iter().any(|t| t.id == task_id))
    }

    pub fn group_tasks(&self, group: usize) -> &[crate::plan::Task] {
        self.plan.groups.get(group).map(|g| g.tasks.as_slice()).unwrap_or(&[])
    }

    /// Every task in the group is either a succeeded or a failed task.
    pub fn is_group_complete(
        &self,
        group: usize,
        succeeded: &HashSet<String>,
        failed: &HashSet<String>,
    ) -> bool {
        let tasks = self.group_tasks(group);
        !tasks.is_empty()
            && tasks.iter().all(|t| succeeded.contains(&t.id) || failed.contains(&t.id))
    }

    /// Complete, with at least one success and at least one failure.
    pub fn has_partial_failure(
        &self,
        group: usize,
        succeeded: &HashSet<String>,
        failed: &HashSet<String>,
    ) -> bool {
        if !self.is_group_complete(group, succeeded, failed) {
            return false;
        }
        let tasks = self.group_tasks(group);
        let any_success = tasks.iter().any(|t| succeeded.contains(&t.id));
        let any_failure = tasks.iter().any(|t| failed.contains(&t.id));
        any_success && any_failure
    }

    pub fn has_more_groups(&self, group: usize) -> bool {
        group + 1 < self.total_groups()
    }

    /// `(next_group, done)`; `done` is true once `group` was the last one.
    pub fn advance_group(&self, group: usize) -> (usize, bool) {
        if self.has_more_groups(group) {
            (group + 1, false)
        } else {
            (group, true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Group, Plan, Task};

    fn task(id: &str) -> Task {
        Task { id: id.to_string(), title: id.to_string(), description: String::new(), files: vec![], no_code: false }
    }

    fn sample_plan() -> Plan {
        Plan {
            id: "p1".to_string(),
            objective: "obj".to_string(),
            base_branch: "main".to_string(),
            branch_prefix: "ultraplan".to_string(),
            groups: vec![
                Group { tasks: vec![task("a"), task("b")] },
                Group { tasks: vec![task("c")] },
            ],
        }
    }

    #[test]
    fn group_index_finds_owning_group() {
        let plan = sample_plan();
        let tracker = GroupTracker::new(&plan);
        assert_eq!(tracker.group_index("a"), Some(0));
        assert_eq!(tracker.group_index("c"), Some(1));
        assert_eq!(tracker.group_index("missing"), None);
    }

    #[test]
    fn group_complete_requires_every_task_processed() {
        let plan = sample_plan();
        let tracker = GroupTracker::new(&plan);
        let succeeded: HashSet<String> = ["a".to_string()].into_iter().collect();
        let failed: HashSet<String> = HashSet::new();
        assert!(!tracker.is_group_complete(0, &succeeded, &failed));

        let succeeded: HashSet<String> = ["a".to_string(), "b".to_string()].into_iter().collect();
        assert!(tracker.is_group_complete(0, &succeeded, &failed));
    }

    #[test]
    fn partial_failure_requires_both_a_success_and_a_failure() {
        let plan = sample_plan();
        let tracker = GroupTracker::new(&plan);
        let succeeded: HashSet<String> = ["a".to_string()].into_iter().collect();
        let failed: HashSet<String> = ["b".to_string()].into_iter().collect();
        assert!(tracker.has_partial_failure(0, &succeeded, &failed));

        let succeeded: HashSet<String> = ["a".to_string(), "b".to_string()].into_iter().collect();
        let failed: HashSet<String> = HashSet::new();
        assert!(!tracker.has_partial_failure(0, &succeeded, &failed));
    }

    #[test]
    fn advance_group_reports_done_on_last_group() {
        let plan = sample_plan();
        let tracker = GroupTracker::new(&plan);
        assert_eq!(tracker.advance_group(0), (1, false));
        assert_eq!(tracker.advance_group(1), (1, true));
    }

    #[test]
    fn empty_group_is_never_complete() {
        let mut plan = sample_plan();
        plan.groups.push(Group { tasks: vec![] });
        let tracker = GroupTracker::new(&plan);
        assert!(!tracker.is_group_complete(2, &HashSet::new(), &HashSet::new()));
    }
}
