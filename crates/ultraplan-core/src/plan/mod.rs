//! The plan data model: an ordered sequence of groups, each an unordered
//! set of tasks.

pub mod toml_format;

use serde::{Deserialize, Serialize};

pub use toml_format::{GroupToml, PlanMeta, PlanToml, TaskToml, load_plan_from_toml};

/// A single coding task within a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    /// Stable identifier, unique within the plan.
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub files: Vec<String>,
    /// Review-only work: no commits are required for success.
    #[serde(default)]
    pub no_code: bool,
}

/// An unordered set of tasks that may run in parallel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Group {
    pub tasks: Vec<Task>,
}

/// The top-level plan: an ordered sequence of groups plus engine-facing
/// metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Plan {
    /// Stable identifier for the plan; used in consolidated branch names.
    pub id: String,
    pub objective: String,
    pub base_branch: String,
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    pub groups: Vec<Group>,
}

fn default_branch_prefix() -> String {
    "ultraplan".to_string()
}

/// Errors found while validating a [`Plan`] before it is handed to the
/// engine.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlanValidationError {
    #[error("plan has no groups")]
    NoGroups,
    #[error("group {0} has no tasks")]
    EmptyGroup(usize),
    #[error("duplicate task id: {0}")]
    DuplicateTaskId(String),
    #[error("task id must not be empty (group {group}, position {position})")]
    EmptyTaskId { group: usize, position: usize },
}

impl Plan {
    /// Validate structural invariants: at least one group, no empty
    /// groups, unique non-empty task IDs across the whole plan.
    pub fn validate(&self) -> Result<(), PlanValidationError> {
        if self.groups.is_empty() {
            return Err(PlanValidationError::NoGroups);
        }

        let mut seen = std::collections::HashSet::new();
        for (gi, group) in self.groups.iter().enumerate() {
            if group.tasks.is_empty() {
                return Err(PlanValidationError::EmptyGroup(gi));
            }
            for (ti, task) in group.tasks.iter().enumerate() {
                if task.id.trim().is_empty() {
                    return Err(PlanValidationError::EmptyTaskId { group: gi, position: ti });
                }
                if !seen.insert(task.id.clone()) {
                    return Err(PlanValidationError::DuplicateTaskId(task.id.clone()));
                }
            }
        }

        Ok(())
    }

    pub fn total_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn total_tasks(&self) -> usize {
        self.groups.iter().map(|g| g.tasks.len()).sum()
    }

    /// Find a task by ID anywhere in the plan.
    pub fn find_task(&self, task_id: &str) -> Option<&Task> {
        self.groups.iter().flat_map(|g| &g.tasks).find(|t| t.id == task_id)
    }

    /// The first 8 characters of the plan ID, used in consolidated branch
    /// names (`{prefix}/ultraplan-{plan_id[0:8]}-group-{g+1}`).
    pub fn id_prefix(&self) -> String {
        self.id.chars().take(8).collect()
    }

    /// Name of the task's branch: `{branch_prefix}/{slug(task.title)}`.
    pub fn task_branch_name(&self, task: &Task) -> String {
        format!("{}/{}", self.branch_prefix, slugify(&task.title))
    }

    /// Name of the consolidated branch for group `g` (0-indexed):
    /// `{branch_prefix}/ultraplan-{plan_id[0:8]}-group-{g+1}`.
    pub fn consolidated_branch_name(&self, group: usize) -> String {
        format!(
            "{}/ultraplan-{}-group-{}",
            self.branch_prefix,
            self.id_prefix(),
            group + 1
        )
    }
}

/// Slugify a task title for use in a branch name: lowercase, spaces to
/// dashes, non-alphanumeric characters removed, length capped at 30.
pub fn slugify(title: &str) -> String {
    let mut slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { '-' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();

    // Collapse runs of dashes produced by filtering adjacent punctuation.
    while slug.contains("--") {
        slug = slug.replace("--", "-");
    }
    let slug = slug.trim_matches('-');

    slug.chars().take(30).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            title: format!("Implement {id}"),
            description: "do the thing".to_string(),
            files: vec![],
            no_code: false,
        }
    }

    fn sample_plan() -> Plan {
        Plan {
            id: "abcd1234-5678".to_string(),
            objective: "ship it".to_string(),
            base_branch: "main".to_string(),
            branch_prefix: "ultraplan".to_string(),
            groups: vec![
                Group { tasks: vec![sample_task("t1"), sample_task("t2")] },
                Group { tasks: vec![sample_task("t3")] },
            ],
        }
    }

    #[test]
    fn validate_accepts_well_formed_plan() {
        assert!(sample_plan().validate().is_ok());
    }

    #[test]
    fn validate_rejects_no_groups() {
        let mut plan = sample_plan();
        plan.groups.clear();
        assert_eq!(plan.validate(), Err(PlanValidationError::NoGroups));
    }

    #[test]
    fn validate_rejects_empty_group() {
        let mut plan = sample_plan();
        plan.groups.push(Group::default());
        assert_eq!(plan.validate(), Err(PlanValidationError::EmptyGroup(2)));
    }

    #[test]
    fn validate_rejects_duplicate_task_id() {
        let mut plan = sample_plan();
        plan.groups[1].tasks.push(sample_task("t1"));
        assert_eq!(
            plan.validate(),
            Err(PlanValidationError::DuplicateTaskId("t1".to_string()))
        );
    }

    #[test]
    fn total_tasks_and_groups() {
        let plan = sample_plan();
        assert_eq!(plan.total_groups(), 2);
        assert_eq!(plan.total_tasks(), 3);
    }

    #[test]
    fn consolidated_branch_name_format() {
        let plan = sample_plan();
        assert_eq!(
            plan.consolidated_branch_name(0),
            "ultraplan/ultraplan-abcd1234-group-1"
        );
        assert_eq!(
            plan.consolidated_branch_name(1),
            "ultraplan/ultraplan-abcd1234-group-2"
        );
    }

    #[test]
    fn task_branch_name_uses_slug() {
        let plan = sample_plan();
        let task = sample_task("t1");
        assert_eq!(plan.task_branch_name(&task), "ultraplan/implement-t1");
    }

    #[test]
    fn slugify_lowercases_dashes_and_strips_punctuation() {
        assert_eq!(slugify("Implement JWT Auth!"), "implement-jwt-auth");
        assert_eq!(slugify("  leading/trailing  "), "leadingtrailing");
    }

    #[test]
    fn slugify_caps_length_at_30() {
        let long = "a".repeat(50);
        assert_eq!(slugify(&long).len(), 30);
    }
}
