//! TOML format for plan definition files.
//!
//! A plan file has a `[plan]` table plus a repeated `[[groups]]` array,
//! each with a nested repeated `[[groups.tasks]]` array — ordered groups
//! of unordered tasks, per the engine's data model. This supersedes this
//! codebase's older flat `depends_on`-DAG plan format: groups replace
//! inter-task dependency edges as the scheduling unit.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Group, Plan, Task};

/// Top-level structure of a plan TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanToml {
    pub plan: PlanMeta,
    #[serde(default)]
    pub groups: Vec<GroupToml>,
}

/// Plan-level metadata in `[plan]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanMeta {
    /// Plan identifier. Generated if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub objective: String,
    pub base_branch: String,
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
}

/// A `[[groups]]` entry: an unordered set of tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GroupToml {
    #[serde(default, rename = "tasks")]
    pub tasks: Vec<TaskToml>,
}

/// A `[[groups.tasks]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskToml {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub no_code: bool,
}

fn default_branch_prefix() -> String {
    "ultraplan".to_string()
}

impl From<TaskToml> for Task {
    fn from(t: TaskToml) -> Self {
        Task {
            id: t.id,
            title: t.title,
            description: t.description,
            files: t.files,
            no_code: t.no_code,
        }
    }
}

impl From<GroupToml> for Group {
    fn from(g: GroupToml) -> Self {
        Group { tasks: g.tasks.into_iter().map(Task::from).collect() }
    }
}

/// Errors raised while loading a plan TOML file.
#[derive(Debug, Error)]
pub enum PlanParseError {
    #[error("failed to read plan file {path}: {source}")]
    Read { path: String, #[source] source: std::io::Error },
    #[error("failed to parse plan TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    Validation(#[from] super::PlanValidationError),
}

impl PlanToml {
    /// Convert the on-disk representation into the engine's [`Plan`],
    /// assigning a random ID when the file did not pin one.
    pub fn into_plan(self) -> Plan {
        let id = self.plan.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Plan {
            id,
            objective: self.plan.objective,
            base_branch: self.plan.base_branch,
            branch_prefix: self.plan.branch_prefix,
            groups: self.groups.into_iter().map(Group::from).collect(),
        }
    }
}

/// Parse plan TOML source text into a validated [`Plan`].
pub fn parse_plan_toml(source: &str) -> Result<Plan, PlanParseError> {
    let parsed: PlanToml = toml::from_str(source)?;
    let plan = parsed.into_plan();
    plan.validate()?;
    Ok(plan)
}

/// Load and parse a plan TOML file from disk.
pub fn load_plan_from_toml(path: &Path) -> Result<Plan, PlanParseError> {
    let contents = std::fs::read_to_string(path).map_err(|e| PlanParseError::Read {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_plan_toml(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_minimal_plan() {
        let toml_str = r#"
[plan]
objective = "Add user authentication"
base_branch = "main"

[[groups]]
[[groups.tasks]]
id = "t1"
title = "Define types"
description = "Define the shared auth types"
"#;
        let plan = parse_plan_toml(toml_str).expect("should parse");
        assert_eq!(plan.objective, "Add user authentication");
        assert_eq!(plan.base_branch, "main");
        assert_eq!(plan.branch_prefix, "ultraplan");
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].tasks.len(), 1);
        assert_eq!(plan.groups[0].tasks[0].id, "t1");
        assert!(!plan.groups[0].tasks[0].no_code);
    }

    #[test]
    fn deserialize_multi_group_plan() {
        let toml_str = r#"
[plan]
id = "fixed-id-123"
objective = "Add user authentication"
base_branch = "main"
branch_prefix = "feature"

[[groups]]
[[groups.tasks]]
id = "define-types"
title = "Define types"
description = "shared types"

[[groups.tasks]]
id = "impl-password"
title = "Implement password hashing"
description = "bcrypt wrapper"
files = ["src/auth/password.rs"]

[[groups]]
[[groups.tasks]]
id = "wire-endpoint"
title = "Wire the login endpoint"
description = "glue it all together"
no_code = false
"#;
        let plan = parse_plan_toml(toml_str).expect("should parse");
        assert_eq!(plan.id, "fixed-id-123");
        assert_eq!(plan.branch_prefix, "feature");
        assert_eq!(plan.groups.len(), 2);
        assert_eq!(plan.groups[0].tasks.len(), 2);
        assert_eq!(plan.groups[1].tasks.len(), 1);
        assert_eq!(plan.groups[0].tasks[1].files, vec!["src/auth/password.rs"]);
    }

    #[test]
    fn parse_rejects_empty_group() {
        let toml_str = r#"
[plan]
objective = "x"
base_branch = "main"

[[groups]]
"#;
        let err = parse_plan_toml(toml_str).unwrap_err();
        assert!(matches!(err, PlanParseError::Validation(_)));
    }

    #[test]
    fn parse_assigns_id_when_absent() {
        let toml_str = r#"
[plan]
objective = "x"
base_branch = "main"

[[groups]]
[[groups.tasks]]
id = "t1"
title = "Task"
description = "desc"
"#;
        let plan = parse_plan_toml(toml_str).expect("should parse");
        assert!(!plan.id.is_empty());
    }

    #[test]
    fn no_code_task_parses() {
        let toml_str = r#"
[plan]
objective = "x"
base_branch = "main"

[[groups]]
[[groups.tasks]]
id = "review"
title = "Review the design doc"
description = "read-only review task"
no_code = true
"#;
        let plan = parse_plan_toml(toml_str).expect("should parse");
        assert!(plan.groups[0].tasks[0].no_code);
    }
}
