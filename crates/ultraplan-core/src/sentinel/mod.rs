//! Sentinel file types and the cheap polling primitive used to detect
//! worker completion.
//!
//! Workers are long-running, interactive processes; there is no return
//! code or exit event to observe completion from. Instead each worker is
//! instructed (via its prompt) to write a well-known JSON file into its
//! worktree root when it finishes a phase. Monitors poll for these files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Filename written by a task worker on completion.
pub const TASK_SENTINEL_FILENAME: &str = ".ultraplan-task-complete.json";
/// Filename written by a group-consolidation worker (Mode B).
pub const GROUP_CONSOLIDATION_SENTINEL_FILENAME: &str = ".ultraplan-group-consolidation.json";
/// Filename written by a synthesis (review) worker.
pub const SYNTHESIS_SENTINEL_FILENAME: &str = ".ultraplan-synthesis.json";
/// Filename written by a revision worker.
pub const REVISION_SENTINEL_FILENAME: &str = ".ultraplan-revision.json";

/// Sentinel written by a task worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskSentinel {
    pub status: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

/// One command run during a group-consolidation worker's verification
/// pass, and whether it succeeded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationCommand {
    pub name: String,
    pub command: String,
    pub success: bool,
}

/// Verification block of the group-consolidation sentinel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ConsolidationVerification {
    #[serde(default)]
    pub project_type: String,
    #[serde(default)]
    pub commands_run: Vec<VerificationCommand>,
    #[serde(default)]
    pub overall_success: bool,
    #[serde(default)]
    pub summary: String,
}

/// A single conflict resolution recorded by a Mode B consolidation worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConflictResolution {
    pub file: String,
    pub resolution: String,
}

/// Sentinel written by a group-consolidation (Mode B) worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupConsolidationSentinel {
    pub group_index: usize,
    pub status: String,
    #[serde(default)]
    pub branch_name: String,
    #[serde(default)]
    pub tasks_consolidated: Vec<String>,
    #[serde(default)]
    pub conflicts_resolved: Vec<ConflictResolution>,
    #[serde(default)]
    pub verification: ConsolidationVerification,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub issues_for_next_group: Vec<String>,
}

/// Severity of an issue found during synthesis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Major,
    Minor,
    /// The sentinel left the field blank; treated the same as `Major` for
    /// revision-triggering purposes (see §4.5 of the specification:
    /// `severity ∈ {critical, major, ""}`).
    #[serde(rename = "")]
    Unspecified,
}

/// One issue found by a synthesis review.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SynthesisIssue {
    /// Empty means the issue is cross-cutting (not tied to one task).
    #[serde(default)]
    pub task_id: String,
    pub description: String,
    #[serde(default)]
    pub files: Vec<String>,
    pub severity: Severity,
    #[serde(default)]
    pub suggestion: String,
}

impl SynthesisIssue {
    /// Whether this issue is severe enough to trigger a revision round
    /// (critical, major, or left unspecified — per spec §4.5).
    pub fn needs_revision(&self) -> bool {
        matches!(self.severity, Severity::Critical | Severity::Major | Severity::Unspecified)
    }

    pub fn is_cross_cutting(&self) -> bool {
        self.task_id.trim().is_empty()
    }
}

/// Sentinel written by the synthesis (review) worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SynthesisSentinel {
    pub status: String,
    #[serde(default)]
    pub revision_round: u32,
    #[serde(default)]
    pub issues_found: Vec<SynthesisIssue>,
    #[serde(default)]
    pub tasks_affected: Vec<String>,
    #[serde(default)]
    pub integration_notes: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl SynthesisSentinel {
    pub const STATUS_COMPLETE: &'static str = "complete";
    pub const STATUS_NEEDS_REVISION: &'static str = "needs_revision";
}

/// Sentinel written by a revision worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevisionSentinel {
    pub task_id: String,
    pub revision_round: u32,
    #[serde(default)]
    pub issues_addressed: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub remaining_issues: Vec<String>,
}

/// Read and parse a sentinel file of type `T` from `worktree_path/filename`.
/// Returns `Ok(None)` if the file does not yet exist — the normal "keep
/// monitoring" case, not an error.
pub fn read_sentinel<T: for<'de> Deserialize<'de>>(
    worktree_path: &Path,
    filename: &str,
) -> std::io::Result<Option<T>> {
    let path = worktree_path.join(filename);
    match std::fs::read_to_string(&path) {
        Ok(contents) => {
            let parsed = serde_json::from_str(&contents).map_err(|e| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
            })?;
            Ok(Some(parsed))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Cheap existence poll for any sentinel file, without parsing it.
/// Returns `(exists, error)` matching [`crate::verify::TaskVerifier::check_completion_file`]'s
/// contract: a filesystem error other than "not found" is reported, not
/// treated as absence.
pub fn check_completion_file(worktree_path: &Path, filename: &str) -> (bool, Option<String>) {
    let path: PathBuf = worktree_path.join(filename);
    match path.try_exists() {
        Ok(exists) => (exists, None),
        Err(e) => (false, Some(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn read_sentinel_missing_file_returns_none() {
        let dir = TempDir::new().unwrap();
        let result: std::io::Result<Option<TaskSentinel>> =
            read_sentinel(dir.path(), TASK_SENTINEL_FILENAME);
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn read_sentinel_parses_valid_json() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(TASK_SENTINEL_FILENAME),
            r#"{"status":"complete","summary":"did the thing"}"#,
        )
        .unwrap();

        let result: TaskSentinel = read_sentinel(dir.path(), TASK_SENTINEL_FILENAME)
            .unwrap()
            .unwrap();
        assert_eq!(result.status, "complete");
        assert_eq!(result.summary, "did the thing");
        assert!(result.issues.is_empty());
    }

    #[test]
    fn synthesis_issue_needs_revision_for_critical_major_and_blank() {
        let mk = |severity| SynthesisIssue {
            task_id: "t1".into(),
            description: "d".into(),
            files: vec![],
            severity,
            suggestion: "".into(),
        };
        assert!(mk(Severity::Critical).needs_revision());
        assert!(mk(Severity::Major).needs_revision());
        assert!(mk(Severity::Unspecified).needs_revision());
        assert!(!mk(Severity::Minor).needs_revision());
    }

    #[test]
    fn synthesis_issue_cross_cutting_detection() {
        let issue = SynthesisIssue {
            task_id: "".into(),
            description: "global concern".into(),
            files: vec![],
            severity: Severity::Major,
            suggestion: "".into(),
        };
        assert!(issue.is_cross_cutting());
    }

    #[test]
    fn check_completion_file_reports_presence() {
        let dir = TempDir::new().unwrap();
        let (exists, err) = check_completion_file(dir.path(), TASK_SENTINEL_FILENAME);
        assert!(!exists);
        assert!(err.is_none());

        std::fs::write(dir.path().join(TASK_SENTINEL_FILENAME), "{}").unwrap();
        let (exists, _) = check_completion_file(dir.path(), TASK_SENTINEL_FILENAME);
        assert!(exists);
    }

    #[test]
    fn group_consolidation_sentinel_roundtrip() {
        let json = r#"{
            "group_index": 0,
            "status": "complete",
            "branch_name": "ultraplan/ultraplan-abcd1234-group-1",
            "tasks_consolidated": ["t1", "t2"],
            "conflicts_resolved": [{"file": "a.rs", "resolution": "kept both"}],
            "verification": {"project_type": "rust", "commands_run": [], "overall_success": true, "summary": "ok"},
            "notes": "",
            "issues_for_next_group": ["watch the auth module"]
        }"#;
        let parsed: GroupConsolidationSentinel = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.group_index, 0);
        assert_eq!(parsed.tasks_consolidated, vec!["t1", "t2"]);
        assert_eq!(parsed.issues_for_next_group, vec!["watch the auth module"]);
    }
}
