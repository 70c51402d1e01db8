//! Task model and lifecycle state machine.
//!
//! A task is the atomic unit of pipeline work: one or more target files, an
//! issue type that drives analysis policy, and a status that moves along a
//! fixed lifecycle graph. Every transition is validated; an off-graph edge
//! is a `StateError::InvalidTransition`, never a silent overwrite.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::StateError;

/// Status of a task in the pipeline lifecycle.
///
/// `New` is initial; `Completed` and `Skipped` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    New,
    InProgress,
    QaPending,
    NeedsFixes,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    /// Check whether `self -> to` is an edge in the lifecycle graph.
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (New, InProgress)
                | (InProgress, QaPending)
                | (InProgress, NeedsFixes)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (QaPending, Completed)
                | (QaPending, NeedsFixes)
                | (QaPending, Failed)
                | (NeedsFixes, InProgress)
                | (Failed, Skipped)
                | (Failed, InProgress) // escalated re-attempt by another phase
        )
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Skipped)
    }

    /// Check if the task counts as pending work for selection.
    pub fn is_pending(self) -> bool {
        matches!(self, TaskStatus::New | TaskStatus::InProgress)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::New => "NEW",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::QaPending => "QA_PENDING",
            TaskStatus::NeedsFixes => "NEEDS_FIXES",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

/// Issue type tag. Drives the analysis-checkpoint policy and refactoring
/// triggers; derived from planning output, not hard-coded per call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    /// Two or more implementations of the same thing need merging.
    DuplicateMerge,
    /// A single file is missing a method or small piece of logic.
    MissingMethod,
    /// Cross-cutting conflict against the documented architecture.
    IntegrationConflict,
    /// Catch-all fix.
    GenericFix,
    /// Documentation work (routed to the documentation phase).
    Documentation,
}

impl IssueType {
    pub fn name(self) -> &'static str {
        match self {
            IssueType::DuplicateMerge => "duplicate_merge",
            IssueType::MissingMethod => "missing_method",
            IssueType::IntegrationConflict => "integration_conflict",
            IssueType::GenericFix => "generic_fix",
            IssueType::Documentation => "documentation",
        }
    }

    /// Whether this issue type triggers the refactoring phase.
    pub fn is_refactoring_trigger(self) -> bool {
        matches!(
            self,
            IssueType::DuplicateMerge | IssueType::IntegrationConflict
        )
    }
}

/// Record of an error that occurred during one attempt at a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub attempt: u32,
    pub phase: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// A single unit of pipeline work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub target_files: Vec<String>,
    pub issue_type: IssueType,
    pub status: TaskStatus,
    /// Failed attempts on the current unit of work; reset when the task is
    /// routed onward.
    pub attempts: u32,
    /// Total failures ever recorded, across escalations.
    pub failure_count: u32,
    /// Lower number = more urgent.
    pub priority: u32,
    /// Owning objective, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective_id: Option<String>,
    /// Free-form data consumed by the analysis tracker.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub analysis_data: serde_json::Map<String, serde_json::Value>,
    /// Reason string recorded when the task is skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(default)]
    pub errors: Vec<TaskError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new task. The id is a short hash of description, targets and
    /// creation time, matching the snapshot's task-id convention.
    pub fn new(description: &str, target_files: Vec<String>, issue_type: IssueType) -> Self {
        let now = Utc::now();
        let id = short_task_id(description, &target_files, now);
        Self {
            id,
            description: description.to_string(),
            target_files,
            issue_type,
            status: TaskStatus::New,
            attempts: 0,
            failure_count: 0,
            priority: 50,
            objective_id: None,
            analysis_data: serde_json::Map::new(),
            skip_reason: None,
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the priority (lower = more urgent).
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Link to an owning objective.
    pub fn with_objective(mut self, objective_id: &str) -> Self {
        self.objective_id = Some(objective_id.to_string());
        self
    }

    /// Validated status transition. Returns the previous status on success.
    pub fn transition(&mut self, to: TaskStatus) -> Result<TaskStatus, StateError> {
        if !self.status.can_transition_to(to) {
            return Err(StateError::InvalidTransition {
                task_id: self.id.clone(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        let from = self.status;
        self.status = to;
        self.updated_at = Utc::now();
        Ok(from)
    }

    /// Record an error against the current attempt.
    pub fn add_error(&mut self, phase: &str, message: &str) {
        self.errors.push(TaskError {
            attempt: self.attempts,
            phase: phase.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        });
        self.updated_at = Utc::now();
    }

    /// Formatted summary of recent errors, prepended to retry prompts.
    pub fn error_context(&self, max_errors: usize) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        let mut lines = vec!["Previous errors for this task:".to_string()];
        let start = self.errors.len().saturating_sub(max_errors);
        for err in &self.errors[start..] {
            lines.push(format!(
                "- Attempt {} [{}]: {}",
                err.attempt, err.phase, err.message
            ));
        }
        lines.join("\n")
    }

    /// Whether this is documentation work (issue type or `.md` targets).
    pub fn is_documentation(&self) -> bool {
        self.issue_type == IssueType::Documentation
            || (!self.target_files.is_empty()
                && self.target_files.iter().all(|f| f.ends_with(".md")))
    }
}

/// Short content-addressed task id, 12 hex chars.
fn short_task_id(description: &str, target_files: &[String], created: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(description.as_bytes());
    for f in target_files {
        hasher.update(b":");
        hasher.update(f.as_bytes());
    }
    hasher.update(created.to_rfc3339().as_bytes());
    let digest = hasher.finalize();
    hex_prefix(&digest, 12)
}

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
        if out.len() >= chars {
            break;
        }
    }
    out.truncate(chars);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new(
            "implement parse_header",
            vec!["src/parser.py".into()],
            IssueType::MissingMethod,
        )
    }

    #[test]
    fn test_new_task_defaults() {
        let t = task();
        assert_eq!(t.status, TaskStatus::New);
        assert_eq!(t.attempts, 0);
        assert_eq!(t.priority, 50);
        assert_eq!(t.id.len(), 12);
        assert!(t.errors.is_empty());
    }

    #[test]
    fn test_task_ids_are_unique_per_content() {
        let a = Task::new("fix a", vec!["a.py".into()], IssueType::GenericFix);
        let b = Task::new("fix b", vec!["b.py".into()], IssueType::GenericFix);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_valid_lifecycle_path() {
        let mut t = task();
        t.transition(TaskStatus::InProgress).unwrap();
        t.transition(TaskStatus::QaPending).unwrap();
        assert_eq!(t.status, TaskStatus::QaPending);
    }

    #[test]
    fn test_needs_fixes_reattempt_edge() {
        let mut t = task();
        t.transition(TaskStatus::InProgress).unwrap();
        t.transition(TaskStatus::NeedsFixes).unwrap();
        t.transition(TaskStatus::InProgress).unwrap();
        assert_eq!(t.status, TaskStatus::InProgress);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut t = task();
        let err = t.transition(TaskStatus::Completed).unwrap_err();
        match err {
            StateError::InvalidTransition { from, to, .. } => {
                assert_eq!(from, "NEW");
                assert_eq!(to, "COMPLETED");
            }
            _ => panic!("Expected InvalidTransition"),
        }
        // Status unchanged on rejection
        assert_eq!(t.status, TaskStatus::New);
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for terminal in [TaskStatus::Completed, TaskStatus::Skipped] {
            for to in [
                TaskStatus::New,
                TaskStatus::InProgress,
                TaskStatus::QaPending,
                TaskStatus::NeedsFixes,
                TaskStatus::Completed,
                TaskStatus::Failed,
                TaskStatus::Skipped,
            ] {
                assert!(!terminal.can_transition_to(to));
            }
        }
    }

    #[test]
    fn test_failed_can_escalate_or_skip() {
        assert!(TaskStatus::Failed.can_transition_to(TaskStatus::Skipped));
        assert!(TaskStatus::Failed.can_transition_to(TaskStatus::InProgress));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::QaPending));
    }

    #[test]
    fn test_error_context_limits_and_formats() {
        let mut t = task();
        t.attempts = 1;
        t.add_error("coding", "SyntaxError: unexpected indent");
        t.attempts = 2;
        t.add_error("debugging", "NameError: foo");
        let ctx = t.error_context(1);
        assert!(ctx.contains("NameError"));
        assert!(!ctx.contains("SyntaxError"));
        assert!(ctx.starts_with("Previous errors"));
    }

    #[test]
    fn test_documentation_detection() {
        let doc = Task::new("write guide", vec!["docs/guide.md".into()], IssueType::GenericFix);
        assert!(doc.is_documentation());
        let typed = Task::new("docs", vec!["src/a.py".into()], IssueType::Documentation);
        assert!(typed.is_documentation());
        assert!(!task().is_documentation());
    }

    #[test]
    fn test_refactoring_triggers() {
        assert!(IssueType::DuplicateMerge.is_refactoring_trigger());
        assert!(IssueType::IntegrationConflict.is_refactoring_trigger());
        assert!(!IssueType::MissingMethod.is_refactoring_trigger());
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut t = task();
        t.transition(TaskStatus::InProgress).unwrap();
        t.add_error("coding", "boom");
        let json = serde_json::to_string(&t).unwrap();
        let parsed: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(t, parsed);
    }

    #[test]
    fn test_status_serializes_screaming_snake() {
        let json = serde_json::to_string(&TaskStatus::QaPending).unwrap();
        assert_eq!(json, "\"QA_PENDING\"");
        let parsed: TaskStatus = serde_json::from_str("\"NEEDS_FIXES\"").unwrap();
        assert_eq!(parsed, TaskStatus::NeedsFixes);
    }
}
