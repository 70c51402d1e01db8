//! Task analysis tracker: per-task checkpoint ledger and resolve gating.
//!
//! Before a phase may take a resolving action (merge, report, modify) on a
//! task, a minimum amount of investigation must be on record. The minimum is
//! task-type-specific: a duplicate-merge task only needs a comparison, a
//! single-file fix only needs the target read, a cross-cutting task needs
//! targets plus the architecture document. Independent of checkpoints, a
//! hard call-count cap bounds analysis-only calls per attempt so a
//! mis-specified policy can never produce an unbounded investigation loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::state::task::{IssueType, Task};

/// Named analysis prerequisites a task can satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Checkpoint {
    ReadTargetFiles,
    ReadArchitecture,
    CompareAllImplementations,
}

impl Checkpoint {
    /// Human-readable step description, rendered into retry prompts.
    pub fn description(self) -> &'static str {
        match self {
            Checkpoint::ReadTargetFiles => "Read all target files to understand their content",
            Checkpoint::ReadArchitecture => {
                "Read the architecture document to understand design intent"
            }
            Checkpoint::CompareAllImplementations => {
                "Compare all implementations to quantify their overlap"
            }
        }
    }
}

/// Tool names that resolve a task rather than analyze it.
const RESOLVING_TOOLS: &[&str] = &[
    "merge_file_implementations",
    "cleanup_redundant_files",
    "create_file",
    "modify_file",
    "create_issue_report",
    "move_file",
    "rename_file",
    "restructure_directory",
    "approve_code",
];

/// Tools that satisfy the comparison checkpoint.
const COMPARISON_TOOLS: &[&str] = &[
    "compare_file_implementations",
    "analyze_complexity",
    "detect_dead_code",
    "analyze_import_impact",
];

/// Whether a tool name is a resolving action.
pub fn is_resolving_tool(name: &str) -> bool {
    RESOLVING_TOOLS.contains(&name)
}

/// Outcome of validating a proposed tool call against the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    /// Call may proceed.
    Allowed,
    /// Resolving call blocked; checkpoints still missing.
    Rejected {
        missing: Vec<Checkpoint>,
        guidance: String,
    },
    /// Analysis budget exhausted; the session must resolve or escalate now.
    ForceResolve { guidance: String },
}

impl Validation {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Validation::Allowed)
    }
}

/// Ledger state for one task attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskAnalysisState {
    pub satisfied: BTreeSet<Checkpoint>,
    /// Tool calls made since the current attempt began.
    pub calls_this_attempt: u32,
    /// Attempt the counters belong to; a new attempt resets both.
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_call_at: Option<DateTime<Utc>>,
}

/// Tracks analysis state for all in-flight tasks.
///
/// Serialized into the pipeline snapshot so checkpoint progress survives a
/// restart mid-task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisTracker {
    states: BTreeMap<String, TaskAnalysisState>,
}

impl AnalysisTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Minimum checkpoints for a task, derived from its issue type at
    /// validation time.
    pub fn required_checkpoints(task: &Task) -> Vec<Checkpoint> {
        match task.issue_type {
            // Comparison alone is sufficient; requiring a prior full read
            // here caused an observed infinite loop.
            IssueType::DuplicateMerge => vec![Checkpoint::CompareAllImplementations],
            IssueType::MissingMethod | IssueType::GenericFix | IssueType::Documentation => {
                vec![Checkpoint::ReadTargetFiles]
            }
            IssueType::IntegrationConflict => vec![
                Checkpoint::ReadTargetFiles,
                Checkpoint::ReadArchitecture,
            ],
        }
    }

    fn state_mut(&mut self, task: &Task) -> &mut TaskAnalysisState {
        let entry = self.states.entry(task.id.clone()).or_default();
        if entry.attempt != task.attempts {
            // New attempt: checkpoints and the call budget start over.
            *entry = TaskAnalysisState {
                attempt: task.attempts,
                ..Default::default()
            };
        }
        entry
    }

    /// Record a completed tool call and update checkpoint satisfaction.
    pub fn record_call(
        &mut self,
        task: &Task,
        tool_name: &str,
        args: &serde_json::Value,
        architecture_doc: &str,
    ) {
        let target_files = task.target_files.clone();
        let state = self.state_mut(task);
        state.calls_this_attempt += 1;
        state.last_call_at = Some(Utc::now());

        if tool_name == "read_file" {
            if let Some(path) = args.get("path").and_then(|v| v.as_str()) {
                if target_files.iter().any(|t| path.contains(t.as_str())) {
                    state.satisfied.insert(Checkpoint::ReadTargetFiles);
                }
                if path.contains(architecture_doc) {
                    state.satisfied.insert(Checkpoint::ReadArchitecture);
                }
            }
        }
        if COMPARISON_TOOLS.contains(&tool_name) {
            state.satisfied.insert(Checkpoint::CompareAllImplementations);
        }
    }

    /// Validate a proposed tool call for a task.
    pub fn validate(&mut self, task: &Task, tool_name: &str, hard_cap: u32) -> Validation {
        let required = Self::required_checkpoints(task);
        let state = self.state_mut(task);

        if is_resolving_tool(tool_name) {
            let missing: Vec<Checkpoint> = required
                .iter()
                .copied()
                .filter(|c| !state.satisfied.contains(c))
                .collect();
            // The hard cap always opens the gate, even with checkpoints
            // outstanding: bounded iterations beat perfect analysis.
            if missing.is_empty() || state.calls_this_attempt >= hard_cap {
                return Validation::Allowed;
            }
            let guidance = render_rejection(&missing, task);
            return Validation::Rejected { missing, guidance };
        }

        // Analysis-only call under the cap is fine.
        if state.calls_this_attempt < hard_cap {
            return Validation::Allowed;
        }
        Validation::ForceResolve {
            guidance: format!(
                "Analysis budget exhausted ({} calls this attempt). Take a resolving action \
                 now, or call create_issue_report to escalate this task.",
                state.calls_this_attempt
            ),
        }
    }

    /// Formatted checklist for the task, rendered into prompts.
    pub fn checklist(&self, task: &Task) -> String {
        let satisfied = self
            .states
            .get(&task.id)
            .filter(|s| s.attempt == task.attempts)
            .map(|s| s.satisfied.clone())
            .unwrap_or_default();
        Self::required_checkpoints(task)
            .iter()
            .map(|c| {
                let mark = if satisfied.contains(c) { "[x]" } else { "[ ]" };
                format!("{} {}", mark, c.description())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Calls made in the task's current attempt.
    pub fn calls_this_attempt(&self, task: &Task) -> u32 {
        self.states
            .get(&task.id)
            .filter(|s| s.attempt == task.attempts)
            .map(|s| s.calls_this_attempt)
            .unwrap_or(0)
    }

    /// Drop ledger state for a finished task.
    pub fn clear_task(&mut self, task_id: &str) {
        self.states.remove(task_id);
    }
}

fn render_rejection(missing: &[Checkpoint], task: &Task) -> String {
    let steps = missing
        .iter()
        .map(|c| format!("  - {}", c.description()))
        .collect::<Vec<_>>()
        .join("\n");
    let example = task
        .target_files
        .first()
        .map(String::as_str)
        .unwrap_or("target_file");
    format!(
        "ANALYSIS INCOMPLETE - cannot take a resolving action yet.\n\
         Missing steps:\n{steps}\n\
         Complete them first, e.g. read_file(path=\"{example}\"), then retry the \
         resolving call."
    )
}
