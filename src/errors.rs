//! Typed error hierarchy for the conductor pipeline.
//!
//! Four top-level enums cover the four subsystems:
//! - `ToolError`: tool dispatch failures, surfaced to the model, never fatal
//! - `WorkerError`: model worker backend failures, timeout triggers failover
//! - `StateError`: state store failures, only `Corrupt` is fatal
//! - `PhaseError`: per-phase invocation failures, two in a row force a transition

use thiserror::Error;

/// Errors from tool dispatch. All variants feed back into the conversation
/// as corrective guidance; none crash the coordinator loop.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool '{name}': {suggestion}")]
    UnknownTool { name: String, suggestion: String },

    #[error("Invalid arguments for tool '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("Tool '{tool}' failed: {message}")]
    Execution { tool: String, message: String },
}

impl ToolError {
    /// Build the unknown-tool error, including the hint that the "name" may
    /// actually be code content the model emitted in place of a tool call.
    pub fn unknown(name: &str) -> Self {
        let suggestion = if name.trim().is_empty() {
            "tool name was empty; re-emit the call with a registered tool name".to_string()
        } else {
            format!(
                "'{}' is not a registered tool; it may be code content rather than a tool \
                 name. Re-emit the call using one of the registered tools",
                name
            )
        };
        Self::UnknownTool {
            name: name.to_string(),
            suggestion,
        }
    }
}

/// Errors from a model worker backend.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Worker '{worker}' timed out after {seconds}s")]
    Timeout { worker: String, seconds: u64 },

    #[error("Worker '{worker}' backend error: {message}")]
    Backend { worker: String, message: String },

    #[error("All {attempted} configured workers failed; last error: {last_error}")]
    AllWorkersFailed { attempted: usize, last_error: String },
}

/// Errors from the state store and the task/objective state machine.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Invalid task transition {from} -> {to} for task {task_id}")]
    InvalidTransition {
        task_id: String,
        from: String,
        to: String,
    },

    #[error("State snapshot at {path:?} is corrupt: {message}")]
    Corrupt { path: std::path::PathBuf, message: String },

    #[error("Failed to write state snapshot at {path:?}: {source}")]
    SnapshotWriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown task id {0}")]
    UnknownTask(String),

    #[error("Unknown objective id {0}")]
    UnknownObjective(String),
}

impl StateError {
    /// Whether this error must halt the coordinator. Only snapshot
    /// corruption requires manual repair; everything else is recoverable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StateError::Corrupt { .. })
    }
}

/// Errors from a single phase invocation.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("Phase {phase} exhausted its turn budget after {turns} turns")]
    TurnBudgetExhausted { phase: String, turns: u32 },

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
