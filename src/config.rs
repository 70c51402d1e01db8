//! Runtime configuration for the conductor pipeline.
//!
//! Every threshold the coordinator consults lives here as a named field with
//! a documented default, loadable from `conductor.toml` and overridable from
//! the CLI. Nothing in the decision loop hard-codes a numeric constant.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Attempts before a task is skipped or escalated.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Consecutive selections of one phase before a forced transition.
pub const DEFAULT_MAX_CONSECUTIVE_SELECTIONS: u32 = 5;
/// Consecutive no-mutation reports before a forced transition.
pub const DEFAULT_MAX_NO_MUTATION: u32 = 3;
/// Consecutive unrecoverable phase failures before a forced transition.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 2;
/// Analysis-only tool calls permitted per attempt before a resolve is forced.
pub const DEFAULT_ANALYSIS_CALL_CAP: u32 = 3;
/// Identical (tool, args) repetitions that count as a loop.
pub const DEFAULT_REPEAT_CALL_THRESHOLD: u32 = 3;
/// Sliding window of events the loop detector inspects.
pub const DEFAULT_DETECTOR_WINDOW: usize = 12;
/// Model worker call timeout, seconds.
pub const DEFAULT_WORKER_TIMEOUT_SECS: u64 = 300;
/// Completion percentage at which an active-like objective completes.
pub const DEFAULT_COMPLETION_THRESHOLD: f64 = 95.0;
/// Turns a single conversation session may take before giving up.
pub const DEFAULT_MAX_SESSION_TURNS: u32 = 10;

/// Weights for the multi-criteria tie-break score used when several
/// same-priority candidates compete for selection. The exact formula was
/// tuned repeatedly in production; treat these as knobs, not truths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectionWeights {
    /// Multiplier on the profile-affinity dot product.
    pub affinity: f64,
    /// Penalty per consecutive selection of the candidate phase.
    pub recency_penalty: f64,
    /// Penalty per attempt already spent on the candidate task.
    pub attempt_penalty: f64,
}

impl Default for SelectionWeights {
    fn default() -> Self {
        Self {
            affinity: 1.0,
            recency_penalty: 0.1,
            attempt_penalty: 0.05,
        }
    }
}

/// Configuration for one model worker backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    /// Display name, used in logs and failover messages.
    pub name: String,
    /// Base URL of the inference server (e.g. `http://localhost:11434`).
    pub base_url: String,
    /// Model identifier to request.
    pub model: String,
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Root of the target project the pipeline works against.
    pub project_dir: PathBuf,
    /// Architecture document consulted by cross-cutting tasks.
    #[serde(default = "default_architecture_doc")]
    pub architecture_doc: String,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_max_consecutive_selections")]
    pub max_consecutive_selections: u32,
    #[serde(default = "default_max_no_mutation")]
    pub max_no_mutation: u32,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_analysis_call_cap")]
    pub analysis_call_cap: u32,
    #[serde(default = "default_repeat_call_threshold")]
    pub repeat_call_threshold: u32,
    #[serde(default = "default_detector_window")]
    pub detector_window: usize,
    #[serde(default = "default_worker_timeout_secs")]
    pub worker_timeout_secs: u64,
    #[serde(default = "default_completion_threshold")]
    pub completion_threshold: f64,
    #[serde(default = "default_max_session_turns")]
    pub max_session_turns: u32,

    #[serde(default)]
    pub selection_weights: SelectionWeights,
    /// Worker backends in failover order. Empty is valid for test setups
    /// that inject workers directly.
    #[serde(default)]
    pub workers: Vec<WorkerConfig>,
}

fn default_architecture_doc() -> String {
    "ARCHITECTURE.md".to_string()
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_max_consecutive_selections() -> u32 {
    DEFAULT_MAX_CONSECUTIVE_SELECTIONS
}
fn default_max_no_mutation() -> u32 {
    DEFAULT_MAX_NO_MUTATION
}
fn default_max_consecutive_failures() -> u32 {
    DEFAULT_MAX_CONSECUTIVE_FAILURES
}
fn default_analysis_call_cap() -> u32 {
    DEFAULT_ANALYSIS_CALL_CAP
}
fn default_repeat_call_threshold() -> u32 {
    DEFAULT_REPEAT_CALL_THRESHOLD
}
fn default_detector_window() -> usize {
    DEFAULT_DETECTOR_WINDOW
}
fn default_worker_timeout_secs() -> u64 {
    DEFAULT_WORKER_TIMEOUT_SECS
}
fn default_completion_threshold() -> f64 {
    DEFAULT_COMPLETION_THRESHOLD
}
fn default_max_session_turns() -> u32 {
    DEFAULT_MAX_SESSION_TURNS
}

impl PipelineConfig {
    /// Create a config for a project directory with all defaults.
    pub fn new(project_dir: PathBuf) -> Self {
        Self {
            project_dir,
            architecture_doc: default_architecture_doc(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_consecutive_selections: DEFAULT_MAX_CONSECUTIVE_SELECTIONS,
            max_no_mutation: DEFAULT_MAX_NO_MUTATION,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            analysis_call_cap: DEFAULT_ANALYSIS_CALL_CAP,
            repeat_call_threshold: DEFAULT_REPEAT_CALL_THRESHOLD,
            detector_window: DEFAULT_DETECTOR_WINDOW,
            worker_timeout_secs: DEFAULT_WORKER_TIMEOUT_SECS,
            completion_threshold: DEFAULT_COMPLETION_THRESHOLD,
            max_session_turns: DEFAULT_MAX_SESSION_TURNS,
            selection_weights: SelectionWeights::default(),
            workers: Vec::new(),
        }
    }

    /// Load configuration from a `conductor.toml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: PipelineConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config TOML: {}", path.display()))?;
        Ok(config)
    }

    /// Load from `<project_dir>/conductor.toml` if present, defaults otherwise.
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        let candidate = project_dir.join("conductor.toml");
        if candidate.exists() {
            Self::load(&candidate)
        } else {
            Ok(Self::new(project_dir.to_path_buf()))
        }
    }

    /// Location of the persisted pipeline snapshot.
    pub fn state_file(&self) -> PathBuf {
        self.project_dir.join(".conductor").join("state.json")
    }

    /// Worker call timeout as a `Duration`.
    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }

    /// Set the attempt limit.
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Set the consecutive-selection cap.
    pub fn with_max_consecutive_selections(mut self, max: u32) -> Self {
        self.max_consecutive_selections = max;
        self
    }

    /// Set the no-mutation cap.
    pub fn with_max_no_mutation(mut self, max: u32) -> Self {
        self.max_no_mutation = max;
        self
    }

    /// Set the analysis hard call cap.
    pub fn with_analysis_call_cap(mut self, cap: u32) -> Self {
        self.analysis_call_cap = cap;
        self
    }

    /// Set the worker timeout in seconds.
    pub fn with_max_session_turns(mut self, max: u32) -> Self {
        self.max_session_turns = max;
        self
    }

    pub fn with_worker_timeout_secs(mut self, secs: u64) -> Self {
        self.worker_timeout_secs = secs;
        self
    }

    /// Set the selection weights.
    pub fn with_selection_weights(mut self, weights: SelectionWeights) -> Self {
        self.selection_weights = weights;
        self
    }

    /// Add a worker backend to the failover chain.
    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.workers.push(worker);
        self
    }
}
