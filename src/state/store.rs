//! Persisted pipeline snapshot and the store that writes it atomically.
//!
//! The snapshot is the single recovery point: tasks, objectives, phase
//! statistics, the analysis ledger, bus notes, and per-task conversation
//! summaries all serialize into one JSON document. Saves go through a temp
//! file plus rename so a crash mid-write leaves the previous snapshot
//! intact, and the coordinator saves once per iteration.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::AnalysisTracker;
use crate::bus::MessageBus;
use crate::errors::StateError;
use crate::phase::PhaseKind;
use crate::state::objective::{Objective, ObjectiveStatus};
use crate::state::phase_stats::PhaseStats;
use crate::state::task::{Task, TaskStatus};

/// Snapshot schema version; bumped on incompatible layout changes.
const SNAPSHOT_VERSION: u32 = 1;

/// Complete serializable pipeline state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Identifies this pipeline run across resumes.
    pub run_id: String,
    /// Completed coordinator iterations.
    pub iteration: u64,
    /// Phase selected in the most recent iteration, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<PhaseKind>,
    #[serde(default)]
    pub tasks: BTreeMap<String, Task>,
    #[serde(default)]
    pub objectives: BTreeMap<String, Objective>,
    #[serde(default)]
    pub phase_stats: BTreeMap<PhaseKind, PhaseStats>,
    /// Checkpoint ledger, so analysis progress survives a restart.
    #[serde(default)]
    pub analysis: AnalysisTracker,
    #[serde(default)]
    pub bus: MessageBus,
    /// Condensed per-task conversation summaries carried across attempts.
    #[serde(default)]
    pub conversation_summaries: BTreeMap<String, String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

impl PipelineState {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            version: SNAPSHOT_VERSION,
            run_id: Uuid::new_v4().to_string(),
            iteration: 0,
            current_phase: None,
            tasks: BTreeMap::new(),
            objectives: BTreeMap::new(),
            phase_stats: BTreeMap::new(),
            analysis: AnalysisTracker::new(),
            bus: MessageBus::new(),
            conversation_summaries: BTreeMap::new(),
            started_at: now,
            updated_at: now,
        }
    }

    /// Register a task. Replaces an existing task with the same id.
    pub fn add_task(&mut self, task: Task) {
        self.tasks.insert(task.id.clone(), task);
        self.updated_at = Utc::now();
    }

    /// Register an objective.
    pub fn add_objective(&mut self, objective: Objective) {
        self.objectives.insert(objective.id.clone(), objective);
        self.updated_at = Utc::now();
    }

    pub fn task(&self, id: &str) -> Result<&Task, StateError> {
        self.tasks
            .get(id)
            .ok_or_else(|| StateError::UnknownTask(id.to_string()))
    }

    pub fn task_mut(&mut self, id: &str) -> Result<&mut Task, StateError> {
        self.updated_at = Utc::now();
        self.tasks
            .get_mut(id)
            .ok_or_else(|| StateError::UnknownTask(id.to_string()))
    }

    pub fn objective_mut(&mut self, id: &str) -> Result<&mut Objective, StateError> {
        self.updated_at = Utc::now();
        self.objectives
            .get_mut(id)
            .ok_or_else(|| StateError::UnknownObjective(id.to_string()))
    }

    /// Stats for a phase, created on first access.
    pub fn stats_mut(&mut self, kind: PhaseKind) -> &mut PhaseStats {
        self.phase_stats.entry(kind).or_default()
    }

    pub fn stats(&self, kind: PhaseKind) -> PhaseStats {
        self.phase_stats.get(&kind).cloned().unwrap_or_default()
    }

    /// Tasks in a given status, sorted by (priority, id) for deterministic
    /// selection.
    pub fn tasks_with_status(&self, status: TaskStatus) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| t.status == status)
            .collect();
        tasks.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.id.cmp(&b.id)));
        tasks
    }

    /// Whether any non-terminal, non-failed work remains.
    pub fn has_pending_work(&self) -> bool {
        self.tasks.values().any(|t| {
            matches!(
                t.status,
                TaskStatus::New | TaskStatus::InProgress | TaskStatus::NeedsFixes
            )
        })
    }

    /// Whether everything is settled: every task terminal and every
    /// objective out of active-like states. FAILED is not settled; a
    /// failed task is still awaiting investigation or a skip decision.
    pub fn is_settled(&self) -> bool {
        let tasks_done = self.tasks.values().all(|t| t.status.is_terminal());
        let objectives_done = self
            .objectives
            .values()
            .all(|o| !o.status.is_active_like());
        tasks_done && objectives_done
    }

    /// Recompute objective completion percentages from their tasks, promote
    /// objectives that cross the threshold, and unblock dependents. Returns
    /// the ids of objectives that completed this pass.
    pub fn evaluate_objectives(&mut self, threshold: f64) -> Vec<String> {
        // Completion is the fraction of the objective's tasks in a terminal
        // success state.
        let mut by_objective: BTreeMap<String, (u32, u32)> = BTreeMap::new();
        for task in self.tasks.values() {
            if let Some(oid) = &task.objective_id {
                let entry = by_objective.entry(oid.clone()).or_insert((0, 0));
                entry.0 += 1;
                if task.status == TaskStatus::Completed {
                    entry.1 += 1;
                }
            }
        }

        let mut newly_completed = Vec::new();
        for objective in self.objectives.values_mut() {
            if let Some((total, done)) = by_objective.get(&objective.id) {
                if *total > 0 {
                    objective.completion_percentage = f64::from(*done) / f64::from(*total) * 100.0;
                }
            }
            if objective.evaluate_completion(threshold) {
                info!(objective = %objective.id, "objective completed");
                newly_completed.push(objective.id.clone());
            }
        }

        if !newly_completed.is_empty() {
            let completed_ids: BTreeSet<String> = self
                .objectives
                .values()
                .filter(|o| o.status == ObjectiveStatus::Completed)
                .map(|o| o.id.clone())
                .collect();
            for objective in self.objectives.values_mut() {
                if objective.evaluate_unblock(&completed_ids) {
                    info!(objective = %objective.id, "objective unblocked");
                }
            }
        }
        self.updated_at = Utc::now();
        newly_completed
    }

    /// Counts by status, for the status display.
    pub fn status_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for task in self.tasks.values() {
            *counts.entry(task.status.to_string()).or_insert(0) += 1;
        }
        counts
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

/// Persists the snapshot to disk.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot, or start fresh if none exists. A present but
    /// unreadable snapshot is fatal: silently discarding state is worse
    /// than stopping.
    pub fn load_or_new(&self) -> Result<PipelineState, StateError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no snapshot found, starting fresh");
            return Ok(PipelineState::new());
        }
        let raw = fs::read_to_string(&self.path).map_err(|e| StateError::Corrupt {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        let state: PipelineState =
            serde_json::from_str(&raw).map_err(|e| StateError::Corrupt {
                path: self.path.clone(),
                message: e.to_string(),
            })?;
        if state.version != SNAPSHOT_VERSION {
            warn!(
                found = state.version,
                expected = SNAPSHOT_VERSION,
                "snapshot version mismatch, attempting to continue"
            );
        }
        info!(
            run_id = %state.run_id,
            iteration = state.iteration,
            tasks = state.tasks.len(),
            "resumed from snapshot"
        );
        Ok(state)
    }

    /// Write the snapshot atomically: serialize to a sibling temp file,
    /// then rename over the target.
    pub fn save(&self, state: &PipelineState) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create state directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(state).context("Failed to serialize snapshot")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|source| StateError::SnapshotWriteFailed {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| StateError::SnapshotWriteFailed {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), iteration = state.iteration, "snapshot saved");
        Ok(())
    }
}
