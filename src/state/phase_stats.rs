//! Per-phase run statistics, including the consecutive counters the forced
//! transition rule and the loop detector consult.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Runs retained per phase for pattern queries.
const MAX_RUN_HISTORY: usize = 20;

/// One recorded phase run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub mutated_state: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// Counters and bounded history for one phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseStats {
    pub runs: u32,
    pub successes: u32,
    pub failures: u32,
    /// Consecutive unrecoverable failures; reset on any success.
    pub consecutive_failures: u32,
    /// Consecutive iterations this phase was selected; reset when another
    /// phase runs.
    pub consecutive_selections: u32,
    /// Consecutive runs that reported no state mutation.
    pub consecutive_no_mutation: u32,
    #[serde(default)]
    pub run_history: Vec<RunRecord>,
}

impl PhaseStats {
    /// Record a selection of this phase for the current iteration.
    pub fn record_selection(&mut self) {
        self.consecutive_selections += 1;
    }

    /// Reset the selection streak (another phase was selected, or a forced
    /// transition fired).
    pub fn reset_selection_streak(&mut self) {
        self.consecutive_selections = 0;
    }

    /// Record a completed run.
    pub fn record_run(&mut self, success: bool, mutated_state: bool, task_id: Option<&str>) {
        self.runs += 1;
        if success {
            self.successes += 1;
            self.consecutive_failures = 0;
        } else {
            self.failures += 1;
            self.consecutive_failures += 1;
        }
        if mutated_state {
            self.consecutive_no_mutation = 0;
        } else {
            self.consecutive_no_mutation += 1;
        }
        self.run_history.push(RunRecord {
            timestamp: Utc::now(),
            success,
            mutated_state,
            task_id: task_id.map(String::from),
        });
        if self.run_history.len() > MAX_RUN_HISTORY {
            let excess = self.run_history.len() - MAX_RUN_HISTORY;
            self.run_history.drain(..excess);
        }
    }

    /// Success rate over the last `n` runs.
    pub fn recent_success_rate(&self, n: usize) -> f64 {
        let start = self.run_history.len().saturating_sub(n);
        let recent = &self.run_history[start..];
        if recent.is_empty() {
            return 0.0;
        }
        recent.iter().filter(|r| r.success).count() as f64 / recent.len() as f64
    }

    /// Whether recent runs alternate success/failure, a sign of instability.
    pub fn is_oscillating(&self, threshold: usize) -> bool {
        if self.run_history.len() < threshold * 2 {
            return false;
        }
        let recent = &self.run_history[self.run_history.len() - threshold * 2..];
        let changes = recent
            .windows(2)
            .filter(|w| w[0].success != w[1].success)
            .count();
        changes >= threshold
    }
}
