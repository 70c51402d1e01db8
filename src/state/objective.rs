//! Objectives: higher-level goals grouping related tasks.
//!
//! Each objective carries a fixed seven-dimension profile used by the
//! selection tie-break, a completion percentage, and dependencies on other
//! objectives. Completion evaluation matches on the status *enum*, never
//! a stringified value, so an objective in `completing` cannot silently
//! stall at its threshold.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Strategic level of an objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectiveLevel {
    Primary,
    Secondary,
    Tertiary,
}

/// Status of an objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectiveStatus {
    /// Currently being worked on.
    Active,
    /// All tasks done, awaiting final verification.
    Completing,
    /// Done and verified.
    Completed,
    /// Dependencies not met.
    Blocked,
}

impl ObjectiveStatus {
    /// Statuses eligible to be promoted to `Completed`.
    pub fn is_active_like(self) -> bool {
        matches!(self, ObjectiveStatus::Active | ObjectiveStatus::Completing)
    }
}

impl std::fmt::Display for ObjectiveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ObjectiveStatus::Active => "active",
            ObjectiveStatus::Completing => "completing",
            ObjectiveStatus::Completed => "completed",
            ObjectiveStatus::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// Fixed-size named dimension vector, each value in [0, 1].
///
/// A plain struct, not a generic geometry engine: the only consumer is the
/// selection tie-break's dot product.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionalProfile {
    /// Time urgency.
    pub temporal: f64,
    /// Feature complexity.
    pub functional: f64,
    /// Data-dependency count.
    pub data: f64,
    /// State-management need.
    pub state: f64,
    /// Error risk.
    pub error: f64,
    /// Context coupling.
    pub context: f64,
    /// Integration coupling.
    pub integration: f64,
}

impl Default for DimensionalProfile {
    fn default() -> Self {
        Self {
            temporal: 0.5,
            functional: 0.5,
            data: 0.5,
            state: 0.5,
            error: 0.5,
            context: 0.5,
            integration: 0.5,
        }
    }
}

impl DimensionalProfile {
    /// All dimensions at zero, for building sparse profiles.
    pub fn zero() -> Self {
        Self {
            temporal: 0.0,
            functional: 0.0,
            data: 0.0,
            state: 0.0,
            error: 0.0,
            context: 0.0,
            integration: 0.0,
        }
    }

    /// Canonical-order vector view, for scoring.
    pub fn as_array(&self) -> [f64; 7] {
        [
            self.temporal,
            self.functional,
            self.data,
            self.state,
            self.error,
            self.context,
            self.integration,
        ]
    }

    /// Dot product against another profile.
    pub fn dot(&self, other: &DimensionalProfile) -> f64 {
        self.as_array()
            .iter()
            .zip(other.as_array().iter())
            .map(|(a, b)| a * b)
            .sum()
    }

    /// Clamp every dimension into [0, 1].
    pub fn clamped(mut self) -> Self {
        for v in [
            &mut self.temporal,
            &mut self.functional,
            &mut self.data,
            &mut self.state,
            &mut self.error,
            &mut self.context,
            &mut self.integration,
        ] {
            *v = v.clamp(0.0, 1.0);
        }
        self
    }
}

/// A higher-level goal grouping related tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    pub id: String,
    pub title: String,
    pub level: ObjectiveLevel,
    pub status: ObjectiveStatus,
    #[serde(default)]
    pub dimensional_profile: DimensionalProfile,
    /// 0.0 to 100.0.
    pub completion_percentage: f64,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
}

impl Objective {
    pub fn new(id: &str, title: &str, level: ObjectiveLevel) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            level,
            status: ObjectiveStatus::Active,
            dimensional_profile: DimensionalProfile::default(),
            completion_percentage: 0.0,
            depends_on: BTreeSet::new(),
        }
    }

    /// Set the dimensional profile (clamped into range).
    pub fn with_profile(mut self, profile: DimensionalProfile) -> Self {
        self.dimensional_profile = profile.clamped();
        self
    }

    /// Add a dependency on another objective.
    pub fn with_dependency(mut self, objective_id: &str) -> Self {
        self.depends_on.insert(objective_id.to_string());
        self
    }

    /// Promote to `Completed` when the threshold is met and the status is
    /// active-like. Matches on the enum value directly. Returns true if the
    /// status changed.
    pub fn evaluate_completion(&mut self, threshold: f64) -> bool {
        if self.completion_percentage >= threshold && self.status.is_active_like() {
            self.status = ObjectiveStatus::Completed;
            return true;
        }
        false
    }

    /// Unblock if every dependency in `completed_ids` is satisfied. Returns
    /// true if the status changed.
    pub fn evaluate_unblock(&mut self, completed_ids: &BTreeSet<String>) -> bool {
        if self.status == ObjectiveStatus::Blocked
            && self.depends_on.iter().all(|d| completed_ids.contains(d))
        {
            self.status = ObjectiveStatus::Active;
            return true;
        }
        false
    }
}
