//! Phase kinds and their selection affinities.
//!
//! A phase is a pluggable unit of specialized behavior (coding, QA,
//! debugging, ...) driving one conversation session. This module holds the
//! closed set of kinds plus the per-phase affinity vectors used by the
//! selection tie-break; the behavior behind each kind lives in
//! `coordinator::phase`.

use serde::{Deserialize, Serialize};

use crate::state::objective::DimensionalProfile;

/// The closed set of pipeline phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Coding,
    Qa,
    Debugging,
    Refactoring,
    Documentation,
    Investigation,
}

impl PhaseKind {
    /// All kinds, in priority-chain order (highest urgency first).
    pub const ALL: [PhaseKind; 6] = [
        PhaseKind::Debugging,
        PhaseKind::Documentation,
        PhaseKind::Refactoring,
        PhaseKind::Coding,
        PhaseKind::Qa,
        PhaseKind::Investigation,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PhaseKind::Coding => "coding",
            PhaseKind::Qa => "qa",
            PhaseKind::Debugging => "debugging",
            PhaseKind::Refactoring => "refactoring",
            PhaseKind::Documentation => "documentation",
            PhaseKind::Investigation => "investigation",
        }
    }

    /// Affinity vector this phase presents to the tie-break score. High
    /// values mark the objective dimensions the phase is best suited for.
    pub fn affinity(self) -> DimensionalProfile {
        match self {
            PhaseKind::Coding => DimensionalProfile {
                temporal: 0.5,
                functional: 0.9,
                data: 0.5,
                state: 0.6,
                error: 0.3,
                context: 0.4,
                integration: 0.4,
            },
            PhaseKind::Qa => DimensionalProfile {
                temporal: 0.4,
                functional: 0.5,
                data: 0.4,
                state: 0.4,
                error: 0.9,
                context: 0.5,
                integration: 0.5,
            },
            PhaseKind::Debugging => DimensionalProfile {
                temporal: 0.8,
                functional: 0.5,
                data: 0.5,
                state: 0.7,
                error: 1.0,
                context: 0.6,
                integration: 0.5,
            },
            PhaseKind::Refactoring => DimensionalProfile {
                temporal: 0.3,
                functional: 0.6,
                data: 0.5,
                state: 0.5,
                error: 0.4,
                context: 0.7,
                integration: 0.9,
            },
            PhaseKind::Documentation => DimensionalProfile {
                temporal: 0.2,
                functional: 0.3,
                data: 0.3,
                state: 0.2,
                error: 0.1,
                context: 0.8,
                integration: 0.3,
            },
            PhaseKind::Investigation => DimensionalProfile {
                temporal: 0.4,
                functional: 0.4,
                data: 0.8,
                state: 0.5,
                error: 0.6,
                context: 0.9,
                integration: 0.6,
            },
        }
    }
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
