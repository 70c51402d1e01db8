//! Phase and task selection.
//!
//! Selection walks a strict priority chain over the registered phases:
//! fix work beats documentation, documentation beats refactoring,
//! refactoring beats new coding, and QA runs only once nothing earlier in
//! the chain has work. The first phase with an eligible task wins; a
//! dimensional tie-break score orders the candidates inside that phase.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use crate::config::SelectionWeights;
use crate::coordinator::phase::PipelinePhase;
use crate::phase::PhaseKind;
use crate::state::store::PipelineState;
use crate::state::task::Task;

/// The selected phase/task pair for one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub phase: PhaseKind,
    pub task_id: String,
}

/// Tie-break score for a task under a phase. Higher wins.
///
/// `affinity * dot(profile, phase_affinity)
///  - recency_penalty * consecutive_selections
///  - attempt_penalty * attempts`
pub fn score(
    task: &Task,
    kind: PhaseKind,
    state: &PipelineState,
    weights: &SelectionWeights,
) -> f64 {
    let profile = task
        .objective_id
        .as_ref()
        .and_then(|id| state.objectives.get(id))
        .map(|o| o.dimensional_profile)
        .unwrap_or_default();
    let stats = state.stats(kind);
    weights.affinity * profile.dot(&kind.affinity())
        - weights.recency_penalty * f64::from(stats.consecutive_selections)
        - weights.attempt_penalty * f64::from(task.attempts)
}

/// Walk the priority chain and pick the first phase with work, skipping
/// masked phases (forced transitions mask a phase for one round).
pub fn select(
    state: &PipelineState,
    phases: &BTreeMap<PhaseKind, Arc<dyn PipelinePhase>>,
    weights: &SelectionWeights,
    masked: &BTreeSet<PhaseKind>,
) -> Option<Candidate> {
    for kind in PhaseKind::ALL {
        if masked.contains(&kind) {
            continue;
        }
        let Some(phase) = phases.get(&kind) else {
            continue;
        };
        let mut eligible: Vec<&Task> = state
            .tasks
            .values()
            .filter(|t| phase.is_eligible(t, state))
            .collect();
        if eligible.is_empty() {
            continue;
        }
        // Urgency first, then the tie-break score, then id for determinism.
        eligible.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| {
                    score(b, kind, state, weights)
                        .partial_cmp(&score(a, kind, state, weights))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.id.cmp(&b.id))
        });
        let task = eligible[0];
        debug!(phase = %kind, task = %task.id, "candidate selected");
        return Some(Candidate {
            phase: kind,
            task_id: task.id.clone(),
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::phase::default_phases;
    use crate::state::objective::{DimensionalProfile, Objective, ObjectiveLevel};
    use crate::state::task::{IssueType, TaskStatus};
    use crate::tools::registry::ToolRegistry;

    fn phases() -> BTreeMap<PhaseKind, Arc<dyn PipelinePhase>> {
        default_phases(&ToolRegistry::new())
            .into_iter()
            .map(|p| (p.kind(), p))
            .collect()
    }

    fn weights() -> SelectionWeights {
        SelectionWeights::default()
    }

    #[test]
    fn test_needs_fixes_beats_everything() {
        let mut state = PipelineState::new();
        state.add_task(Task::new("new work", vec!["a.py".into()], IssueType::GenericFix));
        let mut broken = Task::new("broken", vec!["b.py".into()], IssueType::GenericFix);
        broken.transition(TaskStatus::InProgress).unwrap();
        broken.transition(TaskStatus::NeedsFixes).unwrap();
        let broken_id = broken.id.clone();
        state.add_task(broken);

        let candidate = select(&state, &phases(), &weights(), &BTreeSet::new()).unwrap();
        assert_eq!(candidate.phase, PhaseKind::Debugging);
        assert_eq!(candidate.task_id, broken_id);
    }

    #[test]
    fn test_documentation_beats_coding() {
        let mut state = PipelineState::new();
        state.add_task(Task::new("code", vec!["a.py".into()], IssueType::GenericFix));
        let doc = Task::new("guide", vec!["docs/a.md".into()], IssueType::Documentation);
        let doc_id = doc.id.clone();
        state.add_task(doc);

        let candidate = select(&state, &phases(), &weights(), &BTreeSet::new()).unwrap();
        assert_eq!(candidate.phase, PhaseKind::Documentation);
        assert_eq!(candidate.task_id, doc_id);
    }

    #[test]
    fn test_refactoring_trigger_routes_away_from_coding() {
        let mut state = PipelineState::new();
        let dup = Task::new("merge dup", vec!["a.py".into()], IssueType::DuplicateMerge);
        state.add_task(dup);
        let candidate = select(&state, &phases(), &weights(), &BTreeSet::new()).unwrap();
        assert_eq!(candidate.phase, PhaseKind::Refactoring);
    }

    #[test]
    fn test_qa_only_when_nothing_pending() {
        let mut state = PipelineState::new();
        let mut done = Task::new("done", vec!["a.py".into()], IssueType::GenericFix);
        done.transition(TaskStatus::InProgress).unwrap();
        done.transition(TaskStatus::QaPending).unwrap();
        state.add_task(done);
        state.add_task(Task::new("wip", vec!["b.py".into()], IssueType::GenericFix));

        // Pending coding work wins over the QA-pending task.
        let candidate = select(&state, &phases(), &weights(), &BTreeSet::new()).unwrap();
        assert_eq!(candidate.phase, PhaseKind::Coding);
    }

    #[test]
    fn test_mask_forces_next_in_chain() {
        let mut state = PipelineState::new();
        state.add_task(Task::new("code", vec!["a.py".into()], IssueType::GenericFix));
        let mut done = Task::new("done", vec!["b.py".into()], IssueType::GenericFix);
        done.transition(TaskStatus::InProgress).unwrap();
        done.transition(TaskStatus::QaPending).unwrap();
        state.add_task(done);

        let masked: BTreeSet<PhaseKind> = [PhaseKind::Coding].into_iter().collect();
        // With coding masked there is no eligible phase: QA still refuses
        // because pending work exists.
        assert!(select(&state, &phases(), &weights(), &masked).is_none());
    }

    #[test]
    fn test_priority_orders_within_bucket() {
        let mut state = PipelineState::new();
        let urgent =
            Task::new("urgent", vec!["a.py".into()], IssueType::GenericFix).with_priority(1);
        let urgent_id = urgent.id.clone();
        state.add_task(urgent);
        state.add_task(
            Task::new("later", vec!["b.py".into()], IssueType::GenericFix).with_priority(99),
        );

        let candidate = select(&state, &phases(), &weights(), &BTreeSet::new()).unwrap();
        assert_eq!(candidate.task_id, urgent_id);
    }

    #[test]
    fn test_profile_affinity_breaks_ties() {
        let mut state = PipelineState::new();
        // One objective leans heavily functional, one heavily context.
        state.add_objective(
            Objective::new("func", "functional goal", ObjectiveLevel::Primary).with_profile(
                DimensionalProfile {
                    functional: 1.0,
                    ..DimensionalProfile::zero()
                },
            ),
        );
        state.add_objective(
            Objective::new("ctx", "context goal", ObjectiveLevel::Primary).with_profile(
                DimensionalProfile {
                    context: 1.0,
                    ..DimensionalProfile::zero()
                },
            ),
        );
        let functional = Task::new("f", vec!["a.py".into()], IssueType::GenericFix)
            .with_objective("func");
        let functional_id = functional.id.clone();
        state.add_task(functional);
        state.add_task(
            Task::new("c", vec!["b.py".into()], IssueType::GenericFix).with_objective("ctx"),
        );

        // Coding's affinity is strongest on the functional dimension.
        let candidate = select(&state, &phases(), &weights(), &BTreeSet::new()).unwrap();
        assert_eq!(candidate.phase, PhaseKind::Coding);
        assert_eq!(candidate.task_id, functional_id);
    }

    #[test]
    fn test_attempt_penalty_prefers_fresh_task() {
        let state = PipelineState::new();
        let fresh = Task::new("fresh", vec!["a.py".into()], IssueType::GenericFix);
        let mut worn = Task::new("worn", vec!["b.py".into()], IssueType::GenericFix);
        worn.attempts = 2;
        let w = SelectionWeights::default();
        assert!(
            score(&fresh, PhaseKind::Coding, &state, &w)
                > score(&worn, PhaseKind::Coding, &state, &w)
        );
    }

    #[test]
    fn test_empty_state_selects_nothing() {
        let state = PipelineState::new();
        assert!(select(&state, &phases(), &weights(), &BTreeSet::new()).is_none());
    }
}
