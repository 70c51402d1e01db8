//! The phase coordinator: the autonomous decision loop.
//!
//! Each iteration: evaluate objectives, pick a phase/task through the
//! priority chain (honoring forced transitions), run one session, route
//! the outcome through the task state machine, and persist the snapshot.
//! The loop runs until the pipeline settles; per-task failures escalate or
//! skip, they never stall the loop waiting for a human.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::bus::topics;
use crate::config::PipelineConfig;
use crate::coordinator::phase::{
    default_phases, PhaseEnv, PipelinePhase, INVESTIGATED_KEY, NEEDS_INVESTIGATION_KEY,
};
use crate::coordinator::selection::{self, Candidate};
use crate::detector::{Event, LoopDetector};
use crate::errors::PhaseError;
use crate::phase::PhaseKind;
use crate::session::session::{ConversationSession, SessionOutcome};
use crate::session::thread::ConversationThread;
use crate::session::worker::WorkerPool;
use crate::state::objective::Objective;
use crate::state::store::{PipelineState, StateStore};
use crate::state::task::{Task, TaskStatus};

/// What one iteration did.
#[derive(Debug, Clone, PartialEq)]
pub enum IterationReport {
    /// Nothing eligible; the pipeline is settled or blocked on nothing.
    Idle,
    Ran {
        phase: PhaseKind,
        task_id: String,
        success: bool,
        mutated_state: bool,
    },
}

/// The coordinator owns all pipeline state for one run.
pub struct Coordinator {
    config: PipelineConfig,
    store: StateStore,
    state: PipelineState,
    phases: BTreeMap<PhaseKind, Arc<dyn PipelinePhase>>,
    pool: WorkerPool,
    detector: LoopDetector,
}

impl Coordinator {
    /// Build a coordinator with the default phase set, resuming from the
    /// snapshot if one exists.
    pub fn new(
        config: PipelineConfig,
        pool: WorkerPool,
        registry: &crate::tools::registry::ToolRegistry,
    ) -> anyhow::Result<Self> {
        let phases = default_phases(registry)
            .into_iter()
            .map(|p| (p.kind(), p))
            .collect();
        Self::with_phases(config, pool, phases)
    }

    /// Build with an explicit phase set.
    pub fn with_phases(
        config: PipelineConfig,
        pool: WorkerPool,
        phases: BTreeMap<PhaseKind, Arc<dyn PipelinePhase>>,
    ) -> anyhow::Result<Self> {
        let store = StateStore::new(config.state_file());
        let state = store.load_or_new()?;
        let detector = LoopDetector::new(config.detector_window, config.repeat_call_threshold);
        Ok(Self {
            config,
            store,
            state,
            phases,
            pool,
            detector,
        })
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn add_task(&mut self, task: Task) {
        self.state.add_task(task);
    }

    pub fn add_objective(&mut self, objective: Objective) {
        self.state.add_objective(objective);
    }

    /// Run iterations until the pipeline settles or nothing is eligible.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        info!(run_id = %self.state.run_id, "coordinator loop starting");
        while self.step().await? != IterationReport::Idle {}
        Ok(())
    }

    /// One full step: evaluate objectives, run one iteration, persist the
    /// snapshot. Returns `Idle` once nothing is eligible or the pipeline
    /// has settled.
    pub async fn step(&mut self) -> anyhow::Result<IterationReport> {
        self.state
            .evaluate_objectives(self.config.completion_threshold);
        if self.state.is_settled() {
            info!(iterations = self.state.iteration, "pipeline settled");
            self.store.save(&self.state)?;
            return Ok(IterationReport::Idle);
        }
        let report = self.run_iteration().await?;
        if report != IterationReport::Idle {
            self.state.iteration += 1;
        }
        self.state
            .evaluate_objectives(self.config.completion_threshold);
        self.store.save(&self.state)?;
        Ok(report)
    }

    /// One decision-loop step: select, run, route, record.
    pub async fn run_iteration(&mut self) -> anyhow::Result<IterationReport> {
        let Some(candidate) = self.select_with_forcing() else {
            return Ok(IterationReport::Idle);
        };
        let kind = candidate.phase;
        self.note_selection(kind);

        let phase = self
            .phases
            .get(&kind)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("phase {kind} selected but not registered"))?;

        // Bump the task into IN_PROGRESS for this run. Investigation works
        // the task while it stays FAILED. Attempts are failure accounting
        // and only move in `fail_or_retry`.
        let task = {
            let task = self.state.task_mut(&candidate.task_id)?;
            if kind != PhaseKind::Investigation
                && matches!(task.status, TaskStatus::New | TaskStatus::NeedsFixes)
            {
                task.transition(TaskStatus::InProgress)?;
            }
            task.clone()
        };

        let prior_summary = self.state.conversation_summaries.get(&task.id).cloned();
        let guidance_notes: Vec<String> = self
            .state
            .bus
            .notes_for_task(topics::QA_FINDINGS, &task.id)
            .into_iter()
            .chain(self.state.bus.notes_for_task(topics::ESCALATIONS, &task.id))
            .map(|n| format!("[{}] {}", n.sender, n.body))
            .collect();

        let mut thread = ConversationThread::new(&task.id);
        let result = {
            let session = ConversationSession {
                phase: kind,
                registry: phase.registry(),
                pool: &self.pool,
                config: &self.config,
                instructions: phase.instructions(),
            };
            let mut env = PhaseEnv {
                session,
                pool: &self.pool,
                thread: &mut thread,
                analysis: &mut self.state.analysis,
                detector: &mut self.detector,
                prior_summary: prior_summary.as_deref(),
                guidance_notes: &guidance_notes,
            };
            phase.run(&mut env, &task).await
        };
        self.state
            .conversation_summaries
            .insert(task.id.clone(), thread.summarize());

        let (success, mutated) = match result {
            Ok(outcome) if outcome.success => {
                self.apply_success(&phase, &task.id, &outcome)?;
                (true, outcome.mutated_state)
            }
            Ok(outcome) => {
                self.apply_intervention(&task.id, kind, &outcome)?;
                (false, outcome.mutated_state)
            }
            Err(err) => {
                self.apply_failure(&task.id, kind, &err)?;
                (false, false)
            }
        };

        self.state
            .stats_mut(kind)
            .record_run(success, mutated, Some(&task.id));
        if let Some(intervention) =
            self.detector.observe(Event::phase_run(kind, mutated))
        {
            // Phase-level patterns only ever ask for a change of approach;
            // the guidance lands in the task's next session prompt, and the
            // forcing mask handles the phase itself.
            warn!(reason = intervention.reason(), "phase-level loop pattern");
            self.state.bus.publish(
                topics::ESCALATIONS,
                "coordinator",
                intervention.reason(),
                Some(&task.id),
            );
        }
        self.state.current_phase = Some(kind);
        Ok(IterationReport::Ran {
            phase: kind,
            task_id: task.id,
            success,
            mutated_state: mutated,
        })
    }

    /// Select through the chain, forcing a transition away from any phase
    /// that has been selected too many times in a row or keeps reporting
    /// no mutations.
    fn select_with_forcing(&mut self) -> Option<Candidate> {
        let mut masked = BTreeSet::new();
        for kind in PhaseKind::ALL {
            let stats = self.state.stats(kind);
            let over_selected =
                stats.consecutive_selections >= self.config.max_consecutive_selections;
            let stagnant = stats.consecutive_no_mutation >= self.config.max_no_mutation;
            let failing =
                stats.consecutive_failures >= self.config.max_consecutive_failures;
            let unstable =
                stats.is_oscillating(self.config.repeat_call_threshold as usize);
            if over_selected || stagnant || failing || unstable {
                info!(
                    phase = %kind,
                    selections = stats.consecutive_selections,
                    no_mutation = stats.consecutive_no_mutation,
                    "forcing transition away from phase"
                );
                masked.insert(kind);
                let stats = self.state.stats_mut(kind);
                stats.reset_selection_streak();
                stats.consecutive_no_mutation = 0;
                stats.consecutive_failures = 0;
            }
        }
        let candidate = selection::select(
            &self.state,
            &self.phases,
            &self.config.selection_weights,
            &masked,
        );
        if candidate.is_none() && !masked.is_empty() {
            // Nowhere to transition to; progress beats strict forcing.
            return selection::select(
                &self.state,
                &self.phases,
                &self.config.selection_weights,
                &BTreeSet::new(),
            );
        }
        candidate
    }

    fn note_selection(&mut self, selected: PhaseKind) {
        for kind in PhaseKind::ALL {
            let stats = self.state.stats_mut(kind);
            if kind == selected {
                stats.record_selection();
            } else {
                stats.reset_selection_streak();
            }
        }
    }

    fn apply_success(
        &mut self,
        phase: &Arc<dyn PipelinePhase>,
        task_id: &str,
        outcome: &SessionOutcome,
    ) -> anyhow::Result<()> {
        let kind = phase.kind();
        let next = {
            let task = self.state.task(task_id)?;
            phase.route_success(task, &outcome.report)
        };

        if kind == PhaseKind::Investigation {
            // A diagnosis earns the task one fresh round of attempts.
            let report = outcome.report.clone();
            let task = self.state.task_mut(task_id)?;
            task.analysis_data
                .insert(INVESTIGATED_KEY.into(), serde_json::json!(true));
            task.attempts = 0;
            task.transition(TaskStatus::InProgress)?;
            self.state.bus.publish(
                topics::ESCALATIONS,
                PhaseKind::Investigation.name(),
                &report,
                Some(task_id),
            );
            info!(task = %task_id, "investigation complete, task re-queued");
            return Ok(());
        }

        if kind == PhaseKind::Qa && next == TaskStatus::NeedsFixes {
            self.state.bus.publish(
                topics::QA_FINDINGS,
                PhaseKind::Qa.name(),
                &outcome.report,
                Some(task_id),
            );
        }

        let routed = {
            let task = self.state.task_mut(task_id)?;
            let routed = task.status != next;
            if routed {
                task.transition(next)?;
                // The next unit of work gets a fresh retry budget.
                task.attempts = 0;
            }
            routed
        };
        info!(task = %task_id, phase = %kind, status = %next, "task routed");
        if next.is_terminal() {
            self.state.analysis.clear_task(task_id);
            self.detector.clear_task(task_id);
            self.state.conversation_summaries.remove(task_id);
        } else if routed {
            // Fresh unit of work, fresh analysis ledger.
            self.state.analysis.clear_task(task_id);
        }
        Ok(())
    }

    fn apply_intervention(
        &mut self,
        task_id: &str,
        kind: PhaseKind,
        outcome: &SessionOutcome,
    ) -> anyhow::Result<()> {
        let reason = outcome
            .intervention
            .as_ref()
            .map(|i| i.reason().to_string())
            .unwrap_or_else(|| outcome.report.clone());
        {
            let task = self.state.task_mut(task_id)?;
            task.add_error(kind.name(), &reason);
        }
        if kind == PhaseKind::Investigation {
            // Investigation has no further escalation path.
            return self.skip_task(task_id, &reason);
        }
        // Escalations and everything else go through the shared attempt
        // accounting.
        self.fail_or_retry(task_id, kind, &reason)
    }

    fn apply_failure(
        &mut self,
        task_id: &str,
        kind: PhaseKind,
        err: &PhaseError,
    ) -> anyhow::Result<()> {
        warn!(task = %task_id, phase = %kind, error = %err, "phase run failed");
        let message = err.to_string();
        {
            let task = self.state.task_mut(task_id)?;
            task.add_error(kind.name(), &message);
        }
        if kind == PhaseKind::Investigation {
            // A failed investigation is final for the task.
            return self.skip_task(task_id, "investigation failed");
        }
        self.fail_or_retry(task_id, kind, &message)
    }

    /// Shared failure accounting: each failure consumes one attempt.
    /// Exhausted attempts escalate once, then skip. A task under the
    /// attempt limit stays in progress for retry.
    fn fail_or_retry(
        &mut self,
        task_id: &str,
        kind: PhaseKind,
        reason: &str,
    ) -> anyhow::Result<()> {
        let max_attempts = self.config.max_attempts;
        let (attempts, investigated) = {
            let task = self.state.task_mut(task_id)?;
            task.failure_count += 1;
            task.attempts += 1;
            (
                task.attempts,
                task.analysis_data
                    .get(INVESTIGATED_KEY)
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
            )
        };
        if attempts < max_attempts {
            info!(task = %task_id, attempts, "attempt failed, task stays eligible");
            return Ok(());
        }
        if investigated {
            // Second exhaustion: investigation already had its shot.
            return self.skip_task(
                task_id,
                &format!("exhausted {max_attempts} attempts after investigation: {reason}"),
            );
        }
        let task = self.state.task_mut(task_id)?;
        if task.status != TaskStatus::Failed {
            task.transition(TaskStatus::Failed)?;
        }
        task.analysis_data
            .insert(NEEDS_INVESTIGATION_KEY.into(), serde_json::json!(true));
        warn!(task = %task_id, phase = %kind, "attempts exhausted, escalating to investigation");
        Ok(())
    }

    fn skip_task(&mut self, task_id: &str, reason: &str) -> anyhow::Result<()> {
        let task = self.state.task_mut(task_id)?;
        if task.status != TaskStatus::Failed {
            task.transition(TaskStatus::Failed)?;
        }
        task.transition(TaskStatus::Skipped)?;
        task.skip_reason = Some(reason.to_string());
        warn!(task = %task_id, reason, "task skipped");
        self.state.analysis.clear_task(task_id);
        self.detector.clear_task(task_id);
        Ok(())
    }
}
