//! Loop detection over recent pipeline activity.
//!
//! Watches a sliding window of events for three unproductive patterns:
//! the same tool called with identical arguments over and over inside one
//! attempt, a phase running repeatedly without mutating state, and two
//! phases trading control back and forth with no progress between them.
//! Detection yields an intervention for the coordinator to apply; the
//! detector itself never mutates pipeline state.

use serde_json::Value;
use std::collections::VecDeque;
use tracing::warn;

use crate::phase::PhaseKind;

/// One observed event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ToolCall {
        phase: PhaseKind,
        task_id: String,
        attempt: u32,
        tool: String,
        /// Canonical JSON of the arguments, for equality checks.
        args_fingerprint: String,
    },
    PhaseRun {
        phase: PhaseKind,
        mutated_state: bool,
    },
}

impl Event {
    pub fn tool_call(
        phase: PhaseKind,
        task_id: &str,
        attempt: u32,
        tool: &str,
        args: &Value,
    ) -> Self {
        Event::ToolCall {
            phase,
            task_id: task_id.to_string(),
            attempt,
            tool: tool.to_string(),
            // serde_json serializes map keys in iteration order; parsing and
            // re-serializing gives a stable fingerprint for equal values.
            args_fingerprint: args.to_string(),
        }
    }

    pub fn phase_run(phase: PhaseKind, mutated_state: bool) -> Self {
        Event::PhaseRun {
            phase,
            mutated_state,
        }
    }
}

/// What the coordinator should do about a detected loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Intervention {
    /// Hand the task to the investigation phase.
    Escalate { task_id: String, reason: String },
    /// Ask the session to change approach; injected as prompt guidance.
    RequestGuidance { reason: String },
}

impl Intervention {
    pub fn reason(&self) -> &str {
        match self {
            Intervention::Escalate { reason, .. }
            | Intervention::RequestGuidance { reason } => reason,
        }
    }
}

/// Sliding-window loop detector.
#[derive(Debug)]
pub struct LoopDetector {
    window: VecDeque<Event>,
    capacity: usize,
    /// Identical (tool, args) repetitions within one attempt that count as
    /// a loop.
    repeat_threshold: u32,
}

impl LoopDetector {
    pub fn new(capacity: usize, repeat_threshold: u32) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            repeat_threshold,
        }
    }

    /// Record an event and check the window for loop patterns.
    pub fn observe(&mut self, event: Event) -> Option<Intervention> {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(event);

        self.check_repeated_calls()
            .or_else(|| self.check_stagnant_phase())
            .or_else(|| self.check_oscillation())
    }

    /// Drop events for a task, e.g. after it is resolved or escalated.
    pub fn clear_task(&mut self, task_id: &str) {
        self.window.retain(|e| match e {
            Event::ToolCall { task_id: t, .. } => t != task_id,
            Event::PhaseRun { .. } => true,
        });
    }

    /// Pattern 1: the same (tool, args) pair repeated within one attempt.
    fn check_repeated_calls(&self) -> Option<Intervention> {
        let last = self.window.back()?;
        let Event::ToolCall {
            task_id,
            attempt,
            tool,
            args_fingerprint,
            ..
        } = last
        else {
            return None;
        };

        let repeats = self
            .window
            .iter()
            .filter(|e| {
                matches!(e, Event::ToolCall {
                    task_id: t,
                    attempt: a,
                    tool: tl,
                    args_fingerprint: f,
                    ..
                } if t == task_id && a == attempt && tl == tool && f == args_fingerprint)
            })
            .count() as u32;

        if repeats >= self.repeat_threshold {
            let reason = format!(
                "Tool '{}' called {} times with identical arguments in attempt {}",
                tool, repeats, attempt
            );
            warn!(task = %task_id, %reason, "repeated-call loop detected");
            return Some(Intervention::Escalate {
                task_id: task_id.clone(),
                reason,
            });
        }
        None
    }

    /// Pattern 2: the most recent runs of one phase all left state untouched.
    fn check_stagnant_phase(&self) -> Option<Intervention> {
        let last = self.window.back()?;
        let Event::PhaseRun { phase, .. } = last else {
            return None;
        };

        let runs: Vec<bool> = self
            .window
            .iter()
            .filter_map(|e| match e {
                Event::PhaseRun {
                    phase: p,
                    mutated_state,
                } if p == phase => Some(*mutated_state),
                _ => None,
            })
            .collect();

        let threshold = self.repeat_threshold as usize;
        if runs.len() >= threshold && runs.iter().rev().take(threshold).all(|m| !m) {
            let reason = format!(
                "Phase '{}' ran {} consecutive times without mutating state",
                phase, threshold
            );
            warn!(%reason, "stagnant-phase loop detected");
            return Some(Intervention::RequestGuidance { reason });
        }
        None
    }

    /// Pattern 3: control alternating A, B, A, B with no mutation anywhere.
    fn check_oscillation(&self) -> Option<Intervention> {
        let runs: Vec<(&PhaseKind, bool)> = self
            .window
            .iter()
            .filter_map(|e| match e {
                Event::PhaseRun {
                    phase,
                    mutated_state,
                } => Some((phase, *mutated_state)),
                _ => None,
            })
            .collect();
        if runs.len() < 4 {
            return None;
        }
        let tail = &runs[runs.len() - 4..];
        let alternating = tail[0].0 == tail[2].0
            && tail[1].0 == tail[3].0
            && tail[0].0 != tail[1].0;
        let no_progress = tail.iter().all(|(_, mutated)| !mutated);
        if alternating && no_progress {
            let reason = format!(
                "Phases '{}' and '{}' are oscillating without progress",
                tail[0].0, tail[1].0
            );
            warn!(%reason, "oscillation detected");
            return Some(Intervention::RequestGuidance { reason });
        }
        None
    }
}
