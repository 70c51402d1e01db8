//! Conversation session driver.
//!
//! One session works one task inside one phase. The protocol with the
//! model is strict: exactly one tool call per turn. Extra calls in a reply
//! are ignored and the model is told so; a reply with no call is the
//! session's final report. Every failure path feeds corrective guidance
//! back into the next prompt rather than aborting the session.

use tracing::{debug, info, warn};

use crate::analysis::{AnalysisTracker, Validation};
use crate::config::PipelineConfig;
use crate::detector::{Event, Intervention, LoopDetector};
use crate::errors::PhaseError;
use crate::phase::PhaseKind;
use crate::session::thread::{AttemptRecord, ConversationThread};
use crate::session::worker::{ChatMessage, WorkerPool, WorkerRequest};
use crate::state::task::Task;
use crate::tools::registry::{ToolContext, ToolRegistry};

/// Tool output beyond this many characters is truncated in the transcript.
const MAX_TOOL_OUTPUT_CHARS: usize = 4000;

/// Banner prepended to corrective guidance so it stands out from ordinary
/// task context.
const GUIDANCE_BANNER: &str = "=== ACTION REQUIRED ===";

/// How one session ended.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub success: bool,
    /// Whether any executed tool mutated project or pipeline state.
    pub mutated_state: bool,
    /// The model's final report text.
    pub report: String,
    pub turns: u32,
    pub tool_calls: u32,
    /// Set when the loop detector cut the session short.
    pub intervention: Option<Intervention>,
}

/// Drives one task conversation for one phase.
pub struct ConversationSession<'a> {
    pub phase: PhaseKind,
    pub registry: &'a ToolRegistry,
    pub pool: &'a WorkerPool,
    pub config: &'a PipelineConfig,
    /// Phase-specific instructions appended to the system prompt.
    pub instructions: &'a str,
}

impl ConversationSession<'_> {
    /// Run the session to completion: either the model files a report, the
    /// loop detector intervenes, or the turn budget runs out.
    pub async fn run(
        &self,
        task: &Task,
        thread: &mut ConversationThread,
        analysis: &mut AnalysisTracker,
        detector: &mut LoopDetector,
        prior_summary: Option<&str>,
        guidance_notes: &[String],
    ) -> Result<SessionOutcome, PhaseError> {
        thread.reset_messages();
        thread.push(ChatMessage::system(self.system_prompt(task, analysis)));
        thread.push(ChatMessage::user(self.opening_prompt(
            task,
            prior_summary,
            guidance_notes,
        )));

        let ctx = ToolContext {
            project_dir: self.config.project_dir.clone(),
            task_id: task.id.clone(),
        };
        let mut mutated_state = false;
        let mut tool_calls_made: u32 = 0;
        let mut turns: u32 = 0;
        // Fingerprints of mutating calls already applied, for the
        // idempotent no-op rule.
        let mut applied_mutations: Vec<(String, String)> = Vec::new();
        let mut pending_guidance: Option<String> = None;

        while turns < self.config.max_session_turns {
            turns += 1;
            if let Some(guidance) = pending_guidance.take() {
                thread.push(ChatMessage::user(format!(
                    "{GUIDANCE_BANNER}\n{guidance}\n\nContinue working on the task."
                )));
            }

            let request = WorkerRequest {
                messages: thread.messages.clone(),
                tools: self.registry.schemas(),
            };
            let response = self.pool.execute(&request).await?;
            thread.push(ChatMessage::assistant(response.content.clone()));

            // A reply without a tool call is the final report. The report
            // only counts as success when there is evidence the work
            // exists: a mutation this session, or the target files already
            // on disk.
            let Some(call) = response.tool_calls.first().cloned() else {
                let artifact_present = mutated_state
                    || task
                        .target_files
                        .iter()
                        .any(|f| self.config.project_dir.join(f).exists());
                if !artifact_present {
                    warn!(
                        task = %task.id,
                        phase = %self.phase,
                        "report filed with no work done and no artifact on disk"
                    );
                    let report = format!(
                        "Report filed without producing the target artifact: {}",
                        response.content
                    );
                    self.finish(task, thread, turns, tool_calls_made, false, &report);
                    return Ok(SessionOutcome {
                        success: false,
                        mutated_state,
                        report,
                        turns,
                        tool_calls: tool_calls_made,
                        intervention: None,
                    });
                }
                info!(
                    task = %task.id,
                    phase = %self.phase,
                    turns,
                    tool_calls = tool_calls_made,
                    "session concluded with report"
                );
                self.finish(task, thread, turns, tool_calls_made, true, &response.content);
                return Ok(SessionOutcome {
                    success: true,
                    mutated_state,
                    report: response.content,
                    turns,
                    tool_calls: tool_calls_made,
                    intervention: None,
                });
            };

            let mut extras_notice = String::new();
            if response.tool_calls.len() > 1 {
                let ignored = response.tool_calls.len() - 1;
                warn!(task = %task.id, ignored, "extra tool calls in one turn ignored");
                extras_notice = format!(
                    "\nNote: {ignored} additional tool call(s) in your previous reply were \
                     ignored. Emit exactly one tool call per turn and re-issue them one at \
                     a time if still needed."
                );
            }

            // Every proposed call counts against loop detection, executed
            // or not; a model stuck re-proposing a rejected call is stuck.
            let event = Event::tool_call(
                self.phase,
                &task.id,
                task.attempts,
                &call.name,
                &call.arguments,
            );
            if let Some(intervention) = detector.observe(event) {
                match &intervention {
                    Intervention::RequestGuidance { reason } => {
                        pending_guidance =
                            Some(format!("{reason}. Change your approach.{extras_notice}"));
                        continue;
                    }
                    _ => {
                        self.finish(task, thread, turns, tool_calls_made, false, intervention.reason());
                        return Ok(SessionOutcome {
                            success: false,
                            mutated_state,
                            report: intervention.reason().to_string(),
                            turns,
                            tool_calls: tool_calls_made,
                            intervention: Some(intervention),
                        });
                    }
                }
            }

            match analysis.validate(task, &call.name, self.config.analysis_call_cap) {
                Validation::Allowed => {}
                Validation::Rejected { guidance, .. } => {
                    debug!(task = %task.id, tool = %call.name, "resolving call rejected");
                    pending_guidance = Some(format!("{guidance}{extras_notice}"));
                    continue;
                }
                Validation::ForceResolve { guidance } => {
                    pending_guidance = Some(format!("{guidance}{extras_notice}"));
                    continue;
                }
            }

            // Idempotent no-op: a mutating call identical to one already
            // applied this session is acknowledged, not re-executed.
            let fingerprint = (call.name.clone(), call.arguments.to_string());
            let is_mutating = self
                .registry
                .schemas()
                .iter()
                .any(|s| s.name == call.name && s.mutating);
            if is_mutating && applied_mutations.contains(&fingerprint) {
                pending_guidance = Some(format!(
                    "Tool '{}' with those arguments was already applied in this session; \
                     treating the repeat as a no-op. Move on to the next step.{extras_notice}",
                    call.name
                ));
                continue;
            }

            match self.registry.dispatch(&ctx, &call) {
                Ok(outcome) => {
                    tool_calls_made += 1;
                    analysis.record_call(
                        task,
                        &call.name,
                        &call.arguments,
                        &self.config.architecture_doc,
                    );
                    if outcome.mutated_state {
                        mutated_state = true;
                        applied_mutations.push(fingerprint);
                    }
                    let mut output = outcome.output;
                    if output.len() > MAX_TOOL_OUTPUT_CHARS {
                        output.truncate(MAX_TOOL_OUTPUT_CHARS);
                        output.push_str("\n[output truncated]");
                    }
                    thread.push(ChatMessage::tool(format!(
                        "Result of {}:\n{}{}",
                        call.name, output, extras_notice
                    )));
                }
                Err(err) => {
                    // Dispatch failures are feedback; the loop never dies
                    // on a bad tool name or bad arguments.
                    debug!(task = %task.id, error = %err, "tool call failed, feeding back");
                    pending_guidance = Some(format!("{err}{extras_notice}"));
                }
            }
        }

        self.finish(task, thread, turns, tool_calls_made, false, "turn budget exhausted");
        Err(PhaseError::TurnBudgetExhausted {
            phase: self.phase.name().to_string(),
            turns,
        })
    }

    fn system_prompt(&self, task: &Task, analysis: &AnalysisTracker) -> String {
        let checklist = analysis.checklist(task);
        let extra = if self.instructions.is_empty() {
            String::new()
        } else {
            format!("\n\n{}", self.instructions)
        };
        format!(
            "You are the {} phase of an autonomous development pipeline.\n\
             \n\
             Protocol:\n\
             - Emit exactly ONE tool call per turn.\n\
             - When the task is done (or cannot proceed), reply with a plain-text \
             report and no tool call.\n\
             - Rejected or failed calls come back with guidance; follow it.\n\
             \n\
             Available tools:\n{}\n\
             \n\
             Analysis checklist for this task:\n{}{}",
            self.phase,
            self.registry.render_catalog(),
            checklist,
            extra
        )
    }

    fn opening_prompt(
        &self,
        task: &Task,
        prior_summary: Option<&str>,
        guidance_notes: &[String],
    ) -> String {
        let mut sections = Vec::new();
        // Retry context leads, visually set off, so fresh guidance is the
        // first thing the model reads.
        let errors = task.error_context(3);
        if !errors.is_empty() {
            sections.push(format!("{GUIDANCE_BANNER}\nEarlier attempts failed:\n{errors}"));
        }
        sections.push(format!(
            "Task {} ({}): {}\nTarget files: {}",
            task.id,
            task.issue_type.name(),
            task.description,
            task.target_files.join(", ")
        ));
        if let Some(summary) = prior_summary {
            if !summary.is_empty() {
                sections.push(format!("Previous attempts:\n{summary}"));
            }
        }
        if !guidance_notes.is_empty() {
            sections.push(format!("Notes from other phases:\n{}", guidance_notes.join("\n")));
        }
        sections.join("\n\n")
    }

    fn finish(
        &self,
        task: &Task,
        thread: &mut ConversationThread,
        turns: u32,
        tool_calls: u32,
        success: bool,
        summary: &str,
    ) {
        thread.record_attempt(AttemptRecord {
            attempt: task.attempts,
            phase: self.phase.name().to_string(),
            turns,
            tool_calls,
            success,
            summary: summary.chars().take(200).collect(),
            finished_at: chrono::Utc::now(),
        });
    }
}
