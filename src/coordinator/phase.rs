//! Pluggable pipeline phases.
//!
//! Each phase declares which tasks it can work, the tools its sessions may
//! use, and how a successful report routes the task's status. Phases are
//! registered at runtime; the selection chain in `selection` only ever
//! considers registered kinds.

use async_trait::async_trait;
use std::sync::Arc;

use crate::errors::PhaseError;
use crate::phase::PhaseKind;
use crate::session::session::{ConversationSession, SessionOutcome};
use crate::session::thread::ConversationThread;
use crate::session::worker::{ChatMessage, WorkerPool, WorkerRequest};
use crate::state::store::PipelineState;
use crate::state::task::{Task, TaskStatus};
use crate::tools::registry::ToolRegistry;

/// Analysis-data key set when a failed task is queued for investigation.
pub const NEEDS_INVESTIGATION_KEY: &str = "needs_investigation";
/// Analysis-data key set once investigation has run for a task.
pub const INVESTIGATED_KEY: &str = "investigated";

/// Everything a phase needs to drive one session, borrowed from the
/// coordinator for the duration of the run.
pub struct PhaseEnv<'a> {
    pub session: ConversationSession<'a>,
    pub pool: &'a WorkerPool,
    pub thread: &'a mut ConversationThread,
    pub analysis: &'a mut crate::analysis::AnalysisTracker,
    pub detector: &'a mut crate::detector::LoopDetector,
    pub prior_summary: Option<&'a str>,
    pub guidance_notes: &'a [String],
}

/// A unit of specialized pipeline behavior.
#[async_trait]
pub trait PipelinePhase: Send + Sync {
    fn kind(&self) -> PhaseKind;

    /// Tools this phase's sessions may call.
    fn registry(&self) -> &ToolRegistry;

    /// Whether this phase can work the task right now.
    fn is_eligible(&self, task: &Task, state: &PipelineState) -> bool;

    /// Phase-specific instructions appended to the session system prompt.
    fn instructions(&self) -> &str {
        ""
    }

    /// Map a successful session report to the task's next status.
    fn route_success(&self, task: &Task, report: &str) -> TaskStatus;

    /// Run one session on the task. The default drives a conversation
    /// session; phases with a different execution model override this.
    async fn run(&self, env: &mut PhaseEnv<'_>, task: &Task) -> Result<SessionOutcome, PhaseError> {
        env.session
            .run(
                task,
                env.thread,
                env.analysis,
                env.detector,
                env.prior_summary,
                env.guidance_notes,
            )
            .await
    }
}

fn is_non_doc_pending(task: &Task) -> bool {
    task.status.is_pending() && !task.is_documentation()
}

/// Writes new code and fixes for ordinary pending tasks.
pub struct CodingPhase {
    registry: ToolRegistry,
}

impl CodingPhase {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl PipelinePhase for CodingPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Coding
    }

    fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn is_eligible(&self, task: &Task, _: &PipelineState) -> bool {
        is_non_doc_pending(task) && !task.issue_type.is_refactoring_trigger()
    }

    fn route_success(&self, _: &Task, _: &str) -> TaskStatus {
        TaskStatus::QaPending
    }
}

/// Validates completed work. Only runs when no pending work remains: QA
/// checks finished results, not work-in-progress.
pub struct QaPhase {
    registry: ToolRegistry,
}

impl QaPhase {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl PipelinePhase for QaPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Qa
    }

    fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn is_eligible(&self, task: &Task, state: &PipelineState) -> bool {
        task.status == TaskStatus::QaPending && !state.has_pending_work()
    }

    fn instructions(&self) -> &str {
        "You are validating finished work. End your final report with \
         'VERDICT: PASS' if the work is acceptable or 'VERDICT: FAIL' with \
         the concrete problems found."
    }

    fn route_success(&self, _: &Task, report: &str) -> TaskStatus {
        if report.contains("VERDICT: FAIL") {
            TaskStatus::NeedsFixes
        } else {
            TaskStatus::Completed
        }
    }
}

/// Works tasks QA sent back.
pub struct DebuggingPhase {
    registry: ToolRegistry,
}

impl DebuggingPhase {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl PipelinePhase for DebuggingPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Debugging
    }

    fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn is_eligible(&self, task: &Task, _: &PipelineState) -> bool {
        task.status == TaskStatus::NeedsFixes
    }

    fn route_success(&self, _: &Task, _: &str) -> TaskStatus {
        TaskStatus::QaPending
    }
}

/// Merges duplicates and untangles structural conflicts.
pub struct RefactoringPhase {
    registry: ToolRegistry,
}

impl RefactoringPhase {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl PipelinePhase for RefactoringPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Refactoring
    }

    fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn is_eligible(&self, task: &Task, _: &PipelineState) -> bool {
        is_non_doc_pending(task) && task.issue_type.is_refactoring_trigger()
    }

    fn route_success(&self, _: &Task, _: &str) -> TaskStatus {
        TaskStatus::QaPending
    }
}

/// Writes documentation; its output skips QA.
pub struct DocumentationPhase {
    registry: ToolRegistry,
}

impl DocumentationPhase {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl PipelinePhase for DocumentationPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Documentation
    }

    fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn is_eligible(&self, task: &Task, _: &PipelineState) -> bool {
        task.status.is_pending() && task.is_documentation()
    }

    fn route_success(&self, _: &Task, _: &str) -> TaskStatus {
        TaskStatus::Completed
    }
}

/// Diagnoses tasks that exhausted their attempts. Instead of a tool
/// session it fans the failure history out to every configured worker in
/// parallel and folds their diagnoses into one report.
pub struct InvestigationPhase {
    registry: ToolRegistry,
}

impl InvestigationPhase {
    pub fn new() -> Self {
        Self {
            registry: ToolRegistry::new(),
        }
    }
}

impl Default for InvestigationPhase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PipelinePhase for InvestigationPhase {
    fn kind(&self) -> PhaseKind {
        PhaseKind::Investigation
    }

    fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn is_eligible(&self, task: &Task, _: &PipelineState) -> bool {
        task.status == TaskStatus::Failed
            && task
                .analysis_data
                .get(NEEDS_INVESTIGATION_KEY)
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
            && !task
                .analysis_data
                .get(INVESTIGATED_KEY)
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
    }

    /// Investigation recommends a fresh attempt; the coordinator resets
    /// the task for one more round.
    fn route_success(&self, _: &Task, _: &str) -> TaskStatus {
        TaskStatus::InProgress
    }

    async fn run(&self, env: &mut PhaseEnv<'_>, task: &Task) -> Result<SessionOutcome, PhaseError> {
        let prompt = format!(
            "Task {} has failed {} attempt(s) and needs diagnosis.\n\
             Description: {}\nTarget files: {}\n\n{}\n\n\
             Explain the most likely root cause and what the next attempt \
             should do differently.",
            task.id,
            task.attempts,
            task.description,
            task.target_files.join(", "),
            task.error_context(5)
        );
        let request = WorkerRequest {
            messages: vec![ChatMessage::user(prompt)],
            tools: Vec::new(),
        };
        let responses = env.pool.consult_all(&request).await;
        if responses.is_empty() {
            // No opinions at all still resolves the investigation; the
            // task will be skipped rather than stall the pipeline.
            return Ok(SessionOutcome {
                success: false,
                mutated_state: false,
                report: "No worker produced a diagnosis".to_string(),
                turns: 1,
                tool_calls: 0,
                intervention: None,
            });
        }
        let report = responses
            .into_iter()
            .map(|(name, response)| format!("[{}] {}", name, response.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(SessionOutcome {
            success: true,
            mutated_state: true,
            report,
            turns: 1,
            tool_calls: 0,
            intervention: None,
        })
    }
}

/// The default phase set over a shared tool registry.
pub fn default_phases(registry: &ToolRegistry) -> Vec<Arc<dyn PipelinePhase>> {
    vec![
        Arc::new(CodingPhase::new(registry.clone())),
        Arc::new(QaPhase::new(registry.clone())),
        Arc::new(DebuggingPhase::new(registry.clone())),
        Arc::new(RefactoringPhase::new(registry.clone())),
        Arc::new(DocumentationPhase::new(registry.clone())),
        Arc::new(InvestigationPhase::new()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::task::IssueType;
    use serde_json::json;

    fn state() -> PipelineState {
        PipelineState::new()
    }

    #[test]
    fn test_coding_skips_refactoring_triggers() {
        let phase = CodingPhase::new(ToolRegistry::new());
        let plain = Task::new("fix", vec!["a.py".into()], IssueType::GenericFix);
        let dup = Task::new("merge", vec!["a.py".into()], IssueType::DuplicateMerge);
        assert!(phase.is_eligible(&plain, &state()));
        assert!(!phase.is_eligible(&dup, &state()));
    }

    #[test]
    fn test_qa_waits_for_pending_work() {
        let phase = QaPhase::new(ToolRegistry::new());
        let mut done = Task::new("done", vec!["a.py".into()], IssueType::GenericFix);
        done.transition(TaskStatus::InProgress).unwrap();
        done.transition(TaskStatus::QaPending).unwrap();

        let mut s = state();
        s.add_task(done.clone());
        assert!(phase.is_eligible(&done, &s));

        // Pending work elsewhere blocks QA.
        s.add_task(Task::new("new", vec!["b.py".into()], IssueType::GenericFix));
        assert!(!phase.is_eligible(&done, &s));
    }

    #[test]
    fn test_qa_verdict_routing() {
        let phase = QaPhase::new(ToolRegistry::new());
        let task = Task::new("t", vec!["a.py".into()], IssueType::GenericFix);
        assert_eq!(
            phase.route_success(&task, "All good. VERDICT: PASS"),
            TaskStatus::Completed
        );
        assert_eq!(
            phase.route_success(&task, "Broken import. VERDICT: FAIL"),
            TaskStatus::NeedsFixes
        );
    }

    #[test]
    fn test_documentation_claims_md_tasks() {
        let doc = DocumentationPhase::new(ToolRegistry::new());
        let coding = CodingPhase::new(ToolRegistry::new());
        let task = Task::new("guide", vec!["docs/guide.md".into()], IssueType::GenericFix);
        assert!(doc.is_eligible(&task, &state()));
        assert!(!coding.is_eligible(&task, &state()));
    }

    #[test]
    fn test_investigation_needs_flag() {
        let phase = InvestigationPhase::new();
        let mut task = Task::new("t", vec!["a.py".into()], IssueType::GenericFix);
        task.transition(TaskStatus::InProgress).unwrap();
        task.transition(TaskStatus::Failed).unwrap();
        assert!(!phase.is_eligible(&task, &state()));

        task.analysis_data
            .insert(NEEDS_INVESTIGATION_KEY.into(), json!(true));
        assert!(phase.is_eligible(&task, &state()));

        task.analysis_data.insert(INVESTIGATED_KEY.into(), json!(true));
        assert!(!phase.is_eligible(&task, &state()));
    }
}
