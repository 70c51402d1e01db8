//! End-to-end pipeline tests over a scripted model worker.
//!
//! No real inference server is involved: a mock worker replays canned
//! responses, and stub tools stand in for project mutations. The tests
//! drive the public `Coordinator` API the same way the CLI does.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

use conductor::bus::topics;
use conductor::config::PipelineConfig;
use conductor::coordinator::{Coordinator, IterationReport};
use conductor::errors::{ToolError, WorkerError};
use conductor::phase::PhaseKind;
use conductor::session::worker::{ModelWorker, WorkerPool, WorkerRequest, WorkerResponse};
use conductor::state::objective::{Objective, ObjectiveLevel, ObjectiveStatus};
use conductor::state::store::StateStore;
use conductor::state::task::{IssueType, Task, TaskStatus};
use conductor::tools::registry::{ToolCapability, ToolContext, ToolOutcome, ToolRegistry};
use conductor::tools::schema::{ToolCall, ToolSchema};

// ===== scripted worker =====

/// Replays a fixed response list, then answers every further request with a
/// plain passing report.
struct ScriptedWorker {
    responses: Mutex<Vec<WorkerResponse>>,
}

impl ScriptedWorker {
    fn new(responses: Vec<WorkerResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
        }
    }
}

#[async_trait]
impl ModelWorker for ScriptedWorker {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(&self, _: &WorkerRequest) -> Result<WorkerResponse, WorkerError> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Ok(report("Work verified. VERDICT: PASS"));
        }
        Ok(responses.remove(0))
    }
}

/// Always proposes a bogus tool with fresh arguments; every session it
/// drives burns its turn budget without progress.
struct FloundererWorker {
    counter: AtomicU32,
}

#[async_trait]
impl ModelWorker for FloundererWorker {
    fn name(&self) -> &str {
        "flounderer"
    }

    async fn execute(&self, _: &WorkerRequest) -> Result<WorkerResponse, WorkerError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(call(&format!("bogus_tool_{n}"), json!({ "n": n })))
    }
}

fn call(name: &str, args: serde_json::Value) -> WorkerResponse {
    WorkerResponse {
        content: format!("Calling {name}"),
        tool_calls: vec![ToolCall::new(name, args)],
    }
}

fn report(text: &str) -> WorkerResponse {
    WorkerResponse {
        content: text.into(),
        tool_calls: Vec::new(),
    }
}

/// Put the named files on disk so verification-style sessions have a real
/// artifact to point at.
fn seed_files(dir: &std::path::Path, files: &[&str]) {
    for file in files {
        let path = dir.join(file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, "def parse(): ...\n").unwrap();
    }
}

// ===== stub tools =====

struct StubTool {
    schema: ToolSchema,
    output: String,
}

impl ToolCapability for StubTool {
    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    fn execute(&self, _: &ToolContext, _: &ToolCall) -> Result<ToolOutcome, ToolError> {
        if self.schema.mutating {
            Ok(ToolOutcome::mutating(self.output.clone()))
        } else {
            Ok(ToolOutcome::read_only(self.output.clone()))
        }
    }
}

fn stub_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(StubTool {
        schema: ToolSchema::new("read_file", "Read a file's contents")
            .with_param("path", "string", "Path relative to the project root", true),
        output: "def parse(): ...".into(),
    }));
    registry.register(Arc::new(StubTool {
        schema: ToolSchema::new("compare_file_implementations", "Compare implementations"),
        output: "87% overlap".into(),
    }));
    registry.register(Arc::new(StubTool {
        schema: ToolSchema::new("merge_file_implementations", "Merge implementations").mutating(),
        output: "merged".into(),
    }));
    registry.register(Arc::new(StubTool {
        schema: ToolSchema::new("modify_file", "Apply a patch to a file").mutating(),
        output: "patched".into(),
    }));
    registry
}

#[tokio::test]
async fn duplicate_task_completes_without_redundant_analysis() {
    let dir = tempdir().unwrap();
    seed_files(dir.path(), &["a.py", "b.py"]);
    let config = PipelineConfig::new(dir.path().to_path_buf());
    let worker = Arc::new(ScriptedWorker::new(vec![
        call("compare_file_implementations", json!({"files": ["a.py", "b.py"]})),
        call("merge_file_implementations", json!({"into": "a.py"})),
        report("Merged the duplicate implementations."),
        report("Verified. VERDICT: PASS"),
    ]));
    let pool = WorkerPool::new(vec![worker], Duration::from_secs(5));
    let mut coordinator = Coordinator::new(config, pool, &stub_registry()).unwrap();

    let task = Task::new(
        "merge duplicated parser",
        vec!["a.py".into(), "b.py".into()],
        IssueType::DuplicateMerge,
    );
    let task_id = task.id.clone();
    coordinator.add_task(task);
    coordinator.run().await.unwrap();

    let state = coordinator.state();
    assert_eq!(state.tasks[&task_id].status, TaskStatus::Completed);
    // One refactoring session plus one QA session.
    assert_eq!(state.iteration, 2);
    assert_eq!(state.stats(PhaseKind::Refactoring).successes, 1);
    assert_eq!(state.stats(PhaseKind::Qa).successes, 1);
}

#[tokio::test]
async fn failing_task_escalates_then_skips_without_blocking() {
    let dir = tempdir().unwrap();
    let config =
        PipelineConfig::new(dir.path().to_path_buf()).with_max_session_turns(2);
    let worker = Arc::new(FloundererWorker {
        counter: AtomicU32::new(0),
    });
    let pool = WorkerPool::new(vec![worker], Duration::from_secs(5));
    let mut coordinator = Coordinator::new(config, pool, &stub_registry()).unwrap();

    let task = Task::new("impossible fix", vec!["a.py".into()], IssueType::GenericFix);
    let task_id = task.id.clone();
    coordinator.add_task(task);
    coordinator.run().await.unwrap();

    let state = coordinator.state();
    let task = &state.tasks[&task_id];
    // The loop never stalls waiting for a human: after three failed
    // attempts, one investigation round, and three more failures, the
    // task is skipped with a recorded reason.
    assert_eq!(task.status, TaskStatus::Skipped);
    let reason = task.skip_reason.as_deref().unwrap();
    assert!(reason.contains("investigation"), "reason: {reason}");
    assert!(task.failure_count >= 3);
    assert!(!task.errors.is_empty());
}

#[tokio::test]
async fn unknown_tool_is_corrected_in_conversation() {
    let dir = tempdir().unwrap();
    seed_files(dir.path(), &["a.py"]);
    let config = PipelineConfig::new(dir.path().to_path_buf());
    let worker = Arc::new(ScriptedWorker::new(vec![
        // The model emits something that is not a tool name at all.
        call("relationship", json!({})),
        call("read_file", json!({"path": "a.py"})),
        call("modify_file", json!({"path": "a.py"})),
        report("Applied the fix."),
        report("Verified. VERDICT: PASS"),
    ]));
    let pool = WorkerPool::new(vec![worker], Duration::from_secs(5));
    let mut coordinator = Coordinator::new(config, pool, &stub_registry()).unwrap();

    let task = Task::new("small fix", vec!["a.py".into()], IssueType::GenericFix);
    let task_id = task.id.clone();
    coordinator.add_task(task);
    coordinator.run().await.unwrap();

    // The bad call cost a turn, not the pipeline.
    assert_eq!(
        coordinator.state().tasks[&task_id].status,
        TaskStatus::Completed
    );
}

#[tokio::test]
async fn unproductive_phase_is_forced_to_transition() {
    let dir = tempdir().unwrap();
    // High attempt ceiling so the coding task stays eligible while the
    // failure and no-mutation counters climb.
    let config = PipelineConfig::new(dir.path().to_path_buf())
        .with_max_attempts(10)
        .with_max_session_turns(2)
        .with_max_no_mutation(3);
    let worker = Arc::new(FloundererWorker {
        counter: AtomicU32::new(0),
    });
    let pool = WorkerPool::new(vec![worker], Duration::from_secs(5));
    let mut coordinator = Coordinator::new(config, pool, &stub_registry()).unwrap();

    coordinator.add_task(Task::new(
        "spinning wheels",
        vec!["a.py".into()],
        IssueType::GenericFix,
    ));
    // A failed task awaiting investigation sits further down the chain.
    let mut stuck = Task::new("old failure", vec!["b.py".into()], IssueType::GenericFix);
    stuck.transition(TaskStatus::InProgress).unwrap();
    stuck.attempts = 3;
    stuck.add_error("coding", "exhausted earlier");
    stuck.transition(TaskStatus::Failed).unwrap();
    stuck
        .analysis_data
        .insert("needs_investigation".into(), json!(true));
    let stuck_id = stuck.id.clone();
    coordinator.add_task(stuck);

    // Two failed coding iterations with zero mutations...
    for _ in 0..2 {
        let report = coordinator.step().await.unwrap();
        assert!(matches!(
            report,
            IterationReport::Ran {
                phase: PhaseKind::Coding,
                mutated_state: false,
                ..
            }
        ));
    }
    // ...then the coordinator forces a transition down the chain.
    let forced = coordinator.step().await.unwrap();
    match forced {
        IterationReport::Ran { phase, task_id, .. } => {
            assert_eq!(phase, PhaseKind::Investigation);
            assert_eq!(task_id, stuck_id);
        }
        other => panic!("Expected a forced run, got {other:?}"),
    }
}

#[tokio::test]
async fn objective_completes_through_enum_evaluation() {
    let dir = tempdir().unwrap();
    seed_files(dir.path(), &["a.py"]);
    let config = PipelineConfig::new(dir.path().to_path_buf());
    let worker = Arc::new(ScriptedWorker::new(vec![
        call("read_file", json!({"path": "a.py"})),
        call("modify_file", json!({"path": "a.py"})),
        report("Implemented."),
        report("Verified. VERDICT: PASS"),
    ]));
    let pool = WorkerPool::new(vec![worker], Duration::from_secs(5));
    let mut coordinator = Coordinator::new(config, pool, &stub_registry()).unwrap();

    // The objective starts in `completing`, the exact state the old
    // string-comparison evaluation never promoted.
    let mut objective = Objective::new("primary_001", "ship auth", ObjectiveLevel::Primary);
    objective.status = ObjectiveStatus::Completing;
    coordinator.add_objective(objective);
    coordinator.add_task(
        Task::new("implement auth", vec!["a.py".into()], IssueType::GenericFix)
            .with_objective("primary_001"),
    );
    coordinator.run().await.unwrap();

    let objective = &coordinator.state().objectives["primary_001"];
    assert_eq!(objective.status, ObjectiveStatus::Completed);
    assert_eq!(objective.completion_percentage, 100.0);
}

#[tokio::test]
async fn qa_failure_routes_back_through_debugging() {
    let dir = tempdir().unwrap();
    seed_files(dir.path(), &["a.py"]);
    let config = PipelineConfig::new(dir.path().to_path_buf());
    let worker = Arc::new(ScriptedWorker::new(vec![
        // Coding attempt.
        call("read_file", json!({"path": "a.py"})),
        call("modify_file", json!({"path": "a.py"})),
        report("Implemented."),
        // QA rejects it.
        report("Import is broken. VERDICT: FAIL"),
        // Debugging fixes it.
        call("read_file", json!({"path": "a.py"})),
        call("modify_file", json!({"path": "a.py", "fix": true})),
        report("Fixed the import."),
        // QA passes it.
        report("Verified. VERDICT: PASS"),
    ]));
    let pool = WorkerPool::new(vec![worker], Duration::from_secs(5));
    let mut coordinator = Coordinator::new(config, pool, &stub_registry()).unwrap();

    let task = Task::new("feature", vec!["a.py".into()], IssueType::GenericFix);
    let task_id = task.id.clone();
    coordinator.add_task(task);
    coordinator.run().await.unwrap();

    let state = coordinator.state();
    assert_eq!(state.tasks[&task_id].status, TaskStatus::Completed);
    assert_eq!(state.stats(PhaseKind::Debugging).successes, 1);
    assert_eq!(state.stats(PhaseKind::Qa).runs, 2);
}

#[tokio::test]
async fn snapshot_survives_restart() {
    let dir = tempdir().unwrap();
    seed_files(dir.path(), &["a.py"]);
    let config = PipelineConfig::new(dir.path().to_path_buf());
    let run_id;
    {
        let worker = Arc::new(ScriptedWorker::new(vec![
            call("read_file", json!({"path": "a.py"})),
            call("modify_file", json!({"path": "a.py"})),
            report("Implemented."),
            report("Verified. VERDICT: PASS"),
        ]));
        let pool = WorkerPool::new(vec![worker], Duration::from_secs(5));
        let mut coordinator = Coordinator::new(config.clone(), pool, &stub_registry()).unwrap();
        coordinator.add_task(Task::new("t", vec!["a.py".into()], IssueType::GenericFix));
        coordinator.run().await.unwrap();
        run_id = coordinator.state().run_id.clone();
    }

    // A fresh coordinator over the same project resumes the same run.
    let pool = WorkerPool::new(
        vec![Arc::new(ScriptedWorker::new(vec![])) as Arc<dyn ModelWorker>],
        Duration::from_secs(5),
    );
    let coordinator = Coordinator::new(config.clone(), pool, &stub_registry()).unwrap();
    assert_eq!(coordinator.state().run_id, run_id);
    assert_eq!(coordinator.state().tasks.len(), 1);

    // And the raw snapshot on disk agrees.
    let store = StateStore::new(config.state_file());
    let loaded = store.load_or_new().unwrap();
    assert_eq!(loaded.run_id, run_id);
}

#[tokio::test]
async fn report_without_artifact_never_completes_the_task() {
    let dir = tempdir().unwrap();
    let config = PipelineConfig::new(dir.path().to_path_buf());
    // The worker always declares victory without calling a single tool.
    let worker = Arc::new(ScriptedWorker::new(vec![]));
    let pool = WorkerPool::new(vec![worker], Duration::from_secs(5));
    let mut coordinator = Coordinator::new(config, pool, &stub_registry()).unwrap();

    let task = Task::new(
        "write the user guide",
        vec!["docs/guide.md".into()],
        IssueType::Documentation,
    );
    let task_id = task.id.clone();
    coordinator.add_task(task);
    coordinator.run().await.unwrap();

    // Empty reports against a missing artifact are failures: the task
    // burns its retries, gets investigated, and is eventually skipped.
    let task = &coordinator.state().tasks[&task_id];
    assert_eq!(task.status, TaskStatus::Skipped);
    assert!(task.failure_count >= 3);
    assert!(!dir.path().join("docs/guide.md").exists());
}

#[tokio::test]
async fn single_failure_after_qa_roundtrip_keeps_retry_budget() {
    let dir = tempdir().unwrap();
    seed_files(dir.path(), &["a.py"]);
    let config =
        PipelineConfig::new(dir.path().to_path_buf()).with_max_session_turns(4);
    let worker = Arc::new(ScriptedWorker::new(vec![
        // Coding round.
        call("read_file", json!({"path": "a.py"})),
        call("modify_file", json!({"path": "a.py"})),
        report("Implemented."),
        // QA rejects it.
        report("Import is broken. VERDICT: FAIL"),
        // The fix attempt flounders and burns its turn budget.
        call("bogus_tool_0", json!({"n": 0})),
        call("bogus_tool_1", json!({"n": 1})),
        call("bogus_tool_2", json!({"n": 2})),
        call("bogus_tool_3", json!({"n": 3})),
        // The retry lands the fix.
        call("read_file", json!({"path": "a.py"})),
        call("modify_file", json!({"path": "a.py", "fix": true})),
        report("Fixed the import."),
        // QA passes it.
        report("Verified. VERDICT: PASS"),
    ]));
    let pool = WorkerPool::new(vec![worker], Duration::from_secs(5));
    let mut coordinator = Coordinator::new(config, pool, &stub_registry()).unwrap();

    let task = Task::new("feature", vec!["a.py".into()], IssueType::GenericFix);
    let task_id = task.id.clone();
    coordinator.add_task(task);
    coordinator.run().await.unwrap();

    // One failed fix attempt after a coding round and a QA round must not
    // exhaust the retry budget: successful runs are not attempts.
    let state = coordinator.state();
    let task = &state.tasks[&task_id];
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.failure_count, 1);
    assert!(!task.analysis_data.contains_key("needs_investigation"));
    assert_eq!(state.stats(PhaseKind::Qa).runs, 2);
}

#[tokio::test]
async fn stagnant_phase_guidance_reaches_the_bus() {
    let dir = tempdir().unwrap();
    seed_files(dir.path(), &["a.py", "b.py", "c.py"]);
    let config = PipelineConfig::new(dir.path().to_path_buf());
    // Every session is a report with no tool calls: the artifacts exist, so
    // the runs succeed, but nothing ever mutates state.
    let worker = Arc::new(ScriptedWorker::new(vec![]));
    let pool = WorkerPool::new(vec![worker], Duration::from_secs(5));
    let mut coordinator = Coordinator::new(config, pool, &stub_registry()).unwrap();

    for file in ["a.py", "b.py", "c.py"] {
        coordinator.add_task(Task::new(
            &format!("touch {file}"),
            vec![file.into()],
            IssueType::GenericFix,
        ));
    }
    coordinator.run().await.unwrap();

    // Three unmutated coding runs in a row trip the stagnant-phase pattern;
    // the guidance is published for the task instead of only logged.
    let notes = coordinator.state().bus.notes(topics::ESCALATIONS);
    assert!(notes
        .iter()
        .any(|n| n.sender == "coordinator" && n.body.contains("without mutating state")));
    for task in coordinator.state().tasks.values() {
        assert_eq!(task.status, TaskStatus::Completed);
    }
}

#[tokio::test]
async fn premature_resolve_is_gated_by_checkpoints() {
    let dir = tempdir().unwrap();
    seed_files(dir.path(), &["a.py", "b.py"]);
    let config = PipelineConfig::new(dir.path().to_path_buf());
    let worker = Arc::new(ScriptedWorker::new(vec![
        // Merge before any comparison: must be rejected, then obeyed.
        call("merge_file_implementations", json!({"into": "a.py"})),
        call("compare_file_implementations", json!({})),
        call("merge_file_implementations", json!({"into": "a.py"})),
        report("Merged after comparing."),
        report("Verified. VERDICT: PASS"),
    ]));
    let pool = WorkerPool::new(vec![worker], Duration::from_secs(5));
    let mut coordinator = Coordinator::new(config, pool, &stub_registry()).unwrap();

    let task = Task::new(
        "merge the parsers",
        vec!["a.py".into(), "b.py".into()],
        IssueType::DuplicateMerge,
    );
    let task_id = task.id.clone();
    coordinator.add_task(task);
    coordinator.run().await.unwrap();

    assert_eq!(
        coordinator.state().tasks[&task_id].status,
        TaskStatus::Completed
    );
}
