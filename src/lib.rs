//! conductor: an autonomous multi-phase development pipeline.
//!
//! A coordinator loop drives specialized phases (coding, QA, debugging,
//! refactoring, documentation, investigation) over a shared task and
//! objective store. Each phase works one task at a time through a
//! model-backed conversation session with a strict one-tool-call-per-turn
//! protocol, bounded analysis budgets, and loop detection. All state
//! persists as one atomic JSON snapshot so a run can resume where it
//! stopped.

pub mod analysis;
pub mod bus;
pub mod config;
pub mod coordinator;
pub mod detector;
pub mod errors;
pub mod phase;
pub mod session;
pub mod state;
pub mod tools;
pub mod ui;

pub use config::PipelineConfig;
pub use coordinator::{Coordinator, IterationReport};
pub use errors::{PhaseError, StateError, ToolError, WorkerError};
pub use phase::PhaseKind;
pub use state::{IssueType, Objective, ObjectiveLevel, ObjectiveStatus, Task, TaskStatus};
