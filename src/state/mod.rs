//! Pipeline state: tasks, objectives, per-phase statistics, and the
//! persisted snapshot that ties them together.

pub mod objective;
pub mod phase_stats;
pub mod store;
pub mod task;

pub use objective::{DimensionalProfile, Objective, ObjectiveLevel, ObjectiveStatus};
pub use phase_stats::{PhaseStats, RunRecord};
pub use store::{PipelineState, StateStore};
pub use task::{IssueType, Task, TaskStatus};
