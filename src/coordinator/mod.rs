//! The phase coordinator: phase behaviors, the selection chain, and the
//! decision loop that drives the whole pipeline.

#[allow(clippy::module_inception)]
pub mod coordinator;
pub mod phase;
pub mod selection;

pub use coordinator::{Coordinator, IterationReport};
pub use phase::{default_phases, PipelinePhase};
pub use selection::Candidate;
