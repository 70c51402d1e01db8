//! Tool surface exposed to model workers: schemas sent with requests, and
//! the registry that validates and dispatches incoming calls.

pub mod registry;
pub mod schema;

pub use registry::{ToolCapability, ToolContext, ToolOutcome, ToolRegistry};
pub use schema::{ToolCall, ToolSchema};
