//! Conversation sessions: the model worker abstraction, the Ollama
//! backend, the per-task message thread, and the session driver that
//! enforces the one-tool-call-per-turn protocol.

pub mod ollama;
#[allow(clippy::module_inception)]
pub mod session;
pub mod thread;
pub mod worker;

pub use ollama::OllamaWorker;
pub use session::{ConversationSession, SessionOutcome};
pub use thread::{AttemptRecord, ConversationThread};
pub use worker::{ChatMessage, ModelWorker, Role, WorkerPool, WorkerRequest, WorkerResponse};
