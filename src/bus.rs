//! Inter-phase message bus.
//!
//! Phases leave notes for each other on named topics (QA findings for
//! debugging, refactoring hints from coding, etc). The bus is a bounded,
//! serializable mailbox, not a live channel: notes survive in the snapshot
//! and are read by whichever phase runs next.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Notes retained per topic; older notes are dropped.
const MAX_NOTES_PER_TOPIC: usize = 50;

/// One note published to a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Phase or component that published the note.
    pub sender: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Topic names used by the built-in phases.
pub mod topics {
    /// QA findings that route work to debugging.
    pub const QA_FINDINGS: &str = "qa_findings";
    /// Refactoring opportunities spotted during coding.
    pub const REFACTOR_HINTS: &str = "refactor_hints";
    /// Escalation notes attached when a task is handed to investigation.
    pub const ESCALATIONS: &str = "escalations";
}

/// Bounded per-topic mailbox, persisted with the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageBus {
    topics: BTreeMap<String, Vec<Note>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a note to a topic.
    pub fn publish(&mut self, topic: &str, sender: &str, body: &str, task_id: Option<&str>) {
        let notes = self.topics.entry(topic.to_string()).or_default();
        notes.push(Note {
            sender: sender.to_string(),
            body: body.to_string(),
            task_id: task_id.map(String::from),
            timestamp: Utc::now(),
        });
        if notes.len() > MAX_NOTES_PER_TOPIC {
            let excess = notes.len() - MAX_NOTES_PER_TOPIC;
            notes.drain(..excess);
        }
    }

    /// All notes on a topic, oldest first.
    pub fn notes(&self, topic: &str) -> &[Note] {
        self.topics.get(topic).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Take all notes off a topic, consuming them.
    pub fn drain(&mut self, topic: &str) -> Vec<Note> {
        self.topics.remove(topic).unwrap_or_default()
    }

    /// Notes for a specific task on a topic.
    pub fn notes_for_task(&self, topic: &str, task_id: &str) -> Vec<&Note> {
        self.notes(topic)
            .iter()
            .filter(|n| n.task_id.as_deref() == Some(task_id))
            .collect()
    }
}
