//! Conversation thread: the message history and attempt ledger for one
//! task's sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::worker::ChatMessage;

/// Record of one completed session attempt, kept for retry context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub phase: String,
    pub turns: u32,
    pub tool_calls: u32,
    pub success: bool,
    /// Short outcome line, folded into later prompts.
    pub summary: String,
    pub finished_at: DateTime<Utc>,
}

/// Message history plus attempt records for one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationThread {
    pub task_id: String,
    pub messages: Vec<ChatMessage>,
    pub attempts: Vec<AttemptRecord>,
}

impl ConversationThread {
    pub fn new(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            messages: Vec::new(),
            attempts: Vec::new(),
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn record_attempt(&mut self, record: AttemptRecord) {
        self.attempts.push(record);
    }

    /// Condensed history carried across attempts in the snapshot: one line
    /// per attempt, newest last.
    pub fn summarize(&self) -> String {
        self.attempts
            .iter()
            .map(|a| {
                format!(
                    "Attempt {} ({}): {} after {} turns, {} tool calls. {}",
                    a.attempt,
                    a.phase,
                    if a.success { "succeeded" } else { "failed" },
                    a.turns,
                    a.tool_calls,
                    a.summary
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Drop the message history but keep attempt records. Called between
    /// attempts so each session starts from a clean prompt.
    pub fn reset_messages(&mut self) {
        self.messages.clear();
    }
}
