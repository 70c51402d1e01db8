//! Model worker abstraction and the failover pool.
//!
//! A worker is any backend that can turn a conversation into a reply. The
//! pool holds workers in failover order: each request goes to the first
//! worker, with a timeout; on timeout or backend error the next worker gets
//! the same request. Only when every worker has failed does the error
//! propagate.

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::WorkerError;
use crate::tools::schema::ToolSchema;

/// Role of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One message in the conversation sent to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
        }
    }
}

/// A complete request to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub messages: Vec<ChatMessage>,
    /// Schemas of the tools the model may call.
    #[serde(default)]
    pub tools: Vec<ToolSchema>,
}

/// A worker's reply: free text plus any tool calls parsed from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<crate::tools::schema::ToolCall>,
}

/// A model backend.
#[async_trait]
pub trait ModelWorker: Send + Sync {
    fn name(&self) -> &str;
    async fn execute(&self, request: &WorkerRequest) -> Result<WorkerResponse, WorkerError>;
}

/// Failover pool over one or more workers.
pub struct WorkerPool {
    workers: Vec<Arc<dyn ModelWorker>>,
    timeout: Duration,
}

impl WorkerPool {
    pub fn new(workers: Vec<Arc<dyn ModelWorker>>, timeout: Duration) -> Self {
        Self { workers, timeout }
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Send a request to the workers in failover order. A timeout counts
    /// as a failure and moves on to the next worker.
    pub async fn execute(&self, request: &WorkerRequest) -> Result<WorkerResponse, WorkerError> {
        let mut last_error = "no workers configured".to_string();
        for worker in &self.workers {
            debug!(worker = worker.name(), "dispatching request");
            match tokio::time::timeout(self.timeout, worker.execute(request)).await {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(err)) => {
                    warn!(worker = worker.name(), error = %err, "worker failed, trying next");
                    last_error = err.to_string();
                }
                Err(_) => {
                    let err = WorkerError::Timeout {
                        worker: worker.name().to_string(),
                        seconds: self.timeout.as_secs(),
                    };
                    warn!(worker = worker.name(), error = %err, "worker timed out, trying next");
                    last_error = err.to_string();
                }
            }
        }
        Err(WorkerError::AllWorkersFailed {
            attempted: self.workers.len(),
            last_error,
        })
    }

    /// Fan the same request out to every worker in parallel and collect the
    /// successful responses. Used for consultation passes where multiple
    /// opinions are wanted; individual failures are dropped.
    pub async fn consult_all(&self, request: &WorkerRequest) -> Vec<(String, WorkerResponse)> {
        let futures = self.workers.iter().map(|worker| async {
            let result = tokio::time::timeout(self.timeout, worker.execute(request)).await;
            (worker.name().to_string(), result)
        });
        join_all(futures)
            .await
            .into_iter()
            .filter_map(|(name, result)| match result {
                Ok(Ok(response)) => Some((name, response)),
                Ok(Err(err)) => {
                    warn!(worker = %name, error = %err, "consultation worker failed");
                    None
                }
                Err(_) => {
                    warn!(worker = %name, "consultation worker timed out");
                    None
                }
            })
            .collect()
    }
}
