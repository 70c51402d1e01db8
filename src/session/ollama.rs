//! Ollama-backed model worker.
//!
//! Talks to an Ollama server's `/api/chat` endpoint with streaming off.
//! Tool calls come back either in the structured `tool_calls` field or, for
//! models without native tool support, as a JSON object embedded in the
//! reply text; both forms are normalized into `ToolCall` values.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::WorkerConfig;
use crate::errors::WorkerError;
use crate::session::worker::{ModelWorker, Role, WorkerRequest, WorkerResponse};
use crate::tools::schema::ToolCall;

/// Worker backed by an Ollama inference server.
pub struct OllamaWorker {
    name: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: WireReply,
}

#[derive(Deserialize)]
struct WireReply {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

impl OllamaWorker {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            name: config.name.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            client: reqwest::Client::new(),
        }
    }

    fn wire_messages(request: &WorkerRequest) -> Vec<WireMessage> {
        request
            .messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                },
                content: m.content.clone(),
            })
            .collect()
    }

    fn wire_tools(request: &WorkerRequest) -> Vec<Value> {
        request
            .tools
            .iter()
            .map(|schema| {
                let properties: serde_json::Map<String, Value> = schema
                    .parameters
                    .iter()
                    .map(|p| {
                        (
                            p.name.clone(),
                            json!({"type": p.kind, "description": p.description}),
                        )
                    })
                    .collect();
                let required: Vec<&str> = schema
                    .parameters
                    .iter()
                    .filter(|p| p.required)
                    .map(|p| p.name.as_str())
                    .collect();
                json!({
                    "type": "function",
                    "function": {
                        "name": schema.name,
                        "description": schema.description,
                        "parameters": {
                            "type": "object",
                            "properties": properties,
                            "required": required,
                        }
                    }
                })
            })
            .collect()
    }
}

/// Extract a tool call embedded as JSON in reply text, for models that
/// answer `{"tool": "...", "arguments": {...}}` in prose instead of using
/// native tool calling.
pub(crate) fn extract_inline_call(content: &str) -> Option<ToolCall> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }
    let parsed: Value = serde_json::from_str(&content[start..=end]).ok()?;
    let name = parsed.get("tool").or_else(|| parsed.get("name"))?.as_str()?;
    let arguments = parsed
        .get("arguments")
        .or_else(|| parsed.get("args"))
        .cloned()
        .unwrap_or_else(|| json!({}));
    Some(ToolCall::new(name, arguments))
}

#[async_trait]
impl ModelWorker for OllamaWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, request: &WorkerRequest) -> Result<WorkerResponse, WorkerError> {
        let body = ChatRequest {
            model: &self.model,
            messages: Self::wire_messages(request),
            stream: false,
            tools: Self::wire_tools(request),
        };
        let url = format!("{}/api/chat", self.base_url);
        debug!(worker = %self.name, %url, model = %self.model, "sending chat request");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| WorkerError::Backend {
                worker: self.name.clone(),
                message: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(WorkerError::Backend {
                worker: self.name.clone(),
                message: format!("HTTP {} from {}", response.status(), url),
            });
        }
        let parsed: ChatResponse = response.json().await.map_err(|e| WorkerError::Backend {
            worker: self.name.clone(),
            message: format!("malformed chat response: {}", e),
        })?;

        let mut tool_calls: Vec<ToolCall> = parsed
            .message
            .tool_calls
            .into_iter()
            .map(|tc| ToolCall::new(&tc.function.name, tc.function.arguments))
            .collect();
        if tool_calls.is_empty() {
            if let Some(call) = extract_inline_call(&parsed.message.content) {
                tool_calls.push(call);
            }
        }
        Ok(WorkerResponse {
            content: parsed.message.content,
            tool_calls,
        })
    }
}
