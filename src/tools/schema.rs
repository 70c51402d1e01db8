//! Tool call and schema types shared between the session layer and the
//! worker wire format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ToolError;

/// A tool invocation as parsed out of a worker response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: &str, arguments: Value) -> Self {
        Self {
            name: name.to_string(),
            arguments,
        }
    }

    /// Deserialize the arguments into a typed struct, mapping failures to
    /// the invalid-arguments feedback error.
    pub fn parse_args<T: serde::de::DeserializeOwned>(&self) -> Result<T, ToolError> {
        serde_json::from_value(self.arguments.clone()).map_err(|e| ToolError::InvalidArguments {
            tool: self.name.clone(),
            message: e.to_string(),
        })
    }
}

/// One parameter in a tool schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    /// JSON type name ("string", "integer", ...).
    pub kind: String,
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

/// Declarative tool description sent to workers so the model knows what it
/// may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
    /// Whether invoking the tool can mutate project or pipeline state.
    #[serde(default)]
    pub mutating: bool,
}

impl ToolSchema {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: Vec::new(),
            mutating: false,
        }
    }

    pub fn with_param(mut self, name: &str, kind: &str, description: &str, required: bool) -> Self {
        self.parameters.push(ToolParameter {
            name: name.to_string(),
            kind: kind.to_string(),
            description: description.to_string(),
            required,
        });
        self
    }

    pub fn mutating(mut self) -> Self {
        self.mutating = true;
        self
    }

    /// Render into the prompt fragment listing available tools.
    pub fn render(&self) -> String {
        let params = self
            .parameters
            .iter()
            .map(|p| {
                format!(
                    "    {} ({}{}): {}",
                    p.name,
                    p.kind,
                    if p.required { ", required" } else { "" },
                    p.description
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        if params.is_empty() {
            format!("- {}: {}", self.name, self.description)
        } else {
            format!("- {}: {}\n{}", self.name, self.description, params)
        }
    }
}

// ===== Typed argument structs for the built-in tools =====

#[derive(Debug, Deserialize)]
pub struct ReadFileArgs {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct ListDirectoryArgs {
    #[serde(default = "default_dir")]
    pub path: String,
}

fn default_dir() -> String {
    ".".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_typed_args() {
        let call = ToolCall::new("read_file", json!({"path": "src/a.py"}));
        let args: ReadFileArgs = call.parse_args().unwrap();
        assert_eq!(args.path, "src/a.py");
    }

    #[test]
    fn test_missing_required_arg_is_invalid_arguments() {
        let call = ToolCall::new("read_file", json!({}));
        let err = call.parse_args::<ReadFileArgs>().unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
        assert!(err.to_string().contains("read_file"));
    }

    #[test]
    fn test_optional_args_default() {
        let call = ToolCall::new("list_directory", json!({}));
        let args: ListDirectoryArgs = call.parse_args().unwrap();
        assert_eq!(args.path, ".");
    }

    #[test]
    fn test_schema_render_lists_params() {
        let schema = ToolSchema::new("read_file", "Read a file's contents")
            .with_param("path", "string", "Path relative to the project root", true);
        let rendered = schema.render();
        assert!(rendered.contains("read_file"));
        assert!(rendered.contains("path (string, required)"));
    }
}
