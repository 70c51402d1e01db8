//! Tool registry and dispatcher.
//!
//! Tools register at runtime under a string name; dispatch looks the name
//! up, validates arguments at this boundary, and executes. An unknown name
//! is feedback to the model, never a crash: the resulting error text is
//! folded into the next prompt so the session can self-correct.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::ToolError;
use crate::tools::schema::{ListDirectoryArgs, ReadFileArgs, ToolCall, ToolSchema};

/// Context handed to a tool execution.
pub struct ToolContext {
    /// Root of the target project; all paths resolve against it.
    pub project_dir: PathBuf,
    /// Task id the session is working on.
    pub task_id: String,
}

/// Result of a successful tool execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    /// Text fed back into the conversation.
    pub output: String,
    /// Whether the tool mutated project or pipeline state.
    pub mutated_state: bool,
}

impl ToolOutcome {
    pub fn read_only(output: String) -> Self {
        Self {
            output,
            mutated_state: false,
        }
    }

    pub fn mutating(output: String) -> Self {
        Self {
            output,
            mutated_state: true,
        }
    }
}

/// A named capability the model may invoke.
pub trait ToolCapability: Send + Sync {
    fn schema(&self) -> ToolSchema;
    fn execute(&self, ctx: &ToolContext, call: &ToolCall) -> Result<ToolOutcome, ToolError>;
}

/// Runtime name-to-capability map.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn ToolCapability>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the built-in read-only tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ReadFileTool));
        registry.register(Arc::new(ListDirectoryTool));
        registry
    }

    /// Register a capability under its schema name. Re-registering a name
    /// replaces the previous capability.
    pub fn register(&mut self, tool: Arc<dyn ToolCapability>) {
        let name = tool.schema().name;
        debug!(tool = %name, "registered tool");
        self.tools.insert(name, tool);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Schemas of all registered tools, for the worker request.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|t| t.schema()).collect()
    }

    /// Prompt fragment listing every registered tool.
    pub fn render_catalog(&self) -> String {
        self.tools
            .values()
            .map(|t| t.schema().render())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Dispatch a call. Unknown names and bad arguments come back as
    /// `ToolError` values the session turns into corrective feedback.
    pub fn dispatch(&self, ctx: &ToolContext, call: &ToolCall) -> Result<ToolOutcome, ToolError> {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!(tool = %call.name, "unknown tool requested");
            return Err(ToolError::unknown(&call.name));
        };
        tool.execute(ctx, call)
    }
}

fn resolve(ctx: &ToolContext, relative: &str) -> PathBuf {
    let path = Path::new(relative);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        ctx.project_dir.join(path)
    }
}

/// Built-in: read a file under the project root.
struct ReadFileTool;

impl ToolCapability for ReadFileTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("read_file", "Read a file's contents").with_param(
            "path",
            "string",
            "Path relative to the project root",
            true,
        )
    }

    fn execute(&self, ctx: &ToolContext, call: &ToolCall) -> Result<ToolOutcome, ToolError> {
        let args: ReadFileArgs = call.parse_args()?;
        let path = resolve(ctx, &args.path);
        let content = fs::read_to_string(&path).map_err(|e| ToolError::Execution {
            tool: call.name.clone(),
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        Ok(ToolOutcome::read_only(content))
    }
}

/// Built-in: list a directory under the project root.
struct ListDirectoryTool;

impl ToolCapability for ListDirectoryTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("list_directory", "List entries in a directory").with_param(
            "path",
            "string",
            "Directory path relative to the project root (default: root)",
            false,
        )
    }

    fn execute(&self, ctx: &ToolContext, call: &ToolCall) -> Result<ToolOutcome, ToolError> {
        let args: ListDirectoryArgs = call.parse_args()?;
        let path = resolve(ctx, &args.path);
        let entries = fs::read_dir(&path).map_err(|e| ToolError::Execution {
            tool: call.name.clone(),
            message: format!("cannot list {}: {}", path.display(), e),
        })?;
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| {
                let suffix = if e.path().is_dir() { "/" } else { "" };
                format!("{}{}", e.file_name().to_string_lossy(), suffix)
            })
            .collect();
        names.sort();
        Ok(ToolOutcome::read_only(names.join("\n")))
    }
}
