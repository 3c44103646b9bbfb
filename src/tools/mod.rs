//! Tool system: builtin tools, the registry and the action schema
//!
//! Every job gets a ToolContext scoped to its workspace directory. The model
//! drives tools through a single `multi_tools_executor` action whose
//! properties are the available tools, or by calling a tool directly.

mod action;
mod context;
mod edit_file;
mod glob_tool;
mod list_directory;
mod read_file;
mod registry;
mod run_command;
mod write_file;

pub use action::{ACTION_TOOL, ActionBatch, ToolRequest, action_schema};
pub use context::{ToolContext, ToolError};
pub use registry::{DispatchOutcome, ToolRegistry, ToolSlot};

pub use edit_file::EditFileTool;
pub use glob_tool::GlobTool;
pub use list_directory::ListDirectoryTool;
pub use read_file::ReadFileTool;
pub use run_command::RunCommandTool;
pub use write_file::WriteFileTool;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool that can be called by the model
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (matches the action property / tool_use name)
    fn name(&self) -> &'static str;

    /// Human-readable description
    fn description(&self) -> &'static str;

    /// JSON Schema for input parameters
    fn input_schema(&self) -> Value;

    /// Execute the tool
    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolOutcome, eyre::Error>;
}

/// Structured result of one tool execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    pub message: String,
    /// Side-channel output (paths written, exit codes, listings)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}
