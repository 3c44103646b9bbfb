//! list_directory tool - List files and directories in a path

use std::path::Path;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{Tool, ToolContext, ToolOutcome};

pub struct ListDirectoryTool;

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &'static str {
        "list_directory"
    }

    fn description(&self) -> &'static str {
        "List files and directories in a workspace path, with file sizes."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory path relative to the workspace (default: .)"
                }
            }
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolOutcome, eyre::Error> {
        let path = input["path"].as_str().unwrap_or(".");
        let full_path = ctx.validate_path(Path::new(path))?;

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&full_path).await?;

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let metadata = entry.metadata().await?;

            if metadata.is_dir() {
                entries.push(format!("{}/", name));
            } else {
                entries.push(format!("{} ({} bytes)", name, metadata.len()));
            }
        }

        entries.sort();
        let count = entries.len();

        let message = if entries.is_empty() {
            "(empty directory)".to_string()
        } else {
            entries.join("\n")
        };
        Ok(ToolOutcome::success(message).with_data(json!({"path": path, "entries": count})))
    }
}
