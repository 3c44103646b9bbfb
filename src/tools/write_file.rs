//! write_file tool - Write or append content to a file

use std::path::Path;

use async_trait::async_trait;
use eyre::{bail, eyre};
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;

use super::{Tool, ToolContext, ToolOutcome};

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> &'static str {
        "Write content to a file in the workspace. Creates parent directories. mode 'w' overwrites, 'a' appends."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the workspace"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write"
                },
                "mode": {
                    "type": "string",
                    "enum": ["w", "a"],
                    "description": "'w' to overwrite (default), 'a' to append"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolOutcome, eyre::Error> {
        let path = input["path"].as_str().ok_or_else(|| eyre!("path is required"))?;
        let content = input["content"].as_str().ok_or_else(|| eyre!("content is required"))?;
        let mode = input["mode"].as_str().unwrap_or("w");

        let full_path = ctx.validate_path(Path::new(path))?;

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let verb = match mode {
            "w" => {
                tokio::fs::write(&full_path, content).await?;
                "Wrote"
            }
            "a" => {
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&full_path)
                    .await?;
                file.write_all(content.as_bytes()).await?;
                file.flush().await?;
                "Appended"
            }
            other => bail!("unsupported mode '{}', expected 'w' or 'a'", other),
        };

        Ok(
            ToolOutcome::success(format!("{} {} bytes to {}", verb, content.len(), path)).with_data(json!({
                "path": path,
                "bytes": content.len(),
                "mode": mode
            })),
        )
    }
}
