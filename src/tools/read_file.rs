//! read_file tool - Read file contents with line numbers

use std::path::Path;

use async_trait::async_trait;
use eyre::eyre;
use serde_json::{Value, json};

use super::{Tool, ToolContext, ToolOutcome};

const MAX_LINE_CHARS: usize = 2000;

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read a file from the workspace with line numbers. Required before edit_file."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the workspace"
                },
                "offset": {
                    "type": "integer",
                    "description": "Line number to start reading from (1-indexed)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Max lines to read (default: 2000)"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolOutcome, eyre::Error> {
        let path = input["path"].as_str().ok_or_else(|| eyre!("path is required"))?;
        let offset = input["offset"].as_u64().unwrap_or(1).max(1) as usize;
        let limit = input["limit"].as_u64().unwrap_or(2000) as usize;

        let full_path = ctx.validate_path(Path::new(path))?;

        let content = tokio::fs::read_to_string(&full_path)
            .await
            .map_err(|e| eyre!("Failed to read file '{}': {}", path, e))?;

        ctx.track_read(&full_path).await;

        let total_lines = content.lines().count();
        let lines: Vec<String> = content
            .lines()
            .skip(offset - 1)
            .take(limit)
            .enumerate()
            .map(|(i, line)| {
                let shown: String = if line.chars().count() > MAX_LINE_CHARS {
                    format!("{}...", line.chars().take(MAX_LINE_CHARS).collect::<String>())
                } else {
                    line.to_string()
                };
                format!("{:>6}|{}", offset + i, shown)
            })
            .collect();

        Ok(ToolOutcome::success(lines.join("\n")).with_data(json!({
            "path": path,
            "total_lines": total_lines
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_read_file_with_offset_and_limit() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "test");
        std::fs::write(dir.path().join("test.txt"), "line 1\nline 2\nline 3\nline 4\nline 5").unwrap();

        let result = ReadFileTool
            .execute(json!({"path": "test.txt", "offset": 2, "limit": 2}), &ctx)
            .await
            .unwrap();

        assert!(result.success);
        assert!(!result.message.contains("line 1"));
        assert!(result.message.contains("2|line 2"));
        assert!(result.message.contains("3|line 3"));
        assert!(!result.message.contains("line 4"));
        assert_eq!(result.data.unwrap()["total_lines"], 5);
    }

    #[tokio::test]
    async fn test_read_file_not_found() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "test");

        let result = ReadFileTool.execute(json!({"path": "nonexistent.txt"}), &ctx).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_read_file_tracks_read() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "test");
        let test_file = dir.path().join("test.txt");
        std::fs::write(&test_file, "content").unwrap();

        assert!(!ctx.was_read(&test_file).await);
        ReadFileTool.execute(json!({"path": "test.txt"}), &ctx).await.unwrap();
        assert!(ctx.was_read(&test_file.canonicalize().unwrap()).await);
    }

    #[tokio::test]
    async fn test_read_file_outside_workspace() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "test");

        let result = ReadFileTool.execute(json!({"path": "/etc/hostname"}), &ctx).await;
        assert!(result.is_err());
    }
}
