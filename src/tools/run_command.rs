//! run_command tool - Execute shell commands in the workspace

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use eyre::eyre;
use serde_json::{Value, json};
use tokio::process::Command;

use super::{Tool, ToolContext, ToolError, ToolOutcome};

pub struct RunCommandTool;

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &'static str {
        "run_command"
    }

    fn description(&self) -> &'static str {
        "Execute a shell command in the workspace (analysis scripts, data processing)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Shell command to execute"
                },
                "timeout_ms": {
                    "type": "integer",
                    "description": "Timeout in milliseconds (default from configuration)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolOutcome, eyre::Error> {
        let command = input["command"].as_str().ok_or_else(|| eyre!("command is required"))?;
        let timeout = input["timeout_ms"]
            .as_u64()
            .map(Duration::from_millis)
            .unwrap_or(ctx.command_timeout)
            .min(ctx.command_timeout);

        let output = tokio::time::timeout(
            timeout,
            Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(&ctx.workspace)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| ToolError::CommandTimeout {
            timeout_ms: timeout.as_millis() as u64,
        })??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let combined = if stdout.is_empty() && !stderr.is_empty() {
            stderr.to_string()
        } else if stderr.is_empty() {
            stdout.to_string()
        } else {
            format!("{}\n\nSTDERR:\n{}", stdout, stderr)
        };

        let text = truncate_output(combined, ctx.max_output_bytes);
        let code = output.status.code().unwrap_or(-1);

        if output.status.success() {
            Ok(ToolOutcome::success(text).with_data(json!({"exit_code": code})))
        } else {
            Ok(ToolOutcome::failure(format!("Exit code: {}\n{}", code, text)).with_data(json!({"exit_code": code})))
        }
    }
}

fn truncate_output(text: String, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...\n[truncated, {} bytes total]", &text[..cut], text.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_run_command_echo() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "test");

        let result = RunCommandTool
            .execute(json!({"command": "echo 'Hello, World!'"}), &ctx)
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.message.contains("Hello, World!"));
        assert_eq!(result.data.unwrap()["exit_code"], 0);
    }

    #[tokio::test]
    async fn test_run_command_runs_in_workspace() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "test");
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();

        let result = RunCommandTool.execute(json!({"command": "ls"}), &ctx).await.unwrap();
        assert!(result.message.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_run_command_failure_exit_code() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "test");

        let result = RunCommandTool
            .execute(json!({"command": "echo oops >&2; exit 3"}), &ctx)
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.message.starts_with("Exit code: 3"));
        assert!(result.message.contains("oops"));
    }

    #[tokio::test]
    async fn test_run_command_timeout() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "test");

        let result = RunCommandTool
            .execute(json!({"command": "sleep 5", "timeout_ms": 100}), &ctx)
            .await;

        let err = result.unwrap_err().to_string();
        assert!(err.contains("timed out after 100ms"));
    }

    #[tokio::test]
    async fn test_run_command_truncates_output() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path().to_path_buf(), "test").with_max_output_bytes(10);

        let result = RunCommandTool
            .execute(json!({"command": "printf 'abcdefghijklmnopqrstuvwxyz'"}), &ctx)
            .await
            .unwrap();

        assert!(result.message.starts_with("abcdefghij..."));
        assert!(result.message.contains("[truncated, 26 bytes total]"));
    }
}
