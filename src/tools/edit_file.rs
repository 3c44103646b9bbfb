//! edit_file tool - Replace a specific string in a file

use std::path::Path;

use async_trait::async_trait;
use eyre::eyre;
use serde_json::{Value, json};

use super::{Tool, ToolContext, ToolError, ToolOutcome};

pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &'static str {
        "edit_file"
    }

    fn description(&self) -> &'static str {
        "Replace an exact string in a workspace file. Requires a prior read_file of the same file."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the workspace"
                },
                "old_string": {
                    "type": "string",
                    "description": "Exact string to find and replace"
                },
                "new_string": {
                    "type": "string",
                    "description": "Replacement string"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace all occurrences (default: false)"
                }
            },
            "required": ["path", "old_string", "new_string"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolOutcome, eyre::Error> {
        let path = input["path"].as_str().ok_or_else(|| eyre!("path is required"))?;
        let old_string = input["old_string"]
            .as_str()
            .ok_or_else(|| eyre!("old_string is required"))?;
        let new_string = input["new_string"]
            .as_str()
            .ok_or_else(|| eyre!("new_string is required"))?;
        let replace_all = input["replace_all"].as_bool().unwrap_or(false);

        let full_path = ctx.validate_path(Path::new(path))?;

        if !ctx.was_read(&full_path).await {
            let err = ToolError::EditWithoutRead { path: path.to_string() };
            return Ok(ToolOutcome::failure(err.to_string()));
        }

        let content = tokio::fs::read_to_string(&full_path).await?;
        let count = content.matches(old_string).count();

        if count == 0 {
            return Ok(ToolOutcome::failure(
                "old_string not found in file. Make sure it matches exactly including whitespace.",
            ));
        }

        if count > 1 && !replace_all {
            return Ok(ToolOutcome::failure(format!(
                "old_string found {} times. Use replace_all=true or provide more context.",
                count
            )));
        }

        let (new_content, replacements) = if replace_all {
            (content.replace(old_string, new_string), count)
        } else {
            (content.replacen(old_string, new_string, 1), 1)
        };

        tokio::fs::write(&full_path, &new_content).await?;

        Ok(
            ToolOutcome::success(format!("Replaced {} occurrence(s) in {}", replacements, path))
                .with_data(json!({"path": path, "replacements": replacements})),
        )
    }
}
