//! glob tool - Find files matching a glob pattern

use std::path::Path;

use async_trait::async_trait;
use eyre::eyre;
use serde_json::{Value, json};

use super::{Tool, ToolContext, ToolOutcome};

const MAX_MATCHES: usize = 1000;

pub struct GlobTool;

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &'static str {
        "glob"
    }

    fn description(&self) -> &'static str {
        "Find workspace files matching a glob pattern (e.g., data/**/*.csv)"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern to match"
                },
                "path": {
                    "type": "string",
                    "description": "Base directory (default: workspace root)"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolOutcome, eyre::Error> {
        let pattern = input["pattern"].as_str().ok_or_else(|| eyre!("pattern is required"))?;
        let base = input["path"].as_str().unwrap_or(".");

        let base_path = ctx.validate_path(Path::new(base))?;
        let full_pattern = base_path.join(pattern);
        let full_pattern = full_pattern
            .to_str()
            .ok_or_else(|| eyre!("pattern is not valid UTF-8"))?;

        let root = ctx.validate_path(Path::new("."))?;
        let matches: Vec<String> = glob::glob(full_pattern)?
            .filter_map(|r| r.ok())
            .filter(|p| p.starts_with(&root))
            .map(|p| ctx.display_path(&p))
            .take(MAX_MATCHES)
            .collect();

        let count = matches.len();
        let message = if matches.is_empty() {
            "No matches found".to_string()
        } else {
            matches.join("\n")
        };
        Ok(ToolOutcome::success(message).with_data(json!({"matches": count})))
    }
}
