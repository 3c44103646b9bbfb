//! Prompt Library - built-in templates per prompt variant, with on-disk overrides
//!
//! Every template is registered under `<variant>/<name>`. An override is read
//! from `<templates_dir>/<variant>/<name>.md` when that file exists.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::render::PromptRenderer;
use crate::error::{CritloopError, Result};

/// Which prompt set a job runs with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptVariant {
    #[default]
    Primary,
    Fallback,
}

impl PromptVariant {
    pub const ALL: [PromptVariant; 2] = [PromptVariant::Primary, PromptVariant::Fallback];

    pub fn as_str(&self) -> &'static str {
        match self {
            PromptVariant::Primary => "primary",
            PromptVariant::Fallback => "fallback",
        }
    }
}

impl fmt::Display for PromptVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const SYSTEM: &str = "system";
pub const TASK: &str = "task";
pub const NO_ACTION: &str = "no_action";
pub const EMPTY_CALLS: &str = "empty_calls";
pub const FINISH_REJECTED: &str = "finish_rejected";
pub const PASSING_SUGGESTION: &str = "passing_suggestion";
pub const PROGRESS_REVIEW: &str = "progress_review";
pub const CRITIC_SYSTEM: &str = "critic_system";
pub const CRITIC_RUBRIC: &str = "critic_rubric";

pub const TEMPLATE_NAMES: [&str; 9] = [
    SYSTEM,
    TASK,
    NO_ACTION,
    EMPTY_CALLS,
    FINISH_REJECTED,
    PASSING_SUGGESTION,
    PROGRESS_REVIEW,
    CRITIC_SYSTEM,
    CRITIC_RUBRIC,
];

const PRIMARY_SYSTEM: &str = r#"You are an autonomous agent working on job `{{job_id}}` inside an isolated workspace.

You act only through the `multi_tools_executor` tool. Each call names the tools to run,
with `use_tool: true` and their `tool_params`. Put your reasoning in `thinking`.
Set `finish: true` only when the task is complete; your work will then be reviewed.

Available tools:
{{#each tools}}- {{this.name}}: {{this.description}}
{{/each}}
You have at most {{max_iterations}} iterations. Work is scored out of {{max_score}};
a score of {{threshold}} or more is required."#;

const FALLBACK_SYSTEM: &str = r#"You are an autonomous agent retrying job `{{job_id}}` after an earlier attempt fell short.

Take the simplest path that fully answers the task. Prefer small, verifiable steps and
check every file you write. Act only through the `multi_tools_executor` tool, with
`use_tool: true` and `tool_params` for each tool you need. Set `finish: true` when done.

Available tools:
{{#each tools}}- {{this.name}}: {{this.description}}
{{/each}}
You have at most {{max_iterations}} iterations. Work is scored out of {{max_score}};
a score of {{threshold}} or more is required."#;

const PRIMARY_TASK: &str = r#"## Task

{{task}}
{{#if vars}}
## Parameters

{{#each vars}}- {{@key}}: {{this}}
{{/each}}{{/if}}
## Workspace

{{snapshot}}

Begin by inspecting the workspace, then work towards the task."#;

const FALLBACK_TASK: &str = r#"## Task (second attempt)

{{task}}
{{#if vars}}
## Parameters

{{#each vars}}- {{@key}}: {{this}}
{{/each}}{{/if}}
## Workspace

{{snapshot}}

The first attempt did not reach the required quality. Keep the scope tight and make
sure every required output exists before you finish."#;

const NO_ACTION_TEXT: &str = "Your last reply contained no tool call. You must respond with a call to \
`multi_tools_executor` (attempt {{attempt}} of {{max_attempts}}).";

const EMPTY_CALLS_TEXT: &str = "The last {{count}} rounds ran no tools. Choose a concrete tool with \
`use_tool: true` and real parameters, or set `finish: true` if the task is complete.";

const FINISH_REJECTED_TEXT: &str = r#"Your finish request was reviewed and scored {{score}}/{{max_score}}, below the required {{threshold}}.

{{feedback}}

Address the weaknesses above, then finish again."#;

const PASSING_SUGGESTION_TEXT: &str = r#"Progress review: {{score}}/{{max_score}}, which meets the required {{threshold}}.

{{feedback}}

You may set `finish: true` now, or keep improving."#;

const PROGRESS_REVIEW_TEXT: &str = r#"## Progress review (iteration {{iteration}})

{{feedback}}"#;

const FALLBACK_PROGRESS_REVIEW_TEXT: &str = r#"## Progress review (iteration {{iteration}})

{{feedback}}

Fix the weaknesses listed above before starting anything new."#;

const CRITIC_SYSTEM_TEXT: &str = "You are a strict reviewer of an autonomous agent's work. Score honestly \
against the rubric and always answer by calling `submit_critique`. The sub-scores must add up to \
at most {{max_score}}.";

const CRITIC_RUBRIC_TEXT: &str = r#"## Task under review

{{task}}

## Workspace

{{snapshot}}

## Recent actions
{{#each recent}}
- {{this}}{{/each}}

## Rubric

Score each dimension from 1 to 5:
- `completeness_score`: every required output exists and covers the task
- `quality_score`: outputs are correct, grounded in the data, and consistent
- `process_score`: the tool usage was purposeful, without wasted or empty rounds

{{#if is_final}}This is the final review of iteration {{iteration}}.{{else}}This is a progress review at iteration {{iteration}}.{{/if}}
Call `submit_critique` with the scores, a short rationale, strengths, weaknesses and recommendations."#;

/// Rendered prompts for every variant
pub struct PromptLibrary {
    renderer: PromptRenderer,
}

impl PromptLibrary {
    /// Built-in templates only
    pub fn builtin() -> Result<Self> {
        let mut renderer = PromptRenderer::new();
        for variant in PromptVariant::ALL {
            for name in TEMPLATE_NAMES {
                renderer.register_template(&key(variant, name), default_template(variant, name))?;
            }
        }
        Ok(Self { renderer })
    }

    /// Built-in templates, overridden by any `<dir>/<variant>/<name>.md` present
    pub fn load(templates_dir: Option<&Path>) -> Result<Self> {
        let mut library = Self::builtin()?;
        let Some(dir) = templates_dir else {
            return Ok(library);
        };

        for variant in PromptVariant::ALL {
            for name in TEMPLATE_NAMES {
                let path = dir.join(variant.as_str()).join(format!("{}.md", name));
                if !path.exists() {
                    continue;
                }
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    CritloopError::Prompt(format!("Failed to load template {}: {}", path.display(), e))
                })?;
                log::info!("Loaded prompt override {}", path.display());
                library.renderer.register_template(&key(variant, name), &content)?;
            }
        }
        Ok(library)
    }

    pub fn render<T: Serialize>(&self, variant: PromptVariant, name: &str, context: &T) -> Result<String> {
        self.renderer.render_named(&key(variant, name), context)
    }
}

fn key(variant: PromptVariant, name: &str) -> String {
    format!("{}/{}", variant, name)
}

fn default_template(variant: PromptVariant, name: &str) -> &'static str {
    match (variant, name) {
        (PromptVariant::Primary, SYSTEM) => PRIMARY_SYSTEM,
        (PromptVariant::Fallback, SYSTEM) => FALLBACK_SYSTEM,
        (PromptVariant::Primary, TASK) => PRIMARY_TASK,
        (PromptVariant::Fallback, TASK) => FALLBACK_TASK,
        (_, NO_ACTION) => NO_ACTION_TEXT,
        (_, EMPTY_CALLS) => EMPTY_CALLS_TEXT,
        (_, FINISH_REJECTED) => FINISH_REJECTED_TEXT,
        (_, PASSING_SUGGESTION) => PASSING_SUGGESTION_TEXT,
        (PromptVariant::Primary, PROGRESS_REVIEW) => PROGRESS_REVIEW_TEXT,
        (PromptVariant::Fallback, PROGRESS_REVIEW) => FALLBACK_PROGRESS_REVIEW_TEXT,
        (_, CRITIC_SYSTEM) => CRITIC_SYSTEM_TEXT,
        _ => CRITIC_RUBRIC_TEXT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_registers_every_template() {
        let library = PromptLibrary::builtin().unwrap();
        for variant in PromptVariant::ALL {
            for name in TEMPLATE_NAMES {
                assert!(library.render(variant, name, &json!({})).is_ok(), "{}/{}", variant, name);
            }
        }
    }

    #[test]
    fn test_variants_differ_for_task() {
        let library = PromptLibrary::builtin().unwrap();
        let ctx = json!({"task": "Count rows", "snapshot": "(empty)"});
        let primary = library.render(PromptVariant::Primary, TASK, &ctx).unwrap();
        let fallback = library.render(PromptVariant::Fallback, TASK, &ctx).unwrap();
        assert!(primary.contains("Count rows"));
        assert!(fallback.contains("second attempt"));
        assert_ne!(primary, fallback);
    }

    #[test]
    fn test_task_renders_vars() {
        let library = PromptLibrary::builtin().unwrap();
        let ctx = json!({"task": "t", "snapshot": "s", "vars": {"region": "north"}});
        let text = library.render(PromptVariant::Primary, TASK, &ctx).unwrap();
        assert!(text.contains("- region: north"));
    }

    #[test]
    fn test_system_lists_tools() {
        let library = PromptLibrary::builtin().unwrap();
        let ctx = json!({
            "job_id": "j1",
            "tools": [{"name": "read_file", "description": "Read a file"}],
            "max_iterations": 3,
            "threshold": 10,
            "max_score": 15
        });
        let text = library.render(PromptVariant::Primary, SYSTEM, &ctx).unwrap();
        assert!(text.contains("- read_file: Read a file"));
        assert!(text.contains("at most 3 iterations"));
    }

    #[test]
    fn test_override_from_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("fallback")).unwrap();
        std::fs::write(dir.path().join("fallback/no_action.md"), "CALL A TOOL ({{attempt}})").unwrap();

        let library = PromptLibrary::load(Some(dir.path())).unwrap();
        let fallback = library
            .render(PromptVariant::Fallback, NO_ACTION, &json!({"attempt": 2}))
            .unwrap();
        let primary = library
            .render(PromptVariant::Primary, NO_ACTION, &json!({"attempt": 2}))
            .unwrap();

        assert_eq!(fallback, "CALL A TOOL (2)");
        assert!(primary.contains("no tool call"));
    }

    #[test]
    fn test_named_templates_render_their_bodies() {
        let library = PromptLibrary::builtin().unwrap();
        let ctx = json!({"attempt": 1, "max_attempts": 5, "count": 3, "iteration": 4, "feedback": "Score: 6/15"});

        let no_action = library.render(PromptVariant::Primary, NO_ACTION, &ctx).unwrap();
        assert!(no_action.contains("attempt 1 of 5"));
        let empty = library.render(PromptVariant::Primary, EMPTY_CALLS, &ctx).unwrap();
        assert!(empty.contains("The last 3 rounds ran no tools"));
        for name in TEMPLATE_NAMES {
            let text = library.render(PromptVariant::Primary, name, &ctx).unwrap();
            assert_ne!(text, name);
        }
    }

    #[test]
    fn test_progress_review_per_variant() {
        let library = PromptLibrary::builtin().unwrap();
        let ctx = json!({"iteration": 2, "feedback": "Score: 6/15"});
        let primary = library.render(PromptVariant::Primary, PROGRESS_REVIEW, &ctx).unwrap();
        let fallback = library.render(PromptVariant::Fallback, PROGRESS_REVIEW, &ctx).unwrap();
        assert!(primary.starts_with("## Progress review (iteration 2)"));
        assert!(primary.contains("Score: 6/15"));
        assert!(fallback.contains("Fix the weaknesses"));
    }

    #[test]
    fn test_unknown_template_name() {
        let library = PromptLibrary::builtin().unwrap();
        assert!(library.render(PromptVariant::Primary, "missing", &json!({})).is_err());
    }

    #[test]
    fn test_variant_serde() {
        assert_eq!(serde_json::to_string(&PromptVariant::Fallback).unwrap(), "\"fallback\"");
        assert_eq!(PromptVariant::default(), PromptVariant::Primary);
    }
}
