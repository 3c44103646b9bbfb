//! Tool registry - manages tool registration, validation and batch dispatch

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::{Value, json};

use super::{
    ActionBatch, EditFileTool, GlobTool, ListDirectoryTool, ReadFileTool, RunCommandTool, Tool, ToolContext,
    ToolOutcome, WriteFileTool, action_schema,
};
use crate::context::ToolCallRecord;
use crate::llm::{ToolCall, ToolDefinition, validate_tool_input};

const SUMMARY_PREVIEW_CHARS: usize = 200;

/// A registered tool name
pub enum ToolSlot {
    Available(Box<dyn Tool>),
    Unavailable { reason: String },
}

/// Result of dispatching one action batch
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub call_id: String,
    /// One entry per registered tool (plus unknown requested names);
    /// `None` when the tool was not used
    pub results: BTreeMap<String, Option<ToolOutcome>>,
    pub any_succeeded: bool,
    pub finish: bool,
    pub summary: String,
}

impl DispatchOutcome {
    /// No tool produced any output
    pub fn all_null(&self) -> bool {
        self.results.values().all(Option::is_none)
    }

    /// Body of the tool-result message returned to the model
    pub fn to_message_content(&self) -> String {
        let used: BTreeMap<&String, &ToolOutcome> = self
            .results
            .iter()
            .filter_map(|(name, outcome)| outcome.as_ref().map(|o| (name, o)))
            .collect();
        json!({
            "finish": self.finish,
            "tool_results": used,
            "summary": self.summary
        })
        .to_string()
    }

    /// Durable record of this dispatch
    pub fn to_record(&self, iteration: u32, batch: &ActionBatch) -> ToolCallRecord {
        ToolCallRecord {
            iteration,
            call_id: self.call_id.clone(),
            tools: batch.active().map(|r| r.tool.clone()).collect(),
            params: batch.active().map(|r| (r.tool.clone(), r.params.clone())).collect(),
            results: self.results.clone(),
            summary: self.summary.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Maps tool names to implementations and tracks availability
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolSlot>,
}

impl ToolRegistry {
    /// Create an empty registry (for custom tool sets)
    pub fn new() -> Self {
        Self { tools: BTreeMap::new() }
    }

    /// Registry with every builtin tool
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ReadFileTool));
        registry.register(Box::new(WriteFileTool));
        registry.register(Box::new(EditFileTool));
        registry.register(Box::new(ListDirectoryTool));
        registry.register(Box::new(GlobTool));
        registry.register(Box::new(RunCommandTool));
        registry
    }

    /// Builtin tools with the named ones marked unavailable
    pub fn with_disabled(disabled: &[String]) -> Self {
        let mut registry = Self::standard();
        for name in disabled {
            registry.register_unavailable(name.clone(), "disabled by configuration");
        }
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), ToolSlot::Available(tool));
    }

    pub fn register_unavailable(&mut self, name: impl Into<String>, reason: impl Into<String>) {
        let name = name.into();
        log::info!("Tool {} registered as unavailable", name);
        self.tools.insert(name, ToolSlot::Unavailable { reason: reason.into() });
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn is_available(&self, name: &str) -> bool {
        matches!(self.tools.get(name), Some(ToolSlot::Available(_)))
    }

    /// All registered names with availability, sorted by name
    pub fn status(&self) -> Vec<(&str, Option<&str>)> {
        self.tools
            .iter()
            .map(|(name, slot)| match slot {
                ToolSlot::Available(_) => (name.as_str(), None),
                ToolSlot::Unavailable { reason } => (name.as_str(), Some(reason.as_str())),
            })
            .collect()
    }

    fn available(&self) -> impl Iterator<Item = &dyn Tool> {
        self.tools.values().filter_map(|slot| match slot {
            ToolSlot::Available(tool) => Some(tool.as_ref()),
            ToolSlot::Unavailable { .. } => None,
        })
    }

    /// Definitions of available tools
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.available()
            .map(|t| ToolDefinition::new(t.name(), t.description(), t.input_schema()))
            .collect()
    }

    /// The executor action schema; unavailable tools are left out
    pub fn action_definition(&self) -> ToolDefinition {
        action_schema(self.available().map(|t| (t.name(), t.description(), t.input_schema())))
    }

    /// Validate and run one tool, converting every failure into an outcome
    pub async fn execute(&self, name: &str, params: &Value, ctx: &ToolContext) -> ToolOutcome {
        let tool = match self.tools.get(name) {
            Some(ToolSlot::Available(tool)) => tool,
            Some(ToolSlot::Unavailable { reason }) => {
                return ToolOutcome::failure(format!("{} is not available: {}", name, reason));
            }
            None => return ToolOutcome::failure(format!("Unknown tool: {}", name)),
        };

        let definition = ToolDefinition::new(tool.name(), tool.description(), tool.input_schema());
        let call = ToolCall::new("validation", name, params.clone());
        if let Err(e) = validate_tool_input(&call, &definition) {
            return ToolOutcome::failure(e.to_string());
        }

        match tool.execute(params.clone(), ctx).await {
            Ok(outcome) => outcome,
            Err(e) => ToolOutcome::failure(format!("Tool error: {}", e)),
        }
    }

    /// Run every active request of `batch`.
    ///
    /// Registered tools the batch does not use report `None`. A failing or
    /// malformed request never aborts the rest of the batch.
    pub async fn dispatch(&self, batch: &ActionBatch, ctx: &ToolContext) -> DispatchOutcome {
        let mut results: BTreeMap<String, Option<ToolOutcome>> =
            self.tools.keys().map(|name| (name.clone(), None)).collect();
        let mut summaries = Vec::new();

        for request in batch.active() {
            let outcome = self.execute(&request.tool, &request.params, ctx).await;
            log::debug!(
                "Job {} tool {} -> success={}",
                ctx.job_id,
                request.tool,
                outcome.success
            );
            summaries.push(summarize(&request.tool, &outcome));
            results.insert(request.tool.clone(), Some(outcome));
        }

        let any_succeeded = results.values().flatten().any(|o| o.success);
        let summary = if summaries.is_empty() {
            "No tools used.".to_string()
        } else {
            summaries.join(" | ")
        };

        DispatchOutcome {
            call_id: batch.call_id.clone(),
            results,
            any_succeeded,
            finish: batch.finish,
            summary,
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

fn summarize(tool: &str, outcome: &ToolOutcome) -> String {
    let first_line = outcome.message.lines().next().unwrap_or("");
    let mut preview: String = first_line.chars().take(SUMMARY_PREVIEW_CHARS).collect();
    if first_line.chars().count() > SUMMARY_PREVIEW_CHARS {
        preview.push_str("...");
    }
    if outcome.success {
        format!("{} => {}", tool, preview)
    } else {
        format!("{} => failed: {}", tool, preview)
    }
}
