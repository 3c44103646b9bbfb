//! LLM types for model communication
//!
//! This module defines the message history entries, tool definitions, and the
//! request/response shapes exchanged with the model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry of the message history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Invocations issued by an assistant entry
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Invocation id answered by a tool entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name answered by a tool entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Create an assistant message that issues tool invocations
    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// Create a tool-result message paired to an invocation id
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            ..Self::plain(Role::Tool, content)
        }
    }

    /// Whether this is an assistant entry that issued tool invocations
    pub fn has_tool_calls(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }
}

/// Tool definition for the LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDefinition {
    /// Create a new tool definition
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Convert to Anthropic API schema format
    pub fn to_anthropic_schema(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "input_schema": self.input_schema
        })
    }
}

/// A tool call from the LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

impl ToolCall {
    /// Create a new tool call
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// The model's proposed next step, resolved once from a response
#[derive(Debug, Clone, PartialEq)]
pub enum ModelAction {
    /// Free text only, no actionable invocation
    NoAction { content: String },
    /// Exactly one invocation
    Single { content: String, call: ToolCall },
    /// Several invocations issued together
    Multi { content: String, calls: Vec<ToolCall> },
}

impl ModelAction {
    /// Build an action from the text and invocations of a response
    pub fn from_parts(content: impl Into<String>, mut calls: Vec<ToolCall>) -> Self {
        let content = content.into();
        match calls.len() {
            0 => ModelAction::NoAction { content },
            1 => ModelAction::Single {
                content,
                call: calls.remove(0),
            },
            _ => ModelAction::Multi { content, calls },
        }
    }

    pub fn content(&self) -> &str {
        match self {
            ModelAction::NoAction { content }
            | ModelAction::Single { content, .. }
            | ModelAction::Multi { content, .. } => content,
        }
    }

    /// Invocations carried by this action, in issue order
    pub fn calls(&self) -> Vec<ToolCall> {
        match self {
            ModelAction::NoAction { .. } => Vec::new(),
            ModelAction::Single { call, .. } => vec![call.clone()],
            ModelAction::Multi { calls, .. } => calls.clone(),
        }
    }

    pub fn is_actionable(&self) -> bool {
        !matches!(self, ModelAction::NoAction { .. })
    }
}

/// Request to the LLM for completion
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl CompletionRequest {
    /// Create a new completion request with a system prompt
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            ..Default::default()
        }
    }

    /// Add a message to the request
    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Replace the message history
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    /// Add a user message
    pub fn with_user_message(self, content: impl Into<String>) -> Self {
        self.with_message(Message::user(content))
    }

    /// Add tools to the request
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Override the client's model for this request
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Response from the LLM
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

impl CompletionResponse {
    /// A text-only response
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// A response carrying tool calls
    pub fn with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            stop_reason: StopReason::ToolUse,
            usage: Usage::default(),
        }
    }
}

/// Reason why the LLM stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

/// Token usage statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    /// Create new usage stats
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Calculate total tokens
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Accumulate usage from another instance
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::System).unwrap(), "\"system\"");
        assert_eq!(serde_json::to_string(&Role::Tool).unwrap(), "\"tool\"");
        let assistant: Role = serde_json::from_str("\"assistant\"").unwrap();
        assert_eq!(assistant, Role::Assistant);
    }

    #[test]
    fn test_tool_result_message() {
        let msg = Message::tool_result("call_1", "read_file", "{}");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.name.as_deref(), Some("read_file"));
        assert!(!msg.has_tool_calls());
    }

    #[test]
    fn test_assistant_with_calls() {
        let msg = Message::assistant_with_calls("", vec![ToolCall::new("c1", "glob", json!({}))]);
        assert!(msg.has_tool_calls());
        assert!(!Message::assistant("hi").has_tool_calls());
    }

    #[test]
    fn test_model_action_from_parts() {
        assert!(matches!(
            ModelAction::from_parts("thinking", vec![]),
            ModelAction::NoAction { .. }
        ));

        let single = ModelAction::from_parts("", vec![ToolCall::new("a", "x", json!({}))]);
        assert!(matches!(single, ModelAction::Single { .. }));
        assert_eq!(single.calls().len(), 1);

        let multi = ModelAction::from_parts(
            "",
            vec![ToolCall::new("a", "x", json!({})), ToolCall::new("b", "y", json!({}))],
        );
        assert!(multi.is_actionable());
        assert_eq!(multi.calls()[1].id, "b");
    }

    #[test]
    fn test_tool_definition_to_anthropic_schema() {
        let tool = ToolDefinition::new(
            "read_file",
            "Read file contents",
            json!({"type": "object", "properties": {"path": {"type": "string"}}, "required": ["path"]}),
        );

        let schema = tool.to_anthropic_schema();
        assert_eq!(schema["name"], "read_file");
        assert!(schema["input_schema"].is_object());
    }

    #[test]
    fn test_completion_request_builder() {
        let req = CompletionRequest::new("You are an agent")
            .with_user_message("Solve it")
            .with_max_tokens(1000)
            .with_model("claude-haiku");

        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.max_tokens, Some(1000));
        assert_eq!(req.model.as_deref(), Some("claude-haiku"));
    }

    #[test]
    fn test_usage_add() {
        let mut usage = Usage::new(100, 50);
        usage.add(&Usage::new(200, 100));
        assert_eq!(usage.total(), 450);
    }
}
