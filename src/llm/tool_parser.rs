//! Tool call extraction and action resolution
//!
//! Parses `tool_use` blocks from Anthropic responses, normalizes inline
//! invocations written into plain text (```json blocks and `<|python_tag|>`
//! payloads) and resolves every response into a [`ModelAction`] exactly once.

use rand::Rng;
use serde_json::{Map, Value};

use crate::error::{CritloopError, Result};
use crate::llm::types::{CompletionResponse, ModelAction, StopReason, ToolCall, ToolDefinition, Usage};
use crate::tools::ACTION_TOOL;

const PYTHON_TAG: &str = "<|python_tag|>";
const JSON_FENCE: &str = "```json";

/// Parse a raw Anthropic API response into a CompletionResponse
///
/// Handles both text and tool_use content blocks from the response.
pub fn parse_response(response: &Value) -> CompletionResponse {
    let mut content = String::new();
    let mut tool_calls = Vec::new();

    if let Some(content_blocks) = response.get("content").and_then(|c| c.as_array()) {
        for block in content_blocks {
            match block.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                        if !content.is_empty() {
                            content.push('\n');
                        }
                        content.push_str(text);
                    }
                }
                Some("tool_use") => {
                    if let Some(call) = parse_tool_use_block(block) {
                        tool_calls.push(call);
                    }
                }
                _ => {}
            }
        }
    }

    let stop_reason = response
        .get("stop_reason")
        .and_then(|s| s.as_str())
        .map(parse_stop_reason)
        .unwrap_or(StopReason::EndTurn);

    let usage = response.get("usage").map(parse_usage).unwrap_or_default();

    CompletionResponse {
        content,
        tool_calls,
        stop_reason,
        usage,
    }
}

fn parse_tool_use_block(block: &Value) -> Option<ToolCall> {
    let id = block.get("id").and_then(|v| v.as_str())?.to_string();
    let name = block.get("name").and_then(|v| v.as_str())?.to_string();
    let input = block.get("input").cloned().unwrap_or(Value::Object(Map::new()));

    Some(ToolCall { id, name, input })
}

fn parse_stop_reason(reason: &str) -> StopReason {
    match reason {
        "end_turn" => StopReason::EndTurn,
        "tool_use" => StopReason::ToolUse,
        "max_tokens" => StopReason::MaxTokens,
        "stop_sequence" => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

fn parse_usage(usage: &Value) -> Usage {
    Usage {
        input_tokens: usage.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
        output_tokens: usage.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
    }
}

/// Resolve a response into the model's proposed next step.
///
/// Structured calls win; otherwise the text is searched for an inline
/// invocation. Anything else is `NoAction`.
pub fn resolve_action(response: &CompletionResponse) -> ModelAction {
    if !response.tool_calls.is_empty() {
        return ModelAction::from_parts(response.content.clone(), response.tool_calls.clone());
    }

    match extract_inline_calls(&response.content) {
        Some(calls) => ModelAction::from_parts(response.content.clone(), calls),
        None => ModelAction::NoAction {
            content: response.content.clone(),
        },
    }
}

/// Extract invocations written into free text.
///
/// `<|python_tag|>` payloads take precedence over ```json blocks. Returns
/// `None` when nothing parses into at least one named call.
pub fn extract_inline_calls(text: &str) -> Option<Vec<ToolCall>> {
    let payload = find_after(text, PYTHON_TAG).or_else(|| find_after(text, JSON_FENCE))?;
    let value: Value = serde_json::from_str(&repair_json(payload)).ok()?;

    let items = match value {
        Value::Array(items) => items,
        other => vec![other],
    };

    let calls: Vec<ToolCall> = items.iter().filter_map(inline_call).collect();
    if calls.is_empty() { None } else { Some(calls) }
}

/// Locate the first balanced JSON value following `marker`
fn find_after<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let start = text.find(marker)? + marker.len();
    let rest = &text[start..];
    let offset = rest.find(['{', '['])?;
    balanced_json(&rest[offset..])
}

/// Slice a balanced `{...}` or `[...]` prefix, ignoring brackets inside strings
fn balanced_json(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..idx + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn inline_call(item: &Value) -> Option<ToolCall> {
    let obj = item.as_object()?;
    let id = obj
        .get("id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(generate_call_id);

    // A bare action object is routed through the executor tool
    let is_action = obj.contains_key("finish") || obj.values().any(|v| v.get("use_tool").is_some());
    if is_action && !obj.contains_key("name") {
        return Some(ToolCall::new(id, ACTION_TOOL, item.clone()));
    }

    let name = obj.get("name").and_then(|v| v.as_str())?;
    let input = ["parameters", "arguments", "input"]
        .iter()
        .find_map(|key| obj.get(*key))
        .map(|v| match v {
            Value::String(raw) => serde_json::from_str(&repair_json(raw)).unwrap_or(Value::Object(Map::new())),
            other => other.clone(),
        })
        .unwrap_or(Value::Object(Map::new()));

    Some(ToolCall::new(id, name, input))
}

/// Repair common non-JSON literals emitted by models.
///
/// Outside string literals, `True`/`False`/`None` become `true`/`false`/`null`
/// and trailing commas before `}` or `]` are removed. String contents are
/// never touched.
pub fn repair_json(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if in_string {
            out.push(c);
            if c == '\\' {
                if let Some(&next) = chars.get(i + 1) {
                    out.push(next);
                    i += 1;
                }
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            ',' => {
                let mut j = i + 1;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                if !matches!(chars.get(j), Some('}') | Some(']')) {
                    out.push(c);
                }
                i += 1;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                out.push_str(match word.as_str() {
                    "True" => "true",
                    "False" => "false",
                    "None" => "null",
                    other => other,
                });
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

/// Generate a call id of the form `call_<8 hex>`
pub fn generate_call_id() -> String {
    let random: u32 = rand::rng().random();
    format!("call_{:08x}", random)
}

/// Validate a tool call's input against a tool definition's schema
///
/// Checks that all required fields are present in the input.
pub fn validate_tool_input(call: &ToolCall, definition: &ToolDefinition) -> Result<()> {
    let schema = &definition.input_schema;

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for req in required {
            if let Some(field_name) = req.as_str()
                && call.input.get(field_name).is_none()
            {
                return Err(CritloopError::Tool(format!(
                    "Tool '{}' missing required field: {}",
                    call.name, field_name
                )));
            }
        }
    }

    Ok(())
}
