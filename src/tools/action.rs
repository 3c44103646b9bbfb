//! The `multi_tools_executor` action: schema shown to the model and the
//! request batch parsed back out of its calls.

use serde_json::{Map, Value, json};

use crate::llm::{ToolCall, ToolDefinition};

/// Name of the single action tool exposed to the model
pub const ACTION_TOOL: &str = "multi_tools_executor";

const THINKING: &str = "thinking";
const FINISH: &str = "finish";

/// One requested tool inside an action
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRequest {
    pub tool: String,
    pub use_tool: bool,
    pub params: Value,
}

/// Everything one invocation asks for
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActionBatch {
    pub call_id: String,
    pub requests: Vec<ToolRequest>,
    pub thinking: Option<String>,
    pub finish: bool,
}

impl ActionBatch {
    /// Parse a batch from one invocation.
    ///
    /// An executor call lists tools as `{name: {use_tool, tool_params}}`
    /// properties next to `thinking` and `finish`. Any other call is a direct
    /// request for the named tool with the input as its parameters.
    pub fn from_call(call: &ToolCall) -> Self {
        if call.name != ACTION_TOOL {
            return Self {
                call_id: call.id.clone(),
                requests: vec![ToolRequest {
                    tool: call.name.clone(),
                    use_tool: true,
                    params: call.input.clone(),
                }],
                thinking: None,
                finish: false,
            };
        }

        let empty = Map::new();
        let input = call.input.as_object().unwrap_or(&empty);

        let mut requests = Vec::new();
        for (name, conf) in input {
            if name == THINKING || name == FINISH {
                continue;
            }
            let Some(conf) = conf.as_object() else {
                continue;
            };
            requests.push(ToolRequest {
                tool: name.clone(),
                use_tool: conf.get("use_tool").map(truthy).unwrap_or(false),
                params: conf.get("tool_params").cloned().unwrap_or_else(|| json!({})),
            });
        }

        Self {
            call_id: call.id.clone(),
            requests,
            thinking: input.get(THINKING).and_then(|t| t.as_str()).map(str::to_string),
            finish: input.get(FINISH).map(truthy).unwrap_or(false),
        }
    }

    /// Requests with `use_tool` set
    pub fn active(&self) -> impl Iterator<Item = &ToolRequest> {
        self.requests.iter().filter(|r| r.use_tool)
    }
}

/// Models sometimes send flags as strings
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        _ => false,
    }
}

/// Build the executor definition from `(name, description, input_schema)`
/// of every available tool
pub fn action_schema<'a>(tools: impl IntoIterator<Item = (&'a str, &'a str, Value)>) -> ToolDefinition {
    let mut properties = Map::new();
    let mut names = Vec::new();

    for (name, description, schema) in tools {
        names.push(name.to_string());
        properties.insert(
            name.to_string(),
            json!({
                "type": "object",
                "description": description,
                "properties": {
                    "use_tool": {
                        "type": "boolean",
                        "description": format!("Set to true to run {} in this step", name)
                    },
                    "tool_params": schema
                },
                "required": ["use_tool"]
            }),
        );
    }

    properties.insert(
        THINKING.to_string(),
        json!({"type": "string", "description": "Brief reasoning for this step"}),
    );
    properties.insert(
        FINISH.to_string(),
        json!({"type": "boolean", "description": "Set to true when the task is complete"}),
    );

    ToolDefinition::new(
        ACTION_TOOL,
        format!(
            "Run one or more tools in a single step. Available tools: {}. Set finish=true once the task is complete.",
            names.join(", ")
        ),
        json!({
            "type": "object",
            "properties": properties,
            "required": [FINISH]
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_executor_call() {
        let call = ToolCall::new(
            "call_1",
            ACTION_TOOL,
            json!({
                "read_file": {"use_tool": true, "tool_params": {"path": "a.txt"}},
                "glob": {"use_tool": false},
                "thinking": "look first",
                "finish": "true"
            }),
        );

        let batch = ActionBatch::from_call(&call);
        assert_eq!(batch.call_id, "call_1");
        assert_eq!(batch.requests.len(), 2);
        assert!(batch.finish);
        assert_eq!(batch.thinking.as_deref(), Some("look first"));

        let active: Vec<&str> = batch.active().map(|r| r.tool.as_str()).collect();
        assert_eq!(active, vec!["read_file"]);
    }

    #[test]
    fn test_from_direct_call() {
        let call = ToolCall::new("toolu_9", "glob", json!({"pattern": "*.md"}));
        let batch = ActionBatch::from_call(&call);

        assert!(!batch.finish);
        assert_eq!(batch.requests.len(), 1);
        assert!(batch.requests[0].use_tool);
        assert_eq!(batch.requests[0].params["pattern"], "*.md");
    }

    #[test]
    fn test_from_executor_call_without_object_input() {
        let call = ToolCall::new("c", ACTION_TOOL, json!("nonsense"));
        let batch = ActionBatch::from_call(&call);
        assert!(batch.requests.is_empty());
        assert!(!batch.finish);
    }

    #[test]
    fn test_action_schema_lists_tools() {
        let def = action_schema(vec![(
            "read_file",
            "Read a file",
            json!({"type": "object", "required": ["path"]}),
        )]);

        assert_eq!(def.name, ACTION_TOOL);
        let props = &def.input_schema["properties"];
        assert_eq!(props["read_file"]["properties"]["tool_params"]["required"][0], "path");
        assert!(props["thinking"].is_object());
        assert!(props["finish"].is_object());
        assert!(def.description.contains("read_file"));
    }
}
