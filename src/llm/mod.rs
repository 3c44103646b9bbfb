//! LLM Client Layer - Anthropic API integration and action resolution
//!
//! This module provides:
//! - Message history types for LLM communication
//! - LlmClient trait for API abstraction, plus a scripted mock
//! - AnthropicClient implementation
//! - Tool call parsing, inline-call normalization and JSON repair

pub mod anthropic;
pub mod client;
pub mod tool_parser;
pub mod types;

pub use anthropic::{AnthropicClient, AnthropicConfig};
pub use client::{LlmClient, LlmError, MockFailure, MockLlmClient};
pub use tool_parser::{
    extract_inline_calls, generate_call_id, parse_response, repair_json, resolve_action, validate_tool_input,
};
pub use types::{
    CompletionRequest, CompletionResponse, Message, ModelAction, Role, StopReason, ToolCall, ToolDefinition, Usage,
};
