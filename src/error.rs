//! Error types for critloop
//!
//! Centralized error handling using thiserror.

use std::time::Duration;

use thiserror::Error;

/// All error types that can occur in critloop
#[derive(Debug, Error)]
pub enum CritloopError {
    /// Invalid state transition or operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Context store / persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// LLM API error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Tool execution error
    #[error("Tool error: {0}")]
    Tool(String),

    /// Workspace preparation error
    #[error("Workspace error: {0}")]
    Workspace(String),

    /// Prompt template error
    #[error("Prompt error: {0}")]
    Prompt(String),

    /// Every attempt of a retried call failed
    #[error("Exhausted retries after {attempts} attempts: {last_error}")]
    ExhaustedRetries { attempts: u32, last_error: String },

    /// The cooperative job deadline passed
    #[error("Deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// The model never produced a structured action
    #[error("No tool call after {0} retries")]
    NoToolCall(u32),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CritloopError {
    /// Whether this error came from the cooperative deadline
    pub fn is_deadline(&self) -> bool {
        matches!(self, CritloopError::DeadlineExceeded(_))
    }
}

/// Result type alias for critloop operations
pub type Result<T> = std::result::Result<T, CritloopError>;
