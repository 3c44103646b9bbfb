//! Core LLM client trait, error type, and a scripted mock client

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::types::{CompletionRequest, CompletionResponse};

/// Stateless LLM client - each call carries the full history it needs
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Single completion request
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Model identifier used when the request does not override it
    fn model(&self) -> &str;
}

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Rate limited (429), retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Missing API key: environment variable {env_var} not set")]
    MissingApiKey { env_var: String },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

impl LlmError {
    pub fn is_rate_limit(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::ApiError { status, .. } => *status == 429,
            _ => false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::ApiError { status, .. } => *status == 429 || *status >= 500,
            LlmError::Network(_) => true,
            LlmError::Timeout(_) => true,
            LlmError::InvalidResponse(_) => true,
            LlmError::JsonError(_) => false,
            LlmError::MissingApiKey { .. } => false,
        }
    }
}

/// A scripted failure returned by [`MockLlmClient`]
#[derive(Debug, Clone)]
pub enum MockFailure {
    RateLimited,
    Server(u16),
}

impl MockFailure {
    fn to_error(&self) -> LlmError {
        match self {
            MockFailure::RateLimited => LlmError::RateLimited {
                retry_after: Duration::from_secs(1),
            },
            MockFailure::Server(status) => LlmError::ApiError {
                status: *status,
                message: "scripted failure".to_string(),
            },
        }
    }
}

/// Scripted client for tests and dry runs.
///
/// Replies are consumed in order; once exhausted the fallback reply is
/// returned forever. Every request is captured for inspection.
pub struct MockLlmClient {
    replies: Mutex<VecDeque<Result<CompletionResponse, MockFailure>>>,
    fallback: CompletionResponse,
    delay: Option<Duration>,
    requests: Mutex<Vec<CompletionRequest>>,
    calls: AtomicU32,
}

impl MockLlmClient {
    /// Create a mock that returns the given responses in order
    pub fn new(responses: Vec<CompletionResponse>) -> Self {
        Self {
            replies: Mutex::new(responses.into_iter().map(Ok).collect()),
            fallback: CompletionResponse::text("I have nothing further to add."),
            delay: None,
            requests: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        }
    }

    /// Create a mock from a mixed script of responses and failures
    pub fn scripted(script: Vec<Result<CompletionResponse, MockFailure>>) -> Self {
        Self {
            replies: Mutex::new(script.into_iter().collect()),
            ..Self::new(Vec::new())
        }
    }

    /// Reply used once the script is exhausted
    pub fn with_fallback(mut self, fallback: CompletionResponse) -> Self {
        self.fallback = fallback;
        self
    }

    /// Sleep before every reply
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of completed `complete` calls
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far
    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().await.push(request);

        let next = self.replies.lock().await.pop_front();
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(failure)) => Err(failure.to_error()),
            None => Ok(self.fallback.clone()),
        }
    }

    fn model(&self) -> &str {
        "mock-model"
    }
}
