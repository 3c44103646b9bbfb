//! LLM-backed critic.
//!
//! A separate model call scores the job against a rubric. The critic must
//! answer through the `submit_critique` tool; free text is treated as no
//! critique at all.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{Critic, CriticScore, CriticStatus, CritiqueRequest};
use crate::error::Result;
use crate::llm::{CompletionRequest, LlmClient, ToolDefinition, resolve_action};
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper, call_with_retry};

pub const CRITIQUE_TOOL: &str = "submit_critique";

/// Sub-score that restates the total rather than adding to it
const OVERALL_KEY: &str = "overall_score";

/// Schema of the structure the critic is asked to return
pub fn critique_tool_definition() -> ToolDefinition {
    ToolDefinition::new(
        CRITIQUE_TOOL,
        "Submit the rubric evaluation of the agent's work",
        json!({
            "type": "object",
            "properties": {
                "scores": {
                    "type": "object",
                    "description": "Integer sub-scores, one per rubric dimension",
                    "properties": {
                        "completeness_score": {"type": "integer", "description": "1-5"},
                        "quality_score": {"type": "integer", "description": "1-5"},
                        "process_score": {"type": "integer", "description": "1-5"}
                    },
                    "required": ["completeness_score", "quality_score", "process_score"]
                },
                "rationale": {"type": "string"},
                "strengths": {"type": "array", "items": {"type": "string"}},
                "weaknesses": {"type": "array", "items": {"type": "string"}},
                "recommendations": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["scores"]
        }),
    )
}

/// Parse a `submit_critique` payload.
///
/// The total is the sum of the sub-scores, excluding `overall_score` unless it
/// is the only one, clamped to `0..=max_score`. Anything unparseable yields the
/// neutral default.
pub fn parse_critique(input: &Value, max_score: i64) -> CriticScore {
    let Some(raw_scores) = input.get("scores").and_then(Value::as_object) else {
        log::error!("Critique has no scores object: {}", input);
        return CriticScore::neutral(max_score);
    };

    let mut subscores = BTreeMap::new();
    for (name, value) in raw_scores {
        match as_integer(value) {
            Some(n) => {
                subscores.insert(name.clone(), n);
            }
            None => {
                log::error!("Critique score '{}' is not an integer: {}", name, value);
                return CriticScore::neutral(max_score);
            }
        }
    }

    let parts: Vec<i64> = subscores
        .iter()
        .filter(|(name, _)| name.as_str() != OVERALL_KEY)
        .map(|(_, v)| *v)
        .collect();
    let total = if !parts.is_empty() {
        parts.iter().sum()
    } else if let Some(overall) = subscores.get(OVERALL_KEY) {
        *overall
    } else {
        log::error!("Critique scores object is empty");
        return CriticScore::neutral(max_score);
    };

    CriticScore {
        subscores,
        total: total.clamp(0, max_score),
        rationale: input["rationale"].as_str().unwrap_or_default().to_string(),
        strengths: string_list(&input["strengths"]),
        weaknesses: string_list(&input["weaknesses"]),
        recommendations: string_list(&input["recommendations"]),
        status: CriticStatus::Scored,
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default()
}

/// Critic that asks a model for a `submit_critique` call
pub struct LlmCritic {
    client: Arc<dyn LlmClient>,
    model: Option<String>,
    max_tokens: u32,
    max_score: i64,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl LlmCritic {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            model: None,
            max_tokens: 2000,
            max_score: 15,
            policy: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Use a different model than the client's default
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_max_score(mut self, max_score: i64) -> Self {
        self.max_score = max_score;
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}

#[async_trait]
impl Critic for LlmCritic {
    async fn critique(&self, request: &CritiqueRequest) -> Result<CriticScore> {
        let start = Instant::now();

        let mut llm_request = CompletionRequest::new(request.system.clone())
            .with_user_message(request.prompt.clone())
            .with_tools(vec![critique_tool_definition()])
            .with_max_tokens(self.max_tokens);
        if let Some(model) = &self.model {
            llm_request = llm_request.with_model(model.clone());
        }

        let response = call_with_retry(&self.policy, self.sleeper.as_ref(), &request.deadline, "critic", |_| {
            let client = Arc::clone(&self.client);
            let req = llm_request.clone();
            async move { client.complete(req).await }
        })
        .await?;

        let call = resolve_action(&response)
            .calls()
            .into_iter()
            .find(|c| c.name == CRITIQUE_TOOL);

        let score = match call {
            Some(call) => parse_critique(&call.input, self.max_score),
            None => {
                log::warn!("Critic replied without {} at iteration {}", CRITIQUE_TOOL, request.iteration);
                CriticScore::unavailable()
            }
        };

        tracing::info!(
            iteration = request.iteration,
            is_final = request.is_final,
            total = score.total,
            status = ?score.status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Critique complete"
        );
        Ok(score)
    }
}
