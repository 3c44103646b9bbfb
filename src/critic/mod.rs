//! Critic: rubric scoring of a job's progress by a second model call
//!
//! The [`CriticGate`] decides when a critique runs, assembles the rubric
//! prompt, deduplicates per (iteration, is_final) and persists each score
//! into the job context. A [`Critic`] produces the score itself.

mod gate;
mod llm_critic;

pub use gate::{CriticGate, CritiqueInput};
pub use llm_critic::{CRITIQUE_TOOL, LlmCritic, critique_tool_definition, parse_critique};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::retry::Deadline;

/// How a score came about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticStatus {
    Scored,
    /// The critic returned no structure
    Unavailable,
    /// The structure could not be parsed; the total is a neutral default
    ParseFailed,
}

/// One rubric evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticScore {
    pub subscores: BTreeMap<String, i64>,
    pub total: i64,
    pub rationale: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub status: CriticStatus,
}

impl CriticScore {
    /// Score from named sub-scores; the total is their sum
    pub fn scored(subscores: BTreeMap<String, i64>, rationale: impl Into<String>) -> Self {
        let total = subscores.values().sum();
        Self {
            subscores,
            total,
            rationale: rationale.into(),
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            recommendations: Vec::new(),
            status: CriticStatus::Scored,
        }
    }

    /// Single-total score, mostly for scripted critics
    pub fn with_total(total: i64) -> Self {
        let mut score = Self::scored(BTreeMap::from([("overall_score".to_string(), total)]), "");
        score.total = total;
        score
    }

    pub fn unavailable() -> Self {
        Self {
            subscores: BTreeMap::new(),
            total: 0,
            rationale: "No critique available".to_string(),
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            recommendations: Vec::new(),
            status: CriticStatus::Unavailable,
        }
    }

    /// Mid-range default used when a critique cannot be parsed
    pub fn neutral(max_score: i64) -> Self {
        Self {
            subscores: BTreeMap::new(),
            total: max_score / 2,
            rationale: "Critique could not be parsed; using a neutral score".to_string(),
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            recommendations: Vec::new(),
            status: CriticStatus::ParseFailed,
        }
    }

    pub fn passes(&self, threshold: i64) -> bool {
        self.total >= threshold
    }

    /// Markdown feedback shown to the working model
    pub fn feedback(&self, max_score: i64) -> String {
        let mut text = format!("Score: {}/{}\n", self.total, max_score);
        for (name, value) in &self.subscores {
            text.push_str(&format!("- {}: {}\n", name, value));
        }
        if !self.rationale.is_empty() {
            text.push_str(&format!("\n{}\n", self.rationale));
        }
        push_section(&mut text, "Strengths", &self.strengths);
        push_section(&mut text, "Weaknesses", &self.weaknesses);
        push_section(&mut text, "Recommendations", &self.recommendations);
        text.trim_end().to_string()
    }
}

fn push_section(text: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    text.push_str(&format!("\n### {}\n", title));
    for item in items {
        text.push_str(&format!("- {}\n", item));
    }
}

/// A fully assembled critique request
#[derive(Debug, Clone)]
pub struct CritiqueRequest {
    pub iteration: u32,
    pub is_final: bool,
    pub system: String,
    pub prompt: String,
    pub deadline: Deadline,
}

/// Produces a rubric score for a request
#[async_trait]
pub trait Critic: Send + Sync {
    async fn critique(&self, request: &CritiqueRequest) -> Result<CriticScore>;
}

/// Critic that returns pre-scripted totals in order, repeating the last one
pub struct ScriptedCritic {
    scores: Vec<CriticScore>,
    calls: AtomicUsize,
}

impl ScriptedCritic {
    pub fn new(totals: impl IntoIterator<Item = i64>) -> Self {
        Self::from_scores(totals.into_iter().map(CriticScore::with_total).collect())
    }

    pub fn from_scores(scores: Vec<CriticScore>) -> Self {
        Self {
            scores,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of critiques actually produced
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Critic for ScriptedCritic {
    async fn critique(&self, _request: &CritiqueRequest) -> Result<CriticScore> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let score = self
            .scores
            .get(n)
            .or_else(|| self.scores.last())
            .cloned()
            .unwrap_or_else(CriticScore::unavailable);
        Ok(score)
    }
}
