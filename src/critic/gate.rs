//! Critic gate - cadence, rubric assembly, dedup and persistence of critiques

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use super::{Critic, CriticScore, CritiqueRequest};
use crate::context::{ContextStore, CriticRecord, DURABLE_LIMIT, ToolCallRecord, record_critique};
use crate::error::Result;
use crate::prompt::{CRITIC_RUBRIC, CRITIC_SYSTEM, PromptLibrary, PromptVariant};
use crate::retry::Deadline;

/// What the rubric prompt is built from
#[derive(Debug, Clone, Copy)]
pub struct CritiqueInput<'a> {
    pub iteration: u32,
    pub is_final: bool,
    pub task: &'a str,
    pub snapshot: &'a str,
    /// Most recent tool records, oldest first
    pub recent: &'a [ToolCallRecord],
}

pub struct CriticGate {
    prompts: Arc<PromptLibrary>,
    variant: PromptVariant,
    interval: u32,
    threshold: i64,
    max_score: i64,
    history_limit: usize,
    cache: HashMap<(u32, bool), CriticScore>,
}

impl CriticGate {
    pub fn new(prompts: Arc<PromptLibrary>, variant: PromptVariant, interval: u32, threshold: i64, max_score: i64) -> Self {
        Self {
            prompts,
            variant,
            interval,
            threshold,
            max_score,
            history_limit: DURABLE_LIMIT,
            cache: HashMap::new(),
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn threshold(&self) -> i64 {
        self.threshold
    }

    pub fn max_score(&self) -> i64 {
        self.max_score
    }

    /// Cadence check; `dispatches` counts completed dispatch rounds from 1
    pub fn should_run(&self, dispatches: u32) -> bool {
        self.interval > 0 && dispatches > 0 && dispatches % self.interval == 0
    }

    pub fn passes(&self, score: &CriticScore) -> bool {
        score.passes(self.threshold)
    }

    /// Render the critic's system prompt and rubric
    pub fn build_request(&self, input: &CritiqueInput<'_>, deadline: Deadline) -> Result<CritiqueRequest> {
        let recent: Vec<String> = input.recent.iter().map(ToolCallRecord::one_line).collect();
        let ctx = json!({
            "task": input.task,
            "snapshot": input.snapshot,
            "recent": recent,
            "iteration": input.iteration,
            "is_final": input.is_final,
            "max_score": self.max_score,
            "threshold": self.threshold,
        });
        Ok(CritiqueRequest {
            iteration: input.iteration,
            is_final: input.is_final,
            system: self.prompts.render(self.variant, CRITIC_SYSTEM, &ctx)?,
            prompt: self.prompts.render(self.variant, CRITIC_RUBRIC, &ctx)?,
            deadline,
        })
    }

    /// Score the job, at most once per (iteration, is_final).
    ///
    /// A repeated request within this gate returns the cached score. Records
    /// left in the store by an earlier run are never replayed. Critic failures
    /// other than the deadline become an unavailable score.
    pub async fn evaluate<C>(
        &mut self,
        critic: &C,
        store: &mut ContextStore,
        input: CritiqueInput<'_>,
        deadline: &Deadline,
    ) -> Result<CriticScore>
    where
        C: Critic + ?Sized,
    {
        let key = (input.iteration, input.is_final);
        if let Some(score) = self.cache.get(&key) {
            log::debug!("Reusing critique for iteration {} (final: {})", key.0, key.1);
            return Ok(score.clone());
        }

        let request = self.build_request(&input, *deadline)?;
        let score = match critic.critique(&request).await {
            Ok(score) => score,
            Err(e) if e.is_deadline() => return Err(e),
            Err(e) => {
                log::error!("Critique at iteration {} failed: {}", input.iteration, e);
                CriticScore::unavailable()
            }
        };

        let record = CriticRecord {
            iteration: input.iteration,
            is_final: input.is_final,
            score: score.clone(),
            timestamp: Utc::now(),
        };
        record_critique(store, &record, self.history_limit)?;

        tracing::info!(
            iteration = input.iteration,
            is_final = input.is_final,
            total = score.total,
            threshold = self.threshold,
            passed = self.passes(&score),
            "Critic gate"
        );

        self.cache.insert(key, score.clone());
        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::critic_history;
    use crate::critic::{CriticStatus, ScriptedCritic};
    use crate::error::CritloopError;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::TempDir;

    fn gate(interval: u32) -> CriticGate {
        CriticGate::new(
            Arc::new(PromptLibrary::builtin().unwrap()),
            PromptVariant::Primary,
            interval,
            10,
            15,
        )
    }

    const NO_RECORDS: &[ToolCallRecord] = &[];

    fn input(iteration: u32, is_final: bool) -> CritiqueInput<'static> {
        CritiqueInput {
            iteration,
            is_final,
            task: "Summarise sales.csv",
            snapshot: "data/sales.csv (120 bytes)",
            recent: NO_RECORDS,
        }
    }

    struct FailingCritic(fn() -> CritloopError);

    #[async_trait]
    impl Critic for FailingCritic {
        async fn critique(&self, _request: &CritiqueRequest) -> Result<CriticScore> {
            Err((self.0)())
        }
    }

    #[test]
    fn test_should_run_cadence() {
        let g = gate(3);
        let runs: Vec<u32> = (0..=9).filter(|d| g.should_run(*d)).collect();
        assert_eq!(runs, vec![3, 6, 9]);
        assert!(gate(1).should_run(1));
        assert!(!gate(0).should_run(4));
    }

    #[test]
    fn test_build_request_includes_recent_calls() {
        let g = gate(1);
        let record = ToolCallRecord {
            iteration: 4,
            call_id: "call_1".to_string(),
            tools: vec!["glob".to_string()],
            params: BTreeMap::new(),
            results: BTreeMap::new(),
            summary: "glob: 3 matches".to_string(),
            timestamp: Utc::now(),
        };
        let records = [record];
        let input = CritiqueInput {
            recent: &records,
            ..input(4, true)
        };

        let request = g.build_request(&input, Deadline::none()).unwrap();
        assert!(request.prompt.contains("Summarise sales.csv"));
        assert!(request.prompt.contains("data/sales.csv"));
        assert!(request.prompt.contains("- #4 glob: glob: 3 matches"));
        assert!(request.prompt.contains("final review of iteration 4"));
        assert!(request.system.contains("15"));
        assert!(request.is_final);
    }

    #[tokio::test]
    async fn test_evaluate_dedups_per_iteration_and_final() {
        let dir = TempDir::new().unwrap();
        let mut store = ContextStore::open(dir.path().join("context.json")).unwrap();
        let critic = ScriptedCritic::new([6, 12]);
        let mut g = gate(1);

        let first = g.evaluate(&critic, &mut store, input(2, false), &Deadline::none()).await.unwrap();
        let again = g.evaluate(&critic, &mut store, input(2, false), &Deadline::none()).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(critic.call_count(), 1);
        assert_eq!(critic_history(&store).len(), 1);

        let final_score = g.evaluate(&critic, &mut store, input(2, true), &Deadline::none()).await.unwrap();
        assert_eq!(final_score.total, 12);
        assert!(g.passes(&final_score));
        assert_eq!(critic_history(&store).len(), 2);
    }

    #[tokio::test]
    async fn test_evaluate_ignores_records_from_earlier_run() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("context.json");

        {
            let mut store = ContextStore::open(&path).unwrap();
            let passing = ScriptedCritic::new([12]);
            gate(1).evaluate(&passing, &mut store, input(1, false), &Deadline::none()).await.unwrap();
        }

        let mut store = ContextStore::open(&path).unwrap();
        let critic = ScriptedCritic::new([3]);
        let score = gate(1).evaluate(&critic, &mut store, input(1, false), &Deadline::none()).await.unwrap();
        assert_eq!(score.total, 3);
        assert_eq!(critic.call_count(), 1);
    }

    #[tokio::test]
    async fn test_evaluate_critic_error_becomes_unavailable() {
        let dir = TempDir::new().unwrap();
        let mut store = ContextStore::open(dir.path().join("context.json")).unwrap();
        let critic = FailingCritic(|| CritloopError::Llm("bad request".to_string()));

        let score = gate(1).evaluate(&critic, &mut store, input(1, false), &Deadline::none()).await.unwrap();
        assert_eq!(score.status, CriticStatus::Unavailable);
        assert_eq!(critic_history(&store).len(), 1);
    }

    #[tokio::test]
    async fn test_evaluate_deadline_propagates() {
        let dir = TempDir::new().unwrap();
        let mut store = ContextStore::open(dir.path().join("context.json")).unwrap();
        let critic = FailingCritic(|| CritloopError::DeadlineExceeded(Duration::from_secs(1)));

        let err = gate(1)
            .evaluate(&critic, &mut store, input(1, false), &Deadline::none())
            .await
            .unwrap_err();
        assert!(err.is_deadline());
        assert!(critic_history(&store).is_empty());
    }
}
