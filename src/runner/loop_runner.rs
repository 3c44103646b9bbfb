//! Iteration controller - drives one job through the request / dispatch /
//! critique cycle.
//!
//! Each iteration:
//! 1. Repairs tool-call pairing and shrinks the history to the window budget
//! 2. Asks the model for an action through the retry layer, re-asking when
//!    the reply carries no tool call
//! 3. Dispatches every invocation and appends one paired tool result each
//! 4. Runs the critic on a finish signal or at the configured cadence
//!
//! The loop ends in `Finish` once a critique passes, or in `Fail` when the
//! model never acts or the iteration budget runs out.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::snapshot::{SnapshotLimits, workspace_snapshot};
use crate::context::{
    AuditLog, CONTEXT_FILE, ContextStore, DURABLE_LIMIT, RecentCalls, ToolCallRecord, WindowBudget, clear_history,
    ensure_paired, record_tool_call, shrink, unpaired_ids,
};
use crate::critic::{Critic, CriticGate, CriticScore, CritiqueInput};
use crate::error::{CritloopError, Result};
use crate::llm::{CompletionRequest, LlmClient, Message, ModelAction, ToolDefinition, resolve_action};
use crate::prompt::{
    EMPTY_CALLS, FINISH_REJECTED, NO_ACTION, PASSING_SUGGESTION, PROGRESS_REVIEW, PromptLibrary, PromptVariant, SYSTEM,
    TASK,
};
use crate::retry::{Deadline, RetryPolicy, Sleeper, TokioSleeper, call_with_retry};
use crate::tools::{ActionBatch, ToolContext, ToolRegistry};

/// Append-only audit log inside each workspace
pub const AUDIT_FILE: &str = "history.txt";

/// Outcome of one controller run.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    /// A critique passed (or a finish signal was trusted)
    Finish { iterations: u32, score: CriticScore },
    /// No passing critique; `score` is the best one observed
    Fail {
        iterations: u32,
        score: Option<CriticScore>,
        reason: String,
    },
}

impl LoopOutcome {
    pub fn is_finish(&self) -> bool {
        matches!(self, LoopOutcome::Finish { .. })
    }

    pub fn iterations(&self) -> u32 {
        match self {
            LoopOutcome::Finish { iterations, .. } | LoopOutcome::Fail { iterations, .. } => *iterations,
        }
    }

    /// Total of the deciding score, 0 when none was produced
    pub fn score_total(&self) -> i64 {
        match self {
            LoopOutcome::Finish { score, .. } => score.total,
            LoopOutcome::Fail { score, .. } => score.as_ref().map(|s| s.total).unwrap_or(0),
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            LoopOutcome::Finish { .. } => None,
            LoopOutcome::Fail { reason, .. } => Some(reason),
        }
    }
}

/// Configuration for the LoopRunner.
#[derive(Debug, Clone)]
pub struct LoopRunnerConfig {
    pub max_iterations: u32,
    /// Critique every N dispatch rounds; 0 disables cadence critiques
    pub critic_interval: u32,
    pub score_threshold: i64,
    pub max_score: i64,
    /// Stop as soon as a cadence critique passes
    pub auto_early_stop: bool,
    /// Accept a finish signal regardless of its score
    pub trust_finish: bool,
    pub no_action_retries: u32,
    pub empty_call_limit: u32,
    pub final_critique: bool,
    pub max_tokens: u32,
    /// Overrides the client's default model
    pub model: Option<String>,
    pub window: WindowBudget,
    pub retry: RetryPolicy,
    pub recent_calls: usize,
    pub durable_limit: usize,
    pub command_timeout: Duration,
    pub max_output_bytes: usize,
    pub snapshot: SnapshotLimits,
}

impl Default for LoopRunnerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            critic_interval: 3,
            score_threshold: 10,
            max_score: 15,
            auto_early_stop: true,
            trust_finish: false,
            no_action_retries: 5,
            empty_call_limit: 3,
            final_critique: true,
            max_tokens: 8192,
            model: None,
            window: WindowBudget::default(),
            retry: RetryPolicy::default(),
            recent_calls: 5,
            durable_limit: DURABLE_LIMIT,
            command_timeout: Duration::from_secs(120),
            max_output_bytes: 30_000,
            snapshot: SnapshotLimits::default(),
        }
    }
}

/// What the controller is asked to do
#[derive(Debug, Clone)]
pub struct LoopJob {
    pub job_id: String,
    pub task: String,
    pub vars: BTreeMap<String, String>,
    pub workspace: PathBuf,
    pub variant: PromptVariant,
}

/// Mutable state of one run, observable after it ends
#[derive(Debug, Clone)]
pub struct LoopState {
    pub iteration: u32,
    /// Completed dispatch rounds
    pub dispatches: u32,
    pub consecutive_empty_calls: u32,
    /// Empty-call warnings injected so far
    pub corrective_messages: u32,
    pub messages: Vec<Message>,
    pub best_score: Option<CriticScore>,
    pub recent: RecentCalls,
}

impl LoopState {
    pub fn new(recent_calls: usize) -> Self {
        Self {
            iteration: 0,
            dispatches: 0,
            consecutive_empty_calls: 0,
            corrective_messages: 0,
            messages: Vec::new(),
            best_score: None,
            recent: RecentCalls::new(recent_calls),
        }
    }

    fn observe(&mut self, score: &CriticScore) {
        if self.best_score.as_ref().is_none_or(|best| score.total > best.total) {
            self.best_score = Some(score.clone());
        }
    }
}

/// Everything a critique needs from the running job
struct Scope<'a> {
    job: &'a LoopJob,
    store: &'a mut ContextStore,
    gate: &'a mut CriticGate,
    audit: &'a AuditLog,
    deadline: &'a Deadline,
}

/// LoopRunner drives a single job with one model and one critic.
pub struct LoopRunner<L, C>
where
    L: LlmClient,
    C: Critic,
{
    llm: Arc<L>,
    critic: Arc<C>,
    registry: Arc<ToolRegistry>,
    prompts: Arc<PromptLibrary>,
    sleeper: Arc<dyn Sleeper>,
    config: LoopRunnerConfig,
}

impl<L, C> LoopRunner<L, C>
where
    L: LlmClient,
    C: Critic,
{
    pub fn new(
        llm: Arc<L>,
        critic: Arc<C>,
        registry: Arc<ToolRegistry>,
        prompts: Arc<PromptLibrary>,
        config: LoopRunnerConfig,
    ) -> Self {
        Self {
            llm,
            critic,
            registry,
            prompts,
            sleeper: Arc::new(TokioSleeper),
            config,
        }
    }

    /// Replace the backoff sleeper (tests record sleeps instead)
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &LoopRunnerConfig {
        &self.config
    }

    /// Run the job from a fresh state.
    pub async fn run(&self, job: &LoopJob, deadline: &Deadline) -> Result<LoopOutcome> {
        let mut state = LoopState::new(self.config.recent_calls);
        self.run_with_state(job, &mut state, deadline).await
    }

    /// Run the job, leaving the final state in `state`.
    ///
    /// An empty `state.messages` is seeded with the system and task prompts
    /// and drops any durable history a previous run left in the context.
    /// Errors are reserved for the deadline and for failures of the context
    /// store; model and tool trouble ends in an outcome.
    pub async fn run_with_state(&self, job: &LoopJob, state: &mut LoopState, deadline: &Deadline) -> Result<LoopOutcome> {
        let cfg = &self.config;
        let ctx = ToolContext::new(job.workspace.clone(), job.job_id.clone())
            .with_command_timeout(cfg.command_timeout)
            .with_max_output_bytes(cfg.max_output_bytes);
        let mut store = ContextStore::open(job.workspace.join(CONTEXT_FILE))?;
        let audit = AuditLog::new(job.workspace.join(AUDIT_FILE));
        let mut gate = CriticGate::new(
            Arc::clone(&self.prompts),
            job.variant,
            cfg.critic_interval,
            cfg.score_threshold,
            cfg.max_score,
        )
        .with_history_limit(cfg.durable_limit);

        if state.messages.is_empty() {
            // fresh run in a reused workspace: earlier tool calls and scores are stale
            clear_history(&mut store)?;
            state.messages = self.initial_messages(job)?;
        }

        log::info!(
            "Job {} starting ({} prompts, max {} iterations)",
            job.job_id,
            job.variant,
            cfg.max_iterations
        );
        audit.note("START", &format!("{} variant, max {} iterations", job.variant, cfg.max_iterations));

        let mut scope = Scope {
            job,
            store: &mut store,
            gate: &mut gate,
            audit: &audit,
            deadline,
        };

        while state.iteration < cfg.max_iterations {
            deadline.check()?;
            state.iteration += 1;
            let iteration = state.iteration;
            log::debug!("Job {} iteration {}/{}", job.job_id, iteration, cfg.max_iterations);

            let action = match self.request_action(state, job.variant, deadline).await {
                Ok(action) => action,
                Err(e @ CritloopError::NoToolCall(_)) => {
                    let reason = e.to_string();
                    log::error!("Job {} stopped: {}", job.job_id, reason);
                    audit.note("FAILED", &reason);
                    return Ok(LoopOutcome::Fail {
                        iterations: iteration,
                        score: state.best_score.clone(),
                        reason,
                    });
                }
                Err(e) => return Err(e),
            };

            let calls = action.calls();
            state
                .messages
                .push(Message::assistant_with_calls(action.content(), calls.clone()));

            let mut finish = false;
            let mut all_null = true;
            for call in &calls {
                deadline.check()?;
                let batch = ActionBatch::from_call(call);
                let outcome = self.registry.dispatch(&batch, &ctx).await;
                state.messages.push(Message::tool_result(
                    call.id.clone(),
                    call.name.clone(),
                    outcome.to_message_content(),
                ));

                let record = outcome.to_record(iteration, &batch);
                record_tool_call(scope.store, &record, cfg.durable_limit)?;
                audit.note(&format!("ITER {}", iteration), &outcome.summary);
                state.recent.push(record);

                finish |= outcome.finish;
                all_null &= outcome.all_null();
            }
            state.dispatches += 1;
            self.track_empty_calls(state, all_null, job.variant)?;

            if finish {
                let score = self.critique(&mut scope, state, false).await?;
                if cfg.trust_finish || scope.gate.passes(&score) {
                    return Ok(self.finish(&audit, iteration, score));
                }
                log::info!(
                    "Job {} finish rejected at iteration {}: {}/{}",
                    job.job_id,
                    iteration,
                    score.total,
                    cfg.score_threshold
                );
                let text = self.render_review(job.variant, FINISH_REJECTED, iteration, &score)?;
                state.messages.push(Message::system(text));
                continue;
            }

            if scope.gate.should_run(state.dispatches) {
                let score = self.critique(&mut scope, state, false).await?;
                if scope.gate.passes(&score) {
                    if cfg.auto_early_stop {
                        return Ok(self.finish(&audit, iteration, score));
                    }
                    let text = self.render_review(job.variant, PASSING_SUGGESTION, iteration, &score)?;
                    state.messages.push(Message::system(text));
                } else {
                    let text = self.render_review(job.variant, PROGRESS_REVIEW, iteration, &score)?;
                    state.messages.push(Message::system(text));
                }
            }
        }

        if cfg.final_critique {
            let score = self.critique(&mut scope, state, true).await?;
            if scope.gate.passes(&score) {
                return Ok(self.finish(&audit, state.iteration, score));
            }
        }

        let reason = format!("Max iterations ({}) reached without a passing score", cfg.max_iterations);
        log::warn!("Job {}: {}", job.job_id, reason);
        audit.note("FAILED", &reason);
        Ok(LoopOutcome::Fail {
            iterations: state.iteration,
            score: state.best_score.clone(),
            reason,
        })
    }

    fn initial_messages(&self, job: &LoopJob) -> Result<Vec<Message>> {
        let tools: Vec<_> = self
            .registry
            .definitions()
            .into_iter()
            .map(|d| json!({"name": d.name, "description": d.description}))
            .collect();
        let system = self.prompts.render(
            job.variant,
            SYSTEM,
            &json!({
                "job_id": job.job_id,
                "tools": tools,
                "max_iterations": self.config.max_iterations,
                "threshold": self.config.score_threshold,
                "max_score": self.config.max_score,
            }),
        )?;
        let task = self.prompts.render(
            job.variant,
            TASK,
            &json!({
                "task": job.task,
                "vars": job.vars,
                "snapshot": workspace_snapshot(&job.workspace, self.config.snapshot),
            }),
        )?;
        Ok(vec![Message::system(system), Message::user(task)])
    }

    /// Ask for the next action, re-asking on replies without a tool call.
    ///
    /// Each re-ask uses a copy of the history plus a corrective instruction;
    /// only the eventual actionable reply reaches the real history.
    async fn request_action(
        &self,
        state: &mut LoopState,
        variant: PromptVariant,
        deadline: &Deadline,
    ) -> Result<ModelAction> {
        let unpaired = unpaired_ids(&state.messages);
        if !unpaired.is_empty() {
            log::warn!("Repairing {} unpaired tool call(s): {:?}", unpaired.len(), unpaired);
            state.messages = ensure_paired(std::mem::take(&mut state.messages));
        }

        let tools = vec![self.registry.action_definition()];
        let window = shrink(&state.messages, &self.config.window);
        let mut action = self.complete(window.clone(), &tools, deadline).await?;

        let max_attempts = self.config.no_action_retries;
        let mut attempt = 0;
        while !action.is_actionable() {
            if attempt == max_attempts {
                return Err(CritloopError::NoToolCall(attempt));
            }
            attempt += 1;
            log::warn!("No tool call in reply, re-asking ({}/{})", attempt, max_attempts);

            let mut retry_history = window.clone();
            if !action.content().trim().is_empty() {
                retry_history.push(Message::assistant(action.content()));
            }
            let instruction = self.prompts.render(
                variant,
                NO_ACTION,
                &json!({"attempt": attempt, "max_attempts": max_attempts}),
            )?;
            retry_history.push(Message::system(instruction));
            action = self.complete(retry_history, &tools, deadline).await?;
        }
        Ok(action)
    }

    async fn complete(
        &self,
        messages: Vec<Message>,
        tools: &[ToolDefinition],
        deadline: &Deadline,
    ) -> Result<ModelAction> {
        let mut request = CompletionRequest::default()
            .with_messages(messages)
            .with_tools(tools.to_vec())
            .with_max_tokens(self.config.max_tokens);
        if let Some(model) = &self.config.model {
            request = request.with_model(model.clone());
        }

        let response = call_with_retry(&self.config.retry, self.sleeper.as_ref(), deadline, "model", |_| {
            let llm = Arc::clone(&self.llm);
            let req = request.clone();
            async move { llm.complete(req).await }
        })
        .await?;
        Ok(resolve_action(&response))
    }

    fn track_empty_calls(&self, state: &mut LoopState, all_null: bool, variant: PromptVariant) -> Result<()> {
        if !all_null {
            state.consecutive_empty_calls = 0;
            return Ok(());
        }

        state.consecutive_empty_calls += 1;
        log::warn!(
            "Round without tool output ({}/{})",
            state.consecutive_empty_calls,
            self.config.empty_call_limit
        );
        if state.consecutive_empty_calls >= self.config.empty_call_limit {
            let text = self
                .prompts
                .render(variant, EMPTY_CALLS, &json!({"count": state.consecutive_empty_calls}))?;
            state.messages.push(Message::system(text));
            state.corrective_messages += 1;
            state.consecutive_empty_calls = 0;
        }
        Ok(())
    }

    async fn critique(&self, scope: &mut Scope<'_>, state: &mut LoopState, is_final: bool) -> Result<CriticScore> {
        let snapshot = workspace_snapshot(&scope.job.workspace, self.config.snapshot);
        let recent: Vec<ToolCallRecord> = state.recent.iter().cloned().collect();
        let input = CritiqueInput {
            iteration: state.iteration,
            is_final,
            task: &scope.job.task,
            snapshot: &snapshot,
            recent: &recent,
        };

        let score = scope
            .gate
            .evaluate(self.critic.as_ref(), scope.store, input, scope.deadline)
            .await?;
        state.observe(&score);

        let kind = if is_final { "FINAL" } else { "CRITIC" };
        scope.audit.note(
            kind,
            &format!(
                "iteration {} score {}/{} ({:?})",
                state.iteration, score.total, self.config.max_score, score.status
            ),
        );
        Ok(score)
    }

    fn render_review(
        &self,
        variant: PromptVariant,
        template: &str,
        iteration: u32,
        score: &CriticScore,
    ) -> Result<String> {
        self.prompts.render(
            variant,
            template,
            &json!({
                "score": score.total,
                "iteration": iteration,
                "max_score": self.config.max_score,
                "threshold": self.config.score_threshold,
                "feedback": score.feedback(self.config.max_score),
            }),
        )
    }

    fn finish(&self, audit: &AuditLog, iterations: u32, score: CriticScore) -> LoopOutcome {
        log::info!("Finished after {} iteration(s) with score {}", iterations, score.total);
        audit.note("FINISH", &format!("iteration {} score {}", iterations, score.total));
        LoopOutcome::Finish { iterations, score }
    }
}
