//! JobRunner - runs a batch of jobs, each in its own workspace and task.
//!
//! Jobs run with bounded parallelism. Every attempt is spawned on its own
//! tokio task and bounded by a per-attempt deadline; a task that overruns is
//! detached and the attempt is reported as failed. Failed jobs are retried up
//! to `max_attempts`, and an optional fallback pass re-runs weak jobs with the
//! fallback prompt set.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, stream};

use super::report::{RunReport, write_report};
use super::workspace::Workspace;
use super::{JobResult, JobSpec};
use crate::context::{CONTEXT_FILE, ContextStore, JOB_RESULT_KEY, record_global_result};
use crate::critic::Critic;
use crate::error::Result;
use crate::llm::LlmClient;
use crate::prompt::PromptVariant;
use crate::retry::Deadline;
use crate::runner::{LoopJob, LoopOutcome, LoopRunner};

/// Configuration for the JobRunner.
#[derive(Debug, Clone)]
pub struct JobRunnerConfig {
    /// Parent of all job workspaces; summaries are written here
    pub work_dir: PathBuf,
    /// Directory of the global context
    pub log_dir: PathBuf,
    pub workers: usize,
    /// Wall-clock budget of one attempt
    pub timeout: Duration,
    pub max_attempts: u32,
    /// Re-run jobs whose completion marker already exists
    pub overwrite: bool,
    /// Path, relative to a workspace, that marks a finished job
    pub complete_marker: String,
    pub fallback: bool,
}

impl Default for JobRunnerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("work"),
            log_dir: PathBuf::from("logs"),
            workers: 4,
            timeout: Duration::from_secs(3600),
            max_attempts: 3,
            overwrite: false,
            complete_marker: "results/report.md".to_string(),
            fallback: true,
        }
    }
}

pub struct JobRunner<L, C>
where
    L: LlmClient + 'static,
    C: Critic + 'static,
{
    runner: Arc<LoopRunner<L, C>>,
    config: JobRunnerConfig,
}

impl<L, C> JobRunner<L, C>
where
    L: LlmClient + 'static,
    C: Critic + 'static,
{
    pub fn new(runner: LoopRunner<L, C>, config: JobRunnerConfig) -> Self {
        Self {
            runner: Arc::new(runner),
            config,
        }
    }

    pub fn config(&self) -> &JobRunnerConfig {
        &self.config
    }

    fn global_context_path(&self) -> PathBuf {
        self.config.log_dir.join(CONTEXT_FILE)
    }

    /// Run every job and write the run summary.
    ///
    /// Per-job failures end up in the report; only failing to write the
    /// summary is an error.
    pub async fn run_all(&self, jobs: &[JobSpec]) -> Result<RunReport> {
        std::fs::create_dir_all(&self.config.work_dir)?;
        std::fs::create_dir_all(&self.config.log_dir)?;

        log::info!("Running {} job(s) with {} worker(s)", jobs.len(), self.config.workers.max(1));
        let mut results = self.run_batch(jobs, (0..jobs.len()).collect(), PromptVariant::Primary).await;

        if self.config.fallback {
            self.fallback_pass(jobs, &mut results).await;
        }

        let report = RunReport::new(results, self.runner.config().max_score);
        write_report(&report, &self.config.work_dir)?;
        tracing::info!(
            total = report.summary.total,
            succeeded = report.summary.succeeded,
            skipped = report.summary.skipped,
            "Run complete"
        );
        Ok(report)
    }

    /// Run the jobs at `indices`, returning results in job order
    async fn run_batch(&self, jobs: &[JobSpec], indices: Vec<usize>, variant: PromptVariant) -> Vec<JobResult> {
        let mut results: Vec<(usize, JobResult)> = stream::iter(indices)
            .map(|i| async move { (i, self.run_job(&jobs[i], variant).await) })
            .buffer_unordered(self.config.workers.max(1))
            .collect()
            .await;
        results.sort_by_key(|(i, _)| *i);
        results.into_iter().map(|(_, r)| r).collect()
    }

    /// Re-run failed or below-threshold jobs with the fallback prompts,
    /// keeping whichever result scored higher
    async fn fallback_pass(&self, jobs: &[JobSpec], results: &mut [JobResult]) {
        let threshold = self.runner.config().score_threshold;
        let candidates: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.skipped && (!r.success || r.score_or_zero() < threshold))
            .map(|(i, _)| i)
            .collect();
        if candidates.is_empty() {
            return;
        }

        log::info!("Fallback pass for {} job(s)", candidates.len());
        let retried = self.run_batch(jobs, candidates.clone(), PromptVariant::Fallback).await;

        for (i, fallback) in candidates.into_iter().zip(retried) {
            let original = &results[i];
            let better = fallback.score_or_zero() > original.score_or_zero()
                || (fallback.score_or_zero() == original.score_or_zero() && fallback.success && !original.success);
            if better {
                log::info!(
                    "Job {}: fallback score {} replaces {}",
                    fallback.id,
                    fallback.score_or_zero(),
                    original.score_or_zero()
                );
                self.record_global(&fallback);
                results[i] = fallback;
            } else {
                log::info!("Job {}: keeping original score {}", original.id, original.score_or_zero());
            }
        }
    }

    /// Run one job with retries.
    pub async fn run_job(&self, job: &JobSpec, variant: PromptVariant) -> JobResult {
        let dir_name = match variant {
            PromptVariant::Primary => job.id.clone(),
            PromptVariant::Fallback => format!("{}.fallback", job.id),
        };
        let workspace = Workspace::new(&self.config.work_dir, &dir_name);

        if variant == PromptVariant::Primary
            && !self.config.overwrite
            && workspace.is_complete(&self.config.complete_marker)
        {
            log::info!("Job {}: {} exists, skipping", job.id, self.config.complete_marker);
            let result = JobResult::skipped(&job.id, &workspace);
            self.record_global(&result);
            return result;
        }

        let mut result = JobResult::failed(&job.id, &workspace, variant, 0, "No attempts were made".to_string());
        for attempt in 1..=self.config.max_attempts {
            let reset = attempt > 1 || self.config.overwrite || variant == PromptVariant::Fallback;
            result = match workspace.prepare(&job.data, reset) {
                Ok(()) => self.run_attempt(job, &workspace, variant, attempt).await,
                Err(e) => JobResult::failed(&job.id, &workspace, variant, attempt, e.to_string()),
            };
            self.record_job_result(&workspace, &result);
            self.record_global(&result);

            if result.success {
                log::info!("Job {} succeeded on attempt {} with score {}", job.id, attempt, result.score_or_zero());
                break;
            }

            let error = result.error.clone().unwrap_or_else(|| "Job failed".to_string());
            log::warn!("Job {} attempt {}/{} failed: {}", job.id, attempt, self.config.max_attempts, error);
            workspace.write_error_log(attempt, &error);
        }
        result
    }

    async fn run_attempt(&self, job: &JobSpec, workspace: &Workspace, variant: PromptVariant, attempt: u32) -> JobResult {
        let deadline = Deadline::after(self.config.timeout);
        let loop_job = LoopJob {
            job_id: job.id.clone(),
            task: job.task.clone(),
            vars: job.vars.clone(),
            workspace: workspace.root().to_path_buf(),
            variant,
        };

        let runner = Arc::clone(&self.runner);
        let handle = tokio::spawn(async move { runner.run(&loop_job, &deadline).await });

        let joined = match deadline.instant() {
            Some(at) => tokio::time::timeout_at(at, handle).await,
            None => Ok(handle.await),
        };

        let outcome = match joined {
            Err(_) => Err(format!("Timed out after {}s", self.config.timeout.as_secs_f64())),
            Ok(Err(e)) if e.is_panic() => {
                tracing::error!(job_id = %job.id, error = ?e, "Job task panicked");
                Err(format!("Job task panicked: {}", e))
            }
            Ok(Err(e)) => Err(format!("Job task was cancelled: {}", e)),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Ok(Ok(outcome))) => Ok(outcome),
        };

        match outcome {
            Ok(outcome) => self.result_from_outcome(job, workspace, variant, attempt, &outcome),
            Err(error) => JobResult::failed(&job.id, workspace, variant, attempt, error),
        }
    }

    fn result_from_outcome(
        &self,
        job: &JobSpec,
        workspace: &Workspace,
        variant: PromptVariant,
        attempt: u32,
        outcome: &LoopOutcome,
    ) -> JobResult {
        JobResult {
            id: job.id.clone(),
            success: outcome.is_finish(),
            score: Some(outcome.score_total()),
            iterations: outcome.iterations(),
            attempts: attempt,
            variant,
            skipped: false,
            error: outcome.reason().map(str::to_string),
            workspace: workspace.root().to_path_buf(),
            context_path: Some(workspace.context_path()),
        }
    }

    fn record_job_result(&self, workspace: &Workspace, result: &JobResult) {
        let written = ContextStore::open(workspace.context_path()).and_then(|mut store| store.set(JOB_RESULT_KEY, result));
        if let Err(e) = written {
            log::warn!("Job {}: failed to record result in job context: {}", result.id, e);
        }
    }

    fn record_global(&self, result: &JobResult) {
        if let Err(e) = record_global_result(&self.global_context_path(), &result.id, result) {
            log::warn!("Job {}: failed to record result in global context: {}", result.id, e);
        }
    }
}
