//! Bounded retry with exponential backoff for model calls.
//!
//! The wait before attempt n+1 is `base_wait * 2^(n-1)`. Rate-limit errors are
//! floored to `rate_limit_floor`. A cooperative [`Deadline`] is checked before
//! every attempt and before every sleep, and bounds each attempt in flight.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;

use crate::error::{CritloopError, Result};
use crate::llm::LlmError;

/// Retry parameters for one class of calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_retries: u32,
    pub base_wait: Duration,
    pub rate_limit_floor: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_wait: Duration::from_secs(2),
            rate_limit_floor: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_wait: Duration, rate_limit_floor: Duration) -> Self {
        Self {
            max_retries,
            base_wait,
            rate_limit_floor,
        }
    }

    /// Wait after the `attempt`-th failure (1-based)
    pub fn delay_for_attempt(&self, attempt: u32, rate_limited: bool) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let wait = self.base_wait.saturating_mul(1u32 << exponent);
        if rate_limited { wait.max(self.rate_limit_floor) } else { wait }
    }
}

/// Wall-clock bound shared by everything a job does
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
    budget: Duration,
}

impl Deadline {
    /// A deadline that never expires
    pub fn none() -> Self {
        Self {
            at: None,
            budget: Duration::ZERO,
        }
    }

    /// Expire `budget` from now
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Some(Instant::now() + budget),
            budget,
        }
    }

    pub fn instant(&self) -> Option<Instant> {
        self.at
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Fail with `DeadlineExceeded` once the deadline has passed
    pub fn check(&self) -> Result<()> {
        if self.is_expired() {
            return Err(CritloopError::DeadlineExceeded(self.budget));
        }
        Ok(())
    }

    /// Fail if sleeping `wait` would run past the deadline
    pub fn check_sleep(&self, wait: Duration) -> Result<()> {
        match self.remaining() {
            Some(remaining) if wait >= remaining => Err(CritloopError::DeadlineExceeded(self.budget)),
            _ => Ok(()),
        }
    }
}

/// Source of backoff sleeps
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real sleeps on the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records requested sleeps and returns immediately
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<Duration> {
        self.slept.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn total(&self) -> Duration {
        self.recorded().iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut slept) = self.slept.lock() {
            slept.push(duration);
        }
    }
}

/// Run `op` until it succeeds, a non-retryable error occurs, the deadline
/// passes, or `policy.max_retries` attempts have failed.
///
/// `op` receives the 1-based attempt number.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    deadline: &Deadline,
    label: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, LlmError>>,
{
    let attempts = policy.max_retries.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        deadline.check()?;

        let outcome = match deadline.instant() {
            Some(at) => tokio::time::timeout_at(at, op(attempt))
                .await
                .map_err(|_| CritloopError::DeadlineExceeded(deadline.budget()))?,
            None => op(attempt).await,
        };

        let err = match outcome {
            Ok(value) => {
                if attempt > 1 {
                    log::debug!("{} succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            log::error!("{} failed with non-retryable error: {}", label, err);
            return Err(CritloopError::Llm(err.to_string()));
        }

        let wait = policy.delay_for_attempt(attempt, err.is_rate_limit());
        tracing::warn!(
            label,
            attempt,
            max_retries = attempts,
            wait_ms = wait.as_millis() as u64,
            rate_limited = err.is_rate_limit(),
            timestamp = %Utc::now().to_rfc3339(),
            error = %err,
            "Model call failed"
        );
        last_error = err.to_string();

        if attempt == attempts {
            break;
        }

        deadline.check_sleep(wait)?;
        sleeper.sleep(wait).await;
    }

    Err(CritloopError::ExhaustedRetries { attempts, last_error })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionRequest, CompletionResponse, LlmClient, MockFailure, MockLlmClient};

    fn policy() -> RetryPolicy {
        RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(30))
    }

    #[test]
    fn test_delay_for_attempt_geometric() {
        let p = policy();
        assert_eq!(p.delay_for_attempt(1, false), Duration::from_secs(1));
        assert_eq!(p.delay_for_attempt(2, false), Duration::from_secs(2));
        assert_eq!(p.delay_for_attempt(3, false), Duration::from_secs(4));
        assert_eq!(p.delay_for_attempt(4, false), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_for_attempt_rate_limit_floor() {
        let p = policy();
        assert_eq!(p.delay_for_attempt(1, true), Duration::from_secs(30));
        let big = RetryPolicy::new(10, Duration::from_secs(10), Duration::from_secs(30));
        assert_eq!(big.delay_for_attempt(3, true), Duration::from_secs(40));
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let mock = MockLlmClient::scripted(vec![
            Err(MockFailure::Server(503)),
            Err(MockFailure::RateLimited),
            Err(MockFailure::Server(500)),
            Ok(CompletionResponse::text("ok")),
        ]);
        let sleeper = RecordingSleeper::new();

        let response = call_with_retry(&policy(), &sleeper, &Deadline::none(), "test", |_| {
            mock.complete(CompletionRequest::default())
        })
        .await
        .unwrap();

        assert_eq!(response.content, "ok");
        assert_eq!(mock.call_count(), 4);
        // 1s, then floored 30s, then 4s
        assert_eq!(
            sleeper.recorded(),
            vec![Duration::from_secs(1), Duration::from_secs(30), Duration::from_secs(4)]
        );
        assert_eq!(sleeper.total(), Duration::from_secs(35));
    }

    #[tokio::test]
    async fn test_exhausted_retries() {
        let mock = MockLlmClient::scripted(vec![Err(MockFailure::Server(500)); 3]);
        let sleeper = RecordingSleeper::new();
        let p = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_secs(30));

        let err = call_with_retry(&p, &sleeper, &Deadline::none(), "test", |_| {
            mock.complete(CompletionRequest::default())
        })
        .await
        .unwrap_err();

        match err {
            CritloopError::ExhaustedRetries { attempts, last_error } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("500"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // no sleep after the final attempt
        assert_eq!(sleeper.recorded(), vec![Duration::from_millis(10), Duration::from_millis(20)]);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let sleeper = RecordingSleeper::new();
        let mut calls = 0;

        let err = call_with_retry(&policy(), &sleeper, &Deadline::none(), "test", |_| {
            calls += 1;
            async {
                Err::<(), _>(LlmError::MissingApiKey {
                    env_var: "ANTHROPIC_API_KEY".to_string(),
                })
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, CritloopError::Llm(_)));
        assert_eq!(calls, 1);
        assert!(sleeper.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_expired_deadline_skips_call() {
        let deadline = Deadline::after(Duration::ZERO);
        let sleeper = RecordingSleeper::new();
        let mock = MockLlmClient::new(vec![]);

        let err = call_with_retry(&policy(), &sleeper, &deadline, "test", |_| {
            mock.complete(CompletionRequest::default())
        })
        .await
        .unwrap_err();

        assert!(err.is_deadline());
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_sleep_past_deadline_is_refused() {
        let deadline = Deadline::after(Duration::from_secs(10));
        let sleeper = RecordingSleeper::new();
        let mock = MockLlmClient::scripted(vec![Err(MockFailure::RateLimited)]);

        let err = call_with_retry(&policy(), &sleeper, &deadline, "test", |_| {
            mock.complete(CompletionRequest::default())
        })
        .await
        .unwrap_err();

        assert!(err.is_deadline());
        assert!(sleeper.recorded().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_call_bounded_by_deadline() {
        let deadline = Deadline::after(Duration::from_secs(2));
        let mock = MockLlmClient::new(vec![]).with_delay(Duration::from_secs(60));

        let err = call_with_retry(&policy(), &TokioSleeper, &deadline, "test", |_| {
            mock.complete(CompletionRequest::default())
        })
        .await
        .unwrap_err();

        assert!(err.is_deadline());
    }

    #[test]
    fn test_deadline_none_never_expires() {
        let deadline = Deadline::none();
        assert!(!deadline.is_expired());
        assert!(deadline.remaining().is_none());
        assert!(deadline.check_sleep(Duration::from_secs(3600)).is_ok());
    }
}
