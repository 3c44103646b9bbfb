use eyre::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::context::{DURABLE_LIMIT, WindowBudget};
use crate::jobs::JobRunnerConfig;
use crate::llm::anthropic::{DEFAULT_MAX_TOKENS, DEFAULT_MODEL};
use crate::retry::RetryPolicy;
use crate::runner::{LoopRunnerConfig, SnapshotLimits};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub retry: RetryConfig,
    pub window: WindowConfig,
    pub jobs: JobsConfig,
    pub tools: ToolsConfig,
    pub history: HistoryConfig,
    pub prompts: PromptsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    /// Model for the critic; the agent model when unset
    pub critic_model: Option<String>,
    pub max_tokens: u32,
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            critic_model: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout_ms: 300000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_iterations: u32,
    pub critic_interval: u32,
    pub score_threshold: i64,
    pub max_score: i64,
    pub auto_early_stop: bool,
    pub trust_finish: bool,
    pub no_action_retries: u32,
    pub empty_call_limit: u32,
    pub final_critique: bool,
}

impl Default for AgentConfig {
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
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_wait_ms: u64,
    pub rate_limit_floor_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_wait_ms: 2000,
            rate_limit_floor_ms: 30000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub max_chars: usize,
    pub keep_last_user: usize,
    pub keep_full_recent: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        let budget = WindowBudget::default();
        Self {
            max_chars: budget.max_chars,
            keep_last_user: budget.keep_last_user,
            keep_full_recent: budget.keep_full_recent,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub work_dir: PathBuf,
    pub log_dir: PathBuf,
    pub workers: usize,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub overwrite: bool,
    pub complete_marker: String,
    pub fallback: bool,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("work"),
            log_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("critloop"),
            workers: 4,
            timeout_secs: 3600,
            max_attempts: 3,
            overwrite: false,
            complete_marker: "results/report.md".to_string(),
            fallback: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Tools registered as unavailable
    pub disabled: Vec<String>,
    pub command_timeout_ms: u64,
    pub max_output_bytes: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            disabled: Vec::new(),
            command_timeout_ms: 120000,
            max_output_bytes: 30000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub recent_calls: usize,
    pub durable_limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            recent_calls: 5,
            durable_limit: DURABLE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// Overrides as `<variant>/<name>.md`
    pub templates_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.agent.max_score <= 0 {
            bail!("agent.max_score must be positive");
        }
        if self.agent.score_threshold > self.agent.max_score {
            bail!(
                "agent.score_threshold ({}) exceeds agent.max_score ({})",
                self.agent.score_threshold,
                self.agent.max_score
            );
        }
        if self.agent.max_iterations == 0 {
            bail!("agent.max_iterations must be at least 1");
        }
        if self.retry.max_retries == 0 {
            bail!("retry.max_retries must be at least 1");
        }
        if self.jobs.workers == 0 {
            bail!("jobs.workers must be at least 1");
        }
        if self.jobs.max_attempts == 0 {
            bail!("jobs.max_attempts must be at least 1");
        }
        if self.jobs.timeout_secs == 0 {
            bail!("jobs.timeout_secs must be at least 1");
        }
        if self.jobs.complete_marker.trim().is_empty() {
            bail!("jobs.complete_marker must not be empty");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            Duration::from_millis(self.retry.base_wait_ms),
            Duration::from_millis(self.retry.rate_limit_floor_ms),
        )
    }

    pub fn loop_config(&self) -> LoopRunnerConfig {
        let agent = &self.agent;
        LoopRunnerConfig {
            max_iterations: agent.max_iterations,
            critic_interval: agent.critic_interval,
            score_threshold: agent.score_threshold,
            max_score: agent.max_score,
            auto_early_stop: agent.auto_early_stop,
            trust_finish: agent.trust_finish,
            no_action_retries: agent.no_action_retries,
            empty_call_limit: agent.empty_call_limit,
            final_critique: agent.final_critique,
            max_tokens: self.llm.max_tokens,
            model: Some(self.llm.model.clone()),
            window: WindowBudget {
                max_chars: self.window.max_chars,
                keep_last_user: self.window.keep_last_user,
                keep_full_recent: self.window.keep_full_recent,
            },
            retry: self.retry_policy(),
            recent_calls: self.history.recent_calls,
            durable_limit: self.history.durable_limit,
            command_timeout: Duration::from_millis(self.tools.command_timeout_ms),
            max_output_bytes: self.tools.max_output_bytes,
            snapshot: SnapshotLimits::default(),
        }
    }

    pub fn job_config(&self) -> JobRunnerConfig {
        let jobs = &self.jobs;
        JobRunnerConfig {
            work_dir: jobs.work_dir.clone(),
            log_dir: jobs.log_dir.clone(),
            workers: jobs.workers,
            timeout: Duration::from_secs(jobs.timeout_secs),
            max_attempts: jobs.max_attempts,
            overwrite: jobs.overwrite,
            complete_marker: jobs.complete_marker.clone(),
            fallback: jobs.fallback,
        }
    }

    /// Model the critic runs on
    pub fn critic_model(&self) -> &str {
        self.llm.critic_model.as_deref().unwrap_or(&self.llm.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.score_threshold, 10);
        assert_eq!(config.agent.max_score, 15);
        assert_eq!(config.jobs.complete_marker, "results/report.md");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
agent:
  max_iterations: 4
  critic_interval: 1
jobs:
  workers: 2
tools:
  disabled: [run_command]
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.agent.max_iterations, 4);
        assert_eq!(config.agent.score_threshold, 10);
        assert_eq!(config.jobs.workers, 2);
        assert_eq!(config.jobs.max_attempts, 3);
        assert_eq!(config.tools.disabled, vec!["run_command".to_string()]);
        assert_eq!(config.retry.max_retries, 5);
    }

    #[test]
    fn test_validate_rejects_threshold_above_max() {
        let mut config = Config::default();
        config.agent.score_threshold = 20;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("exceeds agent.max_score"));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = Config::default();
        config.jobs.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("critloop.yml");
        fs::write(&path, "llm:\n  model: claude-test\n  critic_model: claude-critic\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.llm.model, "claude-test");
        assert_eq!(config.critic_model(), "claude-critic");
    }

    #[test]
    fn test_load_explicit_path_missing_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_loop_and_job_config_conversion() {
        let mut config = Config::default();
        config.retry.base_wait_ms = 500;
        config.jobs.timeout_secs = 90;
        config.tools.command_timeout_ms = 5000;

        let loop_config = config.loop_config();
        assert_eq!(loop_config.retry.base_wait, Duration::from_millis(500));
        assert_eq!(loop_config.command_timeout, Duration::from_secs(5));
        assert_eq!(loop_config.model.as_deref(), Some(DEFAULT_MODEL));

        let job_config = config.job_config();
        assert_eq!(job_config.timeout, Duration::from_secs(90));
        assert!(job_config.fallback);
        assert_eq!(config.critic_model(), DEFAULT_MODEL);
    }
}
