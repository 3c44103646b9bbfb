use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod cli;

use cli::Cli;
use cli::commands::Commands;
use critloop::config::Config;
use critloop::critic::LlmCritic;
use critloop::jobs::{JobRunner, JobsFile, RunReport, SUMMARY_JSON, load_report, render_summary};
use critloop::llm::{AnthropicClient, AnthropicConfig, LlmClient};
use critloop::prompt::PromptLibrary;
use critloop::runner::LoopRunner;
use critloop::tools::ToolRegistry;

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("critloop")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("critloop.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Run {
            jobs,
            workers,
            no_fallback,
            timeout,
            overwrite,
        } => {
            let mut config = config;
            if let Some(workers) = workers {
                config.jobs.workers = *workers;
            }
            if let Some(timeout) = timeout {
                config.jobs.timeout_secs = *timeout;
            }
            if *no_fallback {
                config.jobs.fallback = false;
            }
            if *overwrite {
                config.jobs.overwrite = true;
            }
            config.validate().context("Invalid configuration")?;
            handle_run_command(jobs, &config).await
        }
        Commands::Tools => handle_tools_command(&config),
        Commands::Summary { dir } => {
            let dir = dir.as_deref().unwrap_or(config.jobs.work_dir.as_path());
            handle_summary_command(dir)
        }
    }
}

async fn handle_run_command(jobs_path: &Path, config: &Config) -> Result<()> {
    let jobs = JobsFile::load(jobs_path)?.into_jobs();
    info!("Loaded {} job(s) from {}", jobs.len(), jobs_path.display());
    println!("{} {} job(s) from {}", "Running:".green(), jobs.len(), jobs_path.display());

    let client = AnthropicClient::new(AnthropicConfig {
        model: config.llm.model.clone(),
        max_tokens: config.llm.max_tokens,
        timeout: std::time::Duration::from_millis(config.llm.timeout_ms),
    })
    .context("Failed to create model client")?;
    let client = Arc::new(client);

    let critic_client: Arc<dyn LlmClient> = client.clone();
    let critic = LlmCritic::new(critic_client)
        .with_model(config.critic_model())
        .with_max_score(config.agent.max_score)
        .with_retry(config.retry_policy());

    let registry = ToolRegistry::with_disabled(&config.tools.disabled);
    let prompts = PromptLibrary::load(config.prompts.templates_dir.as_deref()).context("Failed to load prompts")?;

    let runner = LoopRunner::new(
        client,
        Arc::new(critic),
        Arc::new(registry),
        Arc::new(prompts),
        config.loop_config(),
    );
    let report = JobRunner::new(runner, config.job_config()).run_all(&jobs).await?;

    print_report(&report);
    println!(
        "{} {}",
        "Summary written to:".green(),
        config.jobs.work_dir.join(SUMMARY_JSON).display()
    );
    Ok(())
}

fn handle_tools_command(config: &Config) -> Result<()> {
    let registry = ToolRegistry::with_disabled(&config.tools.disabled);
    println!("{}", "Tools:".cyan());
    for (name, reason) in registry.status() {
        match reason {
            None => println!("  {} {}", "✓".green(), name),
            Some(reason) => println!("  {} {} ({})", "✗".red(), name, reason),
        }
    }
    Ok(())
}

fn handle_summary_command(dir: &Path) -> Result<()> {
    let path = dir.join(SUMMARY_JSON);
    let report = load_report(&path).context(format!("Failed to read {}", path.display()))?;
    print!("{}", render_summary(&report));
    Ok(())
}

fn print_report(report: &RunReport) {
    let s = &report.summary;
    println!();
    for r in &report.results {
        let status = if r.skipped {
            "SKIPPED".yellow()
        } else if r.success {
            "SUCCESS".green()
        } else {
            "FAILED".red()
        };
        let score = r
            .score
            .map(|score| format!("{}/{}", score, s.score_scale))
            .unwrap_or_else(|| "-".to_string());
        println!("  {:<24} {:<8} {}", r.id, status, score);
        if let Some(error) = &r.error {
            println!("    {}", error.dimmed());
        }
    }
    println!();
    println!(
        "{} {}/{} succeeded, {} skipped",
        "Done:".cyan(),
        s.succeeded,
        s.total,
        s.skipped
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, config).await.context("Application failed")?;

    Ok(())
}
