//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: run every job in a jobs file
//! - tools: list builtin tools and their availability
//! - summary: print the summary of a previous run

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// critloop - critic-gated tool-calling agent runner
#[derive(Parser, Debug)]
#[command(name = "critloop")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run all jobs in a jobs file
    Run {
        /// YAML file listing the jobs
        jobs: PathBuf,

        /// Jobs run in parallel (overrides jobs.workers)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Skip the fallback pass
        #[arg(long)]
        no_fallback: bool,

        /// Per-attempt timeout in seconds (overrides jobs.timeout_secs)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Re-run jobs that already have results
        #[arg(long)]
        overwrite: bool,
    },

    /// List tools with availability
    Tools,

    /// Print the summary of a previous run
    Summary {
        /// Work dir of the run (defaults to jobs.work_dir)
        dir: Option<PathBuf>,
    },
}
