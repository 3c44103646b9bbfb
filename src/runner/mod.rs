//! Loop runner module - the per-job iteration controller.
//!
//! - LoopRunner drives request / dispatch / critique iterations for one job
//! - LoopOutcome reports how the run ended
//! - workspace_snapshot renders the workspace for prompts

mod loop_runner;
mod snapshot;

pub use loop_runner::{AUDIT_FILE, LoopJob, LoopOutcome, LoopRunner, LoopRunnerConfig, LoopState};
pub use snapshot::{SnapshotLimits, workspace_snapshot};
