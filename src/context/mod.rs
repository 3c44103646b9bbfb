//! Job context: persistent store, durable history, audit log and the
//! message-history window manager.

pub mod audit;
pub mod history;
pub mod store;
pub mod window;

use std::path::Path;

use serde::Serialize;

pub use audit::AuditLog;
pub use history::{
    CRITIC_HISTORY_KEY, CriticRecord, DURABLE_LIMIT, JOB_RESULT_KEY, RecentCalls, TOOL_HISTORY_KEY, ToolCallRecord,
    clear_history, critic_history, record_critique, record_tool_call, tool_history,
};
pub use store::{ContextStore, merge_three_way};
pub use window::{WindowBudget, ensure_paired, history_chars, is_paired, shrink, unpaired_ids};

use crate::error::Result;

/// File name of a context inside its directory
pub const CONTEXT_FILE: &str = "context.json";

/// Merge one job's result into the global context at `path`.
///
/// Only `job_result_<id>` is written. Job contexts carry nothing beyond their
/// histories and `job_result`, and the histories stay per job. Keys other
/// writers left in the file are preserved.
pub fn record_global_result(path: &Path, job_id: &str, result: impl Serialize) -> Result<()> {
    let mut store = ContextStore::open(path)?;
    store.set(format!("{}_{}", JOB_RESULT_KEY, job_id), result)
}
