//! Durable tool-call and critique history kept inside a job context.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::store::ContextStore;
use crate::critic::CriticScore;
use crate::error::Result;
use crate::tools::ToolOutcome;

pub const TOOL_HISTORY_KEY: &str = "tool_history";
pub const CRITIC_HISTORY_KEY: &str = "critic_history";
pub const JOB_RESULT_KEY: &str = "job_result";

/// Default cap on durable history entries
pub const DURABLE_LIMIT: usize = 50;

/// One dispatched action batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub iteration: u32,
    pub call_id: String,
    /// Tools that were asked to run, in request order
    pub tools: Vec<String>,
    /// Validated parameters per requested tool
    pub params: BTreeMap<String, Value>,
    /// Outcome per registered tool; `None` when not used in this batch
    pub results: BTreeMap<String, Option<ToolOutcome>>,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
}

impl ToolCallRecord {
    /// One line suitable for prompts: `#3 read_file,glob: <summary>`
    pub fn one_line(&self) -> String {
        format!("#{} {}: {}", self.iteration, self.tools.join(","), self.summary)
    }
}

/// One persisted critique
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticRecord {
    pub iteration: u32,
    pub is_final: bool,
    pub score: CriticScore,
    pub timestamp: DateTime<Utc>,
}

/// Append a tool record unless (iteration, call_id) is already present.
///
/// Returns whether a record was written.
pub fn record_tool_call(store: &mut ContextStore, record: &ToolCallRecord, limit: usize) -> Result<bool> {
    let mut history = tool_history(store);
    if history
        .iter()
        .any(|r| r.iteration == record.iteration && r.call_id == record.call_id)
    {
        log::debug!(
            "Skipping duplicate tool record for iteration {} call {}",
            record.iteration,
            record.call_id
        );
        return Ok(false);
    }

    history.push(record.clone());
    evict_oldest(&mut history, limit);
    store.set(TOOL_HISTORY_KEY, &history)?;
    Ok(true)
}

/// Append a critique unless (iteration, is_final) is already present
pub fn record_critique(store: &mut ContextStore, record: &CriticRecord, limit: usize) -> Result<bool> {
    let mut history = critic_history(store);
    if history
        .iter()
        .any(|r| r.iteration == record.iteration && r.is_final == record.is_final)
    {
        return Ok(false);
    }

    history.push(record.clone());
    evict_oldest(&mut history, limit);
    store.set(CRITIC_HISTORY_KEY, &history)?;
    Ok(true)
}

/// Drop both durable histories, typically when a fresh run reuses a workspace
pub fn clear_history(store: &mut ContextStore) -> Result<()> {
    store.remove(TOOL_HISTORY_KEY)?;
    store.remove(CRITIC_HISTORY_KEY)
}

pub fn tool_history(store: &ContextStore) -> Vec<ToolCallRecord> {
    store.get_as(TOOL_HISTORY_KEY).unwrap_or_default()
}

pub fn critic_history(store: &ContextStore) -> Vec<CriticRecord> {
    store.get_as(CRITIC_HISTORY_KEY).unwrap_or_default()
}

fn evict_oldest<T>(history: &mut Vec<T>, limit: usize) {
    if history.len() > limit {
        let excess = history.len() - limit;
        history.drain(..excess);
    }
}

/// In-memory buffer of the most recent tool records
#[derive(Debug, Clone)]
pub struct RecentCalls {
    cap: usize,
    items: VecDeque<ToolCallRecord>,
}

impl RecentCalls {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            items: VecDeque::new(),
        }
    }

    pub fn push(&mut self, record: ToolCallRecord) {
        if self.items.len() == self.cap {
            self.items.pop_front();
        }
        self.items.push_back(record);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolCallRecord> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::critic::CriticStatus;
    use tempfile::TempDir;

    fn record(iteration: u32, call_id: &str) -> ToolCallRecord {
        ToolCallRecord {
            iteration,
            call_id: call_id.to_string(),
            tools: vec!["read_file".to_string()],
            params: BTreeMap::new(),
            results: BTreeMap::new(),
            summary: "read a file".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_record_tool_call_dedups() {
        let dir = TempDir::new().unwrap();
        let mut store = ContextStore::open(dir.path().join("context.json")).unwrap();

        assert!(record_tool_call(&mut store, &record(1, "call_a"), DURABLE_LIMIT).unwrap());
        assert!(!record_tool_call(&mut store, &record(1, "call_a"), DURABLE_LIMIT).unwrap());
        assert!(record_tool_call(&mut store, &record(1, "call_b"), DURABLE_LIMIT).unwrap());

        assert_eq!(tool_history(&store).len(), 2);
    }

    #[test]
    fn test_record_tool_call_evicts_oldest() {
        let dir = TempDir::new().unwrap();
        let mut store = ContextStore::open(dir.path().join("context.json")).unwrap();

        for i in 1..=7 {
            record_tool_call(&mut store, &record(i, "c"), 5).unwrap();
        }

        let history = tool_history(&store);
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].iteration, 3);
        assert_eq!(history[4].iteration, 7);
    }

    #[test]
    fn test_record_critique_dedups_on_iteration_and_final() {
        let dir = TempDir::new().unwrap();
        let mut store = ContextStore::open(dir.path().join("context.json")).unwrap();
        let score = CriticScore::unavailable();

        let cadence = CriticRecord {
            iteration: 2,
            is_final: false,
            score: score.clone(),
            timestamp: Utc::now(),
        };
        let final_one = CriticRecord {
            is_final: true,
            ..cadence.clone()
        };

        assert!(record_critique(&mut store, &cadence, DURABLE_LIMIT).unwrap());
        assert!(!record_critique(&mut store, &cadence, DURABLE_LIMIT).unwrap());
        assert!(record_critique(&mut store, &final_one, DURABLE_LIMIT).unwrap());

        let history = critic_history(&store);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].score.status, CriticStatus::Unavailable);
    }

    #[test]
    fn test_clear_history_keeps_other_keys() {
        let dir = TempDir::new().unwrap();
        let mut store = ContextStore::open(dir.path().join("context.json")).unwrap();
        record_tool_call(&mut store, &record(1, "call_a"), DURABLE_LIMIT).unwrap();
        store.set(JOB_RESULT_KEY, "done").unwrap();

        clear_history(&mut store).unwrap();

        assert!(tool_history(&store).is_empty());
        assert!(critic_history(&store).is_empty());
        assert!(store.get(JOB_RESULT_KEY).is_some());
    }

    #[test]
    fn test_recent_calls_keeps_last_n() {
        let mut recent = RecentCalls::new(5);
        for i in 1..=8 {
            recent.push(record(i, "c"));
        }
        let iterations: Vec<u32> = recent.iter().map(|r| r.iteration).collect();
        assert_eq!(iterations, vec![4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_one_line() {
        assert_eq!(record(3, "c").one_line(), "#3 read_file: read a file");
    }
}
