//! Context window budgeting for the message history.
//!
//! Shrinking never breaks the pairing invariant: an assistant entry that
//! issues tool invocations is immediately followed by exactly one tool-result
//! entry per invocation id.

use std::collections::{HashMap, HashSet};

use crate::llm::{Message, Role, ToolCall};

const PLACEHOLDER_RESULT: &str = "(no result recorded for this call)";
const SYNOPSIS_CHARS: usize = 120;

/// Character budget and retention knobs for [`shrink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBudget {
    pub max_chars: usize,
    /// User entries retained, counted from the end
    pub keep_last_user: usize,
    /// Tool exchanges kept verbatim, counted from the end
    pub keep_full_recent: usize,
}

impl Default for WindowBudget {
    fn default() -> Self {
        Self {
            max_chars: 120_000,
            keep_last_user: 3,
            keep_full_recent: 3,
        }
    }
}

/// A history entry, or an invocation together with its results
#[derive(Debug, Clone)]
enum Unit {
    Single(Message),
    Exchange { call: Message, results: Vec<Message> },
}

/// Approximate size of a history in characters
pub fn history_chars(messages: &[Message]) -> usize {
    messages.iter().map(message_chars).sum()
}

fn message_chars(message: &Message) -> usize {
    let calls: usize = message
        .tool_calls
        .iter()
        .map(|c| c.name.len() + c.input.to_string().len())
        .sum();
    message.content.chars().count() + calls
}

/// Shrink `messages` toward `budget.max_chars`.
///
/// At or below the budget a paired history is returned unchanged. Above it:
/// system entries stay, only the last `keep_last_user` user entries stay,
/// assistant entries stay with their paired results, and all but the last
/// `keep_full_recent` exchanges have their results replaced by a
/// `[timestamp] synopsis` line. Relative order is preserved.
pub fn shrink(messages: &[Message], budget: &WindowBudget) -> Vec<Message> {
    let before = history_chars(messages);
    if before <= budget.max_chars {
        return ensure_paired(messages.to_vec());
    }

    let units = group(messages.to_vec());

    let user_positions: Vec<usize> = units
        .iter()
        .enumerate()
        .filter(|(_, u)| matches!(u, Unit::Single(m) if m.role == Role::User))
        .map(|(i, _)| i)
        .collect();
    let dropped_users: HashSet<usize> = user_positions
        [..user_positions.len().saturating_sub(budget.keep_last_user)]
        .iter()
        .copied()
        .collect();

    let exchange_positions: Vec<usize> = units
        .iter()
        .enumerate()
        .filter(|(_, u)| matches!(u, Unit::Exchange { .. }))
        .map(|(i, _)| i)
        .collect();
    let summarized: HashSet<usize> = exchange_positions
        [..exchange_positions.len().saturating_sub(budget.keep_full_recent)]
        .iter()
        .copied()
        .collect();

    let mut out = Vec::with_capacity(messages.len());
    for (pos, unit) in units.into_iter().enumerate() {
        match unit {
            Unit::Single(_) if dropped_users.contains(&pos) => {}
            Unit::Single(m) => out.push(m),
            Unit::Exchange { call, results } => {
                out.push(call);
                if summarized.contains(&pos) {
                    out.extend(results.into_iter().map(|r| {
                        let line = synopsis(&r);
                        Message { content: line, ..r }
                    }));
                } else {
                    out.extend(results);
                }
            }
        }
    }

    log::debug!(
        "Shrunk history from {} to {} chars ({} -> {} entries)",
        before,
        history_chars(&out),
        messages.len(),
        out.len()
    );
    out
}

/// Repair pairing: synthesize missing results, drop duplicates and orphans
pub fn ensure_paired(messages: Vec<Message>) -> Vec<Message> {
    flatten(group(messages))
}

/// Invocation ids lacking a paired result in the block after their entry
pub fn unpaired_ids(messages: &[Message]) -> Vec<String> {
    let mut missing = Vec::new();
    let mut i = 0;
    while i < messages.len() {
        let message = &messages[i];
        i += 1;
        if !message.has_tool_calls() {
            continue;
        }
        let mut answered = HashSet::new();
        while i < messages.len() && messages[i].role == Role::Tool {
            if let Some(id) = &messages[i].tool_call_id {
                answered.insert(id.as_str());
            }
            i += 1;
        }
        missing.extend(
            message
                .tool_calls
                .iter()
                .filter(|c| !answered.contains(c.id.as_str()))
                .map(|c| c.id.clone()),
        );
    }
    missing
}

/// Whether every invocation is followed by exactly one result per id and
/// no tool-result entry stands alone
pub fn is_paired(messages: &[Message]) -> bool {
    let mut i = 0;
    while i < messages.len() {
        let message = &messages[i];
        if message.role == Role::Tool {
            return false;
        }
        i += 1;
        if !message.has_tool_calls() {
            continue;
        }

        let expected: HashSet<&str> = message.tool_calls.iter().map(|c| c.id.as_str()).collect();
        let mut seen = HashSet::new();
        while i < messages.len() && messages[i].role == Role::Tool {
            let Some(id) = messages[i].tool_call_id.as_deref() else {
                return false;
            };
            if !expected.contains(id) || !seen.insert(id) {
                return false;
            }
            i += 1;
        }
        if seen.len() != expected.len() {
            return false;
        }
    }
    true
}

/// Compact `[timestamp] name: first line` form of a tool result
pub fn synopsis(message: &Message) -> String {
    let first_line = message.content.lines().next().unwrap_or("").trim();
    let mut text: String = first_line.chars().take(SYNOPSIS_CHARS).collect();
    if first_line.chars().count() > SYNOPSIS_CHARS || message.content.lines().nth(1).is_some() {
        text.push_str(" ...");
    }
    format!(
        "[{}] {}: {}",
        message.timestamp.format("%Y-%m-%d %H:%M:%S"),
        message.name.as_deref().unwrap_or("tool"),
        text
    )
}

fn group(messages: Vec<Message>) -> Vec<Unit> {
    let mut units = Vec::new();
    let mut iter = messages.into_iter().peekable();

    while let Some(message) = iter.next() {
        if message.has_tool_calls() {
            let mut block = Vec::new();
            while let Some(next) = iter.next_if(|m| m.role == Role::Tool) {
                block.push(next);
            }
            let results = pair_results(&message, block);
            units.push(Unit::Exchange { call: message, results });
        } else if message.role == Role::Tool {
            log::debug!(
                "Dropping orphan tool result {}",
                message.tool_call_id.as_deref().unwrap_or("<no id>")
            );
        } else {
            units.push(Unit::Single(message));
        }
    }

    units
}

fn pair_results(assistant: &Message, block: Vec<Message>) -> Vec<Message> {
    let mut by_id: HashMap<String, Message> = HashMap::new();
    for result in block {
        if let Some(id) = result.tool_call_id.clone() {
            by_id.entry(id).or_insert(result);
        }
    }

    let mut emitted = HashSet::new();
    assistant
        .tool_calls
        .iter()
        .filter(|call| emitted.insert(call.id.clone()))
        .map(|call| by_id.remove(&call.id).unwrap_or_else(|| placeholder(call)))
        .collect()
}

fn placeholder(call: &ToolCall) -> Message {
    log::warn!("Synthesizing placeholder result for unpaired call {}", call.id);
    Message::tool_result(call.id.clone(), call.name.clone(), PLACEHOLDER_RESULT)
}

fn flatten(units: Vec<Unit>) -> Vec<Message> {
    let mut out = Vec::new();
    for unit in units {
        match unit {
            Unit::Single(m) => out.push(m),
            Unit::Exchange { call, results } => {
                out.push(call);
                out.extend(results);
            }
        }
    }
    out
}
