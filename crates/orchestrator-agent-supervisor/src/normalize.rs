//! Maps decoded feed events to progress entries.
//!
//! Normalization does no I/O. The only state it touches is the per-run
//! [`RunDedup`] the caller passes in.

use std::collections::HashSet;

use serde_json::{Value, json};

use crate::config::{NormalizerOptions, ToolVerbosity};
use crate::event::{AgentEvent, FileDiff, ReasoningPart, TodoItem, ToolPart, ToolStatus};
use crate::model::RunHandle;
use crate::progress::{ProgressEntry, ProgressKind, truncate_chars};

pub const THINKING_PREVIEW_CHARS: usize = 100;
pub const TOOL_OUTPUT_MAX_CHARS: usize = 2_000;
pub const DIFF_CONTENT_MAX_CHARS: usize = 5_000;
const TRUNCATION_MARKER: &str = "\n... (truncated)";
const UNKNOWN_ERROR: &str = "Unknown error";

/// Identifies one file change: path plus a prefix of the new content.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub file: String,
    pub content_prefix: String,
}

impl DedupKey {
    pub fn for_diff(diff: &FileDiff, prefix_chars: usize) -> Self {
        Self {
            file: diff.file.clone(),
            content_prefix: diff.after.chars().take(prefix_chars).collect(),
        }
    }
}

/// Deduplication state for a single run. Dropped with the run.
#[derive(Debug, Default)]
pub struct RunDedup {
    changes: HashSet<DedupKey>,
    in_flight_tools: HashSet<(String, String)>,
}

impl RunDedup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `key`; returns false when it was already seen in this run.
    pub fn insert_change(&mut self, key: DedupKey) -> bool {
        self.changes.insert(key)
    }

    pub fn changes_seen(&self) -> usize {
        self.changes.len()
    }
}

/// Turns one event into zero or more progress entries for `run`.
///
/// Everything except a diff batch yields at most one entry; a diff batch
/// yields one entry per file not seen before in this run.
pub fn normalize(
    event: &AgentEvent,
    run: &RunHandle,
    options: &NormalizerOptions,
    dedup: &mut RunDedup,
) -> Vec<ProgressEntry> {
    if let Some(session_id) = event.session_id()
        && session_id != run.session_id()
    {
        return Vec::new();
    }

    match event {
        AgentEvent::Reasoning(part) => reasoning_entry(run, part).into_iter().collect(),
        AgentEvent::Tool(part) => tool_entry(run, part, options, dedup).into_iter().collect(),
        AgentEvent::SessionDiff { files, .. } => files
            .iter()
            .filter(|diff| {
                dedup.insert_change(DedupKey::for_diff(diff, options.dedup_prefix_chars))
            })
            .map(|diff| changes_entry(run, diff))
            .collect(),
        AgentEvent::SessionError {
            session_id: Some(_),
            error,
        } => vec![error_entry(run, error.as_ref())],
        AgentEvent::TodoUpdated {
            session_id: Some(_),
            todos,
        } if !todos.is_empty() => vec![todo_entry(run, todos)],
        // Token streams would produce one entry per token; file notifications
        // are covered by the richer diff batch.
        AgentEvent::Text { .. }
        | AgentEvent::FileEdited { .. }
        | AgentEvent::SessionStatusChanged { .. }
        | AgentEvent::SessionError { .. }
        | AgentEvent::TodoUpdated { .. }
        | AgentEvent::Unrecognized { .. } => Vec::new(),
    }
}

fn reasoning_entry(run: &RunHandle, part: &ReasoningPart) -> Option<ProgressEntry> {
    if part.text.trim().is_empty() {
        return None;
    }
    let (preview, _) = truncate_chars(&part.text, THINKING_PREVIEW_CHARS, "...");
    Some(ProgressEntry::new(
        run,
        ProgressKind::Thinking,
        preview,
        json!({
            "text": part.text,
            "time": part.time,
        }),
    ))
}

fn tool_entry(
    run: &RunHandle,
    part: &ToolPart,
    options: &NormalizerOptions,
    dedup: &mut RunDedup,
) -> Option<ProgressEntry> {
    match part.status {
        ToolStatus::Completed => {
            let (output, truncated) = part
                .output
                .as_deref()
                .map(|out| truncate_chars(out, TOOL_OUTPUT_MAX_CHARS, TRUNCATION_MARKER))
                .map_or((None, false), |(out, cut)| (Some(out), cut));
            Some(ProgressEntry::new(
                run,
                ProgressKind::ToolCall,
                part.display_name(),
                json!({
                    "tool": part.tool,
                    "input": part.input,
                    "output": output,
                    "output_truncated": truncated,
                    "call_id": part.call_id,
                    "time": part.time,
                }),
            ))
        }
        ToolStatus::Pending | ToolStatus::Running
            if options.tool_verbosity == ToolVerbosity::InFlight =>
        {
            // Without a call id there is nothing to tell two calls apart by.
            if let Some(call) = &part.call_id
                && !dedup
                    .in_flight_tools
                    .insert((call.clone(), part.status.as_str().to_string()))
            {
                return None;
            }
            Some(ProgressEntry::new(
                run,
                ProgressKind::Action,
                format!("Running {}", part.display_name()),
                json!({
                    "tool": part.tool,
                    "status": part.status.as_str(),
                    "input": part.input,
                    "call_id": part.call_id,
                }),
            ))
        }
        _ => None,
    }
}

fn changes_entry(run: &RunHandle, diff: &FileDiff) -> ProgressEntry {
    let (before, before_truncated) =
        truncate_chars(&diff.before, DIFF_CONTENT_MAX_CHARS, TRUNCATION_MARKER);
    let (after, after_truncated) =
        truncate_chars(&diff.after, DIFF_CONTENT_MAX_CHARS, TRUNCATION_MARKER);
    ProgressEntry::new(
        run,
        ProgressKind::Changes,
        format!("{} (+{}/-{})", diff.file, diff.additions, diff.deletions),
        json!({
            "file": diff.file,
            "before": before,
            "after": after,
            "truncated": before_truncated || after_truncated,
            "additions": diff.additions,
            "deletions": diff.deletions,
        }),
    )
}

fn error_entry(run: &RunHandle, error: Option<&Value>) -> ProgressEntry {
    let message = match error {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => UNKNOWN_ERROR.to_string(),
    };
    ProgressEntry::new(
        run,
        ProgressKind::Error,
        message,
        json!({ "error": error }),
    )
}

fn todo_entry(run: &RunHandle, todos: &[TodoItem]) -> ProgressEntry {
    let total = todos.len();
    let completed = todos.iter().filter(|t| t.status == "completed").count();
    let in_progress = todos.iter().filter(|t| t.status == "in_progress").count();
    let mut message = format!("{completed}/{total} complete");
    if in_progress > 0 {
        message.push_str(&format!(", {in_progress} in progress"));
    }
    ProgressEntry::new(
        run,
        ProgressKind::TodoUpdate,
        message,
        json!({
            "todos": todos,
            "total": total,
            "completed": completed,
            "in_progress": in_progress,
        }),
    )
}
