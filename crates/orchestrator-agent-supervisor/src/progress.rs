use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::AsyncWriteExt as _;

use crate::errors::ProgressSinkError;
use crate::model::RunHandle;

/// Upper bound for `ProgressEntry::message`, in characters.
pub const MAX_MESSAGE_CHARS: usize = 500;

/// How long a single append may take before it is abandoned.
pub const APPEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Kind of a progress entry. Downstream surfaces key on these names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Started,
    Thinking,
    Action,
    ToolCall,
    Changes,
    TodoUpdate,
    Error,
    Complete,
}

/// One normalized, append-only record of something observable in a run.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProgressEntry {
    pub run_id: uuid::Uuid,
    pub correlation_id: uuid::Uuid,
    pub kind: ProgressKind,
    pub message: String,
    pub metadata: serde_json::Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ProgressEntry {
    /// Builds an entry for `run`, bounding the message length.
    pub fn new(
        run: &RunHandle,
        kind: ProgressKind,
        message: impl AsRef<str>,
        metadata: serde_json::Value,
    ) -> Self {
        Self::for_run(run.run_id(), run.correlation_id(), kind, message, metadata)
    }

    /// Builds an entry from bare ids, for failures before a session exists.
    pub fn for_run(
        run_id: uuid::Uuid,
        correlation_id: uuid::Uuid,
        kind: ProgressKind,
        message: impl AsRef<str>,
        metadata: serde_json::Value,
    ) -> Self {
        let (message, _) = truncate_chars(message.as_ref(), MAX_MESSAGE_CHARS, "...");
        Self {
            run_id,
            correlation_id,
            kind,
            message,
            metadata,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Cuts `text` to at most `max_chars` characters, appending `suffix` when cut.
///
/// Returns the result and whether truncation happened.
pub(crate) fn truncate_chars(text: &str, max_chars: usize, suffix: &str) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (format!("{}{suffix}", &text[..byte_idx]), true),
        None => (text.to_string(), false),
    }
}

/// Destination for progress entries (a database table, a log file, a UI feed).
///
/// Failures are reported back so the caller can log them; the supervisor never
/// treats them as fatal.
#[async_trait::async_trait]
pub trait ProgressSink: Send + Sync {
    async fn append(&self, entry: ProgressEntry) -> Result<(), ProgressSinkError>;
}

/// Appends `entry` and logs (without returning) any sink failure.
///
/// A sink that does not answer within [`APPEND_TIMEOUT`] is treated as a
/// failure, so a stalled sink never holds up the run.
pub(crate) async fn append_best_effort(sink: &dyn ProgressSink, entry: ProgressEntry) {
    let run_id = entry.run_id;
    let kind = entry.kind;
    match tokio::time::timeout(APPEND_TIMEOUT, sink.append(entry)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::warn!(
                run_id = %run_id,
                ?kind,
                error = %err,
                "failed to append progress entry"
            );
        }
        Err(_) => {
            tracing::warn!(run_id = %run_id, ?kind, "progress sink timed out; entry dropped");
        }
    }
}

/// In-memory progress log.
#[derive(Default)]
pub struct MemoryProgressLog {
    entries: Mutex<Vec<ProgressEntry>>,
}

impl MemoryProgressLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all entries appended so far, in append order.
    pub fn entries(&self) -> Vec<ProgressEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Entries of a single kind, in append order.
    pub fn entries_of(&self, kind: ProgressKind) -> Vec<ProgressEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.kind == kind)
            .collect()
    }
}

#[async_trait::async_trait]
impl ProgressSink for MemoryProgressLog {
    async fn append(&self, entry: ProgressEntry) -> Result<(), ProgressSinkError> {
        self.entries
            .lock()
            .map_err(|_| ProgressSinkError::Unavailable("progress log lock poisoned".into()))?
            .push(entry);
        Ok(())
    }
}

/// Progress sink that writes each entry to the tracing log.
///
/// Used when nothing else consumes progress, so an operator watching the
/// console still sees what the agent is doing.
#[derive(Default)]
pub struct TracingProgressLog;

impl TracingProgressLog {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl ProgressSink for TracingProgressLog {
    async fn append(&self, entry: ProgressEntry) -> Result<(), ProgressSinkError> {
        tracing::info!(
            run_id = %entry.run_id,
            kind = ?entry.kind,
            message = %entry.message,
            "progress"
        );
        Ok(())
    }
}

/// Progress log that appends one JSON object per line to a file.
pub struct JsonlProgressLog {
    path: PathBuf,
    file: tokio::sync::Mutex<Option<tokio::fs::File>>,
}

impl JsonlProgressLog {
    /// The file is created on first append; parent directories must exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: tokio::sync::Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl ProgressSink for JsonlProgressLog {
    async fn append(&self, entry: ProgressEntry) -> Result<(), ProgressSinkError> {
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let mut guard = self.file.lock().await;
        if guard.is_none() {
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            *guard = Some(file);
        }
        if let Some(file) = guard.as_mut() {
            file.write_all(&line).await?;
            file.flush().await?;
        }
        Ok(())
    }
}
