//! Supervises one agent task executed by an external task server.
//!
//! A run starts (or attaches to) the server, opens a session, submits the
//! task prompt and then does two things at once: a background consumer turns
//! the server's event feed into normalized progress entries, while a
//! completion poller watches session status and operator stop requests.
//! Whatever the outcome, the session and the server are torn down.
//!
//! Vendor-specific integrations are namespaced under `vendors::*`.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use orchestrator_agent_supervisor::prelude::*;
//! use orchestrator_agent_supervisor::vendors::opencode::OpenCodeLauncher;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), SupervisorError> {
//! let control = Arc::new(MemoryControlStore::new());
//! let supervisor = RunSupervisor::builder()
//!     .launcher(Arc::new(OpenCodeLauncher::spawn("opencode")))
//!     .progress_sink(Arc::new(JsonlProgressLog::new("progress.jsonl")))
//!     .control_store(control)
//!     .config(SupervisorConfig::from_env()?)
//!     .build()?;
//!
//! let report = supervisor
//!     .run(TaskRequest::new("/path/to/repo", "Fix flaky test", "The app test fails on CI."))
//!     .await?;
//! println!("{:?}", report.outcome);
//! # Ok(())
//! # }
//! ```

/// Cooperative cancellation shared between the supervisor and its tasks.
pub mod cancel;
/// Supervisor timing, retry and normalization settings.
pub mod config;
/// Background event feed consumer.
pub mod consumer;
/// Run control records and their storage.
pub mod control;
/// Public error types.
pub mod errors;
/// Raw feed records and decoded agent events.
pub mod event;
/// Run identity, session status and control state.
pub mod model;
/// Event-to-progress normalization.
pub mod normalize;
/// Tracing subscriber setup.
pub mod observability;
/// Session status polling and stop detection.
pub mod poller;
/// Common imports for typical usage.
pub mod prelude;
/// Progress entries and sinks.
pub mod progress;
/// Reconnect backoff policy.
pub mod retry;
/// Task server contracts.
pub mod server;
/// Run orchestration and teardown.
pub mod supervisor;
/// Concrete task-server integrations.
pub mod vendors;

#[cfg(test)]
mod testing;

pub use cancel::{CancelSignal, CancelWatch};
pub use config::{NormalizerOptions, SupervisorConfig, ToolVerbosity};
pub use consumer::{ConsumerExit, ConsumerStats, EventStreamConsumer};
pub use control::{MemoryControlStore, RunControlStore};
pub use errors::{ControlStoreError, ProgressSinkError, RunFailure, ServerError, SupervisorError};
pub use event::{AgentEvent, RawEvent};
pub use model::{RunControlState, RunHandle, RunStatus, STOPPED_BY_USER, SessionStatus};
pub use normalize::{RunDedup, normalize};
pub use observability::init_observability;
pub use poller::{CompletionPoller, PollOutcome};
pub use progress::{
    JsonlProgressLog, MemoryProgressLog, ProgressEntry, ProgressKind, ProgressSink,
    TracingProgressLog,
};
pub use retry::BackoffPolicy;
pub use server::{AgentServer, EventStream, ServerLauncher};
pub use supervisor::{
    RunOutcome, RunReport, RunSupervisor, RunSupervisorBuilder, SupervisorState, TaskRequest,
    build_prompt,
};
