//! Common imports for embedding the supervisor.
pub use crate::{
    JsonlProgressLog, MemoryControlStore, MemoryProgressLog, ProgressEntry, ProgressKind,
    ProgressSink, RunControlStore, RunOutcome, RunReport, RunSupervisor, SupervisorConfig,
    SupervisorError, TaskRequest, ToolVerbosity, TracingProgressLog,
};
