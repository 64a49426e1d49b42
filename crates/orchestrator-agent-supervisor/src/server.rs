//! Contracts for the external task-execution server.
//!
//! The supervisor treats the server as a black box: lifecycle, session
//! calls, a status query and an event feed. `vendors::opencode` provides the
//! HTTP implementation; tests use scripted fakes.

use std::collections::HashMap;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use crate::errors::ServerError;
use crate::event::RawEvent;
use crate::model::SessionStatus;

/// Event feed for one workspace. May end or fail at any time; the consumer
/// reopens it.
pub type EventStream =
    Pin<Box<dyn futures::Stream<Item = Result<RawEvent, ServerError>> + Send + 'static>>;

/// A running task server plus the calls the supervisor needs from it.
#[async_trait::async_trait]
pub trait AgentServer: Send + Sync {
    /// Base URL the server listens on.
    fn url(&self) -> &str;

    /// Creates a session in `workspace` and returns its id.
    async fn create_session(&self, workspace: &Path, title: &str) -> Result<String, ServerError>;

    /// Submits the task prompt. Returns once the server accepted it, not when
    /// the task finishes.
    async fn submit_prompt(
        &self,
        session_id: &str,
        workspace: &Path,
        text: &str,
    ) -> Result<(), ServerError>;

    async fn abort_session(&self, session_id: &str, workspace: &Path) -> Result<(), ServerError>;

    async fn delete_session(&self, session_id: &str, workspace: &Path) -> Result<(), ServerError>;

    /// Status of every session the server knows about in `workspace`.
    async fn query_status(
        &self,
        workspace: &Path,
    ) -> Result<HashMap<String, SessionStatus>, ServerError>;

    /// Opens the server-sent event feed for `workspace`.
    async fn subscribe_events(&self, workspace: &Path) -> Result<EventStream, ServerError>;

    /// Shuts the server down. Calling it more than once is a no-op.
    async fn stop(&self);
}

/// Starts (or attaches to) a task server.
#[async_trait::async_trait]
pub trait ServerLauncher: Send + Sync {
    async fn start(&self) -> Result<Arc<dyn AgentServer>, ServerError>;
}
