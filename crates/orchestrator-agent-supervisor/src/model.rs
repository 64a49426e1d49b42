use std::path::{Path, PathBuf};

/// Error text that marks a `failed` run as stopped by the operator.
pub const STOPPED_BY_USER: &str = "Stopped by user";

/// Identifies one supervised execution.
///
/// Created once the session exists and never mutated afterwards; the
/// consumer and poller only ever see it behind an `Arc`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunHandle {
    run_id: uuid::Uuid,
    correlation_id: uuid::Uuid,
    workspace: PathBuf,
    session_id: String,
}

impl RunHandle {
    pub fn new(
        run_id: uuid::Uuid,
        correlation_id: uuid::Uuid,
        workspace: impl Into<PathBuf>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            run_id,
            correlation_id,
            workspace: workspace.into(),
            session_id: session_id.into(),
        }
    }

    pub fn run_id(&self) -> uuid::Uuid {
        self.run_id
    }

    pub fn correlation_id(&self) -> uuid::Uuid {
        self.correlation_id
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Status of one session as reported by the task server.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SessionStatus {
    /// Nothing left to do; terminal success.
    Idle,
    /// Still working.
    #[serde(alias = "busy")]
    Running,
    /// The runtime is retrying internally (rate limit, provider error, ...).
    Retry {
        #[serde(default)]
        message: String,
    },
}

/// Run status as stored by the external progress/status collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Complete,
    Failed,
}

/// Externally written control record for a run.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RunControlState {
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunControlState {
    pub fn new(status: RunStatus) -> Self {
        Self {
            status,
            error: None,
        }
    }

    /// A failed run with a human-readable reason.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failed,
            error: Some(reason.into()),
        }
    }

    /// The state an operator stop request is encoded as.
    pub fn stopped_by_user() -> Self {
        Self::failed(STOPPED_BY_USER)
    }

    /// Whether this record asks the run to stop.
    ///
    /// The storage schema has no dedicated cancellation flag, so a stop is a
    /// `failed` status carrying the [`STOPPED_BY_USER`] sentinel. Nothing else
    /// in the crate inspects that convention.
    pub fn is_stop_request(&self) -> bool {
        self.status == RunStatus::Failed && self.error.as_deref() == Some(STOPPED_BY_USER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_failed_with_sentinel_is_a_stop_request() {
        assert!(RunControlState::stopped_by_user().is_stop_request());
        assert!(!RunControlState::failed("boom").is_stop_request());
        assert!(!RunControlState::new(RunStatus::Running).is_stop_request());
        let mut complete = RunControlState::new(RunStatus::Complete);
        complete.error = Some(STOPPED_BY_USER.into());
        assert!(!complete.is_stop_request());
    }

    #[test]
    fn session_status_accepts_busy_alias() {
        let busy: SessionStatus = serde_json::from_value(serde_json::json!({"type": "busy"}))
            .expect("busy status");
        assert_eq!(busy, SessionStatus::Running);
        let retry: SessionStatus = serde_json::from_value(
            serde_json::json!({"type": "retry", "attempt": 2, "message": "rate limited"}),
        )
        .expect("retry status");
        assert_eq!(
            retry,
            SessionStatus::Retry {
                message: "rate limited".into()
            }
        );
    }
}
