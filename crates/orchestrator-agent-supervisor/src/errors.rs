/// Errors returned by a task-server collaborator call.
///
/// These stay inside the consumer/poller boundary unless the caller decides
/// the failure is fatal for the run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServerError {
    /// Network or stream I/O failed.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// Server answered with an application-level failure (HTTP status, etc.).
    #[error("server error: {message}")]
    Server {
        message: String,
        status_code: Option<u16>,
    },
    /// Response shape did not match what the server contract promises.
    #[error("protocol error: {message}")]
    Protocol { message: String },
}

impl ServerError {
    /// Creates a transport-level error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a server-level error.
    pub fn server(message: impl Into<String>, status_code: Option<u16>) -> Self {
        Self::Server {
            message: message.into(),
            status_code,
        }
    }

    /// Creates a protocol-level error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Returns the human-readable message for this error.
    pub fn message(&self) -> &str {
        match self {
            Self::Transport { message }
            | Self::Server { message, .. }
            | Self::Protocol { message } => message,
        }
    }
}

/// Terminal run failure that crosses the supervisor boundary.
///
/// The `Display` form is the reason string recorded against the run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum RunFailure {
    /// The task server could not be started.
    #[error("failed to start task server: {message}")]
    ServerStart { message: String },
    /// The task server did not come up within the startup timeout.
    #[error("task server did not start within {timeout_ms}ms")]
    ServerStartTimeout { timeout_ms: u64 },
    /// Session creation failed.
    #[error("failed to create session: {message}")]
    SessionCreate { message: String },
    /// Prompt submission failed.
    #[error("failed to submit prompt: {message}")]
    PromptSubmit { message: String },
    /// Status queries failed too many times in a row.
    #[error("task server unavailable after {consecutive_errors} consecutive status errors: {message}")]
    ServerUnavailable {
        consecutive_errors: u32,
        message: String,
    },
    /// The server no longer reports any status for the active session.
    #[error("session {session_id} disappeared from the task server")]
    SessionLost { session_id: String },
}

/// Top-level error type for the public supervisor API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SupervisorError {
    /// Invalid supervisor or adapter configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid task request.
    #[error("validation error: {0}")]
    Validation(String),
    /// The run ended with a fatal failure.
    #[error(transparent)]
    RunFailed(RunFailure),
}

impl From<RunFailure> for SupervisorError {
    fn from(value: RunFailure) -> Self {
        SupervisorError::RunFailed(value)
    }
}

/// Failure appending a progress entry. Logged by the core, never propagated.
#[derive(Debug, thiserror::Error)]
pub enum ProgressSinkError {
    #[error("progress log I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("progress entry serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("progress sink unavailable: {0}")]
    Unavailable(String),
}

/// Failure reading or writing run control state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("run control store error: {0}")]
pub struct ControlStoreError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_failure_display_is_operator_readable() {
        let failure = RunFailure::ServerUnavailable {
            consecutive_errors: 3,
            message: "connection refused".into(),
        };
        assert_eq!(
            failure.to_string(),
            "task server unavailable after 3 consecutive status errors: connection refused"
        );
        let err = SupervisorError::from(RunFailure::SessionLost {
            session_id: "ses_1".into(),
        });
        assert_eq!(err.to_string(), "session ses_1 disappeared from the task server");
    }

    #[test]
    fn server_error_message_accessor() {
        assert_eq!(ServerError::server("nope", Some(500)).message(), "nope");
        assert_eq!(ServerError::transport("reset").message(), "reset");
    }
}
