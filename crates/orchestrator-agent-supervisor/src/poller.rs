use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::control::{RunControlStore, stop_requested};
use crate::errors::RunFailure;
use crate::model::{RunHandle, SessionStatus};
use crate::progress::{ProgressEntry, ProgressKind, ProgressSink, append_best_effort};
use crate::server::AgentServer;

/// Non-error ways a poll loop can end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// The session went idle.
    Completed,
    /// An operator stop request was observed.
    StoppedByUser,
}

/// Decides when the task is done.
///
/// Each wake-up first checks for a stop request (at most once per
/// `stop_check_interval`), then queries session status (at most once per
/// `poll_interval`). Checking stop first means a stop request beats an idle
/// status that arrives in the same iteration.
pub struct CompletionPoller {
    handle: Arc<RunHandle>,
    server: Arc<dyn AgentServer>,
    control: Arc<dyn RunControlStore>,
    sink: Arc<dyn ProgressSink>,
    poll_interval: Duration,
    stop_check_interval: Duration,
    error_ceiling: u32,
}

impl CompletionPoller {
    pub fn new(
        handle: Arc<RunHandle>,
        server: Arc<dyn AgentServer>,
        control: Arc<dyn RunControlStore>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            handle,
            server,
            control,
            sink,
            poll_interval: Duration::from_secs(2),
            stop_check_interval: Duration::from_secs(1),
            error_ceiling: 3,
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn stop_check_interval(mut self, interval: Duration) -> Self {
        self.stop_check_interval = interval;
        self
    }

    /// Consecutive status failures tolerated before the server counts as gone.
    pub fn error_ceiling(mut self, ceiling: u32) -> Self {
        self.error_ceiling = ceiling.max(1);
        self
    }

    pub async fn run(&self) -> Result<PollOutcome, RunFailure> {
        let run_id = self.handle.run_id();
        let session_id = self.handle.session_id();
        let mut consecutive_errors = 0_u32;
        let mut last_retry_message: Option<String> = None;
        let start = Instant::now();
        let mut next_stop_check = start;
        let mut next_poll = start;

        loop {
            let now = Instant::now();

            if now >= next_stop_check {
                next_stop_check = now + self.stop_check_interval;
                if stop_requested(self.control.as_ref(), run_id).await {
                    info!(run_id = %run_id, session_id, "stop requested; aborting session");
                    self.abort_best_effort().await;
                    return Ok(PollOutcome::StoppedByUser);
                }
            }

            if now >= next_poll {
                next_poll = now + self.poll_interval;
                match self.server.query_status(self.handle.workspace()).await {
                    Err(err) => {
                        consecutive_errors += 1;
                        warn!(
                            run_id = %run_id,
                            consecutive_errors,
                            error = %err,
                            "session status query failed"
                        );
                        if consecutive_errors >= self.error_ceiling {
                            return Err(RunFailure::ServerUnavailable {
                                consecutive_errors,
                                message: err.message().to_string(),
                            });
                        }
                    }
                    Ok(statuses) => {
                        consecutive_errors = 0;
                        match statuses.get(session_id) {
                            None => {
                                return Err(RunFailure::SessionLost {
                                    session_id: session_id.to_string(),
                                });
                            }
                            Some(SessionStatus::Idle) => {
                                info!(run_id = %run_id, session_id, "session idle");
                                return Ok(PollOutcome::Completed);
                            }
                            Some(SessionStatus::Retry { message }) => {
                                if last_retry_message.as_deref() != Some(message.as_str()) {
                                    self.report_retry(message).await;
                                    last_retry_message = Some(message.clone());
                                }
                            }
                            Some(SessionStatus::Running) => {
                                debug!(run_id = %run_id, "session still running");
                            }
                        }
                    }
                }
            }

            tokio::time::sleep_until(next_stop_check.min(next_poll)).await;
        }
    }

    async fn report_retry(&self, message: &str) {
        info!(run_id = %self.handle.run_id(), retry_message = message, "session retrying");
        let entry = ProgressEntry::new(
            &self.handle,
            ProgressKind::Thinking,
            format!("Retrying: {message}"),
            serde_json::json!({ "status": "retry", "retry_message": message }),
        );
        append_best_effort(self.sink.as_ref(), entry).await;
    }

    async fn abort_best_effort(&self) {
        if let Err(err) = self
            .server
            .abort_session(self.handle.session_id(), self.handle.workspace())
            .await
        {
            warn!(run_id = %self.handle.run_id(), error = %err, "session abort failed");
        }
    }
}
