use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{Instrument as _, error, info, warn};

use crate::cancel::CancelSignal;
use crate::config::SupervisorConfig;
use crate::consumer::{ConsumerStats, EventStreamConsumer};
use crate::control::RunControlStore;
use crate::errors::{RunFailure, SupervisorError};
use crate::model::{RunControlState, RunHandle, STOPPED_BY_USER};
use crate::poller::{CompletionPoller, PollOutcome};
use crate::progress::{ProgressEntry, ProgressKind, ProgressSink, append_best_effort};
use crate::server::{AgentServer, ServerLauncher};

/// How long teardown waits for the event consumer after cancelling it.
const CONSUMER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds the instruction text submitted to the agent runtime.
pub fn build_prompt(title: &str, description: &str) -> String {
    format!(
        "Task: {title}\n\n\
         {description}\n\n\
         Please:\n\
         1. Analyze the codebase to understand the relevant code\n\
         2. Implement the requested changes\n\
         3. Follow the existing code style and conventions\n\
         4. Do not make changes unrelated to this task\n"
    )
}

/// One task to supervise.
#[derive(Clone, Debug)]
pub struct TaskRequest {
    pub run_id: uuid::Uuid,
    pub correlation_id: uuid::Uuid,
    pub workspace: PathBuf,
    pub title: String,
    pub description: String,
}

impl TaskRequest {
    /// Creates a request with fresh run and correlation ids.
    pub fn new(
        workspace: impl Into<PathBuf>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4(),
            correlation_id: uuid::Uuid::new_v4(),
            workspace: workspace.into(),
            title: title.into(),
            description: description.into(),
        }
    }

    pub fn with_run_id(mut self, run_id: uuid::Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: uuid::Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    fn validate(&self) -> Result<(), SupervisorError> {
        if self.title.trim().is_empty() {
            return Err(SupervisorError::Validation("title must not be empty".into()));
        }
        if self.workspace.as_os_str().is_empty() {
            return Err(SupervisorError::Validation(
                "workspace must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Supervisor-level state of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupervisorState {
    Starting,
    SessionCreating,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// How a run ended when it did not fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Stopped on operator request before finishing.
    Stopped,
}

/// Summary returned for a run that completed or was stopped.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub run_id: uuid::Uuid,
    pub session_id: String,
    pub outcome: RunOutcome,
    /// `None` when the consumer task could not be joined.
    pub consumer: Option<ConsumerStats>,
}

/// Drives one task from server startup to guaranteed teardown.
pub struct RunSupervisor {
    launcher: Arc<dyn ServerLauncher>,
    sink: Arc<dyn ProgressSink>,
    control: Arc<dyn RunControlStore>,
    config: SupervisorConfig,
}

impl RunSupervisor {
    pub fn builder() -> RunSupervisorBuilder {
        RunSupervisorBuilder::default()
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Runs `request` to completion, stop, or failure.
    ///
    /// Whatever happens after the server is up, the event consumer is
    /// cancelled, the session (if one was created) is deleted and the server is
    /// stopped before this returns. Fatal failures are recorded in the control
    /// store as `failed` with the failure reason.
    pub async fn run(&self, request: TaskRequest) -> Result<RunReport, SupervisorError> {
        request.validate()?;
        let span = tracing::info_span!("run", run_id = %request.run_id);
        self.run_inner(request).instrument(span).await
    }

    async fn run_inner(&self, request: TaskRequest) -> Result<RunReport, SupervisorError> {
        let mut state = SupervisorState::Starting;
        info!(state = ?state, workspace = %request.workspace.display(), "starting task server");

        let server = match self.start_server().await {
            Ok(server) => server,
            Err(failure) => {
                transition(&mut state, SupervisorState::Failed);
                self.record_failure(&request, &failure).await;
                return Err(failure.into());
            }
        };
        info!(url = server.url(), "task server started");

        let cancel = CancelSignal::new();
        let mut session: Option<Arc<RunHandle>> = None;
        let mut consumer: Option<JoinHandle<ConsumerStats>> = None;

        let result = self
            .drive(&server, &request, &cancel, &mut session, &mut consumer, &mut state)
            .await;

        match &result {
            Ok(PollOutcome::Completed) => transition(&mut state, SupervisorState::Completed),
            Ok(PollOutcome::StoppedByUser) => transition(&mut state, SupervisorState::Cancelled),
            Err(_) => transition(&mut state, SupervisorState::Failed),
        }

        let consumer_stats = self
            .teardown(server.as_ref(), &cancel, session.as_deref(), consumer)
            .await;

        match result {
            Ok(outcome) => {
                let Some(handle) = session else {
                    return Err(SupervisorError::RunFailed(RunFailure::SessionCreate {
                        message: "session handle missing after run".into(),
                    }));
                };
                let (outcome, kind, message) = match outcome {
                    PollOutcome::Completed => {
                        (RunOutcome::Completed, ProgressKind::Complete, "Task completed")
                    }
                    PollOutcome::StoppedByUser => {
                        (RunOutcome::Stopped, ProgressKind::Error, STOPPED_BY_USER)
                    }
                };
                append_best_effort(
                    self.sink.as_ref(),
                    ProgressEntry::new(
                        &handle,
                        kind,
                        message,
                        serde_json::json!({ "session_id": handle.session_id() }),
                    ),
                )
                .await;
                info!(outcome = ?outcome, "run finished");
                Ok(RunReport {
                    run_id: handle.run_id(),
                    session_id: handle.session_id().to_string(),
                    outcome,
                    consumer: consumer_stats,
                })
            }
            Err(failure) => {
                self.record_failure(&request, &failure).await;
                Err(failure.into())
            }
        }
    }

    async fn start_server(&self) -> Result<Arc<dyn AgentServer>, RunFailure> {
        let timeout = self.config.server_startup_timeout;
        match tokio::time::timeout(timeout, self.launcher.start()).await {
            Ok(Ok(server)) => Ok(server),
            Ok(Err(err)) => Err(RunFailure::ServerStart {
                message: err.to_string(),
            }),
            Err(_) => Err(RunFailure::ServerStartTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn drive(
        &self,
        server: &Arc<dyn AgentServer>,
        request: &TaskRequest,
        cancel: &CancelSignal,
        session: &mut Option<Arc<RunHandle>>,
        consumer: &mut Option<JoinHandle<ConsumerStats>>,
        state: &mut SupervisorState,
    ) -> Result<PollOutcome, RunFailure> {
        transition(state, SupervisorState::SessionCreating);
        let session_id = server
            .create_session(&request.workspace, &request.title)
            .await
            .map_err(|err| RunFailure::SessionCreate {
                message: err.to_string(),
            })?;
        let handle = Arc::new(RunHandle::new(
            request.run_id,
            request.correlation_id,
            request.workspace.clone(),
            session_id,
        ));
        *session = Some(handle.clone());
        info!(session_id = handle.session_id(), "session created");

        transition(state, SupervisorState::Running);
        *consumer = Some(
            EventStreamConsumer::new(
                handle.clone(),
                server.clone(),
                self.sink.clone(),
                self.config.normalizer.clone(),
                self.config.feed_backoff.clone(),
                self.config.feed_connect_timeout,
            )
            .spawn(cancel.subscribe()),
        );

        let prompt = build_prompt(&request.title, &request.description);
        server
            .submit_prompt(handle.session_id(), handle.workspace(), &prompt)
            .await
            .map_err(|err| RunFailure::PromptSubmit {
                message: err.to_string(),
            })?;
        append_best_effort(
            self.sink.as_ref(),
            ProgressEntry::new(
                &handle,
                ProgressKind::Started,
                format!("Task submitted: {}", request.title),
                serde_json::json!({
                    "session_id": handle.session_id(),
                    "title": request.title,
                }),
            ),
        )
        .await;

        CompletionPoller::new(
            handle,
            server.clone(),
            self.control.clone(),
            self.sink.clone(),
        )
        .poll_interval(self.config.poll_interval)
        .stop_check_interval(self.config.stop_check_interval)
        .error_ceiling(self.config.status_error_ceiling)
        .run()
        .await
    }

    /// Releases everything a run may hold. Every step is best-effort.
    async fn teardown(
        &self,
        server: &dyn AgentServer,
        cancel: &CancelSignal,
        session: Option<&RunHandle>,
        consumer: Option<JoinHandle<ConsumerStats>>,
    ) -> Option<ConsumerStats> {
        cancel.cancel();
        let stats = match consumer {
            Some(mut task) => match tokio::time::timeout(CONSUMER_JOIN_TIMEOUT, &mut task).await {
                Ok(Ok(stats)) => Some(stats),
                Ok(Err(err)) => {
                    warn!(error = %err, "event consumer task failed");
                    None
                }
                Err(_) => {
                    warn!("event consumer did not stop in time; aborting it");
                    task.abort();
                    None
                }
            },
            None => None,
        };

        if let Some(handle) = session
            && let Err(err) = server
                .delete_session(handle.session_id(), handle.workspace())
                .await
        {
            warn!(session_id = handle.session_id(), error = %err, "failed to delete session");
        }

        server.stop().await;
        info!("task server stopped");
        stats
    }

    async fn record_failure(&self, request: &TaskRequest, failure: &RunFailure) {
        let reason = failure.to_string();
        error!(reason = %reason, "run failed");
        let entry = ProgressEntry::for_run(
            request.run_id,
            request.correlation_id,
            ProgressKind::Error,
            &reason,
            serde_json::json!({ "failure": failure }),
        );
        append_best_effort(self.sink.as_ref(), entry).await;
        if let Err(err) = self
            .control
            .write_run_status(request.run_id, RunControlState::failed(reason))
            .await
        {
            warn!(error = %err, "failed to record run failure");
        }
    }
}

fn transition(state: &mut SupervisorState, next: SupervisorState) {
    info!(from = ?*state, to = ?next, "run state changed");
    *state = next;
}

/// Builder for [`RunSupervisor`].
#[derive(Default)]
pub struct RunSupervisorBuilder {
    launcher: Option<Arc<dyn ServerLauncher>>,
    sink: Option<Arc<dyn ProgressSink>>,
    control: Option<Arc<dyn RunControlStore>>,
    config: Option<SupervisorConfig>,
}

impl RunSupervisorBuilder {
    pub fn launcher(mut self, launcher: Arc<dyn ServerLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn control_store(mut self, control: Arc<dyn RunControlStore>) -> Self {
        self.control = Some(control);
        self
    }

    pub fn config(mut self, config: SupervisorConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<RunSupervisor, SupervisorError> {
        let launcher = self
            .launcher
            .ok_or_else(|| SupervisorError::Config("a server launcher is required".into()))?;
        let sink = self
            .sink
            .ok_or_else(|| SupervisorError::Config("a progress sink is required".into()))?;
        let control = self
            .control
            .ok_or_else(|| SupervisorError::Config("a run control store is required".into()))?;
        let config = self.config.unwrap_or_default();
        config.validate()?;
        Ok(RunSupervisor {
            launcher,
            sink,
            control,
            config,
        })
    }
}
