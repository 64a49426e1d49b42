//! Scripted collaborators shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt as _;
use futures::stream;
use tokio::time::Instant;

use crate::errors::ServerError;
use crate::event::RawEvent;
use crate::model::{RunHandle, SessionStatus};
use crate::server::{AgentServer, EventStream, ServerLauncher};

pub(crate) fn run_handle(session_id: &str) -> RunHandle {
    RunHandle::new(
        uuid::Uuid::new_v4(),
        uuid::Uuid::new_v4(),
        "/tmp/workspace",
        session_id,
    )
}

pub(crate) fn reasoning_event(session_id: &str, text: &str) -> RawEvent {
    RawEvent::new(
        "message.part.updated",
        serde_json::json!({"part": {
            "type": "reasoning", "sessionID": session_id, "text": text, "time": {"start": 1}
        }}),
    )
}

pub(crate) fn diff_event(session_id: &str, file: &str, additions: u64, deletions: u64) -> RawEvent {
    RawEvent::new(
        "session.diff",
        serde_json::json!({"sessionID": session_id, "diff": [{
            "file": file, "before": "old", "after": "new",
            "additions": additions, "deletions": deletions
        }]}),
    )
}

/// How a scripted feed ends after its events.
pub(crate) enum FeedEnd {
    /// Stays open with nothing more to say.
    Pending,
    Close,
    Error(ServerError),
}

pub(crate) enum FeedScript {
    Fail(ServerError),
    /// The open call itself never answers.
    Hang,
    Events { events: Vec<RawEvent>, end: FeedEnd },
}

#[derive(Default)]
struct Calls {
    create: AtomicUsize,
    prompt: AtomicUsize,
    abort: AtomicUsize,
    delete: AtomicUsize,
    stop: AtomicUsize,
    status: AtomicUsize,
    subscribe: AtomicUsize,
}

/// Task server whose answers are queued up front.
///
/// An empty status queue answers `Running` for the session; an empty feed
/// queue opens a feed that never yields.
pub(crate) struct FakeServer {
    pub session_id: String,
    create_error: Option<ServerError>,
    prompt_error: Option<ServerError>,
    statuses: Mutex<VecDeque<Result<HashMap<String, SessionStatus>, ServerError>>>,
    feeds: Mutex<VecDeque<FeedScript>>,
    prompts: Mutex<Vec<String>>,
    status_times: Mutex<Vec<Instant>>,
    calls: Calls,
}

impl FakeServer {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            create_error: None,
            prompt_error: None,
            statuses: Mutex::new(VecDeque::new()),
            feeds: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            status_times: Mutex::new(Vec::new()),
            calls: Calls::default(),
        }
    }

    pub fn with_create_error(mut self, err: ServerError) -> Self {
        self.create_error = Some(err);
        self
    }

    pub fn with_prompt_error(mut self, err: ServerError) -> Self {
        self.prompt_error = Some(err);
        self
    }

    pub fn push_status(&self, status: SessionStatus) {
        let map = HashMap::from([(self.session_id.clone(), status)]);
        self.statuses.lock().expect("statuses").push_back(Ok(map));
    }

    pub fn push_status_error(&self, err: ServerError) {
        self.statuses.lock().expect("statuses").push_back(Err(err));
    }

    /// Queues a status answer that does not mention the session at all.
    pub fn push_session_missing(&self) {
        let map = HashMap::from([("ses_other".to_string(), SessionStatus::Running)]);
        self.statuses.lock().expect("statuses").push_back(Ok(map));
    }

    pub fn push_feed(&self, script: FeedScript) {
        self.feeds.lock().expect("feeds").push_back(script);
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts").clone()
    }

    pub fn status_times(&self) -> Vec<Instant> {
        self.status_times.lock().expect("status times").clone()
    }

    pub fn create_calls(&self) -> usize {
        self.calls.create.load(Ordering::SeqCst)
    }

    pub fn abort_calls(&self) -> usize {
        self.calls.abort.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.calls.delete.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.calls.stop.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.calls.status.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.calls.subscribe.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AgentServer for FakeServer {
    fn url(&self) -> &str {
        "http://fake.invalid"
    }

    async fn create_session(&self, _workspace: &Path, _title: &str) -> Result<String, ServerError> {
        self.calls.create.fetch_add(1, Ordering::SeqCst);
        match &self.create_error {
            Some(err) => Err(err.clone()),
            None => Ok(self.session_id.clone()),
        }
    }

    async fn submit_prompt(
        &self,
        _session_id: &str,
        _workspace: &Path,
        text: &str,
    ) -> Result<(), ServerError> {
        self.calls.prompt.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().expect("prompts").push(text.to_string());
        match &self.prompt_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn abort_session(&self, _session_id: &str, _workspace: &Path) -> Result<(), ServerError> {
        self.calls.abort.fetch_add(1, Ordering::SeqCst);
        Err(ServerError::transport("abort is flaky in tests"))
    }

    async fn delete_session(
        &self,
        _session_id: &str,
        _workspace: &Path,
    ) -> Result<(), ServerError> {
        self.calls.delete.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn query_status(
        &self,
        _workspace: &Path,
    ) -> Result<HashMap<String, SessionStatus>, ServerError> {
        self.calls.status.fetch_add(1, Ordering::SeqCst);
        self.status_times
            .lock()
            .expect("status times")
            .push(Instant::now());
        let next = self.statuses.lock().expect("statuses").pop_front();
        next.unwrap_or_else(|| {
            Ok(HashMap::from([(
                self.session_id.clone(),
                SessionStatus::Running,
            )]))
        })
    }

    async fn subscribe_events(&self, _workspace: &Path) -> Result<EventStream, ServerError> {
        self.calls.subscribe.fetch_add(1, Ordering::SeqCst);
        let script = self.feeds.lock().expect("feeds").pop_front();
        let Some(script) = script else {
            let idle: EventStream = Box::pin(stream::pending::<Result<RawEvent, ServerError>>());
            return Ok(idle);
        };
        let (events, end) = match script {
            FeedScript::Fail(err) => return Err(err),
            FeedScript::Hang => return std::future::pending().await,
            FeedScript::Events { events, end } => (events, end),
        };
        let head = stream::iter(events.into_iter().map(Ok::<RawEvent, ServerError>));
        let feed: EventStream = match end {
            FeedEnd::Pending => Box::pin(head.chain(stream::pending())),
            FeedEnd::Close => Box::pin(head),
            FeedEnd::Error(err) => Box::pin(head.chain(stream::iter([Err(err)]))),
        };
        Ok(feed)
    }

    async fn stop(&self) {
        self.calls.stop.fetch_add(1, Ordering::SeqCst);
    }
}

/// Launcher handing out a shared [`FakeServer`].
pub(crate) struct FakeLauncher {
    pub server: Arc<FakeServer>,
    pub error: Option<ServerError>,
    pub delay: Option<Duration>,
}

impl FakeLauncher {
    pub fn new(server: Arc<FakeServer>) -> Self {
        Self {
            server,
            error: None,
            delay: None,
        }
    }
}

#[async_trait::async_trait]
impl ServerLauncher for FakeLauncher {
    async fn start(&self) -> Result<Arc<dyn AgentServer>, ServerError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(self.server.clone()),
        }
    }
}
