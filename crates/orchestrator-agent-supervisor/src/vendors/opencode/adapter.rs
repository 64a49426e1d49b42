use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::{ServerError, SupervisorError};
use crate::model::SessionStatus;
use crate::server::{AgentServer, EventStream};

use super::config::OpenCodeClientConfig;
use super::transport::{event_stream, parse_status_map};

const CHILD_EXIT_GRACE: Duration = Duration::from_secs(5);

#[derive(serde::Deserialize)]
struct SessionInfo {
    id: String,
}

/// `AgentServer` backed by the OpenCode HTTP API.
///
/// When the launcher spawned the server process, the handle owns it and
/// `stop` kills it; an attached server is left running.
pub struct OpenCodeServer {
    client: reqwest::Client,
    config: OpenCodeClientConfig,
    process: Mutex<Option<Child>>,
}

impl OpenCodeServer {
    pub fn new(config: OpenCodeClientConfig) -> Result<Self, SupervisorError> {
        if config.base_url.trim().is_empty() {
            return Err(SupervisorError::Config(
                "OpenCode client config base_url must not be empty".into(),
            ));
        }
        // No client-wide timeout: it would also cut the long-lived event feed.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| SupervisorError::Config(format!("failed to build OpenCode client: {e}")))?;
        Ok(Self {
            client,
            config,
            process: Mutex::new(None),
        })
    }

    pub(crate) fn with_process(mut self, child: Child) -> Self {
        self.process = Mutex::new(Some(child));
        self
    }

    fn request(
        &self,
        method: reqwest::Method,
        url: String,
        workspace: &Path,
    ) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .query(&[("directory", workspace.to_string_lossy())])
            .timeout(self.config.timeout)
    }
}

async fn send(
    request: reqwest::RequestBuilder,
    what: &str,
) -> Result<reqwest::Response, ServerError> {
    let response = request
        .send()
        .await
        .map_err(|e| ServerError::transport(format!("{what} request failed: {e}")))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    Err(ServerError::server(
        format!("{what} failed with status {status}: {body}"),
        Some(status.as_u16()),
    ))
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    what: &str,
) -> Result<T, ServerError> {
    response
        .json()
        .await
        .map_err(|e| ServerError::protocol(format!("invalid {what} response: {e}")))
}

pub(crate) fn prompt_body(text: &str) -> serde_json::Value {
    serde_json::json!({ "parts": [{ "type": "text", "text": text }] })
}

#[async_trait::async_trait]
impl AgentServer for OpenCodeServer {
    fn url(&self) -> &str {
        &self.config.base_url
    }

    async fn create_session(&self, workspace: &Path, title: &str) -> Result<String, ServerError> {
        let request = self
            .request(reqwest::Method::POST, self.config.url("session"), workspace)
            .json(&serde_json::json!({ "title": title }));
        let response = send(request, "create session").await?;
        let session: SessionInfo = read_json(response, "create session").await?;
        debug!(session_id = %session.id, "opencode session created");
        Ok(session.id)
    }

    async fn submit_prompt(
        &self,
        session_id: &str,
        workspace: &Path,
        text: &str,
    ) -> Result<(), ServerError> {
        let request = self
            .request(
                reqwest::Method::POST,
                self.config.session_url(session_id, Some("prompt_async")),
                workspace,
            )
            .json(&prompt_body(text));
        send(request, "submit prompt").await?;
        Ok(())
    }

    async fn abort_session(&self, session_id: &str, workspace: &Path) -> Result<(), ServerError> {
        let request = self.request(
            reqwest::Method::POST,
            self.config.session_url(session_id, Some("abort")),
            workspace,
        );
        send(request, "abort session").await?;
        Ok(())
    }

    async fn delete_session(&self, session_id: &str, workspace: &Path) -> Result<(), ServerError> {
        let request = self.request(
            reqwest::Method::DELETE,
            self.config.session_url(session_id, None),
            workspace,
        );
        send(request, "delete session").await?;
        Ok(())
    }

    async fn query_status(
        &self,
        workspace: &Path,
    ) -> Result<HashMap<String, SessionStatus>, ServerError> {
        let request = self.request(
            reqwest::Method::GET,
            self.config.url("session/status"),
            workspace,
        );
        let response = send(request, "session status").await?;
        let value: serde_json::Value = read_json(response, "session status").await?;
        parse_status_map(value)
    }

    async fn subscribe_events(&self, workspace: &Path) -> Result<EventStream, ServerError> {
        let request = self
            .client
            .get(self.config.url("event"))
            .query(&[("directory", workspace.to_string_lossy())])
            .header(reqwest::header::ACCEPT, "text/event-stream");
        let response = send(request, "event feed").await?;
        Ok(Box::pin(event_stream(Box::pin(response.bytes_stream()))))
    }

    async fn stop(&self) {
        let Some(mut child) = self.process.lock().await.take() else {
            return;
        };
        if let Err(err) = child.start_kill() {
            warn!(error = %err, "failed to signal opencode server");
        }
        match tokio::time::timeout(CHILD_EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => info!(%status, "opencode server exited"),
            Ok(Err(err)) => warn!(error = %err, "failed to reap opencode server"),
            Err(_) => warn!("opencode server did not exit in time"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_body_is_single_text_part() {
        let body = prompt_body("Task: do it");
        assert_eq!(
            body,
            serde_json::json!({"parts": [{"type": "text", "text": "Task: do it"}]})
        );
    }

    #[test]
    fn rejects_empty_base_url() {
        let err = OpenCodeServer::new(OpenCodeClientConfig::new("  "))
            .err()
            .expect("should fail");
        assert!(matches!(err, SupervisorError::Config(_)));
    }

    #[tokio::test]
    async fn stop_without_process_is_a_noop_and_repeatable() {
        let server = OpenCodeServer::new(OpenCodeClientConfig::new("http://127.0.0.1:4096"))
            .expect("server");
        server.stop().await;
        server.stop().await;
        assert_eq!(server.url(), "http://127.0.0.1:4096");
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let server = OpenCodeServer::new(
            OpenCodeClientConfig::new("http://127.0.0.1:9").timeout(Duration::from_secs(2)),
        )
        .expect("server");
        let err = server
            .query_status(Path::new("/tmp/ws"))
            .await
            .expect_err("nothing listens on the discard port");
        assert!(matches!(err, ServerError::Transport { .. }));
    }
}
