use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::ServerError;
use crate::server::{AgentServer, ServerLauncher};

use super::adapter::OpenCodeServer;
use super::config::{DEFAULT_PORT, OpenCodeClientConfig};

const LISTENING_MARKER: &str = "listening on";

#[derive(Clone, Debug)]
enum Mode {
    Spawn {
        bin: PathBuf,
        hostname: String,
        port: u16,
    },
    Attach {
        url: String,
    },
}

/// Starts `opencode serve` as a child process, or attaches to one already
/// running.
///
/// A spawned server is killed when the returned handle is stopped, or when
/// startup is abandoned (the child is marked `kill_on_drop`).
#[derive(Clone, Debug)]
pub struct OpenCodeLauncher {
    mode: Mode,
    template: OpenCodeClientConfig,
}

impl OpenCodeLauncher {
    /// Spawns `bin serve` on `127.0.0.1` and the default port.
    pub fn spawn(bin: impl Into<PathBuf>) -> Self {
        Self {
            mode: Mode::Spawn {
                bin: bin.into(),
                hostname: "127.0.0.1".to_string(),
                port: DEFAULT_PORT,
            },
            template: OpenCodeClientConfig::new(""),
        }
    }

    /// Uses a server someone else manages; `stop` leaves it running.
    pub fn attach(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            template: OpenCodeClientConfig::new(url.clone()),
            mode: Mode::Attach { url },
        }
    }

    pub fn hostname(mut self, value: impl Into<String>) -> Self {
        if let Mode::Spawn { hostname, .. } = &mut self.mode {
            *hostname = value.into();
        }
        self
    }

    pub fn port(mut self, value: u16) -> Self {
        if let Mode::Spawn { port, .. } = &mut self.mode {
            *port = value;
        }
        self
    }

    /// Request and connect timeouts for the client built on start.
    pub fn client_config(mut self, config: OpenCodeClientConfig) -> Self {
        self.template.timeout = config.timeout;
        self.template.connect_timeout = config.connect_timeout;
        self
    }

    fn client_for(&self, url: &str) -> Result<OpenCodeServer, ServerError> {
        let mut config = self.template.clone();
        config.base_url = url.to_string();
        OpenCodeServer::new(config).map_err(|e| ServerError::transport(e.to_string()))
    }
}

/// Pulls the server URL out of a line like `opencode server listening on http://127.0.0.1:4096`.
pub(crate) fn parse_listening_line(line: &str) -> Option<String> {
    let (_, rest) = line.split_once(LISTENING_MARKER)?;
    let url = rest.split_whitespace().next()?;
    url.starts_with("http").then(|| url.trim_end_matches('/').to_string())
}

#[async_trait::async_trait]
impl ServerLauncher for OpenCodeLauncher {
    async fn start(&self) -> Result<Arc<dyn AgentServer>, ServerError> {
        let (bin, hostname, port) = match &self.mode {
            Mode::Attach { url } => {
                info!(url = %url, "attaching to running opencode server");
                return Ok(Arc::new(self.client_for(url)?));
            }
            Mode::Spawn {
                bin,
                hostname,
                port,
            } => (bin, hostname, port),
        };

        let mut child = Command::new(bin)
            .arg("serve")
            .arg("--hostname")
            .arg(hostname)
            .arg("--port")
            .arg(port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ServerError::transport(format!("failed to spawn {}: {e}", bin.display()))
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ServerError::transport("opencode server stdout not captured"))?;

        let mut lines = BufReader::new(stdout).lines();
        let url = loop {
            let line = lines
                .next_line()
                .await
                .map_err(|e| ServerError::transport(format!("failed to read server output: {e}")))?
                .ok_or_else(|| {
                    ServerError::transport("opencode server exited before it was listening")
                })?;
            debug!(line = %line, "opencode server output");
            if let Some(url) = parse_listening_line(&line) {
                break url;
            }
        };
        info!(url = %url, pid = ?child.id(), "opencode server listening");

        // Keep draining stdout so the child never blocks on a full pipe.
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(line = %line, "opencode server output");
            }
        });

        Ok(Arc::new(self.client_for(&url)?.with_process(child)))
    }
}
