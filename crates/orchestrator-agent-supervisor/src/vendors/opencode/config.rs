use std::time::Duration;

use crate::errors::SupervisorError;

/// Default port `opencode serve` listens on.
pub const DEFAULT_PORT: u16 = 4096;

/// Configuration for the OpenCode HTTP client.
#[derive(Clone, Debug)]
pub struct OpenCodeClientConfig {
    /// Base URL of a running `opencode serve` instance.
    pub base_url: String,
    /// Timeout for request/response calls. The event feed is exempt, it stays
    /// open for the whole run.
    pub timeout: Duration,
    /// TCP connect timeout, applied to every call including the event feed.
    pub connect_timeout: Duration,
}

impl OpenCodeClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Builds a config from `OPENCODE_SERVER_URL`.
    pub fn from_env() -> Result<Self, SupervisorError> {
        let base_url = std::env::var("OPENCODE_SERVER_URL").unwrap_or_default();
        if base_url.trim().is_empty() {
            return Err(SupervisorError::Config(
                "missing OPENCODE_SERVER_URL for OpenCode client".into(),
            ));
        }
        Ok(Self::new(base_url.trim()))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    pub(crate) fn session_url(&self, session_id: &str, action: Option<&str>) -> String {
        match action {
            Some(action) => self.url(&format!("session/{session_id}/{action}")),
            None => self.url(&format!("session/{session_id}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_join_without_double_slashes() {
        let config = OpenCodeClientConfig::new("http://127.0.0.1:4096/");
        assert_eq!(config.url("/session"), "http://127.0.0.1:4096/session");
        assert_eq!(config.url("event"), "http://127.0.0.1:4096/event");
        assert_eq!(
            config.session_url("ses_1", Some("prompt_async")),
            "http://127.0.0.1:4096/session/ses_1/prompt_async"
        );
        assert_eq!(
            config.session_url("ses_1", None),
            "http://127.0.0.1:4096/session/ses_1"
        );
    }
}
