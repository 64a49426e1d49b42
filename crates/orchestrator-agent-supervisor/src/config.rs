use std::str::FromStr;
use std::time::Duration;

use crate::errors::SupervisorError;
use crate::retry::BackoffPolicy;

/// Whether in-flight tool calls produce progress entries.
///
/// `CompletedOnly` keeps the log to one entry per finished call.
/// `InFlight` adds an `action` entry as soon as a call is pending or running,
/// which makes a UI feel responsive at the cost of a noisier log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ToolVerbosity {
    #[default]
    CompletedOnly,
    InFlight,
}

impl FromStr for ToolVerbosity {
    type Err = SupervisorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "completed" | "completed_only" => Ok(Self::CompletedOnly),
            "in_flight" | "inflight" | "verbose" => Ok(Self::InFlight),
            other => Err(SupervisorError::Config(format!(
                "unknown tool verbosity: {other}"
            ))),
        }
    }
}

/// Normalization knobs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizerOptions {
    pub tool_verbosity: ToolVerbosity,
    /// Characters of post-change content that, with the file path, identify a
    /// change for deduplication.
    pub dedup_prefix_chars: usize,
}

impl Default for NormalizerOptions {
    fn default() -> Self {
        Self {
            tool_verbosity: ToolVerbosity::CompletedOnly,
            dedup_prefix_chars: 100,
        }
    }
}

/// Timing and retry settings for one supervised run.
#[derive(Clone, Debug, PartialEq)]
pub struct SupervisorConfig {
    /// Interval between session status queries.
    pub poll_interval: Duration,
    /// Interval between stop-request checks; independent of `poll_interval`.
    pub stop_check_interval: Duration,
    /// How long the task server may take to come up.
    pub server_startup_timeout: Duration,
    /// How long opening the event feed may take.
    pub feed_connect_timeout: Duration,
    /// Reconnect policy for the event feed.
    pub feed_backoff: BackoffPolicy,
    /// Consecutive status query failures tolerated before giving up.
    pub status_error_ceiling: u32,
    pub normalizer: NormalizerOptions,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            stop_check_interval: Duration::from_secs(1),
            server_startup_timeout: Duration::from_secs(30),
            feed_connect_timeout: Duration::from_secs(10),
            feed_backoff: BackoffPolicy::exponential(5, 1_000, 2.0).with_max_backoff_ms(10_000),
            status_error_ceiling: 3,
            normalizer: NormalizerOptions::default(),
        }
    }
}

impl SupervisorConfig {
    /// Defaults with `ORCHESTRATOR_*` environment overrides applied.
    ///
    /// Environment variables:
    /// - `ORCHESTRATOR_POLL_INTERVAL_MS`
    /// - `ORCHESTRATOR_STOP_CHECK_INTERVAL_MS`
    /// - `ORCHESTRATOR_SERVER_STARTUP_TIMEOUT_MS`
    /// - `ORCHESTRATOR_FEED_CONNECT_TIMEOUT_MS`
    /// - `ORCHESTRATOR_FEED_MAX_RETRIES`
    /// - `ORCHESTRATOR_STATUS_ERROR_CEILING`
    /// - `ORCHESTRATOR_TOOL_VERBOSITY` (`completed` or `in_flight`)
    pub fn from_env() -> Result<Self, SupervisorError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, SupervisorError> {
        let mut config = Self::default();
        if let Some(ms) = parse_var::<u64>(&lookup, "ORCHESTRATOR_POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "ORCHESTRATOR_STOP_CHECK_INTERVAL_MS")? {
            config.stop_check_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "ORCHESTRATOR_SERVER_STARTUP_TIMEOUT_MS")? {
            config.server_startup_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "ORCHESTRATOR_FEED_CONNECT_TIMEOUT_MS")? {
            config.feed_connect_timeout = Duration::from_millis(ms);
        }
        if let Some(retries) = parse_var::<u32>(&lookup, "ORCHESTRATOR_FEED_MAX_RETRIES")? {
            config.feed_backoff.max_retries = retries;
        }
        if let Some(ceiling) = parse_var::<u32>(&lookup, "ORCHESTRATOR_STATUS_ERROR_CEILING")? {
            config.status_error_ceiling = ceiling;
        }
        if let Some(verbosity) = parse_var::<ToolVerbosity>(&lookup, "ORCHESTRATOR_TOOL_VERBOSITY")?
        {
            config.normalizer.tool_verbosity = verbosity;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SupervisorError> {
        if self.poll_interval.is_zero() {
            return Err(SupervisorError::Config(
                "poll_interval must be greater than 0".into(),
            ));
        }
        if self.stop_check_interval.is_zero() {
            return Err(SupervisorError::Config(
                "stop_check_interval must be greater than 0".into(),
            ));
        }
        if self.status_error_ceiling == 0 {
            return Err(SupervisorError::Config(
                "status_error_ceiling must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn stop_check_interval(mut self, interval: Duration) -> Self {
        self.stop_check_interval = interval;
        self
    }

    pub fn server_startup_timeout(mut self, timeout: Duration) -> Self {
        self.server_startup_timeout = timeout;
        self
    }

    pub fn tool_verbosity(mut self, verbosity: ToolVerbosity) -> Self {
        self.normalizer.tool_verbosity = verbosity;
        self
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, SupervisorError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key).filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|e| SupervisorError::Config(format!("invalid {key}={raw}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = SupervisorConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.stop_check_interval, Duration::from_secs(1));
        assert_eq!(config.server_startup_timeout, Duration::from_secs(30));
        assert_eq!(config.feed_backoff.max_retries, 5);
        assert_eq!(config.status_error_ceiling, 3);
        assert_eq!(config.normalizer.tool_verbosity, ToolVerbosity::CompletedOnly);
    }

    #[test]
    fn env_overrides_are_applied() {
        let config = SupervisorConfig::from_lookup(lookup(&[
            ("ORCHESTRATOR_POLL_INTERVAL_MS", "3000"),
            ("ORCHESTRATOR_FEED_MAX_RETRIES", "7"),
            ("ORCHESTRATOR_TOOL_VERBOSITY", "in_flight"),
        ]))
        .expect("config");
        assert_eq!(config.poll_interval, Duration::from_millis(3000));
        assert_eq!(config.feed_backoff.max_retries, 7);
        assert_eq!(config.normalizer.tool_verbosity, ToolVerbosity::InFlight);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let err = SupervisorConfig::from_lookup(lookup(&[(
            "ORCHESTRATOR_POLL_INTERVAL_MS",
            "soon",
        )]))
        .expect_err("should fail");
        assert!(matches!(
            err,
            SupervisorError::Config(msg) if msg.contains("ORCHESTRATOR_POLL_INTERVAL_MS")
        ));

        let err = SupervisorConfig::from_lookup(lookup(&[(
            "ORCHESTRATOR_STATUS_ERROR_CEILING",
            "0",
        )]))
        .expect_err("zero ceiling");
        assert!(matches!(err, SupervisorError::Config(_)));
    }
}
