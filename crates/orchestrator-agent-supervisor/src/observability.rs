use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_JSON_LOG_FILE: &str = "agent-supervisor.logs.jsonl";

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn observability_enabled(lookup: impl Fn(&str) -> Option<String>) -> bool {
    ["ORCHESTRATOR_OBSERVABILITY_ENABLED", "ORCHESTRATOR_OBSERVABILITY"]
        .into_iter()
        .find_map(|key| lookup(key))
        .map(|value| parse_bool(&value).unwrap_or(true))
        .unwrap_or(true)
}

fn resolve_env_filter() -> tracing_subscriber::EnvFilter {
    if let Ok(level) = std::env::var("ORCHESTRATOR_LOG_LEVEL")
        && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
    {
        return filter;
    }
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

/// Installs the process-wide tracing subscriber. Later calls are no-ops.
///
/// Environment variables:
/// - `ORCHESTRATOR_OBSERVABILITY_ENABLED` / `ORCHESTRATOR_OBSERVABILITY`: enable flag (default on).
/// - `ORCHESTRATOR_LOG_LEVEL`: filter override (`info`, `orchestrator_agent_supervisor=debug`, ...).
/// - `RUST_LOG`: fallback filter.
/// - `ORCHESTRATOR_JSON_LOG_PATH`: write JSON lines to this file instead of
///   compact console output on stderr.
pub fn init_observability() {
    INIT.get_or_init(|| {
        if !observability_enabled(|key| std::env::var(key).ok()) {
            return;
        }

        let env_filter = resolve_env_filter();
        if let Ok(path_raw) = std::env::var("ORCHESTRATOR_JSON_LOG_PATH") {
            let path = std::path::PathBuf::from(path_raw);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                let _ = std::fs::create_dir_all(parent);
            }
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(DEFAULT_JSON_LOG_FILE);
            let writer = tracing_appender::rolling::never(dir, file_name);
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_target(false)
                .with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer)
                .try_init();
        } else {
            // stdout is left to the CLI's result line.
            let console_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enable_flag_defaults_on_and_accepts_common_spellings() {
        assert!(observability_enabled(|_| None));
        assert!(!observability_enabled(|key| {
            (key == "ORCHESTRATOR_OBSERVABILITY").then(|| "off".to_string())
        }));
        assert!(observability_enabled(|key| {
            (key == "ORCHESTRATOR_OBSERVABILITY_ENABLED").then(|| "maybe".to_string())
        }));
    }

    #[test]
    fn init_is_idempotent() {
        init_observability();
        init_observability();
    }
}
