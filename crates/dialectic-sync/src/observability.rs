use std::path::PathBuf;

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_LOG_FILE: &str = "dialectic.logs.jsonl";

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Logging settings resolved from the environment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObservabilityConfig {
    pub enabled: bool,
    /// Filter directive overriding `RUST_LOG`.
    pub level: Option<String>,
    /// JSONL output file; console output when unset.
    pub json_log_path: Option<PathBuf>,
}

impl ObservabilityConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup("DIALECTIC_OBSERVABILITY_ENABLED")
            .map(|value| parse_bool_env(&value).unwrap_or(true))
            .unwrap_or(true);
        let level = lookup("DIALECTIC_LOG_LEVEL").filter(|level| !level.trim().is_empty());
        let json_log_path = lookup("DIALECTIC_JSON_LOG_PATH")
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        Self {
            enabled,
            level,
            json_log_path,
        }
    }

    fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        if let Some(level) = &self.level
            && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
        {
            return filter;
        }
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    }
}

/// Installs the global tracing subscriber once per process.
///
/// Environment variables:
/// - `DIALECTIC_OBSERVABILITY_ENABLED`: optional enable/disable flag (default enabled).
/// - `DIALECTIC_LOG_LEVEL`: optional filter override (`info`, `dialectic_sync=debug`, ...).
/// - `DIALECTIC_JSON_LOG_PATH`: optional JSONL log file. Console output goes to
///   stderr when unset, keeping stdout free for rendered text.
/// - `RUST_LOG`: fallback filter.
pub fn init_observability() {
    INIT.get_or_init(|| install(&ObservabilityConfig::from_env()));
}

fn install(config: &ObservabilityConfig) {
    if !config.enabled {
        return;
    }

    let env_filter = config.env_filter();
    match &config.json_log_path {
        Some(path) => {
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
                .unwrap_or(DEFAULT_LOG_FILE);
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
        }
        None => {
            let console_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn parses_common_boolean_spellings() {
        assert_eq!(parse_bool_env(" Yes "), Some(true));
        assert_eq!(parse_bool_env("disabled"), Some(false));
        assert_eq!(parse_bool_env("maybe"), None);
    }

    #[test]
    fn defaults_to_enabled_console_logging() {
        let config = ObservabilityConfig::from_lookup(lookup(&[]));
        assert!(config.enabled);
        assert_eq!(config.level, None);
        assert_eq!(config.json_log_path, None);
    }

    #[test]
    fn reads_dialectic_variables() {
        let config = ObservabilityConfig::from_lookup(lookup(&[
            ("DIALECTIC_OBSERVABILITY_ENABLED", "off"),
            ("DIALECTIC_LOG_LEVEL", "dialectic_sync=debug"),
            ("DIALECTIC_JSON_LOG_PATH", "logs/run.jsonl"),
        ]));
        assert!(!config.enabled);
        assert_eq!(config.level.as_deref(), Some("dialectic_sync=debug"));
        assert_eq!(config.json_log_path, Some(PathBuf::from("logs/run.jsonl")));
    }

    #[test]
    fn unrecognized_flag_keeps_logging_on() {
        let config = ObservabilityConfig::from_lookup(lookup(&[(
            "DIALECTIC_OBSERVABILITY_ENABLED",
            "sometimes",
        )]));
        assert!(config.enabled);
    }
}
