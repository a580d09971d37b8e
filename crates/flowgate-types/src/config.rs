//! Engine configuration for Flowgate.
//!
//! `EngineConfig` represents the `config.toml` in the data directory. Every
//! field has a default so an empty or missing file yields a working engine.

use serde::{Deserialize, Serialize};

use crate::workflow::RetryPolicy;

/// Default cap on the serialized size of an execution context (10 MB).
pub const DEFAULT_MAX_CONTEXT_BYTES: usize = 10 * 1024 * 1024;

/// Top-level configuration for the workflow engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Backoff policy used when a workflow carries none of its own.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Seconds between approval deadline sweeps inside the server (0 disables).
    #[serde(default = "default_sweep_interval")]
    pub approval_sweep_interval_secs: u64,

    /// Upper bound for the serialized execution context.
    #[serde(default = "default_max_context_bytes")]
    pub max_context_bytes: usize,

    /// Capacity of the in-process notification channel (0 is treated as 1).
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Endpoint the HTTP task executor posts agent invocations to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_endpoint: Option<String>,

    /// Optional webhook receiving every notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_webhook: Option<String>,

    /// HTTP listen address for `flowgate serve`.
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_max_context_bytes() -> usize {
    DEFAULT_MAX_CONTEXT_BYTES
}

fn default_event_capacity() -> usize {
    1024
}

fn default_listen() -> String {
    "127.0.0.1:3000".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            approval_sweep_interval_secs: default_sweep_interval(),
            max_context_bytes: default_max_context_bytes(),
            event_capacity: default_event_capacity(),
            task_endpoint: None,
            notification_webhook: None,
            listen: default_listen(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.retry.base_delay_ms, 1_000);
        assert_eq!(config.retry.max_delay_ms, 60_000);
        assert_eq!(config.approval_sweep_interval_secs, 60);
        assert_eq!(config.max_context_bytes, DEFAULT_MAX_CONTEXT_BYTES);
        assert!(config.task_endpoint.is_none());
    }

    #[test]
    fn test_engine_config_deserialize_with_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.event_capacity, 1024);
        assert_eq!(config.listen, "127.0.0.1:3000");
        assert!((config.retry.jitter - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_engine_config_deserialize_with_values() {
        let toml_str = r#"
approval_sweep_interval_secs = 5
task_endpoint = "http://localhost:8080/invoke"
listen = "0.0.0.0:8000"

[retry]
base_delay_ms = 250
max_delay_ms = 4000
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.approval_sweep_interval_secs, 5);
        assert_eq!(config.retry.base_delay_ms, 250);
        assert_eq!(config.retry.max_delay_ms, 4000);
        assert!((config.retry.jitter - 0.1).abs() < f64::EPSILON);
        assert_eq!(
            config.task_endpoint.as_deref(),
            Some("http://localhost:8080/invoke")
        );
        assert_eq!(config.listen, "0.0.0.0:8000");
    }
}
