//! Engine configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.flowgate/` unless
//! `FLOWGATE_DATA_DIR` says otherwise) into [`EngineConfig`]. A missing or
//! malformed file yields the defaults.

use std::path::Path;

use flowgate_types::config::EngineConfig;

/// Load engine configuration from `{data_dir}/config.toml`.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", config_path.display());
            EngineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_types::config::DEFAULT_MAX_CONTEXT_BYTES;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_engine_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.max_context_bytes, DEFAULT_MAX_CONTEXT_BYTES);
        assert_eq!(config.approval_sweep_interval_secs, 60);
        assert!(config.task_endpoint.is_none());
    }

    #[tokio::test]
    async fn load_engine_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
listen = "0.0.0.0:8080"
task_endpoint = "http://agents.internal/invoke"
approval_sweep_interval_secs = 15

[retry]
base_delay_ms = 250
max_delay_ms = 5000
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.listen, "0.0.0.0:8080");
        assert_eq!(config.task_endpoint.as_deref(), Some("http://agents.internal/invoke"));
        assert_eq!(config.approval_sweep_interval_secs, 15);
        assert_eq!(config.retry.base_delay_ms, 250);
        assert_eq!(config.retry.max_delay_ms, 5000);
    }

    #[tokio::test]
    async fn load_engine_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "listen = [not valid")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.listen, "127.0.0.1:3000");
    }
}
