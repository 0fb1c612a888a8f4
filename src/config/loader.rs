// Configuration loader
// Loads ~/.matrix/config.toml (or $MATRIX_HOME/config.toml), then applies
// environment overrides.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use super::settings::{CacheConfig, HubConfig, MatrixConfig, RuntimeConfig};

/// Load configuration from the Matrix home directory and the environment
pub fn load_config() -> Result<MatrixConfig> {
    let env: HashMap<String, String> = std::env::vars()
        .filter(|(key, _)| key.starts_with("MATRIX_"))
        .collect();
    let home = match env.get("MATRIX_HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home),
        _ => dirs::home_dir()
            .context("Could not determine home directory")?
            .join(".matrix"),
    };
    load_config_from(home, &env)
}

/// Load configuration rooted at `home`, with `env` as the override source
pub fn load_config_from(home: PathBuf, env: &HashMap<String, String>) -> Result<MatrixConfig> {
    let mut config = MatrixConfig::new(home);

    let config_path = config.config_path();
    if config_path.exists() {
        let contents = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        #[derive(serde::Deserialize, Default)]
        #[serde(default)]
        struct TomlConfig {
            hub: HubConfig,
            runtime: RuntimeConfig,
            cache: CacheConfig,
        }

        let toml_config: TomlConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;
        config.hub = toml_config.hub;
        config.runtime = toml_config.runtime;
        config.cache = toml_config.cache;
        tracing::debug!(path = %config_path.display(), "Loaded config file");
    }

    if let Some(base) = non_empty(env, "MATRIX_HUB_BASE") {
        config.hub.base_url = base;
    }
    if let Some(token) = non_empty(env, "MATRIX_HUB_TOKEN") {
        config.hub.token = Some(token);
    }
    if let Some(local) = non_empty(env, "MATRIX_LOCAL_HUB") {
        config.hub.local_url = local;
    }
    if let Some(host) = non_empty(env, "MATRIX_PS_HOST") {
        config.runtime.host = host;
    }

    if config.cache.negative_ttl_seconds >= config.cache.ttl_seconds {
        let clamped = config.cache.ttl_seconds / 2;
        tracing::warn!(
            negative_ttl = config.cache.negative_ttl_seconds,
            ttl = config.cache.ttl_seconds,
            clamped,
            "Negative cache TTL must be shorter than the positive TTL; clamping"
        );
        config.cache.negative_ttl_seconds = clamped;
    }

    Ok(config)
}

fn non_empty(env: &HashMap<String, String>, key: &str) -> Option<String> {
    env.get(key).filter(|v| !v.trim().is_empty()).cloned()
}
