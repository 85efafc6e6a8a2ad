use std::fs;
use std::str::FromStr;

use anyhow::{Context, Result};
use guildgate_core::SetupConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub setup: SetupConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is not set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

fn default_log_filter() -> String {
    "guildgate=info".to_string()
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file '{path}'"))?;
            toml::from_str(&content)
                .with_context(|| format!("failed to parse config file '{path}'"))?
        } else {
            tracing::info!("Config file not found at '{}', using defaults", path);
            Config::default()
        };

        // Environment variable overrides
        if let Ok(value) = std::env::var("GUILDGATE_LOG_FILTER") {
            config.logging.filter = value;
        }
        if let Some(json) = env_parse::<bool>("GUILDGATE_LOG_JSON") {
            config.logging.json = json;
        }
        if let Some(chunk) = env_parse::<bool>("GUILDGATE_CHUNK_GUILDS") {
            config.setup.chunk_guilds = chunk;
        }
        if let Some(sync) = env_parse::<bool>("GUILDGATE_REQUIRE_SYNC") {
            config.setup.require_sync = sync;
        }
        if let Some(size) = env_parse::<usize>("GUILDGATE_CHUNK_BATCH_SIZE") {
            config.setup.chunk_batch_size = size;
        }
        if let Some(ms) = env_parse::<u64>("GUILDGATE_CHUNK_TIMEOUT_MS") {
            config.setup.chunk_timeout_ms = ms;
        }
        if let Some(retries) = env_parse::<u32>("GUILDGATE_MAX_CHUNK_RETRIES") {
            config.setup.max_chunk_retries = retries;
        }
        if let Some(threshold) = env_parse::<u64>("GUILDGATE_EVENT_CACHE_THRESHOLD") {
            config.setup.event_cache_threshold = threshold;
        }

        Ok(config)
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("Ignoring invalid {} value '{}'", name, value);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("absent.toml");
        let config =
            Config::load(config_path.to_str().expect("config path utf8")).expect("load config");
        assert!(config.setup.chunk_guilds);
        assert_eq!(config.setup.chunk_batch_size, 50);
        assert_eq!(config.logging.filter, "guildgate=info");
        assert!(!config_path.exists());
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("guildgate.toml");
        std::fs::write(
            &config_path,
            "[setup]\nrequire_sync = true\nchunk_timeout_ms = 2500\n\n[logging]\njson = true\n",
        )
        .expect("write config");

        let config =
            Config::load(config_path.to_str().expect("config path utf8")).expect("load config");
        assert!(config.setup.require_sync);
        assert_eq!(config.setup.chunk_timeout_ms, 2500);
        assert_eq!(config.setup.max_chunk_retries, 5);
        assert!(config.logging.json);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("broken.toml");
        std::fs::write(&config_path, "[setup\nchunk_guilds = ").expect("write config");
        assert!(Config::load(config_path.to_str().expect("config path utf8")).is_err());
    }

    #[test]
    fn env_override_sets_retry_cap() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("guildgate-env.toml");
        std::env::set_var("GUILDGATE_MAX_CHUNK_RETRIES", "2");
        let config =
            Config::load(config_path.to_str().expect("config path utf8")).expect("load config");
        std::env::remove_var("GUILDGATE_MAX_CHUNK_RETRIES");
        assert_eq!(config.setup.max_chunk_retries, 2);
    }
}
