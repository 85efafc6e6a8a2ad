use std::time::Duration;

use guildgate_models::gateway::MAX_GUILDS_PER_REQUEST;
use serde::{Deserialize, Serialize};

/// Tunables for guild setup, chunking and the event cache.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SetupConfig {
    /// Request the full member list of every guild before exposing it.
    #[serde(default = "default_true")]
    pub chunk_guilds: bool,
    /// Send an op 12 guild sync before member checks (user accounts only).
    #[serde(default)]
    pub require_sync: bool,
    /// Guild ids per chunk/sync request. Clamped to the gateway ceiling of 50.
    #[serde(default = "default_chunk_batch_size")]
    pub chunk_batch_size: usize,
    #[serde(default = "default_chunk_timeout_ms")]
    pub chunk_timeout_ms: u64,
    /// Re-sends before a guild is finished with the members it already has.
    #[serde(default = "default_max_chunk_retries")]
    pub max_chunk_retries: u32,
    /// Sequence distance after which parked events are evicted.
    #[serde(default = "default_event_cache_threshold")]
    pub event_cache_threshold: u64,
    #[serde(default = "default_queued_event_warn_threshold")]
    pub queued_event_warn_threshold: usize,
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            chunk_guilds: true,
            require_sync: false,
            chunk_batch_size: default_chunk_batch_size(),
            chunk_timeout_ms: default_chunk_timeout_ms(),
            max_chunk_retries: default_max_chunk_retries(),
            event_cache_threshold: default_event_cache_threshold(),
            queued_event_warn_threshold: default_queued_event_warn_threshold(),
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

impl SetupConfig {
    pub fn batch_size(&self) -> usize {
        self.chunk_batch_size.clamp(1, MAX_GUILDS_PER_REQUEST)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }

    pub fn eviction_threshold(&self) -> u64 {
        self.event_cache_threshold.max(1)
    }
}

fn default_true() -> bool {
    true
}

fn default_chunk_batch_size() -> usize {
    MAX_GUILDS_PER_REQUEST
}

fn default_chunk_timeout_ms() -> u64 {
    10_000
}

fn default_max_chunk_retries() -> u32 {
    5
}

fn default_event_cache_threshold() -> u64 {
    100
}

fn default_queued_event_warn_threshold() -> usize {
    2_000
}

fn default_event_bus_capacity() -> usize {
    4_096
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_is_clamped_to_gateway_ceiling() {
        let cfg = SetupConfig {
            chunk_batch_size: 500,
            ..SetupConfig::default()
        };
        assert_eq!(cfg.batch_size(), MAX_GUILDS_PER_REQUEST);

        let cfg = SetupConfig {
            chunk_batch_size: 0,
            ..SetupConfig::default()
        };
        assert_eq!(cfg.batch_size(), 1);
    }

    #[test]
    fn partial_table_keeps_defaults() {
        let cfg: SetupConfig = serde_json::from_str(r#"{ "require_sync": true }"#).unwrap();
        assert!(cfg.require_sync);
        assert!(cfg.chunk_guilds);
        assert_eq!(cfg.chunk_timeout_ms, 10_000);
        assert_eq!(cfg.event_cache_threshold, 100);
    }
}
