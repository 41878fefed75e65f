use crate::app::reconciler::ReconcilerConfig;
use crate::app::registry::RegistryConfig;
use crate::app::stream::StreamConfig;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration store interface
pub trait ConfigStore: Send + Sync {
    /// Load configuration from storage
    fn load(&self) -> Result<AppConfig>;

    /// Save configuration to storage
    fn save(&self, config: &AppConfig) -> Result<()>;
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub version: u32,
    pub tick_interval_ms: u64,
    pub backend: BackendConfig,
    pub requests: RequestsConfig,
    pub stream: StreamSettings,
    pub status: StatusSettings,
}

/// Where the backend lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    /// Enables delta responses from `/git/status`
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestsConfig {
    pub max_concurrent: usize,
    pub default_timeout_secs: u64,
    pub grace_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub messages_per_tick: usize,
    pub auto_reconnect: bool,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub heartbeat_secs: u64,
    pub close_poll_attempts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusSettings {
    pub poll_interval_secs: u64,
    pub max_files: usize,
    pub full_rebuild_threshold: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: 1,
            tick_interval_ms: 16,
            backend: BackendConfig::default(),
            requests: RequestsConfig::default(),
            stream: StreamSettings::default(),
            status: StatusSettings::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8005,
            client_id: None,
        }
    }
}

impl Default for RequestsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 100,
            default_timeout_secs: 30,
            grace_secs: 5,
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            messages_per_tick: 10,
            auto_reconnect: true,
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 30_000,
            heartbeat_secs: 30,
            close_poll_attempts: 10,
        }
    }
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            max_files: 10_000,
            full_rebuild_threshold: 0.2,
        }
    }
}

impl AppConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.backend.host, self.backend.port)
    }

    pub fn stream_url(&self) -> String {
        format!("ws://{}:{}/ws", self.backend.host, self.backend.port)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.requests.default_timeout_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.status.poll_interval_secs)
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            max_concurrent: self.requests.max_concurrent,
            grace: Duration::from_secs(self.requests.grace_secs),
            ..RegistryConfig::default()
        }
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            url: self.stream_url(),
            messages_per_tick: self.stream.messages_per_tick.max(1),
            auto_reconnect: self.stream.auto_reconnect,
            reconnect_base: Duration::from_millis(self.stream.reconnect_base_ms),
            reconnect_max: Duration::from_millis(self.stream.reconnect_max_ms),
            heartbeat_interval: Duration::from_secs(self.stream.heartbeat_secs),
            close_poll_attempts: self.stream.close_poll_attempts,
        }
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            max_files: self.status.max_files,
            full_rebuild_threshold: self.status.full_rebuild_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_urls_match_backend_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.base_url(), "http://127.0.0.1:8005");
        assert_eq!(config.stream_url(), "ws://127.0.0.1:8005/ws");
    }

    #[test]
    fn test_component_configs_follow_settings() {
        let mut config = AppConfig::default();
        config.requests.max_concurrent = 7;
        config.stream.messages_per_tick = 0;
        config.status.full_rebuild_threshold = 0.5;

        assert_eq!(config.registry_config().max_concurrent, 7);
        assert_eq!(config.stream_config().messages_per_tick, 1);
        assert_eq!(config.reconciler_config().full_rebuild_threshold, 0.5);
    }
}
