//! WebSocket and client registry configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// WebSocket server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Route the upgrade handler is mounted on
    #[serde(default = "default_path")]
    pub path: String,

    /// Outbound frames queued per connection before sends fail
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Maximum message size in bytes (default: 64KB)
    #[serde(default = "default_max_message_size")]
    pub max_message_size_bytes: usize,

    /// Maximum frame size in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size_bytes: usize,

    /// Ping interval in seconds (for keepalive)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
}

impl WebSocketConfig {
    /// Get the ping interval as a Duration
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            channel_capacity: default_channel_capacity(),
            max_message_size_bytes: default_max_message_size(),
            max_frame_size_bytes: default_max_frame_size(),
            ping_interval_secs: default_ping_interval(),
        }
    }
}

/// Client registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Idle time after which a client is evicted
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    /// How often the stale connection reaper runs
    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,

    /// Run the stale connection reaper
    #[serde(default = "default_reaper_enabled")]
    pub reaper_enabled: bool,
}

impl RegistryConfig {
    /// Idle threshold as a Duration
    #[must_use]
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// Reaper interval as a Duration
    #[must_use]
    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after(),
            reap_interval_secs: default_reap_interval(),
            reaper_enabled: default_reaper_enabled(),
        }
    }
}

// Default value functions

fn default_path() -> String {
    "/ws".to_string()
}

const fn default_channel_capacity() -> usize {
    64
}

const fn default_max_message_size() -> usize {
    65536 // 64KB
}

const fn default_max_frame_size() -> usize {
    16384 // 16KB
}

const fn default_ping_interval() -> u64 {
    30
}

const fn default_stale_after() -> u64 {
    600 // 10 minutes
}

const fn default_reap_interval() -> u64 {
    60
}

const fn default_reaper_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_websocket_config() {
        let config = WebSocketConfig::default();
        assert_eq!(config.path, "/ws");
        assert_eq!(config.max_message_size_bytes, 65536);
        assert_eq!(config.ping_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_default_registry_config() {
        let config = RegistryConfig::default();
        assert_eq!(config.stale_after(), Duration::from_secs(600));
        assert_eq!(config.reap_interval(), Duration::from_secs(60));
        assert!(config.reaper_enabled);
    }
}
