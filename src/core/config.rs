use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::utils::{P2PError, Result};

/// Offset between a peer's TCP port and its default DHT port.
pub const DHT_PORT_OFFSET: u16 = 10_000;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    /// Advertised host. Detected from the outbound interface when unset.
    pub host: Option<String>,
    /// Defaults to `"<host>:<port>"`.
    pub peer_id: Option<String>,
    /// 0 = unbounded.
    pub max_peers: usize,
    pub capability: Option<String>,
    /// Start a DHT directory on this UDP port.
    pub dht_port: Option<u16>,
    /// DHT seed nodes as `host:port`.
    pub bootstrap: Vec<String>,
    pub route_timeout_ms: u64,
    pub accept_timeout_ms: u64,
    /// How long an inbound connection may stay silent before its first frame.
    pub first_frame_timeout_ms: u64,
    /// Cap on concurrently handled inbound connections.
    pub max_connections: usize,
    pub heartbeat_secs: Option<u64>,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 6000,
            host: None,
            peer_id: None,
            max_peers: 10,
            capability: None,
            dht_port: None,
            bootstrap: Vec::new(),
            route_timeout_ms: 5_000,
            accept_timeout_ms: 1_000,
            first_frame_timeout_ms: 10_000,
            max_connections: 64,
            heartbeat_secs: None,
            debug: false,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| P2PError::ConfigError(format!("{}: {}", path.display(), e)))?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| P2PError::ConfigError(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(P2PError::ConfigError(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.accept_timeout_ms == 0 {
            return Err(P2PError::ConfigError(
                "accept_timeout_ms must be positive".to_string(),
            ));
        }
        if self.first_frame_timeout_ms == 0 {
            return Err(P2PError::ConfigError(
                "first_frame_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn route_timeout(&self) -> Duration {
        Duration::from_millis(self.route_timeout_ms)
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }

    pub fn first_frame_timeout(&self) -> Duration {
        Duration::from_millis(self.first_frame_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn dht_port_or_default(&self) -> u16 {
        self.dht_port
            .unwrap_or_else(|| self.port.saturating_add(DHT_PORT_OFFSET))
    }
}
