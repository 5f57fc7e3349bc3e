//! Connection Configuration
//!
//! Every field has a default; file and caller values are merged over them.
//! [`ConfigPatch`] carries a partial update that is shallow-merged by
//! `ConnectionManager::update_config`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Connection parameters for the manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Base server URL
    #[serde(default = "default_url")]
    pub url: String,

    /// Socket.IO namespace
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Start connecting as soon as the manager is created
    #[serde(default = "default_true")]
    pub auto_connect: bool,

    /// Reconnect automatically after unexpected disconnects
    #[serde(default = "default_true")]
    pub reconnection: bool,

    #[serde(default = "default_reconnection_attempts")]
    pub reconnection_attempts: u32,

    #[serde(default = "default_reconnection_delay")]
    pub reconnection_delay_ms: u64,

    #[serde(default = "default_max_reconnection_delay")]
    pub max_reconnection_delay_ms: u64,

    #[serde(default = "default_grow_factor")]
    pub reconnection_delay_grow_factor: f64,

    /// Connect timeout
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Heartbeat ping interval; 0 disables the heartbeat
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_transports")]
    pub transports: Vec<String>,

    #[serde(default = "default_true")]
    pub upgrade: bool,

    #[serde(default)]
    pub force_new: bool,

    /// Extra handshake query parameters
    #[serde(default)]
    pub query: BTreeMap<String, String>,

    /// Extra namespace auth payload
    #[serde(default)]
    pub auth: Map<String, Value>,

    #[serde(default = "default_true")]
    pub compression: bool,

    /// Emit informational connection logs
    #[serde(default = "default_true")]
    pub enable_logging: bool,

    /// Outbound messages kept while offline; 0 means unbounded
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Log every dispatched event at debug level
    #[serde(default)]
    pub debug: bool,
}

fn default_url() -> String {
    "ws://localhost".to_string()
}

fn default_namespace() -> String {
    "/scan-progress".to_string()
}

fn default_true() -> bool {
    true
}

fn default_reconnection_attempts() -> u32 {
    10
}

fn default_reconnection_delay() -> u64 {
    1000
}

fn default_max_reconnection_delay() -> u64 {
    30_000
}

fn default_grow_factor() -> f64 {
    1.5
}

fn default_timeout() -> u64 {
    10_000
}

fn default_heartbeat_interval() -> u64 {
    30_000
}

fn default_transports() -> Vec<String> {
    vec!["websocket".to_string(), "polling".to_string()]
}

fn default_max_queue_size() -> usize {
    1000
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            namespace: default_namespace(),
            auto_connect: true,
            reconnection: true,
            reconnection_attempts: default_reconnection_attempts(),
            reconnection_delay_ms: default_reconnection_delay(),
            max_reconnection_delay_ms: default_max_reconnection_delay(),
            reconnection_delay_grow_factor: default_grow_factor(),
            timeout_ms: default_timeout(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            transports: default_transports(),
            upgrade: true,
            force_new: false,
            query: BTreeMap::new(),
            auth: Map::new(),
            compression: true,
            enable_logging: true,
            max_queue_size: default_max_queue_size(),
            debug: false,
        }
    }
}

impl ConnectionConfig {
    /// Full connection URL (base URL + namespace)
    pub fn connection_url(&self) -> String {
        format!("{}{}", self.url.trim_end_matches('/'), self.namespace)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// `None` when the heartbeat is disabled
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }

    /// Shallow-merge a partial update; fields left `None` are kept
    pub fn merge(&mut self, patch: ConfigPatch) {
        macro_rules! apply {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = patch.$field {
                    self.$field = value;
                })*
            };
        }

        apply!(
            url,
            namespace,
            auto_connect,
            reconnection,
            reconnection_attempts,
            reconnection_delay_ms,
            max_reconnection_delay_ms,
            reconnection_delay_grow_factor,
            timeout_ms,
            heartbeat_interval_ms,
            transports,
            upgrade,
            force_new,
            query,
            auth,
            compression,
            enable_logging,
            max_queue_size,
            debug,
        );
    }
}

/// Partial configuration update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigPatch {
    pub url: Option<String>,
    pub namespace: Option<String>,
    pub auto_connect: Option<bool>,
    pub reconnection: Option<bool>,
    pub reconnection_attempts: Option<u32>,
    pub reconnection_delay_ms: Option<u64>,
    pub max_reconnection_delay_ms: Option<u64>,
    pub reconnection_delay_grow_factor: Option<f64>,
    pub timeout_ms: Option<u64>,
    pub heartbeat_interval_ms: Option<u64>,
    pub transports: Option<Vec<String>>,
    pub upgrade: Option<bool>,
    pub force_new: Option<bool>,
    pub query: Option<BTreeMap<String, String>>,
    pub auth: Option<Map<String, Value>>,
    pub compression: Option<bool>,
    pub enable_logging: Option<bool>,
    pub max_queue_size: Option<usize>,
    pub debug: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.namespace, "/scan-progress");
        assert!(config.auto_connect);
        assert!(config.reconnection);
        assert_eq!(config.reconnection_attempts, 10);
        assert_eq!(config.reconnection_delay_ms, 1000);
        assert_eq!(config.max_reconnection_delay_ms, 30_000);
        assert_eq!(config.reconnection_delay_grow_factor, 1.5);
        assert_eq!(config.timeout_ms, 10_000);
        assert_eq!(config.heartbeat_interval_ms, 30_000);
        assert_eq!(config.transports, vec!["websocket", "polling"]);
        assert!(config.upgrade);
        assert!(!config.force_new);
        assert!(config.query.is_empty());
        assert!(config.auth.is_empty());
        assert!(config.compression);
        assert!(config.enable_logging);
    }

    #[test]
    fn test_connection_url() {
        let config = ConnectionConfig {
            url: "ws://scanner.local:8000/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.connection_url(), "ws://scanner.local:8000/scan-progress");
    }

    #[test]
    fn test_merge_keeps_unset_fields() {
        let mut config = ConnectionConfig::default();
        config.merge(ConfigPatch {
            namespace: Some("/admin".to_string()),
            reconnection_attempts: Some(3),
            ..Default::default()
        });

        assert_eq!(config.namespace, "/admin");
        assert_eq!(config.reconnection_attempts, 3);
        assert_eq!(config.url, "ws://localhost");
        assert_eq!(config.timeout_ms, 10_000);
    }

    #[test]
    fn test_deserialize_partial_toml() {
        let config: ConnectionConfig = toml::from_str(
            r#"
            url = "wss://scanner.example.com"
            heartbeat_interval_ms = 0

            [query]
            tenant = "acme"
            "#,
        )
        .unwrap();

        assert_eq!(config.url, "wss://scanner.example.com");
        assert_eq!(config.heartbeat_interval(), None);
        assert_eq!(config.query.get("tenant").map(String::as_str), Some("acme"));
        assert_eq!(config.namespace, "/scan-progress");
    }
}
