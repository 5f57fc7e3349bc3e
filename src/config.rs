//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::connection::{AuthData, ConnectionConfig};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Credentials attached to every handshake
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    pub token: Option<String>,
    pub user_id: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("scanwire").join("config.toml")),
            Some(PathBuf::from("/etc/scanwire/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Handshake credentials, if a token or user id is configured
    pub fn auth_data(&self) -> Option<AuthData> {
        if self.auth.token.is_none() && self.auth.user_id.is_none() {
            return None;
        }
        Some(AuthData {
            token: self.auth.token.clone(),
            user_id: self.auth.user_id.clone(),
            ..Default::default()
        })
    }

    /// Apply `SCANWIRE_*` environment variable overrides
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Connection overrides
        if let Some(url) = lookup("SCANWIRE_URL") {
            self.connection.url = url;
        }
        if let Some(namespace) = lookup("SCANWIRE_NAMESPACE") {
            self.connection.namespace = namespace;
        }

        // Auth overrides
        if let Some(token) = lookup("SCANWIRE_AUTH_TOKEN") {
            self.auth.token = Some(token);
        }

        // Logging overrides
        if let Some(level) = lookup("SCANWIRE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("SCANWIRE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# ScanWire Configuration
#
# Environment variables override these settings:
# - SCANWIRE_URL
# - SCANWIRE_NAMESPACE
# - SCANWIRE_AUTH_TOKEN
# - SCANWIRE_LOG_LEVEL
# - SCANWIRE_LOG_FORMAT

[connection]
# Scan-progress server base URL
url = "ws://localhost"

# Socket.IO namespace
namespace = "/scan-progress"

# Connect as soon as the client starts
auto_connect = true

# Reconnect automatically after unexpected disconnects
reconnection = true
reconnection_attempts = 10

# Backoff: delay = min(reconnection_delay_ms * grow_factor ^ attempt, max)
reconnection_delay_ms = 1000
max_reconnection_delay_ms = 30000
reconnection_delay_grow_factor = 1.5

# Connect timeout (ms)
timeout_ms = 10000

# Heartbeat ping interval (ms), 0 disables it
heartbeat_interval_ms = 30000

transports = ["websocket", "polling"]
upgrade = true
force_new = false
compression = true

# Informational connection logs
enable_logging = true

# Messages kept while offline, 0 means unbounded
max_queue_size = 1000

# Log every dispatched event at debug level
debug = false

# Extra handshake query parameters
[connection.query]
# tenant = "acme"

[auth]
# Token attached to the handshake as auth_token
# token = ""
# user_id = ""

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_template_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.connection, ConnectionConfig::default());
        assert!(config.auth.token.is_none());
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[connection]
url = "wss://scans.example.com"
reconnection_attempts = 3

[connection.query]
tenant = "acme"

[auth]
token = "abc"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.connection.url, "wss://scans.example.com");
        assert_eq!(config.connection.reconnection_attempts, 3);
        assert_eq!(config.connection.namespace, "/scan-progress");
        assert_eq!(config.connection.query["tenant"], "acme");
        assert_eq!(config.auth_data().unwrap().token.as_deref(), Some("abc"));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(Config::load(&missing), Err(ConfigError::Io { .. })));

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[connection\nurl = ").unwrap();
        let err = Config::load(&broken).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().starts_with("Failed to parse config file"));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SCANWIRE_URL", "ws://10.0.0.5:8000"),
            ("SCANWIRE_AUTH_TOKEN", "from-env"),
            ("SCANWIRE_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.connection.url, "ws://10.0.0.5:8000");
        assert_eq!(config.connection.namespace, "/scan-progress");
        assert_eq!(config.auth.token.as_deref(), Some("from-env"));
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_no_auth_configured() {
        assert!(Config::default().auth_data().is_none());
    }
}
