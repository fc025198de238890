// Application configuration
// Debug builds log more verbosely; release builds default to info

use crate::error::ConfigError;
use crate::peer::types::ServerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[cfg(debug_assertions)]
const DEFAULT_LOG_LEVEL: &str = "debug";

#[cfg(not(debug_assertions))]
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Collection holding one document per session id
    pub collection: String,
    pub ice_servers: Vec<ServerConfig>,
    pub track_id: String,
    pub stream_label: String,
    pub reconnect: ReconnectConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            collection: "calls".into(),
            ice_servers: default_ice_servers(),
            track_id: "audio".into(),
            stream_label: "stream1".into(),
            reconnect: ReconnectConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Treat a rejected answer like a remote disconnect
    pub restart_on_negotiation_fault: bool,
    /// Consecutive rejected answers tolerated before giving up on that path
    pub max_negotiation_restarts: u32,
    /// First delay before retrying a restart that could not publish an offer
    pub retry_delay_ms: u64,
    /// Cap for the doubling retry delay
    pub max_retry_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            restart_on_negotiation_fault: true,
            max_negotiation_restarts: 3,
            retry_delay_ms: 500,
            max_retry_delay_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: DEFAULT_LOG_LEVEL.into(),
        }
    }
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw)?;
        validate_ice_servers(&config.ice_servers)?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Path of the session document for `session_id`
    pub fn session_path(&self, session_id: &str) -> String {
        format!("{}/{}", self.collection, session_id)
    }
}

/// Default servers
pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![ServerConfig::stun("default-stun", "stun:stun.l.google.com:19302")]
}

/// Rejects empty URLs and TURN entries without credentials
pub fn validate_ice_servers(servers: &[ServerConfig]) -> Result<(), ConfigError> {
    for server in servers {
        if server.url.is_empty() {
            return Err(ConfigError::InvalidIceServer(format!(
                "server {} has an empty URL",
                server.id
            )));
        }

        if server.is_turn() && (server.username.is_none() || server.credential.is_none()) {
            return Err(ConfigError::InvalidIceServer(format!(
                "TURN server {} requires username and credential",
                server.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.session_path("user-1"), "calls/user-1");
    }

    #[test]
    fn partial_file_overrides_fields() {
        let raw = r#"
            collection = "rooms"

            [[ice_servers]]
            id = "relay"
            type = "turn"
            url = "turn.example.org:3478"
            username = "u"
            credential = "p"

            [reconnect]
            max_negotiation_restarts = 1
        "#;

        let config = Config::from_toml_str(raw).unwrap();
        assert_eq!(config.collection, "rooms");
        assert_eq!(config.ice_servers.len(), 1);
        assert!(config.ice_servers[0].is_turn());
        assert_eq!(config.reconnect.max_negotiation_restarts, 1);
        assert!(config.reconnect.restart_on_negotiation_fault);
        assert_eq!(config.reconnect.retry_delay_ms, 500);
        assert_eq!(config.track_id, "audio");
    }

    #[test]
    fn turn_without_credentials_is_rejected() {
        let raw = r#"
            [[ice_servers]]
            id = "relay"
            type = "turn"
            url = "turn.example.org:3478"
        "#;

        let err = Config::from_toml_str(raw).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidIceServer(_)));
    }

    #[test]
    fn empty_url_is_rejected() {
        let servers = vec![ServerConfig::stun("blank", "")];
        assert!(validate_ice_servers(&servers).is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "stream_label = \"mic\"").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.stream_label, "mic");
    }
}
