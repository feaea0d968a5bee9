//! WolfCloud Configuration
//!
//! This module provides configuration structures for manager and wrapper
//! nodes, plus the loader used to re-read connection settings before every
//! reconnect attempt.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main WolfCloud configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfCloudConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// How to reach the manager (client nodes)
    #[serde(default)]
    pub manager: ManagerConfig,

    /// Reconnect policy for the primary connection
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Bootstrap request monitoring
    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Role of this node, fixed for the process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Authoritative node for all list contents
    Manager,
    /// Wrapper node holding read-oriented replicas
    Client,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Manager => write!(f, "MANAGER"),
            NodeRole::Client => write!(f, "CLIENT"),
        }
    }
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier
    pub id: String,

    /// Manager or client
    pub role: NodeRole,

    /// Address the manager listens on for wrapper sessions
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Manager endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Manager address (host:port)
    #[serde(default = "default_manager_address")]
    pub address: String,

    /// Connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Reconnect backoff configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the second attempt in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound for the delay between attempts in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Give up after this many failed attempts (0 = never)
    #[serde(default)]
    pub max_attempts: u32,
}

/// Bootstrap monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Warn when a bootstrap response is outstanding for longer than this
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Settings needed to (re)establish the primary connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Manager address (host:port)
    pub manager_address: String,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Backoff policy
    pub reconnect: ReconnectConfig,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:1630".to_string()
}

fn default_manager_address() -> String {
    "127.0.0.1:1630".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_stale_after_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            address: default_manager_address(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: 0,
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl WolfCloudConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfCloudConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Sample configuration written by `wolfcloud init`
    pub fn sample(node_id: &str, role: NodeRole) -> Self {
        Self {
            node: NodeConfig {
                id: node_id.to_string(),
                role,
                bind_address: default_bind_address(),
            },
            manager: ManagerConfig::default(),
            reconnect: ReconnectConfig::default(),
            bootstrap: BootstrapConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id.is_empty() {
            return Err(crate::Error::Config("node.id cannot be empty".into()));
        }

        match self.node.role {
            NodeRole::Manager if self.node.bind_address.is_empty() => {
                return Err(crate::Error::Config("node.bind_address cannot be empty".into()));
            }
            NodeRole::Client if self.manager.address.is_empty() => {
                return Err(crate::Error::Config("manager.address cannot be empty".into()));
            }
            _ => {}
        }

        if self.reconnect.initial_delay_ms > self.reconnect.max_delay_ms {
            return Err(crate::Error::Config(
                "reconnect.initial_delay_ms cannot exceed reconnect.max_delay_ms".into(),
            ));
        }

        Ok(())
    }

    /// Check whether this node is the manager
    pub fn is_manager(&self) -> bool {
        self.node.role == NodeRole::Manager
    }

    /// Extract the settings for the primary connection
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            manager_address: self.manager.address.clone(),
            connect_timeout: Duration::from_millis(self.manager.connect_timeout_ms),
            reconnect: self.reconnect.clone(),
        }
    }

    /// Get stale bootstrap threshold as Duration
    pub fn bootstrap_stale_after(&self) -> Duration {
        Duration::from_secs(self.bootstrap.stale_after_secs)
    }
}

/// Source of connection settings, consulted fresh before each reconnect
pub trait ConfigLoader: Send + Sync {
    /// Load the current connection configuration
    fn load_connection_config(&self) -> crate::Result<ConnectionConfig>;
}

/// Reads the configuration file from disk on every call, so edits made
/// while the node runs apply to the next reconnect attempt.
pub struct FileConfigLoader {
    path: PathBuf,
}

impl FileConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigLoader for FileConfigLoader {
    fn load_connection_config(&self) -> crate::Result<ConnectionConfig> {
        let config = WolfCloudConfig::from_file(&self.path)?;
        Ok(config.connection_config())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CLIENT_TOML: &str = r#"
[node]
id = "wrapper-1"
role = "client"

[manager]
address = "10.0.0.5:1630"
connect_timeout_ms = 2000

[reconnect]
initial_delay_ms = 100
max_delay_ms = 1000
max_attempts = 5
"#;

    #[test]
    fn test_parse_config() {
        let config = WolfCloudConfig::from_str(CLIENT_TOML).unwrap();
        assert_eq!(config.node.id, "wrapper-1");
        assert_eq!(config.node.role, NodeRole::Client);
        assert!(!config.is_manager());

        let conn = config.connection_config();
        assert_eq!(conn.manager_address, "10.0.0.5:1630");
        assert_eq!(conn.connect_timeout, Duration::from_secs(2));
        assert_eq!(conn.reconnect.max_attempts, 5);
        assert_eq!(config.bootstrap.stale_after_secs, 30);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_manager_defaults() {
        let toml = r#"
[node]
id = "manager"
role = "manager"
"#;
        let config = WolfCloudConfig::from_str(toml).unwrap();
        assert!(config.is_manager());
        assert_eq!(config.node.bind_address, "0.0.0.0:1630");
        assert_eq!(config.reconnect, ReconnectConfig::default());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let toml = r#"
[node]
id = ""
role = "client"
"#;
        assert!(WolfCloudConfig::from_str(toml).is_err());

        let toml = r#"
[node]
id = "wrapper-1"
role = "client"

[reconnect]
initial_delay_ms = 5000
max_delay_ms = 100
"#;
        assert!(matches!(
            WolfCloudConfig::from_str(toml),
            Err(crate::Error::Config(_))
        ));

        let toml = r#"
[node]
id = "wrapper-1"
role = "observer"
"#;
        assert!(matches!(
            WolfCloudConfig::from_str(toml),
            Err(crate::Error::ConfigParse(_))
        ));
    }

    #[test]
    fn test_sample_round_trips_through_toml() {
        let sample = WolfCloudConfig::sample("wrapper-7", NodeRole::Client);
        let text = sample.to_toml().unwrap();
        let parsed = WolfCloudConfig::from_str(&text).unwrap();
        assert_eq!(parsed.node.id, "wrapper-7");
        assert_eq!(parsed.connection_config(), sample.connection_config());
    }

    #[test]
    fn test_file_loader_sees_edits() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CLIENT_TOML.as_bytes()).unwrap();
        file.flush().unwrap();

        let loader = FileConfigLoader::new(file.path());
        let first = loader.load_connection_config().unwrap();
        assert_eq!(first.manager_address, "10.0.0.5:1630");

        let edited = CLIENT_TOML.replace("10.0.0.5:1630", "10.0.0.9:1630");
        std::fs::write(file.path(), edited).unwrap();

        let second = loader.load_connection_config().unwrap();
        assert_eq!(second.manager_address, "10.0.0.9:1630");
    }

    #[test]
    fn test_file_loader_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let loader = FileConfigLoader::new(dir.path().join("missing.toml"));
        assert!(matches!(
            loader.load_connection_config(),
            Err(crate::Error::Io(_))
        ));
    }
}
