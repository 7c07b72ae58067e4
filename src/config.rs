//! AdminChain Configuration
//!
//! This module provides configuration structures for a ledger node,
//! either the authoritative server or a read-only follower.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main AdminChain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminChainConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Block propagation server configuration (writer only)
    #[serde(default)]
    pub server: Option<ServerConfig>,

    /// Block sync configuration (followers only)
    #[serde(default)]
    pub sync: Option<SyncConfig>,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node identifier used in logs
    pub id: String,

    /// Directory holding the chain log and the snapshot
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Block propagation server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address followers connect to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// File holding the base64 ed25519 secret key blocks are signed with
    pub signing_key: PathBuf,

    /// Statements executed, in order, when the server starts with an empty
    /// chain. Each one becomes a block.
    #[serde(default)]
    pub genesis: Vec<String>,
}

/// Block sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Address of the authoritative server
    pub server_address: String,

    /// File holding the server's base64 ed25519 public key
    pub server_public_key: PathBuf,

    /// Delay between sync cycles in milliseconds
    #[serde(default = "default_sync_interval_ms")]
    pub interval_ms: u64,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Interval between chain log flushes in milliseconds
    #[serde(default = "default_persist_interval_ms")]
    pub persist_interval_ms: u64,

    /// Chain log file name inside the data directory
    #[serde(default = "default_chain_db_name")]
    pub chain_db_name: String,

    /// Snapshot file name inside the data directory
    #[serde(default = "default_state_db_name")]
    pub state_db_name: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_data_dir() -> PathBuf {
    PathBuf::from("./")
}

fn default_bind_address() -> String {
    "0.0.0.0:8900".to_string()
}

fn default_sync_interval_ms() -> u64 {
    5000
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_request_timeout_ms() -> u64 {
    10000
}

fn default_persist_interval_ms() -> u64 {
    1000
}

fn default_chain_db_name() -> String {
    "blockchain.db".to_string()
}

fn default_state_db_name() -> String {
    "storage.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            persist_interval_ms: default_persist_interval_ms(),
            chain_db_name: default_chain_db_name(),
            state_db_name: default_state_db_name(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl SyncConfig {
    /// Get sync interval as Duration
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl AdminChainConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: AdminChainConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id.is_empty() {
            return Err(crate::Error::Config("node.id cannot be empty".into()));
        }

        if self.storage.persist_interval_ms == 0 {
            return Err(crate::Error::Config("storage.persist_interval_ms must be positive".into()));
        }

        if self.storage.chain_db_name.is_empty() || self.storage.state_db_name.is_empty() {
            return Err(crate::Error::Config("storage file names cannot be empty".into()));
        }

        if self.storage.chain_db_name == self.storage.state_db_name {
            return Err(crate::Error::Config(
                "storage.chain_db_name and storage.state_db_name must differ".into(),
            ));
        }

        if let Some(server) = &self.server {
            if server.bind_address.is_empty() {
                return Err(crate::Error::Config("server.bind_address cannot be empty".into()));
            }
        }

        if let Some(sync) = &self.sync {
            if sync.server_address.is_empty() {
                return Err(crate::Error::Config("sync.server_address cannot be empty".into()));
            }
            if sync.interval_ms == 0 {
                return Err(crate::Error::Config("sync.interval_ms must be positive".into()));
            }
            if sync.connect_timeout_ms == 0 {
                return Err(crate::Error::Config("sync.connect_timeout_ms must be positive".into()));
            }
            if sync.request_timeout_ms == 0 {
                return Err(crate::Error::Config("sync.request_timeout_ms must be positive".into()));
            }
        }

        Ok(())
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &PathBuf {
        &self.node.data_dir
    }

    /// Get persist interval as Duration
    pub fn persist_interval(&self) -> Duration {
        Duration::from_millis(self.storage.persist_interval_ms)
    }

    /// Server section, required for the `serve` role
    pub fn server(&self) -> crate::Result<&ServerConfig> {
        self.server
            .as_ref()
            .ok_or_else(|| crate::Error::Config("missing [server] section".into()))
    }

    /// Sync section, required for the `follow` role
    pub fn sync(&self) -> crate::Result<&SyncConfig> {
        self.sync
            .as_ref()
            .ok_or_else(|| crate::Error::Config("missing [sync] section".into()))
    }
}
