//! Static configuration that cannot be changed at runtime.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Static configuration that cannot be changed at runtime
#[derive(Debug, Clone, Deserialize)]
pub struct StaticConfig {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    #[serde(default)]
    pub sweeper: SweeperConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub heartbeats: HeartbeatConfig,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            storage: default_storage(),
            sweeper: SweeperConfig::default(),
            limits: LimitsConfig::default(),
            heartbeats: HeartbeatConfig::default(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Holds the metadata database and the `blobs/` object tree.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("kbflow.db")
    }

    pub fn blob_root(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }
}

/// Progress sweeper timing
#[derive(Debug, Clone, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,

    /// How long shutdown waits for an in-flight tick.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval_secs(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

/// Size and naming limits
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_document_size")]
    pub max_document_size_bytes: u64,

    /// Knowledge base names must be strictly shorter than this.
    #[serde(default = "default_kb_name_limit")]
    pub kb_name_limit: usize,

    /// Documents a tenant may hold across its knowledge bases; 0 is unlimited.
    #[serde(default)]
    pub max_documents_per_tenant: i64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_document_size_bytes: default_max_document_size(),
            kb_name_limit: default_kb_name_limit(),
            max_documents_per_tenant: 0,
        }
    }
}

/// Executor heartbeat reporting
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    /// Trailing window of heartbeats included in status reports.
    #[serde(default = "default_heartbeat_window_secs")]
    pub window_secs: i64,
}

impl HeartbeatConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            window_secs: default_heartbeat_window_secs(),
        }
    }
}

// ==================== Default Value Functions ====================

pub(crate) fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
    }
}

pub(crate) fn default_host() -> String {
    "0.0.0.0".to_string()
}

pub(crate) fn default_port() -> u16 {
    9380
}

pub(crate) fn default_storage() -> StorageConfig {
    StorageConfig {
        data_dir: default_data_dir(),
    }
}

pub(crate) fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_sweep_interval_secs() -> u64 {
    6
}

fn default_shutdown_grace_ms() -> u64 {
    1000
}

fn default_max_document_size() -> u64 {
    128 * 1024 * 1024
}

fn default_kb_name_limit() -> usize {
    128
}

fn default_heartbeat_window_secs() -> i64 {
    30 * 60
}
