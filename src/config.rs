use crate::mac::MacAddress;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Complete configuration for one backend invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Telemetry sources
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Topology reduction settings
    #[serde(default)]
    pub topology: TopologyConfig,

    /// Generated files
    #[serde(default)]
    pub output: OutputConfig,

    /// Time-series recording
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Mesh interfaces to query, one routing domain each
    #[serde(default = "default_mesh_interfaces")]
    pub mesh_interfaces: Vec<String>,

    /// A.L.F.R.E.D. request type carrying node-info; statistics are
    /// expected on the following type
    #[serde(default = "default_alfred_request_type")]
    pub alfred_request_type: u16,

    /// Static alias files, applied after the live sources
    #[serde(default)]
    pub alias_files: Vec<PathBuf>,

    /// Treat nodes seen by the live node-info source as online
    #[serde(default = "default_assume_online")]
    pub assume_online: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Interfaces assumed to be tunnel endpoints
    #[serde(default)]
    pub vpn_addresses: Vec<MacAddress>,

    /// Forget nodes offline for at least this many days
    #[serde(default)]
    pub prune_days: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Destination directory for generated files
    #[serde(default = "default_destination_dir")]
    pub destination_dir: PathBuf,

    /// Also write a bat-hosts style name table
    #[serde(default)]
    pub bat_hosts: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Record per-cycle aggregates and per-node samples
    #[serde(default = "default_history_enabled")]
    pub enabled: bool,

    /// Path to the SQLite history database
    #[serde(default = "default_history_path")]
    pub path: PathBuf,

    /// Connection pool size
    #[serde(default = "default_history_pool_size")]
    pub pool_size: u32,

    /// Retention period for recorded samples (days)
    #[serde(default = "default_history_retention_days")]
    pub retention_days: u32,

    /// Enable WAL mode
    #[serde(default = "default_enable_wal")]
    pub enable_wal: bool,
}

// Default value functions
fn default_mesh_interfaces() -> Vec<String> {
    vec!["bat0".to_string()]
}

fn default_alfred_request_type() -> u16 {
    158
}

fn default_assume_online() -> bool {
    true
}

fn default_destination_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_history_enabled() -> bool {
    true
}

fn default_history_path() -> PathBuf {
    PathBuf::from("history.db")
}

fn default_history_pool_size() -> u32 {
    4
}

fn default_history_retention_days() -> u32 {
    365
}

fn default_enable_wal() -> bool {
    true
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            mesh_interfaces: default_mesh_interfaces(),
            alfred_request_type: default_alfred_request_type(),
            alias_files: Vec::new(),
            assume_online: default_assume_online(),
        }
    }
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self { vpn_addresses: Vec::new(), prune_days: None }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { destination_dir: default_destination_dir(), bat_hosts: false }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: default_history_enabled(),
            path: default_history_path(),
            pool_size: default_history_pool_size(),
            retention_days: default_history_retention_days(),
            enable_wal: default_enable_wal(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            sources: SourcesConfig::default(),
            topology: TopologyConfig::default(),
            output: OutputConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

impl BackendConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: BackendConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.mesh_interfaces.is_empty() {
            return Err(ConfigError::Validation("at least one mesh interface is required".to_string()));
        }

        if self.sources.alfred_request_type == u16::MAX {
            return Err(ConfigError::Validation("alfred_request_type leaves no room for the statistics type".to_string()));
        }

        if self.output.destination_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation("destination_dir cannot be empty".to_string()));
        }

        if self.history.enabled && self.history.pool_size == 0 {
            return Err(ConfigError::Validation("history pool_size must be > 0".to_string()));
        }

        if self.history.enabled && self.history.retention_days == 0 {
            return Err(ConfigError::Validation("history retention_days must be > 0".to_string()));
        }

        if let Some(days) = self.topology.prune_days {
            if days == 0 {
                return Err(ConfigError::Validation("prune_days must be > 0".to_string()));
            }
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: &PathBuf) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Validation(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Create a default configuration file
    pub fn create_default_config_file(path: &PathBuf) -> Result<(), ConfigError> {
        let default = Self::default();
        default.save_to_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BackendConfig::default();
        assert_eq!(config.sources.mesh_interfaces, vec!["bat0".to_string()]);
        assert_eq!(config.sources.alfred_request_type, 158);
        assert!(config.sources.assume_online);
        assert!(config.history.enabled);
        assert_eq!(config.topology.prune_days, None);
    }

    #[test]
    fn test_config_validation() {
        let mut config = BackendConfig::default();
        assert!(config.validate().is_ok());

        config.sources.mesh_interfaces.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = BackendConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: BackendConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized.sources.mesh_interfaces, config.sources.mesh_interfaces);
        assert_eq!(deserialized.history.retention_days, config.history.retention_days);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: BackendConfig = toml::from_str(
            r#"
            [sources]
            mesh_interfaces = ["bat0", "bat1"]

            [topology]
            vpn_addresses = ["02:10:00:00:00:01"]
            prune_days = 14
            "#,
        )
        .unwrap();

        assert_eq!(config.sources.mesh_interfaces.len(), 2);
        assert_eq!(config.sources.alfred_request_type, 158);
        assert_eq!(config.topology.prune_days, Some(14));
        assert_eq!(config.topology.vpn_addresses.len(), 1);
        assert_eq!(config.output.destination_dir, PathBuf::from("data"));
    }
}
