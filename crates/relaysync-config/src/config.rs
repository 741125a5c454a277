use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, Result};

/// Node id value that asks the node to resolve its identity from the shared identity file.
pub const AUTO_NODE_ID: &str = "AUTO";

/// Prefix of every environment variable read by [`SyncConfig::apply_env_overrides`].
pub const ENV_PREFIX: &str = "RELAYSYNC_";

const CONFIG_FILE_NAME: &str = "relaysync.toml";

/// Replication settings for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Shared folder that carries event and snapshot files between nodes
    pub folder_path: PathBuf,
    /// Logical application name, embedded in snapshot file names
    pub app_name: String,
    /// Explicit node id, or [`AUTO_NODE_ID`] to use the shared identity file
    pub node_id: String,
    /// Identity file shared by every service running on this host
    pub node_id_file: PathBuf,
    /// Directory holding the local entity tables
    pub data_dir: PathBuf,
    /// Delay between two importer polls
    pub poll_interval_secs: u64,
    /// Event files older than this are purged from the shared folder
    pub retention_days: u32,
    /// Whether the startup snapshot import runs at all
    pub import_enabled: bool,
    /// Periodic full snapshot export; disabled when unset
    pub snapshot_export_interval_secs: Option<u64>,
    /// Default tracing filter, used when `RUST_LOG` is not set
    pub log_filter: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            folder_path: PathBuf::from("/app/sync"),
            app_name: "application".to_string(),
            node_id: AUTO_NODE_ID.to_string(),
            node_id_file: PathBuf::from("/app/config/node-id.txt"),
            data_dir: PathBuf::from("/app/data"),
            poll_interval_secs: 5,
            retention_days: 14,
            import_enabled: true,
            snapshot_export_interval_secs: None,
            log_filter: "info".to_string(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from `path`, or from the default location when `path` is `None`,
    /// then apply environment overrides.
    ///
    /// A missing default file is not an error; a missing explicit file is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_config_path() {
                Some(default_path) if default_path.exists() => Self::from_file(&default_path)?,
                _ => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Per-user config location (`<config dir>/relaysync/relaysync.toml`).
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "relaysync").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Apply `RELAYSYNC_*` environment variables.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())
    }

    /// Apply overrides from an arbitrary key lookup. Keys are given without the prefix.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("FOLDER_PATH") {
            self.folder_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("APP_NAME") {
            self.app_name = value;
        }
        if let Some(value) = lookup("NODE_ID") {
            self.node_id = value;
        }
        if let Some(value) = lookup("NODE_ID_FILE") {
            self.node_id_file = PathBuf::from(value);
        }
        if let Some(value) = lookup("DATA_DIR") {
            self.data_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("POLL_INTERVAL_SECS") {
            self.poll_interval_secs = parse_value("POLL_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = lookup("RETENTION_DAYS") {
            self.retention_days = parse_value("RETENTION_DAYS", &value)?;
        }
        if let Some(value) = lookup("IMPORT_ENABLED") {
            self.import_enabled = parse_bool("IMPORT_ENABLED", &value)?;
        }
        if let Some(value) = lookup("SNAPSHOT_EXPORT_INTERVAL_SECS") {
            self.snapshot_export_interval_secs = if value.trim().is_empty() {
                None
            } else {
                Some(parse_value("SNAPSHOT_EXPORT_INTERVAL_SECS", &value)?)
            };
        }
        if let Some(value) = lookup("LOG") {
            self.log_filter = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.folder_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("folder_path must not be empty".into()));
        }
        if self.app_name.trim().is_empty() {
            return Err(ConfigError::Invalid("app_name must not be empty".into()));
        }
        if self.node_id.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "node_id must not be empty (use {:?} to resolve it automatically)",
                AUTO_NODE_ID
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "poll_interval_secs".into(),
                value: "0".into(),
            });
        }
        if self.retention_days == 0 {
            return Err(ConfigError::InvalidValue {
                key: "retention_days".into(),
                value: "0".into(),
            });
        }
        if self.snapshot_export_interval_secs == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "snapshot_export_interval_secs".into(),
                value: "0".into(),
            });
        }
        Ok(())
    }

    /// The explicitly configured node id, or `None` when it must be resolved.
    pub fn configured_node_id(&self) -> Option<&str> {
        let node_id = self.node_id.trim();
        if node_id.is_empty() || node_id.eq_ignore_ascii_case(AUTO_NODE_ID) {
            None
        } else {
            Some(node_id)
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.retention_days) * 24 * 60 * 60)
    }

    pub fn snapshot_export_interval(&self) -> Option<Duration> {
        self.snapshot_export_interval_secs.map(Duration::from_secs)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key: format!("{}{}", ENV_PREFIX, key),
            value: value.to_string(),
        })
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: format!("{}{}", ENV_PREFIX, key),
            value: value.to_string(),
        }),
    }
}
