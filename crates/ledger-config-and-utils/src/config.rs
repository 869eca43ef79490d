//! Strongly typed ledger configuration.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default URL used to confirm that the network is reachable.
pub const DEFAULT_PROBE_URL: &str = "https://httpbin.org/status/200";

/// Default reachability probe timeout in seconds.
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Top-level configuration, constructed once and passed down by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Storage backend and encryption settings.
    pub database: DatabaseConfig,
    /// Offline buffer and reachability settings.
    pub offline: OfflineConfig,
}

/// Storage settings consumed by the database crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: BackendConfig,
    /// Encrypt store and machine names at rest.
    #[serde(default = "default_true")]
    pub encryption_enabled: bool,
}

/// Backend selection. Chosen once, when the connection provider is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Single-file in-process store, one connection per call.
    Embedded { path: PathBuf },
    /// Pooled store reached through a connection string.
    Networked {
        url: String,
        #[serde(default)]
        pool: PoolSettings,
    },
}

/// Connection pool bounds for the networked backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Maximum connections in the pool.
    pub max_size: u32,
    /// Minimum idle connections to maintain.
    pub min_idle: Option<u32>,
    /// Connection acquisition timeout.
    pub connection_timeout_secs: u64,
    /// Connections older than this are recycled.
    pub max_lifetime_secs: Option<u64>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 10,
            min_idle: Some(1),
            connection_timeout_secs: 30,
            max_lifetime_secs: Some(3600),
        }
    }
}

impl PoolSettings {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn max_lifetime(&self) -> Option<Duration> {
        self.max_lifetime_secs.map(Duration::from_secs)
    }

    /// Reject bounds the pool cannot honor.
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_size == 0 {
            return Err(CoreError::Config(
                "pool max_size must be at least 1".to_string(),
            ));
        }
        if let Some(min_idle) = self.min_idle {
            if min_idle > self.max_size {
                return Err(CoreError::Config(format!(
                    "pool min_idle ({}) exceeds max_size ({})",
                    min_idle, self.max_size
                )));
            }
        }
        if self.connection_timeout_secs == 0 {
            return Err(CoreError::Config(
                "pool connection_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Offline buffer location and reachability probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineConfig {
    /// Local document holding unsynced sessions.
    pub buffer_path: PathBuf,
    /// URL requested to decide whether the remote store is reachable.
    #[serde(default = "default_probe_url")]
    pub probe_url: String,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

impl OfflineConfig {
    /// Get the probe URL as a parsed URL.
    pub fn probe_url(&self) -> CoreResult<Url> {
        Url::parse(&self.probe_url).map_err(CoreError::from)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_probe_url() -> String {
    DEFAULT_PROBE_URL.to_string()
}

fn default_probe_timeout_secs() -> u64 {
    DEFAULT_PROBE_TIMEOUT_SECS
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let paths =
            Paths::new().unwrap_or_else(|_| Paths::with_base_dir(PathBuf::from(".play-ledger")));
        Self::with_paths(&paths)
    }
}

impl LedgerConfig {
    /// Defaults rooted at the given paths: embedded store, encryption on.
    pub fn with_paths(paths: &Paths) -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            database: DatabaseConfig {
                backend: BackendConfig::Embedded {
                    path: paths.database_file(),
                },
                encryption_enabled: true,
            },
            offline: OfflineConfig {
                buffer_path: paths.offline_buffer_file(),
                probe_url: DEFAULT_PROBE_URL.to_string(),
                probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            },
        }
    }

    /// Load configuration from `paths.config_file()`, falling back to defaults.
    ///
    /// `LEDGER_LOG_LEVEL` may override the log level; nothing else is read
    /// from the environment.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::with_paths(paths)
        };

        if let Ok(log_level) = std::env::var("LEDGER_LOG_LEVEL") {
            config.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: LedgerConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to `paths.config_file()`.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> CoreResult<()> {
        match &self.database.backend {
            BackendConfig::Embedded { path } => {
                if path.as_os_str().is_empty() {
                    return Err(CoreError::Config(
                        "embedded backend requires a database path".to_string(),
                    ));
                }
            }
            BackendConfig::Networked { url, pool } => {
                if url.trim().is_empty() {
                    return Err(CoreError::Config(
                        "networked backend requires a connection string".to_string(),
                    ));
                }
                pool.validate()?;
            }
        }
        self.offline.probe_url()?;
        Ok(())
    }
}
