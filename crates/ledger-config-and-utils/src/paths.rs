//! File system locations used by the ledger.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Directory name created under the user's home directory.
const BASE_DIR_NAME: &str = ".play-ledger";
/// Embedded database filename.
const DATABASE_FILE_NAME: &str = "play_ledger.sqlite";
/// Offline buffer document filename.
const OFFLINE_BUFFER_FILE_NAME: &str = "offline_buffer.json";

/// Resolves the ledger's on-disk locations.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory (~/.play-ledger)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.play-ledger`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(BASE_DIR_NAME),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory.
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (`<base>/config.json`).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the embedded database file path.
    pub fn database_file(&self) -> PathBuf {
        self.base_dir.join(DATABASE_FILE_NAME)
    }

    /// Get the offline buffer document path.
    pub fn offline_buffer_file(&self) -> PathBuf {
        self.base_dir.join(OFFLINE_BUFFER_FILE_NAME)
    }

    /// Get the logs directory.
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
