//! Configuration, paths and logging for the play ledger.
//!
//! The configuration object is built once at process start and handed to the
//! database and sync crates by reference. Nothing below this crate reads the
//! environment.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    BackendConfig, DatabaseConfig, LedgerConfig, OfflineConfig, PoolSettings, DEFAULT_LOG_LEVEL,
    DEFAULT_PROBE_URL,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level, LogFormat};
pub use paths::Paths;
