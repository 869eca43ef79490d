//! Pooled backend.
//!
//! A bounded r2d2 pool of SQLite connections in WAL mode. Generated ids come
//! back through `INSERT ... RETURNING id`.

use crate::backend::{apply_pragmas, Backend, BackendKind, ConnectionHandle};
use crate::{DatabaseError, DatabaseResult};
use ledger_config_and_utils::PoolSettings;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, ToSql};
use std::path::PathBuf;
use tracing::{debug, info};

/// Pool statistics for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolState {
    /// Total connections (active + idle).
    pub connections: u32,
    /// Currently idle connections.
    pub idle_connections: u32,
}

/// Backend backed by a bounded connection pool.
pub struct NetworkedBackend {
    pool: Pool<SqliteConnectionManager>,
    location: String,
}

impl NetworkedBackend {
    /// Build the pool for a connection string.
    ///
    /// `sqlite://` prefixes are stripped; what remains is the database file.
    pub fn connect(url: &str, settings: &PoolSettings) -> DatabaseResult<Self> {
        settings
            .validate()
            .map_err(|e| DatabaseError::connection(e.to_string()))?;

        let path = parse_location(url)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let location = path.to_string_lossy().to_string();

        let manager = SqliteConnectionManager::file(&path).with_init(|conn| apply_pragmas(conn));

        let pool = Pool::builder()
            .max_size(settings.max_size)
            .min_idle(settings.min_idle)
            .connection_timeout(settings.connection_timeout())
            .max_lifetime(settings.max_lifetime())
            .build(manager)
            .map_err(|e| DatabaseError::connection(e.to_string()))?;

        info!(
            location = %location,
            max_size = settings.max_size,
            "Database pool created"
        );

        Ok(Self { pool, location })
    }

    /// Get pool statistics for monitoring.
    pub fn pool_state(&self) -> PoolState {
        let state = self.pool.state();
        PoolState {
            connections: state.connections,
            idle_connections: state.idle_connections,
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }
}

fn parse_location(url: &str) -> DatabaseResult<PathBuf> {
    let trimmed = url.trim();
    let path = trimmed.strip_prefix("sqlite://").unwrap_or(trimmed);
    if path.is_empty() {
        return Err(DatabaseError::connection("Empty connection string"));
    }
    Ok(PathBuf::from(path))
}

impl Backend for NetworkedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Networked
    }

    /// Blocks until a connection is free or the pool timeout passes.
    fn acquire(&self) -> DatabaseResult<ConnectionHandle> {
        let conn = self
            .pool
            .get()
            .map_err(|e| DatabaseError::connection(e.to_string()))?;
        debug!(idle = self.pool.state().idle_connections, "Acquired pooled connection");
        Ok(ConnectionHandle::Pooled(conn))
    }

    fn insert_and_get_id(
        &self,
        conn: &Connection,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> DatabaseResult<i64> {
        let returning = format!("{} RETURNING id", sql.trim_end().trim_end_matches(';'));
        let id = conn.query_row(&returning, params, |row| row.get(0))?;
        Ok(id)
    }

    fn describe(&self) -> String {
        let state = self.pool_state();
        format!(
            "networked ({}, {}/{} idle)",
            self.location, state.idle_connections, state.connections
        )
    }
}
