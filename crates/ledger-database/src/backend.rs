//! Backend abstraction and scoped transactions.
//!
//! A [`ConnectionProvider`] owns one [`Backend`], chosen from configuration
//! when the provider is built. Call sites only ever see [`Tx`].

use crate::pool::NetworkedBackend;
use crate::{DatabaseError, DatabaseResult};
use ledger_config_and_utils::{BackendConfig, DatabaseConfig};
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, ToSql, Transaction};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const CONNECTION_PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA foreign_keys = ON;
    PRAGMA busy_timeout = 5000;
";

/// Apply the pragmas every connection runs with.
pub(crate) fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(CONNECTION_PRAGMAS)
}

/// Which kind of backend a provider is using.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Embedded,
    Networked,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Embedded => "embedded",
            Self::Networked => "networked",
        }
    }
}

/// A connection checked out from a backend.
///
/// Dropping it closes an embedded connection or returns a pooled one.
pub enum ConnectionHandle {
    Owned(Connection),
    Pooled(PooledConnection<SqliteConnectionManager>),
}

impl Deref for ConnectionHandle {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match self {
            Self::Owned(conn) => conn,
            Self::Pooled(conn) => conn,
        }
    }
}

impl DerefMut for ConnectionHandle {
    fn deref_mut(&mut self) -> &mut Connection {
        match self {
            Self::Owned(conn) => conn,
            Self::Pooled(conn) => conn,
        }
    }
}

/// Storage backend.
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Check out a connection.
    fn acquire(&self) -> DatabaseResult<ConnectionHandle>;

    /// Run an `INSERT` and return the generated `id`.
    fn insert_and_get_id(
        &self,
        conn: &Connection,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> DatabaseResult<i64>;

    /// Human-readable description for diagnostics.
    fn describe(&self) -> String;
}

/// Single-file backend that opens a fresh connection for every call.
#[derive(Debug, Clone)]
pub struct EmbeddedBackend {
    path: PathBuf,
}

impl EmbeddedBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Backend for EmbeddedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Embedded
    }

    fn acquire(&self) -> DatabaseResult<ConnectionHandle> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DatabaseError::connection(e.to_string()))?;
            }
        }

        let conn = Connection::open(&self.path)
            .map_err(|e| DatabaseError::connection(e.to_string()))?;
        apply_pragmas(&conn).map_err(|e| DatabaseError::connection(e.to_string()))?;
        Ok(ConnectionHandle::Owned(conn))
    }

    fn insert_and_get_id(
        &self,
        conn: &Connection,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> DatabaseResult<i64> {
        conn.execute(sql, params)?;
        Ok(conn.last_insert_rowid())
    }

    fn describe(&self) -> String {
        format!("embedded ({})", self.path.display())
    }
}

/// A transaction scope handed to [`ConnectionProvider::with_connection`].
pub struct Tx<'a> {
    tx: Transaction<'a>,
    backend: &'a dyn Backend,
}

impl Tx<'_> {
    /// Run an `INSERT` inside this transaction and return the generated `id`.
    pub fn insert_and_get_id(&self, sql: &str, params: &[&dyn ToSql]) -> DatabaseResult<i64> {
        self.backend.insert_and_get_id(&self.tx, sql, params)
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }
}

impl Deref for Tx<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.tx
    }
}

/// Hands out transaction scopes over the configured backend.
pub struct ConnectionProvider {
    backend: Box<dyn Backend>,
}

impl ConnectionProvider {
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Select and build the backend named in `config`.
    pub fn from_config(config: &DatabaseConfig) -> DatabaseResult<Self> {
        let backend: Box<dyn Backend> = match &config.backend {
            BackendConfig::Embedded { path } => Box::new(EmbeddedBackend::new(path.clone())),
            BackendConfig::Networked { url, pool } => {
                Box::new(NetworkedBackend::connect(url, pool)?)
            }
        };
        debug!(backend = %backend.describe(), "Connection provider ready");
        Ok(Self::new(backend))
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    /// Run `f` inside a transaction.
    ///
    /// Commits when `f` returns `Ok` and rolls back when it returns `Err`.
    /// The connection is released either way.
    pub fn with_connection<T, F>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&Tx<'_>) -> DatabaseResult<T>,
    {
        let mut handle = self.backend.acquire()?;
        let tx = handle.transaction()?;
        let scope = Tx {
            tx,
            backend: self.backend.as_ref(),
        };

        match f(&scope) {
            Ok(value) => {
                scope.tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = scope.tx.rollback() {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Acquire a connection and run `SELECT 1`.
    pub fn health_check(&self) -> DatabaseResult<()> {
        self.with_connection(|tx| {
            tx.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })?;
        debug!("Database health check passed");
        Ok(())
    }
}
