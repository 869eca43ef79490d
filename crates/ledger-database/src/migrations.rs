//! Schema versioning and migrations.
//!
//! Versions are tracked in the `schema_version` table, one row per applied
//! version. A store without that table is at version 0.

use crate::{DatabaseError, DatabaseResult};
use rusqlite::{params, Connection};
use tracing::{debug, error, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Brings a storage target to [`CURRENT_VERSION`].
pub struct SchemaManager;

impl SchemaManager {
    /// Highest recorded version, or 0 for a fresh store.
    pub fn current_version(conn: &Connection) -> DatabaseResult<i32> {
        let has_table: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version')",
            [],
            |row| row.get(0),
        )?;
        if !has_table {
            return Ok(0);
        }

        let version = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    /// Apply whatever migrations are pending. Safe to call any number of times.
    pub fn initialize_or_migrate(conn: &Connection) -> DatabaseResult<()> {
        let current_version = Self::current_version(conn)?;
        if current_version >= CURRENT_VERSION {
            debug!(current_version, "Schema is current");
            return Ok(());
        }

        info!(
            current_version,
            target_version = CURRENT_VERSION,
            "Running migrations"
        );

        run_ddl(
            conn,
            "schema_version table",
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )?;

        if current_version < 1 {
            migrate_v1_sessions_table(conn)?;
        }
        if current_version < 2 {
            migrate_v2_indexes(conn)?;
        }

        info!("Migrations complete");
        Ok(())
    }

    /// Ledger tables, excluding SQLite internals.
    pub fn table_names(conn: &Connection) -> DatabaseResult<Vec<String>> {
        names_of(conn, "table")
    }

    /// Named indexes, excluding automatic ones.
    pub fn index_names(conn: &Connection) -> DatabaseResult<Vec<String>> {
        names_of(conn, "index")
    }

    /// Drop every ledger table and rebuild the current schema. Deletes all data.
    pub fn reset(conn: &Connection) -> DatabaseResult<()> {
        info!("Resetting database schema");
        run_ddl(
            conn,
            "drop tables",
            "DROP TABLE IF EXISTS sessions;
             DROP TABLE IF EXISTS schema_version;",
        )?;
        Self::initialize_or_migrate(conn)
    }
}

fn names_of(conn: &Connection, kind: &str) -> DatabaseResult<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT name FROM sqlite_master
         WHERE type = ?1 AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let names = stmt
        .query_map(params![kind], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
}

fn run_ddl(conn: &Connection, what: &str, sql: &str) -> DatabaseResult<()> {
    conn.execute_batch(sql).map_err(|e| {
        error!(step = what, error = %e, "Schema change failed");
        DatabaseError::schema(format!("{}: {}", what, e))
    })
}

fn record_migration(conn: &Connection, version: i32) -> DatabaseResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        params![version],
    )
    .map_err(|e| DatabaseError::schema(format!("record version {}: {}", version, e)))?;
    debug!(version, "Migration applied");
    Ok(())
}

/// V1: sessions table with its column constraints.
fn migrate_v1_sessions_table(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v1: sessions table");

    run_ddl(
        conn,
        "sessions table",
        "
        CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL CHECK (length(trim(user_id)) > 0),
            date TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT,
            store_name TEXT NOT NULL CHECK (length(trim(store_name)) > 0),
            machine_name TEXT NOT NULL CHECK (length(trim(machine_name)) > 0),
            initial_investment INTEGER NOT NULL
                CHECK (initial_investment >= 0 AND initial_investment <= 1000000),
            final_investment INTEGER
                CHECK (final_investment IS NULL OR (final_investment >= 0 AND final_investment <= 1000000)),
            return_amount INTEGER
                CHECK (return_amount IS NULL OR (return_amount >= 0 AND return_amount <= 10000000)),
            profit INTEGER,
            is_completed INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,

            CHECK (final_investment IS NULL OR final_investment >= initial_investment),
            CHECK (is_completed = 0 OR (
                end_time IS NOT NULL
                AND final_investment IS NOT NULL
                AND return_amount IS NOT NULL
                AND end_time > start_time
            ))
        );
        ",
    )?;

    record_migration(conn, 1)
}

/// V2: lookup indexes.
fn migrate_v2_indexes(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v2: session indexes");

    run_ddl(
        conn,
        "session indexes",
        "
        CREATE INDEX IF NOT EXISTS idx_sessions_user_date
            ON sessions(user_id, date);
        CREATE INDEX IF NOT EXISTS idx_sessions_user_month
            ON sessions(user_id, strftime('%Y-%m', date));
        CREATE INDEX IF NOT EXISTS idx_sessions_user_completed
            ON sessions(user_id, is_completed);
        CREATE INDEX IF NOT EXISTS idx_sessions_date_desc
            ON sessions(date DESC);
        CREATE INDEX IF NOT EXISTS idx_sessions_user_machine
            ON sessions(user_id, machine_name);
        CREATE INDEX IF NOT EXISTS idx_sessions_user_store
            ON sessions(user_id, store_name);
        CREATE INDEX IF NOT EXISTS idx_sessions_created_at
            ON sessions(created_at);
        ",
    )?;

    record_migration(conn, 2)
}
