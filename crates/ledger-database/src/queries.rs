//! Standalone query functions over the `sessions` table.
//!
//! These take a plain `&Connection` (or a [`Tx`] when an insert needs the
//! backend's id strategy) and work on values exactly as stored, so names may
//! still be ciphertext. Encryption is layered on top by the record store.

use crate::{DatabaseResult, IntegrityReport, ListOptions, MonthlyAggregate, Session, Tx};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const TIME_FORMAT_SPACE: &str = "%Y-%m-%d %H:%M:%S%.f";

const SESSION_COLUMNS: &str = "id, user_id, date, start_time, end_time, store_name, machine_name,
    initial_investment, final_investment, return_amount, profit, is_completed, created_at, updated_at";

/// Insert a session and return the generated id.
///
/// `store_name` and `machine_name` are passed separately so callers can store
/// ciphertext in place of the session's plaintext names.
pub fn insert_session(
    tx: &Tx<'_>,
    session: &Session,
    store_name: &str,
    machine_name: &str,
) -> DatabaseResult<i64> {
    tx.insert_and_get_id(
        "INSERT INTO sessions (user_id, date, start_time, end_time, store_name, machine_name,
            initial_investment, final_investment, return_amount, profit, is_completed,
            created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            session.user_id,
            format_date(&session.date),
            format_time(&session.start_time),
            session.end_time.as_ref().map(format_time),
            store_name,
            machine_name,
            session.initial_investment,
            session.final_investment,
            session.return_amount,
            session.profit,
            session.is_completed,
            session.created_at.to_rfc3339(),
            session.updated_at.to_rfc3339(),
        ],
    )
}

/// Overwrite every mutable column of a session. Returns the number of rows changed.
pub fn update_session(
    conn: &Connection,
    id: i64,
    session: &Session,
    store_name: &str,
    machine_name: &str,
) -> DatabaseResult<usize> {
    let changed = conn.execute(
        "UPDATE sessions SET
            user_id = ?1, date = ?2, start_time = ?3, end_time = ?4, store_name = ?5,
            machine_name = ?6, initial_investment = ?7, final_investment = ?8,
            return_amount = ?9, profit = ?10, is_completed = ?11, updated_at = ?12
         WHERE id = ?13",
        params![
            session.user_id,
            format_date(&session.date),
            format_time(&session.start_time),
            session.end_time.as_ref().map(format_time),
            store_name,
            machine_name,
            session.initial_investment,
            session.final_investment,
            session.return_amount,
            session.profit,
            session.is_completed,
            session.updated_at.to_rfc3339(),
            id,
        ],
    )?;
    Ok(changed)
}

/// Get a session by id.
pub fn get_session(conn: &Connection, id: i64) -> DatabaseResult<Option<Session>> {
    let sql = format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS);
    let mut stmt = conn.prepare_cached(&sql)?;

    let result = stmt.query_row(params![id], row_to_session);

    match result {
        Ok(session) => Ok(Some(session)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// List a user's sessions, newest first.
pub fn list_sessions(
    conn: &Connection,
    user_id: &str,
    options: &ListOptions,
) -> DatabaseResult<Vec<Session>> {
    let sql = format!(
        "SELECT {} FROM sessions
         WHERE user_id = ?1
           AND (?2 IS NULL OR date >= ?2)
           AND (?3 IS NULL OR date <= ?3)
         ORDER BY date DESC, start_time DESC
         LIMIT ?4 OFFSET ?5",
        SESSION_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;

    let (from, to) = match &options.date_range {
        Some((from, to)) => (Some(format_date(from)), Some(format_date(to))),
        None => (None, None),
    };
    // SQLite treats a negative LIMIT as no limit.
    let limit = options.limit.map(i64::from).unwrap_or(-1);
    let offset = options.offset.map(i64::from).unwrap_or(0);

    let sessions = stmt
        .query_map(params![user_id, from, to, limit, offset], row_to_session)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(sessions)
}

/// Totals for one user and calendar month.
pub fn monthly_aggregate(
    conn: &Connection,
    user_id: &str,
    year: i32,
    month: u32,
) -> DatabaseResult<MonthlyAggregate> {
    let mut stmt = conn.prepare_cached(
        "SELECT
            COUNT(*),
            COUNT(CASE WHEN is_completed = 1 THEN 1 END),
            COALESCE(SUM(CASE WHEN is_completed = 1 THEN final_investment ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN is_completed = 1 THEN return_amount ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN is_completed = 1 THEN profit ELSE 0 END), 0),
            COUNT(CASE WHEN is_completed = 1 AND profit > 0 THEN 1 END),
            AVG(CASE WHEN is_completed = 1 THEN final_investment END),
            AVG(CASE WHEN is_completed = 1 THEN profit END)
         FROM sessions
         WHERE user_id = ?1 AND strftime('%Y-%m', date) = ?2",
    )?;

    let month_key = format!("{:04}-{:02}", year, month);
    let aggregate = stmt.query_row(params![user_id, month_key], |row| {
        let completed_sessions: i64 = row.get(1)?;
        let winning_sessions: i64 = row.get(5)?;
        let win_rate = if completed_sessions > 0 {
            winning_sessions as f64 / completed_sessions as f64 * 100.0
        } else {
            0.0
        };
        Ok(MonthlyAggregate {
            total_sessions: row.get(0)?,
            completed_sessions,
            total_investment: row.get(2)?,
            total_return: row.get(3)?,
            total_profit: row.get(4)?,
            winning_sessions,
            win_rate,
            average_investment: row.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
            average_profit: row.get::<_, Option<f64>>(7)?.unwrap_or(0.0),
        })
    })?;

    Ok(aggregate)
}

/// Count rows that break the completion or profit invariants.
pub fn integrity_report(conn: &Connection) -> DatabaseResult<IntegrityReport> {
    let report = conn.query_row(
        "SELECT
            COUNT(*),
            COUNT(CASE WHEN is_completed = 1
                AND (final_investment IS NULL OR return_amount IS NULL) THEN 1 END),
            COUNT(CASE WHEN is_completed = 1
                AND (profit IS NULL OR profit != return_amount - final_investment) THEN 1 END),
            COUNT(CASE WHEN final_investment < initial_investment THEN 1 END)
         FROM sessions",
        [],
        |row| {
            Ok(IntegrityReport {
                total_records: row.get(0)?,
                incomplete_completed: row.get(1)?,
                profit_mismatch: row.get(2)?,
                invalid_investment: row.get(3)?,
            })
        },
    )?;
    Ok(report)
}

/// Delete a session. Returns the number of rows removed.
pub fn delete_session(conn: &Connection, id: i64) -> DatabaseResult<usize> {
    let deleted = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
    Ok(deleted)
}

pub fn count_for_user(conn: &Connection, user_id: &str) -> DatabaseResult<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM sessions WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// `(total, completed)` row counts across all users.
pub fn count_sessions(conn: &Connection) -> DatabaseResult<(i64, i64)> {
    let counts = conn.query_row(
        "SELECT COUNT(*), COUNT(CASE WHEN is_completed = 1 THEN 1 END) FROM sessions",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(counts)
}

// ==========================================
// Helpers
// ==========================================

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        user_id: row.get(1)?,
        date: parse_date(row, 2)?,
        start_time: parse_time(row, 3)?,
        end_time: match row.get::<_, Option<String>>(4)? {
            Some(_) => Some(parse_time(row, 4)?),
            None => None,
        },
        store_name: row.get(5)?,
        machine_name: row.get(6)?,
        initial_investment: row.get(7)?,
        final_investment: row.get(8)?,
        return_amount: row.get(9)?,
        profit: row.get(10)?,
        is_completed: row.get(11)?,
        created_at: parse_datetime(row, 12)?,
        updated_at: parse_datetime(row, 13)?,
    })
}

fn format_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn format_time(time: &NaiveDateTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

fn conversion_error(idx: usize, e: chrono::ParseError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_date(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let s: String = row.get(idx)?;
    NaiveDate::parse_from_str(&s, DATE_FORMAT).map_err(|e| conversion_error(idx, e))
}

fn parse_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let s: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&s, TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(&s, TIME_FORMAT_SPACE))
        .map_err(|e| conversion_error(idx, e))
}

fn parse_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}
