//! Validated session storage.
//!
//! [`RecordStore`] is the only writer of session rows. Every mutation is
//! validated before any I/O and runs inside one transaction scope. Store and
//! machine names are encrypted at rest when an encryptor is installed.

use crate::encryption::{FieldEncryptor, FieldMap};
use crate::{
    queries, BackendKind, ConnectionProvider, DatabaseError, DatabaseInfo, DatabaseResult,
    IntegrityReport, ListOptions, MonthlyAggregate, SchemaManager, Session,
};
use chrono::Utc;
use ledger_config_and_utils::DatabaseConfig;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

const STORE_NAME: &str = "store_name";
const MACHINE_NAME: &str = "machine_name";

/// Validated CRUD, listing, aggregates and integrity checks over sessions.
pub struct RecordStore {
    provider: ConnectionProvider,
    encryptor: RwLock<Option<Arc<dyn FieldEncryptor>>>,
}

impl RecordStore {
    /// Build the configured backend and bring its schema up to date.
    ///
    /// `encryptor` is only installed when `config.encryption_enabled` is set.
    pub fn open(
        config: &DatabaseConfig,
        encryptor: Option<Arc<dyn FieldEncryptor>>,
    ) -> DatabaseResult<Self> {
        let provider = ConnectionProvider::from_config(config)?;
        let encryptor = if config.encryption_enabled {
            encryptor
        } else {
            None
        };
        Self::with_provider(provider, encryptor)
    }

    /// Wrap an existing provider, running schema initialization on it.
    pub fn with_provider(
        provider: ConnectionProvider,
        encryptor: Option<Arc<dyn FieldEncryptor>>,
    ) -> DatabaseResult<Self> {
        provider.with_connection(|tx| SchemaManager::initialize_or_migrate(tx))?;
        info!(
            backend = %provider.describe(),
            encrypted = encryptor.is_some(),
            "Record store opened"
        );
        Ok(Self {
            provider,
            encryptor: RwLock::new(encryptor),
        })
    }

    /// Replace the encryptor. Takes effect for the next call.
    pub fn set_encryptor(&self, encryptor: Option<Arc<dyn FieldEncryptor>>) {
        *self.encryptor.write() = encryptor;
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryptor.read().is_some()
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.provider.kind()
    }

    pub fn provider(&self) -> &ConnectionProvider {
        &self.provider
    }

    /// Insert a new session and store the generated id in `session.id`.
    pub fn create(&self, session: &mut Session) -> DatabaseResult<i64> {
        session.validate()?;

        let mut row = session.clone();
        row.profit = row.calculate_profit();
        let (store_name, machine_name) = self.encrypt_names(&row)?;

        let id = self.provider.with_connection(|tx| {
            queries::insert_session(tx, &row, &store_name, &machine_name)
        })?;

        row.id = Some(id);
        *session = row;
        info!(session_id = id, user_id = %session.user_id, "Session created");
        Ok(id)
    }

    /// Overwrite the session stored under `id`.
    ///
    /// `session` is refreshed in place (id, profit, `updated_at`) only when the
    /// write succeeds.
    pub fn update(&self, id: i64, session: &mut Session) -> DatabaseResult<bool> {
        session.validate()?;

        let mut row = session.clone();
        row.id = Some(id);
        row.profit = row.calculate_profit();
        row.updated_at = Utc::now();
        let (store_name, machine_name) = self.encrypt_names(&row)?;

        self.provider.with_connection(|tx| {
            let changed = queries::update_session(tx, id, &row, &store_name, &machine_name)?;
            if changed == 0 {
                return Err(DatabaseError::not_found(format!("session {}", id)));
            }
            Ok(())
        })?;

        *session = row;
        info!(session_id = id, user_id = %session.user_id, "Session updated");
        Ok(true)
    }

    pub fn get(&self, id: i64) -> DatabaseResult<Option<Session>> {
        let session = self
            .provider
            .with_connection(|tx| queries::get_session(tx, id))?;
        Ok(session.map(|s| self.decrypt_names(s)))
    }

    /// A user's sessions ordered by date then start time, newest first.
    pub fn list(&self, user_id: &str, options: &ListOptions) -> DatabaseResult<Vec<Session>> {
        let sessions = self
            .provider
            .with_connection(|tx| queries::list_sessions(tx, user_id, options))?;
        debug!(user_id = %user_id, count = sessions.len(), "Listed sessions");
        Ok(sessions
            .into_iter()
            .map(|s| self.decrypt_names(s))
            .collect())
    }

    /// Totals over a user's sessions in one calendar month.
    pub fn monthly_aggregate(
        &self,
        user_id: &str,
        year: i32,
        month: u32,
    ) -> DatabaseResult<MonthlyAggregate> {
        if !(1..=12).contains(&month) {
            return Err(DatabaseError::validation(
                "month",
                "Month must be between 1 and 12",
            ));
        }
        self.provider
            .with_connection(|tx| queries::monthly_aggregate(tx, user_id, year, month))
    }

    /// Count rows that break the completion or profit invariants. Read-only.
    pub fn check_integrity(&self) -> DatabaseResult<IntegrityReport> {
        let report = self.provider.with_connection(|tx| queries::integrity_report(tx))?;
        if report.has_issues() {
            warn!(
                incomplete_completed = report.incomplete_completed,
                profit_mismatch = report.profit_mismatch,
                invalid_investment = report.invalid_investment,
                "Integrity check found issues"
            );
        }
        Ok(report)
    }

    pub fn delete(&self, id: i64) -> DatabaseResult<bool> {
        self.provider.with_connection(|tx| {
            if queries::delete_session(tx, id)? == 0 {
                return Err(DatabaseError::not_found(format!("session {}", id)));
            }
            Ok(())
        })?;
        info!(session_id = id, "Session deleted");
        Ok(true)
    }

    pub fn count_for_user(&self, user_id: &str) -> DatabaseResult<i64> {
        self.provider
            .with_connection(|tx| queries::count_for_user(tx, user_id))
    }

    pub fn database_info(&self) -> DatabaseResult<DatabaseInfo> {
        let backend = self.provider.describe();
        self.provider.with_connection(|tx| {
            let (total_sessions, completed_sessions) = queries::count_sessions(tx)?;
            Ok(DatabaseInfo {
                schema_version: SchemaManager::current_version(tx)?,
                backend,
                tables: SchemaManager::table_names(tx)?,
                indexes: SchemaManager::index_names(tx)?,
                total_sessions,
                completed_sessions,
            })
        })
    }

    /// Drop and rebuild the schema. Deletes every session.
    pub fn reset(&self) -> DatabaseResult<()> {
        self.provider.with_connection(|tx| SchemaManager::reset(tx))?;
        warn!("Record store reset");
        Ok(())
    }

    fn encryptor(&self) -> Option<Arc<dyn FieldEncryptor>> {
        self.encryptor.read().clone()
    }

    fn encrypt_names(&self, session: &Session) -> DatabaseResult<(String, String)> {
        let Some(encryptor) = self.encryptor() else {
            return Ok((session.store_name.clone(), session.machine_name.clone()));
        };

        let mut fields = FieldMap::new();
        fields.insert(STORE_NAME.to_string(), session.store_name.clone());
        fields.insert(MACHINE_NAME.to_string(), session.machine_name.clone());

        let mut encrypted = encryptor.encrypt_fields(&fields)?;
        let store_name = encrypted
            .remove(STORE_NAME)
            .ok_or_else(|| DatabaseError::encryption("encryptor dropped store_name"))?;
        let machine_name = encrypted
            .remove(MACHINE_NAME)
            .ok_or_else(|| DatabaseError::encryption("encryptor dropped machine_name"))?;
        Ok((store_name, machine_name))
    }

    fn decrypt_names(&self, mut session: Session) -> Session {
        let Some(encryptor) = self.encryptor() else {
            return session;
        };
        let id = session.id;
        session.store_name = decrypt_field(encryptor.as_ref(), id, STORE_NAME, session.store_name);
        session.machine_name =
            decrypt_field(encryptor.as_ref(), id, MACHINE_NAME, session.machine_name);
        session
    }
}

/// Decrypt one stored value, keeping the stored value when decryption fails.
fn decrypt_field(
    encryptor: &dyn FieldEncryptor,
    session_id: Option<i64>,
    field: &str,
    stored: String,
) -> String {
    if !encryptor.looks_encrypted(&stored) {
        return stored;
    }

    let mut fields = FieldMap::new();
    fields.insert(field.to_string(), stored.clone());
    match encryptor.decrypt_fields(&fields) {
        Ok(mut plain) => plain.remove(field).unwrap_or(stored),
        Err(e) => {
            warn!(
                target: "ledger_database::encryption",
                session_id = ?session_id,
                field,
                error = %e,
                "Decryption failed, using stored value"
            );
            stored
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldCipher;
    use chrono::{Duration, Local, NaiveDate};
    use ledger_config_and_utils::{BackendConfig, PoolSettings};
    use std::path::Path;

    fn embedded(dir: &Path, encryption_enabled: bool) -> DatabaseConfig {
        DatabaseConfig {
            backend: BackendConfig::Embedded {
                path: dir.join("store.db"),
            },
            encryption_enabled,
        }
    }

    fn networked(dir: &Path) -> DatabaseConfig {
        DatabaseConfig {
            backend: BackendConfig::Networked {
                url: dir.join("pooled.db").to_string_lossy().to_string(),
                pool: PoolSettings::default(),
            },
            encryption_enabled: true,
        }
    }

    fn yesterday() -> NaiveDate {
        Local::now().date_naive() - Duration::days(1)
    }

    fn open_session(user: &str, initial: i64) -> Session {
        let date = yesterday();
        Session::new(
            user,
            date,
            date.and_hms_opt(10, 0, 0).unwrap(),
            "新宿 Store",
            "Machine (A)",
            initial,
        )
    }

    fn raw_names(store: &RecordStore, id: i64) -> (String, String) {
        store
            .provider()
            .with_connection(|tx| {
                Ok(tx.query_row(
                    "SELECT store_name, machine_name FROM sessions WHERE id = ?1",
                    [id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?)
            })
            .unwrap()
    }

    fn cipher() -> Arc<dyn FieldEncryptor> {
        Arc::new(FieldCipher::generate())
    }

    #[test]
    fn test_round_trip_on_both_backends() {
        let dir = tempfile::tempdir().unwrap();
        for config in [embedded(dir.path(), true), networked(dir.path())] {
            let store = RecordStore::open(&config, Some(cipher())).unwrap();

            let mut session = open_session("u1", 3_000);
            let end = session.start_time + Duration::hours(2);
            session.complete(end, 4_000, 9_000).unwrap();
            let original = session.clone();

            let id = store.create(&mut session).unwrap();
            assert_eq!(session.id, Some(id));

            let loaded = store.get(id).unwrap().unwrap();
            let mut expected = original;
            expected.id = Some(id);
            assert_eq!(loaded, expected);
            assert_eq!(loaded.profit, Some(5_000));
        }
    }

    #[test]
    fn test_names_encrypted_at_rest() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&embedded(dir.path(), true), Some(cipher())).unwrap();

        let mut session = open_session("u1", 100);
        let id = store.create(&mut session).unwrap();

        let (store_name, machine_name) = raw_names(&store, id);
        assert!(store_name.starts_with("enc1:"));
        assert!(machine_name.starts_with("enc1:"));
        assert_eq!(store.get(id).unwrap().unwrap().store_name, "新宿 Store");
    }

    #[test]
    fn test_encryption_disabled_ignores_encryptor() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&embedded(dir.path(), false), Some(cipher())).unwrap();
        assert!(!store.is_encrypted());

        let mut session = open_session("u1", 100);
        let id = store.create(&mut session).unwrap();
        assert_eq!(raw_names(&store, id).0, "新宿 Store");
    }

    #[test]
    fn test_legacy_plaintext_and_swapped_key_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&embedded(dir.path(), true), None).unwrap();

        let mut legacy = open_session("u1", 100);
        let legacy_id = store.create(&mut legacy).unwrap();

        store.set_encryptor(Some(cipher()));
        let mut encrypted = open_session("u1", 200);
        let encrypted_id = store.create(&mut encrypted).unwrap();

        // Plaintext written before encryption was enabled reads back as-is.
        assert_eq!(store.get(legacy_id).unwrap().unwrap().store_name, "新宿 Store");

        // A different key cannot decrypt; the stored value is returned.
        store.set_encryptor(Some(cipher()));
        let loaded = store.get(encrypted_id).unwrap().unwrap();
        assert!(loaded.store_name.starts_with("enc1:"));
    }

    #[test]
    fn test_create_rejects_invalid_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&embedded(dir.path(), false), None).unwrap();

        let mut ok = open_session("u1", 1_000);
        store.create(&mut ok).unwrap();

        let mut bad = open_session("u1", 10_000);
        bad.end_time = Some(bad.start_time + Duration::hours(1));
        bad.final_investment = Some(5_000);
        bad.return_amount = Some(0);
        bad.is_completed = true;

        let err = store.create(&mut bad).unwrap_err();
        match err {
            DatabaseError::Validation(v) => assert_eq!(v.field, "final_investment"),
            other => panic!("expected validation error, got {:?}", other),
        }
        assert!(bad.id.is_none());
        assert_eq!(store.count_for_user("u1").unwrap(), 1);
    }

    #[test]
    fn test_failed_update_leaves_row_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&embedded(dir.path(), true), Some(cipher())).unwrap();

        let mut session = open_session("u1", 1_000);
        let id = store.create(&mut session).unwrap();
        let before = store.get(id).unwrap().unwrap();

        let mut edited = before.clone();
        edited.machine_name = "bad:name".to_string();
        assert!(matches!(
            store.update(id, &mut edited),
            Err(DatabaseError::Validation(_))
        ));

        assert_eq!(store.get(id).unwrap().unwrap(), before);
    }

    #[test]
    fn test_update_refreshes_updated_at() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&embedded(dir.path(), false), None).unwrap();

        let mut session = open_session("u1", 1_000);
        let id = store.create(&mut session).unwrap();
        let created_updated_at = session.updated_at;

        session.store_name = "Other Store".to_string();
        assert!(store.update(id, &mut session).unwrap());
        assert!(session.updated_at >= created_updated_at);

        let loaded = store.get(id).unwrap().unwrap();
        assert_eq!(loaded.store_name, "Other Store");
        assert_eq!(loaded.updated_at, session.updated_at);
        assert_eq!(loaded.created_at, session.created_at);
    }

    #[test]
    fn test_update_and_delete_missing_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&embedded(dir.path(), false), None).unwrap();

        let mut session = open_session("u1", 1_000);
        let err = store.update(99, &mut session).unwrap_err();
        assert_eq!(err.persistence_tag(), Some("not found"));
        assert!(session.id.is_none());

        let err = store.delete(99).unwrap_err();
        assert_eq!(err.persistence_tag(), Some("not found"));
    }

    #[test]
    fn test_delete_removes_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&embedded(dir.path(), false), None).unwrap();

        let mut session = open_session("u1", 1_000);
        let id = store.create(&mut session).unwrap();
        assert!(store.delete(id).unwrap());
        assert!(store.get(id).unwrap().is_none());
    }

    #[test]
    fn test_complete_then_invalid_complete_keeps_profit() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&embedded(dir.path(), true), Some(cipher())).unwrap();

        let mut session = open_session("u1", 10_000);
        let id = store.create(&mut session).unwrap();

        let end = session.start_time + Duration::hours(4);
        session.complete(end, 15_000, 20_000).unwrap();
        store.update(id, &mut session).unwrap();

        let stored = store.get(id).unwrap().unwrap();
        assert!(stored.is_completed);
        assert_eq!(stored.profit, Some(5_000));

        let mut again = stored.clone();
        assert!(again.complete(end, 15_000, -1).is_err());
        again.return_amount = Some(-1);
        assert!(matches!(
            store.update(id, &mut again),
            Err(DatabaseError::Validation(_))
        ));

        assert_eq!(store.get(id).unwrap().unwrap().profit, Some(5_000));
    }

    #[test]
    fn test_monthly_aggregate() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&embedded(dir.path(), false), None).unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let start = date.and_hms_opt(12, 0, 0).unwrap();
        let end = start + Duration::hours(1);

        let mut win = Session::new("u1", date, start, "S", "M", 1_000);
        win.complete(end, 2_000, 5_000).unwrap();
        let mut loss = Session::new("u1", date, start, "S", "M", 1_000);
        loss.complete(end, 4_000, 1_000).unwrap();
        let mut open = Session::new("u1", date, start, "S", "M", 500);
        let mut other_month =
            Session::new("u1", NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(), start, "S", "M", 1);
        let mut other_user = Session::new("u2", date, start, "S", "M", 1);

        for s in [&mut win, &mut loss, &mut open, &mut other_month, &mut other_user] {
            store.create(s).unwrap();
        }

        let agg = store.monthly_aggregate("u1", 2024, 3).unwrap();
        assert_eq!(agg.total_sessions, 3);
        assert_eq!(agg.completed_sessions, 2);
        assert_eq!(agg.total_investment, 6_000);
        assert_eq!(agg.total_return, 6_000);
        assert_eq!(agg.total_profit, 0);
        assert_eq!(agg.winning_sessions, 1);
        assert!((agg.win_rate - 50.0).abs() < f64::EPSILON);
        assert!((agg.average_investment - 3_000.0).abs() < f64::EPSILON);
        assert!(agg.average_profit.abs() < f64::EPSILON);

        let empty = store.monthly_aggregate("u1", 2023, 3).unwrap();
        assert_eq!(empty, MonthlyAggregate::default());

        assert!(matches!(
            store.monthly_aggregate("u1", 2024, 13),
            Err(DatabaseError::Validation(_))
        ));
    }

    #[test]
    fn test_check_integrity_counts_bad_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&embedded(dir.path(), false), None).unwrap();

        let mut good = open_session("u1", 100);
        store.create(&mut good).unwrap();
        assert!(!store.check_integrity().unwrap().has_issues());

        store
            .provider()
            .with_connection(|tx| {
                tx.execute_batch(
                    "PRAGMA ignore_check_constraints = ON;
                     INSERT INTO sessions (user_id, date, start_time, end_time, store_name,
                        machine_name, initial_investment, final_investment, return_amount,
                        profit, is_completed, created_at, updated_at)
                     VALUES ('u1', '2024-01-01', '2024-01-01T10:00:00', '2024-01-01T11:00:00',
                        'S', 'M', 100, 200, 500, 1, 1, 'c', 'u');
                     INSERT INTO sessions (user_id, date, start_time, end_time, store_name,
                        machine_name, initial_investment, final_investment, return_amount,
                        profit, is_completed, created_at, updated_at)
                     VALUES ('u1', '2024-01-01', '2024-01-01T10:00:00', '2024-01-01T11:00:00',
                        'S', 'M', 300, 200, NULL, NULL, 1, 'c', 'u');
                     PRAGMA ignore_check_constraints = OFF;",
                )?;
                Ok(())
            })
            .unwrap();

        let report = store.check_integrity().unwrap();
        assert_eq!(report.total_records, 3);
        assert_eq!(report.incomplete_completed, 1);
        assert_eq!(report.profit_mismatch, 2);
        assert_eq!(report.invalid_investment, 1);
        assert!(report.has_issues());
    }

    #[test]
    fn test_database_info() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&embedded(dir.path(), false), None).unwrap();

        let mut session = open_session("u1", 100);
        store.create(&mut session).unwrap();

        let info = store.database_info().unwrap();
        assert_eq!(info.schema_version, crate::CURRENT_VERSION);
        assert!(info.backend.starts_with("embedded"));
        assert!(info.tables.contains(&"sessions".to_string()));
        assert_eq!(info.indexes.len(), 7);
        assert_eq!(info.total_sessions, 1);
        assert_eq!(info.completed_sessions, 0);
    }

    #[test]
    fn test_reset_empties_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&embedded(dir.path(), false), None).unwrap();

        let mut session = open_session("u1", 100);
        store.create(&mut session).unwrap();
        store.reset().unwrap();

        assert_eq!(store.count_for_user("u1").unwrap(), 0);
        assert_eq!(store.database_info().unwrap().schema_version, crate::CURRENT_VERSION);
    }
}
