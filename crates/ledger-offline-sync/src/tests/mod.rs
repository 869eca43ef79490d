//! Behavioral tests for the offline buffer and sync engine.
//!
//! - `offline.rs`     - buffering while offline, status, round trip
//! - `failures.rs`    - per-entry failure isolation and retry
//! - `conflicts.rs`   - last-writer-wins and surfaced conflicts
//! - `concurrency.rs` - reentrancy guard
//! - `save.rs`        - save-or-enqueue
//! - `store.rs`       - end to end against a real `RecordStore`

mod conflicts;

use crate::{
    DocumentStore, MemoryDocumentStore, OfflineBuffer, OfflineDocument, SessionRepository,
    StaticReachability, SyncEngine, SyncError, SyncResult,
};
use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone, Utc};
use ledger_database::{DatabaseError, DatabaseResult, Session};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// In-memory repository that can be told to fail for chosen users.
#[derive(Default)]
pub(crate) struct MockRepository {
    rows: Mutex<BTreeMap<i64, Session>>,
    failing_users: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl MockRepository {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn fail_for(&self, user: &str) {
        self.failing_users.lock().insert(user.to_string());
    }

    pub(crate) fn recover(&self, user: &str) {
        self.failing_users.lock().remove(user);
    }

    /// Store a row directly, bypassing the call log.
    pub(crate) fn insert_row(&self, session: &Session) -> i64 {
        let mut rows = self.rows.lock();
        let id = rows.len() as i64 + 1;
        let mut row = session.clone();
        row.id = Some(id);
        rows.insert(id, row);
        id
    }

    pub(crate) fn row(&self, id: i64) -> Option<Session> {
        self.rows.lock().get(&id).cloned()
    }

    pub(crate) fn row_count(&self) -> usize {
        self.rows.lock().len()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn check(&self, session: &Session) -> DatabaseResult<()> {
        if self.failing_users.lock().contains(&session.user_id) {
            return Err(DatabaseError::connection("backend unreachable"));
        }
        Ok(())
    }
}

impl SessionRepository for MockRepository {
    fn create(&self, session: &mut Session) -> DatabaseResult<i64> {
        self.calls.lock().push(format!("create:{}", session.user_id));
        self.check(session)?;
        session.validate()?;

        let mut rows = self.rows.lock();
        let id = rows.len() as i64 + 1;
        session.id = Some(id);
        session.profit = session.calculate_profit();
        rows.insert(id, session.clone());
        Ok(id)
    }

    fn update(&self, id: i64, session: &mut Session) -> DatabaseResult<bool> {
        self.calls.lock().push(format!("update:{}", id));
        self.check(session)?;
        session.validate()?;

        let mut rows = self.rows.lock();
        if !rows.contains_key(&id) {
            return Err(DatabaseError::not_found(format!("session {}", id)));
        }
        session.id = Some(id);
        session.profit = session.calculate_profit();
        session.updated_at = Utc::now();
        rows.insert(id, session.clone());
        Ok(true)
    }

    fn get(&self, id: i64) -> DatabaseResult<Option<Session>> {
        self.calls.lock().push(format!("get:{}", id));
        Ok(self.rows.lock().get(&id).cloned())
    }
}

/// Remaining successful saves before the store starts failing; `None` is unlimited.
pub(crate) type SaveBudget = Arc<Mutex<Option<usize>>>;

/// In-memory document store whose saves fail once the budget runs out.
pub(crate) struct FlakyStore {
    inner: MemoryDocumentStore,
    budget: SaveBudget,
}

impl DocumentStore for FlakyStore {
    fn load(&self) -> SyncResult<Option<OfflineDocument>> {
        self.inner.load()
    }

    fn save(&self, document: &OfflineDocument) -> SyncResult<()> {
        if let Some(remaining) = self.budget.lock().as_mut() {
            if *remaining == 0 {
                return Err(SyncError::Io(std::io::Error::other("disk full")));
            }
            *remaining -= 1;
        }
        self.inner.save(document)
    }

    fn remove(&self) -> SyncResult<()> {
        self.inner.remove()
    }
}

pub(crate) fn flaky_buffer() -> (Arc<OfflineBuffer>, SaveBudget) {
    let budget: SaveBudget = Arc::new(Mutex::new(None));
    let store = FlakyStore {
        inner: MemoryDocumentStore::new(),
        budget: budget.clone(),
    };
    (Arc::new(OfflineBuffer::new(Box::new(store))), budget)
}

pub(crate) fn yesterday() -> NaiveDate {
    Local::now().date_naive() - Duration::days(1)
}

/// Fixed instant used as the remote `updated_at` in conflict tests.
pub(crate) fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

pub(crate) fn session(user: &str) -> Session {
    let date = yesterday();
    let mut session = Session::new(
        user,
        date,
        date.and_hms_opt(10, 0, 0).unwrap(),
        "Store",
        "Machine",
        100,
    );
    session.created_at = base_time();
    session.updated_at = base_time();
    session
}

pub(crate) struct Harness {
    pub repo: Arc<MockRepository>,
    pub buffer: Arc<OfflineBuffer>,
    pub network: Arc<StaticReachability>,
    pub engine: SyncEngine,
}

pub(crate) fn harness(online: bool) -> Harness {
    let repo = MockRepository::new();
    let buffer = Arc::new(OfflineBuffer::in_memory());
    let network = Arc::new(StaticReachability::new(online));
    let engine = SyncEngine::new(repo.clone(), buffer.clone(), network.clone());
    Harness {
        repo,
        buffer,
        network,
        engine,
    }
}

#[test]
fn basic_workflow() {
    let h = harness(false);

    let id = h.buffer.enqueue(&session("u1")).unwrap();
    assert!(id.is_local());
    assert!(!h.engine.sync_once());

    h.network.set_online(true);
    assert!(h.engine.sync_once());
    assert_eq!(h.repo.row_count(), 1);
    assert_eq!(h.buffer.pending_count().unwrap(), 0);
}
