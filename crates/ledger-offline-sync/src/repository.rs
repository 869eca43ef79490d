//! The storage seam the sync engine writes through.

use ledger_database::{DatabaseResult, RecordStore, Session};

/// Session writes the sync engine needs from the remote store.
pub trait SessionRepository: Send + Sync {
    fn create(&self, session: &mut Session) -> DatabaseResult<i64>;
    fn update(&self, id: i64, session: &mut Session) -> DatabaseResult<bool>;
    fn get(&self, id: i64) -> DatabaseResult<Option<Session>>;
}

impl SessionRepository for RecordStore {
    fn create(&self, session: &mut Session) -> DatabaseResult<i64> {
        RecordStore::create(self, session)
    }

    fn update(&self, id: i64, session: &mut Session) -> DatabaseResult<bool> {
        RecordStore::update(self, id, session)
    }

    fn get(&self, id: i64) -> DatabaseResult<Option<Session>> {
        RecordStore::get(self, id)
    }
}
