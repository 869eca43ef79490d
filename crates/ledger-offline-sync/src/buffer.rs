//! Durable local buffer for sessions that could not reach the backend.
//!
//! The whole buffer is one JSON document:
//!
//! ```text
//! { "sessions": { "local:<n>" | "remote:<n>": { ...session, sync_status, ... } },
//!   "last_updated": "...", "next_sequence": n }
//! ```

use crate::{RecordId, SyncError, SyncResult};
use chrono::{DateTime, Utc};
use ledger_config_and_utils::OfflineConfig;
use ledger_database::Session;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Sync state of a buffered entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Synced,
}

/// A buffered session plus its sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineRecord {
    #[serde(flatten)]
    pub session: Session,
    pub sync_status: SyncStatus,
    /// When the entry was written to the buffer.
    pub offline_timestamp: DateTime<Utc>,
    /// Insertion order within the document.
    pub sequence: u64,
    /// Backend id once synced.
    #[serde(default)]
    pub server_id: Option<i64>,
}

impl OfflineRecord {
    pub fn is_pending(&self) -> bool {
        self.sync_status == SyncStatus::Pending
    }
}

/// The stored buffer document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineDocument {
    pub sessions: BTreeMap<RecordId, OfflineRecord>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub next_sequence: u64,
}

impl OfflineDocument {
    pub fn new() -> Self {
        Self {
            sessions: BTreeMap::new(),
            last_updated: Utc::now(),
            next_sequence: 0,
        }
    }

    /// Pending entries in insertion order.
    pub fn pending(&self) -> Vec<(RecordId, OfflineRecord)> {
        let mut pending: Vec<_> = self
            .sessions
            .iter()
            .filter(|(_, record)| record.is_pending())
            .map(|(id, record)| (*id, record.clone()))
            .collect();
        pending.sort_by_key(|(_, record)| record.sequence);
        pending
    }
}

impl Default for OfflineDocument {
    fn default() -> Self {
        Self::new()
    }
}

/// Where the buffer document lives.
pub trait DocumentStore: Send + Sync {
    fn load(&self) -> SyncResult<Option<OfflineDocument>>;
    fn save(&self, document: &OfflineDocument) -> SyncResult<()>;
    fn remove(&self) -> SyncResult<()>;
}

/// JSON file on disk. Writes go to a temp file that is then renamed over the
/// document, so a crash never leaves a half-written buffer.
#[derive(Debug, Clone)]
pub struct FileDocumentStore {
    path: PathBuf,
}

impl FileDocumentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl DocumentStore for FileDocumentStore {
    fn load(&self) -> SyncResult<Option<OfflineDocument>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        let document = serde_json::from_str(&content).map_err(|e| {
            SyncError::Buffer(format!("{} is not a valid buffer: {}", self.path.display(), e))
        })?;
        Ok(Some(document))
    }

    fn save(&self, document: &OfflineDocument) -> SyncResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(document)?;
        let temp = self.temp_path();
        std::fs::write(&temp, content)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }

    fn remove(&self) -> SyncResult<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// In-process document, for tests and ephemeral use.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    document: Mutex<Option<OfflineDocument>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn load(&self) -> SyncResult<Option<OfflineDocument>> {
        Ok(self.document.lock().clone())
    }

    fn save(&self, document: &OfflineDocument) -> SyncResult<()> {
        *self.document.lock() = Some(document.clone());
        Ok(())
    }

    fn remove(&self) -> SyncResult<()> {
        *self.document.lock() = None;
        Ok(())
    }
}

/// Mints buffer-local ids: milliseconds since the epoch times 1000 plus a
/// random suffix, always strictly greater than the previous id.
#[derive(Debug, Default)]
pub struct LocalIdGenerator {
    last: u64,
}

impl LocalIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id for which `taken` is false.
    pub fn next_id(&mut self, taken: impl Fn(u64) -> bool) -> u64 {
        let millis = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let suffix: u64 = rand::thread_rng().gen_range(0..1000);
        let mut candidate = millis.saturating_mul(1000).saturating_add(suffix);
        if candidate <= self.last {
            candidate = self.last + 1;
        }
        while taken(candidate) {
            candidate += 1;
        }
        self.last = candidate;
        candidate
    }
}

/// Durable queue of sessions waiting to be synced.
pub struct OfflineBuffer {
    store: Box<dyn DocumentStore>,
    /// Held across every read-modify-write of the document.
    ids: Mutex<LocalIdGenerator>,
}

impl OfflineBuffer {
    pub fn new(store: Box<dyn DocumentStore>) -> Self {
        Self {
            store,
            ids: Mutex::new(LocalIdGenerator::new()),
        }
    }

    /// Buffer backed by the file named in `config`.
    pub fn open(config: &OfflineConfig) -> Self {
        Self::new(Box::new(FileDocumentStore::new(config.buffer_path.clone())))
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryDocumentStore::new()))
    }

    /// Store a session as pending.
    ///
    /// A session with a backend id is keyed by that id, replacing any earlier
    /// buffered edit of the same record. Otherwise a fresh local id is minted.
    pub fn enqueue(&self, session: &Session) -> SyncResult<RecordId> {
        let mut ids = self.ids.lock();
        let mut document = self.store.load()?.unwrap_or_default();

        let id = match session.id {
            Some(remote) => RecordId::Remote(remote),
            None => RecordId::Local(
                ids.next_id(|n| document.sessions.contains_key(&RecordId::Local(n))),
            ),
        };

        let sequence = document.next_sequence;
        document.next_sequence += 1;
        document.sessions.insert(
            id,
            OfflineRecord {
                session: session.clone(),
                sync_status: SyncStatus::Pending,
                offline_timestamp: Utc::now(),
                sequence,
                server_id: None,
            },
        );
        self.persist(&mut document)?;

        info!(record_id = %id, user_id = %session.user_id, "Session buffered offline");
        Ok(id)
    }

    /// The full document, or `None` if nothing was ever buffered.
    pub fn load_all(&self) -> SyncResult<Option<OfflineDocument>> {
        let _guard = self.ids.lock();
        self.store.load()
    }

    /// Pending entries in insertion order.
    pub fn pending(&self) -> SyncResult<Vec<(RecordId, OfflineRecord)>> {
        Ok(self
            .load_all()?
            .map(|document| document.pending())
            .unwrap_or_default())
    }

    pub fn pending_count(&self) -> SyncResult<usize> {
        Ok(self
            .load_all()?
            .map(|document| document.sessions.values().filter(|r| r.is_pending()).count())
            .unwrap_or(0))
    }

    /// Flip an entry to synced and attach the backend id. Returns false if
    /// the entry is gone.
    pub fn mark_synced(&self, id: RecordId, server_id: Option<i64>) -> SyncResult<bool> {
        let _guard = self.ids.lock();
        let Some(mut document) = self.store.load()? else {
            return Ok(false);
        };
        let Some(record) = document.sessions.get_mut(&id) else {
            return Ok(false);
        };

        record.sync_status = SyncStatus::Synced;
        if let Some(server_id) = server_id {
            record.server_id = Some(server_id);
            record.session.id = Some(server_id);
        }
        self.persist(&mut document)?;

        debug!(record_id = %id, server_id = ?server_id, "Marked synced");
        Ok(true)
    }

    /// Drop every synced entry. Returns how many were removed.
    pub fn purge_synced(&self) -> SyncResult<usize> {
        let _guard = self.ids.lock();
        let Some(mut document) = self.store.load()? else {
            return Ok(0);
        };

        let before = document.sessions.len();
        document.sessions.retain(|_, record| record.is_pending());
        let purged = before - document.sessions.len();
        if purged > 0 {
            self.persist(&mut document)?;
            info!(count = purged, "Purged synced entries");
        }
        Ok(purged)
    }

    /// Remove the whole document.
    pub fn clear(&self) -> SyncResult<()> {
        let _guard = self.ids.lock();
        self.store.remove()?;
        info!("Offline buffer cleared");
        Ok(())
    }

    fn persist(&self, document: &mut OfflineDocument) -> SyncResult<()> {
        document.last_updated = Utc::now();
        self.store.save(document)
    }
}
