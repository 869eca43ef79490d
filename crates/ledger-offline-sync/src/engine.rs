//! Reconciles the offline buffer with the remote store.
//!
//! A pass walks pending entries in insertion order. Buffer-local entries are
//! created remotely; entries keyed by a backend id are offline edits and go
//! through last-writer-wins against the remote copy. Each entry succeeds or
//! fails on its own, and failed entries stay pending for the next pass.

use crate::{OfflineBuffer, OfflineRecord, Reachability, RecordId, SessionRepository, SyncResult};
use chrono::{DateTime, Utc};
use ledger_database::{DatabaseError, Session, SyncConflictError};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Which copy of a record wins a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Local,
    Remote,
}

/// The strictly newer `updated_at` wins; ties go to the remote copy.
pub fn conflict_winner(local: &Session, remote: &Session) -> Winner {
    if local.updated_at > remote.updated_at {
        Winner::Local
    } else {
        Winner::Remote
    }
}

/// The winning record of a local/remote pair.
pub fn resolve_conflict<'a>(local: &'a Session, remote: &'a Session) -> &'a Session {
    match conflict_winner(local, remote) {
        Winner::Local => local,
        Winner::Remote => remote,
    }
}

/// What to do when the remote copy of an edited record wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Drop the local edit and mark the entry synced.
    #[default]
    LastWriterWins,
    /// Keep the entry pending and record a [`SyncConflictError`].
    Surface,
}

/// Outcome of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Pending entries the pass looked at.
    pub attempted: usize,
    pub synced: usize,
    pub failed: usize,
    /// Entries where the remote copy won.
    pub conflicts: usize,
    pub purged: usize,
    /// The pass did not run (offline, or another pass was in progress).
    pub skipped: bool,
}

impl SyncReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    /// True when the pass ran and no entry failed.
    pub fn is_success(&self) -> bool {
        !self.skipped && self.failed == 0
    }
}

/// Snapshot of the offline side for status displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OfflineStatus {
    pub has_local_data: bool,
    pub pending_sync_count: usize,
    pub network_available: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Result of [`SyncEngine::save_or_enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Written to the remote store under this id.
    Saved(i64),
    /// Written to the offline buffer instead.
    Buffered(RecordId),
}

enum EntryOutcome {
    Synced,
    RemoteWon,
    Failed,
}

/// Drains the offline buffer into the session repository.
pub struct SyncEngine {
    repository: Arc<dyn SessionRepository>,
    buffer: Arc<OfflineBuffer>,
    network: Arc<dyn Reachability>,
    policy: ConflictPolicy,
    /// Held for the duration of a pass.
    running: Mutex<()>,
    conflicts: Mutex<Vec<SyncConflictError>>,
    /// Backend ids of local entries already created remotely whose buffer
    /// update failed. Consulted before creating again.
    created: Mutex<HashMap<RecordId, i64>>,
}

impl SyncEngine {
    pub fn new(
        repository: Arc<dyn SessionRepository>,
        buffer: Arc<OfflineBuffer>,
        network: Arc<dyn Reachability>,
    ) -> Self {
        Self {
            repository,
            buffer,
            network,
            policy: ConflictPolicy::default(),
            running: Mutex::new(()),
            conflicts: Mutex::new(Vec::new()),
            created: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn buffer(&self) -> &Arc<OfflineBuffer> {
        &self.buffer
    }

    pub fn is_online(&self) -> bool {
        self.network.is_online()
    }

    /// Run one pass. True only if the pass ran and no entry failed.
    pub fn sync_once(&self) -> bool {
        match self.sync_pass() {
            Ok(report) => report.is_success(),
            Err(e) => {
                error!(error = %e, "Sync pass aborted");
                false
            }
        }
    }

    /// Run one pass and report per-entry counts.
    ///
    /// Returns a skipped report without side effects when offline or when
    /// another pass is already running.
    pub fn sync_pass(&self) -> SyncResult<SyncReport> {
        let Some(_running) = self.running.try_lock() else {
            debug!("Sync pass already in progress");
            return Ok(SyncReport::skipped());
        };

        if !self.is_online() {
            debug!("Offline, skipping sync pass");
            return Ok(SyncReport::skipped());
        }

        let pending = self.buffer.pending()?;
        let mut report = SyncReport {
            attempted: pending.len(),
            ..SyncReport::default()
        };
        if pending.is_empty() {
            report.purged = self.purge();
            return Ok(report);
        }

        info!(count = pending.len(), "Starting sync pass");
        for (id, record) in pending {
            match self.sync_entry(id, &record) {
                EntryOutcome::Synced => report.synced += 1,
                EntryOutcome::RemoteWon => {
                    report.synced += 1;
                    report.conflicts += 1;
                }
                EntryOutcome::Failed => report.failed += 1,
            }
        }

        // Also clears synced entries left behind by an earlier failed purge.
        report.purged = self.purge();

        info!(
            synced = report.synced,
            failed = report.failed,
            conflicts = report.conflicts,
            purged = report.purged,
            "Sync pass complete"
        );
        Ok(report)
    }

    /// Conflicts recorded under [`ConflictPolicy::Surface`], one per record,
    /// oldest first.
    pub fn take_conflicts(&self) -> Vec<SyncConflictError> {
        std::mem::take(&mut *self.conflicts.lock())
    }

    pub fn offline_status(&self) -> SyncResult<OfflineStatus> {
        let document = self.buffer.load_all()?;
        let pending_sync_count = document
            .as_ref()
            .map(|d| d.sessions.values().filter(|r| r.is_pending()).count())
            .unwrap_or(0);

        Ok(OfflineStatus {
            has_local_data: document.as_ref().is_some_and(|d| !d.sessions.is_empty()),
            pending_sync_count,
            network_available: self.is_online(),
            last_updated: document.map(|d| d.last_updated),
        })
    }

    /// Save remotely when possible, otherwise buffer.
    ///
    /// A buffered session has `updated_at` refreshed. Validation errors are
    /// returned as-is and nothing is buffered.
    pub fn save_or_enqueue(&self, session: &mut Session) -> SyncResult<SaveOutcome> {
        session.validate().map_err(DatabaseError::from)?;

        if self.is_online() {
            let result = match session.id {
                Some(id) => self.repository.update(id, session).map(|_| id),
                None => self.repository.create(session),
            };
            match result {
                Ok(id) => return Ok(SaveOutcome::Saved(id)),
                Err(e) if e.is_retryable() => {
                    warn!(error = %e, "Remote save failed, buffering offline");
                }
                Err(e) => return Err(e.into()),
            }
        }

        // The buffered copy is the newest edit of this record.
        session.updated_at = Utc::now();
        let id = self.buffer.enqueue(session)?;
        Ok(SaveOutcome::Buffered(id))
    }

    fn sync_entry(&self, id: RecordId, record: &OfflineRecord) -> EntryOutcome {
        let result = match id {
            RecordId::Local(_) => self.create_entry(id, record),
            RecordId::Remote(remote_id) => self.update_entry(id, remote_id, record),
        };
        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(record_id = %id, error = %e, "Failed to sync entry");
                EntryOutcome::Failed
            }
        }
    }

    fn purge(&self) -> usize {
        match self.buffer.purge_synced() {
            Ok(purged) => purged,
            Err(e) => {
                error!(error = %e, "Failed to purge synced entries");
                0
            }
        }
    }

    fn create_entry(&self, id: RecordId, record: &OfflineRecord) -> SyncResult<EntryOutcome> {
        let known = self.created.lock().get(&id).copied();
        let server_id = match known {
            Some(server_id) => server_id,
            None => {
                let mut session = record.session.clone();
                session.id = None;
                self.repository.create(&mut session)?
            }
        };

        if let Err(e) = self.buffer.mark_synced(id, Some(server_id)) {
            error!(record_id = %id, server_id, error = %e, "Created remotely but buffer update failed");
            self.created.lock().insert(id, server_id);
            return Err(e);
        }
        self.created.lock().remove(&id);
        debug!(record_id = %id, server_id, "Created buffered session");
        Ok(EntryOutcome::Synced)
    }

    fn update_entry(
        &self,
        id: RecordId,
        remote_id: i64,
        record: &OfflineRecord,
    ) -> SyncResult<EntryOutcome> {
        let remote = self
            .repository
            .get(remote_id)?
            .ok_or_else(|| DatabaseError::not_found(format!("session {}", remote_id)))?;

        match conflict_winner(&record.session, &remote) {
            Winner::Local => {
                let mut session = record.session.clone();
                self.repository.update(remote_id, &mut session)?;
                self.buffer.mark_synced(id, Some(remote_id))?;
                debug!(record_id = %id, "Applied offline edit");
                Ok(EntryOutcome::Synced)
            }
            Winner::Remote => match self.policy {
                ConflictPolicy::LastWriterWins => {
                    self.buffer.mark_synced(id, Some(remote_id))?;
                    info!(record_id = %id, "Remote copy is newer, dropping offline edit");
                    Ok(EntryOutcome::RemoteWon)
                }
                ConflictPolicy::Surface => {
                    let conflict = SyncConflictError {
                        record: id.to_string(),
                        reason: format!(
                            "remote updated_at {} is not older than local {}",
                            remote.updated_at, record.session.updated_at
                        ),
                    };
                    warn!(record_id = %id, "Sync conflict left pending");
                    let mut conflicts = self.conflicts.lock();
                    match conflicts.iter_mut().find(|c| c.record == conflict.record) {
                        Some(existing) => *existing = conflict,
                        None => conflicts.push(conflict),
                    }
                    Ok(EntryOutcome::Failed)
                }
            },
        }
    }
}
