//! Offline buffering and sync for play ledger sessions.
//!
//! This crate provides:
//! - OfflineBuffer: durable JSON document of sessions that missed the backend
//! - SyncEngine: drains the buffer into a `SessionRepository` with
//!   per-entry failure isolation and last-writer-wins conflict handling
//! - Reachability: network probe (HTTP) or a fixed flag

mod buffer;
mod engine;
mod error;
mod network;
mod record_id;
mod repository;

#[cfg(test)]
mod tests;

pub use buffer::{
    DocumentStore, FileDocumentStore, LocalIdGenerator, MemoryDocumentStore, OfflineBuffer,
    OfflineDocument, OfflineRecord, SyncStatus,
};
pub use engine::{
    conflict_winner, resolve_conflict, ConflictPolicy, OfflineStatus, SaveOutcome, SyncEngine,
    SyncReport, Winner,
};
pub use error::{SyncError, SyncResult};
pub use network::{HttpReachability, Reachability, StaticReachability};
pub use record_id::RecordId;
pub use repository::SessionRepository;
