//! SQLite persistence for play sessions.
//!
//! This crate provides:
//! - A `Backend` abstraction with an embedded (connection per call) and a
//!   pooled (r2d2) implementation, behind one `ConnectionProvider`
//! - Versioned schema management
//! - `RecordStore`, the validated CRUD layer over the `sessions` table
//! - ChaCha20-Poly1305 field encryption for store and machine names
//!
//! ```ignore
//! let store = RecordStore::open(&config.database, Some(Arc::new(cipher)))?;
//! let mut session = Session::new(user, date, start, "Store", "Machine", 10_000);
//! let id = store.create(&mut session)?;
//! ```

mod backend;
mod encryption;
mod error;
mod migrations;
mod models;
mod pool;
pub mod queries;
mod store;
mod validation;

pub use backend::{BackendKind, Backend, ConnectionHandle, ConnectionProvider, EmbeddedBackend, Tx};
pub use encryption::{
    decrypt_content, encrypt_content, generate_key, generate_nonce, FieldCipher, FieldEncryptor,
    FieldMap, ENCRYPTED_PREFIX, KEY_SIZE, NONCE_SIZE,
};
pub use error::{
    DatabaseError, DatabaseResult, PersistenceError, SyncConflictError, ValidationError,
};
pub use migrations::{SchemaManager, CURRENT_VERSION};
pub use models::*;
pub use pool::{NetworkedBackend, PoolState};
pub use store::RecordStore;
pub use validation::{is_name_char, MAX_INVESTMENT, MAX_RETURN};
