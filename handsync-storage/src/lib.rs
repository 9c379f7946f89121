//! Durable SQLite storage for handsync.
//!
//! Holds everything that must survive a process restart while data waits
//! for connectivity:
//!
//! - [`KeyValueStore`]: pending key/value log entries, last-write-wins per key
//! - [`FileRegistry`]: per-file resumable upload progress, keyed by relative path
//! - [`PreferenceStore`]: small device-local settings (prompt index, device id, ...)
//!
//! All stores can share one connection. Writes are committed before the
//! call returns, so producers may append while a drain is in flight.

mod drain;
mod error;
mod file_registry;
mod key_value_store;
mod preference_store;

pub use drain::{DrainProgress, DrainReport, DrainStep};
pub use error::{StorageError, StorageResult};
pub use file_registry::{FileRegistry, FileUploadRecord};
pub use key_value_store::{KeyValueEntry, KeyValueStore};
pub use preference_store::PreferenceStore;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Connection shared between stores.
pub type SharedConnection = Arc<Mutex<Connection>>;

/// Open a SQLite database tuned for crash-safe single-writer queues.
///
/// WAL journaling keeps readers unblocked while the sync worker writes;
/// `synchronous=FULL` makes each committed write durable on return.
pub fn open_database(path: &Path) -> StorageResult<SharedConnection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Open an in-memory database (for testing).
pub fn open_in_memory_database() -> StorageResult<SharedConnection> {
    let conn = Connection::open_in_memory()?;
    Ok(Arc::new(Mutex::new(conn)))
}

pub(crate) fn lock(conn: &SharedConnection) -> StorageResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|e| StorageError::LockPoisoned(e.to_string()))
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
