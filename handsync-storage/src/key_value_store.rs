//! Pending key/value log entries awaiting upload.

use crate::drain::{drain_snapshot, DrainProgress, DrainReport, DrainStep};
use crate::error::{StorageError, StorageResult};
use crate::{lock, now_millis, open_database, open_in_memory_database, SharedConnection};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;

/// A single pending entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueEntry {
    pub key: String,
    pub value: String,
}

/// Durable map of keys to values waiting for the server.
///
/// Re-adding a key overwrites its value in place. An entry is removed only
/// once the server acknowledged that exact key/value pair, so a value
/// overwritten mid-upload is sent again on the next drain.
#[derive(Clone)]
pub struct KeyValueStore {
    conn: SharedConnection,
}

impl KeyValueStore {
    /// Opens or creates a store at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_with_conn(open_database(path)?)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::open_with_conn(open_in_memory_database()?)
    }

    /// Opens the store on an existing shared connection.
    pub fn open_with_conn(conn: SharedConnection) -> StorageResult<Self> {
        initialize_schema(&*lock(&conn)?)?;
        Ok(Self { conn })
    }

    /// Inserts or overwrites `key`.
    pub fn add(&self, key: &str, value: &str) -> StorageResult<()> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO pending_entries (key, value, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now_millis()],
        )?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let conn = lock(&self.conn)?;
        let value = conn
            .query_row(
                "SELECT value FROM pending_entries WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Current entries, oldest key first.
    pub fn snapshot(&self) -> StorageResult<Vec<KeyValueEntry>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare("SELECT key, value FROM pending_entries ORDER BY rowid")?;
        let entries = stmt
            .query_map([], |row| {
                Ok(KeyValueEntry {
                    key: row.get(0)?,
                    value: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Removes `entry` only if its value is still the one that was uploaded.
    ///
    /// Returns false when the key was overwritten (or already gone).
    pub fn remove_acknowledged(&self, entry: &KeyValueEntry) -> StorageResult<bool> {
        let conn = lock(&self.conn)?;
        let removed = conn.execute(
            "DELETE FROM pending_entries WHERE key = ?1 AND value = ?2",
            params![entry.key, entry.value],
        )?;
        Ok(removed > 0)
    }

    pub fn len(&self) -> StorageResult<usize> {
        let conn = lock(&self.conn)?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM pending_entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Uploads a snapshot of the pending entries one at a time.
    ///
    /// Acknowledged entries are removed; the first failed entry stops the
    /// drain and leaves it, and every entry after it, queued. Entries added
    /// while the drain runs are picked up by the next drain.
    pub async fn drain<F, Fut, E>(&self, upload_one: F) -> Result<DrainReport, E>
    where
        F: FnMut(DrainProgress, KeyValueEntry) -> Fut,
        Fut: Future<Output = Result<DrainStep, E>>,
        E: From<StorageError>,
    {
        let entries = self.snapshot()?;
        drain_snapshot(entries, upload_one, |entry| {
            self.remove_acknowledged(entry).map(|_| ())
        })
        .await
    }
}

fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS pending_entries (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(())
}
