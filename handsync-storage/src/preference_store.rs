//! Small device-local settings that are never uploaded.

use crate::error::StorageResult;
use crate::{lock, now_millis, open_database, open_in_memory_database, SharedConnection};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

#[derive(Clone)]
pub struct PreferenceStore {
    conn: SharedConnection,
}

impl PreferenceStore {
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_with_conn(open_database(path)?)
    }

    pub fn open_in_memory() -> StorageResult<Self> {
        Self::open_with_conn(open_in_memory_database()?)
    }

    pub fn open_with_conn(conn: SharedConnection) -> StorageResult<Self> {
        initialize_schema(&*lock(&conn)?)?;
        Ok(Self { conn })
    }

    pub fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let conn = lock(&self.conn)?;
        let value = conn
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.set_many(&[(key, value)])
    }

    /// Writes several keys in one transaction.
    pub fn set_many(&self, pairs: &[(&str, &str)]) -> StorageResult<()> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        let now = now_millis();
        for (key, value) in pairs {
            tx.execute(
                "INSERT INTO preferences (key, value, updated_at) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Stores `value` only if `key` is unset, returning whichever value won.
    pub fn get_or_insert(&self, key: &str, value: &str) -> StorageResult<String> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT OR IGNORE INTO preferences (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, now_millis()],
        )?;
        let stored: String = conn.query_row(
            "SELECT value FROM preferences WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(stored)
    }

    pub fn remove(&self, key: &str) -> StorageResult<()> {
        let conn = lock(&self.conn)?;
        conn.execute("DELETE FROM preferences WHERE key = ?1", params![key])?;
        Ok(())
    }
}

fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS preferences (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(())
}
