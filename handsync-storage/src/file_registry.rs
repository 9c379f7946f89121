//! Registry of files awaiting upload, with per-file resumable progress.

use crate::drain::{drain_snapshot, DrainProgress, DrainReport, DrainStep};
use crate::error::{StorageError, StorageResult};
use crate::{lock, now_millis, open_database, open_in_memory_database, SharedConnection};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;

/// Upload progress for one registered file.
///
/// Fields fill in stage order: `md5`/`file_size`, `upload_link`,
/// `session_link`, `upload_completed`, `upload_verified`. The stored JSON
/// omits unset fields and the path, which is the row key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUploadRecord {
    #[serde(skip)]
    pub relative_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_link: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub upload_completed: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub upload_verified: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl FileUploadRecord {
    /// A record with no progress.
    pub fn new(relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            ..Self::default()
        }
    }

    /// Parses the stored JSON for `relative_path`.
    pub fn from_json(relative_path: &str, json: &str) -> StorageResult<Self> {
        let mut record: Self = serde_json::from_str(json)?;
        record.relative_path = relative_path.to_string();
        Ok(record)
    }

    pub fn to_json(&self) -> StorageResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Discards all progress so the next attempt starts from the digest.
    pub fn reset(&mut self) {
        *self = Self::new(std::mem::take(&mut self.relative_path));
    }

    /// Clears the transfer outcome only; digest, size and links survive.
    pub fn reset_completion(&mut self) {
        self.upload_completed = false;
        self.upload_verified = false;
    }

    /// True once no more work remains for this file.
    pub fn is_finished(&self) -> bool {
        self.upload_completed && self.upload_verified
    }
}

/// Durable map from relative file path to [`FileUploadRecord`].
#[derive(Clone)]
pub struct FileRegistry {
    conn: SharedConnection,
}

impl FileRegistry {
    /// Opens or creates a registry at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_with_conn(open_database(path)?)
    }

    /// Opens an in-memory registry (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::open_with_conn(open_in_memory_database()?)
    }

    /// Opens the registry on an existing shared connection.
    pub fn open_with_conn(conn: SharedConnection) -> StorageResult<Self> {
        initialize_schema(&*lock(&conn)?)?;
        Ok(Self { conn })
    }

    /// Registers a file with empty progress. No-op if already registered.
    ///
    /// Returns true when a new record was created.
    pub fn register(&self, relative_path: &str) -> StorageResult<bool> {
        let conn = lock(&self.conn)?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO file_registry (relative_path, record_json, updated_at) \
             VALUES (?1, '{}', ?2)",
            params![relative_path, now_millis()],
        )?;
        Ok(inserted > 0)
    }

    pub fn get(&self, relative_path: &str) -> StorageResult<Option<FileUploadRecord>> {
        let conn = lock(&self.conn)?;
        let json: Option<String> = conn
            .query_row(
                "SELECT record_json FROM file_registry WHERE relative_path = ?1",
                params![relative_path],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| FileUploadRecord::from_json(relative_path, &j))
            .transpose()
    }

    /// Persists the record's current progress.
    pub fn save(&self, record: &FileUploadRecord) -> StorageResult<()> {
        let json = record.to_json()?;
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO file_registry (relative_path, record_json, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(relative_path) DO UPDATE SET record_json = excluded.record_json, \
             updated_at = excluded.updated_at",
            params![record.relative_path, json, now_millis()],
        )?;
        Ok(())
    }

    /// Removes the record. Returns false if it was not registered.
    pub fn remove(&self, relative_path: &str) -> StorageResult<bool> {
        let conn = lock(&self.conn)?;
        let removed = conn.execute(
            "DELETE FROM file_registry WHERE relative_path = ?1",
            params![relative_path],
        )?;
        Ok(removed > 0)
    }

    /// Current records, oldest registration first.
    pub fn snapshot(&self) -> StorageResult<Vec<FileUploadRecord>> {
        let conn = lock(&self.conn)?;
        let mut stmt =
            conn.prepare("SELECT relative_path, record_json FROM file_registry ORDER BY rowid")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|(path, json)| FileUploadRecord::from_json(path, json))
            .collect()
    }

    pub fn len(&self) -> StorageResult<usize> {
        let conn = lock(&self.conn)?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM file_registry", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Hands a snapshot of the registered files to `upload_one`, in order.
    ///
    /// Acknowledged records are removed. A failed file stops the drain and
    /// keeps whatever progress its session persisted.
    pub async fn drain<F, Fut, E>(&self, upload_one: F) -> Result<DrainReport, E>
    where
        F: FnMut(DrainProgress, FileUploadRecord) -> Fut,
        Fut: Future<Output = Result<DrainStep, E>>,
        E: From<StorageError>,
    {
        let records = self.snapshot()?;
        drain_snapshot(records, upload_one, |record| {
            self.remove(&record.relative_path).map(|_| ())
        })
        .await
    }
}

fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS file_registry (
            relative_path TEXT PRIMARY KEY NOT NULL,
            record_json TEXT NOT NULL DEFAULT '{}',
            updated_at INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(())
}
