//! SQLite storage backend.
//!
//! All records live in one table:
//!
//! ```sql
//! CREATE TABLE kv (key TEXT PRIMARY KEY, data BLOB NOT NULL, version INTEGER NOT NULL)
//! ```
//!
//! The connection sits behind a mutex; each backend call runs its
//! statements while holding it, which makes compare-and-swap a single
//! critical section.

use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::state::backend::{StorageBackend, StorageError, VersionedRecord};
use crate::state::generic::GenericState;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
    key     TEXT PRIMARY KEY,
    data    BLOB NOT NULL,
    version INTEGER NOT NULL
)";

fn db_err(message: &str, err: rusqlite::Error) -> StorageError {
    StorageError::backend(message, err)
}

/// File-backed storage backend using a single SQLite database.
#[derive(Debug)]
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Opens (or creates) the database at `path` and ensures the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| db_err("failed to open database", e))?;
        Self::with_connection(conn)
    }

    /// Opens a private in-memory SQLite database.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn =
            Connection::open_in_memory().map_err(|e| db_err("failed to open database", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute(SCHEMA, [])
            .map_err(|e| db_err("failed to create schema", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn get(&self, key: &str) -> Result<VersionedRecord, StorageError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT data, version FROM kv WHERE key = ?1",
            params![key],
            |row| {
                Ok(VersionedRecord {
                    data: row.get(0)?,
                    version: row.get::<_, i64>(1)? as u64,
                })
            },
        )
        .optional()
        .map_err(|e| db_err("failed to read record", e))?
        .ok_or_else(|| StorageError::NotFound {
            key: key.to_string(),
        })
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<u64, StorageError> {
        let conn = self.conn.lock();
        let version: i64 = conn
            .query_row(
                "INSERT INTO kv (key, data, version) VALUES (?1, ?2, 1)
                 ON CONFLICT(key) DO UPDATE SET data = excluded.data, version = version + 1
                 RETURNING version",
                params![key, data],
                |row| row.get(0),
            )
            .map_err(|e| db_err("failed to write record", e))?;
        Ok(version as u64)
    }

    async fn put_if_absent(&self, key: &str, data: &[u8]) -> Result<bool, StorageError> {
        let conn = self.conn.lock();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO kv (key, data, version) VALUES (?1, ?2, 1)",
                params![key, data],
            )
            .map_err(|e| db_err("failed to write record", e))?;
        Ok(inserted == 1)
    }

    async fn put_if_version(
        &self,
        key: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<u64, StorageError> {
        let conn = self.conn.lock();
        let updated = conn
            .execute(
                "UPDATE kv SET data = ?1, version = version + 1 WHERE key = ?2 AND version = ?3",
                params![data, key, expected_version as i64],
            )
            .map_err(|e| db_err("failed to update record", e))?;
        if updated == 1 {
            return Ok(expected_version + 1);
        }

        let actual: Option<i64> = conn
            .query_row(
                "SELECT version FROM kv WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| db_err("failed to read record", e))?;
        match actual {
            Some(actual) => Err(StorageError::VersionConflict {
                key: key.to_string(),
                expected: expected_version,
                actual: actual as u64,
            }),
            None => Err(StorageError::NotFound {
                key: key.to_string(),
            }),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let conn = self.conn.lock();
        let removed = conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(|e| db_err("failed to delete record", e))?;
        Ok(removed > 0)
    }

    async fn list_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, VersionedRecord)>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT key, data, version FROM kv WHERE substr(key, 1, length(?1)) = ?1")
            .map_err(|e| db_err("failed to prepare listing", e))?;
        let rows = stmt
            .query_map(params![prefix], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    VersionedRecord {
                        data: row.get(1)?,
                        version: row.get::<_, i64>(2)? as u64,
                    },
                ))
            })
            .map_err(|e| db_err("failed to list records", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("failed to list records", e))?;
        Ok(rows)
    }
}

/// State persisted in a SQLite file.
pub type SqliteState = GenericState<SqliteBackend>;
