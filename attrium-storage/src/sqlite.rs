//! SQLite-backed key/value storage.
//!
//! All records live in a single `kv` table. Batches run inside one
//! transaction so a failed precondition or write leaves nothing behind.

use crate::backend::{KvBackend, WriteBatch, WriteOp};
use crate::error::{StorageError, StorageResult};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Persistent backend over a SQLite file.
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Opens (or creates) a backend at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        debug!("opened sqlite backend at {}", path.display());
        Self::with_connection(conn)
    }

    /// Opens an in-memory backend (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        let backend = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        backend.init_schema()?;
        Ok(backend)
    }

    fn init_schema(&self) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            ) WITHOUT ROWID;
            ",
        )?;
        Ok(())
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Lock(format!("sqlite connection: {e}")))
    }
}

impl KvBackend for SqliteBackend {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, String)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT key, value FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )?;
        let rows = stmt.query_map(params![prefix], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    fn apply(&self, batch: WriteBatch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock()?;
        // Immediate: preconditions and writes see the same snapshot even
        // when another process shares the file.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        for op in batch.ops() {
            let (key, must_exist) = match op {
                WriteOp::ExpectAbsent { key } => (key, false),
                WriteOp::ExpectPresent { key } => (key, true),
                _ => continue,
            };
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM kv WHERE key = ?1)",
                params![key],
                |row| row.get(0),
            )?;
            match (exists, must_exist) {
                (true, false) => {
                    return Err(StorageError::PersistenceConflict(format!(
                        "{key} already exists"
                    )));
                }
                (false, true) => {
                    return Err(StorageError::PersistenceConflict(format!("{key} is gone")));
                }
                _ => {}
            }
        }

        for op in batch.ops() {
            match op {
                WriteOp::Put { key, value } => {
                    tx.execute(
                        "INSERT INTO kv (key, value) VALUES (?1, ?2)
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                        params![key, value],
                    )?;
                }
                WriteOp::Delete { key } => {
                    tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
                }
                WriteOp::ExpectAbsent { .. } | WriteOp::ExpectPresent { .. } => {}
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn count_prefix(&self, prefix: &str) -> StorageResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM kv WHERE substr(key, 1, length(?1)) = ?1",
            params![prefix],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
