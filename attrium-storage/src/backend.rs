//! The key/value contract every persistence engine implements.

use crate::error::{StorageError, StorageResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// A single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put { key: String, value: String },
    Delete { key: String },
    /// Precondition: the key must not exist when the batch is applied.
    ExpectAbsent { key: String },
    /// Precondition: the key must exist when the batch is applied.
    ExpectPresent { key: String },
}

/// An ordered set of writes applied atomically.
///
/// Either every operation becomes visible or none does. A failed
/// `ExpectAbsent` or `ExpectPresent` precondition aborts the batch with
/// [`StorageError::PersistenceConflict`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Put {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Serializes `value` as JSON and queues a put.
    pub fn put_json<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> StorageResult<&mut Self> {
        let json = serde_json::to_string(value)?;
        Ok(self.put(key, json))
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Delete { key: key.into() });
        self
    }

    pub fn expect_absent(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::ExpectAbsent { key: key.into() });
        self
    }

    pub fn expect_present(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::ExpectPresent { key: key.into() });
        self
    }

    pub fn extend(&mut self, other: WriteBatch) -> &mut Self {
        self.ops.extend(other.ops);
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Minimal ordered key/value storage.
///
/// Keys are compared byte-wise; `scan_prefix` returns entries in key order.
pub trait KvBackend: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, String)>>;

    fn apply(&self, batch: WriteBatch) -> StorageResult<()>;

    fn count_prefix(&self, prefix: &str) -> StorageResult<usize> {
        Ok(self.scan_prefix(prefix)?.len())
    }
}

/// Reads and deserializes a JSON record.
pub fn get_json<T: DeserializeOwned>(
    backend: &dyn KvBackend,
    key: &str,
) -> StorageResult<Option<T>> {
    match backend.get(key)? {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

/// Reads and deserializes every JSON record under a prefix, in key order.
pub fn scan_json<T: DeserializeOwned>(
    backend: &dyn KvBackend,
    prefix: &str,
) -> StorageResult<Vec<T>> {
    backend
        .scan_prefix(prefix)?
        .into_iter()
        .map(|(_, json)| serde_json::from_str(&json).map_err(StorageError::from))
        .collect()
}

/// In-process backend for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StorageError::Lock(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, String)>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StorageError::Lock(e.to_string()))?;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn apply(&self, batch: WriteBatch) -> StorageResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StorageError::Lock(e.to_string()))?;

        for op in batch.ops() {
            match op {
                WriteOp::ExpectAbsent { key } if entries.contains_key(key) => {
                    return Err(StorageError::PersistenceConflict(format!(
                        "{key} already exists"
                    )));
                }
                WriteOp::ExpectPresent { key } if !entries.contains_key(key) => {
                    return Err(StorageError::PersistenceConflict(format!("{key} is gone")));
                }
                _ => {}
            }
        }

        for op in batch.ops {
            match op {
                WriteOp::Put { key, value } => {
                    entries.insert(key, value);
                }
                WriteOp::Delete { key } => {
                    entries.remove(&key);
                }
                WriteOp::ExpectAbsent { .. } | WriteOp::ExpectPresent { .. } => {}
            }
        }
        Ok(())
    }
}
