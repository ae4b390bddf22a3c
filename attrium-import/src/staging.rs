//! Staged import rows awaiting review.
//!
//! Rows are written by stash as `pending`. Hoard removes a row once it
//! commits and marks it `fail` with an appended note otherwise. Nothing
//! here retries a failed row; a reviewer selects it again.

use crate::error::{ImportError, ImportResult};
use crate::locks::KeyedLocks;
use crate::parser::{ParsedRow, SourceRow};
use attrium_storage::{get_json, keys, scan_json, KvBackend, StorageError, WriteBatch};
use attrium_types::StagedRecordId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagedStatus {
    Pending,
    Success,
    Fail,
}

impl fmt::Display for StagedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Fail => "fail",
        };
        f.write_str(s)
    }
}

/// A status name other than `pending`, `success` or `fail`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown status {0:?}; expected pending, success or fail")]
pub struct UnknownStatus(pub String);

impl std::str::FromStr for StagedStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "fail" => Ok(Self::Fail),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedImportRecord {
    pub id: StagedRecordId,
    pub resource_type: String,
    pub source_row: SourceRow,
    pub status: StagedStatus,
    /// Failure detail, appended on each failed attempt.
    #[serde(default)]
    pub notes: String,
    pub row_number: u64,
    pub staged_at: DateTime<Utc>,
}

/// Which staged rows [`ImportStagingStore::list`] returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedFilter {
    pub resource_type: Option<String>,
    pub status: Option<StagedStatus>,
}

impl StagedFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn resource(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn status(mut self, status: StagedStatus) -> Self {
        self.status = Some(status);
        self
    }

    fn matches(&self, record: &StagedImportRecord) -> bool {
        self.resource_type
            .as_deref()
            .is_none_or(|t| t == record.resource_type)
            && self.status.is_none_or(|s| s == record.status)
    }
}

pub struct ImportStagingStore {
    backend: Arc<dyn KvBackend>,
    record_locks: KeyedLocks<StagedRecordId>,
}

impl ImportStagingStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            backend,
            record_locks: KeyedLocks::new("staged record"),
        }
    }

    /// Stages rows as `pending` in one batch. Returns their ids in row
    /// order.
    pub fn stage_rows(
        &self,
        resource_type: &str,
        rows: Vec<ParsedRow>,
    ) -> ImportResult<Vec<StagedRecordId>> {
        let staged_at = Utc::now();
        let mut batch = WriteBatch::new();
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let record = StagedImportRecord {
                id: StagedRecordId::new(),
                resource_type: resource_type.to_string(),
                source_row: row.fields,
                status: StagedStatus::Pending,
                notes: String::new(),
                row_number: row.row_number,
                staged_at,
            };
            batch.expect_absent(keys::staged(&record.id));
            batch.put_json(keys::staged(&record.id), &record)?;
            ids.push(record.id);
        }
        self.backend.apply(batch)?;
        debug!(resource_type, rows = ids.len(), "staged rows");
        Ok(ids)
    }

    pub fn find(&self, id: &StagedRecordId) -> ImportResult<Option<StagedImportRecord>> {
        Ok(get_json(self.backend.as_ref(), &keys::staged(id))?)
    }

    /// Removes a committed row.
    pub fn mark_success(&self, id: &StagedRecordId) -> ImportResult<()> {
        self.require(id)?;
        let mut batch = WriteBatch::new();
        batch.expect_present(keys::staged(id)).delete(keys::staged(id));
        self.apply_to_existing(id, batch)
    }

    /// Sets the row to `fail` and appends `note` to its notes.
    pub fn mark_failed(&self, id: &StagedRecordId, note: &str) -> ImportResult<StagedImportRecord> {
        let mut record = self.require(id)?;
        record.status = StagedStatus::Fail;
        if !record.notes.is_empty() {
            record.notes.push_str("\n\n");
        }
        record.notes.push_str(note);

        let mut batch = WriteBatch::new();
        batch
            .expect_present(keys::staged(id))
            .put_json(keys::staged(id), &record)?;
        self.apply_to_existing(id, batch)?;
        Ok(record)
    }

    /// Staged rows matching the filter, oldest stash first, then by row.
    pub fn list(&self, filter: &StagedFilter) -> ImportResult<Vec<StagedImportRecord>> {
        let mut records: Vec<StagedImportRecord> =
            scan_json(self.backend.as_ref(), keys::STAGE_PREFIX)?;
        records.retain(|r| filter.matches(r));
        records.sort_by(|a, b| {
            a.staged_at
                .cmp(&b.staged_at)
                .then(a.row_number.cmp(&b.row_number))
                .then(a.id.cmp(&b.id))
        });
        Ok(records)
    }

    /// Drops a row without committing it. Returns `false` if it was gone.
    pub fn discard(&self, id: &StagedRecordId) -> ImportResult<bool> {
        self.with_record_lock(id, || -> ImportResult<bool> {
            if self.find(id)?.is_none() {
                return Ok(false);
            }
            let mut batch = WriteBatch::new();
            batch.expect_present(keys::staged(id)).delete(keys::staged(id));
            match self.apply_to_existing(id, batch) {
                Err(ImportError::NotFound(_)) => Ok(false),
                other => other.map(|()| true),
            }
        })?
    }

    /// Serializes status transitions of one row.
    pub(crate) fn with_record_lock<R>(
        &self,
        id: &StagedRecordId,
        f: impl FnOnce() -> R,
    ) -> ImportResult<R> {
        self.record_locks.with_lock(id, f)
    }

    /// Applies a batch guarded by `expect_present`. A row removed since it
    /// was read (by another process sharing the backend) is `NotFound`.
    fn apply_to_existing(&self, id: &StagedRecordId, batch: WriteBatch) -> ImportResult<()> {
        match self.backend.apply(batch) {
            Err(StorageError::PersistenceConflict(_)) => {
                Err(ImportError::NotFound(format!("staged record {id}")))
            }
            other => Ok(other?),
        }
    }

    fn require(&self, id: &StagedRecordId) -> ImportResult<StagedImportRecord> {
        self.find(id)?
            .ok_or_else(|| ImportError::NotFound(format!("staged record {id}")))
    }
}
