//! Audit entries for schema and value mutations.
//!
//! An entry captures who changed what, together with before/after
//! snapshots of the changed fields. Entries are immutable once built and
//! are handed to an audit sink that the core never waits on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A snapshot of named fields, serialized as a JSON object.
pub type Snapshot = Map<String, Value>;

/// Unique identifier for an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditEntryId(Uuid);

impl AuditEntryId {
    /// Creates a new audit entry ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for AuditEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AuditEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AuditEntryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// What happened to the audited subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Updated,
    Deleted,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// A single audited mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique identifier for this entry.
    pub id: AuditEntryId,

    /// Who performed the mutation.
    pub actor: String,

    /// Kind of the mutated subject (e.g. `"attribute"`, `"attribute_value"`).
    pub subject_kind: String,

    /// Identifier of the mutated subject within its kind.
    pub subject_id: String,

    /// The operation performed.
    pub action: AuditAction,

    /// Changed fields before the mutation. `None` on creation.
    pub before: Option<Snapshot>,

    /// Changed fields after the mutation. `None` on deletion.
    pub after: Option<Snapshot>,

    /// When the mutation was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Creates a new audit entry.
    #[must_use]
    pub fn new(
        actor: impl Into<String>,
        subject_kind: impl Into<String>,
        subject_id: impl Into<String>,
        action: AuditAction,
        before: Option<Snapshot>,
        after: Option<Snapshot>,
    ) -> Self {
        Self {
            id: AuditEntryId::new(),
            actor: actor.into(),
            subject_kind: subject_kind.into(),
            subject_id: subject_id.into(),
            action,
            before,
            after,
            recorded_at: Utc::now(),
        }
    }

    /// Creates an entry for a newly created subject.
    #[must_use]
    pub fn created(
        actor: impl Into<String>,
        subject_kind: impl Into<String>,
        subject_id: impl Into<String>,
        after: Snapshot,
    ) -> Self {
        Self::new(actor, subject_kind, subject_id, AuditAction::Created, None, Some(after))
    }

    /// Creates an entry for an updated subject.
    #[must_use]
    pub fn updated(
        actor: impl Into<String>,
        subject_kind: impl Into<String>,
        subject_id: impl Into<String>,
        before: Snapshot,
        after: Snapshot,
    ) -> Self {
        Self::new(
            actor,
            subject_kind,
            subject_id,
            AuditAction::Updated,
            Some(before),
            Some(after),
        )
    }

    /// Creates an entry for a deleted subject.
    #[must_use]
    pub fn deleted(
        actor: impl Into<String>,
        subject_kind: impl Into<String>,
        subject_id: impl Into<String>,
        before: Snapshot,
    ) -> Self {
        Self::new(actor, subject_kind, subject_id, AuditAction::Deleted, Some(before), None)
    }
}

/// Computes the dirty-only pair of snapshots for an update.
///
/// Only keys listed in `watched` are compared. Returns `None` when none of
/// them changed, so unchanged writes produce no audit entry.
pub fn dirty_fields(
    watched: &[&str],
    before: &Snapshot,
    after: &Snapshot,
) -> Option<(Snapshot, Snapshot)> {
    let mut old = Snapshot::new();
    let mut new = Snapshot::new();
    for field in watched {
        let b = before.get(*field).unwrap_or(&Value::Null);
        let a = after.get(*field).unwrap_or(&Value::Null);
        if a != b {
            old.insert((*field).to_string(), b.clone());
            new.insert((*field).to_string(), a.clone());
        }
    }
    if new.is_empty() { None } else { Some((old, new)) }
}

/// Restricts a snapshot to the watched keys.
pub fn watched_only(watched: &[&str], snapshot: &Snapshot) -> Snapshot {
    watched
        .iter()
        .filter_map(|field| {
            snapshot
                .get(*field)
                .map(|value| ((*field).to_string(), value.clone()))
        })
        .collect()
}
