//! Entity directory: maps an entity type plus natural key to the opaque
//! entity id that values are stored under.

use crate::backend::{get_json, scan_json, WriteBatch};
use crate::context::Shared;
use crate::error::{StorageError, StorageResult};
use crate::keys;
use attrium_types::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One registered entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_type: String,
    pub natural_key: String,
    pub entity_id: EntityId,
    pub created_at: DateTime<Utc>,
}

/// Outcome of looking up a natural key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Existing(EntityRecord),
    /// Not yet registered; the record is only persisted once
    /// [`EntityDirectory::register_in`] is applied.
    New(EntityRecord),
}

impl Resolved {
    pub fn record(&self) -> &EntityRecord {
        match self {
            Self::Existing(r) | Self::New(r) => r,
        }
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.record().entity_id
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::New(_))
    }
}

pub struct EntityDirectory {
    shared: Shared,
}

impl EntityDirectory {
    pub(crate) fn new(shared: Shared) -> Self {
        Self { shared }
    }

    pub fn find(
        &self,
        entity_type: &str,
        natural_key: &str,
    ) -> StorageResult<Option<EntityRecord>> {
        self.shared.catalog.require(entity_type)?;
        get_json(
            self.shared.backend.as_ref(),
            &keys::entity(entity_type, natural_key),
        )
    }

    /// Looks up a natural key without writing anything.
    pub fn resolve(&self, entity_type: &str, natural_key: &str) -> StorageResult<Resolved> {
        if natural_key.trim().is_empty() {
            return Err(StorageError::NotFound(format!(
                "empty natural key for entity type {entity_type}"
            )));
        }
        match self.find(entity_type, natural_key)? {
            Some(record) => Ok(Resolved::Existing(record)),
            None => Ok(Resolved::New(EntityRecord {
                entity_type: entity_type.to_string(),
                natural_key: natural_key.to_string(),
                entity_id: EntityId::generate(),
                created_at: Utc::now(),
            })),
        }
    }

    /// Queues the registration of a new entity. The batch fails with
    /// `PersistenceConflict` if another writer registered the key first.
    pub fn register_in(&self, record: &EntityRecord, batch: &mut WriteBatch) -> StorageResult<()> {
        let key = keys::entity(&record.entity_type, &record.natural_key);
        batch.expect_absent(key.clone()).put_json(key, record)?;
        Ok(())
    }

    /// Returns the registered entity, registering it first if needed.
    pub fn find_or_create(
        &self,
        entity_type: &str,
        natural_key: &str,
    ) -> StorageResult<EntityRecord> {
        let record = match self.resolve(entity_type, natural_key)? {
            Resolved::Existing(record) => return Ok(record),
            Resolved::New(record) => record,
        };

        let mut batch = WriteBatch::new();
        self.register_in(&record, &mut batch)?;
        match self.shared.backend.apply(batch) {
            Ok(()) => {
                debug!(entity_type, natural_key, id = %record.entity_id, "registered entity");
                Ok(record)
            }
            // Lost the race: the winner's record is authoritative.
            Err(StorageError::PersistenceConflict(_)) => self
                .find(entity_type, natural_key)?
                .ok_or_else(|| StorageError::NotFound(format!("{entity_type}/{natural_key}"))),
            Err(e) => Err(e),
        }
    }

    /// Every entity of a type, ordered by natural key.
    pub fn list(&self, entity_type: &str) -> StorageResult<Vec<EntityRecord>> {
        self.shared.catalog.require(entity_type)?;
        scan_json(
            self.shared.backend.as_ref(),
            &keys::entities_of_type(entity_type),
        )
    }

    pub(crate) fn unregister_in(&self, record: &EntityRecord, batch: &mut WriteBatch) {
        batch.delete(keys::entity(&record.entity_type, &record.natural_key));
    }
}
