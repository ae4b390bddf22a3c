//! Storage layer for Attrium.
//!
//! Persists attribute definitions, typed values and the entity directory
//! over any [`KvBackend`]. Two backends ship: [`MemoryBackend`] for tests
//! and ephemeral runs, and [`SqliteBackend`] for durable storage.
//!
//! # Architecture
//!
//! - Records are JSON documents under a flat key layout (see [`keys`])
//! - Every multi-key write is one atomic [`WriteBatch`]
//! - Definition mutations hold a schema write lock; value writes hold the
//!   read side
//! - Mutations are reported to an injected [`AuditLog`]

mod audit;
mod backend;
mod context;
mod definition_store;
mod directory;
mod error;
pub mod keys;
mod sqlite;
mod value_store;

pub use audit::{AuditLog, MemoryAuditLog, NoopAuditLog, TracingAuditLog};
pub use backend::{get_json, scan_json, KvBackend, MemoryBackend, WriteBatch, WriteOp};
pub use context::DEFAULT_ACTOR;
pub use definition_store::{AttributeDefinitionStore, TypeMigration};
pub use directory::{EntityDirectory, EntityRecord, Resolved};
pub use error::{StorageError, StorageResult};
pub use sqlite::SqliteBackend;
pub use value_store::{AttributeValue, AttributeValueStore};

use attrium_model::{EntityCatalog, RawValue, TypeRegistry};
use attrium_types::{AttributeId, AuditEntry, Snapshot};
use context::Shared;
use std::sync::Arc;
use tracing::info;

/// Outcome of [`AttributeStores::upsert_entity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityUpsert {
    pub entity: EntityRecord,
    pub created: bool,
}

/// The definition store, value store and entity directory over one
/// backend, sharing a registry, catalog, audit sink and schema lock.
pub struct AttributeStores {
    pub definitions: AttributeDefinitionStore,
    pub values: AttributeValueStore,
    pub directory: EntityDirectory,
    shared: Shared,
}

impl AttributeStores {
    pub fn new(
        backend: Arc<dyn KvBackend>,
        registry: Arc<TypeRegistry>,
        catalog: Arc<EntityCatalog>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self::from_shared(Shared::new(backend, registry, catalog, audit))
    }

    /// Stores over a fresh [`MemoryBackend`].
    pub fn in_memory(
        registry: Arc<TypeRegistry>,
        catalog: Arc<EntityCatalog>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), registry, catalog, audit)
    }

    fn from_shared(shared: Shared) -> Self {
        Self {
            definitions: AttributeDefinitionStore::new(shared.clone()),
            values: AttributeValueStore::new(shared.clone()),
            directory: EntityDirectory::new(shared.clone()),
            shared,
        }
    }

    /// The same stores, recording `actor` in every audit entry.
    pub fn acting_as(&self, actor: &str) -> Self {
        Self::from_shared(self.shared.with_actor(actor))
    }

    pub fn actor(&self) -> &str {
        &self.shared.actor
    }

    pub fn backend(&self) -> Arc<dyn KvBackend> {
        Arc::clone(&self.shared.backend)
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.shared.registry
    }

    pub fn catalog(&self) -> &EntityCatalog {
        &self.shared.catalog
    }

    pub fn audit(&self) -> Arc<dyn AuditLog> {
        Arc::clone(&self.shared.audit)
    }

    /// Finds or registers the entity behind a natural key and writes its
    /// attributes, all in one batch.
    ///
    /// A newly registered entity must end up with every required attribute
    /// satisfied by a value or a default; otherwise nothing is written.
    pub fn upsert_entity(
        &self,
        entity_type: &str,
        natural_key: &str,
        fields: &[(AttributeId, RawValue)],
    ) -> StorageResult<EntityUpsert> {
        let _schema = self.shared.schema_read()?;

        let resolved = self.directory.resolve(entity_type, natural_key)?;
        let prepared = self
            .values
            .prepare_many(entity_type, resolved.entity_id(), fields)?;

        let mut batch = WriteBatch::new();
        if let Resolved::New(record) = &resolved {
            self.values.check_required(&prepared)?;
            self.directory.register_in(record, &mut batch)?;
        }
        self.values.commit(prepared, batch)?;

        let created = resolved.is_new();
        let entity = match resolved {
            Resolved::Existing(record) | Resolved::New(record) => record,
        };
        if created {
            self.shared.record(AuditEntry::created(
                &self.shared.actor,
                "entity",
                format!("{entity_type}/{natural_key}"),
                entity_snapshot(&entity),
            ));
        }
        Ok(EntityUpsert { entity, created })
    }

    /// Removes an entity from the directory together with all its values.
    /// Returns `false` if the natural key was not registered.
    pub fn delete_entity(&self, entity_type: &str, natural_key: &str) -> StorageResult<bool> {
        let _schema = self.shared.schema_read()?;

        let Some(entity) = self.directory.find(entity_type, natural_key)? else {
            return Ok(false);
        };
        let (mut batch, removed) = self
            .values
            .cleanup_for_entity(entity_type, &entity.entity_id)?;
        self.directory.unregister_in(&entity, &mut batch);
        self.shared.backend.apply(batch)?;

        info!(entity_type, natural_key, values = removed.len(), "deleted entity");
        self.values.record_removed(&removed);
        self.shared.record(AuditEntry::deleted(
            &self.shared.actor,
            "entity",
            format!("{entity_type}/{natural_key}"),
            entity_snapshot(&entity),
        ));
        Ok(true)
    }
}

fn entity_snapshot(entity: &EntityRecord) -> Snapshot {
    let mut snapshot = Snapshot::new();
    snapshot.insert(
        "entity_id".to_string(),
        serde_json::Value::String(entity.entity_id.to_string()),
    );
    snapshot
}
