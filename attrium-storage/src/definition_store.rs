//! Attribute definition storage.
//!
//! Owns every [`AttributeDefinition`]. Mutations are serialized by the
//! schema write lock and audited dirty-only over [`WATCHED_FIELDS`].

use crate::backend::{get_json, scan_json, KvBackend, WriteBatch};
use crate::context::Shared;
use crate::error::{StorageError, StorageResult};
use crate::keys;
use crate::value_store::{AttributeValue, AttributeValueStore};
use attrium_model::{
    is_valid_slug, AttributeDefinition, DefinitionSpec, ValidationErrors, WATCHED_FIELDS,
};
use attrium_types::{dirty_fields, watched_only, AttributeId, AuditEntry};
use chrono::Utc;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Audit subject kind for definitions.
pub const SUBJECT_KIND: &str = "attribute";

/// What to do with stored values when a definition's type changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeMigration {
    /// Re-coerce every stored value into the new type. Fails without
    /// writing anything if any value does not convert.
    Recoerce,
    /// Drop every stored value.
    Discard,
}

pub(crate) fn read_definition(
    backend: &dyn KvBackend,
    id: &AttributeId,
) -> StorageResult<Option<AttributeDefinition>> {
    get_json(backend, &keys::definition(id))
}

pub(crate) fn read_definitions(backend: &dyn KvBackend) -> StorageResult<Vec<AttributeDefinition>> {
    let mut defs: Vec<AttributeDefinition> = scan_json(backend, keys::DEFINITION_PREFIX)?;
    sort_definitions(&mut defs);
    Ok(defs)
}

fn sort_definitions(defs: &mut [AttributeDefinition]) {
    defs.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then_with(|| a.slug.cmp(&b.slug))
    });
}

pub struct AttributeDefinitionStore {
    shared: Shared,
    values: AttributeValueStore,
}

impl AttributeDefinitionStore {
    pub(crate) fn new(shared: Shared) -> Self {
        let values = AttributeValueStore::new(shared.clone());
        Self { shared, values }
    }

    // ── Reads ────────────────────────────────────────────────────

    pub fn get(&self, id: &AttributeId) -> StorageResult<AttributeDefinition> {
        read_definition(self.shared.backend.as_ref(), id)?
            .ok_or_else(|| StorageError::NotFound(format!("attribute {id}")))
    }

    pub fn find_by_slug(
        &self,
        entity_type: &str,
        slug: &str,
    ) -> StorageResult<Option<AttributeDefinition>> {
        Ok(self
            .find_by_entity_type(entity_type)?
            .into_iter()
            .find(|def| def.slug == slug))
    }

    /// Definitions applying to an entity type, by `sort_order` then slug.
    pub fn find_by_entity_type(
        &self,
        entity_type: &str,
    ) -> StorageResult<Vec<AttributeDefinition>> {
        self.shared.catalog.require(entity_type)?;
        Ok(read_definitions(self.shared.backend.as_ref())?
            .into_iter()
            .filter(|def| def.applies_to(entity_type))
            .collect())
    }

    pub fn list(&self) -> StorageResult<Vec<AttributeDefinition>> {
        read_definitions(self.shared.backend.as_ref())
    }

    /// Distinct non-empty groups, sorted.
    pub fn list_groups(&self) -> StorageResult<BTreeSet<String>> {
        Ok(read_definitions(self.shared.backend.as_ref())?
            .into_iter()
            .filter_map(|def| def.group)
            .filter(|group| !group.trim().is_empty())
            .collect())
    }

    // ── Mutations ────────────────────────────────────────────────

    pub fn create(&self, spec: &DefinitionSpec) -> StorageResult<AttributeDefinition> {
        let _schema = self.shared.schema_write()?;

        let slug = spec.resolved_slug();
        let mut def = self.build(AttributeId::new(), slug, spec)?;
        let existing = read_definitions(self.shared.backend.as_ref())?;
        check_slug_unique(&existing, &def)?;

        let now = Utc::now();
        def.created_at = now;
        def.updated_at = now;

        let mut batch = WriteBatch::new();
        batch.put_json(keys::definition(&def.id), &def)?;
        self.shared.backend.apply(batch)?;

        info!(slug = %def.slug, id = %def.id, "created attribute definition");
        self.shared.record(AuditEntry::created(
            &self.shared.actor,
            SUBJECT_KIND,
            def.id.to_string(),
            watched_only(&WATCHED_FIELDS, &def.snapshot()),
        ));
        Ok(def)
    }

    /// Updates a definition. Fails with `ImmutableField` if the change
    /// would invalidate stored values.
    pub fn update(
        &self,
        id: &AttributeId,
        spec: &DefinitionSpec,
    ) -> StorageResult<AttributeDefinition> {
        self.update_inner(id, spec, None)
    }

    /// Updates a definition, migrating stored values if the type or
    /// collection flag changes.
    pub fn update_with_migration(
        &self,
        id: &AttributeId,
        spec: &DefinitionSpec,
        migration: TypeMigration,
    ) -> StorageResult<AttributeDefinition> {
        self.update_inner(id, spec, Some(migration))
    }

    fn update_inner(
        &self,
        id: &AttributeId,
        spec: &DefinitionSpec,
        migration: Option<TypeMigration>,
    ) -> StorageResult<AttributeDefinition> {
        let _schema = self.shared.schema_write()?;

        let current = self.get(id)?;
        let slug = match &spec.slug {
            Some(slug) if !slug.trim().is_empty() => slug.trim().to_string(),
            _ => current.slug.clone(),
        };
        let mut updated = self.build(current.id, slug, spec)?;
        updated.created_at = current.created_at;

        let others: Vec<AttributeDefinition> = read_definitions(self.shared.backend.as_ref())?
            .into_iter()
            .filter(|def| def.id != current.id)
            .collect();
        check_slug_unique(&others, &updated)?;

        let mut batch = WriteBatch::new();
        let stored = self.values.count_for_definition(id)?;
        if stored > 0 {
            if updated.slug != current.slug {
                return Err(StorageError::ImmutableField {
                    field: "slug",
                    reason: format!("{stored} stored values reference {:?}", current.slug),
                });
            }
            for removed in current.entities.difference(&updated.entities) {
                let count = self
                    .shared
                    .backend
                    .count_prefix(&keys::value_index_of_attribute_type(id, removed))?;
                if count > 0 {
                    return Err(StorageError::ImmutableField {
                        field: "entities",
                        reason: format!("{count} values are stored for entity type {removed}"),
                    });
                }
            }

            let shape_changed = updated.type_name != current.type_name
                || updated.is_collection != current.is_collection;
            if shape_changed {
                let field = if updated.type_name != current.type_name {
                    "type"
                } else {
                    "is_collection"
                };
                match migration {
                    None => {
                        return Err(StorageError::ImmutableField {
                            field,
                            reason: format!("{stored} values are stored; supply a migration"),
                        });
                    }
                    Some(TypeMigration::Discard) => {
                        let (cleanup, removed) = self.values.cleanup_for_definition(id)?;
                        batch.extend(cleanup);
                        info!(slug = %current.slug, removed, "discarding values on type change");
                    }
                    Some(TypeMigration::Recoerce) => {
                        batch.extend(self.recoerce_batch(&updated)?);
                    }
                }
            }
        }

        if same_content(&current, &updated) {
            debug!(slug = %current.slug, "definition unchanged");
            return Ok(current);
        }
        updated.updated_at = Utc::now();
        batch.put_json(keys::definition(id), &updated)?;
        self.shared.backend.apply(batch)?;

        info!(slug = %updated.slug, id = %id, "updated attribute definition");
        if let Some((before, after)) =
            dirty_fields(&WATCHED_FIELDS, &current.snapshot(), &updated.snapshot())
        {
            self.shared.record(AuditEntry::updated(
                &self.shared.actor,
                SUBJECT_KIND,
                id.to_string(),
                before,
                after,
            ));
        }
        Ok(updated)
    }

    /// Deletes a definition that owns no values.
    pub fn delete(&self, id: &AttributeId) -> StorageResult<()> {
        let _schema = self.shared.schema_write()?;

        let def = self.get(id)?;
        let count = self.values.count_for_definition(id)?;
        if count > 0 {
            return Err(StorageError::DefinitionInUse {
                slug: def.slug,
                count,
            });
        }

        let mut batch = WriteBatch::new();
        batch.delete(keys::definition(id));
        self.shared.backend.apply(batch)?;
        self.record_deleted(&def);
        Ok(())
    }

    /// Deletes a definition together with every value it owns, in one
    /// batch. Returns the number of values removed.
    pub fn force_delete(&self, id: &AttributeId) -> StorageResult<usize> {
        let _schema = self.shared.schema_write()?;

        let def = self.get(id)?;
        let (mut batch, removed) = self.values.cleanup_for_definition(id)?;
        batch.delete(keys::definition(id));
        self.shared.backend.apply(batch)?;

        info!(slug = %def.slug, removed, "force-deleted attribute definition");
        self.record_deleted(&def);
        Ok(removed)
    }

    // ── Helpers ──────────────────────────────────────────────────

    /// Validates a spec and turns it into a definition with a coerced
    /// default. Nothing is written.
    fn build(
        &self,
        id: AttributeId,
        slug: String,
        spec: &DefinitionSpec,
    ) -> StorageResult<AttributeDefinition> {
        let mut errors = ValidationErrors::new();
        if !is_valid_slug(&slug) {
            errors.add(
                "slug",
                format!("{slug:?} must be lowercase letters, digits, '-' or '_'"),
            );
        }
        if spec.name.values().all(|n| n.trim().is_empty()) {
            errors.add("name", "is required");
        }
        errors.into_result().map_err(attrium_model::ModelError::from)?;

        for entity_type in &spec.entities {
            self.shared.catalog.require(entity_type)?;
        }
        self.shared.registry.resolve(&spec.type_name)?;

        let mut def = AttributeDefinition::from_spec(id, slug, spec);
        def.default = self
            .shared
            .registry
            .check_definition(&def, spec.default.as_ref())?;
        Ok(def)
    }

    /// Rewrites every stored value of a definition under its new shape.
    fn recoerce_batch(&self, updated: &AttributeDefinition) -> StorageResult<WriteBatch> {
        let mut batch = WriteBatch::new();
        let mut errors = ValidationErrors::new();
        for mut record in self.values.records_for_definition(&updated.id)? {
            let raw = record.value.to_raw();
            match self.shared.registry.prepare(updated, &raw) {
                Ok(Some(value)) => {
                    record.value = value;
                    record.updated_at = Utc::now();
                    batch.put_json(record.key(), &record)?;
                }
                Ok(None) => {
                    AttributeValue::delete_in(&record, &mut batch);
                }
                Err(e) => errors.add(
                    format!("{}/{}", record.entity_type, record.entity_id),
                    e.to_string(),
                ),
            }
        }
        errors.into_result().map_err(attrium_model::ModelError::from)?;
        Ok(batch)
    }

    fn record_deleted(&self, def: &AttributeDefinition) {
        self.shared.record(AuditEntry::deleted(
            &self.shared.actor,
            SUBJECT_KIND,
            def.id.to_string(),
            watched_only(&WATCHED_FIELDS, &def.snapshot()),
        ));
    }
}

/// Slugs are unique across the union of entity types: two definitions
/// may share a slug only if they share no entity type.
fn check_slug_unique(
    existing: &[AttributeDefinition],
    candidate: &AttributeDefinition,
) -> StorageResult<()> {
    for other in existing.iter().filter(|d| d.slug == candidate.slug) {
        if let Some(shared) = other.entities.intersection(&candidate.entities).next() {
            return Err(StorageError::DuplicateSlug {
                slug: candidate.slug.clone(),
                entity_type: shared.clone(),
            });
        }
    }
    Ok(())
}

/// Equal apart from bookkeeping timestamps.
fn same_content(a: &AttributeDefinition, b: &AttributeDefinition) -> bool {
    let mut b = b.clone();
    b.created_at = a.created_at;
    b.updated_at = a.updated_at;
    *a == b
}
