//! Attribute value storage.
//!
//! Every write resolves the owning definition, coerces the raw input
//! through the [`TypeRegistry`](attrium_model::TypeRegistry) and lands in a
//! single atomic batch together with its reverse-index entry.

use crate::backend::{get_json, scan_json, WriteBatch};
use crate::context::Shared;
use crate::definition_store::{read_definition, read_definitions};
use crate::error::{StorageError, StorageResult};
use crate::keys;
use attrium_model::{AttributeDefinition, ModelError, RawValue, StoredValue, ValidationErrors};
use attrium_types::{dirty_fields, AttributeId, AuditEntry, EntityId, Snapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Audit subject kind for values.
pub const SUBJECT_KIND: &str = "attribute_value";

/// One stored (entity, attribute) value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeValue {
    pub entity_type: String,
    pub entity_id: EntityId,
    pub attribute_id: AttributeId,
    pub value: StoredValue,
    pub updated_at: DateTime<Utc>,
}

impl AttributeValue {
    pub(crate) fn key(&self) -> String {
        keys::value(&self.entity_type, &self.entity_id, &self.attribute_id)
    }

    pub(crate) fn index_key(&self) -> String {
        keys::value_index(&self.attribute_id, &self.entity_type, &self.entity_id)
    }

    /// Queues removal of the value and its index entry.
    pub(crate) fn delete_in(record: &AttributeValue, batch: &mut WriteBatch) {
        batch.delete(record.key()).delete(record.index_key());
    }
}

/// A coerced and validated write that has not been applied yet.
#[derive(Debug)]
pub(crate) struct PreparedWrite {
    definition: AttributeDefinition,
    before: Option<StoredValue>,
    after: Option<StoredValue>,
}

/// Writes for one entity, ready to commit as a single batch.
#[derive(Debug)]
pub(crate) struct PreparedValues {
    entity_type: String,
    entity_id: EntityId,
    writes: Vec<PreparedWrite>,
}

impl PreparedValues {
    /// Whether this batch leaves a non-empty value for the attribute.
    pub(crate) fn provides(&self, attribute_id: &AttributeId) -> bool {
        self.writes.iter().any(|w| {
            w.definition.id == *attribute_id && w.after.as_ref().is_some_and(|v| !v.is_empty())
        })
    }
}

pub struct AttributeValueStore {
    shared: Shared,
}

impl AttributeValueStore {
    pub(crate) fn new(shared: Shared) -> Self {
        Self { shared }
    }

    // ── Reads ────────────────────────────────────────────────────

    /// The stored value, else the definition's default, else `None`.
    pub fn get(
        &self,
        entity_type: &str,
        entity_id: &EntityId,
        attribute_id: &AttributeId,
    ) -> StorageResult<Option<StoredValue>> {
        let def = self.applicable_definition(entity_type, attribute_id)?;
        let stored = self.stored(entity_type, entity_id, attribute_id)?;
        Ok(stored.or(def.default))
    }

    /// Every applicable attribute with a stored or default value, by slug.
    pub fn values_for_entity(
        &self,
        entity_type: &str,
        entity_id: &EntityId,
    ) -> StorageResult<BTreeMap<String, StoredValue>> {
        self.shared.catalog.require(entity_type)?;
        let mut out = BTreeMap::new();
        for def in read_definitions(self.shared.backend.as_ref())? {
            if !def.applies_to(entity_type) {
                continue;
            }
            if let Some(value) = self.stored(entity_type, entity_id, &def.id)?.or(def.default) {
                out.insert(def.slug, value);
            }
        }
        Ok(out)
    }

    pub fn count_for_definition(&self, attribute_id: &AttributeId) -> StorageResult<usize> {
        self.shared
            .backend
            .count_prefix(&keys::value_index_of_attribute(attribute_id))
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Replaces the value. Empty input clears it (if the attribute is not
    /// required).
    pub fn set(
        &self,
        entity_type: &str,
        entity_id: &EntityId,
        attribute_id: &AttributeId,
        raw: &RawValue,
    ) -> StorageResult<()> {
        let _schema = self.shared.schema_read()?;
        let def = self.applicable_definition(entity_type, attribute_id)?;
        let after = self.shared.registry.prepare(&def, raw)?;
        let before = self.stored(entity_type, entity_id, attribute_id)?;
        let prepared = PreparedValues {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.clone(),
            writes: vec![PreparedWrite {
                definition: def,
                before,
                after,
            }],
        };
        self.commit(prepared, WriteBatch::new())
    }

    /// Adds values to the end of a collection attribute.
    pub fn append(
        &self,
        entity_type: &str,
        entity_id: &EntityId,
        attribute_id: &AttributeId,
        raw: &RawValue,
    ) -> StorageResult<()> {
        let _schema = self.shared.schema_read()?;
        let def = self.applicable_definition(entity_type, attribute_id)?;
        if !def.is_collection {
            return Err(ModelError::from(ValidationErrors::single(
                &def.slug,
                "is not a collection",
            ))
            .into());
        }

        let before = self.stored(entity_type, entity_id, attribute_id)?;
        let mut items = before
            .as_ref()
            .map(|v| v.values().to_vec())
            .unwrap_or_default();
        if let Some(added) = self.shared.registry.coerce(&def, raw)? {
            items.extend(added.values().iter().cloned());
        }
        let after = (!items.is_empty()).then_some(StoredValue::List(items));
        self.shared.registry.validate(&def, after.as_ref())?;

        let prepared = PreparedValues {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.clone(),
            writes: vec![PreparedWrite {
                definition: def,
                before,
                after,
            }],
        };
        self.commit(prepared, WriteBatch::new())
    }

    /// Sets several attributes of one entity atomically.
    ///
    /// Every field is coerced and validated before anything is written;
    /// failures from all fields are reported together as a validation
    /// error keyed by slug.
    pub fn set_many(
        &self,
        entity_type: &str,
        entity_id: &EntityId,
        fields: &[(AttributeId, RawValue)],
    ) -> StorageResult<()> {
        let _schema = self.shared.schema_read()?;
        let prepared = self.prepare_many(entity_type, entity_id, fields)?;
        self.commit(prepared, WriteBatch::new())
    }

    /// Removes every value of an entity. Returns how many were removed.
    pub fn delete_for_entity(
        &self,
        entity_type: &str,
        entity_id: &EntityId,
    ) -> StorageResult<usize> {
        let _schema = self.shared.schema_read()?;
        self.shared.catalog.require(entity_type)?;
        let (batch, removed) = self.cleanup_for_entity(entity_type, entity_id)?;
        self.shared.backend.apply(batch)?;
        self.record_removed(&removed);
        Ok(removed.len())
    }

    /// Removes every value of a definition. Returns how many were removed.
    pub fn delete_for_definition(&self, attribute_id: &AttributeId) -> StorageResult<usize> {
        let _schema = self.shared.schema_read()?;
        let (batch, removed) = self.cleanup_for_definition(attribute_id)?;
        self.shared.backend.apply(batch)?;
        debug!(attribute = %attribute_id, removed, "deleted values for definition");
        Ok(removed)
    }

    // ── Crate-internal building blocks ───────────────────────────
    //
    // Callers hold the schema lock for the span between preparing and
    // committing.

    pub(crate) fn prepare_many(
        &self,
        entity_type: &str,
        entity_id: &EntityId,
        fields: &[(AttributeId, RawValue)],
    ) -> StorageResult<PreparedValues> {
        let mut errors = ValidationErrors::new();
        let mut writes: Vec<PreparedWrite> = Vec::with_capacity(fields.len());

        for (attribute_id, raw) in fields {
            let def = self.applicable_definition(entity_type, attribute_id)?;
            let after = match self.shared.registry.prepare(&def, raw) {
                Ok(value) => value,
                Err(ModelError::Validation(e)) => {
                    errors.merge(e);
                    continue;
                }
                Err(ModelError::Coercion(e)) => {
                    errors.add(&def.slug, e.to_string());
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let before = self.stored(entity_type, entity_id, attribute_id)?;
            writes.retain(|w| w.definition.id != *attribute_id);
            writes.push(PreparedWrite {
                definition: def,
                before,
                after,
            });
        }

        errors.into_result().map_err(ModelError::from)?;
        Ok(PreparedValues {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.clone(),
            writes,
        })
    }

    /// Checks that every required attribute of the entity type would end
    /// up with a value or a default.
    pub(crate) fn check_required(&self, prepared: &PreparedValues) -> StorageResult<()> {
        let mut errors = ValidationErrors::new();
        for def in read_definitions(self.shared.backend.as_ref())? {
            if def.is_required
                && def.applies_to(&prepared.entity_type)
                && def.default.is_none()
                && !prepared.provides(&def.id)
            {
                errors.add(&def.slug, "is required");
            }
        }
        errors.into_result().map_err(ModelError::from)?;
        Ok(())
    }

    /// Applies prepared writes plus any extra operations in one batch,
    /// then records audit entries for the values that changed.
    pub(crate) fn commit(
        &self,
        prepared: PreparedValues,
        mut batch: WriteBatch,
    ) -> StorageResult<()> {
        let now = Utc::now();
        for write in &prepared.writes {
            let record_key =
                keys::value(&prepared.entity_type, &prepared.entity_id, &write.definition.id);
            let index_key =
                keys::value_index(&write.definition.id, &prepared.entity_type, &prepared.entity_id);
            match &write.after {
                Some(value) => {
                    let record = AttributeValue {
                        entity_type: prepared.entity_type.clone(),
                        entity_id: prepared.entity_id.clone(),
                        attribute_id: write.definition.id,
                        value: value.clone(),
                        updated_at: now,
                    };
                    batch.put_json(record_key.clone(), &record)?;
                    batch.put(index_key, record_key);
                }
                None => {
                    batch.delete(record_key).delete(index_key);
                }
            }
        }
        self.shared.backend.apply(batch)?;

        for write in &prepared.writes {
            let subject = format!(
                "{}/{}/{}",
                prepared.entity_type, prepared.entity_id, write.definition.slug
            );
            let before = value_snapshot(write.before.as_ref());
            let after = value_snapshot(write.after.as_ref());
            if let Some((before, after)) = dirty_fields(&["value"], &before, &after) {
                let actor = &self.shared.actor;
                let entry = match (&write.before, &write.after) {
                    (None, Some(_)) => AuditEntry::created(actor, SUBJECT_KIND, subject, after),
                    (Some(_), None) => AuditEntry::deleted(actor, SUBJECT_KIND, subject, before),
                    _ => AuditEntry::updated(actor, SUBJECT_KIND, subject, before, after),
                };
                self.shared.record(entry);
            }
        }
        debug!(
            entity_type = %prepared.entity_type,
            entity = %prepared.entity_id,
            fields = prepared.writes.len(),
            "committed values"
        );
        Ok(())
    }

    pub(crate) fn records_for_definition(
        &self,
        attribute_id: &AttributeId,
    ) -> StorageResult<Vec<AttributeValue>> {
        let mut records = Vec::new();
        for (_, value_key) in self
            .shared
            .backend
            .scan_prefix(&keys::value_index_of_attribute(attribute_id))?
        {
            if let Some(record) = get_json(self.shared.backend.as_ref(), &value_key)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Batch deleting every value of a definition, and how many it removes.
    pub(crate) fn cleanup_for_definition(
        &self,
        attribute_id: &AttributeId,
    ) -> StorageResult<(WriteBatch, usize)> {
        let mut batch = WriteBatch::new();
        let index = self
            .shared
            .backend
            .scan_prefix(&keys::value_index_of_attribute(attribute_id))?;
        for (index_key, value_key) in &index {
            batch.delete(value_key.clone()).delete(index_key.clone());
        }
        Ok((batch, index.len()))
    }

    pub(crate) fn cleanup_for_entity(
        &self,
        entity_type: &str,
        entity_id: &EntityId,
    ) -> StorageResult<(WriteBatch, Vec<AttributeValue>)> {
        let mut batch = WriteBatch::new();
        let records: Vec<AttributeValue> = scan_json(
            self.shared.backend.as_ref(),
            &keys::values_of_entity(entity_type, entity_id),
        )?;
        for record in &records {
            AttributeValue::delete_in(record, &mut batch);
        }
        Ok((batch, records))
    }

    pub(crate) fn record_removed(&self, removed: &[AttributeValue]) {
        for record in removed {
            // Subjects name the slug like every other value entry; the id
            // stands in if the definition cannot be read.
            let slug = read_definition(self.shared.backend.as_ref(), &record.attribute_id)
                .ok()
                .flatten()
                .map(|def| def.slug)
                .unwrap_or_else(|| record.attribute_id.to_string());
            self.shared.record(AuditEntry::deleted(
                &self.shared.actor,
                SUBJECT_KIND,
                format!("{}/{}/{slug}", record.entity_type, record.entity_id),
                value_snapshot(Some(&record.value)),
            ));
        }
    }

    // ── Helpers ──────────────────────────────────────────────────

    fn stored(
        &self,
        entity_type: &str,
        entity_id: &EntityId,
        attribute_id: &AttributeId,
    ) -> StorageResult<Option<StoredValue>> {
        let record: Option<AttributeValue> = get_json(
            self.shared.backend.as_ref(),
            &keys::value(entity_type, entity_id, attribute_id),
        )?;
        Ok(record.map(|r| r.value))
    }

    /// The definition, if it exists and applies to the entity type.
    fn applicable_definition(
        &self,
        entity_type: &str,
        attribute_id: &AttributeId,
    ) -> StorageResult<AttributeDefinition> {
        self.shared.catalog.require(entity_type)?;
        let def = read_definition(self.shared.backend.as_ref(), attribute_id)?
            .ok_or_else(|| StorageError::NotFound(format!("attribute {attribute_id}")))?;
        if !def.applies_to(entity_type) {
            return Err(StorageError::NotFound(format!(
                "attribute {} does not apply to {entity_type}",
                def.slug
            )));
        }
        Ok(def)
    }
}

fn value_snapshot(value: Option<&StoredValue>) -> Snapshot {
    let mut snapshot = Snapshot::new();
    let json = value
        .and_then(|v| serde_json::to_value(v).ok())
        .unwrap_or(serde_json::Value::Null);
    snapshot.insert("value".to_string(), json);
    snapshot
}
