//! Import resources: what a staged row turns into when it is committed.

use crate::error::{ImportError, ImportResult};
use crate::parser::SourceRow;
use attrium_model::{
    AttributeDefinition, BooleanHandler, DefinitionSpec, EntityKind, RawValue, TypeHandler,
    TypedValue, ValidationErrors, DEFAULT_LOCALE, WATCHED_FIELDS,
};
use attrium_storage::AttributeStores;
use attrium_types::AttributeId;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Everything a resource may touch while committing one row.
pub struct CommitContext<'a> {
    pub stores: &'a AttributeStores,
    /// Separator between items of a collection cell.
    pub list_separator: char,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Created { subject: String },
    Updated { subject: String },
}

/// A kind of record that rows can be imported into.
pub trait ImportResource: Send + Sync {
    /// Name rows are staged under.
    fn resource_type(&self) -> &str;

    /// Column identifying an existing record.
    fn natural_key(&self) -> &str;

    /// Columns the resource accepts, natural key included. Anything else
    /// in a row is dropped before `commit` sees it.
    fn fillable(&self, stores: &AttributeStores) -> ImportResult<BTreeSet<String>>;

    /// Finds the record by natural key, creating it if needed, and writes
    /// the row's fields.
    fn commit(&self, ctx: &CommitContext<'_>, row: &SourceRow) -> ImportResult<CommitOutcome>;
}

/// The trimmed natural key of a row, or a validation error naming the
/// column.
pub fn natural_key_value<'a>(
    resource: &dyn ImportResource,
    row: &'a SourceRow,
) -> ImportResult<&'a str> {
    match row.get(resource.natural_key()).map(str::trim) {
        Some(key) if !key.is_empty() => Ok(key),
        _ => Err(ValidationErrors::single(resource.natural_key(), "is required").into()),
    }
}

// ── Attribute definitions ────────────────────────────────────────

/// Rows are attribute definitions, keyed by slug.
///
/// `entities` and `options` cells are lists; `name` and `description`
/// land under the default locale. Columns missing from the row keep the
/// existing definition's values.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefinitionResource;

impl DefinitionResource {
    pub const RESOURCE_TYPE: &'static str = "attribute";

    fn spec_from_row(
        base: DefinitionSpec,
        row: &SourceRow,
        separator: char,
    ) -> Result<DefinitionSpec, ValidationErrors> {
        let mut spec = base;
        let mut errors = ValidationErrors::new();
        let list = |cell: &str| -> Vec<String> {
            cell.split(separator)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        };

        for (column, cell) in row.iter() {
            let trimmed = cell.trim();
            match column {
                "slug" => spec.slug = Some(trimmed.to_string()),
                "name" => {
                    spec.name.insert(DEFAULT_LOCALE.to_string(), trimmed.to_string());
                }
                "description" => {
                    spec.description
                        .insert(DEFAULT_LOCALE.to_string(), trimmed.to_string());
                }
                "sort_order" if trimmed.is_empty() => spec.sort_order = 0,
                "sort_order" => match trimmed.parse() {
                    Ok(n) => spec.sort_order = n,
                    Err(_) => errors.add("sort_order", format!("{trimmed:?} is not an integer")),
                },
                "group" => spec.group = (!trimmed.is_empty()).then(|| trimmed.to_string()),
                "type" => spec.type_name = trimmed.to_string(),
                "entities" => spec.entities = list(cell).into_iter().collect(),
                "options" => spec.options = list(cell),
                "is_required" | "is_collection" => {
                    let flag = if trimmed.is_empty() {
                        Ok(false)
                    } else {
                        match BooleanHandler.coerce(trimmed) {
                            Ok(TypedValue::Boolean(b)) => Ok(b),
                            _ => Err(format!("{trimmed:?} is not a boolean")),
                        }
                    };
                    match (column, flag) {
                        ("is_required", Ok(b)) => spec.is_required = b,
                        (_, Ok(b)) => spec.is_collection = b,
                        (field, Err(reason)) => errors.add(field, reason),
                    }
                }
                "default" => spec.default = (!trimmed.is_empty()).then(|| cell.to_string().into()),
                _ => {}
            }
        }

        // A collection default is a list cell too.
        if spec.is_collection {
            if let Some(RawValue::One(cell)) = &spec.default {
                spec.default = Some(RawValue::Many(list(cell)));
            }
        }
        errors.into_result().map(|()| spec)
    }

    /// The definition this row updates: the one with the slug whose entity
    /// types overlap the row's, or the only one with the slug.
    fn existing(
        stores: &AttributeStores,
        slug: &str,
        entities: &BTreeSet<String>,
    ) -> ImportResult<Option<AttributeDefinition>> {
        let candidates: Vec<AttributeDefinition> = stores
            .definitions
            .list()?
            .into_iter()
            .filter(|def| def.slug == slug)
            .collect();
        if let Some(def) = candidates
            .iter()
            .find(|def| def.entities.intersection(entities).next().is_some())
        {
            return Ok(Some(def.clone()));
        }
        match candidates.len() {
            1 if entities.is_empty() => Ok(candidates.into_iter().next()),
            0 | 1 => Ok(None),
            n => Err(ImportError::SchemaMismatch(format!(
                "slug {slug:?} matches {n} definitions; add an entities column"
            ))),
        }
    }
}

impl ImportResource for DefinitionResource {
    fn resource_type(&self) -> &str {
        Self::RESOURCE_TYPE
    }

    fn natural_key(&self) -> &str {
        "slug"
    }

    fn fillable(&self, _stores: &AttributeStores) -> ImportResult<BTreeSet<String>> {
        let mut fields: BTreeSet<String> = WATCHED_FIELDS.iter().map(|f| f.to_string()).collect();
        fields.insert("options".to_string());
        Ok(fields)
    }

    fn commit(&self, ctx: &CommitContext<'_>, row: &SourceRow) -> ImportResult<CommitOutcome> {
        let slug = natural_key_value(self, row)?.to_string();
        let row_entities: BTreeSet<String> = row
            .get("entities")
            .map(|cell| {
                cell.split(ctx.list_separator)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        match Self::existing(ctx.stores, &slug, &row_entities)? {
            Some(current) => {
                let spec = Self::spec_from_row(current.to_spec(), row, ctx.list_separator)?;
                let updated = ctx.stores.definitions.update(&current.id, &spec)?;
                debug!(slug = %updated.slug, "updated definition from import");
                Ok(CommitOutcome::Updated {
                    subject: updated.id.to_string(),
                })
            }
            None => {
                let spec = Self::spec_from_row(DefinitionSpec::default(), row, ctx.list_separator)?;
                let created = ctx.stores.definitions.create(&spec)?;
                debug!(slug = %created.slug, "created definition from import");
                Ok(CommitOutcome::Created {
                    subject: created.id.to_string(),
                })
            }
        }
    }
}

// ── Entities ─────────────────────────────────────────────────────

/// Rows are entities of one catalogued type; columns other than the
/// natural key are attribute slugs.
#[derive(Debug, Clone)]
pub struct EntityResource {
    kind: EntityKind,
}

impl EntityResource {
    pub fn new(kind: EntityKind) -> Self {
        Self { kind }
    }
}

impl ImportResource for EntityResource {
    fn resource_type(&self) -> &str {
        &self.kind.name
    }

    fn natural_key(&self) -> &str {
        &self.kind.natural_key
    }

    fn fillable(&self, stores: &AttributeStores) -> ImportResult<BTreeSet<String>> {
        let mut fields: BTreeSet<String> = stores
            .definitions
            .find_by_entity_type(&self.kind.name)?
            .into_iter()
            .map(|def| def.slug)
            .collect();
        fields.insert(self.kind.natural_key.clone());
        Ok(fields)
    }

    fn commit(&self, ctx: &CommitContext<'_>, row: &SourceRow) -> ImportResult<CommitOutcome> {
        let key = natural_key_value(self, row)?;
        let definitions: BTreeMap<String, AttributeDefinition> = ctx
            .stores
            .definitions
            .find_by_entity_type(&self.kind.name)?
            .into_iter()
            .map(|def| (def.slug.clone(), def))
            .collect();

        let mut fields: Vec<(AttributeId, RawValue)> = Vec::new();
        for (column, cell) in row.iter() {
            // The natural key column is written too when it is also an
            // attribute. Other non-attribute columns, including ones dropped
            // by a schema change since fillable was computed, are skipped.
            let Some(def) = definitions.get(column) else {
                continue;
            };
            let raw = if def.is_collection {
                RawValue::Many(
                    cell.split(ctx.list_separator)
                        .map(|part| part.trim().to_string())
                        .collect(),
                )
            } else {
                RawValue::from(cell)
            };
            fields.push((def.id, raw));
        }

        let upsert = ctx.stores.upsert_entity(&self.kind.name, key, &fields)?;
        let subject = format!("{}/{}", self.kind.name, upsert.entity.entity_id);
        if upsert.created {
            Ok(CommitOutcome::Created { subject })
        } else {
            Ok(CommitOutcome::Updated { subject })
        }
    }
}
