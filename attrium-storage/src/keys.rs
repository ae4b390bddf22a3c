//! Key layout shared by every store.
//!
//! ```text
//! def/{attribute}                      definition record
//! val/{entity_type}/{entity}/{attr}    stored value
//! vidx/{attr}/{entity_type}/{entity}   reverse index, value = the val key
//! ent/{entity_type}/{natural_key}      entity directory
//! stage/{record}                       staged import row
//! ```
//!
//! Segments are percent-escaped so a `/` inside an entity id or natural key
//! never splits a key.

use attrium_types::{AttributeId, EntityId, StagedRecordId};

pub const DEFINITION_PREFIX: &str = "def/";
pub const VALUE_PREFIX: &str = "val/";
pub const VALUE_INDEX_PREFIX: &str = "vidx/";
pub const ENTITY_PREFIX: &str = "ent/";
pub const STAGE_PREFIX: &str = "stage/";

/// Escapes `%` and `/` in a single key segment.
pub fn escape(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for c in segment.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            other => out.push(other),
        }
    }
    out
}

/// Reverses [`escape`]. Unknown escapes are kept as-is.
pub fn unescape(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut rest = segment;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with("%25") {
            out.push('%');
            rest = &tail[3..];
        } else if tail.starts_with("%2F") {
            out.push('/');
            rest = &tail[3..];
        } else {
            out.push('%');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

pub fn definition(id: &AttributeId) -> String {
    format!("{DEFINITION_PREFIX}{id}")
}

pub fn value(entity_type: &str, entity_id: &EntityId, attribute: &AttributeId) -> String {
    format!(
        "{VALUE_PREFIX}{}/{}/{attribute}",
        escape(entity_type),
        escape(entity_id.as_str())
    )
}

/// Prefix of every value stored for one entity.
pub fn values_of_entity(entity_type: &str, entity_id: &EntityId) -> String {
    format!(
        "{VALUE_PREFIX}{}/{}/",
        escape(entity_type),
        escape(entity_id.as_str())
    )
}

pub fn value_index(attribute: &AttributeId, entity_type: &str, entity_id: &EntityId) -> String {
    format!(
        "{VALUE_INDEX_PREFIX}{attribute}/{}/{}",
        escape(entity_type),
        escape(entity_id.as_str())
    )
}

/// Prefix of every index entry for one attribute.
pub fn value_index_of_attribute(attribute: &AttributeId) -> String {
    format!("{VALUE_INDEX_PREFIX}{attribute}/")
}

/// Prefix of every index entry for one attribute within one entity type.
pub fn value_index_of_attribute_type(attribute: &AttributeId, entity_type: &str) -> String {
    format!("{VALUE_INDEX_PREFIX}{attribute}/{}/", escape(entity_type))
}

pub fn entity(entity_type: &str, natural_key: &str) -> String {
    format!("{ENTITY_PREFIX}{}/{}", escape(entity_type), escape(natural_key))
}

pub fn entities_of_type(entity_type: &str) -> String {
    format!("{ENTITY_PREFIX}{}/", escape(entity_type))
}

pub fn staged(id: &StagedRecordId) -> String {
    format!("{STAGE_PREFIX}{id}")
}
