use crate::error::{ModelError, ModelResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An entity type that can own attribute values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityKind {
    /// Discriminator stored alongside every entity id (e.g. `"product"`).
    pub name: String,
    /// Column that identifies an existing entity during import.
    #[serde(default = "default_natural_key")]
    pub natural_key: String,
}

fn default_natural_key() -> String {
    "key".to_string()
}

impl EntityKind {
    pub fn new(name: impl Into<String>, natural_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            natural_key: natural_key.into(),
        }
    }
}

/// The closed set of entity types known to this process.
///
/// Built once at startup from configuration and shared by handle, so
/// tests can swap in their own set.
#[derive(Debug, Clone, Default)]
pub struct EntityCatalog {
    kinds: BTreeMap<String, EntityKind>,
}

impl EntityCatalog {
    pub fn new(kinds: impl IntoIterator<Item = EntityKind>) -> Self {
        Self {
            kinds: kinds.into_iter().map(|k| (k.name.clone(), k)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&EntityKind> {
        self.kinds.get(name)
    }

    /// Fails with `InvalidEntityType` for names outside the catalog.
    pub fn require(&self, name: &str) -> ModelResult<&EntityKind> {
        self.get(name)
            .ok_or_else(|| ModelError::InvalidEntityType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &EntityKind> {
        self.kinds.values()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
