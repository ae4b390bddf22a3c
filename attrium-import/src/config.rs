//! Process configuration, read from TOML.
//!
//! ```toml
//! [storage]
//! path = "data/attrium.db"      # omit for an in-memory backend
//!
//! [audit]
//! actor = "importer"
//!
//! [import]
//! delimiter = ","
//! list_separator = "|"
//! workers = 4
//! stage_chunk_size = 500
//!
//! [[entity_types]]
//! name = "product"
//! natural_key = "sku"
//! ```

use crate::error::{ImportError, ImportResult};
use crate::resource::DefinitionResource;
use attrium_model::{EntityCatalog, EntityKind, TypeRegistry};
use attrium_storage::{
    AttributeStores, AuditLog, KvBackend, MemoryBackend, SqliteBackend, DEFAULT_ACTOR,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttriumConfig {
    pub storage: StorageConfig,
    pub audit: AuditConfig,
    pub import: ImportConfig,
    pub entity_types: Vec<EntityKind>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file. `None` keeps everything in memory.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub actor: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            actor: DEFAULT_ACTOR.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Field delimiter of source files. Must be ASCII.
    pub delimiter: char,
    /// Separator between items of a collection cell.
    pub list_separator: char,
    /// Threads used by hoard. Rows sharing a natural key always run on
    /// the same thread, in selection order.
    pub workers: usize,
    /// Rows staged per batch; the cancel flag is checked between batches.
    pub stage_chunk_size: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            delimiter: ',',
            list_separator: '|',
            workers: 1,
            stage_chunk_size: 500,
        }
    }
}

impl ImportConfig {
    pub fn validate(&self) -> ImportResult<()> {
        if !self.delimiter.is_ascii() {
            return Err(ImportError::Config(format!(
                "delimiter {:?} is not ASCII",
                self.delimiter
            )));
        }
        if self.delimiter == self.list_separator {
            return Err(ImportError::Config(
                "delimiter and list_separator must differ".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(ImportError::Config("workers must be at least 1".to_string()));
        }
        if self.stage_chunk_size == 0 {
            return Err(ImportError::Config(
                "stage_chunk_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The delimiter as the byte the CSV reader expects.
    pub(crate) fn delimiter_byte(&self) -> u8 {
        let mut buf = [0u8; 4];
        self.delimiter.encode_utf8(&mut buf);
        buf[0]
    }
}

impl AttriumConfig {
    /// Loads and validates a config file.
    pub fn load(path: &Path) -> ImportResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> ImportResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| ImportError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ImportResult<()> {
        self.import.validate()?;
        for kind in &self.entity_types {
            if kind.name.trim().is_empty() || kind.natural_key.trim().is_empty() {
                return Err(ImportError::Config(
                    "entity types need a name and a natural_key".to_string(),
                ));
            }
            if kind.name == DefinitionResource::RESOURCE_TYPE {
                return Err(ImportError::Config(format!(
                    "entity type name {:?} is reserved for attribute definitions",
                    kind.name
                )));
            }
        }
        Ok(())
    }

    pub fn catalog(&self) -> EntityCatalog {
        EntityCatalog::new(self.entity_types.iter().cloned())
    }

    pub fn open_backend(&self) -> ImportResult<Arc<dyn KvBackend>> {
        match &self.storage.path {
            Some(path) => Ok(Arc::new(SqliteBackend::open(path)?)),
            None => Ok(Arc::new(MemoryBackend::new())),
        }
    }

    /// Opens the backend and builds stores with the built-in types, this
    /// config's catalog and actor.
    pub fn open_stores(&self, audit: Arc<dyn AuditLog>) -> ImportResult<AttributeStores> {
        let stores = AttributeStores::new(
            self.open_backend()?,
            Arc::new(TypeRegistry::builtin()),
            Arc::new(self.catalog()),
            audit,
        );
        Ok(stores.acting_as(&self.audit.actor))
    }
}
