use crate::audit::AuditLog;
use crate::backend::KvBackend;
use crate::error::{StorageError, StorageResult};
use attrium_model::{EntityCatalog, TypeRegistry};
use attrium_types::AuditEntry;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Actor recorded when the caller never names one.
pub const DEFAULT_ACTOR: &str = "system";

/// Collaborators every store shares.
///
/// Definition mutations hold the schema lock for writing; value writes
/// hold it for reading, so a cascade never interleaves with a write that
/// would leave an orphaned value behind.
#[derive(Clone)]
pub(crate) struct Shared {
    pub backend: Arc<dyn KvBackend>,
    pub registry: Arc<TypeRegistry>,
    pub catalog: Arc<EntityCatalog>,
    pub audit: Arc<dyn AuditLog>,
    pub schema: Arc<RwLock<()>>,
    pub actor: String,
}

impl Shared {
    pub fn new(
        backend: Arc<dyn KvBackend>,
        registry: Arc<TypeRegistry>,
        catalog: Arc<EntityCatalog>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            backend,
            registry,
            catalog,
            audit,
            schema: Arc::new(RwLock::new(())),
            actor: DEFAULT_ACTOR.to_string(),
        }
    }

    pub fn with_actor(&self, actor: &str) -> Self {
        Self {
            actor: actor.to_string(),
            ..self.clone()
        }
    }

    pub fn schema_read(&self) -> StorageResult<RwLockReadGuard<'_, ()>> {
        self.schema
            .read()
            .map_err(|e| StorageError::Lock(format!("schema: {e}")))
    }

    pub fn schema_write(&self) -> StorageResult<RwLockWriteGuard<'_, ()>> {
        self.schema
            .write()
            .map_err(|e| StorageError::Lock(format!("schema: {e}")))
    }

    pub fn record(&self, entry: AuditEntry) {
        self.audit.record(entry);
    }
}
