//! Error types for the storage layer.

use attrium_model::ModelError;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Another definition sharing an entity type already uses the slug.
    #[error("slug {slug:?} is already used for entity type {entity_type}")]
    DuplicateSlug { slug: String, entity_type: String },

    /// The change would invalidate stored values.
    #[error("{field} cannot change: {reason}")]
    ImmutableField { field: &'static str, reason: String },

    /// The definition still owns values and was not force-deleted.
    #[error("attribute {slug:?} still has {count} stored values")]
    DefinitionInUse { slug: String, count: usize },

    /// A conditional write lost a race with a concurrent writer.
    #[error("persistence conflict: {0}")]
    PersistenceConflict(String),

    /// Type, coercion or validation failure from the attribute model.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// A lock was poisoned by a panicking writer.
    #[error("lock poisoned: {0}")]
    Lock(String),

    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
