//! Error types for the import pipeline.

use attrium_model::{ModelError, ValidationErrors};
use attrium_storage::StorageError;
use thiserror::Error;

/// Result type for import operations.
pub type ImportResult<T> = Result<T, ImportError>;

#[derive(Debug, Error)]
pub enum ImportError {
    /// The source file could not be read as a table. Nothing was staged.
    #[error("parse error: {0}")]
    Parse(String),

    /// The resource type is unknown, or the row does not fit it.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("lock poisoned: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ModelError> for ImportError {
    fn from(e: ModelError) -> Self {
        Self::Storage(StorageError::Model(e))
    }
}

impl From<ValidationErrors> for ImportError {
    fn from(e: ValidationErrors) -> Self {
        ModelError::from(e).into()
    }
}

impl ImportError {
    /// Per-field reasons, when the failure was a validation error.
    pub fn validation(&self) -> Option<&ValidationErrors> {
        match self {
            Self::Storage(StorageError::Model(ModelError::Validation(errors))) => Some(errors),
            _ => None,
        }
    }

    /// The note attached to a failed staged row: the message, followed by
    /// the per-field detail as a JSON object on its own line when the
    /// failure carries one.
    pub fn note(&self) -> String {
        match self
            .validation()
            .and_then(|errors| serde_json::to_string(errors).ok())
        {
            Some(detail) => format!("{self}\n{detail}"),
            None => self.to_string(),
        }
    }
}
