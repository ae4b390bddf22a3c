//! Error types for the attribute model.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while resolving types, coercing or validating values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// The type name is not registered.
    #[error("unknown attribute type: {0}")]
    UnknownType(String),

    /// The entity type is not in the catalog.
    #[error("invalid entity type: {0}")]
    InvalidEntityType(String),

    /// A raw value could not be converted to the declared type.
    #[error(transparent)]
    Coercion(#[from] CoercionError),

    /// One or more fields violate a constraint.
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
}

/// A raw value that does not convert to its declared type.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot coerce {raw:?} to {type_name}: {reason}")]
pub struct CoercionError {
    pub type_name: String,
    pub raw: String,
    pub reason: String,
}

impl CoercionError {
    pub fn new(
        type_name: impl Into<String>,
        raw: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            raw: raw.into(),
            reason: reason.into(),
        }
    }
}

/// Per-field validation failures.
///
/// Serializes as a plain `{ field: [reason, ...] }` object so callers can
/// attach it verbatim to a failed import row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a single failing field.
    pub fn single(field: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, reason);
        errors
    }

    pub fn add(&mut self, field: impl Into<String>, reason: impl Into<String>) {
        self.fields.entry(field.into()).or_default().push(reason.into());
    }

    pub fn merge(&mut self, other: ValidationErrors) {
        for (field, reasons) in other.fields {
            self.fields.entry(field).or_default().extend(reasons);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &BTreeMap<String, Vec<String>> {
        &self.fields
    }

    /// `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("validation failed")?;
        let mut sep = ": ";
        for (field, reasons) in &self.fields {
            write!(f, "{sep}{field} {}", reasons.join(", "))?;
            sep = "; ";
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}
