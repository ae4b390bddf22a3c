//! Attribute model for Attrium.
//!
//! Defines the types every other layer agrees on:
//! - [`TypedValue`] / [`StoredValue`]: closed, coerced attribute values
//! - [`TypeHandler`] and [`TypeRegistry`]: per-type coercion and validation
//! - [`AttributeDefinition`] / [`DefinitionSpec`]: attribute schema metadata
//! - [`EntityCatalog`]: the entity types attributes may apply to
//!
//! Nothing here touches storage. Definitions and values are persisted by
//! `attrium-storage`, which resolves every write through the registry.

mod catalog;
mod definition;
mod error;
mod handler;
mod registry;
mod value;

pub use catalog::{EntityCatalog, EntityKind};
pub use definition::{
    is_valid_slug, slugify, AttributeDefinition, DefinitionSpec, LocalizedText, DEFAULT_LOCALE,
    WATCHED_FIELDS,
};
pub use error::{CoercionError, ModelError, ModelResult, ValidationErrors};
pub use handler::{
    BooleanHandler, DateHandler, DateTimeHandler, DecimalHandler, IntegerHandler, SelectHandler,
    TextHandler, TypeHandler,
};
pub use registry::TypeRegistry;
pub use value::{RawValue, StoredValue, TypedValue};
