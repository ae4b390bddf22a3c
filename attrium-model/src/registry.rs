use crate::error::{ModelError, ModelResult, ValidationErrors};
use crate::handler::{
    BooleanHandler, DateHandler, DateTimeHandler, DecimalHandler, IntegerHandler, SelectHandler,
    TextHandler, TypeHandler,
};
use crate::{AttributeDefinition, RawValue, StoredValue};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The set of attribute types available to this process.
///
/// Populated at startup and immutable afterwards; stores receive it as an
/// `Arc<TypeRegistry>`.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    handlers: BTreeMap<String, Arc<dyn TypeHandler>>,
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TypeRegistry {
    /// A registry with no types.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry with every built-in type.
    pub fn builtin() -> Self {
        Self::empty()
            .with_handler(TextHandler::text())
            .with_handler(TextHandler::varchar())
            .with_handler(IntegerHandler)
            .with_handler(DecimalHandler)
            .with_handler(BooleanHandler)
            .with_handler(DateHandler)
            .with_handler(DateTimeHandler)
            .with_handler(SelectHandler)
    }

    /// Registers a handler, replacing any handler with the same name.
    pub fn with_handler(mut self, handler: impl TypeHandler + 'static) -> Self {
        self.handlers
            .insert(handler.name().to_string(), Arc::new(handler));
        self
    }

    pub fn resolve(&self, type_name: &str) -> ModelResult<Arc<dyn TypeHandler>> {
        self.handlers
            .get(type_name)
            .cloned()
            .ok_or_else(|| ModelError::UnknownType(type_name.to_string()))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.handlers.contains_key(type_name)
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Converts raw input into a stored value for `definition`.
    ///
    /// Blank parts are dropped; `None` means the input was empty. A
    /// non-collection attribute given several parts fails validation.
    pub fn coerce(
        &self,
        definition: &AttributeDefinition,
        raw: &RawValue,
    ) -> ModelResult<Option<StoredValue>> {
        let handler = self.resolve(&definition.type_name)?;
        let parts = raw.parts();
        if !definition.is_collection && parts.len() > 1 {
            return Err(ValidationErrors::single(
                &definition.slug,
                format!("expects a single value, got {}", parts.len()),
            )
            .into());
        }

        let mut values = Vec::with_capacity(parts.len());
        for part in parts {
            values.push(handler.coerce(part)?);
        }

        if values.is_empty() {
            return Ok(None);
        }
        if definition.is_collection {
            Ok(Some(StoredValue::List(values)))
        } else {
            Ok(values.pop().map(StoredValue::Scalar))
        }
    }

    /// Checks a coerced (possibly absent) value against the definition.
    pub fn validate(
        &self,
        definition: &AttributeDefinition,
        value: Option<&StoredValue>,
    ) -> ModelResult<()> {
        let handler = self.resolve(&definition.type_name)?;
        let mut errors = ValidationErrors::new();

        match value {
            None => {
                if definition.is_required {
                    errors.add(&definition.slug, "is required");
                }
            }
            Some(stored) => {
                if definition.is_required && stored.is_empty() {
                    errors.add(&definition.slug, "is required");
                }
                if let (StoredValue::List(items), false) = (stored, definition.is_collection) {
                    errors.add(
                        &definition.slug,
                        format!("expects a single value, got {}", items.len()),
                    );
                }
                for v in stored.values() {
                    if let Err(reason) = handler.validate(v, definition) {
                        errors.add(&definition.slug, reason);
                    }
                }
            }
        }

        errors.into_result().map_err(Into::into)
    }

    /// Coerces then validates; what every write path goes through.
    pub fn prepare(
        &self,
        definition: &AttributeDefinition,
        raw: &RawValue,
    ) -> ModelResult<Option<StoredValue>> {
        let value = self.coerce(definition, raw)?;
        self.validate(definition, value.as_ref())?;
        Ok(value)
    }

    /// Checks that a definition is well formed for its type, including its
    /// default. Returns the coerced default.
    pub fn check_definition(
        &self,
        definition: &AttributeDefinition,
        default: Option<&RawValue>,
    ) -> ModelResult<Option<StoredValue>> {
        let handler = self.resolve(&definition.type_name)?;
        if let Err(reason) = handler.check_definition(definition) {
            return Err(ValidationErrors::single("type", reason).into());
        }

        let Some(raw) = default else {
            return Ok(None);
        };
        let value = self.coerce(definition, raw)?;
        if let Some(stored) = &value {
            for v in stored.values() {
                if let Err(reason) = handler.validate(v, definition) {
                    return Err(ValidationErrors::single("default", reason).into());
                }
            }
        }
        Ok(value)
    }
}
