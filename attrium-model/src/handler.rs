use crate::error::CoercionError;
use crate::{AttributeDefinition, TypedValue};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Coercion and validation rules for one attribute type.
///
/// Handlers are registered once at startup in a
/// [`TypeRegistry`](crate::TypeRegistry) and must be stateless. The
/// registry applies the rules shared by every type (emptiness, required,
/// collection arity) itself, so a handler only deals with its own format.
pub trait TypeHandler: Send + Sync {
    /// The type name used in attribute definitions (e.g. `"integer"`).
    fn name(&self) -> &str;

    /// Converts one non-blank raw value into a typed value.
    fn coerce(&self, raw: &str) -> Result<TypedValue, CoercionError>;

    /// Checks a coerced value against the definition's constraints.
    /// Return `Err(reason)` to reject the write.
    fn validate(&self, value: &TypedValue, definition: &AttributeDefinition) -> Result<(), String> {
        let _ = (value, definition);
        Ok(())
    }

    /// Checks that a definition of this type is well formed.
    fn check_definition(&self, definition: &AttributeDefinition) -> Result<(), String> {
        let _ = definition;
        Ok(())
    }
}

/// Free text, optionally length-limited (`text`, `varchar`).
pub struct TextHandler {
    name: &'static str,
    max_chars: Option<usize>,
}

impl TextHandler {
    pub const fn text() -> Self {
        Self {
            name: "text",
            max_chars: None,
        }
    }

    pub const fn varchar() -> Self {
        Self {
            name: "varchar",
            max_chars: Some(255),
        }
    }
}

impl TypeHandler for TextHandler {
    fn name(&self) -> &str {
        self.name
    }

    fn coerce(&self, raw: &str) -> Result<TypedValue, CoercionError> {
        if let Some(max) = self.max_chars {
            let len = raw.chars().count();
            if len > max {
                return Err(CoercionError::new(
                    self.name,
                    raw,
                    format!("{len} characters exceeds the limit of {max}"),
                ));
            }
        }
        Ok(TypedValue::Text(raw.to_string()))
    }
}

pub struct IntegerHandler;

impl TypeHandler for IntegerHandler {
    fn name(&self) -> &str {
        "integer"
    }

    fn coerce(&self, raw: &str) -> Result<TypedValue, CoercionError> {
        raw.trim()
            .parse::<i64>()
            .map(TypedValue::Integer)
            .map_err(|e| CoercionError::new("integer", raw, e.to_string()))
    }
}

pub struct DecimalHandler;

impl TypeHandler for DecimalHandler {
    fn name(&self) -> &str {
        "decimal"
    }

    fn coerce(&self, raw: &str) -> Result<TypedValue, CoercionError> {
        let value = raw
            .trim()
            .parse::<f64>()
            .map_err(|e| CoercionError::new("decimal", raw, e.to_string()))?;
        if !value.is_finite() {
            return Err(CoercionError::new("decimal", raw, "value is not finite"));
        }
        Ok(TypedValue::Decimal(value))
    }
}

pub struct BooleanHandler;

impl TypeHandler for BooleanHandler {
    fn name(&self) -> &str {
        "boolean"
    }

    fn coerce(&self, raw: &str) -> Result<TypedValue, CoercionError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(TypedValue::Boolean(true)),
            "false" | "0" | "no" | "off" => Ok(TypedValue::Boolean(false)),
            _ => Err(CoercionError::new(
                "boolean",
                raw,
                "expected true/false, yes/no, on/off or 1/0",
            )),
        }
    }
}

pub struct DateHandler;

impl TypeHandler for DateHandler {
    fn name(&self) -> &str {
        "date"
    }

    fn coerce(&self, raw: &str) -> Result<TypedValue, CoercionError> {
        NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map(TypedValue::Date)
            .map_err(|e| CoercionError::new("date", raw, format!("{e} (expected YYYY-MM-DD)")))
    }
}

pub struct DateTimeHandler;

impl TypeHandler for DateTimeHandler {
    fn name(&self) -> &str {
        "datetime"
    }

    fn coerce(&self, raw: &str) -> Result<TypedValue, CoercionError> {
        let trimmed = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(TypedValue::DateTime(dt.with_timezone(&Utc)));
        }
        NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S")
            .map(|naive| TypedValue::DateTime(naive.and_utc()))
            .map_err(|e| {
                CoercionError::new(
                    "datetime",
                    raw,
                    format!("{e} (expected RFC 3339 or YYYY-MM-DD HH:MM:SS)"),
                )
            })
    }
}

/// One value out of the definition's `options`.
pub struct SelectHandler;

impl TypeHandler for SelectHandler {
    fn name(&self) -> &str {
        "select"
    }

    fn coerce(&self, raw: &str) -> Result<TypedValue, CoercionError> {
        Ok(TypedValue::Choice(raw.trim().to_string()))
    }

    fn validate(&self, value: &TypedValue, definition: &AttributeDefinition) -> Result<(), String> {
        match value {
            TypedValue::Choice(choice) if definition.options.iter().any(|o| o == choice) => Ok(()),
            TypedValue::Choice(choice) => Err(format!(
                "{choice:?} is not one of [{}]",
                definition.options.join(", ")
            )),
            other => Err(format!("expected a choice, got {other:?}")),
        }
    }

    fn check_definition(&self, definition: &AttributeDefinition) -> Result<(), String> {
        if definition.options.is_empty() {
            return Err("select attributes need at least one option".to_string());
        }
        Ok(())
    }
}
