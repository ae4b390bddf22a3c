use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A value that has passed coercion for one of the registered types.
///
/// The only way to build one from user input is through a
/// [`TypeHandler`](crate::TypeHandler); stores never cast raw input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TypedValue {
    Text(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    /// A member of a `select` attribute's option set.
    Choice(String),
}

impl TypedValue {
    /// Serializes back to the raw form accepted by the matching handler.
    ///
    /// Coercing the result again yields an equal value.
    pub fn to_raw(&self) -> String {
        match self {
            Self::Text(s) | Self::Choice(s) => s.clone(),
            Self::Integer(i) => i.to_string(),
            Self::Decimal(d) => d.to_string(),
            Self::Boolean(b) => b.to_string(),
            Self::Date(d) => d.format("%Y-%m-%d").to_string(),
            Self::DateTime(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        }
    }

    /// Blank text counts as empty; every other variant carries data.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) | Self::Choice(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Choice(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Decimal(d) => Some(*d),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_raw())
    }
}

/// What is persisted for one (entity, attribute) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoredValue {
    Scalar(TypedValue),
    /// Ordered sequence for collection attributes, insertion order kept.
    List(Vec<TypedValue>),
}

impl StoredValue {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Scalar(v) => v.is_empty(),
            Self::List(items) => items.iter().all(TypedValue::is_empty),
        }
    }

    /// Every contained value, in order.
    pub fn values(&self) -> &[TypedValue] {
        match self {
            Self::Scalar(v) => std::slice::from_ref(v),
            Self::List(items) => items,
        }
    }

    pub fn as_scalar(&self) -> Option<&TypedValue> {
        match self {
            Self::Scalar(v) => Some(v),
            Self::List(_) => None,
        }
    }

    /// Raw form of every contained value, ready for re-coercion.
    pub fn to_raw(&self) -> RawValue {
        match self {
            Self::Scalar(v) => RawValue::One(v.to_raw()),
            Self::List(items) => RawValue::Many(items.iter().map(TypedValue::to_raw).collect()),
        }
    }
}

/// Untyped input as it arrives from a form, a CLI or an import row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    One(String),
    Many(Vec<String>),
}

impl RawValue {
    /// Splits a delimited cell (e.g. `"red|green"`) into its parts.
    pub fn split(cell: &str, separator: char) -> Self {
        Self::Many(cell.split(separator).map(str::to_string).collect())
    }

    /// Non-blank parts, in order.
    pub fn parts(&self) -> Vec<&str> {
        let all: Vec<&str> = match self {
            Self::One(s) => vec![s.as_str()],
            Self::Many(items) => items.iter().map(String::as_str).collect(),
        };
        all.into_iter().filter(|s| !s.trim().is_empty()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.parts().is_empty()
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        Self::One(s.to_string())
    }
}

impl From<String> for RawValue {
    fn from(s: String) -> Self {
        Self::One(s)
    }
}

impl From<Vec<String>> for RawValue {
    fn from(items: Vec<String>) -> Self {
        Self::Many(items)
    }
}

impl From<Vec<&str>> for RawValue {
    fn from(items: Vec<&str>) -> Self {
        Self::Many(items.into_iter().map(str::to_string).collect())
    }
}
