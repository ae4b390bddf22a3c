use crate::{RawValue, StoredValue};
use attrium_types::{AttributeId, Snapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Locale used when a single untranslated string is supplied.
pub const DEFAULT_LOCALE: &str = "en";

/// Fields whose changes are written to the audit log.
pub const WATCHED_FIELDS: [&str; 10] = [
    "name",
    "slug",
    "description",
    "sort_order",
    "group",
    "type",
    "entities",
    "is_required",
    "is_collection",
    "default",
];

/// Text keyed by locale (e.g. `{"en": "Size", "de": "Größe"}`).
pub type LocalizedText = BTreeMap<String, String>;

/// Schema metadata for one attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub id: AttributeId,
    pub slug: String,
    pub name: LocalizedText,
    #[serde(default)]
    pub description: LocalizedText,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Registered type name.
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub is_collection: bool,
    /// Applied by reads when no value is stored.
    #[serde(default)]
    pub default: Option<StoredValue>,
    /// Entity types this attribute applies to.
    pub entities: BTreeSet<String>,
    /// Allowed choices. Only meaningful for `select`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AttributeDefinition {
    /// Builds a definition from a spec. The default is left unset; the
    /// definition store coerces it once the type is known to be valid.
    pub fn from_spec(id: AttributeId, slug: String, spec: &DefinitionSpec) -> Self {
        let now = Utc::now();
        Self {
            id,
            slug,
            name: spec.name.clone(),
            description: spec.description.clone(),
            sort_order: spec.sort_order,
            group: spec.group.clone().filter(|g| !g.trim().is_empty()),
            type_name: spec.type_name.clone(),
            is_required: spec.is_required,
            is_collection: spec.is_collection,
            default: None,
            entities: spec.entities.clone(),
            options: spec.options.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn applies_to(&self, entity_type: &str) -> bool {
        self.entities.contains(entity_type)
    }

    /// Name in the default locale, else any translation, else the slug.
    pub fn display_name(&self) -> &str {
        self.name
            .get(DEFAULT_LOCALE)
            .or_else(|| self.name.values().next())
            .map(String::as_str)
            .unwrap_or(&self.slug)
    }

    /// The [`DefinitionSpec`] that would recreate this definition, for partial updates.
    pub fn to_spec(&self) -> DefinitionSpec {
        DefinitionSpec {
            slug: Some(self.slug.clone()),
            name: self.name.clone(),
            description: self.description.clone(),
            sort_order: self.sort_order,
            group: self.group.clone(),
            type_name: self.type_name.clone(),
            is_required: self.is_required,
            is_collection: self.is_collection,
            default: self.default.as_ref().map(StoredValue::to_raw),
            entities: self.entities.clone(),
            options: self.options.clone(),
        }
    }

    /// Full JSON snapshot, used for audit diffs.
    pub fn snapshot(&self) -> Snapshot {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => Snapshot::new(),
        }
    }
}

/// Input for creating or updating a definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefinitionSpec {
    /// Derived from the name when absent.
    #[serde(default)]
    pub slug: Option<String>,
    pub name: LocalizedText,
    #[serde(default)]
    pub description: LocalizedText,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub is_collection: bool,
    #[serde(default)]
    pub default: Option<RawValue>,
    #[serde(default)]
    pub entities: BTreeSet<String>,
    #[serde(default)]
    pub options: Vec<String>,
}

impl DefinitionSpec {
    /// A spec with a default-locale name and a type.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        let mut names = LocalizedText::new();
        names.insert(DEFAULT_LOCALE.to_string(), name.into());
        Self {
            name: names,
            type_name: type_name.into(),
            ..Self::default()
        }
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>) -> Self {
        self.entities.insert(entity_type.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description.insert(DEFAULT_LOCALE.to_string(), description.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_sort_order(mut self, sort_order: i32) -> Self {
        self.sort_order = sort_order;
        self
    }

    pub fn with_default(mut self, default: impl Into<RawValue>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }

    pub fn collection(mut self) -> Self {
        self.is_collection = true;
        self
    }

    /// The explicit slug, or one derived from the name.
    pub fn resolved_slug(&self) -> String {
        match &self.slug {
            Some(slug) if !slug.trim().is_empty() => slug.trim().to_string(),
            _ => {
                let name = self
                    .name
                    .get(DEFAULT_LOCALE)
                    .or_else(|| self.name.values().next())
                    .map(String::as_str)
                    .unwrap_or_default();
                slugify(name)
            }
        }
    }
}

/// Lowercase ASCII alphanumerics plus `-` and `_`, not starting with a
/// separator.
pub fn is_valid_slug(slug: &str) -> bool {
    let mut chars = slug.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() || first.is_ascii_digit() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// Turns a display name into a slug: `"Shoe Size (EU)"` → `"shoe-size-eu"`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}
