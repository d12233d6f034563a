//! Raw schema definitions as the remote system exposes them.
//!
//! These types are read-only input to the
//! [`EntityGraphBuilder`](crate::builder::EntityGraphBuilder). Field kinds the
//! crate does not know still deserialize, as [`FieldKind::Unknown`], so one
//! unexpected kind never fails a whole schema payload.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Label text keyed by locale tag.
pub type LocalizedLabels = BTreeMap<String, String>;

/// Kind of a remote custom field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldKind {
    /// Single line or rich text.
    String,
    /// List of strings.
    StringArray,
    /// Integer or decimal number.
    Number,
    /// Checkbox.
    Boolean,
    /// Date or date/time.
    DateTime,
    /// Single choice from a list schema.
    SingleSelect,
    /// Multiple choices from a list schema ("tagbox").
    MultiSelect,
    /// One embedded struct/fieldset.
    SingleStructRef,
    /// Repeated embedded struct/fieldset.
    MultiStructRef,
    /// Link to one record of another content schema.
    SingleRelationRef,
    /// Links to records of another content schema.
    MultiRelationRef,
    /// Per-locale text stored as a dictionary.
    Dictionary,
    /// List of per-locale texts.
    DictionaryArray,
    /// Amount in a fixed currency.
    Currency,
    /// Coordinates.
    GeoLocation,
    /// Reference to a user of the remote system.
    UserRef,
    /// Action/trigger placeholder that carries no value.
    Trigger,
    /// Anything else the remote system reported.
    Unknown(String),
}

impl FieldKind {
    /// Get the canonical name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            FieldKind::String => "string",
            FieldKind::StringArray => "string-array",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::DateTime => "datetime",
            FieldKind::SingleSelect => "single-select",
            FieldKind::MultiSelect => "multi-select",
            FieldKind::SingleStructRef => "single-struct-ref",
            FieldKind::MultiStructRef => "multi-struct-ref",
            FieldKind::SingleRelationRef => "single-relation-ref",
            FieldKind::MultiRelationRef => "multi-relation-ref",
            FieldKind::Dictionary => "dictionary",
            FieldKind::DictionaryArray => "dictionary-array",
            FieldKind::Currency => "currency",
            FieldKind::GeoLocation => "geolocation",
            FieldKind::UserRef => "user",
            FieldKind::Trigger => "trigger",
            FieldKind::Unknown(name) => name,
        }
    }

    /// Parse from the remote kind name. Never fails; unrecognised names map to
    /// [`FieldKind::Unknown`].
    #[must_use]
    pub fn parse_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "string" | "text" | "richtext" | "textarea" => FieldKind::String,
            "string-array" | "stringarray" | "text-array" => FieldKind::StringArray,
            "number" | "integer" | "decimal" => FieldKind::Number,
            "boolean" | "bool" | "checkbox" => FieldKind::Boolean,
            "datetime" | "date-time" | "date" => FieldKind::DateTime,
            "single-select" | "select" | "tagbox-single" => FieldKind::SingleSelect,
            "multi-select" | "tagbox" | "tagbox-multi" => FieldKind::MultiSelect,
            "single-struct-ref" | "fieldset" => FieldKind::SingleStructRef,
            "multi-struct-ref" | "fieldset-array" => FieldKind::MultiStructRef,
            "single-relation-ref" | "relation" => FieldKind::SingleRelationRef,
            "multi-relation-ref" | "relations" => FieldKind::MultiRelationRef,
            "dictionary" => FieldKind::Dictionary,
            "dictionary-array" => FieldKind::DictionaryArray,
            "currency" | "money" => FieldKind::Currency,
            "geolocation" | "geo" | "location" => FieldKind::GeoLocation,
            "user" | "user-ref" => FieldKind::UserRef,
            "trigger" | "button" | "action" => FieldKind::Trigger,
            _ => FieldKind::Unknown(s.to_string()),
        }
    }

    /// Check if this kind needs `target_schema_id` to resolve.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            FieldKind::SingleSelect
                | FieldKind::MultiSelect
                | FieldKind::SingleStructRef
                | FieldKind::MultiStructRef
                | FieldKind::SingleRelationRef
                | FieldKind::MultiRelationRef
        )
    }
}

impl From<String> for FieldKind {
    fn from(s: String) -> Self {
        FieldKind::parse_str(&s)
    }
}

impl From<FieldKind> for String {
    fn from(kind: FieldKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A custom field definition inside a schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Remote field id; becomes the property key.
    pub id: String,

    /// Field label per locale.
    #[serde(default)]
    pub labels: LocalizedLabels,

    /// Kind of the field.
    pub kind: FieldKind,

    /// Schema this field points to, for reference-like kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_schema_id: Option<String>,

    /// Whether the remote system indexes this field.
    #[serde(default)]
    pub is_searchable: bool,

    /// Currency code or symbol for currency fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl FieldDefinition {
    /// Create a new field definition.
    pub fn new(id: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            id: id.into(),
            labels: LocalizedLabels::new(),
            kind,
            target_schema_id: None,
            is_searchable: false,
            currency: None,
        }
    }

    /// Add a label for a locale.
    #[must_use]
    pub fn with_label(mut self, locale: impl Into<String>, label: impl Into<String>) -> Self {
        self.labels.insert(locale.into(), label.into());
        self
    }

    /// Set the referenced schema.
    #[must_use]
    pub fn with_target(mut self, schema_id: impl Into<String>) -> Self {
        self.target_schema_id = Some(schema_id.into());
        self
    }

    /// Mark the field as searchable.
    #[must_use]
    pub fn searchable(mut self) -> Self {
        self.is_searchable = true;
        self
    }

    /// Set the currency for currency fields.
    #[must_use]
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }
}

/// Classification of a schema in the remote system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SchemaClassification {
    /// Top-level content type.
    Content,
    /// Metadata layer applied on top of content.
    Layer,
    /// Embedded struct/fieldset.
    Struct,
    /// List of values usable by select fields.
    List,
    /// Anything else.
    #[default]
    Other,
}

impl SchemaClassification {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaClassification::Content => "content",
            SchemaClassification::Layer => "layer",
            SchemaClassification::Struct => "struct",
            SchemaClassification::List => "list",
            SchemaClassification::Other => "other",
        }
    }

    /// Parse from string; unknown classifications map to `Other`.
    #[must_use]
    pub fn parse_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "content" | "top-level" | "toplevel" => SchemaClassification::Content,
            "layer" => SchemaClassification::Layer,
            "struct" | "fieldset" => SchemaClassification::Struct,
            "list" | "enum" => SchemaClassification::List,
            _ => SchemaClassification::Other,
        }
    }
}

impl From<String> for SchemaClassification {
    fn from(s: String) -> Self {
        SchemaClassification::parse_str(&s)
    }
}

impl From<SchemaClassification> for String {
    fn from(c: SchemaClassification) -> Self {
        c.as_str().to_string()
    }
}

impl std::fmt::Display for SchemaClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One value of a list schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValueDefinition {
    /// Remote value id.
    pub id: String,
    /// Value label per locale.
    #[serde(default)]
    pub labels: LocalizedLabels,
}

impl EnumValueDefinition {
    /// Create a new value.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            labels: LocalizedLabels::new(),
        }
    }

    /// Add a label for a locale.
    #[must_use]
    pub fn with_label(mut self, locale: impl Into<String>, label: impl Into<String>) -> Self {
        self.labels.insert(locale.into(), label.into());
        self
    }
}

/// A schema definition with its ordered fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDefinition {
    /// Remote schema id; becomes the entity key.
    pub id: String,

    /// Parent schema, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Classification of the schema.
    #[serde(default)]
    pub classification: SchemaClassification,

    /// Schema label per locale.
    #[serde(default)]
    pub labels: LocalizedLabels,

    /// Ordered field definitions.
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,

    /// Values of a list schema. Filled by the enum-value fetch when the
    /// details call does not include them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<EnumValueDefinition>,
}

impl SchemaDefinition {
    /// Create a new schema definition.
    pub fn new(id: impl Into<String>, classification: SchemaClassification) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            classification,
            labels: LocalizedLabels::new(),
            fields: Vec::new(),
            enum_values: Vec::new(),
        }
    }

    /// Add a label for a locale.
    #[must_use]
    pub fn with_label(mut self, locale: impl Into<String>, label: impl Into<String>) -> Self {
        self.labels.insert(locale.into(), label.into());
        self
    }

    /// Set the parent schema.
    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Add a field using builder pattern.
    #[must_use]
    pub fn with_field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    /// Add a list value using builder pattern.
    #[must_use]
    pub fn with_enum_value(mut self, value: EnumValueDefinition) -> Self {
        self.enum_values.push(value);
        self
    }
}

/// Entry of the schema list call, before details are fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSummary {
    /// Remote schema id.
    pub id: String,
    /// Classification, when the list call reports it.
    #[serde(default)]
    pub classification: SchemaClassification,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_kind_parsing() {
        assert_eq!(FieldKind::parse_str("string"), FieldKind::String);
        assert_eq!(FieldKind::parse_str("Tagbox"), FieldKind::MultiSelect);
        assert_eq!(FieldKind::parse_str("relation"), FieldKind::SingleRelationRef);
        assert_eq!(FieldKind::parse_str(" checkbox "), FieldKind::Boolean);
        assert_eq!(
            FieldKind::parse_str("hologram"),
            FieldKind::Unknown("hologram".to_string())
        );
    }

    #[test]
    fn test_unknown_kind_deserializes() {
        let json = r#"{"id": "f1", "kind": "hologram", "labels": {"en": "Holo"}}"#;
        let field: FieldDefinition = serde_json::from_str(json).unwrap();

        assert_eq!(field.kind, FieldKind::Unknown("hologram".to_string()));
        assert_eq!(field.kind.to_string(), "hologram");
        assert!(!field.is_searchable);
    }

    #[test]
    fn test_schema_definition_deserialization() {
        let json = r#"{
            "id": "Asset",
            "classification": "content",
            "labels": {"en": "Asset"},
            "fields": [
                {"id": "Title", "kind": "string", "labels": {"en": "Title"}, "is_searchable": true},
                {"id": "Status", "kind": "single-select", "target_schema_id": "StatusList"}
            ]
        }"#;

        let schema: SchemaDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(schema.classification, SchemaClassification::Content);
        assert_eq!(schema.fields.len(), 2);
        assert!(schema.fields[0].is_searchable);
        assert_eq!(schema.fields[1].target_schema_id.as_deref(), Some("StatusList"));
        assert!(schema.parent_id.is_none());
        assert!(schema.enum_values.is_empty());
    }

    #[test]
    fn test_unknown_classification_is_other() {
        assert_eq!(
            SchemaClassification::parse_str("workflow"),
            SchemaClassification::Other
        );
        assert_eq!(
            SchemaClassification::parse_str("fieldset"),
            SchemaClassification::Struct
        );
    }

    #[test]
    fn test_reference_kinds() {
        assert!(FieldKind::MultiSelect.is_reference());
        assert!(FieldKind::SingleRelationRef.is_reference());
        assert!(!FieldKind::UserRef.is_reference());
        assert!(!FieldKind::String.is_reference());
    }
}
