//! Compiled entity/property graph.
//!
//! [`MetamodelBuilder`] is the mutable graph under construction. It is passed
//! by `&mut` to every field handler and to the translation linker, and is
//! turned into an immutable [`Metamodel`] by [`MetamodelBuilder::freeze`]
//! once linking has completed.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::definition::{LocalizedLabels, SchemaClassification};

/// Kind of an entity in the metamodel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Top-level content object.
    TopLevelObject,
    /// Metadata layer.
    MetadataLayer,
    /// Embedded fieldset.
    Fieldset,
    /// Enumeration of values.
    Enum,
    /// Anything else, including built-in framework entities.
    Other,
}

impl From<SchemaClassification> for EntityKind {
    fn from(classification: SchemaClassification) -> Self {
        match classification {
            SchemaClassification::Content => EntityKind::TopLevelObject,
            SchemaClassification::Layer => EntityKind::MetadataLayer,
            SchemaClassification::Struct => EntityKind::Fieldset,
            SchemaClassification::List => EntityKind::Enum,
            SchemaClassification::Other => EntityKind::Other,
        }
    }
}

/// Abstract data type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    String,
    StringArray,
    Number,
    Boolean,
    DateTime,
    LocalizedString,
    LocalizedStringArray,
    Enum,
    EnumArray,
    Object,
    ObjectArray,
    Currency,
    GeoLocation,
    Undefined,
}

impl DataType {
    /// Get the localized counterpart of a plain type, or the type itself when
    /// it has none.
    #[must_use]
    pub fn localized(self) -> Self {
        match self {
            DataType::String => DataType::LocalizedString,
            DataType::StringArray => DataType::LocalizedStringArray,
            other => other,
        }
    }

    /// Check if values of this type carry several locales.
    #[must_use]
    pub fn is_localized(self) -> bool {
        matches!(
            self,
            DataType::LocalizedString | DataType::LocalizedStringArray
        )
    }

    /// Check if properties of this type point at another entity.
    #[must_use]
    pub fn references_entity(self) -> bool {
        matches!(
            self,
            DataType::Enum | DataType::EnumArray | DataType::Object | DataType::ObjectArray
        )
    }

    /// Check if properties of this type embed another entity's properties.
    #[must_use]
    pub fn is_object(self) -> bool {
        matches!(self, DataType::Object | DataType::ObjectArray)
    }
}

/// One value of an enum entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    pub id: String,
    pub labels: LocalizedLabels,
}

/// A typed attribute of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyModel {
    /// Key, unique within the owning entity.
    pub key: String,

    /// Abstract data type.
    pub data_type: DataType,

    /// Referenced entity, set iff the data type references one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_entity_key: Option<String>,

    /// Label per locale.
    #[serde(default)]
    pub labels: LocalizedLabels,

    /// Keys of per-locale sibling properties folded into this one.
    /// `None` rather than an empty set when there are none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_translation_properties: Option<BTreeSet<String>>,

    /// Free-form hint for value conversion (currency symbol, "relationship").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_hint: Option<String>,

    /// Whether the remote system indexes this property.
    #[serde(default)]
    pub is_searchable: bool,
}

impl PropertyModel {
    /// Create a new property.
    pub fn new(key: impl Into<String>, data_type: DataType) -> Self {
        Self {
            key: key.into(),
            data_type,
            target_entity_key: None,
            labels: LocalizedLabels::new(),
            linked_translation_properties: None,
            semantic_hint: None,
            is_searchable: false,
        }
    }

    /// Set all labels.
    #[must_use]
    pub fn with_labels(mut self, labels: LocalizedLabels) -> Self {
        self.labels = labels;
        self
    }

    /// Add a label for a locale.
    #[must_use]
    pub fn with_label(mut self, locale: impl Into<String>, label: impl Into<String>) -> Self {
        self.labels.insert(locale.into(), label.into());
        self
    }

    /// Set the referenced entity.
    #[must_use]
    pub fn with_target(mut self, entity_key: impl Into<String>) -> Self {
        self.target_entity_key = Some(entity_key.into());
        self
    }

    /// Set the semantic hint.
    #[must_use]
    pub fn with_semantic_hint(mut self, hint: impl Into<String>) -> Self {
        self.semantic_hint = Some(hint.into());
        self
    }

    /// Mark the property as searchable.
    #[must_use]
    pub fn searchable(mut self, searchable: bool) -> Self {
        self.is_searchable = searchable;
        self
    }

    /// Get the label for a locale.
    #[must_use]
    pub fn label(&self, locale: &str) -> Option<&str> {
        self.labels.get(locale).map(String::as_str)
    }

    /// Check if translations were linked into this property.
    #[must_use]
    pub fn has_translations(&self) -> bool {
        self.linked_translation_properties.is_some()
    }
}

/// A node of the metamodel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityModel {
    /// Unique, stable key.
    pub key: String,

    /// Kind of entity.
    pub kind: EntityKind,

    /// Single parent entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_key: Option<String>,

    /// Label per locale.
    #[serde(default)]
    pub labels: LocalizedLabels,

    /// Ordered properties; keys unique within the entity.
    #[serde(default)]
    pub properties: Vec<PropertyModel>,

    /// Values, for enum entities only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<EnumValue>>,

    /// Built-in entity that does not come from a remote schema.
    #[serde(default)]
    pub is_framework: bool,
}

impl EntityModel {
    /// Create a new entity.
    pub fn new(key: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            key: key.into(),
            kind,
            parent_key: None,
            labels: LocalizedLabels::new(),
            properties: Vec::new(),
            enum_values: if kind == EntityKind::Enum {
                Some(Vec::new())
            } else {
                None
            },
            is_framework: false,
        }
    }

    /// Set all labels.
    #[must_use]
    pub fn with_labels(mut self, labels: LocalizedLabels) -> Self {
        self.labels = labels;
        self
    }

    /// Set the parent entity.
    #[must_use]
    pub fn with_parent(mut self, parent_key: Option<String>) -> Self {
        self.parent_key = parent_key;
        self
    }

    /// Get the label for a locale.
    #[must_use]
    pub fn label(&self, locale: &str) -> Option<&str> {
        self.labels.get(locale).map(String::as_str)
    }

    /// Find a property by key.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&PropertyModel> {
        self.properties.iter().find(|p| p.key == key)
    }

    /// Find a property by key, mutably.
    pub fn property_mut(&mut self, key: &str) -> Option<&mut PropertyModel> {
        self.properties.iter_mut().find(|p| p.key == key)
    }

    /// Check if a property exists.
    #[must_use]
    pub fn has_property(&self, key: &str) -> bool {
        self.properties.iter().any(|p| p.key == key)
    }

    /// Get all property keys in order.
    #[must_use]
    pub fn property_keys(&self) -> Vec<&str> {
        self.properties.iter().map(|p| p.key.as_str()).collect()
    }
}

/// Capability flags a connector advertises with its metamodel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub random_access_supported: bool,
    #[serde(default)]
    pub full_text_search_proposals_supported: bool,
    #[serde(default)]
    pub folder_navigation_supported: bool,
}

/// Mutable metamodel under construction.
#[derive(Debug, Clone)]
pub struct MetamodelBuilder {
    identifier: String,
    capabilities: Capabilities,
    entities: BTreeMap<String, EntityModel>,
}

impl MetamodelBuilder {
    /// Create an empty graph.
    pub fn new(identifier: impl Into<String>, capabilities: Capabilities) -> Self {
        Self {
            identifier: identifier.into(),
            capabilities,
            entities: BTreeMap::new(),
        }
    }

    /// Get the metamodel identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Check if an entity exists.
    #[must_use]
    pub fn contains_entity(&self, key: &str) -> bool {
        self.entities.contains_key(key)
    }

    /// Find an entity by key.
    #[must_use]
    pub fn entity(&self, key: &str) -> Option<&EntityModel> {
        self.entities.get(key)
    }

    /// Find an entity by key, mutably.
    pub fn entity_mut(&mut self, key: &str) -> Option<&mut EntityModel> {
        self.entities.get_mut(key)
    }

    /// Iterate entities in key order.
    pub fn entities(&self) -> impl Iterator<Item = &EntityModel> {
        self.entities.values()
    }

    /// Get all entity keys in order.
    #[must_use]
    pub fn entity_keys(&self) -> Vec<String> {
        self.entities.keys().cloned().collect()
    }

    /// Number of entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Register an entity. Returns `false` and leaves the graph untouched if
    /// the key is already taken.
    pub fn insert_entity(&mut self, entity: EntityModel) -> bool {
        if self.entities.contains_key(&entity.key) {
            return false;
        }
        self.entities.insert(entity.key.clone(), entity);
        true
    }

    /// Remove an entity.
    pub fn remove_entity(&mut self, key: &str) -> Option<EntityModel> {
        self.entities.remove(key)
    }

    /// Attach a property to its owner. Returns `false` if the owner does not
    /// exist or already has a property with this key.
    pub fn add_property(&mut self, owner: &str, property: PropertyModel) -> bool {
        match self.entities.get_mut(owner) {
            Some(entity) if !entity.has_property(&property.key) => {
                entity.properties.push(property);
                true
            }
            _ => false,
        }
    }

    /// Get or create a built-in framework entity.
    pub fn ensure_framework_entity(&mut self, key: &str) -> &EntityModel {
        self.entities.entry(key.to_string()).or_insert_with(|| {
            let mut entity = EntityModel::new(key, EntityKind::Other);
            entity.is_framework = true;
            entity
        })
    }

    /// Drop properties whose target entity does not exist and clear parent
    /// pointers to missing entities. Returns the number of pruned references.
    pub fn prune_dangling_references(&mut self) -> usize {
        let keys: BTreeSet<String> = self.entities.keys().cloned().collect();
        let mut pruned = 0;

        for entity in self.entities.values_mut() {
            if let Some(parent) = &entity.parent_key {
                if !keys.contains(parent) {
                    warn!(entity = %entity.key, parent = %parent, "Pruning dangling parent reference");
                    entity.parent_key = None;
                    pruned += 1;
                }
            }

            let owner = entity.key.clone();
            entity.properties.retain(|p| match &p.target_entity_key {
                Some(target) if !keys.contains(target) => {
                    warn!(owner = %owner, property = %p.key, target = %target, "Pruning dangling property reference");
                    pruned += 1;
                    false
                }
                _ => true,
            });
        }

        pruned
    }

    /// Freeze the graph into an immutable metamodel.
    #[must_use]
    pub fn freeze(self) -> Metamodel {
        Metamodel {
            identifier: self.identifier,
            capabilities: self.capabilities,
            entities: self.entities,
            built_at: Utc::now(),
        }
    }
}

/// Immutable, compiled metamodel. Safe to share across any number of readers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metamodel {
    identifier: String,
    capabilities: Capabilities,
    entities: BTreeMap<String, EntityModel>,
    built_at: DateTime<Utc>,
}

impl Metamodel {
    /// Get the metamodel identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Get the capability flags.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Find an entity by key.
    #[must_use]
    pub fn get_entity(&self, key: &str) -> Option<&EntityModel> {
        self.entities.get(key)
    }

    /// Iterate entities in key order.
    pub fn entities(&self) -> impl Iterator<Item = &EntityModel> {
        self.entities.values()
    }

    /// Number of entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// When the metamodel was frozen.
    #[must_use]
    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }
}
