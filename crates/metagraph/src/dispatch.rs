//! Field-kind dispatch table.
//!
//! Maps every [`FieldKind`] the crate understands to a [`FieldHandler`] that
//! knows which [`DataType`] the kind produces and how to attach the resulting
//! property to the graph under construction.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use metagraph::dispatch::HandlerTable;
//! use metagraph::definition::FieldKind;
//!
//! let table = Arc::new(HandlerTable::standard());
//! assert!(table.lookup(&FieldKind::String).is_some());
//! assert!(table.lookup(&FieldKind::Unknown("hologram".into())).is_none());
//! ```

use std::collections::HashMap;

use crate::definition::{FieldDefinition, FieldKind};
use crate::model::{DataType, MetamodelBuilder, PropertyModel};

/// Key of the synthetic property injected into relation targets.
pub const TARGET_ID_PROPERTY: &str = "target id";

/// Semantic hint carried by the synthetic relation property.
pub const RELATIONSHIP_HINT: &str = "relationship";

/// Key of the built-in entity user references point at.
pub const USER_ENTITY: &str = "User";

/// Turns one field definition into a property.
pub trait FieldHandler: Send + Sync {
    /// Data type of the properties this handler produces.
    fn data_type(&self) -> DataType;

    /// Built-in entity this kind always points at, if any.
    fn framework_target_entity(&self) -> Option<&'static str> {
        None
    }

    /// Whether the kind is deliberately skipped.
    fn is_ignored(&self) -> bool {
        false
    }

    /// Attach the property for `field` to `owner`.
    ///
    /// Returns the attached property, or `None` when the field cannot be
    /// represented (unresolved target, ignored kind). May also mutate other
    /// entities, e.g. to inject relation back-references.
    fn add_property(
        &self,
        field: &FieldDefinition,
        owner: &str,
        model: &mut MetamodelBuilder,
    ) -> Option<PropertyModel>;
}

fn base_property(field: &FieldDefinition, data_type: DataType) -> PropertyModel {
    PropertyModel::new(field.id.clone(), data_type)
        .with_labels(field.labels.clone())
        .searchable(field.is_searchable)
}

fn attach(
    model: &mut MetamodelBuilder,
    owner: &str,
    property: PropertyModel,
) -> Option<PropertyModel> {
    model
        .add_property(owner, property.clone())
        .then_some(property)
}

fn resolve_target<'a>(field: &'a FieldDefinition, model: &MetamodelBuilder) -> Option<&'a str> {
    field
        .target_schema_id
        .as_deref()
        .filter(|target| model.contains_entity(target))
}

/// Simple value kinds: the property is the field, nothing more.
#[derive(Debug, Clone, Copy)]
pub struct ScalarHandler {
    data_type: DataType,
}

impl ScalarHandler {
    pub fn new(data_type: DataType) -> Self {
        Self { data_type }
    }
}

impl FieldHandler for ScalarHandler {
    fn data_type(&self) -> DataType {
        self.data_type
    }

    fn add_property(
        &self,
        field: &FieldDefinition,
        owner: &str,
        model: &mut MetamodelBuilder,
    ) -> Option<PropertyModel> {
        attach(model, owner, base_property(field, self.data_type))
    }
}

/// Currency amounts; the currency travels as the semantic hint.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrencyHandler;

impl FieldHandler for CurrencyHandler {
    fn data_type(&self) -> DataType {
        DataType::Currency
    }

    fn add_property(
        &self,
        field: &FieldDefinition,
        owner: &str,
        model: &mut MetamodelBuilder,
    ) -> Option<PropertyModel> {
        let mut property = base_property(field, DataType::Currency);
        property.semantic_hint = field.currency.clone();
        attach(model, owner, property)
    }
}

/// Struct and select kinds. The target schema must already be an entity.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceHandler {
    data_type: DataType,
}

impl ReferenceHandler {
    pub fn new(data_type: DataType) -> Self {
        Self { data_type }
    }
}

impl FieldHandler for ReferenceHandler {
    fn data_type(&self) -> DataType {
        self.data_type
    }

    fn add_property(
        &self,
        field: &FieldDefinition,
        owner: &str,
        model: &mut MetamodelBuilder,
    ) -> Option<PropertyModel> {
        let target = resolve_target(field, model)?;
        let property = base_property(field, self.data_type).with_target(target);
        attach(model, owner, property)
    }
}

/// Links to records of another content schema.
///
/// Besides the owner's property, the target entity gets a string
/// [`TARGET_ID_PROPERTY`] tagged [`RELATIONSHIP_HINT`], added at most once no
/// matter how many relations point at it.
#[derive(Debug, Clone, Copy)]
pub struct RelationHandler {
    data_type: DataType,
}

impl RelationHandler {
    pub fn new(data_type: DataType) -> Self {
        Self { data_type }
    }
}

impl FieldHandler for RelationHandler {
    fn data_type(&self) -> DataType {
        self.data_type
    }

    fn add_property(
        &self,
        field: &FieldDefinition,
        owner: &str,
        model: &mut MetamodelBuilder,
    ) -> Option<PropertyModel> {
        let target = resolve_target(field, model)?.to_string();
        let property = base_property(field, self.data_type).with_target(target.clone());
        let attached = attach(model, owner, property)?;

        let target_id = PropertyModel::new(TARGET_ID_PROPERTY, DataType::String)
            .with_semantic_hint(RELATIONSHIP_HINT);
        // A second relation to the same target finds the property already there.
        model.add_property(&target, target_id);

        Some(attached)
    }
}

/// Kinds that always point at a built-in entity, created on first use.
#[derive(Debug, Clone, Copy)]
pub struct FrameworkReferenceHandler {
    data_type: DataType,
    entity: &'static str,
}

impl FrameworkReferenceHandler {
    pub fn new(data_type: DataType, entity: &'static str) -> Self {
        Self { data_type, entity }
    }
}

impl FieldHandler for FrameworkReferenceHandler {
    fn data_type(&self) -> DataType {
        self.data_type
    }

    fn framework_target_entity(&self) -> Option<&'static str> {
        Some(self.entity)
    }

    fn add_property(
        &self,
        field: &FieldDefinition,
        owner: &str,
        model: &mut MetamodelBuilder,
    ) -> Option<PropertyModel> {
        model.ensure_framework_entity(self.entity);
        let property = base_property(field, self.data_type).with_target(self.entity);
        attach(model, owner, property)
    }
}

/// Placeholder kinds that carry no value.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoredHandler;

impl FieldHandler for IgnoredHandler {
    fn data_type(&self) -> DataType {
        DataType::Undefined
    }

    fn is_ignored(&self) -> bool {
        true
    }

    fn add_property(
        &self,
        _field: &FieldDefinition,
        _owner: &str,
        _model: &mut MetamodelBuilder,
    ) -> Option<PropertyModel> {
        None
    }
}

/// Read-only registry of field handlers.
///
/// Built once, then shared behind an `Arc`. There is no global instance;
/// callers construct the table and pass it in.
pub struct HandlerTable {
    handlers: HashMap<FieldKind, Box<dyn FieldHandler>>,
}

impl HandlerTable {
    /// Create an empty table.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Create the table covering every known field kind.
    #[must_use]
    pub fn standard() -> Self {
        Self::empty()
            .register(FieldKind::String, ScalarHandler::new(DataType::String))
            .register(FieldKind::StringArray, ScalarHandler::new(DataType::StringArray))
            .register(FieldKind::Number, ScalarHandler::new(DataType::Number))
            .register(FieldKind::Boolean, ScalarHandler::new(DataType::Boolean))
            .register(FieldKind::DateTime, ScalarHandler::new(DataType::DateTime))
            .register(FieldKind::Dictionary, ScalarHandler::new(DataType::LocalizedString))
            .register(
                FieldKind::DictionaryArray,
                ScalarHandler::new(DataType::LocalizedStringArray),
            )
            .register(FieldKind::GeoLocation, ScalarHandler::new(DataType::GeoLocation))
            .register(FieldKind::Currency, CurrencyHandler)
            .register(FieldKind::SingleSelect, ReferenceHandler::new(DataType::Enum))
            .register(FieldKind::MultiSelect, ReferenceHandler::new(DataType::EnumArray))
            .register(FieldKind::SingleStructRef, ReferenceHandler::new(DataType::Object))
            .register(
                FieldKind::MultiStructRef,
                ReferenceHandler::new(DataType::ObjectArray),
            )
            .register(FieldKind::SingleRelationRef, RelationHandler::new(DataType::Object))
            .register(
                FieldKind::MultiRelationRef,
                RelationHandler::new(DataType::ObjectArray),
            )
            .register(
                FieldKind::UserRef,
                FrameworkReferenceHandler::new(DataType::Object, USER_ENTITY),
            )
            .register(FieldKind::Trigger, IgnoredHandler)
    }

    /// Register a handler, replacing any previous one for the kind.
    #[must_use]
    pub fn register(mut self, kind: FieldKind, handler: impl FieldHandler + 'static) -> Self {
        self.handlers.insert(kind, Box::new(handler));
        self
    }

    /// Find the handler for a kind.
    pub fn lookup(&self, kind: &FieldKind) -> Option<&dyn FieldHandler> {
        self.handlers.get(kind).map(AsRef::as_ref)
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no kinds are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.handlers.keys().map(FieldKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("HandlerTable").field("kinds", &kinds).finish()
    }
}
