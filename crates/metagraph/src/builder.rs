//! Entity graph builder.
//!
//! Turns raw [`SchemaDefinition`]s into a [`MetamodelBuilder`] in two passes:
//! first every entity (parents resolved through memoized recursion), then
//! every property through the [`HandlerTable`]. Reference fields can only
//! resolve once all entities exist, and definitions arrive in arbitrary order,
//! hence the split.
//!
//! Nothing in here fails the build. Broken parents, unknown kinds and
//! unresolved targets are logged, recorded in the [`BuildReport`] and dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::definition::{FieldDefinition, FieldKind, SchemaDefinition};
use crate::dispatch::HandlerTable;
use crate::model::{Capabilities, EntityKind, EntityModel, EnumValue, MetamodelBuilder};

/// Why a field did not become a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No handler is registered for the kind.
    UnsupportedKind,
    /// The kind is registered as deliberately ignored.
    Ignored,
    /// The referenced schema never became an entity.
    UnresolvedTarget,
    /// The owner already has a property with this key.
    DuplicateKey,
}

/// A field that was dropped during the property pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedField {
    pub owner: String,
    pub field: String,
    pub kind: FieldKind,
    pub reason: SkipReason,
}

/// Everything the builder dropped or degraded.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    /// Fields that produced no property.
    pub skipped: Vec<SkippedField>,
    /// Entities whose parent pointer was cyclic or unresolvable.
    pub broken_parents: Vec<String>,
}

impl BuildReport {
    /// Count skipped fields with a given reason.
    pub fn count(&self, reason: SkipReason) -> usize {
        self.skipped.iter().filter(|s| s.reason == reason).count()
    }

    fn skip(&mut self, owner: &str, field: &FieldDefinition, reason: SkipReason) {
        self.skipped.push(SkippedField {
            owner: owner.to_string(),
            field: field.id.clone(),
            kind: field.kind.clone(),
            reason,
        });
    }
}

/// Builds the entity graph from schema definitions.
#[derive(Debug, Clone)]
pub struct EntityGraphBuilder {
    handlers: Arc<HandlerTable>,
}

impl EntityGraphBuilder {
    /// Create a builder dispatching through `handlers`.
    pub fn new(handlers: Arc<HandlerTable>) -> Self {
        Self { handlers }
    }

    /// Build the graph. Never fails; see [`BuildReport`] for what was dropped.
    pub fn build(
        &self,
        definitions: &[SchemaDefinition],
        identifier: &str,
        capabilities: Capabilities,
    ) -> (MetamodelBuilder, BuildReport) {
        let mut model = MetamodelBuilder::new(identifier, capabilities);
        let mut report = BuildReport::default();

        let mut index: HashMap<&str, &SchemaDefinition> = HashMap::with_capacity(definitions.len());
        let mut unique: Vec<&SchemaDefinition> = Vec::with_capacity(definitions.len());
        for definition in definitions {
            if index.contains_key(definition.id.as_str()) {
                warn!(schema = %definition.id, "Ignoring duplicate schema definition");
                continue;
            }
            index.insert(definition.id.as_str(), definition);
            unique.push(definition);
        }

        let mut entities = EntityPass {
            index: &index,
            in_progress: HashSet::new(),
            model: &mut model,
            report: &mut report,
        };
        for definition in unique.iter().copied() {
            entities.ensure_entity(definition);
        }

        for definition in &unique {
            for field in &definition.fields {
                self.dispatch_field(field, &definition.id, &mut model, &mut report);
            }
        }

        debug!(
            identifier = %identifier,
            entities = model.entity_count(),
            skipped = report.skipped.len(),
            broken_parents = report.broken_parents.len(),
            "Entity graph built"
        );

        (model, report)
    }

    fn dispatch_field(
        &self,
        field: &FieldDefinition,
        owner: &str,
        model: &mut MetamodelBuilder,
        report: &mut BuildReport,
    ) {
        if model
            .entity(owner)
            .is_some_and(|entity| entity.has_property(&field.id))
        {
            warn!(owner = %owner, field = %field.id, "Duplicate field key, skipping");
            report.skip(owner, field, SkipReason::DuplicateKey);
            return;
        }

        let Some(handler) = self.handlers.lookup(&field.kind) else {
            warn!(owner = %owner, field = %field.id, kind = %field.kind, "Unsupported field kind, skipping");
            report.skip(owner, field, SkipReason::UnsupportedKind);
            return;
        };

        if handler.is_ignored() {
            debug!(owner = %owner, field = %field.id, kind = %field.kind, "Ignoring placeholder field");
            report.skip(owner, field, SkipReason::Ignored);
            return;
        }

        if handler.add_property(field, owner, model).is_none() {
            warn!(
                owner = %owner,
                field = %field.id,
                kind = %field.kind,
                target = field.target_schema_id.as_deref().unwrap_or("<none>"),
                "Field target entity not found, skipping"
            );
            report.skip(owner, field, SkipReason::UnresolvedTarget);
        }
    }
}

/// State of the entity pass.
struct EntityPass<'a, 'm> {
    index: &'m HashMap<&'a str, &'a SchemaDefinition>,
    in_progress: HashSet<&'a str>,
    model: &'m mut MetamodelBuilder,
    report: &'m mut BuildReport,
}

impl<'a> EntityPass<'a, '_> {
    /// Make sure an entity exists for `definition`. Returns `false` only when
    /// the definition is already being resolved further up the stack.
    fn ensure_entity(&mut self, definition: &'a SchemaDefinition) -> bool {
        let key = definition.id.as_str();
        if self.model.contains_entity(key) {
            return true;
        }
        if !self.in_progress.insert(key) {
            return false;
        }

        let parent_key = definition
            .parent_id
            .as_deref()
            .and_then(|parent_id| self.resolve_parent(key, parent_id));

        let kind = EntityKind::from(definition.classification);
        let mut entity = EntityModel::new(key, kind)
            .with_labels(definition.labels.clone())
            .with_parent(parent_key);
        if kind == EntityKind::Enum {
            entity.enum_values = Some(
                definition
                    .enum_values
                    .iter()
                    .map(|value| EnumValue {
                        id: value.id.clone(),
                        labels: value.labels.clone(),
                    })
                    .collect(),
            );
        }

        self.model.insert_entity(entity);
        self.in_progress.remove(key);
        true
    }

    fn resolve_parent(&mut self, key: &str, parent_id: &str) -> Option<String> {
        let index = self.index;
        let resolved = match index.get(parent_id).copied() {
            Some(_) if parent_id == key => {
                warn!(entity = %key, "Schema is its own parent, ignoring parent");
                false
            }
            Some(parent) => {
                let ok = self.ensure_entity(parent);
                if !ok {
                    warn!(entity = %key, parent = %parent_id, "Parent cycle detected, ignoring parent");
                }
                ok
            }
            None => {
                warn!(entity = %key, parent = %parent_id, "Parent schema not found, ignoring parent");
                false
            }
        };

        if resolved {
            Some(parent_id.to_string())
        } else {
            self.report.broken_parents.push(key.to_string());
            None
        }
    }
}
