//! Translation linker.
//!
//! Consolidates per-locale duplicates into single multi-locale entities and
//! properties. Runs after the [`EntityGraphBuilder`](crate::builder::EntityGraphBuilder)
//! over the complete graph.
//!
//! 1. Every entity's default-locale label is parsed into `(base, locale)`.
//!    Entities sharing a base are merged into one canonical entity: the
//!    default-locale member, or the lowest key when no member is in the
//!    default locale. The others donate their label and properties, so no
//!    two surviving entities share a base.
//! 2. Properties of every surviving entity are grouped the same way, depth
//!    first through object-valued references. Absorbed property keys are
//!    recorded in `linked_translation_properties` and plain types are upgraded
//!    to their localized counterpart.
//! 3. References to merged-away entities are redirected to the canonical
//!    entity, and anything left dangling is pruned.
//!
//! The only failure is an entity without a default-locale label. It is
//! detected before the graph is touched, so a failed link leaves the graph
//! as it was.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::definition::LocalizedLabels;
use crate::dispatch::RELATIONSHIP_HINT;
use crate::error::{MetamodelError, MetamodelResult};
use crate::locale::{same_locale, LocaleLabelParser, ParsedLabel};
use crate::model::{EntityModel, EnumValue, MetamodelBuilder, PropertyModel};

/// What the linker consolidated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkReport {
    /// Entities merged into a canonical sibling and removed.
    pub merged_entities: usize,
    /// Properties merged into a canonical sibling and removed.
    pub merged_properties: usize,
}

/// An entity that will be merged into a canonical one.
#[derive(Debug, Clone)]
struct Sibling {
    key: String,
    locale: String,
}

#[derive(Debug, Default)]
struct MergePlan {
    siblings: BTreeMap<String, Vec<Sibling>>,
    redirects: HashMap<String, String>,
    /// Canonical entities that are not in the default locale, with their own locale.
    own_locales: Vec<(String, String)>,
}

impl MergePlan {
    fn canonical_key<'k>(&'k self, key: &'k str) -> &'k str {
        self.redirects.get(key).map_or(key, String::as_str)
    }
}

/// Merges locale-duplicated entities and properties.
#[derive(Clone)]
pub struct TranslationLinker {
    parser: Arc<dyn LocaleLabelParser>,
    default_locale: String,
}

impl TranslationLinker {
    /// Create a linker using `parser` to read locale markers.
    pub fn new(parser: Arc<dyn LocaleLabelParser>, default_locale: impl Into<String>) -> Self {
        Self {
            parser,
            default_locale: default_locale.into(),
        }
    }

    /// Get the default locale.
    pub fn default_locale(&self) -> &str {
        &self.default_locale
    }

    /// Link the graph in place.
    pub fn link(&self, model: &mut MetamodelBuilder) -> MetamodelResult<LinkReport> {
        let plan = self.plan_entity_merges(model)?;
        let mut report = LinkReport::default();

        for (canonical, locale) in &plan.own_locales {
            if let Some(entity) = model.entity_mut(canonical) {
                add_own_locale_label(&mut entity.labels, locale, &self.default_locale);
            }
        }
        for (canonical, siblings) in &plan.siblings {
            absorb_entity_labels(model, canonical, siblings, &self.default_locale);
        }

        let mut visited = HashSet::new();
        for key in model.entity_keys() {
            if !plan.redirects.contains_key(&key) {
                self.link_entity(model, &key, &plan, &mut visited, &mut report);
            }
        }

        for member in plan.redirects.keys() {
            if model.remove_entity(member).is_some() {
                report.merged_entities += 1;
            }
        }
        redirect_references(model, &plan);
        let pruned = model.prune_dangling_references();

        debug!(
            merged_entities = report.merged_entities,
            merged_properties = report.merged_properties,
            pruned,
            "Translations linked"
        );

        Ok(report)
    }

    fn parse_label(&self, label: &str) -> ParsedLabel {
        self.parser.parse(label, &self.default_locale)
    }

    /// Group entities by parsed base label and pick the canonical member of
    /// every group. Fails on the first entity without a default label.
    fn plan_entity_merges(&self, model: &MetamodelBuilder) -> MetamodelResult<MergePlan> {
        let mut groups: BTreeMap<String, Vec<(String, ParsedLabel)>> = BTreeMap::new();

        for entity in model.entities().filter(|e| !e.is_framework) {
            let label = default_label(&entity.labels, &self.default_locale).ok_or_else(|| {
                MetamodelError::MissingDefaultLabel {
                    entity: entity.key.clone(),
                    locale: self.default_locale.clone(),
                }
            })?;
            let parsed = self.parse_label(label);
            groups
                .entry(parsed.base.clone())
                .or_default()
                .push((entity.key.clone(), parsed));
        }

        let mut plan = MergePlan::default();
        for (base, members) in groups {
            if members.len() < 2 {
                continue;
            }

            // Members are in key order, so a group without a default-locale
            // member always settles on the same canonical entity.
            let Some((canonical_key, canonical)) = members
                .iter()
                .find(|(_, p)| p.is_default)
                .or_else(|| members.first())
            else {
                continue;
            };
            if !canonical.is_default {
                warn!(base = %base, canonical = %canonical_key, "No default-locale entity for translated group, merging into lowest key");
                plan.own_locales
                    .push((canonical_key.clone(), canonical.locale.clone()));
            }

            for (key, parsed) in &members {
                if key == canonical_key {
                    continue;
                }
                if parsed.is_default {
                    warn!(base = %base, entity = %key, canonical = %canonical_key, "Entities share a default-locale label, merging");
                }
                plan.redirects.insert(key.clone(), canonical_key.clone());
                plan.siblings
                    .entry(canonical_key.clone())
                    .or_default()
                    .push(Sibling {
                        key: key.clone(),
                        locale: parsed.locale.clone(),
                    });
            }
        }

        Ok(plan)
    }

    /// Link one surviving entity: pull in its siblings' properties, link the
    /// entities it embeds, then merge its own per-locale properties.
    fn link_entity(
        &self,
        model: &mut MetamodelBuilder,
        key: &str,
        plan: &MergePlan,
        visited: &mut HashSet<String>,
        report: &mut LinkReport,
    ) {
        if !visited.insert(key.to_string()) {
            return;
        }

        if let Some(siblings) = plan.siblings.get(key) {
            for sibling in siblings {
                report.merged_properties += absorb_sibling_properties(model, key, sibling, &self.default_locale);
            }
        }

        let Some(entity) = model.entity(key) else {
            return;
        };
        let children: Vec<String> = entity
            .properties
            .iter()
            .filter(|p| p.data_type.is_object())
            .filter_map(|p| p.target_entity_key.as_deref())
            .map(|target| plan.canonical_key(target).to_string())
            .collect();
        for child in children {
            self.link_entity(model, &child, plan, visited, report);
        }

        if let Some(entity) = model.entity_mut(key) {
            report.merged_properties += self.link_properties(entity);
        }
    }

    /// Merge per-locale sibling properties of one entity. Returns the number
    /// of properties removed.
    fn link_properties(&self, entity: &mut EntityModel) -> usize {
        let parsed: Vec<ParsedLabel> = entity
            .properties
            .iter()
            .map(|p| match default_label(&p.labels, &self.default_locale) {
                Some(label) => self.parse_label(label),
                None => ParsedLabel {
                    base: p.key.clone(),
                    locale: self.default_locale.clone(),
                    is_default: true,
                },
            })
            .collect();

        let mut groups: Vec<(&str, Vec<usize>)> = Vec::new();
        for (idx, label) in parsed.iter().enumerate() {
            match groups.iter_mut().find(|(base, _)| *base == label.base) {
                Some((_, members)) => members.push(idx),
                None => groups.push((label.base.as_str(), vec![idx])),
            }
        }

        let mut removed = BTreeSet::new();
        for (base, members) in &groups {
            if members.len() < 2 {
                continue;
            }
            let Some(&canonical) = members
                .iter()
                .find(|&&i| parsed[i].is_default)
                .or_else(|| members.first())
            else {
                continue;
            };
            if !parsed[canonical].is_default {
                warn!(
                    entity = %entity.key,
                    base = %base,
                    canonical = %entity.properties[canonical].key,
                    "No default-locale property for translated group, merging into first declared"
                );
                add_own_locale_label(
                    &mut entity.properties[canonical].labels,
                    &parsed[canonical].locale,
                    &self.default_locale,
                );
            }

            for &member in members {
                if member == canonical {
                    continue;
                }
                if parsed[member].is_default {
                    warn!(
                        entity = %entity.key,
                        property = %entity.properties[member].key,
                        canonical = %entity.properties[canonical].key,
                        "Properties share a default-locale label, merging"
                    );
                }

                let absorbed = entity.properties[member].clone();
                merge_translation(
                    &mut entity.properties[canonical],
                    &absorbed,
                    &parsed[member].locale,
                    absorbed.key.clone(),
                    &self.default_locale,
                );
                removed.insert(member);
            }
        }

        let mut idx = 0;
        entity.properties.retain(|_| {
            let keep = !removed.contains(&idx);
            idx += 1;
            keep
        });

        for property in &mut entity.properties {
            finalize_property(property);
        }

        removed.len()
    }
}

impl std::fmt::Debug for TranslationLinker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationLinker")
            .field("default_locale", &self.default_locale)
            .finish_non_exhaustive()
    }
}

/// Get the non-empty label for the default locale.
fn default_label<'l>(labels: &'l LocalizedLabels, default_locale: &str) -> Option<&'l str> {
    labels
        .get(default_locale)
        .or_else(|| {
            labels
                .iter()
                .find(|(locale, _)| same_locale(locale, default_locale))
                .map(|(_, label)| label)
        })
        .map(String::as_str)
        .filter(|label| !label.trim().is_empty())
}

/// Label text a member contributes for its locale: its own label in that
/// locale when it has one, else its default label.
fn member_label<'l>(labels: &'l LocalizedLabels, locale: &str, default_locale: &str) -> Option<&'l str> {
    labels
        .get(locale)
        .map(String::as_str)
        .filter(|label| !label.trim().is_empty())
        .or_else(|| default_label(labels, default_locale))
}

/// Copy a non-default canonical member's default label under its own locale.
fn add_own_locale_label(labels: &mut LocalizedLabels, locale: &str, default_locale: &str) {
    if let Some(text) = default_label(labels, default_locale).map(str::to_string) {
        labels.entry(locale.to_string()).or_insert(text);
    }
}

fn absorb_entity_labels(
    model: &mut MetamodelBuilder,
    canonical: &str,
    siblings: &[Sibling],
    default_locale: &str,
) {
    let contributions: Vec<(String, Option<String>, Option<Vec<EnumValue>>)> = siblings
        .iter()
        .filter_map(|sibling| {
            model.entity(&sibling.key).map(|member| {
                (
                    sibling.locale.clone(),
                    member_label(&member.labels, &sibling.locale, default_locale)
                        .map(str::to_string),
                    member.enum_values.clone(),
                )
            })
        })
        .collect();

    let Some(entity) = model.entity_mut(canonical) else {
        return;
    };

    for (locale, label, values) in contributions {
        if let Some(label) = label {
            entity.labels.entry(locale.clone()).or_insert(label);
        }
        let (Some(canonical_values), Some(member_values)) = (entity.enum_values.as_mut(), values)
        else {
            continue;
        };
        for value in member_values {
            match canonical_values.iter_mut().find(|v| v.id == value.id) {
                Some(existing) => {
                    if let Some(text) = member_label(&value.labels, &locale, default_locale) {
                        existing
                            .labels
                            .entry(locale.clone())
                            .or_insert_with(|| text.to_string());
                    }
                }
                None => canonical_values.push(value),
            }
        }
    }
}

/// Move a merged-away sibling's properties into the canonical entity.
/// Properties whose key is already taken are folded into the existing one,
/// except relation id properties, which are dropped. Returns the number of
/// folded properties.
fn absorb_sibling_properties(
    model: &mut MetamodelBuilder,
    canonical: &str,
    sibling: &Sibling,
    default_locale: &str,
) -> usize {
    let Some(member) = model.entity_mut(&sibling.key) else {
        return 0;
    };
    let properties = std::mem::take(&mut member.properties);

    let Some(entity) = model.entity_mut(canonical) else {
        return 0;
    };

    let mut folded = 0;
    for property in properties {
        match entity.property_mut(&property.key) {
            Some(existing) if property.semantic_hint.as_deref() == Some(RELATIONSHIP_HINT) => {
                debug!(entity = %canonical, property = %existing.key, "Dropping duplicate relation id property");
            }
            Some(existing) => {
                let absorbed_key = format!("{}.{}", sibling.key, property.key);
                merge_translation(existing, &property, &sibling.locale, absorbed_key, default_locale);
                folded += 1;
            }
            None => entity.properties.push(property),
        }
    }
    folded
}

fn merge_translation(
    canonical: &mut PropertyModel,
    absorbed: &PropertyModel,
    locale: &str,
    absorbed_key: String,
    default_locale: &str,
) {
    if let Some(text) = member_label(&absorbed.labels, locale, default_locale) {
        canonical
            .labels
            .entry(locale.to_string())
            .or_insert_with(|| text.to_string());
    }
    canonical
        .linked_translation_properties
        .get_or_insert_with(BTreeSet::new)
        .insert(absorbed_key);
    if let Some(nested) = &absorbed.linked_translation_properties {
        canonical
            .linked_translation_properties
            .get_or_insert_with(BTreeSet::new)
            .extend(nested.iter().cloned());
    }
}

/// Reset empty link sets to `None` and upgrade translated plain types.
fn finalize_property(property: &mut PropertyModel) {
    match &property.linked_translation_properties {
        Some(linked) if linked.is_empty() => property.linked_translation_properties = None,
        Some(_) => property.data_type = property.data_type.localized(),
        None => {}
    }
}

fn redirect_references(model: &mut MetamodelBuilder, plan: &MergePlan) {
    if plan.redirects.is_empty() {
        return;
    }

    for key in model.entity_keys() {
        let Some(entity) = model.entity_mut(&key) else {
            continue;
        };

        if let Some(parent) = entity.parent_key.take() {
            let parent = plan.canonical_key(&parent).to_string();
            entity.parent_key = (parent != entity.key).then_some(parent);
        }

        for property in &mut entity.properties {
            if let Some(target) = &property.target_entity_key {
                if let Some(canonical) = plan.redirects.get(target) {
                    property.target_entity_key = Some(canonical.clone());
                }
            }
        }
    }
}
