//! Metamodel service.
//!
//! The one entry point downstream code calls. Wires the remote source, fetch
//! policy, graph builder, translation linker and cache into a single
//! [`MetamodelService::build_metamodel`] call that returns either a complete
//! metamodel or a typed error.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::builder::EntityGraphBuilder;
use crate::cache::SingleFlight;
use crate::config::MetamodelConfig;
use crate::definition::{SchemaClassification, SchemaDefinition, SchemaSummary};
use crate::dispatch::HandlerTable;
use crate::error::{MetamodelError, MetamodelResult};
use crate::linker::TranslationLinker;
use crate::locale::LocaleLabelParser;
use crate::model::Metamodel;
use crate::resilience::{CredentialStore, FetchPolicy};
use crate::traits::{CredentialRefresher, MetamodelCache, SchemaSource};

/// Builds, caches and serves metamodels.
pub struct MetamodelService {
    source: Arc<dyn SchemaSource>,
    cache: Arc<dyn MetamodelCache>,
    builder: EntityGraphBuilder,
    parser: Arc<dyn LocaleLabelParser>,
    refresher: Option<Arc<dyn CredentialRefresher>>,
    credentials: Arc<CredentialStore>,
    flights: SingleFlight,
}

impl MetamodelService {
    /// Create a new service.
    pub fn new(
        source: Arc<dyn SchemaSource>,
        cache: Arc<dyn MetamodelCache>,
        handlers: Arc<HandlerTable>,
        parser: Arc<dyn LocaleLabelParser>,
    ) -> Self {
        Self {
            source,
            cache,
            builder: EntityGraphBuilder::new(handlers),
            parser,
            refresher: None,
            credentials: Arc::new(CredentialStore::new()),
            flights: SingleFlight::new(),
        }
    }

    /// Set the collaborator used to refresh rejected credentials.
    #[must_use]
    pub fn with_refresher(mut self, refresher: Arc<dyn CredentialRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Get the metamodel for `config`, building it if it is not cached.
    ///
    /// Concurrent calls for the same configuration share one build. A failed
    /// build leaves the cache untouched.
    #[instrument(skip(self, config), fields(identifier = %config.identifier))]
    pub async fn build_metamodel(&self, config: &MetamodelConfig) -> MetamodelResult<Arc<Metamodel>> {
        config.validate()?;
        let key = config.cache_key();

        if let Some(cached) = self.cache.get(&key).await {
            debug!(key = %key, "Metamodel cache hit");
            return Ok(cached);
        }

        let _flight = self.flights.acquire(&key).await;

        if let Some(cached) = self.cache.get(&key).await {
            debug!(key = %key, "Metamodel built by concurrent caller");
            return Ok(cached);
        }

        let metamodel = Arc::new(self.build_uncached(config).await?);
        self.cache
            .store(&key, metamodel.clone(), config.cache_ttl())
            .await;

        Ok(metamodel)
    }

    /// Drop the cached metamodel for `config`. The next call rebuilds it.
    pub async fn invalidate(&self, config: &MetamodelConfig) {
        let key = config.cache_key();
        self.cache.invalidate(&key).await;
        info!(key = %key, "Metamodel invalidated");
    }

    /// Run the full pipeline without consulting the cache.
    pub async fn build_uncached(&self, config: &MetamodelConfig) -> MetamodelResult<Metamodel> {
        let policy = Arc::new(
            FetchPolicy::new(config.retry.clone(), self.refresher.clone())
                .with_credentials(self.credentials.clone()),
        );

        let summaries = self.fetch_schema_list(&policy).await?;
        let mut definitions = self.fetch_schema_details(config, &policy, &summaries).await?;
        if config.fetch_enum_values {
            self.fetch_enum_values(config, &policy, &mut definitions).await?;
        }

        let (mut model, report) =
            self.builder
                .build(&definitions, &config.identifier, config.capabilities);

        let linker = TranslationLinker::new(self.parser.clone(), config.default_locale.clone());
        let linked = linker.link(&mut model)?;

        let metamodel = model.freeze();
        info!(
            identifier = %config.identifier,
            schemas = definitions.len(),
            entities = metamodel.entity_count(),
            skipped_fields = report.skipped.len(),
            broken_parents = report.broken_parents.len(),
            merged_entities = linked.merged_entities,
            merged_properties = linked.merged_properties,
            "Metamodel built"
        );

        Ok(metamodel)
    }

    async fn fetch_schema_list(&self, policy: &FetchPolicy) -> MetamodelResult<Vec<SchemaSummary>> {
        let source = &self.source;
        policy
            .execute("schemas", |ctx| async move {
                source.fetch_schema_list(&ctx).await
            })
            .await
    }

    /// Fetch details in `batch_size` pages, at most `max_concurrent_batches`
    /// at a time. Results keep the order of the schema list.
    async fn fetch_schema_details(
        &self,
        config: &MetamodelConfig,
        policy: &Arc<FetchPolicy>,
        summaries: &[SchemaSummary],
    ) -> MetamodelResult<Vec<SchemaDefinition>> {
        let ids: Vec<String> = summaries.iter().map(|s| s.id.clone()).collect();
        let batches: Vec<Vec<String>> = ids.chunks(config.batch_size).map(<[String]>::to_vec).collect();
        let batch_count = batches.len();
        debug!(schemas = ids.len(), batches = batch_count, "Fetching schema details");

        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_batches));
        let mut join_set = JoinSet::new();

        for (index, batch) in batches.into_iter().enumerate() {
            let policy = policy.clone();
            let source = self.source.clone();
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| MetamodelError::internal("batch semaphore closed"))?;
                let endpoint = format!("schemas/details[{index}]");
                let definitions = policy
                    .execute(&endpoint, |ctx| {
                        let source = source.clone();
                        let batch = batch.clone();
                        async move { source.fetch_schema_details(&ctx, &batch).await }
                    })
                    .await?;
                Ok::<_, MetamodelError>((index, definitions))
            });
        }

        let mut pages: Vec<Vec<SchemaDefinition>> = vec![Vec::new(); batch_count];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok((index, definitions))) => pages[index] = definitions,
                Ok(Err(e)) => return Err(e),
                Err(e) => {
                    return Err(MetamodelError::internal(format!(
                        "schema details task failed: {e}"
                    )))
                }
            }
        }

        let mut definitions: Vec<SchemaDefinition> = pages.into_iter().flatten().collect();
        fill_classifications(&mut definitions, summaries);
        Ok(definitions)
    }

    /// Fetch values of list schemas whose details came without them.
    async fn fetch_enum_values(
        &self,
        config: &MetamodelConfig,
        policy: &Arc<FetchPolicy>,
        definitions: &mut [SchemaDefinition],
    ) -> MetamodelResult<()> {
        let pending: Vec<(usize, String)> = definitions
            .iter()
            .enumerate()
            .filter(|(_, d)| d.classification == SchemaClassification::List && d.enum_values.is_empty())
            .map(|(index, d)| (index, d.id.clone()))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        debug!(lists = pending.len(), "Fetching enum values");

        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_batches));
        let mut join_set = JoinSet::new();

        for (index, schema_id) in pending {
            let policy = policy.clone();
            let source = self.source.clone();
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| MetamodelError::internal("enum value semaphore closed"))?;
                let endpoint = format!("schemas/{schema_id}/values");
                let values = policy
                    .execute(&endpoint, |ctx| {
                        let source = source.clone();
                        let schema_id = schema_id.clone();
                        async move { source.fetch_enum_values(&ctx, &schema_id).await }
                    })
                    .await?;
                Ok::<_, MetamodelError>((index, values))
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok((index, values))) => definitions[index].enum_values = values,
                Ok(Err(e)) => return Err(e),
                Err(e) => {
                    return Err(MetamodelError::internal(format!(
                        "enum value task failed: {e}"
                    )))
                }
            }
        }

        Ok(())
    }
}

/// Details that come back without a classification inherit the one the
/// schema list reported.
fn fill_classifications(definitions: &mut [SchemaDefinition], summaries: &[SchemaSummary]) {
    for definition in definitions
        .iter_mut()
        .filter(|d| d.classification == SchemaClassification::Other)
    {
        if let Some(summary) = summaries
            .iter()
            .find(|s| s.id == definition.id && s.classification != SchemaClassification::Other)
        {
            definition.classification = summary.classification;
        }
    }

    let missing = summaries
        .iter()
        .filter(|s| !definitions.iter().any(|d| d.id == s.id))
        .count();
    if missing > 0 {
        warn!(missing, "Schema details missing for listed schemas");
    }
}

impl std::fmt::Debug for MetamodelService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetamodelService")
            .field("builder", &self.builder)
            .field("has_refresher", &self.refresher.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_classifications_from_summary() {
        let mut definitions = vec![
            SchemaDefinition::new("Colors", SchemaClassification::Other),
            SchemaDefinition::new("Asset", SchemaClassification::Content),
        ];
        let summaries = vec![
            SchemaSummary {
                id: "Colors".to_string(),
                classification: SchemaClassification::List,
            },
            SchemaSummary {
                id: "Asset".to_string(),
                classification: SchemaClassification::Layer,
            },
        ];

        fill_classifications(&mut definitions, &summaries);

        assert_eq!(definitions[0].classification, SchemaClassification::List);
        assert_eq!(definitions[1].classification, SchemaClassification::Content);
    }
}
