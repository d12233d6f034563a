//! Common test utilities for metagraph integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use metagraph::prelude::*;

static INIT: Once = Once::new();

/// Install a test subscriber when `RUST_LOG` is set, once per test binary.
pub fn init_test_logging() {
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

/// Failure injected into a fake call.
pub type Failure = Box<dyn Fn() -> RemoteError + Send + Sync>;

/// In-memory schema source with call counters and scripted failures.
#[derive(Default)]
pub struct FakeSource {
    schemas: Vec<SchemaDefinition>,
    enum_values: HashMap<String, Vec<EnumValueDefinition>>,
    required_token: Option<String>,
    details_delay: Duration,
    list_failures: Mutex<VecDeque<Failure>>,
    details_failure: Option<Failure>,
    pub list_calls: AtomicUsize,
    pub details_calls: AtomicUsize,
    pub enum_calls: AtomicUsize,
    pub details_in_flight: AtomicUsize,
    pub max_details_in_flight: AtomicUsize,
}

impl FakeSource {
    pub fn new(schemas: Vec<SchemaDefinition>) -> Self {
        Self {
            schemas,
            ..Self::default()
        }
    }

    /// Serve these values from the enum-value call instead of the details.
    pub fn with_enum_values(mut self, schema_id: &str, values: Vec<EnumValueDefinition>) -> Self {
        self.enum_values.insert(schema_id.to_string(), values);
        self
    }

    /// Reject every call whose bearer differs from `token`.
    pub fn requiring_token(mut self, token: &str) -> Self {
        self.required_token = Some(token.to_string());
        self
    }

    pub fn with_details_delay(mut self, delay: Duration) -> Self {
        self.details_delay = delay;
        self
    }

    /// Fail the next list calls in order, then succeed.
    pub fn with_list_failures(self, failures: Vec<Failure>) -> Self {
        *self.list_failures.lock().unwrap() = failures.into();
        self
    }

    /// Fail every details call.
    pub fn with_details_failure(mut self, failure: Failure) -> Self {
        self.details_failure = Some(failure);
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn details_calls(&self) -> usize {
        self.details_calls.load(Ordering::SeqCst)
    }

    fn check_token(&self, ctx: &CallContext) -> Result<(), RemoteError> {
        match &self.required_token {
            Some(required) if ctx.bearer() != Some(required.as_str()) => {
                Err(RemoteError::Unauthorized)
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl SchemaSource for FakeSource {
    async fn fetch_schema_list(&self, ctx: &CallContext) -> Result<Vec<SchemaSummary>, RemoteError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.list_failures.lock().unwrap().pop_front() {
            return Err(failure());
        }
        self.check_token(ctx)?;
        tokio::time::sleep(Duration::from_millis(5)).await;

        Ok(self
            .schemas
            .iter()
            .map(|s| SchemaSummary {
                id: s.id.clone(),
                classification: s.classification,
            })
            .collect())
    }

    async fn fetch_schema_details(
        &self,
        ctx: &CallContext,
        ids: &[String],
    ) -> Result<Vec<SchemaDefinition>, RemoteError> {
        self.details_calls.fetch_add(1, Ordering::SeqCst);
        self.check_token(ctx)?;
        if let Some(failure) = &self.details_failure {
            return Err(failure());
        }

        let now = self.details_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_details_in_flight.fetch_max(now, Ordering::SeqCst);
        // Later batches finish first so ordering has to be restored.
        let stagger = self
            .schemas
            .iter()
            .position(|s| Some(&s.id) == ids.first())
            .map_or(0, |p| self.schemas.len().saturating_sub(p));
        tokio::time::sleep(self.details_delay * u32::try_from(stagger).unwrap_or(1)).await;
        self.details_in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(self
            .schemas
            .iter()
            .filter(|s| ids.contains(&s.id))
            .cloned()
            .collect())
    }

    async fn fetch_enum_values(
        &self,
        ctx: &CallContext,
        schema_id: &str,
    ) -> Result<Vec<EnumValueDefinition>, RemoteError> {
        self.enum_calls.fetch_add(1, Ordering::SeqCst);
        self.check_token(ctx)?;
        self.enum_values
            .get(schema_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound {
                resource: schema_id.to_string(),
            })
    }
}

/// Refresher handing out a fixed token and counting calls.
pub struct CountingRefresher {
    token: String,
    pub calls: AtomicUsize,
}

impl CountingRefresher {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialRefresher for CountingRefresher {
    async fn refresh_credentials(&self) -> Result<AccessToken, RefreshError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AccessToken::new(self.token.clone()))
    }
}

/// Service over `source` with the standard handlers and an in-memory cache.
pub fn service_for(source: Arc<FakeSource>) -> (MetamodelService, Arc<InMemoryMetamodelCache>) {
    let cache = Arc::new(InMemoryMetamodelCache::new());
    let service = MetamodelService::new(
        source,
        cache.clone(),
        Arc::new(HandlerTable::standard()),
        Arc::new(SuffixLocaleParser::new()),
    );
    (service, cache)
}

/// Configuration without backoff delays.
pub fn test_config() -> MetamodelConfig {
    MetamodelConfig::new("acme").with_retry(RetryConfig::immediate(3))
}

/// Content schema with an English label.
pub fn content_schema(id: &str, label: &str) -> SchemaDefinition {
    SchemaDefinition::new(id, SchemaClassification::Content).with_label("en", label)
}

/// List schema with English-labelled values.
pub fn list_schema(id: &str, values: &[&str]) -> SchemaDefinition {
    values.iter().fold(
        SchemaDefinition::new(id, SchemaClassification::List).with_label("en", id),
        |schema, value| schema.with_enum_value(EnumValueDefinition::new(*value).with_label("en", *value)),
    )
}

/// Field with an English label.
pub fn field(id: &str, kind: FieldKind, label: &str) -> FieldDefinition {
    FieldDefinition::new(id, kind).with_label("en", label)
}

/// A small catalogue: assets with translated titles, a tag list and a
/// relation to products.
pub fn catalogue() -> Vec<SchemaDefinition> {
    vec![
        content_schema("Asset", "Asset")
            .with_field(field("Title_en", FieldKind::String, "Title"))
            .with_field(field("Title_de", FieldKind::String, "Title (de)"))
            .with_field(field("Tags", FieldKind::MultiSelect, "Tags").with_target("Tags"))
            .with_field(
                field("Product", FieldKind::SingleRelationRef, "Product").with_target("Product"),
            )
            .with_field(field("Owner", FieldKind::UserRef, "Owner")),
        list_schema("Tags", &["red", "green"]),
        content_schema("Product", "Product")
            .with_field(field("Name", FieldKind::String, "Name").searchable()),
    ]
}
