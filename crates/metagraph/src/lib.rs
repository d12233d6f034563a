//! # Metagraph
//!
//! Compiles the dynamic schema of a remote content system into an immutable
//! entity/property metamodel.
//!
//! The remote system describes its data as schemas (content, layers, structs,
//! lists) whose fields carry kinds, references and localized labels. Languages
//! are often modelled as sibling schemas or fields (`Title_en`, `Title_de`).
//! This crate fetches those definitions, turns them into entities and
//! properties, links translation siblings into one canonical element per
//! concept, and hands out a frozen [`model::Metamodel`].
//!
//! ## Example
//!
//! ```ignore
//! use metagraph::prelude::*;
//!
//! let service = MetamodelService::new(
//!     source,
//!     Arc::new(InMemoryMetamodelCache::new()),
//!     Arc::new(HandlerTable::standard()),
//!     Arc::new(SuffixLocaleParser::new()),
//! )
//! .with_refresher(refresher);
//!
//! let config = MetamodelConfig::new("acme").with_default_locale("en");
//! let metamodel = service.build_metamodel(&config).await?;
//!
//! let asset = metamodel.get_entity("Asset").expect("asset entity");
//! ```
//!
//! ## Crate Organization
//!
//! - [`definition`] - Raw schema definitions as the remote system reports them
//! - [`model`] - Entity/property model, the mutable builder and the frozen metamodel
//! - [`dispatch`] - Field kind handlers
//! - [`builder`] - Entity graph construction
//! - [`locale`] - Locale marker parsing in labels
//! - [`linker`] - Translation sibling linking
//! - [`resilience`] - Retry, backoff and credential refresh for remote calls
//! - [`cache`] - Metamodel cache and single-flight guard
//! - [`traits`] - Collaborator traits
//! - [`config`] - Build configuration
//! - [`error`] - Error types
//! - [`service`] - The build pipeline

pub mod builder;
pub mod cache;
pub mod config;
pub mod definition;
pub mod dispatch;
pub mod error;
pub mod linker;
pub mod locale;
pub mod model;
pub mod resilience;
pub mod service;
pub mod traits;

/// Prelude module for convenient imports.
///
/// ```
/// use metagraph::prelude::*;
/// ```
pub mod prelude {
    // Definitions
    pub use crate::definition::{
        EnumValueDefinition, FieldDefinition, FieldKind, LocalizedLabels, SchemaClassification,
        SchemaDefinition, SchemaSummary,
    };

    // Model
    pub use crate::model::{
        Capabilities, DataType, EntityKind, EntityModel, EnumValue, Metamodel, MetamodelBuilder,
        PropertyModel,
    };

    // Error handling
    pub use crate::error::{MetamodelError, MetamodelResult, RefreshError, RemoteError};

    // Traits
    pub use crate::traits::{AccessToken, CredentialRefresher, MetamodelCache, SchemaSource};

    // Building
    pub use crate::builder::{BuildReport, EntityGraphBuilder, SkipReason};
    pub use crate::dispatch::{FieldHandler, HandlerTable};
    pub use crate::linker::{LinkReport, TranslationLinker};
    pub use crate::locale::{LocaleLabelParser, ParsedLabel, SuffixLocaleParser};

    // Resilience and caching
    pub use crate::cache::InMemoryMetamodelCache;
    pub use crate::config::{MetamodelConfig, RetryConfig};
    pub use crate::resilience::{CallContext, FetchPolicy};

    // Service
    pub use crate::service::MetamodelService;

    // Re-export async_trait for implementors
    pub use async_trait::async_trait;
}
