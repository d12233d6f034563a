//! # Metagraph HTTP Source
//!
//! [`SchemaSource`](metagraph::traits::SchemaSource) and
//! [`CredentialRefresher`](metagraph::traits::CredentialRefresher)
//! implementations for remote systems exposing their schema over a JSON API
//! secured with OAuth2.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use metagraph::prelude::*;
//! use metagraph_source_http::{HttpSchemaSource, HttpSourceConfig, OAuthConfig, OAuthRefresher};
//!
//! let source = HttpSchemaSource::new(&HttpSourceConfig::new("https://cms.example.com/api"))?;
//! let refresher = OAuthRefresher::new(OAuthConfig::new(
//!     "https://auth.example.com/oauth/token",
//!     "metagraph",
//!     client_secret,
//!     refresh_token,
//! ))?;
//!
//! let service = MetamodelService::new(
//!     Arc::new(source),
//!     Arc::new(InMemoryMetamodelCache::new()),
//!     Arc::new(HandlerTable::standard()),
//!     Arc::new(SuffixLocaleParser::new()),
//! )
//! .with_refresher(Arc::new(refresher));
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod source;

pub use auth::OAuthRefresher;
pub use config::{HttpSourceConfig, OAuthConfig};
pub use error::{HttpSourceError, HttpSourceResult};
pub use source::{parse_retry_after, HttpSchemaSource};
