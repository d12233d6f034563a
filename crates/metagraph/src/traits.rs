//! Collaborator traits.
//!
//! The build consumes a remote [`SchemaSource`], an optional
//! [`CredentialRefresher`] and a [`MetamodelCache`]. All are object safe and
//! used as `Arc<dyn …>`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use crate::definition::{EnumValueDefinition, SchemaDefinition, SchemaSummary};
use crate::error::{RefreshError, RemoteError};
use crate::model::Metamodel;
use crate::resilience::CallContext;

/// Bearer credential handed to remote calls.
pub struct AccessToken {
    secret: SecretString,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// Create a token without known expiry.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            secret: SecretString::from(token.into()),
            expires_at: None,
        }
    }

    /// Set the expiry.
    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Get the raw token value.
    pub fn expose(&self) -> &str {
        self.secret.expose_secret()
    }

    /// Get the expiry, if known.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Returns true if the token is expired or will expire within the grace period.
    pub fn is_expired(&self, grace_period: chrono::Duration) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Utc::now() + grace_period >= expires_at)
    }
}

impl Clone for AccessToken {
    fn clone(&self) -> Self {
        Self {
            secret: SecretString::from(self.secret.expose_secret().to_string()),
            expires_at: self.expires_at,
        }
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Remote system exposing the schema.
///
/// Implementations perform exactly one request per call and report the raw
/// outcome; retries, backoff and credential refresh are applied by the
/// caller's fetch policy.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// List all schemas.
    async fn fetch_schema_list(&self, ctx: &CallContext) -> Result<Vec<SchemaSummary>, RemoteError>;

    /// Fetch full definitions for a batch of schema ids.
    async fn fetch_schema_details(
        &self,
        ctx: &CallContext,
        ids: &[String],
    ) -> Result<Vec<SchemaDefinition>, RemoteError>;

    /// Fetch the values of a list schema.
    async fn fetch_enum_values(
        &self,
        ctx: &CallContext,
        schema_id: &str,
    ) -> Result<Vec<EnumValueDefinition>, RemoteError>;
}

/// Obtains fresh credentials after the remote system rejected the current ones.
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    /// Refresh the credentials.
    async fn refresh_credentials(&self) -> Result<AccessToken, RefreshError>;
}

/// Storage for built metamodels.
#[async_trait]
pub trait MetamodelCache: Send + Sync {
    /// Get a cached metamodel.
    async fn get(&self, key: &str) -> Option<Arc<Metamodel>>;

    /// Store a metamodel for `ttl`.
    async fn store(&self, key: &str, model: Arc<Metamodel>, ttl: Duration);

    /// Drop a cached metamodel.
    async fn invalidate(&self, key: &str);
}
