//! Metamodel error types
//!
//! Two layers: [`RemoteError`] is the raw outcome of one remote call as a
//! [`SchemaSource`](crate::traits::SchemaSource) reports it, and
//! [`MetamodelError`] is the typed failure a build surfaces once the fetch
//! policy has classified (and possibly retried) that outcome.

use std::time::Duration;

use thiserror::Error;

/// Outcome of a single failed remote call.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The remote system asked us to slow down (HTTP 429).
    #[error("rate limited{}", retry_after_suffix(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    /// Credentials were rejected (HTTP 401).
    #[error("unauthorized")]
    Unauthorized,

    /// Credentials are valid but lack permission (HTTP 403).
    #[error("forbidden: {message}")]
    Forbidden { message: String },

    /// The requested record does not exist (HTTP 404).
    #[error("not found: {resource}")]
    NotFound { resource: String },

    /// The request never produced a response.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Any other unsuccessful status.
    #[error("unexpected status {status}: {message}")]
    Status { status: u16, message: String },

    /// The response arrived but could not be decoded.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },
}

fn retry_after_suffix(retry_after: &Option<Duration>) -> String {
    retry_after
        .map(|d| format!(", retry after {}s", d.as_secs()))
        .unwrap_or_default()
}

impl RemoteError {
    /// Check if retrying the same call could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::RateLimited { .. } | RemoteError::Transport { .. } => true,
            RemoteError::Status { status, .. } => *status >= 500,
            RemoteError::Unauthorized
            | RemoteError::Forbidden { .. }
            | RemoteError::NotFound { .. }
            | RemoteError::InvalidResponse { .. } => false,
        }
    }

    /// Create a transport error with source.
    pub fn transport_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        RemoteError::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        RemoteError::Transport {
            message: message.into(),
            source: None,
        }
    }
}

/// Failure reported by a [`CredentialRefresher`](crate::traits::CredentialRefresher).
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The grant itself is no longer valid; the user has to re-authorize.
    #[error("authorization grant expired")]
    GrantExpired,

    /// The refresh attempt failed for a reason that may go away.
    #[error("credential refresh failed: {message}")]
    Transient { message: String },
}

/// Error that aborts a metamodel build.
#[derive(Debug, Error)]
pub enum MetamodelError {
    // Remote dependency errors
    /// The remote system denied access.
    #[error("forbidden: {endpoint}: {message}")]
    Forbidden { endpoint: String, message: String },

    /// A specific remote record does not exist.
    #[error("not found: {endpoint}: {resource}")]
    NotFound { endpoint: String, resource: String },

    /// The authorization grant expired and cannot be refreshed.
    #[error("authorization expired while calling {endpoint}")]
    AuthorizationExpired { endpoint: String },

    /// The remote system kept failing until attempts ran out.
    #[error("external dependency failed: {endpoint} after {attempts} attempt(s): {message}")]
    ExternalDependency {
        endpoint: String,
        attempts: u32,
        message: String,
        #[source]
        source: Option<RemoteError>,
    },

    // Local data inconsistencies
    /// An entity reached the linker without a default-locale label.
    #[error("entity '{entity}' has no label for default locale '{locale}'")]
    MissingDefaultLabel { entity: String, locale: String },

    // Configuration and internal errors
    /// The build configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl MetamodelError {
    /// Check if this error originated from the remote system.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            MetamodelError::Forbidden { .. }
                | MetamodelError::NotFound { .. }
                | MetamodelError::AuthorizationExpired { .. }
                | MetamodelError::ExternalDependency { .. }
        )
    }

    /// Check if this error is an inconsistency in already-fetched data.
    pub fn is_local_inconsistency(&self) -> bool {
        matches!(self, MetamodelError::MissingDefaultLabel { .. })
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            MetamodelError::Forbidden { .. } => "FORBIDDEN",
            MetamodelError::NotFound { .. } => "NOT_FOUND",
            MetamodelError::AuthorizationExpired { .. } => "AUTHORIZATION_EXPIRED",
            MetamodelError::ExternalDependency { .. } => "EXTERNAL_DEPENDENCY",
            MetamodelError::MissingDefaultLabel { .. } => "MISSING_DEFAULT_LABEL",
            MetamodelError::InvalidConfiguration { .. } => "INVALID_CONFIG",
            MetamodelError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    // Convenience constructors

    /// Create an external dependency error wrapping the last remote outcome.
    pub fn external(endpoint: impl Into<String>, attempts: u32, source: RemoteError) -> Self {
        MetamodelError::ExternalDependency {
            endpoint: endpoint.into(),
            attempts,
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create an external dependency error without an underlying remote outcome.
    pub fn external_message(
        endpoint: impl Into<String>,
        attempts: u32,
        message: impl Into<String>,
    ) -> Self {
        MetamodelError::ExternalDependency {
            endpoint: endpoint.into(),
            attempts,
            message: message.into(),
            source: None,
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        MetamodelError::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        MetamodelError::Internal {
            message: message.into(),
        }
    }
}

/// Result type for metamodel operations.
pub type MetamodelResult<T> = Result<T, MetamodelError>;
