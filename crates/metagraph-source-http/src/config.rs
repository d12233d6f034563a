//! HTTP source configuration.
//!
//! Connection settings deserialize with serde. Secrets (static access
//! token, client secret, refresh token) are never part of the serialized
//! form; they are handed over as [`SecretString`]s through the builders.

use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{HttpSourceError, HttpSourceResult};

/// Connection settings for [`HttpSchemaSource`](crate::HttpSchemaSource).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSourceConfig {
    /// Base URL of the schema API, e.g. `https://cms.example.com/api/v2`.
    pub base_url: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// User agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    format!("metagraph/{}", env!("CARGO_PKG_VERSION"))
}

impl HttpSourceConfig {
    /// Create a configuration with default timeouts.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }

    /// Set the per-request timeout.
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Get the request timeout as Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Get the connection timeout as Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Validate and parse the base URL.
    pub fn validate(&self) -> HttpSourceResult<Url> {
        if self.timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err(HttpSourceError::invalid_configuration(
                "timeouts must be greater than 0",
            ));
        }
        parse_http_url(&self.base_url)
    }
}

/// Settings for refreshing access tokens with an OAuth2 refresh-token grant.
pub struct OAuthConfig {
    /// Token endpoint.
    pub token_url: String,
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: SecretString,
    /// Long-lived refresh token obtained when the user authorized the client.
    pub refresh_token: SecretString,
    /// Requested scope, if the provider needs one.
    pub scope: Option<String>,
    /// Treat tokens as expired this long before their reported expiry.
    pub grace_period_secs: i64,
    /// Token request timeout in seconds.
    pub timeout_secs: u64,
}

impl OAuthConfig {
    /// Create a configuration with a five minute grace period.
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: SecretString::from(client_secret.into()),
            refresh_token: SecretString::from(refresh_token.into()),
            scope: None,
            grace_period_secs: 300,
            timeout_secs: default_timeout_secs(),
        }
    }

    /// Set the requested scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Set the expiry grace period.
    #[must_use]
    pub fn with_grace_period_secs(mut self, secs: i64) -> Self {
        self.grace_period_secs = secs;
        self
    }

    /// Validate and parse the token URL.
    pub fn validate(&self) -> HttpSourceResult<Url> {
        if self.client_id.trim().is_empty() {
            return Err(HttpSourceError::invalid_configuration(
                "client_id is required",
            ));
        }
        if self.grace_period_secs < 0 {
            return Err(HttpSourceError::invalid_configuration(
                "grace_period_secs must not be negative",
            ));
        }
        parse_http_url(&self.token_url)
    }
}

impl std::fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("scope", &self.scope)
            .field("grace_period_secs", &self.grace_period_secs)
            .finish_non_exhaustive()
    }
}

fn parse_http_url(raw: &str) -> HttpSourceResult<Url> {
    let url = Url::parse(raw).map_err(|e| HttpSourceError::InvalidUrl {
        url: raw.to_string(),
        message: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(HttpSourceError::InvalidUrl {
                url: raw.to_string(),
                message: format!("unsupported scheme: {other}"),
            })
        }
    }
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(HttpSourceError::InvalidUrl {
            url: raw.to_string(),
            message: "URL has no host".to_string(),
        });
    }

    Ok(url)
}
