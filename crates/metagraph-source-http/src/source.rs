//! Schema source over the remote system's JSON API.
//!
//! Endpoints, relative to the configured base URL:
//!
//! - `GET schemas` - schema list
//! - `GET schemas/details?ids=a,b` - definitions of a batch
//! - `GET schemas/{id}/values` - values of a list schema
//!
//! Each may answer with a bare JSON array or an `{"items": [...]}` envelope.
//! One call is one request; retries belong to the caller's fetch policy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metagraph::definition::{EnumValueDefinition, SchemaDefinition, SchemaSummary};
use metagraph::error::RemoteError;
use metagraph::resilience::CallContext;
use metagraph::traits::SchemaSource;
use reqwest::{header, Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, trace};
use url::Url;

use crate::config::HttpSourceConfig;
use crate::error::HttpSourceResult;

/// Longest error body excerpt carried into an error message.
const MAX_ERROR_BODY: usize = 256;

/// Response body of a collection endpoint.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Envelope { items: Vec<T> },
    Bare(Vec<T>),
}

impl<T> Listing<T> {
    fn into_items(self) -> Vec<T> {
        match self {
            Listing::Envelope { items } | Listing::Bare(items) => items,
        }
    }
}

/// [`SchemaSource`] backed by HTTP.
pub struct HttpSchemaSource {
    base_url: Url,
    client: Client,
    access_token: Option<SecretString>,
}

impl HttpSchemaSource {
    /// Create a source from validated settings.
    pub fn new(config: &HttpSourceConfig) -> HttpSourceResult<Self> {
        let base_url = config.validate()?;
        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            base_url,
            client,
            access_token: None,
        })
    }

    /// Token used until the fetch policy supplies a refreshed one.
    #[must_use]
    pub fn with_access_token(mut self, token: SecretString) -> Self {
        self.access_token = Some(token);
        self
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| RemoteError::InvalidResponse {
                message: format!("base URL {} cannot carry a path", self.base_url),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        url: Url,
    ) -> Result<T, RemoteError> {
        let mut request = self
            .client
            .get(url.clone())
            .header(header::ACCEPT, "application/json");

        let bearer = ctx
            .bearer()
            .or_else(|| self.access_token.as_ref().map(|t| t.expose_secret()));
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        debug!(url = %url, attempt = ctx.attempt, "Sending schema request");

        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::transport_with_source(format!("request to {url} failed"), e))?;

        let status = response.status();
        trace!(url = %url, status = %status, "Received schema response");

        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, retry_after, &body, &url));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::InvalidResponse {
                message: format!("failed to decode response from {url}: {e}"),
            })
    }
}

#[async_trait]
impl SchemaSource for HttpSchemaSource {
    #[instrument(skip(self, ctx))]
    async fn fetch_schema_list(&self, ctx: &CallContext) -> Result<Vec<SchemaSummary>, RemoteError> {
        let url = self.endpoint(&["schemas"])?;
        let listing: Listing<SchemaSummary> = self.get_json(ctx, url).await?;
        Ok(listing.into_items())
    }

    #[instrument(skip(self, ctx, ids), fields(count = ids.len()))]
    async fn fetch_schema_details(
        &self,
        ctx: &CallContext,
        ids: &[String],
    ) -> Result<Vec<SchemaDefinition>, RemoteError> {
        let mut url = self.endpoint(&["schemas", "details"])?;
        url.query_pairs_mut().append_pair("ids", &ids.join(","));
        let listing: Listing<SchemaDefinition> = self.get_json(ctx, url).await?;
        Ok(listing.into_items())
    }

    #[instrument(skip(self, ctx))]
    async fn fetch_enum_values(
        &self,
        ctx: &CallContext,
        schema_id: &str,
    ) -> Result<Vec<EnumValueDefinition>, RemoteError> {
        let url = self.endpoint(&["schemas", schema_id, "values"])?;
        let listing: Listing<EnumValueDefinition> = self.get_json(ctx, url).await?;
        Ok(listing.into_items())
    }
}

impl std::fmt::Debug for HttpSchemaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSchemaSource")
            .field("base_url", &self.base_url.as_str())
            .field("has_access_token", &self.access_token.is_some())
            .finish_non_exhaustive()
    }
}

/// Map an unsuccessful status to the error the fetch policy classifies.
pub(crate) fn map_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
    url: &Url,
) -> RemoteError {
    let message = error_message(status, body);

    match status {
        StatusCode::UNAUTHORIZED => RemoteError::Unauthorized,
        StatusCode::FORBIDDEN => RemoteError::Forbidden { message },
        StatusCode::NOT_FOUND => RemoteError::NotFound {
            resource: url.path().to_string(),
        },
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited { retry_after },
        _ => RemoteError::Status {
            status: status.as_u16(),
            message,
        },
    }
}

/// Pull a message out of a JSON error body, falling back to the raw text.
pub(crate) fn error_message(status: StatusCode, body: &str) -> String {
    let from_json = serde_json::from_str::<serde_json::Value>(body).ok().and_then(|json| {
        ["message", "error_description", "error"]
            .iter()
            .find_map(|key| json.get(*key).and_then(|v| v.as_str()).map(str::to_string))
    });

    let message = from_json.unwrap_or_else(|| body.trim().to_string());
    if message.is_empty() {
        return status.to_string();
    }
    message.chars().take(MAX_ERROR_BODY).collect()
}

/// Parse a `Retry-After` value given in seconds or as an HTTP date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    let wait = at - Utc::now();
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}
