//! OAuth2 refresh-token grant.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use metagraph::error::RefreshError;
use metagraph::traits::{AccessToken, CredentialRefresher};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::OAuthConfig;
use crate::error::HttpSourceResult;
use crate::source::error_message;

/// Error code of a revoked or expired grant.
const INVALID_GRANT: &str = "invalid_grant";

/// Successful token response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    /// Present when the provider rotates refresh tokens.
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Error body defined by RFC 6749 section 5.2.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
}

/// Refreshes access tokens with the `refresh_token` grant.
pub struct OAuthRefresher {
    token_url: Url,
    client_id: String,
    client_secret: SecretString,
    scope: Option<String>,
    refresh_token: RwLock<SecretString>,
    cached_token: RwLock<Option<AccessToken>>,
    /// Grace period before expiry to trigger refresh.
    grace_period: Duration,
    http_client: Client,
}

impl OAuthRefresher {
    /// Create a refresher from validated settings.
    pub fn new(config: OAuthConfig) -> HttpSourceResult<Self> {
        let token_url = config.validate()?;
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            token_url,
            client_id: config.client_id,
            client_secret: config.client_secret,
            scope: config.scope,
            refresh_token: RwLock::new(config.refresh_token),
            cached_token: RwLock::new(None),
            grace_period: Duration::seconds(config.grace_period_secs),
            http_client,
        })
    }

    /// Gets a valid access token, refreshing if necessary.
    #[instrument(skip(self))]
    pub async fn get_token(&self) -> Result<AccessToken, RefreshError> {
        {
            let cache = self.cached_token.read().await;
            if let Some(ref token) = *cache {
                if !token.is_expired(self.grace_period) {
                    debug!("Using cached token");
                    return Ok(token.clone());
                }
            }
        }

        debug!("Refreshing access token");
        self.acquire_token().await
    }

    /// Invalidates the cached token, forcing a refresh on next use.
    pub async fn invalidate(&self) {
        let mut cache = self.cached_token.write().await;
        *cache = None;
    }

    async fn acquire_token(&self) -> Result<AccessToken, RefreshError> {
        let refresh_token = self.refresh_token.read().await.expose_secret().to_string();

        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
        ];
        if let Some(scope) = &self.scope {
            params.push(("scope", scope.as_str()));
        }

        let response = self
            .http_client
            .post(self.token_url.clone())
            .form(&params)
            .send()
            .await
            .map_err(|e| RefreshError::Transient {
                message: format!("token request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let grant_expired = serde_json::from_str::<TokenErrorResponse>(&body)
                .is_ok_and(|e| e.error == INVALID_GRANT);
            if grant_expired {
                warn!(status = %status, "Refresh token rejected, re-authorization required");
                return Err(RefreshError::GrantExpired);
            }
            return Err(RefreshError::Transient {
                message: format!(
                    "token request failed with status {status}: {}",
                    error_message(status, &body)
                ),
            });
        }

        let token_response: TokenResponse =
            response.json().await.map_err(|e| RefreshError::Transient {
                message: format!("failed to parse token response: {e}"),
            })?;

        if let Some(rotated) = token_response.refresh_token {
            *self.refresh_token.write().await = SecretString::from(rotated);
            debug!("Refresh token rotated");
        }

        let mut token = AccessToken::new(token_response.access_token);
        if let Some(expires_in) = token_response.expires_in {
            let expires_at = Duration::try_seconds(expires_in)
                .filter(|lifetime| *lifetime >= Duration::zero())
                .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
                .ok_or_else(|| RefreshError::Transient {
                    message: format!("token response has unusable expires_in {expires_in}"),
                })?;
            debug!(
                "Acquired new token, expires at {}",
                expires_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            token = token.with_expiry(expires_at);
        }

        *self.cached_token.write().await = Some(token.clone());
        Ok(token)
    }
}

#[async_trait]
impl CredentialRefresher for OAuthRefresher {
    async fn refresh_credentials(&self) -> Result<AccessToken, RefreshError> {
        // Called after a rejection, so the cached token is not trusted.
        self.invalidate().await;
        self.acquire_token().await
    }
}

impl std::fmt::Debug for OAuthRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthRefresher")
            .field("token_url", &self.token_url.as_str())
            .field("client_id", &self.client_id)
            .field("grace_period", &self.grace_period)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_response_parsing() {
        let response: TokenResponse = serde_json::from_str(
            r#"{"access_token": "abc", "token_type": "Bearer", "expires_in": 3600}"#,
        )
        .unwrap();

        assert_eq!(response.access_token, "abc");
        assert_eq!(response.expires_in, Some(3600));
        assert!(response.refresh_token.is_none());
    }

    #[test]
    fn test_token_error_parsing() {
        let error: TokenErrorResponse = serde_json::from_str(
            r#"{"error": "invalid_grant", "error_description": "Token has been revoked"}"#,
        )
        .unwrap();

        assert_eq!(error.error, INVALID_GRANT);
    }
}
