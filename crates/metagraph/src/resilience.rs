//! Retry, backoff and credential refresh for remote calls.
//!
//! Every call feeding a build goes through [`FetchPolicy::execute`], which
//! classifies each [`RemoteError`] and walks the [`FetchState`] machine:
//!
//! - forbidden and not-found fail immediately;
//! - rate limiting backs off (honouring Retry-After) on a separate budget that
//!   never counts toward `max_attempts`;
//! - unauthorized triggers one credential refresh per call, then a retry with
//!   the new credential;
//! - everything else is retried with exponential backoff until
//!   `max_attempts` is reached.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::config::RetryConfig;
use crate::error::{MetamodelError, MetamodelResult, RefreshError, RemoteError};
use crate::traits::{AccessToken, CredentialRefresher};

/// Per-attempt context handed to the remote call.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// 1-based number of this call within the policy run.
    pub attempt: u32,
    /// Credential to use instead of the source's configured one.
    pub credential: Option<AccessToken>,
}

impl CallContext {
    /// Context for a first call without an override credential.
    pub fn first() -> Self {
        Self {
            attempt: 1,
            credential: None,
        }
    }

    /// Get the override bearer token.
    pub fn bearer(&self) -> Option<&str> {
        self.credential.as_ref().map(AccessToken::expose)
    }
}

/// States of one policy run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    /// Issuing the remote call.
    Attempting,
    /// Waiting before the next attempt.
    BackingOff,
    /// Obtaining fresh credentials after an unauthorized response.
    RefreshingAuth,
    /// The call returned a value.
    Succeeded,
    /// Terminal failure with a typed reason.
    Failed,
}

/// Credentials obtained by refreshing, shared by all calls of a service.
///
/// The version counter lets concurrent calls that were rejected with the same
/// stale credential share a single refresh.
#[derive(Debug, Default)]
pub struct CredentialStore {
    current: RwLock<(u64, Option<AccessToken>)>,
    refresh_lock: Mutex<()>,
}

impl CredentialStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current version and credential.
    pub async fn current(&self) -> (u64, Option<AccessToken>) {
        let current = self.current.read().await;
        (current.0, current.1.clone())
    }

    /// Replace the credential. Returns the new version.
    pub async fn replace(&self, token: AccessToken) -> u64 {
        let mut current = self.current.write().await;
        current.0 += 1;
        current.1 = Some(token);
        current.0
    }

    /// Drop the stored credential.
    pub async fn clear(&self) {
        let mut current = self.current.write().await;
        current.0 += 1;
        current.1 = None;
    }
}

/// Bookkeeping of one policy run.
struct Progress {
    calls: u32,
    rate_limited: u32,
    refreshed: bool,
    credential_version: u64,
    delay: Duration,
    failure: Option<MetamodelError>,
}

impl Progress {
    /// Attempts that count toward `max_attempts`.
    fn counted(&self) -> u32 {
        self.calls - self.rate_limited
    }

    fn fail(&mut self, error: MetamodelError) -> FetchState {
        self.failure = Some(error);
        FetchState::Failed
    }
}

/// Classified retry policy for remote calls.
pub struct FetchPolicy {
    config: RetryConfig,
    refresher: Option<Arc<dyn CredentialRefresher>>,
    credentials: Arc<CredentialStore>,
}

impl FetchPolicy {
    /// Create a policy. Without a refresher, unauthorized responses fail the
    /// call as expired authorization.
    pub fn new(config: RetryConfig, refresher: Option<Arc<dyn CredentialRefresher>>) -> Self {
        Self {
            config,
            refresher,
            credentials: Arc::new(CredentialStore::new()),
        }
    }

    /// Share a credential store with other policies.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Arc<CredentialStore>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Get the retry configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Calculate delay for a given attempt (0-indexed).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.config.initial_delay_ms as f64
            * self
                .config
                .backoff_multiplier
                .powi(i32::try_from(attempt).unwrap_or(i32::MAX));

        let delay_ms = base_delay.min(self.config.max_delay_ms as f64);

        let final_delay = if self.config.jitter && delay_ms > 0.0 {
            // Up to 25% on top
            delay_ms + rand::thread_rng().gen_range(0.0..=delay_ms * 0.25)
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay as u64)
    }

    /// Run `operation` under the policy.
    ///
    /// `endpoint` names the call in logs and errors.
    pub async fn execute<T, F, Fut>(&self, endpoint: &str, mut operation: F) -> MetamodelResult<T>
    where
        F: FnMut(CallContext) -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut progress = Progress {
            calls: 0,
            rate_limited: 0,
            refreshed: false,
            credential_version: 0,
            delay: Duration::ZERO,
            failure: None,
        };
        let mut output = None;
        let mut state = FetchState::Attempting;

        loop {
            let next = match state {
                FetchState::Attempting => {
                    progress.calls += 1;
                    let (version, credential) = self.credentials.current().await;
                    progress.credential_version = version;
                    let ctx = CallContext {
                        attempt: progress.calls,
                        credential,
                    };

                    match operation(ctx).await {
                        Ok(value) => {
                            output = Some(value);
                            FetchState::Succeeded
                        }
                        Err(error) => self.classify(endpoint, error, &mut progress),
                    }
                }
                FetchState::BackingOff => {
                    tokio::time::sleep(progress.delay).await;
                    FetchState::Attempting
                }
                FetchState::RefreshingAuth => self.refresh(endpoint, &mut progress).await,
                FetchState::Succeeded => {
                    debug!(endpoint = %endpoint, calls = progress.calls, "Remote call succeeded");
                    return output.ok_or_else(|| MetamodelError::internal("fetch succeeded without output"));
                }
                FetchState::Failed => {
                    return Err(progress.failure.take().unwrap_or_else(|| {
                        MetamodelError::internal("fetch failed without a reason")
                    }));
                }
            };

            trace!(endpoint = %endpoint, from = ?state, to = ?next, "Fetch state transition");
            state = next;
        }
    }

    fn classify(&self, endpoint: &str, error: RemoteError, progress: &mut Progress) -> FetchState {
        match error {
            RemoteError::Forbidden { message } => progress.fail(MetamodelError::Forbidden {
                endpoint: endpoint.to_string(),
                message,
            }),
            RemoteError::NotFound { resource } => progress.fail(MetamodelError::NotFound {
                endpoint: endpoint.to_string(),
                resource,
            }),
            RemoteError::RateLimited { retry_after } => {
                progress.rate_limited += 1;
                if progress.rate_limited > self.config.max_rate_limit_retries {
                    warn!(
                        endpoint = %endpoint,
                        rate_limited = progress.rate_limited,
                        "Rate limit retries exhausted"
                    );
                    return progress.fail(MetamodelError::external(
                        endpoint,
                        progress.calls,
                        RemoteError::RateLimited { retry_after },
                    ));
                }

                progress.delay = match retry_after {
                    Some(wait) => {
                        let capped = wait.min(self.config.max_retry_after());
                        if capped < wait {
                            warn!(
                                endpoint = %endpoint,
                                retry_after_ms = wait.as_millis(),
                                capped_ms = capped.as_millis(),
                                "Retry-After exceeds max, capping"
                            );
                        }
                        capped
                    }
                    None => self.calculate_delay(progress.rate_limited - 1),
                };
                info!(
                    endpoint = %endpoint,
                    delay_ms = progress.delay.as_millis(),
                    rate_limited = progress.rate_limited,
                    "Rate limited, waiting"
                );
                FetchState::BackingOff
            }
            RemoteError::Unauthorized => {
                if self.refresher.is_none() {
                    warn!(endpoint = %endpoint, "Unauthorized and no credential refresher configured");
                    return progress.fail(MetamodelError::AuthorizationExpired {
                        endpoint: endpoint.to_string(),
                    });
                }
                if progress.refreshed {
                    warn!(endpoint = %endpoint, "Still unauthorized after credential refresh");
                    return progress.fail(MetamodelError::external(
                        endpoint,
                        progress.counted(),
                        RemoteError::Unauthorized,
                    ));
                }
                FetchState::RefreshingAuth
            }
            other => {
                let attempts = progress.counted();
                if attempts >= self.config.max_attempts {
                    warn!(
                        endpoint = %endpoint,
                        attempts,
                        error = %other,
                        "Remote call failed, attempts exhausted"
                    );
                    return progress.fail(MetamodelError::external(endpoint, attempts, other));
                }

                progress.delay = self.calculate_delay(attempts - 1);
                debug!(
                    endpoint = %endpoint,
                    attempt = attempts,
                    max_attempts = self.config.max_attempts,
                    delay_ms = progress.delay.as_millis(),
                    error = %other,
                    "Retrying after remote error"
                );
                FetchState::BackingOff
            }
        }
    }

    async fn refresh(&self, endpoint: &str, progress: &mut Progress) -> FetchState {
        let Some(refresher) = &self.refresher else {
            return progress.fail(MetamodelError::AuthorizationExpired {
                endpoint: endpoint.to_string(),
            });
        };

        let _guard = self.credentials.refresh_lock.lock().await;

        let (version, _) = self.credentials.current().await;
        if version != progress.credential_version {
            debug!(endpoint = %endpoint, "Credentials were refreshed concurrently, retrying");
            progress.refreshed = true;
            return FetchState::Attempting;
        }

        match refresher.refresh_credentials().await {
            Ok(token) => {
                self.credentials.replace(token).await;
                progress.refreshed = true;
                progress.delay = self.calculate_delay(progress.counted().saturating_sub(1));
                info!(endpoint = %endpoint, "Credentials refreshed, retrying");
                FetchState::BackingOff
            }
            Err(RefreshError::GrantExpired) => {
                warn!(endpoint = %endpoint, "Authorization grant expired");
                progress.fail(MetamodelError::AuthorizationExpired {
                    endpoint: endpoint.to_string(),
                })
            }
            Err(RefreshError::Transient { message }) => {
                let attempts = progress.counted();
                if attempts >= self.config.max_attempts {
                    warn!(endpoint = %endpoint, attempts, error = %message, "Credential refresh failed, attempts exhausted");
                    return progress.fail(MetamodelError::external_message(
                        endpoint,
                        attempts,
                        format!("credential refresh failed: {message}"),
                    ));
                }
                progress.delay = self.calculate_delay(attempts - 1);
                debug!(
                    endpoint = %endpoint,
                    attempt = attempts,
                    delay_ms = progress.delay.as_millis(),
                    error = %message,
                    "Credential refresh failed, retrying"
                );
                FetchState::BackingOff
            }
        }
    }
}

impl std::fmt::Debug for FetchPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchPolicy")
            .field("config", &self.config)
            .field("has_refresher", &self.refresher.is_some())
            .finish_non_exhaustive()
    }
}
