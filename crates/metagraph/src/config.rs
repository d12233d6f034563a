//! Build configuration.
//!
//! Plain serde structs; loading them from files or the environment is left to
//! the embedding application.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MetamodelError, MetamodelResult};
use crate::model::Capabilities;

/// Configuration of one metamodel build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetamodelConfig {
    /// Identifier of the remote system installation.
    pub identifier: String,

    /// Locale every entity must carry a label for.
    #[serde(default = "default_locale")]
    pub default_locale: String,

    /// Capability flags copied onto the metamodel.
    #[serde(default)]
    pub capabilities: Capabilities,

    /// Schema ids per details request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Details requests in flight at once.
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,

    /// How long a built metamodel stays cached, in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Fetch values of list schemas whose details did not include them.
    #[serde(default = "default_true")]
    pub fetch_enum_values: bool,

    /// Retry policy for remote calls.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_locale() -> String {
    "en".to_string()
}

fn default_batch_size() -> usize {
    50
}

fn default_max_concurrent_batches() -> usize {
    4
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

impl MetamodelConfig {
    /// Create a configuration with default settings.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            default_locale: default_locale(),
            capabilities: Capabilities::default(),
            batch_size: default_batch_size(),
            max_concurrent_batches: default_max_concurrent_batches(),
            cache_ttl_secs: default_cache_ttl_secs(),
            fetch_enum_values: true,
            retry: RetryConfig::default(),
        }
    }

    /// Set the default locale.
    #[must_use]
    pub fn with_default_locale(mut self, locale: impl Into<String>) -> Self {
        self.default_locale = locale.into();
        self
    }

    /// Set the capability flags.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set the details batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the number of concurrent details requests.
    #[must_use]
    pub fn with_max_concurrent_batches(mut self, max: usize) -> Self {
        self.max_concurrent_batches = max;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Get the cache TTL as Duration.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Identity of the build for caching and single-flight.
    ///
    /// Settings that change the resulting metamodel are part of the key;
    /// fetch tuning (batching, retries) is not.
    pub fn cache_key(&self) -> String {
        let flags = u8::from(self.capabilities.random_access_supported)
            | u8::from(self.capabilities.full_text_search_proposals_supported) << 1
            | u8::from(self.capabilities.folder_navigation_supported) << 2
            | u8::from(self.fetch_enum_values) << 3;
        format!("{}:{}:{flags:x}", self.identifier, self.default_locale)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> MetamodelResult<()> {
        if self.identifier.trim().is_empty() {
            return Err(MetamodelError::invalid_configuration(
                "identifier is required",
            ));
        }
        if self.default_locale.trim().is_empty() {
            return Err(MetamodelError::invalid_configuration(
                "default_locale is required",
            ));
        }
        if self.batch_size == 0 {
            return Err(MetamodelError::invalid_configuration(
                "batch_size must be greater than 0",
            ));
        }
        if self.max_concurrent_batches == 0 {
            return Err(MetamodelError::invalid_configuration(
                "max_concurrent_batches must be greater than 0",
            ));
        }
        self.retry.validate()
    }
}

/// Retry policy for remote calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per call before giving up, counting the first one.
    /// Rate-limited attempts do not count.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound for computed backoff delays in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Growth factor between consecutive delays.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add up to 25% random jitter to delays.
    #[serde(default = "default_true")]
    pub jitter: bool,

    /// Rate-limited responses tolerated per call.
    #[serde(default = "default_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,

    /// Upper bound for server-provided Retry-After waits in milliseconds.
    #[serde(default = "default_max_retry_after_ms")]
    pub max_retry_after_ms: u64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_rate_limit_retries() -> u32 {
    10
}

fn default_max_retry_after_ms() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
            max_rate_limit_retries: default_max_rate_limit_retries(),
            max_retry_after_ms: default_max_retry_after_ms(),
        }
    }
}

impl RetryConfig {
    /// Policy without delays, for tests and local sources.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
            jitter: false,
            max_rate_limit_retries: default_max_rate_limit_retries(),
            max_retry_after_ms: 0,
        }
    }

    /// Get the initial delay as Duration.
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Get the maximum backoff delay as Duration.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Get the maximum Retry-After wait as Duration.
    pub fn max_retry_after(&self) -> Duration {
        Duration::from_millis(self.max_retry_after_ms)
    }

    /// Validate the policy.
    pub fn validate(&self) -> MetamodelResult<()> {
        if self.max_attempts == 0 {
            return Err(MetamodelError::invalid_configuration(
                "retry.max_attempts must be greater than 0",
            ));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(MetamodelError::invalid_configuration(
                "retry.max_delay_ms must not be less than retry.initial_delay_ms",
            ));
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(MetamodelError::invalid_configuration(
                "retry.backoff_multiplier must be at least 1.0",
            ));
        }
        Ok(())
    }
}
