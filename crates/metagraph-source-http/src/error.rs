//! Setup errors for the HTTP source.
//!
//! Errors of individual calls are reported as
//! [`RemoteError`](metagraph::error::RemoteError) and classified by the fetch
//! policy; this type only covers building a source or refresher.

use metagraph::error::MetamodelError;
use thiserror::Error;

/// Failure to set up an HTTP source or refresher.
#[derive(Debug, Error)]
pub enum HttpSourceError {
    /// A configured URL does not parse or uses an unsupported scheme.
    #[error("invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// A required setting is missing or out of range.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

impl HttpSourceError {
    pub(crate) fn invalid_configuration(message: impl Into<String>) -> Self {
        HttpSourceError::InvalidConfiguration {
            message: message.into(),
        }
    }
}

impl From<HttpSourceError> for MetamodelError {
    fn from(err: HttpSourceError) -> Self {
        MetamodelError::invalid_configuration(err.to_string())
    }
}

/// Result type for HTTP source setup.
pub type HttpSourceResult<T> = Result<T, HttpSourceError>;
