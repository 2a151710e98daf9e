//! Error types for the Elasticsearch operator
//!
//! A single error enum is shared by the controller, the Elasticsearch client
//! and the background task manager so that every failure can be classified
//! for requeueing in one place.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// HTTP transport failure while talking to Elasticsearch
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Elasticsearch answered with a non-success status code
    #[error("Elasticsearch API error {status} on {url}: {body}")]
    ElasticsearchApi {
        status: u16,
        url: String,
        body: String,
    },

    /// A request to Elasticsearch exceeded its deadline
    #[error("Request to Elasticsearch timed out after {0:?}")]
    Timeout(Duration),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The Elasticsearch spec is invalid
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Certificate material could not be generated, parsed or validated
    #[error("Certificate error: {0}")]
    CertificateError(String),

    /// Both resolved change budgets are zero while changes are pending
    #[error("Change budget allows no progress: {0}")]
    ChangeBudgetStalled(String),

    /// A background task panicked before producing a result
    #[error("Background task {0} panicked")]
    TaskPanicked(String),

    /// Two task types were registered under the same key
    #[error("Background task {0} produced a result of an unexpected type")]
    TaskOutputMismatch(String),

    /// A failure memoized earlier in the same reconciliation pass
    #[error("{0}")]
    Cached(Arc<Error>),

    #[error("Finalizer error: {0}")]
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(e)) => e.code == 404,
            Error::ElasticsearchApi { status, .. } => *status == 404,
            Error::Cached(inner) => inner.is_not_found(),
            _ => false,
        }
    }

    /// Check if this error should be retried quickly
    ///
    /// Validation problems and a stalled change budget need a user edit, so
    /// hammering the API server for them is pointless.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(api_err)) => {
                api_err.code >= 500 || api_err.code == 429 || api_err.code == 409
            }
            // connection level failures
            Error::KubeError(_) => true,
            Error::HttpError(_) | Error::Timeout(_) => true,
            Error::ElasticsearchApi { status, .. } => *status >= 500 || *status == 429,
            Error::Cached(inner) => inner.is_retryable(),
            // the mismatched result is dropped, the next pass starts a fresh run
            Error::TaskPanicked(_) | Error::TaskOutputMismatch(_) | Error::FinalizerError(_) => {
                true
            }
            Error::ValidationError(_)
            | Error::CertificateError(_)
            | Error::ChangeBudgetStalled(_)
            | Error::ConfigError(_)
            | Error::SerializationError(_) => false,
        }
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        if self.is_retryable() {
            Duration::from_secs(10)
        } else {
            Duration::from_secs(300)
        }
    }
}

impl From<kube::runtime::finalizer::Error<Error>> for Error {
    fn from(err: kube::runtime::finalizer::Error<Error>) -> Self {
        match err {
            kube::runtime::finalizer::Error::ApplyFailed(e)
            | kube::runtime::finalizer::Error::CleanupFailed(e) => e,
            other => Error::FinalizerError(Box::new(other)),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
