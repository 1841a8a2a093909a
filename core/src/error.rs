//! Error types for the avenue API pipeline.
//!
//! # Design
//! HTTP-level failures are never errors here: a non-2xx status is data on
//! `ApiResponse`, and a transport failure becomes a status-0 response carrying
//! a `TransportFault`. The only `Err` that leaves `ApiClient::execute` is an
//! observer that refused to continue, so a misbehaving interceptor fails the
//! call loudly instead of being swallowed.

use std::error::Error as StdError;

use thiserror::Error;

/// Errors returned by `ApiClient::execute` and the request builders.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A request or response observer returned an error. Dispatch stops at
    /// the failing observer.
    #[error("{stage} observer failed: {source}")]
    Observer {
        stage: ObserverStage,
        #[source]
        source: ObserverError,
    },

    /// A typed payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Which side of the pipeline an observer failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverStage {
    Request,
    Response,
}

impl std::fmt::Display for ObserverStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObserverStage::Request => write!(f, "request"),
            ObserverStage::Response => write!(f, "response"),
        }
    }
}

/// Failure reported by an observer callback.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ObserverError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl ObserverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Network-level failure that happened before any response existed.
#[derive(Debug, Error)]
#[error("transport failed: {source}")]
pub struct TransportFault {
    #[source]
    source: Box<dyn StdError + Send + Sync>,
}

impl TransportFault {
    pub fn new(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// The underlying transport error.
    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.source.as_ref()
    }
}

/// Errors from the durable key-value store backing the session.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage contents are not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Errors from the application stores, which both call the API and touch
/// durable storage.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
