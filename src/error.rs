//! Error types for tracksys-enrich
//!
//! One crate-wide error enum covers every failure the worker can observe:
//! - Configuration problems detected at startup
//! - Transport and HTTP status failures from the resilient fetcher
//! - Cache reload failures (escalated to fatal by default)
//! - Pipeline contract violations and per-message data errors
//! - Queue and blob-store collaborator failures

use thiserror::Error;

/// Result type alias for tracksys-enrich operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for tracksys-enrich
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The environment variable that caused the error
        key: Option<String>,
    },

    /// Transport-level HTTP failure (connect, timeout, DNS, body read)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The remote endpoint answered with a non-2xx status
    #[error("request failed with status code {status} for {url}")]
    HttpStatus {
        /// The requested URL
        url: String,
        /// HTTP status code returned by the endpoint
        status: u16,
        /// Response body, kept for diagnostics
        body: String,
    },

    /// JSON decode failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The identifier directory could not be reloaded
    #[error("identifier cache reload failed: {0}")]
    CacheReload(#[source] Box<Error>),

    /// The inbound document carries no record identifier attribute
    #[error("no identifier attribute located for document")]
    MissingIdentifier,

    /// A pipeline step was handed a context variant it does not accept
    #[error("step '{step}' expected {expected} context but received {found}")]
    ContextMismatch {
        /// Name of the step that rejected the context
        step: &'static str,
        /// The variant the step requires
        expected: &'static str,
        /// The variant it actually received
        found: &'static str,
    },

    /// A Tracksys record has no digitized parts where at least one is required
    #[error("tracksys item {0} contains no parts")]
    NoParts(String),

    /// A document to be judged for partial digitization carries no barcodes
    #[error("no barcode fields in document {0}")]
    NoBarcodes(String),

    /// Hard (non partial) queue failure
    #[error("queue error: {0}")]
    Queue(String),

    /// Blob store read, write or delete failure
    #[error("blob store error: {0}")]
    BlobStore(String),

    /// Message payload could not be interpreted
    #[error("payload error: {0}")]
    Payload(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a configuration error for a specific environment variable
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Whether this error must stop the process rather than the current message
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::CacheReload(_) | Error::Config { .. })
    }

    /// Whether this is an HTTP 404, which callers usually report as informational
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::HttpStatus { status: 404, .. })
    }
}
