//! Message queue abstraction
//!
//! The worker reads from one queue and writes to another through the
//! [`MessageQueue`] trait. Batch operations report success per message in a
//! [`BatchStatus`]; an `Err` return means the whole call failed.

mod memory;
pub mod oversize;
mod sqs;

pub use memory::MemoryQueue;
pub use oversize::{MAX_MESSAGE_BYTES, OversizeStore};
pub use sqs::SqsQueue;

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Attribute carrying the record identifier of a document
pub const RECORD_ID_ATTRIBUTE: &str = "id";

/// Attribute whose presence bypasses the identifier cache
pub const IGNORE_CACHE_ATTRIBUTE: &str = "ignore-cache";

/// A named string attribute on a message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    /// Attribute name
    pub name: String,
    /// Attribute value
    pub value: String,
}

/// A queue message: attributes, an opaque payload and, for inbound
/// messages, the receipt needed to delete it
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Message {
    /// Ordered attributes
    pub attributes: Vec<Attribute>,
    /// Document payload
    pub payload: Vec<u8>,
    receipt: Option<String>,
    offloaded: Option<String>,
}

impl Message {
    /// Create an outbound message with no attributes
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            attributes: Vec::new(),
            payload: payload.into(),
            receipt: None,
            offloaded: None,
        }
    }

    /// Add an attribute
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Attach a delivery receipt (set by queue implementations on receive)
    pub fn with_receipt(mut self, receipt: impl Into<String>) -> Self {
        self.receipt = Some(receipt.into());
        self
    }

    /// Record the blob key an inbound body was read from
    pub fn with_offloaded_key(mut self, key: impl Into<String>) -> Self {
        self.offloaded = Some(key.into());
        self
    }

    /// Blob key of an inbound body that arrived out of line
    pub fn offloaded_key(&self) -> Option<&str> {
        self.offloaded.as_deref()
    }

    /// Value of the first attribute with this name
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Whether an attribute with this name is present
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a.name == name)
    }

    /// The record identifier, if present
    pub fn record_id(&self) -> Option<&str> {
        self.attribute(RECORD_ID_ATTRIBUTE)
    }

    /// Delivery receipt of an inbound message
    pub fn receipt(&self) -> Option<&str> {
        self.receipt.as_deref()
    }

    /// Payload as UTF-8 text
    pub fn payload_text(&self) -> Result<&str> {
        std::str::from_utf8(&self.payload).map_err(|e| {
            Error::Payload(format!(
                "message {} is not UTF-8: {e}",
                self.record_id().unwrap_or("<unknown>")
            ))
        })
    }

    /// Replace the payload
    pub fn set_payload(&mut self, payload: impl Into<Vec<u8>>) {
        self.payload = payload.into();
    }

    /// Copy for republishing: attributes and payload only, never the
    /// receipt or the inbound blob key
    pub fn content_clone(&self) -> Self {
        Self {
            attributes: self.attributes.clone(),
            payload: self.payload.clone(),
            receipt: None,
            offloaded: None,
        }
    }
}

/// A resolved queue
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueHandle {
    /// Queue name as configured
    pub name: String,
    /// Provider address of the queue
    pub url: String,
}

/// Per-message outcome of a batch call, in input order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchStatus(Vec<bool>);

impl BatchStatus {
    /// Status with every one of `len` messages succeeded
    pub fn all_ok(len: usize) -> Self {
        Self(vec![true; len])
    }

    /// Status from explicit results
    pub fn from_results(results: Vec<bool>) -> Self {
        Self(results)
    }

    /// Whether message `index` succeeded; missing entries count as failed
    pub fn succeeded(&self, index: usize) -> bool {
        self.0.get(index).copied().unwrap_or(false)
    }

    /// Number of successful entries
    pub fn success_count(&self) -> usize {
        self.0.iter().filter(|ok| **ok).count()
    }

    /// Whether every one of `len` messages succeeded
    pub fn is_complete(&self, len: usize) -> bool {
        (0..len).all(|i| self.succeeded(i))
    }
}

/// Batch-oriented queue operations
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Resolve a queue by name
    async fn queue_handle(&self, name: &str) -> Result<QueueHandle>;

    /// Receive up to `max` messages, waiting at most `poll_timeout`
    async fn batch_get(
        &self,
        queue: &QueueHandle,
        max: usize,
        poll_timeout: Duration,
    ) -> Result<Vec<Message>>;

    /// Publish messages
    async fn batch_put(&self, queue: &QueueHandle, messages: &[Message]) -> Result<BatchStatus>;

    /// Delete received messages by receipt
    async fn batch_delete(&self, queue: &QueueHandle, messages: &[Message])
    -> Result<BatchStatus>;
}
