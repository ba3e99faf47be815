//! Out-of-line bodies for messages above the queue size limit
//!
//! A message too large to send is written to the message bucket and replaced
//! by a pointer: a short body plus the [`OVERSIZE_ATTRIBUTE`] naming the
//! object key. Receivers swap the pointer back for the stored body and drop
//! the object once the inbound copy is deleted.

use super::{Attribute, Message};
use crate::blob::BlobStore;
use crate::error::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Largest message SQS accepts, also the limit for one batch request
pub const MAX_MESSAGE_BYTES: usize = 256 * 1024;

/// Attribute carrying the object key of an out-of-line body
pub const OVERSIZE_ATTRIBUTE: &str = "oversize-object";

const POINTER_BODY: &str = "oversize";

/// Bytes a message counts against the queue limit: body plus every
/// attribute name, type and value
pub fn message_size(message: &Message) -> usize {
    message.payload.len()
        + message
            .attributes
            .iter()
            .map(|a| a.name.len() + "String".len() + a.value.len())
            .sum::<usize>()
}

/// Split entry positions into consecutive chunks holding at most
/// `max_entries` items and `max_bytes` bytes
///
/// An entry larger than `max_bytes` on its own still gets a chunk of one;
/// callers are expected to have rejected those already.
pub fn size_bounded_batches(sizes: &[usize], max_entries: usize, max_bytes: usize) -> Vec<Vec<usize>> {
    let max_entries = max_entries.max(1);
    let mut chunks: Vec<Vec<usize>> = Vec::new();
    let mut current = Vec::new();
    let mut bytes = 0;

    for (position, &size) in sizes.iter().enumerate() {
        if !current.is_empty() && (current.len() == max_entries || bytes + size > max_bytes) {
            chunks.push(std::mem::take(&mut current));
            bytes = 0;
        }
        current.push(position);
        bytes += size;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Moves large message bodies to and from the message bucket
pub struct OversizeStore {
    store: Arc<dyn BlobStore>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for OversizeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OversizeStore")
            .field("bucket", &self.store.bucket())
            .finish()
    }
}

impl OversizeStore {
    /// Keep out-of-line bodies in `store`
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            sequence: AtomicU64::new(0),
        }
    }

    /// Bucket the bodies are written to
    pub fn bucket(&self) -> &str {
        self.store.bucket()
    }

    fn next_key(&self, queue: &str) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{queue}/{nanos}-{sequence}")
    }

    /// Write the body of `message` to the bucket and return the pointer
    /// message that replaces it on the queue
    pub async fn offload(&self, queue: &str, message: &Message) -> Result<Message> {
        let key = self.next_key(queue);
        self.store
            .put(&key, message.payload.clone(), "application/octet-stream")
            .await?;

        tracing::debug!(
            queue,
            key = %key,
            size = message.payload.len(),
            record_id = message.record_id().unwrap_or_default(),
            "Moved message body out of line"
        );

        let mut pointer = Message::new(POINTER_BODY);
        pointer.attributes = message
            .attributes
            .iter()
            .filter(|a| a.name != OVERSIZE_ATTRIBUTE)
            .cloned()
            .collect();
        pointer.attributes.push(Attribute {
            name: OVERSIZE_ATTRIBUTE.to_string(),
            value: key,
        });
        Ok(pointer)
    }

    /// Replace the messages that need it by pointers
    ///
    /// Each slot is `None` when the message cannot be sent: the offload
    /// failed or the pointer itself is still over the limit.
    pub async fn prepare_batch(&self, queue: &str, messages: &[Message]) -> Vec<Option<Message>> {
        let mut prepared = Vec::with_capacity(messages.len());
        for message in messages {
            if message_size(message) <= MAX_MESSAGE_BYTES {
                prepared.push(Some(message.content_clone()));
                continue;
            }
            let pointer = match self.offload(queue, message).await {
                Ok(pointer) => pointer,
                Err(e) => {
                    tracing::error!(
                        queue,
                        record_id = message.record_id().unwrap_or_default(),
                        error = %e,
                        "Could not move oversize message out of line"
                    );
                    prepared.push(None);
                    continue;
                }
            };
            if message_size(&pointer) > MAX_MESSAGE_BYTES {
                tracing::error!(
                    queue,
                    record_id = message.record_id().unwrap_or_default(),
                    "Message attributes alone exceed the queue limit"
                );
                prepared.push(None);
                continue;
            }
            prepared.push(Some(pointer));
        }
        prepared
    }

    /// Swap a received pointer for the body it names
    ///
    /// Messages without the pointer attribute come back unchanged.
    pub async fn rehydrate(&self, mut message: Message) -> Result<Message> {
        let Some(key) = message.attribute(OVERSIZE_ATTRIBUTE).map(str::to_string) else {
            return Ok(message);
        };
        let body = self.store.fetch(&key).await.map_err(|e| {
            Error::Queue(format!(
                "reading out-of-line body {}/{key}: {e}",
                self.store.bucket()
            ))
        })?;

        message.attributes.retain(|a| a.name != OVERSIZE_ATTRIBUTE);
        message.set_payload(body);
        Ok(message.with_offloaded_key(key))
    }

    /// Drop the stored body of a deleted inbound message
    pub async fn release(&self, message: &Message) {
        let Some(key) = message.offloaded_key() else {
            return;
        };
        if let Err(e) = self.store.remove(key).await {
            tracing::warn!(key, error = %e, "Could not remove out-of-line body");
        }
    }
}
