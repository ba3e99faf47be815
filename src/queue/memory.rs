//! In-memory queue for tests and local runs

use super::oversize::{OversizeStore, message_size};
use super::{BatchStatus, Message, MessageQueue, QueueHandle};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    pending: HashMap<String, VecDeque<Message>>,
    published: HashMap<String, Vec<Message>>,
    in_flight: HashMap<String, Message>,
    deleted: Vec<String>,
    reject_put: HashSet<String>,
    reject_delete: HashSet<String>,
    fail_put: bool,
    size_limit: Option<usize>,
}

/// [`MessageQueue`] held entirely in memory
///
/// Received messages stay in flight until deleted. Puts and deletes can be
/// made to fail per record id to exercise partial batch failures, and a
/// message size limit with an optional [`OversizeStore`] mirrors the SQS
/// handling of large bodies.
#[derive(Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    receipts: AtomicU64,
    oversize: Option<Arc<OversizeStore>>,
}

impl MemoryQueue {
    /// Create an empty queue set
    pub fn new() -> Self {
        Self::default()
    }

    /// Move bodies over the size limit through `oversize`
    pub fn with_oversize_store(mut self, oversize: Arc<OversizeStore>) -> Self {
        self.oversize = Some(oversize);
        self
    }

    /// Reject puts of messages larger than `bytes`
    pub async fn limit_message_size(&self, bytes: usize) {
        self.inner.lock().await.size_limit = Some(bytes);
    }

    /// Make a message available for receipt on `queue`
    pub async fn push(&self, queue: &str, message: Message) {
        self.inner
            .lock()
            .await
            .pending
            .entry(queue.to_string())
            .or_default()
            .push_back(message);
    }

    /// Messages published to `queue`, in order
    pub async fn published(&self, queue: &str) -> Vec<Message> {
        self.inner
            .lock()
            .await
            .published
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }

    /// Receipts deleted so far, in order
    pub async fn deleted(&self) -> Vec<String> {
        self.inner.lock().await.deleted.clone()
    }

    /// Received messages not yet deleted
    pub async fn in_flight(&self) -> usize {
        self.inner.lock().await.in_flight.len()
    }

    /// Fail the put of any message carrying this record id
    pub async fn reject_put(&self, record_id: &str) {
        self.inner.lock().await.reject_put.insert(record_id.to_string());
    }

    /// Fail the delete of any message carrying this record id
    pub async fn reject_delete(&self, record_id: &str) {
        self.inner
            .lock()
            .await
            .reject_delete
            .insert(record_id.to_string());
    }

    /// Make every put call fail outright
    pub async fn fail_puts(&self, fail: bool) {
        self.inner.lock().await.fail_put = fail;
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn queue_handle(&self, name: &str) -> Result<QueueHandle> {
        Ok(QueueHandle {
            name: name.to_string(),
            url: format!("memory://{name}"),
        })
    }

    async fn batch_get(
        &self,
        queue: &QueueHandle,
        max: usize,
        poll_timeout: Duration,
    ) -> Result<Vec<Message>> {
        let received: Vec<Message> = {
            let mut inner = self.inner.lock().await;
            let Inner {
                pending, in_flight, ..
            } = &mut *inner;
            match pending.get_mut(&queue.name) {
                Some(backlog) => {
                    let take = max.min(backlog.len());
                    backlog
                        .drain(..take)
                        .map(|m| {
                            let id = self.receipts.fetch_add(1, Ordering::Relaxed);
                            let m = m.with_receipt(format!("receipt-{id}"));
                            in_flight.insert(format!("receipt-{id}"), m.clone());
                            m
                        })
                        .collect()
                }
                None => Vec::new(),
            }
        };

        if received.is_empty() {
            // long poll with nothing to return
            tokio::time::sleep(poll_timeout).await;
        }

        let Some(oversize) = &self.oversize else {
            return Ok(received);
        };
        let mut messages = Vec::with_capacity(received.len());
        for message in received {
            match oversize.rehydrate(message).await {
                Ok(message) => messages.push(message),
                Err(e) => tracing::error!(queue = %queue.name, error = %e, "Dropping unreadable oversize message"),
            }
        }
        Ok(messages)
    }

    async fn batch_put(&self, queue: &QueueHandle, messages: &[Message]) -> Result<BatchStatus> {
        if self.inner.lock().await.fail_put {
            return Err(Error::Queue(format!("put to {} rejected", queue.name)));
        }

        let prepared = match &self.oversize {
            Some(oversize) => oversize.prepare_batch(&queue.name, messages).await,
            None => messages.iter().map(|m| Some(m.content_clone())).collect(),
        };

        let mut inner = self.inner.lock().await;
        let mut results = Vec::with_capacity(messages.len());
        for m in prepared {
            let accepted = m.filter(|m| {
                let rejected = m.record_id().is_some_and(|id| inner.reject_put.contains(id));
                let too_large = inner.size_limit.is_some_and(|limit| message_size(m) > limit);
                !rejected && !too_large
            });
            results.push(accepted.is_some());
            if let Some(m) = accepted {
                inner.published.entry(queue.name.clone()).or_default().push(m);
            }
        }
        Ok(BatchStatus::from_results(results))
    }

    async fn batch_delete(
        &self,
        _queue: &QueueHandle,
        messages: &[Message],
    ) -> Result<BatchStatus> {
        let mut results = Vec::with_capacity(messages.len());
        let mut inner = self.inner.lock().await;
        for m in messages {
            let rejected = m
                .record_id()
                .is_some_and(|id| inner.reject_delete.contains(id));
            let removed = match m.receipt() {
                Some(receipt) if !rejected => {
                    let found = inner.in_flight.remove(receipt).is_some();
                    if found {
                        inner.deleted.push(receipt.to_string());
                    }
                    found
                }
                _ => false,
            };
            results.push(removed);
        }
        drop(inner);

        if let Some(oversize) = &self.oversize {
            for (m, deleted) in messages.iter().zip(&results) {
                if *deleted {
                    oversize.release(m).await;
                }
            }
        }
        Ok(BatchStatus::from_results(results))
    }
}
