//! SQS-backed queue
//!
//! Bodies over [`MAX_MESSAGE_BYTES`] go through the message bucket, and each
//! send is split so no request exceeds the count or byte limit.

use super::oversize::{MAX_MESSAGE_BYTES, OversizeStore, message_size, size_bounded_batches};
use super::{Attribute, BatchStatus, Message, MessageQueue, QueueHandle};
use crate::blob::S3BlobStore;
use crate::config::MAX_BATCH_SIZE;
use crate::error::{Error, Result};
use async_trait::async_trait;
use aws_sdk_sqs::Client;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::{
    BatchResultErrorEntry, DeleteMessageBatchRequestEntry, MessageAttributeValue,
    SendMessageBatchRequestEntry,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// [`MessageQueue`] over Amazon SQS
#[derive(Clone, Debug)]
pub struct SqsQueue {
    client: Client,
    oversize: Arc<OversizeStore>,
}

impl SqsQueue {
    /// Build from a shared AWS configuration, keeping large bodies in
    /// `message_bucket`
    pub fn new(sdk_config: &aws_config::SdkConfig, message_bucket: impl Into<String>) -> Self {
        let store = S3BlobStore::new(sdk_config, message_bucket);
        Self {
            client: Client::new(sdk_config),
            oversize: Arc::new(OversizeStore::new(Arc::new(store))),
        }
    }

    /// Wrap an existing client and oversize store
    pub fn from_client(client: Client, oversize: Arc<OversizeStore>) -> Self {
        Self { client, oversize }
    }
}

#[async_trait]
impl MessageQueue for SqsQueue {
    #[instrument(skip(self))]
    async fn queue_handle(&self, name: &str) -> Result<QueueHandle> {
        let output = self
            .client
            .get_queue_url()
            .queue_name(name)
            .send()
            .await
            .map_err(|e| Error::Queue(format!("resolving {name}: {}", DisplayErrorContext(&e))))?;

        let url = output
            .queue_url()
            .ok_or_else(|| Error::Queue(format!("no url returned for queue {name}")))?;

        Ok(QueueHandle {
            name: name.to_string(),
            url: url.to_string(),
        })
    }

    async fn batch_get(
        &self,
        queue: &QueueHandle,
        max: usize,
        poll_timeout: Duration,
    ) -> Result<Vec<Message>> {
        let output = self
            .client
            .receive_message()
            .queue_url(&queue.url)
            .max_number_of_messages(max.clamp(1, MAX_BATCH_SIZE) as i32)
            .wait_time_seconds(poll_timeout.as_secs() as i32)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(|e| Error::Queue(format!("receive from {}: {}", queue.name, DisplayErrorContext(&e))))?;

        let received: Vec<Message> = output
            .messages()
            .iter()
            .map(|m| {
                let mut attributes: Vec<Attribute> = m
                    .message_attributes()
                    .map(|attrs| {
                        attrs
                            .iter()
                            .map(|(name, value)| Attribute {
                                name: name.clone(),
                                value: value.string_value().unwrap_or_default().to_string(),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                // SQS returns attributes as a map
                attributes.sort_by(|a, b| a.name.cmp(&b.name));

                let mut message = Message::new(m.body().unwrap_or_default());
                message.attributes = attributes;
                match m.receipt_handle() {
                    Some(receipt) => message.with_receipt(receipt),
                    None => message,
                }
            })
            .collect();

        let mut messages = Vec::with_capacity(received.len());
        for message in received {
            // left in flight; the queue redelivers it after the visibility timeout
            match self.oversize.rehydrate(message).await {
                Ok(message) => messages.push(message),
                Err(e) => tracing::error!(queue = %queue.name, error = %e, "Dropping unreadable oversize message"),
            }
        }

        Ok(messages)
    }

    async fn batch_put(&self, queue: &QueueHandle, messages: &[Message]) -> Result<BatchStatus> {
        if messages.is_empty() {
            return Ok(BatchStatus::default());
        }

        let mut results = vec![false; messages.len()];
        let prepared = self.oversize.prepare_batch(&queue.name, messages).await;

        // (entry, size) for every sendable message
        let mut entries = Vec::with_capacity(messages.len());
        for (index, message) in prepared.iter().enumerate() {
            // an unsendable message stays failed; the rest of the batch still goes
            let Some(message) = message else {
                continue;
            };
            let body = match message.payload_text() {
                Ok(body) => body,
                Err(e) => {
                    tracing::error!(queue = %queue.name, error = %e, "Dropping message from batch");
                    continue;
                }
            };
            let attributes = message
                .attributes
                .iter()
                .map(|a| {
                    MessageAttributeValue::builder()
                        .data_type("String")
                        .string_value(&a.value)
                        .build()
                        .map(|v| (a.name.clone(), v))
                })
                .collect::<std::result::Result<HashMap<_, _>, _>>()
                .map_err(|e| Error::Queue(format!("building attributes: {e}")))?;

            let entry = SendMessageBatchRequestEntry::builder()
                .id(index.to_string())
                .message_body(body)
                .set_message_attributes((!attributes.is_empty()).then_some(attributes))
                .build()
                .map_err(|e| Error::Queue(format!("building batch entry: {e}")))?;
            entries.push((entry, message_size(message)));
        }

        let sizes: Vec<usize> = entries.iter().map(|(_, size)| *size).collect();
        let mut entries: Vec<Option<SendMessageBatchRequestEntry>> =
            entries.into_iter().map(|(entry, _)| Some(entry)).collect();

        for chunk in size_bounded_batches(&sizes, MAX_BATCH_SIZE, MAX_MESSAGE_BYTES) {
            let request: Vec<SendMessageBatchRequestEntry> =
                chunk.iter().filter_map(|&i| entries[i].take()).collect();

            let output = self
                .client
                .send_message_batch()
                .queue_url(&queue.url)
                .set_entries(Some(request))
                .send()
                .await
                .map_err(|e| Error::Queue(format!("send to {}: {}", queue.name, DisplayErrorContext(&e))))?;

            for entry in output.successful() {
                if let Some(slot) = entry.id().parse::<usize>().ok().and_then(|i| results.get_mut(i)) {
                    *slot = true;
                }
            }
            log_failures(&queue.name, "send", output.failed());
        }

        Ok(BatchStatus::from_results(results))
    }

    async fn batch_delete(
        &self,
        queue: &QueueHandle,
        messages: &[Message],
    ) -> Result<BatchStatus> {
        if messages.is_empty() {
            return Ok(BatchStatus::default());
        }

        let mut results = vec![false; messages.len()];
        let mut entries = Vec::with_capacity(messages.len());
        for (index, message) in messages.iter().enumerate() {
            let Some(receipt) = message.receipt() else {
                tracing::error!(queue = %queue.name, record_id = message.record_id().unwrap_or_default(), "Cannot delete message without a receipt");
                continue;
            };
            let entry = DeleteMessageBatchRequestEntry::builder()
                .id(index.to_string())
                .receipt_handle(receipt)
                .build()
                .map_err(|e| Error::Queue(format!("building delete entry: {e}")))?;
            entries.push(entry);
        }

        if entries.is_empty() {
            return Ok(BatchStatus::from_results(results));
        }

        let output = self
            .client
            .delete_message_batch()
            .queue_url(&queue.url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(|e| Error::Queue(format!("delete from {}: {}", queue.name, DisplayErrorContext(&e))))?;

        for entry in output.successful() {
            if let Some(slot) = entry.id().parse::<usize>().ok().and_then(|i| results.get_mut(i)) {
                *slot = true;
            }
        }
        log_failures(&queue.name, "delete", output.failed());

        for (message, deleted) in messages.iter().zip(&results) {
            if *deleted {
                self.oversize.release(message).await;
            }
        }

        Ok(BatchStatus::from_results(results))
    }
}

fn log_failures(queue: &str, operation: &str, failed: &[BatchResultErrorEntry]) {
    for entry in failed {
        tracing::warn!(
            queue = %queue,
            operation,
            entry = entry.id(),
            code = entry.code(),
            message = entry.message().unwrap_or_default(),
            sender_fault = entry.sender_fault(),
            "Batch entry failed"
        );
    }
}
