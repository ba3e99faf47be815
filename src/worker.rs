//! Batch coordinator
//!
//! Each worker accumulates inbound messages until it has a full batch or the
//! channel has been idle for the wait timeout, then flushes:
//!
//! 1. every message runs through the pipeline; a non-fatal failure is logged
//!    and the message is still forwarded
//! 2. content clones of the messages are published in one batch call
//! 3. only the inbound messages whose publish succeeded are deleted
//!
//! Messages that fail to publish or delete stay on the inbound queue and are
//! redelivered later, which is safe because the pipeline is idempotent.

use crate::error::Result;
use crate::pipeline::{Completion, Pipeline};
use crate::queue::{Message, MessageQueue, QueueHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;

/// How often (in messages) throughput is logged
const THROUGHPUT_LOG_INTERVAL: u64 = 1000;

/// Receiving half of the work channel, shared by all workers
pub type SharedReceiver = Arc<Mutex<mpsc::Receiver<Message>>>;

/// Result of running one message through the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrichOutcome {
    /// Every step ran
    Enriched,
    /// A step halted the pipeline (record unknown to Tracksys)
    Skipped,
    /// A step failed; the message is forwarded as is
    Failed(String),
}

/// One inbound message and what happened to it during a flush
#[derive(Debug)]
pub struct BatchItem {
    /// The inbound message, payload possibly rewritten
    pub message: Message,
    /// Pipeline outcome
    pub enrich: Option<EnrichOutcome>,
    /// Whether the outbound publish succeeded
    pub published: Option<bool>,
    /// Whether the inbound delete succeeded
    pub deleted: Option<bool>,
}

impl BatchItem {
    fn new(message: Message) -> Self {
        Self {
            message,
            enrich: None,
            published: None,
            deleted: None,
        }
    }

    /// Whether the inbound message should be deleted
    ///
    /// Enrichment failures do not block deletion; the document has been
    /// forwarded either way.
    pub fn deletable(&self) -> bool {
        self.enrich.is_some() && self.published == Some(true)
    }
}

/// Counts from one flush
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BlockReport {
    /// Messages in the block
    pub received: usize,
    /// Messages that ran every step
    pub enriched: usize,
    /// Messages halted by a step
    pub skipped: usize,
    /// Messages whose pipeline failed
    pub enrich_failed: usize,
    /// Messages published
    pub published: usize,
    /// Messages that failed to publish
    pub publish_failed: usize,
    /// Inbound messages deleted
    pub deleted: usize,
    /// Inbound deletes that failed
    pub delete_failed: usize,
}

impl BlockReport {
    fn from_items(items: &[BatchItem]) -> Self {
        let mut report = BlockReport {
            received: items.len(),
            ..Default::default()
        };
        for item in items {
            match item.enrich {
                Some(EnrichOutcome::Enriched) => report.enriched += 1,
                Some(EnrichOutcome::Skipped) => report.skipped += 1,
                Some(EnrichOutcome::Failed(_)) => report.enrich_failed += 1,
                None => {}
            }
            match item.published {
                Some(true) => report.published += 1,
                Some(false) => report.publish_failed += 1,
                None => {}
            }
            match item.deleted {
                Some(true) => report.deleted += 1,
                Some(false) => report.delete_failed += 1,
                None => {}
            }
        }
        report
    }
}

/// Per-worker batching and reconciliation
pub struct BatchCoordinator {
    id: usize,
    queue: Arc<dyn MessageQueue>,
    in_queue: QueueHandle,
    out_queue: QueueHandle,
    pipeline: Arc<Pipeline>,
    batch_size: usize,
    wait_timeout: Duration,
}

impl BatchCoordinator {
    /// Create a coordinator
    ///
    /// `batch_size` must already be capped at the queue's batch limit.
    pub fn new(
        id: usize,
        queue: Arc<dyn MessageQueue>,
        in_queue: QueueHandle,
        out_queue: QueueHandle,
        pipeline: Arc<Pipeline>,
        batch_size: usize,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            id,
            queue,
            in_queue,
            out_queue,
            pipeline,
            batch_size: batch_size.max(1),
            wait_timeout,
        }
    }

    /// Consume the channel until it closes or a fatal error occurs
    pub async fn run(self, receiver: SharedReceiver) -> Result<()> {
        let mut block: Vec<Message> = Vec::with_capacity(self.batch_size);
        let mut total: u64 = 0;
        let mut start = Instant::now();

        tracing::info!(worker = self.id, batch_size = self.batch_size, "Worker starting");

        loop {
            let next = tokio::time::timeout(self.wait_timeout, async {
                receiver.lock().await.recv().await
            })
            .await;

            match next {
                Ok(Some(message)) => {
                    block.push(message);
                    total += 1;

                    if block.len() >= self.batch_size {
                        self.process_block(std::mem::take(&mut block)).await?;
                    }
                    if total % THROUGHPUT_LOG_INTERVAL == 0 {
                        self.log_throughput(total, start);
                    }
                }
                Ok(None) => {
                    if !block.is_empty() {
                        self.process_block(std::mem::take(&mut block)).await?;
                    }
                    tracing::info!(worker = self.id, total, "Channel closed, worker exiting");
                    return Ok(());
                }
                Err(_) => {
                    // idle: flush whatever is pending
                    if !block.is_empty() {
                        self.process_block(std::mem::take(&mut block)).await?;
                        self.log_throughput(total, start);
                    }
                    start = Instant::now();
                }
            }
        }
    }

    /// Enrich, publish and delete one block
    ///
    /// Returns an error only for fatal pipeline failures and hard queue
    /// failures; per-message failures are reflected in the report.
    pub async fn process_block(&self, messages: Vec<Message>) -> Result<BlockReport> {
        let mut items: Vec<BatchItem> = messages.into_iter().map(BatchItem::new).collect();

        for item in &mut items {
            item.enrich = Some(self.enrich(&mut item.message).await?);
        }

        let outbound: Vec<Message> = items.iter().map(|i| i.message.content_clone()).collect();
        let put_status = self.queue.batch_put(&self.out_queue, &outbound).await?;
        for (index, item) in items.iter_mut().enumerate() {
            let ok = put_status.succeeded(index);
            if !ok {
                tracing::warn!(
                    worker = self.id,
                    record_id = item.message.record_id().unwrap_or_default(),
                    "Message failed to send to queue"
                );
            }
            item.published = Some(ok);
        }

        let deletable: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.deletable())
            .map(|(index, _)| index)
            .collect();

        if !deletable.is_empty() {
            let to_delete: Vec<Message> = deletable
                .iter()
                .map(|&index| items[index].message.clone())
                .collect();
            let delete_status = self.queue.batch_delete(&self.in_queue, &to_delete).await?;
            for (position, &index) in deletable.iter().enumerate() {
                let ok = delete_status.succeeded(position);
                if !ok {
                    tracing::warn!(
                        worker = self.id,
                        record_id = items[index].message.record_id().unwrap_or_default(),
                        "Message failed to delete"
                    );
                }
                items[index].deleted = Some(ok);
            }
        }

        let report = BlockReport::from_items(&items);
        tracing::debug!(worker = self.id, ?report, "Block processed");
        Ok(report)
    }

    async fn enrich(&self, message: &mut Message) -> Result<EnrichOutcome> {
        match self.pipeline.process(message).await {
            Ok(Completion::Finished) => Ok(EnrichOutcome::Enriched),
            Ok(Completion::Halted { .. }) => Ok(EnrichOutcome::Skipped),
            Err(failure) if failure.error.is_fatal() => {
                tracing::error!(
                    worker = self.id,
                    record_id = message.record_id().unwrap_or_default(),
                    step = failure.step,
                    error = %failure.error,
                    "Fatal pipeline failure"
                );
                Err(failure.error)
            }
            Err(failure) => {
                tracing::warn!(
                    worker = self.id,
                    record_id = message.record_id().unwrap_or_default(),
                    step = failure.step,
                    index = failure.index,
                    error = %failure.error,
                    "Enrich failed, forwarding document as is"
                );
                Ok(EnrichOutcome::Failed(failure.to_string()))
            }
        }
    }

    fn log_throughput(&self, total: u64, start: Instant) {
        let secs = start.elapsed().as_secs_f64();
        let tps = if secs > 0.0 { total as f64 / secs } else { 0.0 };
        tracing::info!(
            worker = self.id,
            total,
            tps = %format!("{tps:.2}"),
            "Processed messages"
        );
    }
}
