//! Poller and worker orchestration
//!
//! One poller task long-polls the inbound queue and feeds a bounded channel;
//! `workers` batch coordinators drain it. When the workers fall behind the
//! channel fills and the poller blocks on send, which throttles reads from
//! the queue. Any task returning an error ends the service with that error.

use crate::config::{Config, MAX_BATCH_SIZE};
use crate::error::{Error, Result};
use crate::pipeline::Pipeline;
use crate::queue::{Message, MessageQueue, QueueHandle};
use crate::worker::{BatchCoordinator, SharedReceiver};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

/// Settings the service needs from [`Config`]
#[derive(Clone, Debug)]
pub struct ServiceOptions {
    /// Inbound queue name
    pub in_queue: String,
    /// Outbound queue name
    pub out_queue: String,
    /// Long-poll timeout
    pub poll_timeout: Duration,
    /// Depth of the work channel
    pub work_queue_size: usize,
    /// Number of batch coordinators
    pub workers: usize,
    /// Messages per flush
    pub batch_size: usize,
    /// Idle flush timeout
    pub wait_timeout: Duration,
}

impl From<&Config> for ServiceOptions {
    fn from(config: &Config) -> Self {
        Self {
            in_queue: config.in_queue.clone(),
            out_queue: config.out_queue.clone(),
            poll_timeout: config.poll_timeout,
            work_queue_size: config.work_queue_size,
            workers: config.workers,
            batch_size: config.effective_batch_size(),
            wait_timeout: config.wait_timeout,
        }
    }
}

/// The running enrichment service
pub struct Service {
    options: ServiceOptions,
    queue: Arc<dyn MessageQueue>,
    pipeline: Arc<Pipeline>,
}

impl Service {
    /// Create the service
    pub fn new(options: ServiceOptions, queue: Arc<dyn MessageQueue>, pipeline: Pipeline) -> Self {
        Self {
            options,
            queue,
            pipeline: Arc::new(pipeline),
        }
    }

    /// Resolve the queues, start every task and wait for the first failure
    pub async fn run(self) -> Result<()> {
        let in_queue = self.queue.queue_handle(&self.options.in_queue).await?;
        let out_queue = self.queue.queue_handle(&self.options.out_queue).await?;

        let (tx, rx) = mpsc::channel(self.options.work_queue_size.max(1));
        let receiver: SharedReceiver = Arc::new(Mutex::new(rx));

        let mut tasks = JoinSet::new();
        for id in 1..=self.options.workers {
            let coordinator = BatchCoordinator::new(
                id,
                Arc::clone(&self.queue),
                in_queue.clone(),
                out_queue.clone(),
                Arc::clone(&self.pipeline),
                self.options.batch_size.min(MAX_BATCH_SIZE),
                self.options.wait_timeout,
            );
            tasks.spawn(coordinator.run(Arc::clone(&receiver)));
        }
        tasks.spawn(poll(
            Arc::clone(&self.queue),
            in_queue,
            tx,
            self.options.poll_timeout,
        ));

        tracing::info!(
            workers = self.options.workers,
            work_queue_size = self.options.work_queue_size,
            "Service running"
        );

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Task failed, stopping service");
                    tasks.abort_all();
                    return Err(e);
                }
                Err(join_error) => {
                    tracing::error!(error = %join_error, "Task panicked, stopping service");
                    tasks.abort_all();
                    return Err(Error::Other(format!("task panicked: {join_error}")));
                }
            }
        }
        Ok(())
    }
}

async fn poll(
    queue: Arc<dyn MessageQueue>,
    in_queue: QueueHandle,
    tx: mpsc::Sender<Message>,
    poll_timeout: Duration,
) -> Result<()> {
    tracing::info!(queue = %in_queue.name, "Poller starting");
    loop {
        let messages = queue.batch_get(&in_queue, MAX_BATCH_SIZE, poll_timeout).await?;

        if messages.is_empty() {
            tracing::debug!(queue = %in_queue.name, "No new messages available");
            continue;
        }

        for message in messages {
            if tx.send(message).await.is_err() {
                return Err(Error::Other("work channel closed".into()));
            }
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineContext, Step, StepOutcome};
    use crate::queue::MemoryQueue;
    use async_trait::async_trait;

    struct FailOn(&'static str);

    #[async_trait]
    impl Step for FailOn {
        fn name(&self) -> &'static str {
            "fail on"
        }

        async fn process(
            &self,
            message: &mut Message,
            context: PipelineContext,
        ) -> Result<StepOutcome> {
            if message.record_id() == Some(self.0) {
                return Err(Error::CacheReload(Box::new(Error::Other("directory down".into()))));
            }
            Ok(StepOutcome::Proceed(context))
        }
    }

    fn options(workers: usize) -> ServiceOptions {
        ServiceOptions {
            in_queue: "in".into(),
            out_queue: "out".into(),
            poll_timeout: Duration::from_millis(50),
            work_queue_size: 4,
            workers,
            batch_size: 3,
            wait_timeout: Duration::from_millis(100),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn messages_flow_from_inbound_to_outbound() {
        let queue = Arc::new(MemoryQueue::new());
        for n in 0..25 {
            queue
                .push("in", Message::new(format!("<doc>{n}</doc>")).with_attribute("id", format!("u{n}")))
                .await;
        }

        let service = Service::new(options(3), queue.clone(), Pipeline::new());
        let handle = tokio::spawn(service.run());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.published("out").await.len(), 25);
        assert_eq!(queue.in_flight().await, 0);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_worker_error_stops_the_service() {
        let queue = Arc::new(MemoryQueue::new());
        queue.push("in", Message::new("<doc></doc>").with_attribute("id", "u1")).await;
        queue.push("in", Message::new("<doc></doc>").with_attribute("id", "boom")).await;

        let pipeline = Pipeline::new().with_step(FailOn("boom"));
        // one worker, so both messages share the aborted block
        let err = Service::new(options(1), queue.clone(), pipeline)
            .run()
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(queue.in_flight().await, 2, "nothing from the aborted block is deleted");
    }
}
