//! # tracksys-enrich
//!
//! Streaming worker that decorates search-index documents with digitization
//! metadata held by Tracksys.
//!
//! Documents arrive on an inbound queue as Solr XML with the record id in a
//! message attribute. Each one runs through a [`Pipeline`] of steps; records
//! Tracksys knows about gain digital-object fields, everything else passes
//! through untouched. Messages are forwarded to the outbound queue in
//! batches and deleted from the inbound queue only once they were published.
//!
//! ## Layout
//!
//! - [`cache`] keeps the set of identifiers Tracksys holds, reloaded when stale
//! - [`pipeline`] and [`steps`] define the per-message work
//! - [`worker`] batches messages, publishes them and acknowledges the inbound copies
//! - [`service`] wires the queue poller to a pool of workers
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tracksys_enrich::{
//!     Config, HttpFetcher, IdentifierCache, Service, ServiceOptions, SqsQueue, TracksysClient,
//!     standard_pipeline,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let aws = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
//!
//!     let fetcher = HttpFetcher::new(
//!         config.tracksys.timeout,
//!         config.workers,
//!         config.tracksys.retry.clone(),
//!     )?;
//!     let client = TracksysClient::new(fetcher.clone(), config.tracksys.clone());
//!     let cache = Arc::new(IdentifierCache::new(Arc::new(client), config.cache.clone()).await?);
//!
//!     let pipeline = standard_pipeline(&config, cache, fetcher, None);
//!     let queue = Arc::new(SqsQueue::new(&aws, config.message_bucket.clone()));
//!     Service::new(ServiceOptions::from(&config), queue, pipeline).run().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Blob storage for published metadata documents
pub mod blob;
/// Identifier cache with time-based reload
pub mod cache;
/// Configuration types
pub mod config;
/// Solr document field helpers
pub mod document;
/// Error types
pub mod error;
/// HTTP client with bounded retry
pub mod fetch;
/// Logging setup
pub mod logging;
/// Step pipeline
pub mod pipeline;
/// Message queue abstraction and backends
pub mod queue;
/// Retry logic with fixed backoff
pub mod retry;
/// Poller and worker orchestration
pub mod service;
/// Enrichment steps
pub mod steps;
/// Tracksys wire types and client
pub mod tracksys;
/// Batch coordinator
pub mod worker;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use blob::{BlobStore, MemoryBlobStore, S3BlobStore};
pub use cache::{IdentifierCache, IdentifierSnapshot, IdentifierSource};
pub use config::{
    CacheConfig, Config, MAX_BATCH_SIZE, MetadataCacheConfig, ReloadFailurePolicy, RetryConfig,
    ServiceMode, TracksysConfig,
};
pub use error::{Error, Result};
pub use fetch::HttpFetcher;
pub use logging::{LogConfig, LogFormat, init_logging};
pub use pipeline::{Completion, Pipeline, PipelineContext, Step, StepFailure, StepOutcome};
pub use queue::{
    BatchStatus, MemoryQueue, Message, MessageQueue, OversizeStore, QueueHandle, SqsQueue,
};
pub use service::{Service, ServiceOptions};
pub use steps::standard_pipeline;
pub use tracksys::{TracksysClient, TracksysItem, TracksysPart};
pub use worker::{BatchCoordinator, BlockReport};
