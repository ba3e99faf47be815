//! tracksys-enrich - main entry point

use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use std::sync::Arc;
use tokio::signal;
use tracing::info;

use tracksys_enrich::{
    BlobStore, Config, HttpFetcher, IdentifierCache, LogConfig, S3BlobStore, Service,
    ServiceOptions, SqsQueue, TracksysClient, init_logging, standard_pipeline,
};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is normal outside local development
    let _ = dotenvy::dotenv();

    init_logging(&LogConfig::from_env()?)?;
    info!(
        "===> {} service starting up (version {}) <===",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::from_env().context("loading configuration")?;
    config.log_summary();

    let aws = aws_config::load_defaults(BehaviorVersion::latest()).await;

    let fetcher = HttpFetcher::new(
        config.tracksys.timeout,
        config.workers,
        config.tracksys.retry.clone(),
    )?;
    let client = TracksysClient::new(fetcher.clone(), config.tracksys.clone());
    let cache = IdentifierCache::new(Arc::new(client), config.cache.clone())
        .await
        .context("loading the Tracksys identifier directory")?;
    info!(identifiers = cache.len().await, "Identifier cache ready");

    let blob_store: Option<Arc<dyn BlobStore>> = config
        .metadata_cache
        .as_ref()
        .map(|mc| Arc::new(S3BlobStore::new(&aws, mc.bucket.clone())) as Arc<dyn BlobStore>);

    let pipeline = standard_pipeline(&config, Arc::new(cache), fetcher, blob_store);
    let queue = Arc::new(SqsQueue::new(&aws, config.message_bucket.clone()));
    let service = Service::new(ServiceOptions::from(&config), queue, pipeline);

    tokio::select! {
        result = service.run() => result.context("service terminated")?,
        _ = shutdown_signal() => info!("Shutdown signal received, exiting"),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
