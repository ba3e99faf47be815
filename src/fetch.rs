//! Resilient HTTP GET client
//!
//! Every network call the worker makes (Tracksys directory and detail
//! endpoints, the rights service, the PDF status service) goes through
//! [`HttpFetcher::get`], which applies a per-call timeout and retries
//! transient transport failures a bounded number of times.

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::retry::with_fixed_backoff;
use std::time::{Duration, Instant};

/// GET client with bounded retry and transient-error classification
///
/// Cheap to clone: the underlying connection pool is shared.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl HttpFetcher {
    /// Build a fetcher with its own connection pool
    ///
    /// `max_idle_per_host` sizes the pool to the number of concurrent callers
    /// (usually the worker count).
    pub fn new(timeout: Duration, max_idle_per_host: usize, retry: RetryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(max_idle_per_host)
            .build()?;
        Ok(Self { client, retry })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    /// GET `url` and return the body of a 2xx response
    ///
    /// Transport errors that look transient are retried up to the configured
    /// attempt ceiling with a fixed sleep between attempts. Non-2xx responses
    /// are returned immediately as [`Error::HttpStatus`] carrying the body.
    pub async fn get(&self, url: &str) -> Result<Vec<u8>> {
        with_fixed_backoff(&self.retry, || self.attempt(url)).await
    }

    /// GET `url` and decode the body as UTF-8 text
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let body = self.get(url).await?;
        String::from_utf8(body)
            .map_err(|e| Error::Payload(format!("response from {url} is not UTF-8: {e}")))
    }

    async fn attempt(&self, url: &str) -> Result<Vec<u8>> {
        let start = Instant::now();
        let result = self.client.get(url).send().await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(url = %url, elapsed_ms, error = %e, "GET failed");
                return Err(Error::Network(e));
            }
        };

        let status = response.status();
        tracing::debug!(url = %url, elapsed_ms, status = status.as_u16(), "GET");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::NOT_FOUND {
                tracing::info!(url = %url, "GET returned 404");
            } else {
                tracing::warn!(url = %url, status = status.as_u16(), "GET failed with status");
            }
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}
