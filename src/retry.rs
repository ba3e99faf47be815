//! Bounded retry with a fixed backoff
//!
//! Network calls to Tracksys and the auxiliary services are retried a small,
//! fixed number of times when the failure looks transient, sleeping the same
//! interval between attempts.
//!
//! ```no_run
//! use tracksys_enrich::config::RetryConfig;
//! use tracksys_enrich::retry::with_fixed_backoff;
//!
//! # async fn example(client: reqwest::Client) -> tracksys_enrich::Result<String> {
//! let body = with_fixed_backoff(&RetryConfig::default(), || async {
//!     let response = client.get("https://tracksys.example.org/api/published/virgo").send().await?;
//!     Ok::<_, tracksys_enrich::Error>(response.text().await?)
//! })
//! .await?;
//! # Ok(body)
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use std::error::Error as StdError;
use std::future::Future;

/// Substrings (lowercase) that mark a transport failure as transient
///
/// Covers connection timeouts, client-side timeouts, broken pipes on write,
/// unresolved hosts and unreachable networks.
const TRANSIENT_PATTERNS: &[&str] = &[
    "operation timed out",
    "timed out",
    "timeout",
    "broken pipe",
    "no such host",
    "failed to lookup address",
    "dns error",
    "network is unreachable",
    "network is down",
];

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || is_transient_text(&error_chain_text(e)),
            // A response arrived, the server made a decision
            Error::HttpStatus { .. } => false,
            Error::Other(msg) => is_transient_text(msg),
            _ => false,
        }
    }
}

/// Whether an error description matches one of the transient patterns
pub fn is_transient_text(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| lowered.contains(p))
}

/// Flatten an error and all of its sources into one string
///
/// reqwest wraps hyper and io errors, and the interesting text ("broken
/// pipe", "dns error") usually lives a few levels down.
fn error_chain_text(err: &(dyn StdError + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text
}

/// Execute an async operation, retrying transient failures after a fixed sleep
///
/// `config.max_attempts` counts the first call, so the default of 3 means one
/// call plus at most two retries. A non-retryable error returns immediately
/// without consuming further attempts.
pub async fn with_fixed_backoff<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = config.backoff.as_millis() as u64,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(config.backoff).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}
