//! Identifier cache
//!
//! Holds the set of identifiers Tracksys has digitized content for and
//! answers membership questions from it. The set is replaced wholesale once
//! it is older than the configured max age.
//!
//! Readers take a short shared lock on the state. A reader that finds the
//! snapshot stale queues on the reload mutex and re-checks staleness once it
//! holds it, so concurrent stale readers cause exactly one directory fetch.
//! The new snapshot is swapped in under the write lock after the fetch
//! completes; a reader never sees a partially built set.

use crate::config::{CacheConfig, ReloadFailurePolicy};
use crate::error::{Error, Result};
use crate::tracksys::TracksysItem;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

/// Where identifiers and item details come from
#[async_trait]
pub trait IdentifierSource: Send + Sync {
    /// Every identifier the source knows, possibly with blanks and repeats
    async fn directory(&self) -> Result<Vec<String>>;

    /// The detail record for one identifier
    async fn details(&self, id: &str) -> Result<TracksysItem>;
}

/// Immutable set of known identifiers
#[derive(Debug, Default)]
pub struct IdentifierSnapshot {
    ids: HashSet<String>,
}

impl IdentifierSnapshot {
    /// Build a snapshot, dropping empty and duplicate identifiers
    pub fn from_ids<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let ids = ids.into_iter().filter(|id| !id.is_empty()).collect();
        Self { ids }
    }

    /// Whether the identifier is present
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Number of distinct identifiers
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the snapshot holds no identifiers
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

struct CacheState {
    snapshot: Arc<IdentifierSnapshot>,
    loaded_at: Instant,
}

impl CacheState {
    fn is_stale(&self, max_age: Duration) -> bool {
        self.loaded_at.elapsed() > max_age
    }
}

/// Time-bounded, concurrency-safe identifier cache
pub struct IdentifierCache {
    source: Arc<dyn IdentifierSource>,
    config: CacheConfig,
    state: RwLock<CacheState>,
    reload_lock: Mutex<()>,
    reloads: AtomicU64,
}

impl IdentifierCache {
    /// Create the cache and load the first snapshot
    ///
    /// Fails if the initial load fails, regardless of the reload policy.
    pub async fn new(source: Arc<dyn IdentifierSource>, config: CacheConfig) -> Result<Self> {
        let snapshot = fetch_snapshot(source.as_ref()).await.map_err(|e| {
            tracing::error!(error = %e, "Initial identifier cache load failed");
            Error::CacheReload(Box::new(e))
        })?;

        tracing::info!(
            identifiers = snapshot.len(),
            max_age_s = config.max_age.as_secs(),
            "Identifier cache loaded"
        );

        Ok(Self {
            source,
            config,
            state: RwLock::new(CacheState {
                snapshot: Arc::new(snapshot),
                loaded_at: Instant::now(),
            }),
            reload_lock: Mutex::new(()),
            reloads: AtomicU64::new(1),
        })
    }

    /// Whether Tracksys knows the identifier, reloading first if the snapshot is stale
    ///
    /// Only fails when a required reload fails under the fatal policy.
    pub async fn contains(&self, id: &str) -> Result<bool> {
        {
            let state = self.state.read().await;
            if !state.is_stale(self.config.max_age) {
                return Ok(state.snapshot.contains(id));
            }
        }

        let snapshot = self.refresh_if_stale().await?;
        Ok(snapshot.contains(id))
    }

    /// Fetch the detail record for an identifier, bypassing the snapshot
    pub async fn lookup(&self, id: &str) -> Result<TracksysItem> {
        self.source.details(id).await
    }

    /// Force a reload now, independent of staleness
    pub async fn reload(&self) -> Result<()> {
        let _guard = self.reload_lock.lock().await;
        self.reload_locked().await
    }

    /// Number of completed reloads including the initial load
    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::Acquire)
    }

    /// Size of the current snapshot
    pub async fn len(&self) -> usize {
        self.state.read().await.snapshot.len()
    }

    /// Whether the current snapshot is empty
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.snapshot.is_empty()
    }

    async fn refresh_if_stale(&self) -> Result<Arc<IdentifierSnapshot>> {
        let _guard = self.reload_lock.lock().await;

        // another reader may have reloaded while we waited for the lock
        {
            let state = self.state.read().await;
            if !state.is_stale(self.config.max_age) {
                return Ok(Arc::clone(&state.snapshot));
            }
        }

        match self.reload_locked().await {
            Ok(()) => Ok(Arc::clone(&self.state.read().await.snapshot)),
            Err(e) => match self.config.reload_failure {
                ReloadFailurePolicy::Fatal => Err(e),
                ReloadFailurePolicy::ServeStale => {
                    tracing::warn!(error = %e, "Identifier cache reload failed, serving previous snapshot");
                    let mut state = self.state.write().await;
                    state.loaded_at = Instant::now();
                    Ok(Arc::clone(&state.snapshot))
                }
            },
        }
    }

    // caller holds reload_lock
    async fn reload_locked(&self) -> Result<()> {
        let start = Instant::now();
        let snapshot = fetch_snapshot(self.source.as_ref()).await.map_err(|e| {
            tracing::error!(error = %e, "Identifier cache reload failed");
            Error::CacheReload(Box::new(e))
        })?;
        let count = snapshot.len();

        {
            let mut state = self.state.write().await;
            state.snapshot = Arc::new(snapshot);
            state.loaded_at = Instant::now();
        }
        let reloads = self.reloads.fetch_add(1, Ordering::AcqRel) + 1;

        tracing::info!(
            identifiers = count,
            reloads,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Identifier cache reloaded"
        );
        Ok(())
    }
}

async fn fetch_snapshot(source: &dyn IdentifierSource) -> Result<IdentifierSnapshot> {
    let ids = source.directory().await?;
    Ok(IdentifierSnapshot::from_ids(ids))
}
