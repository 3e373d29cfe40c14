//! Short-lived per-requester cache of the latest search result.
//!
//! Front-ends use it for "show details of result #N" follow-ups. Each new
//! search of a requester overwrites the previous entry.

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::request::RequesterId;
use crate::result::{CandidateSummary, SearchResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;

/// Stores the latest result per requester.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Stores `result` as the requester's latest.
    async fn store(&self, requester: &RequesterId, result: SearchResult) -> Result<()>;

    /// Returns the requester's latest unexpired result.
    async fn latest(&self, requester: &RequesterId) -> Result<Option<SearchResult>>;

    /// Returns one candidate of the requester's latest result.
    ///
    /// # Errors
    ///
    /// [`Error::NoCachedResult`] if nothing is cached,
    /// [`Error::CandidateNotFound`] if `index` is out of range.
    async fn candidate(&self, requester: &RequesterId, index: usize) -> Result<CandidateSummary> {
        let result = self
            .latest(requester)
            .await?
            .ok_or_else(|| Error::NoCachedResult {
                requester: requester.to_string(),
            })?;

        result
            .candidate(index)
            .cloned()
            .ok_or_else(|| Error::CandidateNotFound {
                requester: requester.to_string(),
                index,
            })
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    stored_at: Instant,
    result: SearchResult,
}

/// In-process [`ResultCache`] with a fixed TTL.
///
/// Expired entries are swept on [`store`](ResultCache::store) at most once
/// per sweep interval.
#[derive(Debug)]
pub struct MemoryResultCache {
    ttl: Duration,
    entries: RwLock<HashMap<RequesterId, CacheEntry>>,
    last_sweep: Mutex<Instant>,
    sweep_interval: Duration,
}

impl MemoryResultCache {
    /// Creates a cache.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            ttl: config.ttl,
            entries: RwLock::new(HashMap::new()),
            last_sweep: Mutex::new(Instant::now()),
            sweep_interval: Duration::from_secs(300),
        }
    }

    /// Drops expired entries, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| now.duration_since(entry.stored_at) < self.ttl);
        before - entries.len()
    }

    async fn maybe_purge(&self, now: Instant) {
        let mut last_sweep = self.last_sweep.lock().await;
        if now.duration_since(*last_sweep) < self.sweep_interval {
            return;
        }
        *last_sweep = now;
        drop(last_sweep);

        let removed = self.purge_expired().await;
        debug!(removed, "Result cache sweep");
    }

    /// Number of cached entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns `true` if nothing is cached.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for MemoryResultCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[async_trait]
impl ResultCache for MemoryResultCache {
    async fn store(&self, requester: &RequesterId, result: SearchResult) -> Result<()> {
        debug!(
            requester = %requester,
            request_id = %result.request_id,
            candidates = result.candidates.len(),
            "Caching search result"
        );
        let now = Instant::now();
        self.maybe_purge(now).await;

        self.entries.write().await.insert(
            requester.clone(),
            CacheEntry {
                stored_at: now,
                result,
            },
        );
        Ok(())
    }

    async fn latest(&self, requester: &RequesterId) -> Result<Option<SearchResult>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(requester)
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .map(|entry| entry.result.clone()))
    }
}
