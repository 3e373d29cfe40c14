//! Caller-side request flow shared by front-ends.
//!
//! [`SearchService::submit`] runs the gate checks in order (rate limit,
//! entitlement), delegates to the [`SearchEngine`] and caches the result for
//! follow-up detail lookups.

use crate::cache::ResultCache;
use crate::engine::SearchEngine;
use crate::error::{Error, Result};
use crate::provider::EntitlementProvider;
use crate::rate_limit::AdmissionController;
use crate::request::{RequesterId, SearchRequest};
use crate::result::{CandidateSummary, SearchResult};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Rate limiting, entitlement checks, search and caching in one place.
pub struct SearchService {
    engine: Arc<SearchEngine>,
    limiter: Arc<dyn AdmissionController>,
    entitlements: Arc<dyn EntitlementProvider>,
    cache: Arc<dyn ResultCache>,
}

impl SearchService {
    /// Wires a service from its collaborators.
    #[must_use]
    pub fn new(
        engine: Arc<SearchEngine>,
        limiter: Arc<dyn AdmissionController>,
        entitlements: Arc<dyn EntitlementProvider>,
        cache: Arc<dyn ResultCache>,
    ) -> Self {
        Self {
            engine,
            limiter,
            entitlements,
            cache,
        }
    }

    /// The underlying engine.
    #[must_use]
    pub fn engine(&self) -> &SearchEngine {
        &self.engine
    }

    /// Admits, authorizes and runs one search.
    ///
    /// Searches that reach the engine always return `Ok`, whatever their
    /// status, and are cached for the requester. A failing cache is logged
    /// and does not hide the result.
    ///
    /// # Errors
    ///
    /// - [`Error::RateLimited`] if the requester exceeded the request rate
    /// - [`Error::NotEntitled`] if the requester may not search this
    ///   email/platform pair
    /// - entitlement provider failures
    #[instrument(
        name = "SearchService::submit",
        skip_all,
        fields(requester = %request.requester_id(), platform = %request.platform())
    )]
    pub async fn submit(&self, request: SearchRequest) -> Result<SearchResult> {
        let requester = request.requester_id().clone();

        if !self.limiter.allow(&requester).await {
            return Err(Error::RateLimited {
                requester: requester.to_string(),
            });
        }

        let entitled = self
            .entitlements
            .is_entitled(&requester, request.target_email(), request.platform())
            .await?;
        if !entitled {
            info!("Requester not entitled");
            return Err(Error::NotEntitled {
                requester: requester.to_string(),
                email: request.target_email().to_string(),
                platform: request.platform().to_string(),
            });
        }

        let result = self.engine.search(&request).await;

        if let Err(e) = self.cache.store(&requester, result.clone()).await {
            warn!(error = %e, "Failed to cache search result");
        }

        Ok(result)
    }

    /// Returns candidate `index` of the requester's latest cached result.
    ///
    /// # Errors
    ///
    /// [`Error::NoCachedResult`] or [`Error::CandidateNotFound`].
    pub async fn candidate_detail(
        &self,
        requester: &RequesterId,
        index: usize,
    ) -> Result<CandidateSummary> {
        self.cache.candidate(requester, index).await
    }

    /// Returns the requester's latest cached result.
    ///
    /// # Errors
    ///
    /// Propagates cache failures.
    pub async fn latest(&self, requester: &RequesterId) -> Result<Option<SearchResult>> {
        self.cache.latest(requester).await
    }
}

impl std::fmt::Debug for SearchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchService")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}
