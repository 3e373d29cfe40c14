//! Per-requester admission control.
//!
//! # Example
//!
//! ```
//! use otp_search::config::RateLimitConfig;
//! use otp_search::rate_limit::{AdmissionController, SlidingWindowLimiter};
//! use otp_search::RequesterId;
//!
//! # async fn example() {
//! let limiter = SlidingWindowLimiter::new(RateLimitConfig::default());
//! let requester = RequesterId::from(42_i64);
//!
//! if limiter.allow(&requester).await {
//!     println!("search admitted");
//! }
//! # }
//! ```

use crate::config::RateLimitConfig;
use crate::request::RequesterId;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Decides whether a requester may start another search.
#[async_trait]
pub trait AdmissionController: Send + Sync {
    /// Returns `true` and records the request if it is admitted.
    ///
    /// A denied request is not recorded.
    async fn allow(&self, requester: &RequesterId) -> bool;
}

/// Timestamps of recently admitted requests of one requester.
#[derive(Debug, Clone, Default)]
struct SlidingWindow {
    requests: VecDeque<Instant>,
}

impl SlidingWindow {
    /// Prunes, counts and appends as one step.
    fn try_add(&mut self, now: Instant, config: &RateLimitConfig) -> bool {
        self.cleanup(now, config.window);

        if self.requests.len() < config.max_requests {
            self.requests.push_back(now);
            true
        } else {
            false
        }
    }

    /// Remove expired requests
    fn cleanup(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.requests.front() {
            if now.duration_since(oldest) >= window {
                self.requests.pop_front();
            } else {
                break;
            }
        }
    }
}

/// In-memory sliding-window limiter.
///
/// State is per process. Replicated deployments need an
/// [`AdmissionController`] backed by a shared store instead.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    config: RateLimitConfig,
    windows: RwLock<HashMap<RequesterId, SlidingWindow>>,
    last_cleanup: Mutex<Instant>,
    cleanup_interval: Duration,
}

impl SlidingWindowLimiter {
    /// Creates a limiter.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: RwLock::new(HashMap::new()),
            last_cleanup: Mutex::new(Instant::now()),
            cleanup_interval: Duration::from_secs(300),
        }
    }

    /// The limiter's configuration.
    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Number of requests of `requester` inside the current window.
    pub async fn count(&self, requester: &RequesterId) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.write().await;
        windows.get_mut(requester).map_or(0, |window| {
            window.cleanup(now, self.config.window);
            window.requests.len()
        })
    }

    /// Forgets all requests of `requester`.
    pub async fn reset(&self, requester: &RequesterId) {
        self.windows.write().await.remove(requester);
        debug!(requester = %requester, "Reset rate limit");
    }

    /// Number of requesters currently tracked.
    pub async fn tracked(&self) -> usize {
        self.windows.read().await.len()
    }

    /// Drops idle windows every few minutes.
    async fn maybe_cleanup(&self, now: Instant) {
        let mut last_cleanup = self.last_cleanup.lock().await;
        if now.duration_since(*last_cleanup) < self.cleanup_interval {
            return;
        }
        *last_cleanup = now;
        drop(last_cleanup);

        let mut windows = self.windows.write().await;
        let before = windows.len();
        windows.retain(|_, window| {
            window.cleanup(now, self.config.window);
            !window.requests.is_empty()
        });
        debug!(
            removed = before - windows.len(),
            remaining = windows.len(),
            "Rate limiter cleanup"
        );
    }
}

#[async_trait]
impl AdmissionController for SlidingWindowLimiter {
    async fn allow(&self, requester: &RequesterId) -> bool {
        let now = Instant::now();
        self.maybe_cleanup(now).await;

        let mut windows = self.windows.write().await;
        let allowed = windows
            .entry(requester.clone())
            .or_default()
            .try_add(now, &self.config);

        if !allowed {
            warn!(
                requester = %requester,
                max_requests = self.config.max_requests,
                window_secs = self.config.window.as_secs(),
                "Rate limit exceeded"
            );
        }

        allowed
    }
}
