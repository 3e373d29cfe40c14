//! Search orchestration.
//!
//! [`SearchEngine::search`] walks the enabled backends in priority order,
//! searches each configured subject of the platform, validates sender and
//! freshness of every candidate and hands it to the [`CodeExtractor`]. It
//! always returns a [`SearchResult`]; failures become `error` results or
//! diagnostics, never an `Err` or a panic.
//!
//! # Example
//!
//! ```no_run
//! use otp_search::backend::{MailBackend, StaticBackends};
//! use otp_search::platforms::PlatformRegistry;
//! use otp_search::{SearchEngine, SearchRequest};
//! use std::sync::Arc;
//!
//! # async fn example() -> otp_search::Result<()> {
//! let platforms = Arc::new(PlatformRegistry::new());
//! platforms.register("netflix", ["Your sign-in code"]).await;
//!
//! let backends = Arc::new(StaticBackends::new(vec![MailBackend::builder()
//!     .name("primary")
//!     .host("imap.example.com")
//!     .username("codes@example.com")
//!     .password("app-password")
//!     .build()?]));
//!
//! let engine = SearchEngine::builder()
//!     .platforms(platforms)
//!     .backends(backends)
//!     .build()?;
//!
//! let result = engine
//!     .search(&SearchRequest::new(42_i64, "user@example.com", "netflix"))
//!     .await;
//! if let Some(code) = result.code {
//!     println!("code {} from {}", code.code, code.backend_name);
//! }
//! # Ok(())
//! # }
//! ```

use crate::audit::{AuditRecord, AuditSink, AuditStatus, MemoryAuditLog, ResultSummary};
use crate::backend::{BackendRegistry, MailBackend};
use crate::client::ImapConnector;
use crate::config::SearchConfig;
use crate::error::{Error, ErrorCategory, Result};
use crate::extractor::CodeExtractor;
use crate::mailbox::{CandidateMessage, MailboxConnector, SearchCriteria, SessionGuard};
use crate::platforms::{SubjectResolver, SubjectSet};
use crate::provider::{BackendProvider, PlatformProvider, SettingsProvider, StaticSettings};
use crate::request::SearchRequest;
use crate::result::{BackendFailure, CandidateSummary, ExtractedCode, SearchResult, SearchStatus};
use chrono::{DateTime, NaiveDate, Utc};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn, Span};
use uuid::Uuid;

/// Characters of message text kept in a candidate preview.
const PREVIEW_CHARS: usize = 500;

/// Orchestrates one search across all enabled backends.
pub struct SearchEngine {
    settings: Arc<dyn SettingsProvider>,
    subjects: SubjectResolver,
    backends: BackendRegistry,
    connector: Arc<dyn MailboxConnector>,
    audit: Arc<dyn AuditSink>,
    extractor: Arc<CodeExtractor>,
}

/// What one backend attempt produced.
#[derive(Debug)]
enum BackendOutcome {
    /// A code was extracted.
    Found(ExtractedCode),
    /// Valid candidates existed but none carried a code.
    NoCode,
    /// Nothing passed sender and freshness validation.
    NoMatches,
    /// Every subject search was rejected. The failures are already in
    /// `SearchProgress::failures`.
    SearchFailed,
}

/// Per-search inputs shared by all backend attempts.
struct SearchContext<'a> {
    config: &'a SearchConfig,
    target_email: &'a str,
    platform: &'a str,
    subjects: &'a SubjectSet,
    now: DateTime<Utc>,
    since: NaiveDate,
}

/// Counters that survive a cancelled backend attempt.
#[derive(Debug, Default)]
struct SearchProgress {
    backends_reached: usize,
    /// Backends where at least one subject search succeeded.
    backends_searched: usize,
    candidates_seen: usize,
    candidates: Vec<CandidateSummary>,
    failures: Vec<BackendFailure>,
}

impl SearchEngine {
    /// Creates a new engine builder.
    #[must_use]
    pub fn builder() -> SearchEngineBuilder {
        SearchEngineBuilder::default()
    }

    /// Runs one search.
    ///
    /// Never fails: rejected requests, provider failures and internal panics
    /// all come back as a result with [`SearchStatus::Error`].
    #[instrument(
        name = "SearchEngine::search",
        skip_all,
        fields(
            request_id = tracing::field::Empty,
            requester = %request.requester_id(),
            platform = %request.platform()
        )
    )]
    pub async fn search(&self, request: &SearchRequest) -> SearchResult {
        let request_id = Uuid::new_v4();
        Span::current().record("request_id", tracing::field::display(request_id));

        let audit_begun = AtomicBool::new(false);
        let outcome = AssertUnwindSafe(self.run(request_id, request, &audit_begun))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(error)) if error.aborts_search() => {
                info!(error = %error, category = %error.category(), "Search rejected");
                SearchResult::rejected(request_id, &error)
            }
            Ok(Err(error)) => {
                error!(error = %error, category = %error.category(), "Search failed");
                SearchResult::rejected(request_id, &error)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(panic = %message, "Search panicked");
                SearchResult::rejected(request_id, &Error::Internal { message })
            }
        };

        if audit_begun.load(Ordering::SeqCst) {
            self.complete_audit(&result).await;
        }

        result
    }

    async fn run(
        &self,
        request_id: Uuid,
        request: &SearchRequest,
        audit_begun: &AtomicBool,
    ) -> Result<SearchResult> {
        let settings = self.settings.settings().await?;
        let config = SearchConfig::from_settings(&settings)?;
        if !config.enabled {
            return Err(Error::SearchDisabled);
        }

        let validated = request.validate()?;

        let subjects = self.subjects.resolve(validated.platform()).await?;
        if subjects.is_empty() {
            return Err(Error::PlatformNotConfigured {
                platform: validated.platform().to_string(),
            });
        }

        let backends = self.backends.enabled_sorted().await?;
        if backends.is_empty() {
            return Err(Error::NoBackendsConfigured);
        }

        let now = Utc::now();
        self.audit
            .begin(&AuditRecord::searching(
                request_id,
                validated.requester_id().clone(),
                validated.target_email(),
                validated.platform(),
                now,
            ))
            .await?;
        audit_begun.store(true, Ordering::SeqCst);

        let ctx = SearchContext {
            config: &config,
            target_email: validated.target_email(),
            platform: validated.platform(),
            subjects: &subjects,
            now,
            since: config.freshness.since_date(now),
        };

        debug!(
            backends = backends.len(),
            subjects = subjects.len(),
            since = %ctx.since,
            "Starting search"
        );

        Ok(self.search_backends(request_id, &ctx, &backends).await)
    }

    /// Tries each backend in order until a code is found or the policy,
    /// the budget or the backend list ends the search.
    async fn search_backends(
        &self,
        request_id: Uuid,
        ctx: &SearchContext<'_>,
        backends: &[MailBackend],
    ) -> SearchResult {
        let budget = ctx.config.budget;
        let deadline = Instant::now() + budget.overall;

        let mut progress = SearchProgress::default();
        let mut backends_checked = 0;
        let mut code = None;
        let mut saw_codeless_match = false;
        let mut budget_exhausted = false;

        for backend in backends {
            if Instant::now() >= deadline {
                budget_exhausted = true;
                break;
            }
            backends_checked += 1;

            let attempt_deadline = deadline.min(Instant::now() + budget.per_backend);
            let attempt = tokio::time::timeout_at(
                attempt_deadline,
                self.search_backend(ctx, backend, &mut progress),
            )
            .await
            .unwrap_or_else(|_| {
                let timeout = if attempt_deadline == deadline {
                    budget.overall
                } else {
                    budget.per_backend
                };
                Err(Error::BackendTimeout {
                    backend: backend.name().to_string(),
                    timeout,
                })
            });

            match attempt {
                Ok(BackendOutcome::Found(found)) => {
                    code = Some(found);
                    break;
                }
                Ok(BackendOutcome::NoCode) => {
                    saw_codeless_match = true;
                    if !ctx.config.early_stop.continue_on_extraction_miss {
                        debug!(backend = %backend.name(), "Matches without code, ending search");
                        break;
                    }
                }
                Ok(BackendOutcome::NoMatches | BackendOutcome::SearchFailed) => {}
                Err(e) => {
                    warn!(
                        backend = %backend.name(),
                        error = %e,
                        category = %e.category(),
                        retryable = e.is_retryable(),
                        "Backend attempt failed"
                    );
                    progress.failures.push(BackendFailure::new(backend.name(), &e));
                    if Instant::now() >= deadline {
                        budget_exhausted = true;
                        break;
                    }
                }
            }
        }

        let (status, message) = match &code {
            Some(found) => (
                SearchStatus::Found,
                format!("code found on backend '{}'", found.backend_name),
            ),
            None if budget_exhausted => (
                SearchStatus::NotFound,
                format!(
                    "search budget exhausted after {backends_checked} of {} backends",
                    backends.len()
                ),
            ),
            None if progress.backends_reached == 0 => (
                SearchStatus::NotFound,
                "no backend could be reached".to_string(),
            ),
            None if progress.backends_searched == 0 => (
                SearchStatus::NotFound,
                "mailbox search failed on every reachable backend".to_string(),
            ),
            None if saw_codeless_match => (
                SearchStatus::NotFound,
                "matching messages found but no code could be extracted".to_string(),
            ),
            None if !progress.failures.is_empty() => (
                SearchStatus::NotFound,
                format!(
                    "no matching message found, {} backend error(s) occurred",
                    progress.failures.len()
                ),
            ),
            None => (
                SearchStatus::NotFound,
                "no matching message found".to_string(),
            ),
        };

        info!(
            status = ?status,
            backends_checked,
            candidates_seen = progress.candidates_seen,
            failures = progress.failures.len(),
            "Search finished"
        );

        SearchResult {
            request_id,
            found: code.is_some(),
            status,
            code,
            message,
            backends_checked,
            candidates_seen: progress.candidates_seen,
            candidates: progress.candidates,
            failures: progress.failures,
            error_category: None,
        }
    }

    /// One backend attempt: open, scan, close.
    #[instrument(
        name = "SearchEngine::search_backend",
        skip_all,
        fields(backend = %backend.name(), priority = backend.priority)
    )]
    async fn search_backend(
        &self,
        ctx: &SearchContext<'_>,
        backend: &MailBackend,
        progress: &mut SearchProgress,
    ) -> Result<BackendOutcome> {
        let session = self.connector.open(backend, &ctx.config.timeouts).await?;
        progress.backends_reached += 1;

        let mut guard = SessionGuard::new(backend.name(), session, ctx.config.timeouts.logout);
        let outcome = self.scan_mailbox(ctx, backend, &mut guard, progress).await;

        if let Err(e) = guard.close().await {
            warn!(error = %e, "Session close failed");
        }

        outcome
    }

    async fn scan_mailbox(
        &self,
        ctx: &SearchContext<'_>,
        backend: &MailBackend,
        guard: &mut SessionGuard,
        progress: &mut SearchProgress,
    ) -> Result<BackendOutcome> {
        let mut found: Option<ExtractedCode> = None;
        let mut validated = 0usize;
        let mut searched = 0usize;

        for subject in ctx.subjects.iter() {
            let criteria = SearchCriteria {
                from: ctx.target_email.to_string(),
                subject: subject.to_string(),
                since: ctx.since,
            };

            // A rejected search leaves the session usable, a timed out or
            // broken one does not
            let uids = match guard.search(&criteria).await {
                Ok(uids) => uids,
                Err(e) if e.category() == ErrorCategory::Protocol => {
                    warn!(subject = %subject, error = %e, "Subject search failed, trying next subject");
                    progress.failures.push(BackendFailure::new(backend.name(), &e));
                    continue;
                }
                Err(e) => return Err(e),
            };
            if searched == 0 {
                progress.backends_searched += 1;
            }
            searched += 1;
            progress.candidates_seen += uids.len();
            debug!(subject = %subject, matches = uids.len(), "Subject searched");

            // Once a code is known the remaining subjects are only counted
            if found.is_some() {
                continue;
            }

            for &uid in uids.iter().rev().take(ctx.config.max_candidates_per_subject) {
                let Some(message) = guard.fetch(uid).await? else {
                    continue;
                };

                if !message.is_from(ctx.target_email) {
                    debug!(uid, sender = %message.sender_address, "Sender mismatch, skipping");
                    continue;
                }
                if !ctx.config.freshness.is_fresh(message.received_at, ctx.now) {
                    debug!(uid, received_at = %message.received_at, "Message too old, skipping");
                    continue;
                }

                validated += 1;
                let code = self.extract(ctx, backend, &message);
                progress
                    .candidates
                    .push(summarize(backend, &message, code.clone()));

                if let Some(code) = code {
                    info!(uid, subject = %message.subject_line, "Code extracted");
                    found = Some(code);
                    break;
                }
                debug!(uid, "No code in message");
            }

            if found.is_some() && ctx.config.early_stop.stop_on_first_code {
                break;
            }
        }

        Ok(match found {
            Some(code) => BackendOutcome::Found(code),
            None if validated > 0 => BackendOutcome::NoCode,
            None if searched == 0 => BackendOutcome::SearchFailed,
            None => BackendOutcome::NoMatches,
        })
    }

    /// Extracts from the body, then from the subject line.
    fn extract(
        &self,
        ctx: &SearchContext<'_>,
        backend: &MailBackend,
        message: &CandidateMessage,
    ) -> Option<ExtractedCode> {
        let code = self
            .extractor
            .extract(&message.body_text)
            .or_else(|| self.extractor.extract(&message.subject_line))?;

        Some(ExtractedCode {
            code,
            platform: ctx.platform.to_string(),
            source_email: ctx.target_email.to_string(),
            subject: message.subject_line.clone(),
            received_at: message.received_at,
            backend_name: backend.name().to_string(),
        })
    }

    async fn complete_audit(&self, result: &SearchResult) {
        let summary = match ResultSummary::from_result(result).to_json() {
            Ok(summary) => summary,
            Err(e) => {
                error!(error = %e, "Failed to serialize audit summary");
                serde_json::Value::Null
            }
        };

        if let Err(e) = self
            .audit
            .complete(result.request_id, AuditStatus::from(result.status), summary)
            .await
        {
            error!(error = %e, "Failed to complete audit record");
        }
    }
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine")
            .field("extractor", &self.extractor)
            .finish_non_exhaustive()
    }
}

fn summarize(
    backend: &MailBackend,
    message: &CandidateMessage,
    code: Option<ExtractedCode>,
) -> CandidateSummary {
    CandidateSummary {
        backend_name: backend.name().to_string(),
        subject: message.subject_line.clone(),
        sender: message.sender_address.clone(),
        received_at: message.received_at,
        code,
        preview: message.preview(PREVIEW_CHARS),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Builder for [`SearchEngine`].
#[derive(Default)]
pub struct SearchEngineBuilder {
    settings: Option<Arc<dyn SettingsProvider>>,
    platforms: Option<Arc<dyn PlatformProvider>>,
    backends: Option<Arc<dyn BackendProvider>>,
    connector: Option<Arc<dyn MailboxConnector>>,
    audit: Option<Arc<dyn AuditSink>>,
    extractor: Option<CodeExtractor>,
}

impl SearchEngineBuilder {
    /// Sets the settings source (default: empty settings, all defaults).
    #[must_use]
    pub fn settings(mut self, settings: Arc<dyn SettingsProvider>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Sets the platform source (required).
    #[must_use]
    pub fn platforms(mut self, platforms: Arc<dyn PlatformProvider>) -> Self {
        self.platforms = Some(platforms);
        self
    }

    /// Sets the backend source (required).
    #[must_use]
    pub fn backends(mut self, backends: Arc<dyn BackendProvider>) -> Self {
        self.backends = Some(backends);
        self
    }

    /// Sets the mailbox connector (default: [`ImapConnector`]).
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn MailboxConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Sets the audit sink (default: a private [`MemoryAuditLog`]).
    #[must_use]
    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Sets the code extractor (default: [`CodeExtractor::standard`]).
    #[must_use]
    pub fn extractor(mut self, extractor: CodeExtractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Builds the engine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if platforms or backends are missing.
    pub fn build(self) -> Result<SearchEngine> {
        let platforms = self.platforms.ok_or_else(|| Error::InvalidConfig {
            message: "platform provider is required".into(),
        })?;
        let backends = self.backends.ok_or_else(|| Error::InvalidConfig {
            message: "backend provider is required".into(),
        })?;

        Ok(SearchEngine {
            settings: self
                .settings
                .unwrap_or_else(|| Arc::new(StaticSettings::default())),
            subjects: SubjectResolver::new(platforms),
            backends: BackendRegistry::new(backends),
            connector: self
                .connector
                .unwrap_or_else(|| Arc::new(ImapConnector::new())),
            audit: self
                .audit
                .unwrap_or_else(|| Arc::new(MemoryAuditLog::new())),
            extractor: Arc::new(self.extractor.unwrap_or_default()),
        })
    }
}

impl std::fmt::Debug for SearchEngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngineBuilder")
            .field("has_platforms", &self.platforms.is_some())
            .field("has_backends", &self.backends.is_some())
            .finish_non_exhaustive()
    }
}
