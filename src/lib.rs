//! # otp-search
//!
//! Async multi-backend IMAP search engine for retrieving email verification codes.
//!
//! Given a requester, a target email address and a platform, the engine:
//! - Queries the configured mail backends in priority order
//! - Searches each of the platform's known subjects within a freshness window
//! - Keeps only messages actually sent by the target address
//! - Extracts a 4–8 digit code from the first matching message
//! - Records every search in an audit sink and returns a structured result
//!
//! ## Quick Start
//!
//! ```no_run
//! use otp_search::backend::{MailBackend, StaticBackends};
//! use otp_search::platforms::PlatformRegistry;
//! use otp_search::{SearchEngine, SearchRequest, SearchStatus};
//! use std::sync::Arc;
//!
//! # async fn example() -> otp_search::Result<()> {
//! let platforms = Arc::new(PlatformRegistry::new());
//! platforms
//!     .register("netflix", ["Your sign-in code", "Netflix: Your code"])
//!     .await;
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
//! match result.status {
//!     SearchStatus::Found => println!("code: {}", result.code.unwrap().code),
//!     _ => println!("{}", result.message),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Front-end Flow
//!
//! [`SearchService`] bundles what every front-end does around a search: rate
//! limiting, entitlement checks and result caching for "details of #N"
//! follow-ups.
//!
//! ```no_run
//! use otp_search::cache::MemoryResultCache;
//! use otp_search::config::RateLimitConfig;
//! use otp_search::provider::StaticEntitlements;
//! use otp_search::rate_limit::SlidingWindowLimiter;
//! use otp_search::{SearchEngine, SearchRequest, SearchService};
//! use std::sync::Arc;
//!
//! # async fn example(engine: SearchEngine) -> otp_search::Result<()> {
//! let service = SearchService::new(
//!     Arc::new(engine),
//!     Arc::new(SlidingWindowLimiter::new(RateLimitConfig::default())),
//!     Arc::new(StaticEntitlements::new()),
//!     Arc::new(MemoryResultCache::default()),
//! );
//!
//! let result = service
//!     .submit(SearchRequest::new("alice", "user@example.com", "netflix"))
//!     .await?;
//! println!("{} candidates", result.candidates.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom Extraction Rules
//!
//! ```
//! use otp_search::extractor::{CodeExtractor, RegexMatcher};
//!
//! let extractor = CodeExtractor::standard()
//!     .push_rule(RegexMatcher::new(r"PIN-([0-9]{5})").unwrap());
//! assert_eq!(extractor.extract("ref PIN-48213").as_deref(), Some("48213"));
//! ```
//!
//! ## Error Handling
//!
//! [`SearchEngine::search`] never fails; problems show up in the result's
//! status, message and `failures` list. Other operations return [`Error`],
//! whose [`Error::category`] and [`Error::is_retryable`] drive handling:
//!
//! ```
//! use otp_search::Error;
//!
//! fn handle_error(error: &Error) {
//!     if error.is_retryable() {
//!         println!("Transient error, can retry: {}", error);
//!     } else {
//!         println!("Permanent error ({}): {}", error.category(), error);
//!     }
//! }
//! ```
//!
//! ## Observability
//!
//! The crate uses `tracing` for instrumentation. No subscriber is installed.
//!
//! ### Span Naming Convention
//!
//! - `SearchService::submit` - Gate checks and search
//! - `SearchEngine::search` - One search
//! - `SearchEngine::search_backend` - One backend attempt
//! - `ImapConnector::open` - Connect, login, select
//! - `ImapMailbox::search` / `ImapMailbox::fetch` / `ImapMailbox::close`
//! - `session::authenticate` - IMAP authentication
//!
//! ### Standard Fields
//!
//! - `request_id` - UUID of the search
//! - `requester` - Requester id
//! - `platform` - Platform name
//! - `backend` - Backend name
//! - `subject` - Subject searched
//! - `uid` - Message UID

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
pub mod audit;
pub mod backend;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod mailbox;
pub mod platforms;
pub mod provider;
pub mod rate_limit;
pub mod request;
pub mod result;
pub mod service;

// Internal modules
mod client;
mod connection;
mod parser;
mod session;

// Re-exports for ergonomic API
pub use client::ImapConnector;
pub use config::{SearchConfig, SearchConfigBuilder, TimeoutConfig};
pub use engine::{SearchEngine, SearchEngineBuilder};
pub use error::{Error, ErrorCategory, Result};
pub use extractor::CodeExtractor;
pub use request::{RequesterId, SearchRequest};
pub use result::{ExtractedCode, SearchResult, SearchStatus};
pub use service::SearchService;
