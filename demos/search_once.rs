//! Example: Run one verification-code search against a real mailbox.
//!
//! Wires the engine to a single IMAP backend and one platform, runs a search
//! through [`SearchService`] and prints the result. Tracing output shows the
//! per-backend spans.
//!
//! # Usage
//!
//! ```bash
//! export IMAP_HOST="imap.example.com"
//! export IMAP_USER="codes@example.com"
//! export IMAP_PASSWORD="your-app-password"
//! export TARGET_EMAIL="user@example.com"
//! # Optional
//! export PLATFORM="netflix"
//! export PLATFORM_SUBJECTS="Your sign-in code;Netflix: Your code"
//! export RUST_LOG=otp_search=debug
//!
//! cargo run --example search_once
//! ```

use otp_search::backend::{MailBackend, StaticBackends};
use otp_search::cache::MemoryResultCache;
use otp_search::config::RateLimitConfig;
use otp_search::platforms::PlatformRegistry;
use otp_search::provider::StaticEntitlements;
use otp_search::rate_limit::SlidingWindowLimiter;
use otp_search::{RequesterId, SearchEngine, SearchRequest, SearchService, SearchStatus};
use std::env;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> otp_search::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("otp_search=info")),
        )
        .with_target(true)
        .init();

    let host = env::var("IMAP_HOST").expect("IMAP_HOST environment variable required");
    let user = env::var("IMAP_USER").expect("IMAP_USER environment variable required");
    let password = env::var("IMAP_PASSWORD").expect("IMAP_PASSWORD environment variable required");
    let target = env::var("TARGET_EMAIL").expect("TARGET_EMAIL environment variable required");
    let platform = env::var("PLATFORM").unwrap_or_else(|_| "netflix".into());
    let subjects = env::var("PLATFORM_SUBJECTS")
        .unwrap_or_else(|_| "Your sign-in code;Netflix: Your code".into());

    let platforms = Arc::new(PlatformRegistry::new());
    platforms.register(&platform, subjects.split(';')).await;

    let backends = Arc::new(StaticBackends::new(vec![MailBackend::builder()
        .name("primary")
        .host(host)
        .username(user)
        .password(password)
        .build()?]));

    let engine = SearchEngine::builder()
        .platforms(platforms)
        .backends(backends)
        .build()?;

    let requester = RequesterId::from("demo");
    let entitlements = Arc::new(StaticEntitlements::new());
    entitlements.grant_email(requester.clone(), &target).await;
    entitlements.grant_platform(requester.clone(), &platform).await;

    let service = SearchService::new(
        Arc::new(engine),
        Arc::new(SlidingWindowLimiter::new(RateLimitConfig::default())),
        entitlements,
        Arc::new(MemoryResultCache::default()),
    );

    let result = service
        .submit(SearchRequest::new(requester.clone(), &target, &platform))
        .await?;

    match result.status {
        SearchStatus::Found => {
            let code = result.code.as_ref().expect("found result carries a code");
            println!("Code: {} (from '{}' on {})", code.code, code.subject, code.backend_name);
        }
        SearchStatus::NotFound => println!("No code: {}", result.message),
        SearchStatus::Error => println!("Search failed: {}", result.message),
    }

    println!(
        "Backends checked: {}, candidates seen: {}",
        result.backends_checked, result.candidates_seen
    );
    for failure in &result.failures {
        println!("  {} failed ({}): {}", failure.backend, failure.category, failure.error);
    }

    if !result.candidates.is_empty() {
        let first = service.candidate_detail(&requester, 0).await?;
        println!("\nNewest candidate: {} <{}>", first.subject, first.sender);
        println!("{}", first.preview);
    }

    Ok(())
}
