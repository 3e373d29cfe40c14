//! Error types for the otp-search crate.
//!
//! All errors implement [`std::error::Error`] and provide context about what went wrong.
//! Errors are grouped into [`ErrorCategory`] values. Only validation and configuration
//! errors abort a search; every other category is recovered inside the engine and
//! surfaces as a diagnostic on the [`SearchResult`](crate::SearchResult).

use crate::audit::AuditStatus;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while searching for verification codes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // ─────────────────────────────────────────────────────────────────────────
    // Validation errors (abort the search, no backend contacted)
    // ─────────────────────────────────────────────────────────────────────────
    /// Invalid email address format.
    #[error("invalid email format: {email}")]
    InvalidEmailFormat {
        /// The invalid email address.
        email: String,
    },

    /// Blank or otherwise unusable platform identifier.
    #[error("invalid platform: '{platform}'")]
    InvalidPlatform {
        /// The rejected platform identifier.
        platform: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration errors (abort the search, no backend contacted)
    // ─────────────────────────────────────────────────────────────────────────
    /// Invalid configuration provided.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// Searching is switched off in the settings.
    #[error("search is disabled")]
    SearchDisabled,

    /// The platform has no subjects configured (or is unknown / disabled).
    #[error("platform '{platform}' is not configured")]
    PlatformNotConfigured {
        /// The requested platform.
        platform: String,
    },

    /// There is no enabled mail backend.
    #[error("no backends configured")]
    NoBackendsConfigured,

    /// Invalid DNS name for TLS.
    #[error("invalid DNS name for host '{host}'")]
    InvalidDnsName {
        /// The invalid hostname.
        host: String,
        /// The underlying DNS name error.
        #[source]
        source: rustls::client::InvalidDnsNameError,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Network / connection errors (soft: the next backend is tried)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to establish TCP connection.
    #[error("failed to connect to {target}")]
    TcpConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to establish TLS connection.
    #[error("failed to establish TLS connection to {target}")]
    TlsConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The server refused or broke off the `STARTTLS` upgrade.
    #[error("STARTTLS negotiation with {target} failed")]
    StartTls {
        /// The target address.
        target: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Timeout errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Connection timeout.
    #[error("connection timeout to {target} after {timeout:?}")]
    ConnectTimeout {
        /// The target address.
        target: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Authentication timeout.
    #[error("authentication timeout for {username} after {timeout:?}")]
    AuthTimeout {
        /// The login used for authentication.
        username: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Mailbox selection timeout.
    #[error("mailbox selection timeout for '{mailbox}' after {timeout:?}")]
    SelectTimeout {
        /// The mailbox name.
        mailbox: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// UID search timeout.
    #[error("message search timeout after {timeout:?}")]
    SearchTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Message fetch timeout.
    #[error("message fetch timeout for UID {uid} after {timeout:?}")]
    FetchTimeout {
        /// The UID being fetched.
        uid: u32,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// A whole backend attempt exceeded its budget.
    #[error("backend '{backend}' did not finish within {timeout:?}")]
    BackendTimeout {
        /// The backend name.
        backend: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Logout timeout (not critical).
    #[error("logout timeout after {timeout:?}")]
    LogoutTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // IMAP protocol errors
    // ─────────────────────────────────────────────────────────────────────────
    /// IMAP login failed (bad credentials or server refusal).
    #[error("IMAP login failed for {username}")]
    ImapLogin {
        /// The login used.
        username: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Failed to select mailbox.
    #[error("failed to select mailbox '{mailbox}'")]
    SelectMailbox {
        /// The mailbox name.
        mailbox: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP search failed.
    #[error("IMAP search failed")]
    ImapSearch {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP fetch failed.
    #[error("IMAP fetch failed for UID {uid}")]
    ImapFetch {
        /// The UID that failed.
        uid: u32,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Failed to fetch message from stream.
    #[error("failed to fetch message from stream")]
    FetchMessage {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP logout failed.
    #[error("IMAP logout failed")]
    ImapLogout {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Email parsing errors (message skipped)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to parse email message.
    #[error("failed to parse email")]
    ParseEmail {
        /// The underlying parse error.
        #[source]
        source: mailparse::MailParseError,
    },

    /// Failed to extract email body.
    #[error("failed to extract email body")]
    ExtractBody {
        /// The underlying parse error.
        #[source]
        source: mailparse::MailParseError,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Caller-side gate errors
    // ─────────────────────────────────────────────────────────────────────────
    /// The requester exceeded the admission rate.
    #[error("too many requests from {requester}")]
    RateLimited {
        /// The throttled requester.
        requester: String,
    },

    /// The requester may not query this email/platform combination.
    #[error("{requester} is not entitled to search {email} on {platform}")]
    NotEntitled {
        /// The requester.
        requester: String,
        /// The requested email.
        email: String,
        /// The requested platform.
        platform: String,
    },

    /// No (unexpired) cached result for the requester.
    #[error("no recent search result for {requester}")]
    NoCachedResult {
        /// The requester.
        requester: String,
    },

    /// The cached result has no candidate at this index.
    #[error("no candidate #{index} in the last result for {requester}")]
    CandidateNotFound {
        /// The requester.
        requester: String,
        /// The requested candidate index.
        index: usize,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Internal errors
    // ─────────────────────────────────────────────────────────────────────────
    /// An external provider (settings, platforms, backends, entitlements) failed.
    #[error("{provider} provider failed: {message}")]
    Provider {
        /// Which provider failed.
        provider: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// Audit record status may not move backwards or be completed twice.
    #[error("audit record {request_id} cannot move from {from} to {to}")]
    AuditTransition {
        /// The audit record id.
        request_id: Uuid,
        /// Current status.
        from: AuditStatus,
        /// Requested status.
        to: AuditStatus,
    },

    /// Audit record does not exist.
    #[error("audit record {request_id} not found")]
    AuditRecordMissing {
        /// The missing id.
        request_id: Uuid,
    },

    /// Failed to serialize a result summary.
    #[error("failed to serialize result summary")]
    Serialize {
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// Unexpected failure inside the search pipeline.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl Error {
    /// Returns `true` if this error represents a transient failure that might succeed on retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::Protocol
        ) && !matches!(self, Error::ImapLogout { .. } | Error::LogoutTimeout { .. })
    }

    /// Returns `true` if this error must abort the whole search.
    ///
    /// Everything else is folded into the result diagnostics and the search
    /// proceeds with the next candidate or backend.
    #[must_use]
    pub fn aborts_search(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Validation | ErrorCategory::Configuration
        )
    }

    /// Returns the error category for metrics/logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidEmailFormat { .. } | Error::InvalidPlatform { .. } => {
                ErrorCategory::Validation
            }

            Error::InvalidConfig { .. }
            | Error::SearchDisabled
            | Error::PlatformNotConfigured { .. }
            | Error::NoBackendsConfigured
            | Error::InvalidDnsName { .. } => ErrorCategory::Configuration,

            Error::TcpConnect { .. } | Error::TlsConnect { .. } => ErrorCategory::Network,

            Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::SelectTimeout { .. }
            | Error::SearchTimeout { .. }
            | Error::FetchTimeout { .. }
            | Error::BackendTimeout { .. }
            | Error::LogoutTimeout { .. } => ErrorCategory::Timeout,

            Error::ImapLogin { .. }
            | Error::SelectMailbox { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. }
            | Error::FetchMessage { .. }
            | Error::ImapLogout { .. }
            | Error::StartTls { .. } => ErrorCategory::Protocol,

            Error::ParseEmail { .. } | Error::ExtractBody { .. } => ErrorCategory::Parse,

            Error::RateLimited { .. }
            | Error::NotEntitled { .. }
            | Error::NoCachedResult { .. }
            | Error::CandidateNotFound { .. } => ErrorCategory::Access,

            Error::Provider { .. }
            | Error::AuditTransition { .. }
            | Error::AuditRecordMissing { .. }
            | Error::Serialize { .. }
            | Error::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Error categories for metrics and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Bad request input.
    Validation,
    /// Configuration errors.
    Configuration,
    /// Network connectivity errors.
    Network,
    /// Timeout errors.
    Timeout,
    /// IMAP protocol errors.
    Protocol,
    /// Email parsing errors.
    Parse,
    /// Rate limiting, entitlement and cache lookups.
    Access,
    /// Unexpected failures.
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Parse => write!(f, "parse"),
            ErrorCategory::Access => write!(f, "access"),
            ErrorCategory::Internal => write!(f, "internal"),
        }
    }
}
