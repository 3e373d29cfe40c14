//! Search outcomes.

use crate::error::{Error, ErrorCategory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A verification code pulled out of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedCode {
    /// The code itself: 4 to 8 ASCII digits.
    pub code: String,
    /// Platform the search was made for.
    pub platform: String,
    /// The mailbox address the message was sent from (the search target).
    pub source_email: String,
    /// Subject line of the message.
    pub subject: String,
    /// When the message was received.
    pub received_at: DateTime<Utc>,
    /// Backend the message was found on.
    pub backend_name: String,
}

/// A message that passed sender and freshness validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSummary {
    /// Backend the message lives on.
    pub backend_name: String,
    /// Subject line.
    pub subject: String,
    /// Sender address.
    pub sender: String,
    /// Receive time.
    pub received_at: DateTime<Utc>,
    /// The code extracted from this message, if any.
    pub code: Option<ExtractedCode>,
    /// Start of the message text with markup removed.
    pub preview: String,
}

/// A backend attempt that failed softly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendFailure {
    /// Backend name.
    pub backend: String,
    /// Error category.
    pub category: ErrorCategory,
    /// Error message.
    pub error: String,
}

impl BackendFailure {
    pub(crate) fn new(backend: &str, error: &Error) -> Self {
        Self {
            backend: backend.to_string(),
            category: error.category(),
            error: error.to_string(),
        }
    }
}

/// Terminal status of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    /// A code was found.
    Found,
    /// Nothing usable was found.
    NotFound,
    /// The search was rejected or failed.
    Error,
}

/// The single value a search returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Id of this search; also the audit record key.
    pub request_id: Uuid,
    /// `true` iff `status` is [`SearchStatus::Found`].
    pub found: bool,
    /// Terminal status.
    pub status: SearchStatus,
    /// The winning code.
    pub code: Option<ExtractedCode>,
    /// Human-readable outcome.
    pub message: String,
    /// Number of backends actually attempted.
    pub backends_checked: usize,
    /// Number of messages the backends returned for the search criteria.
    pub candidates_seen: usize,
    /// Messages that passed validation, in the order they were examined.
    pub candidates: Vec<CandidateSummary>,
    /// Soft backend failures.
    pub failures: Vec<BackendFailure>,
    /// Category of the error that produced an error result.
    pub error_category: Option<ErrorCategory>,
}

impl SearchResult {
    /// An error result that contacted no backend.
    #[must_use]
    pub fn rejected(request_id: Uuid, error: &Error) -> Self {
        let message = match error.category() {
            ErrorCategory::Internal => "internal error".to_string(),
            _ => error.to_string(),
        };
        Self {
            request_id,
            found: false,
            status: SearchStatus::Error,
            code: None,
            message,
            backends_checked: 0,
            candidates_seen: 0,
            candidates: Vec::new(),
            failures: Vec::new(),
            error_category: Some(error.category()),
        }
    }

    /// Returns the candidate at `index` in examination order.
    #[must_use]
    pub fn candidate(&self, index: usize) -> Option<&CandidateSummary> {
        self.candidates.get(index)
    }
}
