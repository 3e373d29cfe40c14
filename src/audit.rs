//! Audit trail of searches.
//!
//! Every search that passes validation gets exactly one [`AuditRecord`]. It is
//! written with [`AuditStatus::Searching`] before any backend is contacted and
//! completed exactly once with a terminal status and a JSON summary.

use crate::error::{Error, Result};
use crate::request::RequesterId;
use crate::result::{SearchResult, SearchStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Lifecycle state of an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    /// The search is running.
    Searching,
    /// A code was found.
    Found,
    /// The search finished without a code.
    NotFound,
    /// The search failed.
    Error,
}

impl AuditStatus {
    /// Returns `true` for the three terminal states.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, AuditStatus::Searching)
    }

    /// Returns `true` if a record in `self` may move to `next`.
    ///
    /// Only `searching → {found, not_found, error}` is allowed.
    #[must_use]
    pub fn can_transition_to(self, next: AuditStatus) -> bool {
        self == AuditStatus::Searching && next.is_terminal()
    }
}

impl From<SearchStatus> for AuditStatus {
    fn from(status: SearchStatus) -> Self {
        match status {
            SearchStatus::Found => AuditStatus::Found,
            SearchStatus::NotFound => AuditStatus::NotFound,
            SearchStatus::Error => AuditStatus::Error,
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuditStatus::Searching => "searching",
            AuditStatus::Found => "found",
            AuditStatus::NotFound => "not_found",
            AuditStatus::Error => "error",
        })
    }
}

/// One audited search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Search id.
    pub request_id: Uuid,
    /// Who asked.
    pub requester_id: RequesterId,
    /// Searched address.
    pub target_email: String,
    /// Searched platform.
    pub platform: String,
    /// When the search started.
    pub started_at: DateTime<Utc>,
    /// When the search finished.
    pub completed_at: Option<DateTime<Utc>>,
    /// Current status.
    pub status: AuditStatus,
    /// JSON summary of the outcome, set on completion.
    pub result_summary: Option<serde_json::Value>,
}

impl AuditRecord {
    /// Creates a record in the `searching` state.
    #[must_use]
    pub fn searching(
        request_id: Uuid,
        requester_id: RequesterId,
        target_email: impl Into<String>,
        platform: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            request_id,
            requester_id,
            target_email: target_email.into(),
            platform: platform.into(),
            started_at,
            completed_at: None,
            status: AuditStatus::Searching,
            result_summary: None,
        }
    }
}

/// Compact outcome stored with a completed audit record.
///
/// Message previews are left out; only the code and counts are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSummary {
    /// Terminal status.
    pub status: SearchStatus,
    /// The code, if one was found.
    pub code: Option<String>,
    /// Backend the code came from.
    pub backend: Option<String>,
    /// Subject of the message the code came from.
    pub subject: Option<String>,
    /// Human-readable outcome.
    pub message: String,
    /// Backends attempted.
    pub backends_checked: usize,
    /// Messages matched by the search criteria.
    pub candidates_seen: usize,
    /// Messages that passed validation.
    pub candidates_validated: usize,
    /// Names of backends that failed softly.
    pub failed_backends: Vec<String>,
}

impl ResultSummary {
    /// Summarizes a search result.
    #[must_use]
    pub fn from_result(result: &SearchResult) -> Self {
        Self {
            status: result.status,
            code: result.code.as_ref().map(|c| c.code.clone()),
            backend: result.code.as_ref().map(|c| c.backend_name.clone()),
            subject: result.code.as_ref().map(|c| c.subject.clone()),
            message: result.message.clone(),
            backends_checked: result.backends_checked,
            candidates_seen: result.candidates_seen,
            candidates_validated: result.candidates.len(),
            failed_backends: result.failures.iter().map(|f| f.backend.clone()).collect(),
        }
    }

    /// Converts the summary to a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialize`] if serialization fails.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(|source| Error::Serialize { source })
    }
}

/// Destination for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Stores a new record in the `searching` state.
    async fn begin(&self, record: &AuditRecord) -> Result<()>;

    /// Moves a record to its terminal status.
    ///
    /// # Errors
    ///
    /// Implementations must reject a second terminal update with
    /// [`Error::AuditTransition`].
    async fn complete(
        &self,
        request_id: Uuid,
        status: AuditStatus,
        summary: serde_json::Value,
    ) -> Result<()>;
}

/// In-process audit log.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: RwLock<HashMap<Uuid, AuditRecord>>,
}

impl MemoryAuditLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of a record.
    pub async fn get(&self, request_id: Uuid) -> Option<AuditRecord> {
        self.records.read().await.get(&request_id).cloned()
    }

    /// Returns all records of one requester, oldest first.
    pub async fn for_requester(&self, requester: &RequesterId) -> Vec<AuditRecord> {
        let mut records: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| &r.requester_id == requester)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.started_at);
        records
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns `true` if nothing was recorded.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn begin(&self, record: &AuditRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&record.request_id) {
            return Err(Error::AuditTransition {
                request_id: record.request_id,
                from: existing.status,
                to: record.status,
            });
        }
        records.insert(record.request_id, record.clone());
        Ok(())
    }

    async fn complete(
        &self,
        request_id: Uuid,
        status: AuditStatus,
        summary: serde_json::Value,
    ) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&request_id)
            .ok_or(Error::AuditRecordMissing { request_id })?;

        if !record.status.can_transition_to(status) {
            return Err(Error::AuditTransition {
                request_id,
                from: record.status,
                to: status,
            });
        }

        record.status = status;
        record.completed_at = Some(Utc::now());
        record.result_summary = Some(summary);
        Ok(())
    }
}
