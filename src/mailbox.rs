//! Mailbox session seam between the search engine and a mail protocol.
//!
//! The engine only talks to [`MailboxConnector`] and [`MailboxSession`];
//! [`ImapConnector`](crate::ImapConnector) is the production implementation.
//! Every opened session is wrapped in a [`SessionGuard`] so it is closed on
//! every exit path, including cancellation.

use crate::backend::MailBackend;
use crate::config::TimeoutConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::time::Duration;
use tracing::{debug, warn};

/// Criteria of one backend-side search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCriteria {
    /// Sender address.
    pub from: String,
    /// Subject substring.
    pub subject: String,
    /// Only messages received on or after this date.
    pub since: NaiveDate,
}

/// A fetched message, already reduced to what the engine needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateMessage {
    /// Backend-local message id.
    pub uid: u32,
    /// Lowercased `From` address, empty if it could not be parsed.
    pub sender_address: String,
    /// Decoded subject line.
    pub subject_line: String,
    /// `Date` header, or the server receive time when the header is missing.
    pub received_at: DateTime<Utc>,
    /// Decoded body text with markup removed.
    pub body_text: String,
}

impl CandidateMessage {
    /// Returns `true` if the message was sent by `address` (exact, case-insensitive).
    #[must_use]
    pub fn is_from(&self, address: &str) -> bool {
        !self.sender_address.is_empty() && self.sender_address.eq_ignore_ascii_case(address)
    }

    /// First `max_chars` characters of the body with whitespace collapsed.
    #[must_use]
    pub fn preview(&self, max_chars: usize) -> String {
        let collapsed = self.body_text.split_whitespace().collect::<Vec<_>>().join(" ");
        match collapsed.char_indices().nth(max_chars) {
            Some((end, _)) => format!("{}...", &collapsed[..end]),
            None => collapsed,
        }
    }
}

/// Opens sessions to mail backends.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    /// Connects, authenticates and selects the backend's mailbox.
    ///
    /// # Errors
    ///
    /// Returns a network, timeout or protocol error. The engine records it and
    /// moves on to the next backend.
    async fn open(
        &self,
        backend: &MailBackend,
        timeouts: &TimeoutConfig,
    ) -> Result<Box<dyn MailboxSession>>;
}

/// An authenticated session with a selected mailbox.
#[async_trait]
pub trait MailboxSession: Send {
    /// Returns the ids of messages matching `criteria`. Empty is not an error.
    async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<u32>>;

    /// Fetches one message.
    ///
    /// Returns `Ok(None)` when the message is gone or could not be parsed.
    async fn fetch(&mut self, uid: u32) -> Result<Option<CandidateMessage>>;

    /// Ends the session.
    async fn close(&mut self) -> Result<()>;
}

/// Owns an open session and guarantees it gets closed.
///
/// Call [`close`](Self::close) on the normal path. If the guard is dropped
/// instead (error, timeout, cancelled future) a bounded close is spawned on
/// the current tokio runtime.
pub struct SessionGuard {
    inner: Option<Box<dyn MailboxSession>>,
    backend: String,
    close_timeout: Duration,
}

impl SessionGuard {
    /// Wraps `session` opened against `backend`.
    #[must_use]
    pub fn new(
        backend: impl Into<String>,
        session: Box<dyn MailboxSession>,
        close_timeout: Duration,
    ) -> Self {
        Self {
            inner: Some(session),
            backend: backend.into(),
            close_timeout,
        }
    }

    /// Backend name.
    #[must_use]
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// See [`MailboxSession::search`].
    ///
    /// # Errors
    ///
    /// Propagates session errors.
    pub async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<u32>> {
        self.session()?.search(criteria).await
    }

    /// See [`MailboxSession::fetch`].
    ///
    /// # Errors
    ///
    /// Propagates session errors.
    pub async fn fetch(&mut self, uid: u32) -> Result<Option<CandidateMessage>> {
        self.session()?.fetch(uid).await
    }

    /// Closes the session and consumes the guard.
    ///
    /// # Errors
    ///
    /// Returns the close error or [`Error::LogoutTimeout`]. Neither affects
    /// the search outcome.
    pub async fn close(mut self) -> Result<()> {
        let Some(mut session) = self.inner.take() else {
            return Ok(());
        };
        tokio::time::timeout(self.close_timeout, session.close())
            .await
            .map_err(|_| Error::LogoutTimeout {
                timeout: self.close_timeout,
            })?
    }

    fn session(&mut self) -> Result<&mut Box<dyn MailboxSession>> {
        self.inner.as_mut().ok_or_else(|| Error::Internal {
            message: format!("session to '{}' already closed", self.backend),
        })
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(mut session) = self.inner.take() else {
            return;
        };
        let close_timeout = self.close_timeout;
        let backend = std::mem::take(&mut self.backend);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match tokio::time::timeout(close_timeout, session.close()).await {
                        Ok(Ok(())) => debug!(backend = %backend, "Dropped session closed"),
                        Ok(Err(e)) => {
                            warn!(backend = %backend, error = %e, "Dropped session close failed");
                        }
                        Err(_) => warn!(
                            backend = %backend,
                            timeout_secs = close_timeout.as_secs(),
                            "Dropped session close timed out"
                        ),
                    }
                });
            }
            Err(_) => {
                warn!(
                    backend = %backend,
                    "SessionGuard dropped outside of a tokio runtime, \
                     connection closed without logout"
                );
            }
        }
    }
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("backend", &self.backend)
            .field("open", &self.inner.is_some())
            .finish()
    }
}
