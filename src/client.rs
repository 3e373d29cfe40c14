//! IMAP implementation of the mailbox seam.
//!
//! [`ImapConnector`] opens one fresh session per backend attempt: connect
//! (implicit TLS, STARTTLS or plain TCP), log in, select the backend's mailbox. Every
//! step is bounded by its own timeout from [`TimeoutConfig`].
//!
//! # Example
//!
//! ```no_run
//! use otp_search::backend::MailBackend;
//! use otp_search::config::TimeoutConfig;
//! use otp_search::mailbox::{MailboxConnector, SearchCriteria};
//! use otp_search::ImapConnector;
//!
//! # async fn example() -> otp_search::Result<()> {
//! let backend = MailBackend::builder()
//!     .name("primary")
//!     .host("imap.example.com")
//!     .username("codes@example.com")
//!     .password("app-password")
//!     .build()?;
//!
//! let mut session = ImapConnector::new()
//!     .open(&backend, &TimeoutConfig::default())
//!     .await?;
//! let uids = session
//!     .search(&SearchCriteria {
//!         from: "user@example.com".into(),
//!         subject: "Your sign-in code".into(),
//!         since: chrono::Utc::now().date_naive(),
//!     })
//!     .await?;
//! println!("{} matching messages", uids.len());
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::backend::MailBackend;
use crate::config::TimeoutConfig;
use crate::connection;
use crate::error::{Error, Result};
use crate::mailbox::{CandidateMessage, MailboxConnector, MailboxSession, SearchCriteria};
use crate::parser;
use crate::session::{self, ImapSession};
use async_trait::async_trait;
use tracing::{debug, instrument};

/// Opens IMAP sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImapConnector;

impl ImapConnector {
    /// Creates a connector.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Initializes IMAP session with connection, authentication, and mailbox selection.
    async fn initialize_session(
        backend: &MailBackend,
        timeouts: &TimeoutConfig,
    ) -> Result<ImapSession> {
        let target_addr = backend.address();

        let stream = tokio::time::timeout(timeouts.connect, connection::establish(backend))
            .await
            .map_err(|_| Error::ConnectTimeout {
                target: target_addr.clone(),
                timeout: timeouts.connect,
            })??;

        debug!("Connection established");

        let credentials = backend.credentials();
        let mut session = tokio::time::timeout(
            timeouts.auth,
            session::authenticate(stream, credentials),
        )
        .await
        .map_err(|_| Error::AuthTimeout {
            username: credentials.username().to_string(),
            timeout: timeouts.auth,
        })??;

        debug!("Authenticated");

        let mailbox = backend.mailbox();
        tokio::time::timeout(
            timeouts.select,
            session::select_mailbox(&mut session, mailbox),
        )
        .await
        .map_err(|_| Error::SelectTimeout {
            mailbox: mailbox.to_string(),
            timeout: timeouts.select,
        })??;

        debug!(mailbox = %mailbox, "Selected mailbox");

        Ok(session)
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    #[instrument(
        name = "ImapConnector::open",
        skip_all,
        fields(
            backend = %backend.name(),
            imap_host = %backend.host(),
            port = backend.port()
        )
    )]
    async fn open(
        &self,
        backend: &MailBackend,
        timeouts: &TimeoutConfig,
    ) -> Result<Box<dyn MailboxSession>> {
        let session = Self::initialize_session(backend, timeouts).await?;

        Ok(Box::new(ImapMailbox {
            session,
            backend: backend.name().to_string(),
            timeouts: *timeouts,
        }))
    }
}

/// An open IMAP session with the backend's mailbox selected.
struct ImapMailbox {
    session: ImapSession,
    backend: String,
    timeouts: TimeoutConfig,
}

#[async_trait]
impl MailboxSession for ImapMailbox {
    #[instrument(
        name = "ImapMailbox::search",
        skip_all,
        fields(backend = %self.backend, subject = %criteria.subject)
    )]
    async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<u32>> {
        let timeout = self.timeouts.search;

        tokio::time::timeout(timeout, session::search(&mut self.session, criteria))
            .await
            .map_err(|_| Error::SearchTimeout { timeout })?
    }

    #[instrument(
        name = "ImapMailbox::fetch",
        skip(self),
        fields(backend = %self.backend)
    )]
    async fn fetch(&mut self, uid: u32) -> Result<Option<CandidateMessage>> {
        let timeout = self.timeouts.fetch;

        let fetched = tokio::time::timeout(timeout, session::fetch_one(&mut self.session, uid))
            .await
            .map_err(|_| Error::FetchTimeout { uid, timeout })??;

        let Some(message) = fetched else {
            debug!("Message disappeared before fetch");
            return Ok(None);
        };

        Ok(parser::candidate_from_fetch(uid, &message))
    }

    #[instrument(name = "ImapMailbox::close", skip(self), fields(backend = %self.backend))]
    async fn close(&mut self) -> Result<()> {
        let timeout = self.timeouts.logout;

        tokio::time::timeout(timeout, session::logout(&mut self.session))
            .await
            .map_err(|_| Error::LogoutTimeout { timeout })?
    }
}

impl std::fmt::Debug for ImapMailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapMailbox")
            .field("backend", &self.backend)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}
