//! Internal IMAP session management.
//!
//! This module wraps async-imap operations with proper error handling.

use crate::backend::Credentials;
use crate::connection::BoxedStream;
use crate::error::{Error, Result};
use crate::mailbox::SearchCriteria;
use async_imap::types::Fetch;
use async_imap::Session;
use futures::StreamExt;
use tracing::{debug, instrument};

/// Type alias for IMAP session over a TLS or plain stream.
pub(crate) type ImapSession = Session<BoxedStream>;

/// Message data items requested per fetch. `BODY.PEEK` leaves `\Seen` alone.
const FETCH_ITEMS: &str = "(UID INTERNALDATE BODY.PEEK[])";

/// Authenticates to IMAP server and returns a session.
#[instrument(
    name = "session::authenticate",
    skip_all,
    fields(username = %credentials.username())
)]
pub(crate) async fn authenticate(
    stream: BoxedStream,
    credentials: &Credentials,
) -> Result<ImapSession> {
    let client = async_imap::Client::new(stream);

    debug!("Authenticating to IMAP server");

    client
        .login(credentials.username(), credentials.password())
        .await
        .map_err(|e| Error::ImapLogin {
            username: credentials.username().to_string(),
            source: e.0,
        })
}

/// Selects a mailbox (typically "INBOX").
#[instrument(name = "session::select", skip(session), fields(mailbox = %mailbox))]
pub(crate) async fn select_mailbox(session: &mut ImapSession, mailbox: &str) -> Result<()> {
    debug!("Selecting mailbox");

    session
        .select(mailbox)
        .await
        .map_err(|source| Error::SelectMailbox {
            mailbox: mailbox.to_string(),
            source,
        })?;

    Ok(())
}

/// Runs a `UID SEARCH` for `criteria` and returns the UIDs in ascending order.
#[instrument(
    name = "session::search",
    skip_all,
    fields(subject = %criteria.subject, since = %criteria.since)
)]
pub(crate) async fn search(
    session: &mut ImapSession,
    criteria: &SearchCriteria,
) -> Result<Vec<u32>> {
    let query = build_search_query(criteria);

    let uids = session
        .uid_search(&query)
        .await
        .map_err(|source| Error::ImapSearch { source })?;

    let mut uids: Vec<u32> = uids.into_iter().collect();
    uids.sort_unstable();

    debug!(uid_count = uids.len(), "Found emails");

    Ok(uids)
}

/// Fetches a single message by UID.
///
/// The fetch stream is drained completely so the session is ready for the
/// next command.
pub(crate) async fn fetch_one(session: &mut ImapSession, uid: u32) -> Result<Option<Fetch>> {
    debug!(uid, "Fetching message");

    let mut stream = session
        .uid_fetch(uid.to_string(), FETCH_ITEMS)
        .await
        .map_err(|source| Error::ImapFetch { uid, source })?
        .boxed();

    let mut found = None;
    while let Some(item) = stream.next().await {
        let fetch = item.map_err(|source| Error::FetchMessage { source })?;
        if found.is_none() && fetch.uid.map_or(true, |u| u == uid) {
            found = Some(fetch);
        }
    }

    Ok(found)
}

/// Logs out from IMAP session.
#[instrument(name = "session::logout", skip(session))]
pub(crate) async fn logout(session: &mut ImapSession) -> Result<()> {
    debug!("Logging out");

    session
        .logout()
        .await
        .map_err(|source| Error::ImapLogout { source })?;

    Ok(())
}

/// Builds the `UID SEARCH` arguments.
///
/// IMAP SINCE format is `DD-Mon-YYYY` (e.g. `07-Dec-2025`). `CHARSET UTF-8`
/// is only sent when an argument is not plain ASCII.
pub(crate) fn build_search_query(criteria: &SearchCriteria) -> String {
    let since = criteria.since.format("%d-%b-%Y");
    let query = format!(
        "FROM {} SUBJECT {} SINCE {since}",
        quote(&criteria.from),
        quote(&criteria.subject)
    );

    if criteria.from.is_ascii() && criteria.subject.is_ascii() {
        query
    } else {
        format!("CHARSET UTF-8 {query}")
    }
}

/// Renders an IMAP quoted string.
fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '\r' | '\n' => {}
            '"' | '\\' => {
                quoted.push('\\');
                quoted.push(c);
            }
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}
