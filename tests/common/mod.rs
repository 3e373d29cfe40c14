//! In-memory mail backends for engine tests.
//!
//! The fake search matches on subject only, so sender filtering is left to
//! the engine exactly as with a lenient real server.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use otp_search::audit::MemoryAuditLog;
use otp_search::backend::{MailBackend, StaticBackends};
use otp_search::config::TimeoutConfig;
use otp_search::mailbox::{CandidateMessage, MailboxConnector, MailboxSession, SearchCriteria};
use otp_search::platforms::PlatformRegistry;
use otp_search::provider::StaticSettings;
use otp_search::{Error, Result, SearchEngine};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TARGET: &str = "victim@example.com";
pub const PLATFORM: &str = "netflix";
pub const SUBJECTS: [&str; 2] = ["Your sign-in code", "Netflix: Your code"];

/// What the fake saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open(String),
    Search(String, String),
    Fetch(String, u32),
    Close(String),
}

/// How a fake backend misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Behavior {
    #[default]
    Normal,
    /// Connection refused.
    Unreachable,
    /// `open` never completes.
    HangOnOpen,
    /// `search` never completes.
    HangOnSearch,
    /// Every fetch fails.
    FailFetch,
    /// The server answers `NO` to searches for this subject.
    RejectSearchFor(&'static str),
    /// The server answers `NO` to every search.
    RejectEverySearch,
    /// Every search times out.
    SearchTimesOut,
}

#[derive(Debug, Clone, Default)]
pub struct FakeMailbox {
    pub messages: Vec<CandidateMessage>,
    pub behavior: Behavior,
}

impl FakeMailbox {
    /// Messages get UIDs in insertion order, starting at 1.
    pub fn with_messages(messages: Vec<CandidateMessage>) -> Self {
        let messages = messages
            .into_iter()
            .enumerate()
            .map(|(i, mut m)| {
                m.uid = u32::try_from(i + 1).unwrap();
                m
            })
            .collect();
        Self {
            messages,
            behavior: Behavior::Normal,
        }
    }

    pub fn behaving(behavior: Behavior) -> Self {
        Self {
            messages: Vec::new(),
            behavior,
        }
    }
}

/// A message received `minutes_ago` minutes before now.
pub fn message(sender: &str, subject: &str, body: &str, minutes_ago: i64) -> CandidateMessage {
    CandidateMessage {
        uid: 0,
        sender_address: sender.to_lowercase(),
        subject_line: subject.to_string(),
        received_at: Utc::now() - ChronoDuration::minutes(minutes_ago),
        body_text: body.to_string(),
    }
}

pub fn backend(name: &str, priority: i32) -> MailBackend {
    MailBackend::builder()
        .name(name)
        .host(format!("{name}.example.com"))
        .username(format!("codes@{name}.example.com"))
        .password("secret")
        .priority(priority)
        .build()
        .unwrap()
}

#[derive(Debug, Default)]
pub struct FakeConnector {
    mailboxes: HashMap<String, FakeMailbox>,
    events: Arc<Mutex<Vec<Event>>>,
}

impl FakeConnector {
    pub fn new(mailboxes: impl IntoIterator<Item = (&'static str, FakeMailbox)>) -> Self {
        Self {
            mailboxes: mailboxes
                .into_iter()
                .map(|(name, mailbox)| (name.to_string(), mailbox))
                .collect(),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn opens(&self) -> usize {
        self.count(|e| matches!(e, Event::Open(_)))
    }

    pub fn closes(&self) -> usize {
        self.count(|e| matches!(e, Event::Close(_)))
    }

    pub fn fetches(&self) -> usize {
        self.count(|e| matches!(e, Event::Fetch(..)))
    }

    pub fn searched_subjects(&self, backend: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Search(b, subject) if b == backend => Some(subject),
                _ => None,
            })
            .collect()
    }

    fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }
}

#[async_trait]
impl MailboxConnector for FakeConnector {
    async fn open(
        &self,
        backend: &MailBackend,
        _timeouts: &TimeoutConfig,
    ) -> Result<Box<dyn MailboxSession>> {
        let mailbox = self
            .mailboxes
            .get(backend.name())
            .cloned()
            .unwrap_or_default();

        match mailbox.behavior {
            Behavior::Unreachable => {
                return Err(Error::TcpConnect {
                    target: backend.address(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "connection refused",
                    ),
                });
            }
            Behavior::HangOnOpen => std::future::pending::<()>().await,
            _ => {}
        }

        self.events
            .lock()
            .unwrap()
            .push(Event::Open(backend.name().to_string()));

        Ok(Box::new(FakeSession {
            backend: backend.name().to_string(),
            mailbox,
            events: self.events.clone(),
        }))
    }
}

fn rejected_search() -> Error {
    Error::ImapSearch {
        source: async_imap::error::Error::No("SEARCH charset not supported".into()),
    }
}

struct FakeSession {
    backend: String,
    mailbox: FakeMailbox,
    events: Arc<Mutex<Vec<Event>>>,
}

#[async_trait]
impl MailboxSession for FakeSession {
    async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<u32>> {
        self.events
            .lock()
            .unwrap()
            .push(Event::Search(self.backend.clone(), criteria.subject.clone()));

        match self.mailbox.behavior {
            Behavior::HangOnSearch => std::future::pending::<()>().await,
            Behavior::RejectSearchFor(subject) if subject == criteria.subject => {
                return Err(rejected_search());
            }
            Behavior::RejectEverySearch => return Err(rejected_search()),
            Behavior::SearchTimesOut => {
                return Err(Error::SearchTimeout {
                    timeout: Duration::from_secs(15),
                });
            }
            _ => {}
        }

        let needle = criteria.subject.to_lowercase();
        Ok(self
            .mailbox
            .messages
            .iter()
            .filter(|m| m.subject_line.to_lowercase().contains(&needle))
            .map(|m| m.uid)
            .collect())
    }

    async fn fetch(&mut self, uid: u32) -> Result<Option<CandidateMessage>> {
        self.events
            .lock()
            .unwrap()
            .push(Event::Fetch(self.backend.clone(), uid));

        if self.mailbox.behavior == Behavior::FailFetch {
            return Err(Error::FetchTimeout {
                uid,
                timeout: Duration::from_secs(10),
            });
        }

        Ok(self.mailbox.messages.iter().find(|m| m.uid == uid).cloned())
    }

    async fn close(&mut self) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(Event::Close(self.backend.clone()));
        Ok(())
    }
}

/// An engine wired to fakes, with handles to every collaborator.
pub struct Harness {
    pub engine: SearchEngine,
    pub connector: Arc<FakeConnector>,
    pub audit: Arc<MemoryAuditLog>,
    pub settings: Arc<StaticSettings>,
    pub platforms: Arc<PlatformRegistry>,
    pub backends: Arc<StaticBackends>,
}

impl Harness {
    /// `backends` pairs a backend with the contents of its fake mailbox.
    pub async fn new(backends: Vec<(MailBackend, FakeMailbox)>) -> Self {
        let platforms = Arc::new(PlatformRegistry::new());
        platforms.register(PLATFORM, SUBJECTS).await;

        let mailboxes: HashMap<String, FakeMailbox> = backends
            .iter()
            .map(|(b, m)| (b.name().to_string(), m.clone()))
            .collect();
        let connector = Arc::new(FakeConnector {
            mailboxes,
            events: Arc::new(Mutex::new(Vec::new())),
        });

        let backends = Arc::new(StaticBackends::new(
            backends.into_iter().map(|(b, _)| b).collect(),
        ));
        let settings = Arc::new(StaticSettings::default());
        let audit = Arc::new(MemoryAuditLog::new());

        let engine = SearchEngine::builder()
            .settings(settings.clone())
            .platforms(platforms.clone())
            .backends(backends.clone())
            .connector(connector.clone())
            .audit(audit.clone())
            .build()
            .unwrap();

        Self {
            engine,
            connector,
            audit,
            settings,
            platforms,
            backends,
        }
    }
}
