//! Mail backend definitions and the registry that orders them.
//!
//! # Example
//!
//! ```
//! use otp_search::backend::{Encryption, MailBackend};
//!
//! let backend = MailBackend::builder()
//!     .name("primary")
//!     .host("imap.example.com")
//!     .username("codes@example.com")
//!     .password("app-password")
//!     .priority(1)
//!     .build()
//!     .expect("valid backend");
//!
//! assert_eq!(backend.port(), 993);
//! assert_eq!(backend.encryption(), Encryption::Ssl);
//! assert!(!format!("{backend:?}").contains("app-password"));
//! ```

use crate::error::{Error, Result};
use crate::provider::BackendProvider;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Mailbox selected when a backend does not name one.
pub const DEFAULT_MAILBOX: &str = "INBOX";

/// Wire protocol spoken to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    /// IMAP4rev1.
    #[default]
    Imap,
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "imap" | "imaps" => Ok(Protocol::Imap),
            other => Err(Error::InvalidConfig {
                message: format!("unsupported protocol '{other}'"),
            }),
        }
    }
}

/// Transport security of a backend connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Encryption {
    /// Implicit TLS from the first byte.
    #[default]
    Ssl,
    /// Plain TCP upgraded with `STARTTLS` before login.
    StartTls,
    /// Plain TCP.
    None,
}

impl Encryption {
    /// Default port for this transport.
    #[must_use]
    pub fn default_port(self) -> u16 {
        match self {
            Encryption::Ssl => 993,
            Encryption::StartTls | Encryption::None => 143,
        }
    }
}

impl FromStr for Encryption {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ssl" | "imaps" => Ok(Encryption::Ssl),
            // `tls` follows the mailbox-string convention, where it means STARTTLS
            "tls" | "starttls" => Ok(Encryption::StartTls),
            "none" | "notls" | "" => Ok(Encryption::None),
            other => Err(Error::InvalidConfig {
                message: format!("unsupported encryption '{other}'"),
            }),
        }
    }
}

/// Login credentials for a backend.
///
/// The password is stored as a [`SecretString`] and never shows up in
/// `Debug` output.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: SecretString,
}

impl Credentials {
    /// Creates credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// The login name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The password, for handing to the login command only.
    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// One mailbox server searches can be run against.
#[derive(Debug, Clone)]
pub struct MailBackend {
    name: String,
    host: String,
    port: u16,
    protocol: Protocol,
    encryption: Encryption,
    credentials: Credentials,
    mailbox: String,
    /// Lower values are tried first.
    pub priority: i32,
    /// Disabled backends are never contacted.
    pub enabled: bool,
}

impl MailBackend {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> MailBackendBuilder {
        MailBackendBuilder::default()
    }

    /// Backend name, used in results and logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Server hostname.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Server port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wire protocol.
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Transport security.
    #[must_use]
    pub fn encryption(&self) -> Encryption {
        self.encryption
    }

    /// Login credentials.
    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Mailbox to select.
    #[must_use]
    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    /// `host:port` address.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Builder for [`MailBackend`].
#[derive(Debug, Default)]
pub struct MailBackendBuilder {
    name: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    protocol: Option<Protocol>,
    encryption: Option<Encryption>,
    username: Option<String>,
    password: Option<String>,
    mailbox: Option<String>,
    priority: Option<i32>,
    enabled: Option<bool>,
}

impl MailBackendBuilder {
    /// Sets the backend name (required).
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the server hostname (required).
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the port (default: 993 for SSL, 143 for STARTTLS and plain).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the protocol.
    #[must_use]
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Sets the transport security (default: SSL).
    #[must_use]
    pub fn encryption(mut self, encryption: Encryption) -> Self {
        self.encryption = Some(encryption);
        self
    }

    /// Sets the login name (required).
    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the password (required).
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the mailbox to select (default: `INBOX`).
    #[must_use]
    pub fn mailbox(mut self, mailbox: impl Into<String>) -> Self {
        self.mailbox = Some(mailbox.into());
        self
    }

    /// Sets the priority (default: 0).
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Enables or disables the backend (default: enabled).
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Builds the backend.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a required field is missing or blank.
    pub fn build(self) -> Result<MailBackend> {
        let required = |value: Option<String>, field: &str| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::InvalidConfig {
                    message: format!("backend {field} is required"),
                })
        };

        let name = required(self.name, "name")?;
        let host = required(self.host, "host")?;
        let username = required(self.username, "username")?;
        let password = self.password.ok_or_else(|| Error::InvalidConfig {
            message: format!("backend '{name}' has no password"),
        })?;

        let encryption = self.encryption.unwrap_or_default();
        let mailbox = self
            .mailbox
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_MAILBOX.to_string());

        Ok(MailBackend {
            name,
            host,
            port: self.port.unwrap_or_else(|| encryption.default_port()),
            protocol: self.protocol.unwrap_or_default(),
            encryption,
            credentials: Credentials::new(username, password),
            mailbox,
            priority: self.priority.unwrap_or(0),
            enabled: self.enabled.unwrap_or(true),
        })
    }
}

/// In-memory backend list.
#[derive(Debug, Default)]
pub struct StaticBackends {
    backends: RwLock<Vec<MailBackend>>,
}

impl StaticBackends {
    /// Creates a provider holding `backends`.
    #[must_use]
    pub fn new(backends: Vec<MailBackend>) -> Self {
        Self {
            backends: RwLock::new(backends),
        }
    }

    /// Adds a backend, replacing any backend with the same name.
    pub async fn upsert(&self, backend: MailBackend) {
        let mut backends = self.backends.write().await;
        match backends.iter_mut().find(|b| b.name == backend.name) {
            Some(existing) => *existing = backend,
            None => backends.push(backend),
        }
    }

    /// Removes a backend by name.
    pub async fn remove(&self, name: &str) -> Option<MailBackend> {
        let mut backends = self.backends.write().await;
        let index = backends.iter().position(|b| b.name == name)?;
        Some(backends.remove(index))
    }

    /// Enables or disables a backend. Returns `false` if it does not exist.
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut backends = self.backends.write().await;
        match backends.iter_mut().find(|b| b.name == name) {
            Some(backend) => {
                backend.enabled = enabled;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl BackendProvider for StaticBackends {
    async fn backends(&self) -> Result<Vec<MailBackend>> {
        Ok(self.backends.read().await.clone())
    }
}

/// Read-through view of the configured backends in search order.
#[derive(Clone)]
pub struct BackendRegistry {
    provider: Arc<dyn BackendProvider>,
}

impl BackendRegistry {
    /// Creates a registry over `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn BackendProvider>) -> Self {
        Self { provider }
    }

    /// Enabled backends sorted by ascending priority.
    ///
    /// The sort is stable, so backends with equal priority keep the order the
    /// provider returned them in.
    ///
    /// # Errors
    ///
    /// Propagates provider failures.
    pub async fn enabled_sorted(&self) -> Result<Vec<MailBackend>> {
        let mut backends: Vec<_> = self
            .provider
            .backends()
            .await?
            .into_iter()
            .filter(|b| b.enabled)
            .collect();
        backends.sort_by_key(|b| b.priority);
        Ok(backends)
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry").finish_non_exhaustive()
    }
}
