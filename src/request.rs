//! Search requests and their validation.

use crate::error::{Error, Result};
use email_address::EmailAddress;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identity of whoever asked for a search (web user id, chat user id, ...).
///
/// The engine trusts the caller to have authenticated it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequesterId(String);

impl RequesterId {
    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RequesterId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RequesterId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<i64> for RequesterId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One incoming query: who asks, for which mailbox address, on which platform.
///
/// Fields are kept as received; [`SearchRequest::validate`] produces the
/// checked form the engine works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    requester_id: RequesterId,
    target_email: String,
    platform: String,
}

impl SearchRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(
        requester_id: impl Into<RequesterId>,
        target_email: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            requester_id: requester_id.into(),
            target_email: target_email.into(),
            platform: platform.into(),
        }
    }

    /// The requester.
    #[must_use]
    pub fn requester_id(&self) -> &RequesterId {
        &self.requester_id
    }

    /// The target email as received.
    #[must_use]
    pub fn target_email(&self) -> &str {
        &self.target_email
    }

    /// The platform as received.
    #[must_use]
    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Checks the target address syntax and that the platform is not blank.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEmailFormat`] or [`Error::InvalidPlatform`].
    pub fn validate(&self) -> Result<ValidatedRequest> {
        let email = self.target_email.trim();
        // Bare addresses only, no "Name <addr>" forms
        let options = email_address::Options::default().without_display_text();
        let target_email = EmailAddress::parse_with_options(email, options).map_err(|_| {
            Error::InvalidEmailFormat {
                email: self.target_email.clone(),
            }
        })?;

        let platform = self.platform.trim();
        if platform.is_empty() || platform.chars().any(char::is_control) {
            return Err(Error::InvalidPlatform {
                platform: self.platform.clone(),
            });
        }

        Ok(ValidatedRequest {
            requester_id: self.requester_id.clone(),
            target_email,
            platform: platform.to_string(),
        })
    }
}

/// A request whose address and platform passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    requester_id: RequesterId,
    target_email: EmailAddress,
    platform: String,
}

impl ValidatedRequest {
    /// The requester.
    #[must_use]
    pub fn requester_id(&self) -> &RequesterId {
        &self.requester_id
    }

    /// The validated target address.
    #[must_use]
    pub fn target_email(&self) -> &str {
        self.target_email.as_str()
    }

    /// The trimmed platform identifier.
    #[must_use]
    pub fn platform(&self) -> &str {
        &self.platform
    }
}
