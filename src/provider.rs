//! External collaborators the engine reads from.
//!
//! The engine never owns configuration. Settings, platform subjects, mail
//! backends and requester entitlements are read through these traits on every
//! search, so changes made by the surrounding application show up on the next
//! request. In-memory implementations live next to the types they serve
//! ([`StaticSettings`], [`PlatformRegistry`](crate::platforms::PlatformRegistry),
//! [`StaticBackends`](crate::backend::StaticBackends),
//! [`StaticEntitlements`]).

use crate::backend::MailBackend;
use crate::error::Result;
use crate::request::RequesterId;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Flat `name → value` settings map.
pub type Settings = HashMap<String, String>;

/// Source of global tunables.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    /// Returns a snapshot of the current settings.
    async fn settings(&self) -> Result<Settings>;
}

/// Source of platform → subject mappings.
#[async_trait]
pub trait PlatformProvider: Send + Sync {
    /// Returns the configured subjects for `platform` in declared order.
    ///
    /// Unknown or disabled platforms yield an empty list.
    async fn subjects(&self, platform: &str) -> Result<Vec<String>>;
}

/// Source of mail backend definitions.
#[async_trait]
pub trait BackendProvider: Send + Sync {
    /// Returns every configured backend, enabled or not, in any order.
    async fn backends(&self) -> Result<Vec<MailBackend>>;
}

/// Decides which emails and platforms a requester may search.
#[async_trait]
pub trait EntitlementProvider: Send + Sync {
    /// Returns `true` if `requester` may search `email` on `platform`.
    async fn is_entitled(&self, requester: &RequesterId, email: &str, platform: &str)
        -> Result<bool>;
}

/// In-memory settings.
#[derive(Debug, Default)]
pub struct StaticSettings {
    values: RwLock<Settings>,
}

impl StaticSettings {
    /// Creates a provider holding `values`.
    #[must_use]
    pub fn new(values: Settings) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }

    /// Sets one value, replacing any previous one.
    pub async fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.values.write().await.insert(name.into(), value.into());
    }

    /// Removes one value so its default applies again.
    pub async fn unset(&self, name: &str) -> Option<String> {
        self.values.write().await.remove(name)
    }
}

#[async_trait]
impl SettingsProvider for StaticSettings {
    async fn settings(&self) -> Result<Settings> {
        Ok(self.values.read().await.clone())
    }
}

#[derive(Debug, Default, Clone)]
struct Grants {
    emails: HashSet<String>,
    platforms: HashSet<String>,
}

/// In-memory entitlements.
///
/// A requester may search an email/platform pair only if both were granted.
/// Emails and platform names compare case-insensitively.
#[derive(Debug, Default)]
pub struct StaticEntitlements {
    grants: RwLock<HashMap<RequesterId, Grants>>,
}

impl StaticEntitlements {
    /// Creates an empty provider that denies everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows `requester` to search `email`.
    pub async fn grant_email(&self, requester: RequesterId, email: &str) {
        self.grants
            .write()
            .await
            .entry(requester)
            .or_default()
            .emails
            .insert(email.trim().to_lowercase());
    }

    /// Allows `requester` to search `platform`.
    pub async fn grant_platform(&self, requester: RequesterId, platform: &str) {
        self.grants
            .write()
            .await
            .entry(requester)
            .or_default()
            .platforms
            .insert(platform.trim().to_lowercase());
    }

    /// Removes every grant of `requester`.
    pub async fn revoke_all(&self, requester: &RequesterId) {
        self.grants.write().await.remove(requester);
    }
}

#[async_trait]
impl EntitlementProvider for StaticEntitlements {
    async fn is_entitled(
        &self,
        requester: &RequesterId,
        email: &str,
        platform: &str,
    ) -> Result<bool> {
        let grants = self.grants.read().await;
        Ok(grants.get(requester).is_some_and(|g| {
            g.emails.contains(&email.trim().to_lowercase())
                && g.platforms.contains(&platform.trim().to_lowercase())
        }))
    }
}
