//! Platform → subject mappings.
//!
//! A platform (a service that sends verification mails) is identified by a
//! short name and maps to the subject substrings its mails carry.
//!
//! # Example
//!
//! ```
//! use otp_search::platforms::{PlatformRegistry, SubjectResolver};
//! use std::sync::Arc;
//!
//! # async fn example() -> otp_search::Result<()> {
//! let registry = Arc::new(PlatformRegistry::new());
//! registry
//!     .register("Netflix", ["Your sign-in code", "Netflix: Your code"])
//!     .await;
//!
//! let resolver = SubjectResolver::new(registry.clone());
//! let subjects = resolver.resolve("netflix").await?;
//! assert_eq!(subjects.len(), 2);
//!
//! registry.set_enabled("netflix", false).await;
//! assert!(resolver.resolve("netflix").await?.is_empty());
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use crate::provider::PlatformProvider;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Ordered, de-duplicated subject substrings of one platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectSet {
    subjects: Vec<String>,
}

impl SubjectSet {
    /// Builds a set from raw entries.
    ///
    /// Entries are trimmed, blank ones dropped and duplicates removed keeping
    /// the first occurrence.
    pub fn new<I, S>(subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let subjects = subjects
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty() && seen.insert(s.clone()))
            .collect();
        Self { subjects }
    }

    /// Iterates subjects in declared order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.subjects.iter().map(String::as_str)
    }

    /// Number of subjects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    /// Returns `true` if there are no subjects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}

#[derive(Debug, Clone)]
struct PlatformEntry {
    subjects: Vec<String>,
    enabled: bool,
}

/// In-memory platform catalogue.
///
/// Platform names are trimmed and matched case-insensitively.
#[derive(Debug, Default)]
pub struct PlatformRegistry {
    platforms: RwLock<HashMap<String, PlatformEntry>>,
}

impl PlatformRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a platform with its subjects, replacing any previous entry.
    ///
    /// The platform starts enabled.
    pub async fn register<I, S>(&self, platform: &str, subjects: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.platforms.write().await.insert(
            normalize(platform),
            PlatformEntry {
                subjects: subjects.into_iter().map(Into::into).collect(),
                enabled: true,
            },
        );
    }

    /// Appends one subject to an existing platform. Returns `false` if the
    /// platform is unknown.
    pub async fn add_subject(&self, platform: &str, subject: impl Into<String>) -> bool {
        match self.platforms.write().await.get_mut(&normalize(platform)) {
            Some(entry) => {
                entry.subjects.push(subject.into());
                true
            }
            None => false,
        }
    }

    /// Removes a platform, returning its subjects.
    pub async fn unregister(&self, platform: &str) -> Option<Vec<String>> {
        self.platforms
            .write()
            .await
            .remove(&normalize(platform))
            .map(|entry| entry.subjects)
    }

    /// Enables or disables a platform without touching its subjects.
    /// Returns `false` if the platform is unknown.
    pub async fn set_enabled(&self, platform: &str, enabled: bool) -> bool {
        match self.platforms.write().await.get_mut(&normalize(platform)) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Returns `true` if the platform is registered (enabled or not).
    pub async fn is_known(&self, platform: &str) -> bool {
        self.platforms
            .read()
            .await
            .contains_key(&normalize(platform))
    }

    /// Names of all enabled platforms, sorted.
    pub async fn enabled_platforms(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .platforms
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.enabled)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Number of registered platforms.
    pub async fn len(&self) -> usize {
        self.platforms.read().await.len()
    }

    /// Returns `true` if nothing is registered.
    pub async fn is_empty(&self) -> bool {
        self.platforms.read().await.is_empty()
    }
}

#[async_trait]
impl PlatformProvider for PlatformRegistry {
    async fn subjects(&self, platform: &str) -> Result<Vec<String>> {
        Ok(self
            .platforms
            .read()
            .await
            .get(&normalize(platform))
            .filter(|entry| entry.enabled)
            .map(|entry| entry.subjects.clone())
            .unwrap_or_default())
    }
}

fn normalize(platform: &str) -> String {
    platform.trim().to_lowercase()
}

/// Read-through resolver from platform name to [`SubjectSet`].
#[derive(Clone)]
pub struct SubjectResolver {
    provider: Arc<dyn PlatformProvider>,
}

impl SubjectResolver {
    /// Creates a resolver over `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn PlatformProvider>) -> Self {
        Self { provider }
    }

    /// Resolves the subjects of `platform`.
    ///
    /// Unknown and disabled platforms resolve to an empty set.
    ///
    /// # Errors
    ///
    /// Propagates provider failures.
    pub async fn resolve(&self, platform: &str) -> Result<SubjectSet> {
        let raw = self.provider.subjects(platform.trim()).await?;
        Ok(SubjectSet::new(raw))
    }
}

impl fmt::Debug for SubjectResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubjectResolver").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_set_normalization() {
        let set = SubjectSet::new(["  Your code ", "", "Sign in", "Your code", "   ", "Sign in"]);
        assert_eq!(set.iter().collect::<Vec<_>>(), ["Your code", "Sign in"]);
        assert_eq!(set.len(), 2);
        assert!(SubjectSet::new(Vec::<String>::new()).is_empty());
    }

    #[tokio::test]
    async fn test_registry_case_insensitive() {
        let registry = PlatformRegistry::new();
        registry.register(" Disney+ ", ["Your one-time passcode"]).await;

        assert!(registry.is_known("DISNEY+").await);
        assert_eq!(
            registry.subjects("disney+").await.unwrap(),
            ["Your one-time passcode"]
        );
    }

    #[tokio::test]
    async fn test_unknown_platform_is_empty() {
        let registry = Arc::new(PlatformRegistry::new());
        let resolver = SubjectResolver::new(registry);
        assert!(resolver.resolve("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disable_keeps_subjects() {
        let registry = Arc::new(PlatformRegistry::new());
        registry.register("max", ["Código de acceso"]).await;
        let resolver = SubjectResolver::new(registry.clone());

        assert!(registry.set_enabled("MAX", false).await);
        assert!(resolver.resolve("max").await.unwrap().is_empty());
        assert!(registry.enabled_platforms().await.is_empty());

        registry.set_enabled("max", true).await;
        assert_eq!(resolver.resolve("max").await.unwrap().len(), 1);
        assert!(!registry.set_enabled("ghost", true).await);
    }

    #[tokio::test]
    async fn test_changes_visible_on_next_resolve() {
        let registry = Arc::new(PlatformRegistry::new());
        let resolver = SubjectResolver::new(registry.clone());
        registry.register("netflix", ["Your sign-in code"]).await;
        assert_eq!(resolver.resolve("netflix").await.unwrap().len(), 1);

        assert!(registry.add_subject("netflix", "Netflix: Your code").await);
        assert_eq!(resolver.resolve("netflix").await.unwrap().len(), 2);

        assert!(registry.unregister("netflix").await.is_some());
        assert!(resolver.resolve("netflix").await.unwrap().is_empty());
        assert!(registry.is_empty().await);
        assert_eq!(registry.len().await, 0);
    }
}
