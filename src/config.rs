//! Configuration for the search engine.
//!
//! Configuration can be built programmatically with [`SearchConfigBuilder`] or
//! parsed from the flat `name → value` settings map an external settings
//! provider hands out:
//!
//! ```
//! use otp_search::config::{keys, SearchConfig};
//! use std::collections::HashMap;
//! use std::time::Duration;
//!
//! let mut settings = HashMap::new();
//! settings.insert(keys::QUERY_TIME_LIMIT_MINUTES.to_string(), "15".to_string());
//! settings.insert(keys::EARLY_SEARCH_STOP.to_string(), "0".to_string());
//!
//! let config = SearchConfig::from_settings(&settings).expect("valid settings");
//! assert_eq!(config.freshness.query_window, Duration::from_secs(15 * 60));
//! assert!(!config.early_stop.stop_on_first_code);
//! ```

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Upper bound for any single timeout or budget.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 3600);

/// Setting names understood by [`SearchConfig::from_settings`],
/// [`RateLimitConfig::from_settings`] and [`CacheConfig::from_settings`].
pub mod keys {
    /// Master switch for searching (`1`/`0`).
    pub const SEARCH_ENABLED: &str = "SEARCH_ENABLED";
    /// Return immediately on the first extracted code.
    pub const EARLY_SEARCH_STOP: &str = "EARLY_SEARCH_STOP";
    /// Move on to the next backend when messages matched but held no code.
    pub const CONTINUE_ON_EXTRACTION_MISS: &str = "CONTINUE_ON_EXTRACTION_MISS";
    /// Freshness window in minutes.
    pub const QUERY_TIME_LIMIT_MINUTES: &str = "EMAIL_QUERY_TIME_LIMIT_MINUTES";
    /// Extra hours added to the backend-side SINCE window for clock skew.
    pub const CLOCK_SKEW_HOURS: &str = "TIMEZONE_DEBUG_HOURS";
    /// Connect timeout in seconds.
    pub const CONNECT_TIMEOUT: &str = "IMAP_CONNECTION_TIMEOUT";
    /// Auth/select/search/fetch timeout in seconds.
    pub const OPERATION_TIMEOUT: &str = "IMAP_OPERATION_TIMEOUT";
    /// Budget for one whole backend attempt in seconds.
    pub const BACKEND_TIMEOUT: &str = "BACKEND_TIMEOUT";
    /// Budget for one whole search in seconds.
    pub const SEARCH_BUDGET: &str = "SEARCH_BUDGET_SECONDS";
    /// Newest messages fetched per subject.
    pub const MAX_CANDIDATES_PER_SUBJECT: &str = "MAX_CANDIDATES_PER_SUBJECT";
    /// Rate limit window in seconds.
    pub const RATE_LIMIT_WINDOW: &str = "RATE_LIMIT_WINDOW";
    /// Requests admitted per window.
    pub const RATE_LIMIT_MAX_REQUESTS: &str = "MAX_REQUESTS_PER_MINUTE";
    /// Result cache lifetime in seconds.
    pub const RESULT_CACHE_TTL: &str = "RESULT_CACHE_TTL_SECONDS";
}

/// Configuration for one search, re-read for every search.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Whether searching is enabled at all.
    pub enabled: bool,
    /// Early-stop behaviour.
    pub early_stop: EarlyStopPolicy,
    /// Freshness windows.
    pub freshness: FreshnessConfig,
    /// Per-operation IMAP timeouts.
    pub timeouts: TimeoutConfig,
    /// Per-backend and overall budgets.
    pub budget: BudgetConfig,
    /// Maximum number of messages fetched per backend+subject pair.
    pub max_candidates_per_subject: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            early_stop: EarlyStopPolicy::default(),
            freshness: FreshnessConfig::default(),
            timeouts: TimeoutConfig::default(),
            budget: BudgetConfig::default(),
            max_candidates_per_subject: 10,
        }
    }
}

/// The two independent early-stop switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EarlyStopPolicy {
    /// Return as soon as the first code is extracted. When `false` the engine
    /// still returns the first code, but only after finishing the remaining
    /// subject searches on the same backend for diagnostics.
    pub stop_on_first_code: bool,
    /// When a backend returned matching messages without any extractable code,
    /// try the next backend (`true`) or end the search there (`false`).
    pub continue_on_extraction_miss: bool,
}

impl Default for EarlyStopPolicy {
    fn default() -> Self {
        Self {
            stop_on_first_code: true,
            continue_on_extraction_miss: true,
        }
    }
}

/// Freshness windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessConfig {
    /// A message must have been received within this window.
    pub query_window: Duration,
    /// Added to the backend-side SINCE window only.
    pub clock_skew: Duration,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            query_window: Duration::from_secs(30 * 60),
            clock_skew: Duration::from_secs(48 * 3600),
        }
    }
}

impl FreshnessConfig {
    /// Date used for the IMAP `SINCE` criterion: `now - (window + skew)`.
    ///
    /// Saturates at [`NaiveDate::MIN`] when the window reaches past the
    /// representable range.
    #[must_use]
    pub fn since_date(&self, now: DateTime<Utc>) -> NaiveDate {
        self.query_window
            .checked_add(self.clock_skew)
            .and_then(|wide| subtract(now, wide))
            .map_or(NaiveDate::MIN, |since| since.date_naive())
    }

    /// Oldest acceptable `received_at`: `now - window`.
    #[must_use]
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        subtract(now, self.query_window).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Checks that both windows can be applied to `now`.
    fn validate(&self, now: DateTime<Utc>) -> Result<()> {
        let fits = self
            .query_window
            .checked_add(self.clock_skew)
            .and_then(|wide| subtract(now, wide))
            .is_some();
        if fits {
            Ok(())
        } else {
            Err(Error::InvalidConfig {
                message: "query window plus clock skew is too large".into(),
            })
        }
    }

    /// Application-side freshness check.
    #[must_use]
    pub fn is_fresh(&self, received_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        received_at >= self.cutoff(now)
    }
}

/// Timeout configuration for IMAP operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Timeout for establishing TCP/TLS connection.
    pub connect: Duration,
    /// Timeout for IMAP authentication.
    pub auth: Duration,
    /// Timeout for selecting a mailbox.
    pub select: Duration,
    /// Timeout for one UID search.
    pub search: Duration,
    /// Timeout for fetching one message.
    pub fetch: Duration,
    /// Timeout for logout operation.
    pub logout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            auth: Duration::from_secs(10),
            select: Duration::from_secs(10),
            search: Duration::from_secs(10),
            fetch: Duration::from_secs(10),
            logout: Duration::from_secs(5),
        }
    }
}

/// Budgets bounding the total latency of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetConfig {
    /// Budget for one backend attempt (open, searches, fetches, close).
    pub per_backend: Duration,
    /// Budget for the whole search; remaining backends are abandoned after it.
    pub overall: Duration,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            per_backend: Duration::from_secs(25),
            overall: Duration::from_secs(30),
        }
    }
}

impl SearchConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> SearchConfigBuilder {
        SearchConfigBuilder::default()
    }

    /// Parses a configuration from a flat settings map.
    ///
    /// Missing keys fall back to defaults; unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a value cannot be parsed or the
    /// resulting configuration is invalid.
    pub fn from_settings(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = SearchConfig::default();
        let mut builder = SearchConfig::builder()
            .enabled(parse_bool(settings, keys::SEARCH_ENABLED, true)?)
            .stop_on_first_code(parse_bool(settings, keys::EARLY_SEARCH_STOP, true)?)
            .continue_on_extraction_miss(parse_bool(
                settings,
                keys::CONTINUE_ON_EXTRACTION_MISS,
                true,
            )?)
            .query_window(parse_scaled_secs(
                settings,
                keys::QUERY_TIME_LIMIT_MINUTES,
                30,
                60,
            )?)
            .clock_skew(parse_scaled_secs(settings, keys::CLOCK_SKEW_HOURS, 48, 3600)?)
            .connect_timeout(parse_secs(
                settings,
                keys::CONNECT_TIMEOUT,
                defaults.timeouts.connect,
            )?)
            .backend_timeout(parse_secs(
                settings,
                keys::BACKEND_TIMEOUT,
                defaults.budget.per_backend,
            )?)
            .search_budget(parse_secs(
                settings,
                keys::SEARCH_BUDGET,
                defaults.budget.overall,
            )?)
            .max_candidates_per_subject(usize::try_from(parse_u64(
                settings,
                keys::MAX_CANDIDATES_PER_SUBJECT,
                defaults.max_candidates_per_subject as u64,
            )?)
            .map_err(|_| Error::InvalidConfig {
                message: format!("{} is too large", keys::MAX_CANDIDATES_PER_SUBJECT),
            })?);

        if settings.contains_key(keys::OPERATION_TIMEOUT) {
            builder = builder.operation_timeout(parse_secs(
                settings,
                keys::OPERATION_TIMEOUT,
                defaults.timeouts.search,
            )?);
        }

        builder.build()
    }
}

/// Builder for [`SearchConfig`].
#[derive(Debug, Default)]
pub struct SearchConfigBuilder {
    enabled: Option<bool>,
    early_stop: Option<EarlyStopPolicy>,
    freshness: Option<FreshnessConfig>,
    timeouts: Option<TimeoutConfig>,
    budget: Option<BudgetConfig>,
    max_candidates_per_subject: Option<usize>,
}

impl SearchConfigBuilder {
    /// Enables or disables searching.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Sets whether the first extracted code ends the search immediately.
    #[must_use]
    pub fn stop_on_first_code(mut self, stop: bool) -> Self {
        self.early_stop
            .get_or_insert_with(EarlyStopPolicy::default)
            .stop_on_first_code = stop;
        self
    }

    /// Sets whether a backend with matches but no code hands over to the next backend.
    #[must_use]
    pub fn continue_on_extraction_miss(mut self, proceed: bool) -> Self {
        self.early_stop
            .get_or_insert_with(EarlyStopPolicy::default)
            .continue_on_extraction_miss = proceed;
        self
    }

    /// Sets the freshness window.
    #[must_use]
    pub fn query_window(mut self, window: Duration) -> Self {
        self.freshness
            .get_or_insert_with(FreshnessConfig::default)
            .query_window = window;
        self
    }

    /// Sets the clock-skew allowance for the backend-side SINCE window.
    #[must_use]
    pub fn clock_skew(mut self, skew: Duration) -> Self {
        self.freshness
            .get_or_insert_with(FreshnessConfig::default)
            .clock_skew = skew;
        self
    }

    /// Sets all IMAP timeouts at once.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts
            .get_or_insert_with(TimeoutConfig::default)
            .connect = timeout;
        self
    }

    /// Sets the auth, select, search and fetch timeouts.
    #[must_use]
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        let timeouts = self.timeouts.get_or_insert_with(TimeoutConfig::default);
        timeouts.auth = timeout;
        timeouts.select = timeout;
        timeouts.search = timeout;
        timeouts.fetch = timeout;
        self
    }

    /// Sets the budget for one backend attempt.
    #[must_use]
    pub fn backend_timeout(mut self, timeout: Duration) -> Self {
        self.budget
            .get_or_insert_with(BudgetConfig::default)
            .per_backend = timeout;
        self
    }

    /// Sets the budget for a whole search.
    #[must_use]
    pub fn search_budget(mut self, budget: Duration) -> Self {
        self.budget.get_or_insert_with(BudgetConfig::default).overall = budget;
        self
    }

    /// Sets how many of the newest messages are fetched per subject.
    #[must_use]
    pub fn max_candidates_per_subject(mut self, max: usize) -> Self {
        self.max_candidates_per_subject = Some(max);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a window, timeout or limit is zero,
    /// a timeout or budget exceeds [`MAX_TIMEOUT`], or the freshness windows
    /// reach past the representable date range.
    pub fn build(self) -> Result<SearchConfig> {
        let defaults = SearchConfig::default();
        let config = SearchConfig {
            enabled: self.enabled.unwrap_or(defaults.enabled),
            early_stop: self.early_stop.unwrap_or_default(),
            freshness: self.freshness.unwrap_or_default(),
            timeouts: self.timeouts.unwrap_or_default(),
            budget: self.budget.unwrap_or_default(),
            max_candidates_per_subject: self
                .max_candidates_per_subject
                .unwrap_or(defaults.max_candidates_per_subject),
        };

        let zero_checks = [
            ("query window", config.freshness.query_window),
            ("connect timeout", config.timeouts.connect),
            ("auth timeout", config.timeouts.auth),
            ("select timeout", config.timeouts.select),
            ("search timeout", config.timeouts.search),
            ("fetch timeout", config.timeouts.fetch),
            ("backend timeout", config.budget.per_backend),
            ("search budget", config.budget.overall),
        ];
        if let Some((name, _)) = zero_checks.iter().find(|(_, d)| d.is_zero()) {
            return Err(Error::InvalidConfig {
                message: format!("{name} must be greater than zero"),
            });
        }
        // Deadlines are computed as `Instant::now() + timeout`
        if let Some((name, _)) = zero_checks[1..].iter().find(|(_, d)| *d > MAX_TIMEOUT) {
            return Err(Error::InvalidConfig {
                message: format!("{name} must not exceed {}s", MAX_TIMEOUT.as_secs()),
            });
        }
        if config.timeouts.logout > MAX_TIMEOUT {
            return Err(Error::InvalidConfig {
                message: format!("logout timeout must not exceed {}s", MAX_TIMEOUT.as_secs()),
            });
        }
        config.freshness.validate(Utc::now())?;

        if config.max_candidates_per_subject == 0 {
            return Err(Error::InvalidConfig {
                message: "max candidates per subject must be greater than zero".into(),
            });
        }

        Ok(config)
    }
}

/// Sliding-window admission settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Window size.
    pub window: Duration,
    /// Requests admitted per window.
    pub max_requests: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_requests: 5,
        }
    }
}

impl RateLimitConfig {
    /// Parses the rate limit from a flat settings map.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] on unparseable or zero values.
    pub fn from_settings(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();
        let window = parse_secs(settings, keys::RATE_LIMIT_WINDOW, defaults.window)?;
        let max_requests = parse_u64(
            settings,
            keys::RATE_LIMIT_MAX_REQUESTS,
            defaults.max_requests as u64,
        )?;

        if window.is_zero() || max_requests == 0 {
            return Err(Error::InvalidConfig {
                message: "rate limit window and request cap must be greater than zero".into(),
            });
        }

        Ok(Self {
            window,
            max_requests: usize::try_from(max_requests).unwrap_or(usize::MAX),
        })
    }
}

/// Result cache settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// How long a stored result stays available for detail lookups.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
        }
    }
}

impl CacheConfig {
    /// Parses the cache settings from a flat settings map.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] on unparseable values.
    pub fn from_settings(settings: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            ttl: parse_secs(settings, keys::RESULT_CACHE_TTL, Self::default().ttl)?,
        })
    }
}

fn lookup<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn parse_bool(settings: &HashMap<String, String>, key: &str, default: bool) -> Result<bool> {
    match lookup(settings, key) {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(Error::InvalidConfig {
                message: format!("{key} must be a boolean, got '{raw}'"),
            }),
        },
    }
}

fn parse_u64(settings: &HashMap<String, String>, key: &str, default: u64) -> Result<u64> {
    match lookup(settings, key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| Error::InvalidConfig {
            message: format!("{key} must be a non-negative integer, got '{raw}'"),
        }),
    }
}

fn parse_secs(
    settings: &HashMap<String, String>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    parse_u64(settings, key, default.as_secs()).map(Duration::from_secs)
}

/// Parses a value given in `unit_secs`-second units.
fn parse_scaled_secs(
    settings: &HashMap<String, String>,
    key: &str,
    default: u64,
    unit_secs: u64,
) -> Result<Duration> {
    parse_u64(settings, key, default)?
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| Error::InvalidConfig {
            message: format!("{key} is too large"),
        })
}

fn subtract(now: DateTime<Utc>, window: Duration) -> Option<DateTime<Utc>> {
    now.checked_sub_signed(chrono::Duration::from_std(window).ok()?)
}
