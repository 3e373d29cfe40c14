//! Verification code extraction from message text.
//!
//! A [`CodeExtractor`] holds an ordered list of [`Matcher`] rules. The first
//! rule whose first match is a plausible code (4 to 8 ASCII digits) wins, so a
//! labeled code beats a bare digit run that appears earlier in the text.
//!
//! # Example
//!
//! ```
//! use otp_search::extractor::CodeExtractor;
//!
//! let extractor = CodeExtractor::standard();
//! assert_eq!(
//!     extractor.extract("Your code: 004912, ref 2023").as_deref(),
//!     Some("004912")
//! );
//! assert_eq!(extractor.extract("Nothing to see here"), None);
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::fmt;
use tracing::trace;

/// Shortest accepted code.
pub const MIN_CODE_LEN: usize = 4;
/// Longest accepted code.
pub const MAX_CODE_LEN: usize = 8;

// `[0-9]` rather than `\d`: the latter matches every Unicode digit.
static LABELED_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:your\s+code|verification(?:\s+code)?|c[oó]digo|code|pin)\b\s*[:#]?\s*([0-9]+)",
    )
    .expect("valid labeled code regex")
});

/// Trait for matching and extracting content from message text.
///
/// Implement this trait to add custom extraction rules to a [`CodeExtractor`].
pub trait Matcher: Send + Sync {
    /// Attempts to find and extract matching content from the text.
    ///
    /// Returns `Some(matched_value)` if found, `None` otherwise.
    /// Uses `Cow<str>` to avoid allocations when the match can be borrowed
    /// directly from the input text.
    fn find_match<'a>(&self, text: &'a str) -> Option<Cow<'a, str>>;

    /// Returns a human-readable description of what this matcher looks for.
    ///
    /// Used in logging.
    fn description(&self) -> &str;
}

/// Regex-based matcher that extracts the first capture group of the first match.
///
/// # Example
///
/// ```
/// use otp_search::extractor::{RegexMatcher, Matcher};
///
/// let matcher = RegexMatcher::new(r"token=([0-9]+)").unwrap();
/// assert_eq!(matcher.find_match("token=4242").as_deref(), Some("4242"));
/// ```
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    regex: Regex,
    description: String,
}

impl RegexMatcher {
    /// Creates a new regex matcher.
    ///
    /// The regex should contain at least one capture group.
    ///
    /// # Errors
    ///
    /// Returns an error if the regex pattern is invalid.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(pattern)?;
        Ok(Self {
            description: format!("regex pattern: {pattern}"),
            regex,
        })
    }

    /// Creates a new regex matcher with a custom description.
    ///
    /// # Errors
    ///
    /// Returns an error if the regex pattern is invalid.
    pub fn with_description(
        pattern: &str,
        description: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        let regex = Regex::new(pattern)?;
        Ok(Self {
            description: description.into(),
            regex,
        })
    }

    fn from_regex(regex: Regex, description: impl Into<String>) -> Self {
        Self {
            regex,
            description: description.into(),
        }
    }
}

impl Matcher for RegexMatcher {
    fn find_match<'a>(&self, text: &'a str) -> Option<Cow<'a, str>> {
        self.regex
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| Cow::Borrowed(m.as_str()))
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Matches a code introduced by a label such as `code:`, `verification:`,
/// `pin:` or `your code:` (case-insensitive).
#[derive(Debug, Clone)]
pub struct LabeledCodeMatcher {
    inner: RegexMatcher,
}

impl LabeledCodeMatcher {
    /// Creates the labeled-code matcher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RegexMatcher::from_regex(LABELED_CODE.clone(), "labeled code"),
        }
    }
}

impl Default for LabeledCodeMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher for LabeledCodeMatcher {
    fn find_match<'a>(&self, text: &'a str) -> Option<Cow<'a, str>> {
        self.inner.find_match(text)
    }

    fn description(&self) -> &str {
        self.inner.description()
    }
}

/// Matches a standalone run of exactly N digits.
///
/// # Example
///
/// ```
/// use otp_search::extractor::{DigitRunMatcher, Matcher};
///
/// let six = DigitRunMatcher::new(6);
/// assert_eq!(six.find_match("Your code is 123456.").as_deref(), Some("123456"));
/// assert_eq!(six.find_match("Order 1234567"), None);
/// ```
#[derive(Debug, Clone)]
pub struct DigitRunMatcher {
    inner: RegexMatcher,
}

impl DigitRunMatcher {
    /// Creates a matcher for runs of exactly `digits` digits.
    ///
    /// # Panics
    ///
    /// Panics if `digits` is 0.
    #[must_use]
    pub fn new(digits: usize) -> Self {
        assert!(digits > 0, "digits must be > 0");
        // \b on both sides so longer runs are not matched partially
        let pattern = format!(r"\b([0-9]{{{digits}}})\b");
        Self {
            inner: RegexMatcher::with_description(&pattern, format!("bare {digits}-digit code"))
                .expect("valid regex"),
        }
    }
}

impl Matcher for DigitRunMatcher {
    fn find_match<'a>(&self, text: &'a str) -> Option<Cow<'a, str>> {
        self.inner.find_match(text)
    }

    fn description(&self) -> &str {
        self.inner.description()
    }
}

/// Returns `true` if `candidate` is 4 to 8 ASCII digits.
#[must_use]
pub fn is_valid_code(candidate: &str) -> bool {
    (MIN_CODE_LEN..=MAX_CODE_LEN).contains(&candidate.len())
        && candidate.bytes().all(|b| b.is_ascii_digit())
}

/// Ordered set of extraction rules.
pub struct CodeExtractor {
    rules: Vec<Box<dyn Matcher>>,
}

impl CodeExtractor {
    /// The default rule order: labeled code, then bare 6, 4 and 8 digit runs.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            rules: vec![
                Box::new(LabeledCodeMatcher::new()),
                Box::new(DigitRunMatcher::new(6)),
                Box::new(DigitRunMatcher::new(4)),
                Box::new(DigitRunMatcher::new(8)),
            ],
        }
    }

    /// Creates an extractor with a custom rule order.
    #[must_use]
    pub fn with_rules(rules: Vec<Box<dyn Matcher>>) -> Self {
        Self { rules }
    }

    /// Appends a lowest-priority rule.
    #[must_use]
    pub fn push_rule(mut self, rule: impl Matcher + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    /// Extracts a code from `text`.
    ///
    /// Rules are tried in order. A rule's first match is accepted only if it
    /// is a valid code; otherwise the next rule is tried. `None` is not an
    /// error, most messages simply carry no code.
    #[must_use]
    pub fn extract(&self, text: &str) -> Option<String> {
        for rule in &self.rules {
            let Some(found) = rule.find_match(text) else {
                continue;
            };
            if is_valid_code(&found) {
                trace!(rule = %rule.description(), code_len = found.len(), "Code matched");
                return Some(found.into_owned());
            }
            trace!(
                rule = %rule.description(),
                match_len = found.len(),
                "Match rejected, trying next rule"
            );
        }
        None
    }
}

impl Default for CodeExtractor {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for CodeExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeExtractor")
            .field(
                "rules",
                &self.rules.iter().map(|r| r.description()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
