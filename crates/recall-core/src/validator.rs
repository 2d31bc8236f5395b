//! Response validation.
//!
//! Decides whether a raw model response reproduces a rule's value. The
//! response is normalized first (control token stripped, echoed key removed),
//! then compared exactly. If that fails and a result pattern is configured,
//! the first pattern match is compared instead.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::rule::{Rule, RuleError};

/// Formatting artifact some models emit around their answer.
pub const CONTROL_TOKEN: &str = "<ctrl100>";

/// Normalized model output paired with the verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    /// Model output after normalization
    pub normalized: String,

    /// Whether the output reproduces the expected value
    pub passed: bool,
}

impl ValidationOutcome {
    fn new(normalized: String, passed: bool) -> Self {
        Self { normalized, passed }
    }
}

/// Checks model responses against rules.
///
/// Stateless apart from the optional extraction pattern, so one instance can
/// be shared by every job in a run.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    pattern: Option<Regex>,
}

impl Validator {
    /// Exact-match validator with no pattern fallback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validator that falls back to `pattern` when the exact match fails.
    pub fn with_pattern(pattern: Regex) -> Self {
        Self {
            pattern: Some(pattern),
        }
    }

    /// Compile `pattern` and build a validator from it.
    pub fn from_pattern_str(pattern: &str) -> Result<Self, RuleError> {
        Ok(Self::with_pattern(Regex::new(pattern)?))
    }

    /// The configured extraction pattern, if any.
    pub fn pattern(&self) -> Option<&Regex> {
        self.pattern.as_ref()
    }

    /// Validate a raw response against a rule.
    pub fn validate(&self, rule: &Rule, raw: &str) -> ValidationOutcome {
        let normalized = normalize(raw);

        if normalized == rule.value() {
            return ValidationOutcome::new(normalized, true);
        }

        let passed = match &self.pattern {
            Some(pattern) => find_all(pattern, &normalized)
                .first()
                .is_some_and(|m| *m == rule.value()),
            None => false,
        };

        ValidationOutcome::new(normalized, passed)
    }
}

/// Strip the control token and any echoed `key:` prefix.
///
/// When the text contains colons, the segment between the first and second
/// colon is kept.
pub fn normalize(raw: &str) -> String {
    let stripped = raw.replace(CONTROL_TOKEN, "");
    let stripped = stripped.trim();

    match stripped.split(':').nth(1) {
        Some(segment) => segment.trim().to_string(),
        None => stripped.to_string(),
    }
}

/// Every match of `pattern` in `text`, in order.
///
/// Patterns with a capture group yield the first group; otherwise the whole
/// match is returned.
fn find_all<'t>(pattern: &Regex, text: &'t str) -> Vec<&'t str> {
    if pattern.captures_len() > 1 {
        pattern
            .captures_iter(text)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect()
    } else {
        pattern.find_iter(text).map(|m| m.as_str()).collect()
    }
}
