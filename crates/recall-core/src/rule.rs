//! Rule model and the plain-text rule file format.
//!
//! A rule file holds one `key:value` pair per line. Surrounding whitespace is
//! trimmed from the line and from both halves of the pair; blank lines are
//! skipped.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Separator between key and expected value.
pub const RULE_SEPARATOR: char = ':';

/// Errors raised while loading rules.
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Failed to read rule file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Malformed rule on line {line}: '{content}' (expected key:value)")]
    Malformed { line: usize, content: String },

    #[error("Invalid result pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// A key and the value the model is expected to answer with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rule {
    key: String,
    value: String,
}

impl Rule {
    /// Create a rule, trimming both halves.
    pub fn new(key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        Self {
            key: key.as_ref().trim().to_string(),
            value: value.as_ref().trim().to_string(),
        }
    }

    /// The lookup key placed at the end of the query.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The value a correct answer must reproduce.
    pub fn value(&self) -> &str {
        &self.value
    }

    fn parse_line(line: &str, line_no: usize) -> Result<Self, RuleError> {
        let malformed = || RuleError::Malformed {
            line: line_no,
            content: line.to_string(),
        };

        let mut parts = line.split(RULE_SEPARATOR);
        let (key, value) = match (parts.next(), parts.next(), parts.next()) {
            (Some(key), Some(value), None) => (key.trim(), value.trim()),
            _ => return Err(malformed()),
        };

        if key.is_empty() {
            return Err(malformed());
        }

        Ok(Self::new(key, value))
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.key, RULE_SEPARATOR, self.value)
    }
}

impl FromStr for Rule {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_line(s.trim(), 1)
    }
}

impl TryFrom<String> for Rule {
    type Error = RuleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rule> for String {
    fn from(rule: Rule) -> Self {
        rule.to_string()
    }
}

/// Parse rules from rule-file text.
///
/// Line numbers in errors are 1-based and count blank lines, so they point
/// at the offending line in the file.
pub fn parse_rules(text: &str) -> Result<Vec<Rule>, RuleError> {
    text.lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty())
        .map(|(line_no, line)| Rule::parse_line(line, line_no))
        .collect()
}

/// Load rules from a file on disk.
pub fn load_rules(path: impl AsRef<Path>) -> Result<Vec<Rule>, RuleError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let rules = parse_rules(&contents)?;
    tracing::info!(path = %path.display(), count = rules.len(), "Loaded rules");
    Ok(rules)
}

/// Render rules back to rule-file text, one per line.
pub fn format_rules(rules: &[Rule]) -> String {
    rules.iter().map(|r| format!("{}\n", r)).collect()
}

/// Shuffle rules in place with a fixed seed.
///
/// The same seed always yields the same order, so repeated runs query the
/// model in a reproducible sequence.
pub fn shuffle_rules(rules: &mut [Rule], seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    rules.shuffle(&mut rng);
}
