//! # recall-core
//!
//! Rules, validation and prompt assembly for key→value recall evaluation.
//!
//! This crate answers one question per rule: did the model reproduce the
//! value associated with a key it was shown in its prompt?
//!
//! ## Key Guarantees
//!
//! 1. **Pure validation**: `Validator::validate` performs no I/O
//! 2. **Immutable rules**: rules are reclassified as passed or failed, never edited
//! 3. **Fail fast on bad input**: malformed rule files are rejected at load time
//!
//! ## Example
//!
//! ```rust,ignore
//! use recall_core::{load_rules, PromptTemplate, Validator};
//!
//! let rules = load_rules("rules21.txt")?;
//! let template = PromptTemplate::from_rules(&rules);
//! let query = template.build(&rules[0]);
//!
//! let outcome = Validator::new().validate(&rules[0], "<ctrl100>nJ");
//! assert!(outcome.passed);
//! ```

pub mod prompt;
pub mod rule;
pub mod validator;

// Re-export main types at crate root
pub use prompt::{concat_rules, PromptTemplate, Query};
pub use rule::{format_rules, load_rules, parse_rules, shuffle_rules, Rule, RuleError};
pub use validator::{normalize, ValidationOutcome, Validator, CONTROL_TOKEN};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules_through_prompt_and_validation() {
        let rules = parse_rules("a:1\nb:2\nc:3\n").unwrap();
        let template = PromptTemplate::from_rules(&rules);
        let validator = Validator::new();

        let responses = ["1", "b: 2", "9"];
        let failed: Vec<&Rule> = rules
            .iter()
            .zip(responses)
            .filter(|(rule, raw)| {
                let query = template.build(rule);
                assert!(query.user.ends_with(rule.key()));
                !validator.validate(rule, raw).passed
            })
            .map(|(rule, _)| rule)
            .collect();

        assert_eq!(failed, vec![&Rule::new("c", "3")]);
    }
}
