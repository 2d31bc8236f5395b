//! Prompt assembly for dictionary-recall queries.
//!
//! Every query in a round shares the same context (the full dictionary of
//! rules) and differs only in the key appended at the end, so the context is
//! rendered once and reused.

use serde::{Deserialize, Serialize};

use crate::rule::Rule;

const INSTRUCTION: &str = "Given a dictionary of comma separated key->value pairs followed by a \
key, respond with the corresponding value and nothing else.\n";

/// Number of rules shown at each end of the context preview.
const PREVIEW_RULES: usize = 4;

/// A query sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// User turn
    pub user: String,

    /// Optional system instruction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

impl Query {
    /// A query with only a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            user: content.into(),
            system: None,
        }
    }

    /// Attach a system instruction.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Combined length of system and user text, in bytes.
    pub fn len(&self) -> usize {
        self.user.len() + self.system.as_ref().map_or(0, |s| s.len())
    }

    /// Whether both turns are empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Join rules as `k1:v1,k2:v2,...`.
pub fn concat_rules<'a>(rules: impl IntoIterator<Item = &'a Rule>) -> String {
    rules
        .into_iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Builds dictionary-recall queries.
///
/// The dictionary holds the selected rules repeated `rule_copies` times,
/// followed by the extra rules (typically rules the model failed in an
/// earlier round).
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    context: String,
    rule_count: usize,
}

impl PromptTemplate {
    /// Render the shared context.
    pub fn new(selected: &[Rule], extra: &[Rule], rule_copies: usize) -> Self {
        let copies = rule_copies.max(1);
        let dictionary: Vec<&Rule> = std::iter::repeat(selected)
            .take(copies)
            .flatten()
            .chain(extra.iter())
            .collect();

        let context = format!(
            "{}Given the dictionary {{{}}}, what is the value for ",
            INSTRUCTION,
            concat_rules(dictionary.iter().copied())
        );

        tracing::debug!(
            preview = %Self::preview(selected, extra),
            rules_in_prompt = dictionary.len(),
            "Prepared prompt"
        );

        Self {
            context,
            rule_count: dictionary.len(),
        }
    }

    /// Template over `selected` alone, one copy.
    pub fn from_rules(selected: &[Rule]) -> Self {
        Self::new(selected, &[], 1)
    }

    /// Rendered context shared by every query.
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Total rules in the dictionary, copies and extras included.
    pub fn rule_count(&self) -> usize {
        self.rule_count
    }

    /// Query asking for the value of `rule`'s key.
    pub fn build(&self, rule: &Rule) -> Query {
        Query::user(format!("{}{}", self.context, rule.key()))
    }

    fn preview(selected: &[Rule], extra: &[Rule]) -> String {
        let head = &selected[..selected.len().min(PREVIEW_RULES)];
        let tail = &extra[extra.len().saturating_sub(PREVIEW_RULES)..];
        format!("{}..{}", concat_rules(head), concat_rules(tail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(spec: &[(&str, &str)]) -> Vec<Rule> {
        spec.iter().map(|(k, v)| Rule::new(k, v)).collect()
    }

    #[test]
    fn test_concat_rules() {
        let list = rules(&[("a", "1"), ("b", "2")]);
        assert_eq!(concat_rules(&list), "a:1,b:2");
        assert_eq!(concat_rules(&Vec::<Rule>::new()), "");
    }

    #[test]
    fn test_build_appends_key() {
        let list = rules(&[("a", "1"), ("b", "2")]);
        let template = PromptTemplate::from_rules(&list);
        let query = template.build(&list[1]);

        assert!(query.system.is_none());
        assert!(query.user.starts_with("Given a dictionary of comma separated"));
        assert!(query.user.ends_with("Given the dictionary {a:1,b:2}, what is the value for b"));
    }

    #[test]
    fn test_copies_and_extra_rules() {
        let selected = rules(&[("a", "1"), ("b", "2")]);
        let extra = rules(&[("b", "2")]);
        let template = PromptTemplate::new(&selected, &extra, 2);

        assert_eq!(template.rule_count(), 5);
        assert!(template.context().contains("{a:1,b:2,a:1,b:2,b:2}"));
    }

    #[test]
    fn test_zero_copies_treated_as_one() {
        let selected = rules(&[("a", "1")]);
        let template = PromptTemplate::new(&selected, &[], 0);
        assert_eq!(template.rule_count(), 1);
    }

    #[test]
    fn test_preview_uses_both_ends() {
        let selected = rules(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4"), ("e", "5")]);
        let extra = rules(&[("x", "9")]);
        assert_eq!(PromptTemplate::preview(&selected, &extra), "a:1,b:2,c:3,d:4..x:9");
        assert_eq!(PromptTemplate::preview(&[], &[]), "..");
    }

    #[test]
    fn test_query_len() {
        let query = Query::user("abc").with_system("de");
        assert_eq!(query.len(), 5);
        assert!(!query.is_empty());
    }
}
