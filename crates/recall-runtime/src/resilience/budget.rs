//! Failure budget and usage accounting for a run.
//!
//! The failure budget is the run's circuit breaker: once more rules have
//! failed than the cap allows, the dispatcher stops submitting work.

use serde::{Deserialize, Serialize};

use crate::providers::TokenUsage;

/// Counts validation failures against a cap.
///
/// Owned by the dispatcher's coordinating task; never shared.
#[derive(Debug, Clone)]
pub struct FailureBudget {
    max_failures: usize,
    failures: usize,
}

impl FailureBudget {
    /// Budget that tolerates `max_failures` failures.
    pub fn new(max_failures: usize) -> Self {
        Self {
            max_failures,
            failures: 0,
        }
    }

    /// Record one failure. Returns true once the cap is exceeded.
    pub fn record_failure(&mut self) -> bool {
        self.failures += 1;
        self.is_exhausted()
    }

    /// Whether failures exceed the cap.
    pub fn is_exhausted(&self) -> bool {
        self.failures > self.max_failures
    }

    /// Failures recorded so far.
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Failures still tolerated before the run stops.
    pub fn remaining(&self) -> usize {
        self.max_failures.saturating_sub(self.failures)
    }

    /// The configured cap.
    pub fn max_failures(&self) -> usize {
        self.max_failures
    }
}

/// Accumulated token usage for a run.
///
/// Only completions the dispatcher observed are counted; aborted calls may
/// still have been billed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    /// Total tokens used
    pub total_tokens: u64,

    /// Prompt/input tokens
    pub prompt_tokens: u64,

    /// Completion/output tokens
    pub completion_tokens: u64,

    /// Completions observed
    pub llm_calls: u64,

    /// Estimated cost in USD
    pub estimated_cost: f64,
}

impl LlmUsage {
    /// Add one completion's usage.
    pub fn add(&mut self, usage: &TokenUsage, model: &str) {
        self.prompt_tokens += u64::from(usage.prompt_tokens);
        self.completion_tokens += u64::from(usage.completion_tokens);
        self.total_tokens += u64::from(usage.total());
        self.llm_calls += 1;
        self.estimated_cost += Self::estimate_cost(usage, model);
    }

    /// Fold another run's usage into this one.
    pub fn merge(&mut self, other: &LlmUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.llm_calls += other.llm_calls;
        self.estimated_cost += other.estimated_cost;
    }

    fn estimate_cost(usage: &TokenUsage, model: &str) -> f64 {
        // USD per million tokens
        let (input_rate, output_rate) = match model {
            m if m.contains("gemini-1.5-pro") => (1.25, 5.0),
            m if m.contains("gemini-1.5-flash") => (0.075, 0.3),
            m if m.contains("sonnet") => (3.0, 15.0),
            m if m.contains("opus") => (5.0, 25.0),
            m if m.contains("haiku") => (1.0, 5.0),
            _ => (0.0, 0.0),
        };

        let input_cost = (usage.prompt_tokens as f64 / 1_000_000.0) * input_rate;
        let output_cost = (usage.completion_tokens as f64 / 1_000_000.0) * output_rate;
        input_cost + output_cost
    }
}
