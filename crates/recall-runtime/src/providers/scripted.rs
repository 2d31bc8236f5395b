//! In-process model with scripted replies.
//!
//! Stands in for the remote service in tests and dry runs. Each script is
//! registered under the text a query ends with (normally the rule key) and
//! lists one step per attempt; the last step repeats. Steps may carry a
//! latency, which under tokio's paused clock makes timeouts deterministic.

use async_trait::async_trait;
use parking_lot::Mutex;
use recall_core::Query;
use std::collections::HashMap;
use std::time::Duration;

use super::{CompletionResponse, Model, ProviderError, TokenUsage};

const SCRIPTED_MODEL: &str = "scripted";

/// What a scripted step answers with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Successful completion with this text
    Text(String),
    /// Provider rate limit (transient), with an optional retry hint
    RateLimited(Option<Duration>),
    /// Authentication failure (fatal)
    AuthError,
}

/// One scripted attempt.
#[derive(Debug, Clone)]
pub struct ScriptedStep {
    reply: Reply,
    latency: Duration,
}

impl ScriptedStep {
    /// Answer with `content`.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            reply: Reply::Text(content.into()),
            latency: Duration::ZERO,
        }
    }

    /// Fail with a rate-limit error.
    pub fn rate_limited() -> Self {
        Self {
            reply: Reply::RateLimited(None),
            latency: Duration::ZERO,
        }
    }

    /// Fail with a rate-limit error that asks for a retry after `delay`.
    pub fn rate_limited_for(delay: Duration) -> Self {
        Self {
            reply: Reply::RateLimited(Some(delay)),
            latency: Duration::ZERO,
        }
    }

    /// Fail with an authentication error.
    pub fn auth_error() -> Self {
        Self {
            reply: Reply::AuthError,
            latency: Duration::ZERO,
        }
    }

    /// Delay the reply by `latency`.
    pub fn after(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[derive(Debug, Default)]
struct CallState {
    calls: HashMap<String, u32>,
    total_calls: u32,
    in_flight: usize,
    peak_in_flight: usize,
}

/// Scripted implementation of [`Model`].
#[derive(Debug, Default)]
pub struct ScriptedModel {
    scripts: HashMap<String, Vec<ScriptedStep>>,
    fallback: Option<ScriptedStep>,
    state: Mutex<CallState>,
}

impl ScriptedModel {
    /// Model with no scripts; every query fails with `NotConfigured`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `content` for queries ending in `key`.
    pub fn respond(self, key: impl Into<String>, content: impl Into<String>) -> Self {
        self.script(key, vec![ScriptedStep::text(content)])
    }

    /// Answer the rule's own value for each rule, i.e. a model that is
    /// always right.
    pub fn answering<'a>(mut self, rules: impl IntoIterator<Item = &'a recall_core::Rule>) -> Self {
        for rule in rules {
            self = self.respond(rule.key(), rule.value());
        }
        self
    }

    /// Per-attempt steps for queries ending in `key`.
    pub fn script(mut self, key: impl Into<String>, steps: Vec<ScriptedStep>) -> Self {
        if !steps.is_empty() {
            self.scripts.insert(key.into(), steps);
        }
        self
    }

    /// Step used when no script matches.
    pub fn fallback(mut self, step: ScriptedStep) -> Self {
        self.fallback = Some(step);
        self
    }

    /// Calls made for `key` so far, including aborted ones.
    pub fn calls(&self, key: &str) -> u32 {
        self.state.lock().calls.get(key).copied().unwrap_or(0)
    }

    /// Calls made across all keys.
    pub fn total_calls(&self) -> u32 {
        self.state.lock().total_calls
    }

    /// Most calls that were in progress at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.state.lock().peak_in_flight
    }

    /// Calls in progress right now.
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    /// Longest registered key that `text` ends with.
    fn match_key(&self, text: &str) -> Option<&str> {
        self.scripts
            .keys()
            .filter(|key| text.ends_with(key.as_str()))
            .max_by_key(|key| key.len())
            .map(|key| key.as_str())
    }
}

/// Decrements the in-flight count when a call finishes or is dropped.
struct InFlight<'a>(&'a Mutex<CallState>);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.lock().in_flight -= 1;
    }
}

#[async_trait]
impl Model for ScriptedModel {
    async fn generate(&self, query: Query) -> Result<CompletionResponse, ProviderError> {
        let key = self.match_key(&query.user);
        let call_key = key.unwrap_or(query.user.as_str()).to_string();

        let attempt = {
            let mut state = self.state.lock();
            let calls = state.calls.entry(call_key).or_insert(0);
            *calls += 1;
            let attempt = *calls;
            state.total_calls += 1;
            state.in_flight += 1;
            state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
            attempt
        };
        let _in_flight = InFlight(&self.state);

        let step = key
            .and_then(|k| self.scripts.get(k))
            .map(|steps| &steps[(attempt as usize - 1).min(steps.len() - 1)])
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| {
                ProviderError::NotConfigured("no scripted reply for query".to_string())
            })?;

        if !step.latency.is_zero() {
            tokio::time::sleep(step.latency).await;
        }

        match step.reply {
            Reply::Text(content) => Ok(CompletionResponse {
                usage: TokenUsage {
                    prompt_tokens: (query.len() / 4) as u32,
                    completion_tokens: (content.len() / 4) as u32,
                },
                content,
                model: SCRIPTED_MODEL.to_string(),
                stop_reason: Some("stop".to_string()),
            }),
            Reply::RateLimited(retry_after) => Err(ProviderError::RateLimited { retry_after }),
            Reply::AuthError => Err(ProviderError::AuthError),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_responds_by_key_suffix() {
        let model = ScriptedModel::new().respond("a", "1").respond("ba", "2");

        let first = model.generate(Query::user("what is the value for a")).await.unwrap();
        let second = model.generate(Query::user("what is the value for ba")).await.unwrap();

        assert_eq!(first.content, "1");
        assert_eq!(second.content, "2");
        assert_eq!(model.calls("a"), 1);
        assert_eq!(model.calls("ba"), 1);
        assert_eq!(model.total_calls(), 2);
    }

    #[tokio::test]
    async fn test_steps_advance_per_attempt_and_last_repeats() {
        let model = ScriptedModel::new().script(
            "k",
            vec![ScriptedStep::rate_limited(), ScriptedStep::text("v")],
        );

        assert!(matches!(
            model.generate(Query::user("k")).await,
            Err(ProviderError::RateLimited { .. })
        ));
        assert_eq!(model.generate(Query::user("k")).await.unwrap().content, "v");
        assert_eq!(model.generate(Query::user("k")).await.unwrap().content, "v");
        assert_eq!(model.calls("k"), 3);
    }

    #[tokio::test]
    async fn test_unscripted_query_uses_fallback() {
        let model = ScriptedModel::new();
        assert!(matches!(
            model.generate(Query::user("x")).await,
            Err(ProviderError::NotConfigured(_))
        ));

        let model = ScriptedModel::new().fallback(ScriptedStep::text("wrong"));
        assert_eq!(model.generate(Query::user("x")).await.unwrap().content, "wrong");
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_and_in_flight_tracking() {
        let model = std::sync::Arc::new(
            ScriptedModel::new().script("slow", vec![ScriptedStep::text("v").after(Duration::from_secs(5))]),
        );

        let handle = {
            let model = model.clone();
            tokio::spawn(async move { model.generate(Query::user("slow")).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(model.in_flight(), 1);

        handle.abort();
        let _ = handle.await;
        assert_eq!(model.in_flight(), 0);
        assert_eq!(model.peak_in_flight(), 1);
    }
}
