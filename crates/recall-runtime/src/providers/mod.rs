//! Model providers for recall-runtime.
//!
//! The dispatcher talks to the remote service through the single-method
//! [`Model`] capability. Concrete backends implement [`LlmProvider`] and are
//! adapted to it by [`ProviderModel`], which pins the completion settings for
//! a run.
//!
//! ## Security
//!
//! All providers use the [`secrets`] module for credential handling.

use async_trait::async_trait;
use recall_core::Query;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

mod factory;
mod scripted;
pub mod secrets;

#[cfg(feature = "anthropic")]
mod anthropic;

#[cfg(feature = "gemini")]
mod gemini;

#[cfg(any(feature = "anthropic", feature = "gemini"))]
mod http;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use scripted::{Reply, ScriptedModel, ScriptedStep};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicProvider, AnthropicProviderFactory};

#[cfg(feature = "gemini")]
pub use gemini::{resolve_model_alias, GeminiProvider, GeminiProviderFactory};

/// Errors from model providers.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Authentication failed")]
    AuthError,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether resubmitting the same request may succeed.
    ///
    /// The dispatcher treats these like a job timeout.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Timeout(_))
    }

    /// Server-requested wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Settings for a completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Model to use
    pub model: String,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Temperature (0.0 for deterministic)
    pub temperature: f32,

    /// HTTP request timeout
    #[serde(with = "crate::config::duration_str")]
    pub timeout: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-pro-001".to_string(),
            max_tokens: 64,
            temperature: 0.0,
            timeout: Duration::from_secs(60),
        }
    }
}

impl CompletionConfig {
    /// Default settings for `model`.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }
}

/// Response from a completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated text
    pub content: String,

    /// Token usage
    pub usage: TokenUsage,

    /// Model that served the request
    pub model: String,

    /// Stop reason
    pub stop_reason: Option<String>,
}

impl CompletionResponse {
    /// Plain text response with no usage information.
    pub fn text(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: TokenUsage::default(),
            model: model.into(),
            stop_reason: None,
        }
    }
}

/// Token usage from a completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenUsage {
    /// Tokens in the prompt
    pub prompt_tokens: u32,

    /// Tokens in the completion
    pub completion_tokens: u32,
}

impl TokenUsage {
    /// Total tokens used.
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Backend abstraction for remote generation services.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Execute a completion.
    async fn complete(
        &self,
        query: &Query,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Check if provider is usable.
    async fn health_check(&self) -> bool;

    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Estimate tokens for a prompt.
    fn estimate_tokens(&self, text: &str) -> u32 {
        // ~4 chars per token
        (text.len() / 4) as u32
    }
}

/// The call boundary the dispatcher depends on.
///
/// A possibly slow call to a remote generation service. Implementations must
/// be safe to drop mid-flight: the dispatcher aborts calls that exceed the
/// job timeout.
#[async_trait]
pub trait Model: Send + Sync {
    /// Generate a response for `query`.
    async fn generate(&self, query: Query) -> Result<CompletionResponse, ProviderError>;
}

/// Adapts an [`LlmProvider`] to [`Model`] with fixed completion settings.
pub struct ProviderModel {
    provider: Arc<dyn LlmProvider>,
    config: CompletionConfig,
}

impl ProviderModel {
    /// Bind `provider` to `config`.
    pub fn new(provider: Arc<dyn LlmProvider>, config: CompletionConfig) -> Self {
        Self { provider, config }
    }

    /// The wrapped provider.
    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }
}

impl std::fmt::Debug for ProviderModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderModel")
            .field("provider", &self.provider.name())
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl Model for ProviderModel {
    async fn generate(&self, query: Query) -> Result<CompletionResponse, ProviderError> {
        self.provider.complete(&query, &self.config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn complete(
            &self,
            query: &Query,
            config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            Ok(CompletionResponse::text(query.user.clone(), config.model.clone()))
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 50,
        };
        assert_eq!(usage.total(), 150);
    }

    #[test]
    fn test_transient_errors() {
        assert!(ProviderError::RateLimited { retry_after: None }.is_transient());
        assert_eq!(
            ProviderError::RateLimited {
                retry_after: Some(Duration::from_secs(3))
            }
            .retry_after(),
            Some(Duration::from_secs(3))
        );
        assert_eq!(ProviderError::AuthError.retry_after(), None);
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!ProviderError::AuthError.is_transient());
        assert!(!ProviderError::ApiError {
            status: 500,
            message: "boom".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_completion_config_defaults() {
        let config = CompletionConfig::default();
        assert_eq!(config.max_tokens, 64);
        assert_eq!(config.temperature, 0.0);
        assert_eq!(CompletionConfig::new("flash-002").model, "flash-002");
    }

    #[tokio::test]
    async fn test_provider_model_passes_config() {
        let model = ProviderModel::new(Arc::new(EchoProvider), CompletionConfig::new("m1"));
        let response = model.generate(Query::user("hello")).await.unwrap();
        assert_eq!(response.content, "hello");
        assert_eq!(response.model, "m1");
        assert_eq!(model.provider().name(), "echo");
        assert_eq!(model.provider().estimate_tokens("12345678"), 2);
    }
}
