//! Provider registry.
//!
//! Backends register a [`ProviderFactory`] under a type name; the CLI looks
//! the name up and hands the factory a JSON config.
//!
//! ```ignore
//! let registry = ProviderRegistry::with_defaults();
//! let provider = registry.create("gemini", &serde_json::json!({ "model": "pro-001" }))?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::{LlmProvider, ProviderError};

/// Creates providers of one type from JSON configuration.
pub trait ProviderFactory: Send + Sync {
    /// Type name, e.g. "gemini".
    fn provider_type(&self) -> &'static str;

    /// Build a provider from `config`.
    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError>;

    /// Check `config` without building anything.
    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError>;

    /// Defaults for optional fields.
    fn default_config(&self) -> JsonValue {
        serde_json::json!({})
    }

    /// One-line description for `--help` style listings.
    fn description(&self) -> &'static str {
        "Model provider"
    }
}

/// Provider factories keyed by type name.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory`, replacing any factory with the same type name.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories
            .insert(factory.provider_type().to_string(), factory);
    }

    /// Build a provider of `provider_type`.
    pub fn create(
        &self,
        provider_type: &str,
        config: &JsonValue,
    ) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let factory = self.factory(provider_type)?;
        factory.validate_config(config)?;
        let provider = factory.create(config)?;
        tracing::debug!(provider = provider_type, "Created provider");
        Ok(provider)
    }

    /// Validate `config` for `provider_type`.
    pub fn validate(&self, provider_type: &str, config: &JsonValue) -> Result<(), ProviderError> {
        self.factory(provider_type)?.validate_config(config)
    }

    /// Registered type names, sorted.
    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    /// Whether `provider_type` is registered.
    pub fn has_provider(&self, provider_type: &str) -> bool {
        self.factories.contains_key(provider_type)
    }

    /// Defaults for `provider_type`.
    pub fn default_config(&self, provider_type: &str) -> Option<JsonValue> {
        self.factories
            .get(provider_type)
            .map(|f| f.default_config())
    }

    /// Registry with every provider compiled into this build.
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "gemini")]
        registry.register(Arc::new(super::GeminiProviderFactory));
        #[cfg(feature = "anthropic")]
        registry.register(Arc::new(super::AnthropicProviderFactory));
        registry
    }

    fn factory(&self, provider_type: &str) -> Result<&Arc<dyn ProviderFactory>, ProviderError> {
        self.factories.get(provider_type).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "Unknown provider type: '{}'. Available: {:?}",
                provider_type,
                self.available_types()
            ))
        })
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.available_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{CompletionConfig, CompletionResponse};
    use async_trait::async_trait;
    use recall_core::Query;

    struct FixedProvider {
        name: String,
    }

    #[async_trait]
    impl LlmProvider for FixedProvider {
        async fn complete(
            &self,
            _query: &Query,
            _config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            Ok(CompletionResponse::text("fixed", "fixed"))
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    struct FixedProviderFactory;

    impl ProviderFactory for FixedProviderFactory {
        fn provider_type(&self) -> &'static str {
            "fixed"
        }

        fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
            let name = config["name"].as_str().unwrap_or("fixed-provider").to_string();
            Ok(Arc::new(FixedProvider { name }))
        }

        fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
            if config["name"].as_str() == Some("") {
                return Err(ProviderError::NotConfigured("name must not be empty".to_string()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_register_and_create() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(FixedProviderFactory));

        assert!(registry.has_provider("fixed"));
        assert!(!registry.has_provider("unknown"));
        assert_eq!(registry.available_types(), vec!["fixed"]);

        let provider = registry
            .create("fixed", &serde_json::json!({ "name": "test-fixed" }))
            .unwrap();
        assert_eq!(provider.name(), "test-fixed");
        assert_eq!(registry.default_config("fixed"), Some(serde_json::json!({})));
    }

    #[test]
    fn test_create_validates_first() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(FixedProviderFactory));

        let result = registry.create("fixed", &serde_json::json!({ "name": "" }));
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));
        assert!(registry.validate("fixed", &serde_json::json!({})).is_ok());
    }

    #[test]
    fn test_unknown_provider() {
        let registry = ProviderRegistry::new();
        match registry.create("unknown", &serde_json::json!({})) {
            Err(ProviderError::NotConfigured(msg)) => {
                assert!(msg.contains("Unknown provider type"));
            }
            _ => panic!("Expected NotConfigured error"),
        }
    }
}
