//! Credential handling for model providers.
//!
//! API keys are wrapped in [`ApiCredential`] as soon as they are read, so
//! they never show up in `Debug`/`Display` output or in log lines. The raw
//! value is only reachable through [`ApiCredential::expose`], which should be
//! called where the key is attached to a request and nowhere else.

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ProviderError;

/// Where a credential was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Provider JSON config
    Config,
    /// Environment variable
    Environment,
    /// Passed in by the caller
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Config => write!(f, "config"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// An API key that redacts itself.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    /// Wrap `value`.
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    /// Read the credential from `env_var`.
    pub fn from_env(env_var: &str, name: &'static str) -> Result<Self, ProviderError> {
        std::env::var(env_var)
            .map(|v| Self::new(v, CredentialSource::Environment, name))
            .map_err(|_| {
                ProviderError::NotConfigured(format!(
                    "{} not set: configure '{}' environment variable",
                    name, env_var
                ))
            })
    }

    /// Read `config_key` from provider config, falling back to `env_var`.
    pub fn from_config_or_env(
        config: &JsonValue,
        config_key: &str,
        env_var: &str,
        name: &'static str,
    ) -> Result<Self, ProviderError> {
        if let Some(value) = config[config_key].as_str() {
            return Ok(Self::new(value, CredentialSource::Config, name));
        }

        if let Ok(value) = std::env::var(env_var) {
            return Ok(Self::new(value, CredentialSource::Environment, name));
        }

        Err(ProviderError::NotConfigured(format!(
            "{} required: set '{}' in config or {} environment variable",
            name, config_key, env_var
        )))
    }

    /// Whether a credential could be loaded, without loading it.
    pub fn is_available(config: &JsonValue, config_key: &str, env_var: &str) -> bool {
        config[config_key].as_str().is_some() || std::env::var(env_var).is_ok()
    }

    /// The raw value. Use only when building the request.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    /// Whether the value is empty.
    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    /// Where the value came from.
    pub fn source(&self) -> CredentialSource {
        self.source
    }

    /// Human-readable label, e.g. "Gemini API key".
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.name, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_redacted() {
        let secret = "AIza-super-secret-key-12345";
        let cred = ApiCredential::new(secret, CredentialSource::Config, "Gemini API key");

        let debug = format!("{:?}", cred);
        let display = format!("{}", cred);
        assert!(!debug.contains(secret));
        assert!(!display.contains(secret));
        assert!(debug.contains("[REDACTED]"));
        assert!(display.contains("Gemini API key"));
        assert!(display.contains("config"));
        assert_eq!(cred.expose(), secret);
    }

    #[test]
    fn test_from_config_or_env_prefers_config() {
        let config = serde_json::json!({ "api_key": "config-key" });

        std::env::set_var("RECALL_TEST_KEY_PRIORITY", "env-key");
        let cred = ApiCredential::from_config_or_env(
            &config,
            "api_key",
            "RECALL_TEST_KEY_PRIORITY",
            "Test key",
        )
        .unwrap();
        std::env::remove_var("RECALL_TEST_KEY_PRIORITY");

        assert_eq!(cred.expose(), "config-key");
        assert_eq!(cred.source(), CredentialSource::Config);
    }

    #[test]
    fn test_from_config_or_env_falls_back_to_env() {
        std::env::set_var("RECALL_TEST_KEY_FALLBACK", "env-key");
        let cred = ApiCredential::from_config_or_env(
            &serde_json::json!({}),
            "api_key",
            "RECALL_TEST_KEY_FALLBACK",
            "Test key",
        )
        .unwrap();
        std::env::remove_var("RECALL_TEST_KEY_FALLBACK");

        assert_eq!(cred.expose(), "env-key");
        assert_eq!(cred.source(), CredentialSource::Environment);
    }

    #[test]
    fn test_missing_credential_names_both_sources() {
        let err = ApiCredential::from_config_or_env(
            &serde_json::json!({}),
            "api_key",
            "RECALL_NONEXISTENT_VAR_12345",
            "Test key",
        )
        .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("Test key"));
        assert!(msg.contains("api_key"));
        assert!(msg.contains("RECALL_NONEXISTENT_VAR_12345"));
    }

    #[test]
    fn test_is_available() {
        assert!(ApiCredential::is_available(
            &serde_json::json!({ "api_key": "value" }),
            "api_key",
            "RECALL_NONEXISTENT"
        ));
        assert!(!ApiCredential::is_available(
            &serde_json::json!({}),
            "api_key",
            "RECALL_NONEXISTENT"
        ));
    }
}
