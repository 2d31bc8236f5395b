//! Google Gemini provider (Generative Language REST API).
//!
//! Requests are single-candidate, temperature 0 by default, with every
//! adjustable harm category set to `BLOCK_NONE` so that safety filtering
//! does not masquerade as a recall failure.

use async_trait::async_trait;
use recall_core::Query;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

use super::{
    factory::ProviderFactory,
    http,
    secrets::{ApiCredential, CredentialSource},
    CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
};

/// Environment variable holding the Gemini API key.
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
];

/// Expand short model names (`pro-001`, `flash-002`, ...) to full Gemini
/// model ids. Anything else is returned unchanged.
pub fn resolve_model_alias(model: &str) -> String {
    match model {
        "pro-001" => "gemini-1.5-pro-001".to_string(),
        "flash-001" => "gemini-1.5-flash-001".to_string(),
        "pro-002" => "gemini-1.5-pro-002".to_string(),
        "flash-002" => "gemini-1.5-flash-002".to_string(),
        other => other.to_string(),
    }
}

/// Gemini provider.
pub struct GeminiProvider {
    credential: ApiCredential,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl GeminiProvider {
    /// Provider using `api_key`.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            credential: ApiCredential::new(api_key, CredentialSource::Programmatic, "Gemini API key"),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Provider using `GEMINI_API_KEY`.
    pub fn from_env() -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_env(GEMINI_API_KEY_ENV, "Gemini API key")?;
        Ok(Self {
            credential,
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        })
    }

    /// Provider from JSON config (`api_key`, `base_url`), falling back to
    /// `GEMINI_API_KEY`.
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_config_or_env(
            config,
            "api_key",
            GEMINI_API_KEY_ENV,
            "Gemini API key",
        )?;

        Ok(Self {
            credential,
            base_url: http::base_url(config, DEFAULT_BASE_URL),
            client: reqwest::Client::new(),
        })
    }

    /// Use a different endpoint.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn build_request(query: &Query, config: &CompletionConfig) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: query.user.clone(),
                }],
            }],
            system_instruction: query.system.as_ref().map(|text| Content {
                role: None,
                parts: vec![Part { text: text.clone() }],
            }),
            generation_config: GenerationConfig {
                max_output_tokens: config.max_tokens,
                candidate_count: 1,
                temperature: config.temperature,
            },
            safety_settings: HARM_CATEGORIES
                .into_iter()
                .map(|category| SafetySetting {
                    category,
                    threshold: "BLOCK_NONE",
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    candidate_count: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

impl GenerateContentResponse {
    fn into_completion(self, requested_model: &str) -> CompletionResponse {
        let (content, stop_reason) = match self.candidates.into_iter().next() {
            Some(candidate) => (
                candidate
                    .content
                    .map(|c| c.parts.into_iter().map(|p| p.text).collect::<String>())
                    .unwrap_or_default(),
                candidate.finish_reason,
            ),
            None => (String::new(), None),
        };

        let usage = self
            .usage_metadata
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
            })
            .unwrap_or_default();

        CompletionResponse {
            content,
            usage,
            model: self
                .model_version
                .unwrap_or_else(|| requested_model.to_string()),
            stop_reason,
        }
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn complete(
        &self,
        query: &Query,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let model = resolve_model_alias(&config.model);
        let request = Self::build_request(query, config);

        let response = self
            .client
            .post(format!("{}/models/{}:generateContent", self.base_url, model))
            .header("x-goog-api-key", self.credential.expose())
            .timeout(config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| http::send_error(e, config.timeout))?;

        let response = http::check_status(
            response,
            &[StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN],
        )
        .await?;
        let body: GenerateContentResponse = http::read_json(response).await?;

        Ok(body.into_completion(&model))
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_empty()
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

/// Factory for [`GeminiProvider`].
///
/// ```json
/// {
///   "api_key": "AIza...",      // optional, falls back to GEMINI_API_KEY
///   "base_url": "https://..."  // optional
/// }
/// ```
pub struct GeminiProviderFactory;

impl ProviderFactory for GeminiProviderFactory {
    fn provider_type(&self) -> &'static str {
        "gemini"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        Ok(Arc::new(GeminiProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if !ApiCredential::is_available(config, "api_key", GEMINI_API_KEY_ENV) {
            return Err(ProviderError::NotConfigured(format!(
                "Gemini API key required: set 'api_key' in config or {} env",
                GEMINI_API_KEY_ENV
            )));
        }

        http::validate_base_url(config)
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({ "model": "pro-001" })
    }

    fn description(&self) -> &'static str {
        "Google Gemini via the Generative Language API"
    }
}
