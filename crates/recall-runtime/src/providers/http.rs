//! HTTP plumbing shared by the REST providers.

use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;

use super::ProviderError;

/// Error envelope used by both Gemini and Anthropic: `{"error": {"message": ..}}`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Map a transport failure, keeping client-side timeouts transient.
pub(crate) fn send_error(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout)
    } else {
        ProviderError::HttpError(err.to_string())
    }
}

/// Pass successful responses through and turn the rest into errors.
///
/// `auth_statuses` lists the codes the API uses for a rejected key.
pub(crate) async fn check_status(
    response: Response,
    auth_statuses: &[StatusCode],
) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(ProviderError::RateLimited { retry_after });
    }

    if auth_statuses.contains(&status) {
        return Err(ProviderError::AuthError);
    }

    // Some gateways answer with plain text; keep it as the message.
    let text = response
        .text()
        .await
        .map_err(|e| ProviderError::HttpError(e.to_string()))?;
    let message = serde_json::from_str::<ErrorEnvelope>(&text)
        .map(|envelope| envelope.error.message)
        .unwrap_or(text);

    Err(ProviderError::ApiError {
        status: status.as_u16(),
        message,
    })
}

/// Decode a JSON body.
pub(crate) async fn read_json<T>(response: Response) -> Result<T, ProviderError>
where
    T: serde::de::DeserializeOwned,
{
    response
        .json()
        .await
        .map_err(|e| ProviderError::ParseError(e.to_string()))
}

/// Reject a `base_url` that is not an http(s) URL.
pub(crate) fn validate_base_url(config: &JsonValue) -> Result<(), ProviderError> {
    match config["base_url"].as_str() {
        Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => Err(
            ProviderError::NotConfigured("base_url must start with http:// or https://".to_string()),
        ),
        _ => Ok(()),
    }
}

/// `base_url` from config, or `default`, without a trailing slash.
pub(crate) fn base_url(config: &JsonValue, default: &str) -> String {
    config["base_url"]
        .as_str()
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_base_url() {
        assert!(validate_base_url(&serde_json::json!({})).is_ok());
        assert!(validate_base_url(&serde_json::json!({ "base_url": "https://x.test" })).is_ok());
        assert!(validate_base_url(&serde_json::json!({ "base_url": "x.test" })).is_err());
    }

    #[test]
    fn test_base_url_trims_slash() {
        let config = serde_json::json!({ "base_url": "https://x.test/v1/" });
        assert_eq!(base_url(&config, "https://default"), "https://x.test/v1");
        assert_eq!(base_url(&serde_json::json!({}), "https://default"), "https://default");
    }
}
