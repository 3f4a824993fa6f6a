//! Anthropic Messages API provider.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{ModelProvider, ModelRequest, ModelResponse, ProviderError, ProviderErrorKind};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
/// Environment variable overriding the API base URL.
pub const BASE_URL_ENV: &str = "ANTHROPIC_BASE_URL";

/// Connection settings for [`AnthropicProvider`].
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl AnthropicConfig {
    /// Read the key and optional base URL from the environment.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var(API_KEY_ENV)
            .map_err(|_| ProviderError::fatal(format!("{API_KEY_ENV} is not set")))?;
        let base_url =
            std::env::var(BASE_URL_ENV).unwrap_or_else(|_| ANTHROPIC_API_URL.to_string());
        Ok(Self {
            api_key,
            base_url,
            timeout_secs: 120,
        })
    }
}

/// Anthropic provider.
pub struct AnthropicProvider {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("leakbench/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::fatal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, ProviderError> {
        Self::new(AnthropicConfig::from_env()?)
    }

    fn headers(&self) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Ok(key) = self.config.api_key.parse() {
            headers.insert("x-api-key", key);
        }
        if let Ok(version) = ANTHROPIC_VERSION.parse() {
            headers.insert("anthropic-version", version);
        }
        headers
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

/// Classify an HTTP failure into a retry decision.
pub(crate) fn classify_status(status: u16, error_type: Option<&str>) -> ProviderErrorKind {
    match (status, error_type) {
        (_, Some("overloaded_error" | "rate_limit_error" | "timeout_error")) => {
            ProviderErrorKind::Transient
        }
        (408 | 429 | 500 | 502 | 503 | 504 | 529, _) => ProviderErrorKind::Transient,
        _ => ProviderErrorKind::Fatal,
    }
}

fn parse_error(status: u16, body: &str) -> ProviderError {
    match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(resp) => ProviderError::new(
            classify_status(status, Some(resp.error.error_type.as_str())),
            resp.error.message,
        )
        .with_status(status),
        Err(_) => ProviderError::new(classify_status(status, None), body.to_string())
            .with_status(status),
    }
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    let kind = if err.is_timeout() || err.is_connect() {
        ProviderErrorKind::Transient
    } else {
        ProviderErrorKind::Fatal
    };
    ProviderError::new(kind, err.to_string())
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(&self, request: &ModelRequest<'_>) -> Result<ModelResponse, ProviderError> {
        let url = format!("{}/messages", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(parse_error(status.as_u16(), &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| ProviderError::fatal(format!("malformed response body: {e}")))
    }
}
