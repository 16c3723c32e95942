//! Anthropic API execution provider.
//!
//! Makes direct HTTP calls to the Anthropic Messages API.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AnthropicProviderConfig, ExecutionOutcome, ExecutionRequest, LogLevel, TokenUsage,
};
use crate::domain::ports::{ExecutionProvider, RunCallbacks};

/// Registry name of this provider.
pub const PROVIDER_NAME: &str = "anthropic-api";

/// Configuration for the Anthropic API provider.
#[derive(Debug, Clone)]
pub struct AnthropicApiConfig {
    /// API key (will be read from ANTHROPIC_API_KEY env if not set).
    pub api_key: Option<String>,
    /// API base URL.
    pub base_url: String,
    /// Default model to use.
    pub default_model: String,
    /// API version header.
    pub api_version: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Max tokens to generate when a request sets none.
    pub max_tokens: u32,
}

impl Default for AnthropicApiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.anthropic.com".to_string(),
            default_model: "claude-sonnet-4-5-20250929".to_string(),
            api_version: "2023-06-01".to_string(),
            timeout_secs: 300,
            max_tokens: 4096,
        }
    }
}

impl AnthropicApiConfig {
    /// Settings from the engine config; the key falls back to `ANTHROPIC_API_KEY`.
    pub fn from_settings(settings: &AnthropicProviderConfig, max_tokens: u32) -> Self {
        let defaults = Self::default();
        Self {
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.clone().unwrap_or(defaults.base_url),
            default_model: settings.model.clone(),
            timeout_secs: settings.timeout_secs,
            max_tokens,
            ..defaults
        }
    }

    /// Get API key from config or environment.
    pub fn get_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .filter(|k| !k.is_empty())
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Point at another endpoint (tests, proxies).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

/// Message in a Messages API request.
#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

/// Request to the Anthropic Messages API.
#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<Message<'a>>,
}

/// Content block in a response. Only text blocks are used.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

/// Statuses worth retrying: rate limited, overloaded, or server-side errors.
fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.as_u16() == 529
        || status.is_server_error()
}

/// Anthropic Messages API provider.
pub struct AnthropicApiProvider {
    config: AnthropicApiConfig,
    client: Client,
}

impl AnthropicApiProvider {
    /// Build the HTTP client.
    pub fn new(config: AnthropicApiConfig) -> DomainResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DomainError::ConfigError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Provider with default settings.
    pub fn with_defaults() -> DomainResult<Self> {
        Self::new(AnthropicApiConfig::default())
    }

    fn describe_error(status: StatusCode, body: &str) -> String {
        match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(envelope) => format!(
                "API error {status} ({}): {}",
                envelope.error.error_type, envelope.error.message
            ),
            Err(_) => format!("API error {status}: {body}"),
        }
    }
}

#[async_trait]
impl ExecutionProvider for AnthropicApiProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn is_available(&self) -> DomainResult<bool> {
        Ok(self.config.get_api_key().is_some())
    }

    async fn execute(
        &self,
        request: ExecutionRequest,
        callbacks: &dyn RunCallbacks,
    ) -> DomainResult<ExecutionOutcome> {
        let api_key = self
            .config
            .get_api_key()
            .ok_or_else(|| DomainError::ConfigError("ANTHROPIC_API_KEY not set".to_string()))?;
        let step = request.step_key.as_deref();
        let started = Instant::now();

        let body = MessagesRequest {
            model: &self.config.default_model,
            max_tokens: request.max_tokens.unwrap_or(self.config.max_tokens),
            system: Some(request.system_prompt.as_str()).filter(|s| !s.is_empty()),
            messages: vec![Message {
                role: "user",
                content: &request.user_prompt,
            }],
        };

        callbacks
            .on_log(LogLevel::Debug, &format!("Calling {}", self.config.default_model), step)
            .await;

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.base_url.trim_end_matches('/')))
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-api-key", &api_key)
            .header("anthropic-version", &self.config.api_version)
            .json(&body)
            .send()
            .await
            .map_err(|e| DomainError::ProviderUnavailable(format!("API request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DomainError::ProviderUnavailable(format!("Failed to read response: {e}")))?;
        let elapsed = started.elapsed().as_millis() as u64;

        if !status.is_success() {
            let message = Self::describe_error(status, &text);
            if is_transient_status(status) {
                return Err(DomainError::ProviderUnavailable(message));
            }
            callbacks.on_log(LogLevel::Error, &message, step).await;
            return Ok(ExecutionOutcome::failed(message, elapsed));
        }

        let parsed: MessagesResponse = serde_json::from_str(&text)
            .map_err(|e| DomainError::ExecutionFailed(format!("Failed to parse response: {e}")))?;

        let output = parsed
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        let usage = TokenUsage::new(parsed.usage.input_tokens, parsed.usage.output_tokens);

        if parsed.stop_reason.as_deref() == Some("max_tokens") {
            callbacks
                .on_log(LogLevel::Warn, "Output was truncated at the token limit", step)
                .await;
        }
        callbacks.on_progress(1.0, Some("generation complete")).await;

        Ok(ExecutionOutcome::succeeded(output, Some(usage), elapsed))
    }
}
