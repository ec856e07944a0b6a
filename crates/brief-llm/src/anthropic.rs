use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::instrument;

use brief_core::errors::GatewayError;
use brief_core::gateway::TextGateway;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
const MAX_TOKENS: u32 = 2048;

/// Credential environment variable. Checked eagerly at construction so a
/// missing key fails fast instead of surfacing as a confusing network
/// failure mid-synthesis.
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Non-streaming Anthropic Messages API client. One prompt in, one text
/// response out; resilience (retries, backoff) is the caller's concern.
pub struct AnthropicGateway {
    client: Client,
    api_key: SecretString,
    model: String,
}

impl AnthropicGateway {
    pub fn new(api_key: impl Into<String>, model: Option<&str>) -> Result<Self, GatewayError> {
        let api_key: String = api_key.into();
        if api_key.trim().is_empty() {
            return Err(GatewayError::MissingCredential(API_KEY_ENV.to_string()));
        }

        Ok(Self {
            client: Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .map_err(|e| GatewayError::NetworkError(e.to_string()))?,
            api_key: SecretString::from(api_key),
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
        })
    }

    /// Build a gateway from `ANTHROPIC_API_KEY`, failing fast when the
    /// credential is absent or empty.
    pub fn from_env() -> Result<Self, GatewayError> {
        let key = std::env::var(API_KEY_ENV)
            .map_err(|_| GatewayError::MissingCredential(API_KEY_ENV.to_string()))?;
        let model = std::env::var("BRIEF_MODEL").ok();
        Self::new(key, model.as_deref())
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[async_trait]
impl TextGateway for AnthropicGateway {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, prompt), fields(model = %self.model, prompt_len = prompt.len()))]
    async fn invoke(&self, prompt: &str) -> Result<String, GatewayError> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let resp = self
            .client
            .post(API_URL)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .header("accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(status, body));
        }

        let parsed: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

        let text: String = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        if text.trim().is_empty() {
            return Err(GatewayError::MalformedResponse(
                "response contained no text content".to_string(),
            ));
        }

        Ok(text)
    }
}
