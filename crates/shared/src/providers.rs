use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::{AiProvider, ApiKey, Config};
use crate::error::{BulletinError, Result};

const MAX_OUTPUT_TOKENS: u32 = 4096;
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// One generation request: system instructions plus the user prompt.
#[derive(Debug, Clone)]
pub struct BulletinRequest {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Rate limits, overload, server errors and network failures. Worth one retry.
    #[error("transient provider error: {0}")]
    Transient(String),
    #[error("{0}")]
    Fatal(String),
}

/// A text-generation backend.
#[async_trait]
pub trait BulletinProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn model(&self) -> &str;

    /// Upper bound on prompt document size, in characters.
    fn max_input_chars(&self) -> usize;

    async fn generate_bulletin(&self, request: &BulletinRequest) -> std::result::Result<String, ProviderError>;
}

/// Build the provider selected in `config`.
pub fn provider_from_config(config: &Config) -> Result<Box<dyn BulletinProvider>> {
    let api_key = config.api_key().cloned().ok_or_else(|| {
        BulletinError::ConfigInvalid(vec![format!(
            "Missing API key for provider '{}'",
            config.ai_provider
        )])
    })?;

    let provider: Box<dyn BulletinProvider> = match config.ai_provider {
        AiProvider::Anthropic => Box::new(AnthropicProvider::new(
            api_key,
            config.anthropic_model.clone(),
            config.anthropic_base_url.clone(),
        )?),
        AiProvider::OpenAi => Box::new(OpenAiProvider::new(
            api_key,
            config.openai_model.clone(),
            config.openai_base_url.clone(),
        )?),
    };
    Ok(provider)
}

fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(180))
        .build()
        .map_err(|e| BulletinError::SynthesisFailed(format!("Failed to create HTTP client: {}", e)))
}

fn send_error(provider: &str, e: reqwest::Error) -> ProviderError {
    ProviderError::Transient(format!("{} request failed: {}", provider, e))
}

fn status_error(provider: &str, status: StatusCode, body: String) -> ProviderError {
    let message = format!("{} API error {}: {}", provider, status, body.trim());
    // 529 is Anthropic's "overloaded".
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() || status.as_u16() == 529 {
        ProviderError::Transient(message)
    } else {
        ProviderError::Fatal(message)
    }
}

// ==================== Anthropic ====================

#[derive(Serialize)]
struct ClaudeRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContent>,
}

#[derive(Deserialize)]
struct ClaudeContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

pub struct AnthropicProvider {
    client: Client,
    api_key: ApiKey,
    model: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: ApiKey, model: String, base_url: String) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_key,
            model,
            base_url,
        })
    }
}

#[async_trait]
impl BulletinProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn max_input_chars(&self) -> usize {
        600_000
    }

    async fn generate_bulletin(&self, request: &BulletinRequest) -> std::result::Result<String, ProviderError> {
        let body = ClaudeRequest {
            model: &self.model,
            max_tokens: MAX_OUTPUT_TOKENS,
            system: &request.system,
            messages: vec![Message {
                role: "user",
                content: &request.user,
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error("Claude", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            return Err(status_error("Claude", status, error_text));
        }

        let claude_response = response
            .json::<ClaudeResponse>()
            .await
            .map_err(|e| ProviderError::Fatal(format!("Failed to parse Claude API response: {}", e)))?;

        let text: Vec<&str> = claude_response
            .content
            .iter()
            .filter(|c| c.kind == "text")
            .map(|c| c.text.as_str())
            .collect();
        let text = text.join("\n");

        if text.trim().is_empty() {
            return Err(ProviderError::Fatal("Claude returned an empty response".to_string()));
        }
        Ok(text)
    }
}

// ==================== OpenAI ====================

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

pub struct OpenAiProvider {
    client: Client,
    api_key: ApiKey,
    model: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: ApiKey, model: String, base_url: String) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_key,
            model,
            base_url,
        })
    }
}

#[async_trait]
impl BulletinProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn max_input_chars(&self) -> usize {
        360_000
    }

    async fn generate_bulletin(&self, request: &BulletinRequest) -> std::result::Result<String, ProviderError> {
        let body = ChatRequest {
            model: &self.model,
            max_tokens: MAX_OUTPUT_TOKENS,
            messages: vec![
                Message {
                    role: "system",
                    content: &request.system,
                },
                Message {
                    role: "user",
                    content: &request.user,
                },
            ],
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error("OpenAI", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            return Err(status_error("OpenAI", status, error_text));
        }

        let chat = response
            .json::<ChatResponse>()
            .await
            .map_err(|e| ProviderError::Fatal(format!("Failed to parse OpenAI API response: {}", e)))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ProviderError::Fatal("OpenAI returned an empty response".to_string()))
    }
}
