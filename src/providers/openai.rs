// OpenAI-compatible chat completions provider
//
// Works for OpenAI and anything exposing the same /v1/chat/completions
// shape (Azure OpenAI behind a gateway, Ollama, LiteLLM, vLLM).

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::types::{ChatMessage, ChatRequest, ChatResponse, Usage};
use super::ChatProvider;
use crate::retry::{with_retry, RetryPolicy};

const REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Clone)]
pub struct OpenAiChatProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
    default_temperature: f32,
    retry: RetryPolicy,
}

impl OpenAiChatProvider {
    pub fn new(api_key: String, base_url: String, default_model: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_model,
            default_temperature: 0.2,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.default_temperature = temperature;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn to_openai_request<'a>(&'a self, request: &'a ChatRequest) -> OpenAiRequest<'a> {
        let model = if request.model.is_empty() {
            &self.default_model
        } else {
            &request.model
        };

        OpenAiRequest {
            model,
            messages: &request.messages,
            temperature: request.temperature.unwrap_or(self.default_temperature),
        }
    }

    async fn complete_once(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.to_openai_request(request);

        tracing::debug!(model = %body.model, messages = body.messages.len(), "Sending chat completion");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .context("Failed to send request to chat completions API")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "Chat completions API request failed\n\nStatus: {}\nBody: {}",
                status,
                error_body
            );
        }

        let parsed: OpenAiResponse = response
            .json()
            .await
            .context("Failed to parse chat completions response")?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        let usage = parsed
            .usage
            .map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(ChatResponse {
            text,
            usage,
            model: parsed.model.unwrap_or_else(|| body.model.to_string()),
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiChatProvider {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        with_retry(self.retry, "chat completion", || self.complete_once(request)).await
    }

    fn name(&self) -> &str {
        "openai"
    }
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}
