//! Language-model clients.
//!
//! The pipeline only sees [`LlmClient`]; [`OpenRouterClient`] talks to any
//! OpenAI-compatible chat-completions endpoint (OpenRouter by default).

use crate::errors::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "openai/gpt-4-turbo";

const SYSTEM_PROMPT: &str = "You are an AI assistant that generates shell scripts from user requests. \
Reply with only the script, without any explanation. Do not include 'cd' commands or other \
navigation unless explicitly requested. The script must be executable as-is in the current directory.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub tokens_used: Option<u32>,
}

impl Completion {
    /// Builds a completion whose token count is estimated from its words.
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let estimate = u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX);
        Self {
            text,
            tokens_used: Some(estimate),
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> AppResult<Completion>;

    fn model_name(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    api_url: String,
    model: String,
    max_tokens: u32,
}

impl OpenRouterClient {
    pub fn new(
        api_key: impl Into<String>,
        api_url: impl Into<String>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> AppResult<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AppError::Config(
                "an API key is required; set OPENROUTER_API_KEY or api_key in the config file".to_string(),
            ));
        }
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            api_key,
            api_url: api_url.into(),
            model: model.into(),
            max_tokens: 512,
        })
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn generate(&self, prompt: &str) -> AppResult<Completion> {
        let request = ChatRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![
                Message {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Message {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .header("X-Title", "AI Shell")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(AppError::Llm(format!("authentication rejected ({})", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Llm(format!("API error {}: {}", status, body.trim())));
        }

        let completion: ChatResponse = response.json().await?;
        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        let tokens_used = completion.usage.and_then(|usage| usage.total_tokens);

        tracing::debug!(model = %self.model, tokens = ?tokens_used, "completion received");
        Ok(match tokens_used {
            Some(tokens) => Completion {
                text,
                tokens_used: Some(tokens),
            },
            None => Completion::from_text(text),
        })
    }

    fn model_name(&self) -> Option<String> {
        Some(self.model.clone())
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: Option<u32>,
}
