//! OpenAI chat-completions transport for the batch judge.
//!
//! Sends the rubric as the system message and the sanitized items as the
//! user message, at temperature 0 with the request's strict response
//! format. The reply body is returned unparsed; validation happens in
//! [`crate::judge::response`].

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::{debug, warn};

use crate::error::{ConfigError, ConfigResult, JudgeError, JudgeResult};
use crate::traits::judge::{JudgeModel, JudgeRequest};

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Value::is_null")]
    response_format: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ChatReplyMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

/// Judge backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAIJudge {
    http_client: reqwest::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
}

impl fmt::Debug for OpenAIJudge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAIJudge")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAIJudge {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            api_key: SecretString::from(api_key.into()),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Create from `OPENAI_API_KEY`, with optional `OPENAI_MODEL` and
    /// `OPENAI_BASE_URL`.
    pub fn from_env() -> ConfigResult<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnv("OPENAI_API_KEY".to_string()))?;
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let judge = Self::new(api_key, model);
        Ok(match std::env::var("OPENAI_BASE_URL") {
            Ok(url) if !url.trim().is_empty() => judge.with_base_url(url.trim()),
            _ => judge,
        })
    }

    /// Set a custom base URL (for Azure, proxies, etc.).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl JudgeModel for OpenAIJudge {
    async fn judge(&self, request: &JudgeRequest) -> JudgeResult<String> {
        let start = std::time::Instant::now();
        let user = request.items_json()?;

        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.rubric,
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: 0.0,
            response_format: &request.response_format,
        };

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "OpenAI request failed");
                JudgeError::transport(e)
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(JudgeError::RateLimited);
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "OpenAI API error");
            return Err(JudgeError::Status {
                status: status.as_u16(),
                body: error_text,
            });
        }

        let chat: ChatResponse = response.json().await.map_err(JudgeError::transport)?;
        let message = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| JudgeError::malformed("no choices in response"))?;

        if let Some(refusal) = message.refusal {
            return Err(JudgeError::malformed(format!("model refused: {}", refusal)));
        }

        debug!(
            model = %self.model,
            items = request.items.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "OpenAI judge call"
        );

        message
            .content
            .ok_or_else(|| JudgeError::malformed("empty message content"))
    }

    fn name(&self) -> &str {
        "openai"
    }
}
