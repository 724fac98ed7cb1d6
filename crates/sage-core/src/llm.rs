//! Chat-completion collaborator.
//!
//! Every prompt the workflow issues goes through [`ChatModel`]. The live client
//! speaks the OpenAI-compatible `chat/completions` protocol (Groq by default);
//! [`StubChat`] answers deterministically for offline runs and tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::{SageError, Service};
use crate::security::SecretValue;

/// What a chat request is for. Used for metrics, tracing and by the stub model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Personas,
    Question,
    SearchQuery,
    Answer,
    Section,
    Introduction,
    Conclusion,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Personas => "personas",
            Purpose::Question => "question",
            Purpose::SearchQuery => "search_query",
            Purpose::Answer => "answer",
            Purpose::Section => "section",
            Purpose::Introduction => "introduction",
            Purpose::Conclusion => "conclusion",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub purpose: Purpose,
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    pub fn new(purpose: Purpose) -> Self {
        Self {
            purpose,
            messages: Vec::new(),
        }
    }

    pub fn system(mut self, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage::system(content));
        self
    }

    pub fn user(mut self, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage::user(content));
        self
    }

    pub fn assistant(mut self, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage::assistant(content));
        self
    }

    fn last_user(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|msg| msg.role == ChatRole::User)
            .map(|msg| msg.content.as_str())
            .unwrap_or_default()
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &ChatRequest) -> Result<String, SageError>;
}

pub type DynChatModel = Arc<dyn ChatModel>;

/// Client for any OpenAI-compatible `chat/completions` endpoint.
pub struct OpenAiCompatibleChat {
    client: reqwest::Client,
    endpoint: String,
    api_key: SecretValue,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiCompatibleChat {
    pub fn new(config: &LlmConfig, api_key: SecretValue) -> Result<Self, SageError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| {
                SageError::InvalidConfiguration(format!("failed to build HTTP client: {err}"))
            })?;

        Ok(Self {
            client,
            endpoint: completions_endpoint(&config.base_url),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

fn completions_endpoint(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    if trimmed.ends_with("/chat/completions") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/chat/completions")
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatibleChat {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, SageError> {
        let body = CompletionRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        };

        debug!(
            model = %self.model,
            purpose = request.purpose.as_str(),
            messages = request.messages.len(),
            "invoking chat completion"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|err| SageError::upstream(Service::Chat, err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SageError::http_status(Service::Chat, status.as_u16(), &text));
        }

        let payload: CompletionResponse = response
            .json()
            .await
            .map_err(|err| SageError::malformed(Service::Chat, err.to_string()))?;

        completion_text(payload)
    }
}

fn completion_text(payload: CompletionResponse) -> Result<String, SageError> {
    let choice = payload
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| SageError::malformed(Service::Chat, "response missing choices[0]"))?;

    choice
        .message
        .content
        .map(|text| text.trim().to_string())
        .ok_or_else(|| SageError::malformed(Service::Chat, "choices[0] has no content"))
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

/// Deterministic chat model for offline runs and tests.
#[derive(Default)]
pub struct StubChat {
    closing_after: Option<usize>,
    calls: AtomicUsize,
}

impl StubChat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit a closing remark instead of a question once `turns` questions were asked.
    pub fn with_closing_after(mut self, turns: usize) -> Self {
        self.closing_after = Some(turns);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for StubChat {
    fn name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, SageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let reply = match request.purpose {
            Purpose::Personas => r#"```json
{"analysts": [
  {"name": "Dr. Amara Okafor", "role": "Research Scientist", "affiliation": "Institute for Applied Studies", "description": "Evidence quality and open questions"},
  {"name": "Lena Fischer", "role": "Industry Strategist", "affiliation": "Fischer Advisory", "description": "Market adoption and economics"},
  {"name": "Rahul Mehta", "role": "Policy Analyst", "affiliation": "Civic Futures Lab", "description": "Regulation and public impact"}
]}
```"#
                .to_string(),
            Purpose::Question => {
                let asked = request
                    .messages
                    .iter()
                    .filter(|msg| msg.role == ChatRole::Assistant)
                    .count();
                match self.closing_after {
                    Some(limit) if asked >= limit => {
                        "Thank you so much for your help!".to_string()
                    }
                    _ => format!(
                        "Question {}: which recent developments matter most from my perspective?",
                        asked + 1
                    ),
                }
            }
            Purpose::SearchQuery => request
                .last_user()
                .trim()
                .trim_end_matches('?')
                .chars()
                .take(120)
                .collect(),
            Purpose::Answer => format!(
                "According to the collected sources: {}",
                truncate(first_line(request.last_user()), 160)
            ),
            Purpose::Section => format!(
                "Key takeaways from the interview. {}",
                truncate(first_line(request.last_user()), 160)
            ),
            Purpose::Introduction => {
                "This report brings together three expert perspectives on the topic.".to_string()
            }
            Purpose::Conclusion => {
                "Taken together, the interviews point to steady progress with open risks."
                    .to_string()
            }
        };

        Ok(reply)
    }
}

fn first_line(text: &str) -> &str {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
}
