use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{CompletionProvider, ProviderRequest};

/// Groq's OpenAI-compatible API, the default completion backend.
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiProvider {
    endpoint: String,
    model: String,
    client: Client,
}

impl OpenAiProvider {
    /// Builds a client for `{base_url}/chat/completions`.
    pub fn new(api_key: &str, base_url: &str, model: String, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing completion API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing completion model name");
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid completion API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build completion HTTP client")?;
        Ok(Self {
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model,
            client,
        })
    }
}

impl CompletionProvider for OpenAiProvider {
    fn model(&self) -> &str {
        &self.model
    }

    fn complete(&self, request: &ProviderRequest) -> Result<String> {
        let body = chat_request(&self.model, request);
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .context("failed to call chat completions")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            bail!("chat completions returned {}: {}", status, text);
        }
        let parsed: ChatResponse = resp.json().context("failed to parse chat completion")?;
        parsed.into_answer()
    }
}

fn chat_request<'a>(model: &'a str, request: &ProviderRequest<'a>) -> ChatRequest<'a> {
    ChatRequest {
        model,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        messages: vec![
            ChatMessage {
                role: "system",
                content: request.system,
            },
            ChatMessage {
                role: "user",
                content: request.user,
            },
        ],
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

impl ChatResponse {
    fn into_answer(self) -> Result<String> {
        match self.choices.into_iter().next() {
            Some(ChatChoice {
                message: AssistantMessage {
                    content: Some(content),
                },
            }) => Ok(content),
            Some(_) => bail!("chat completion choice has no text content"),
            None => bail!("chat completion returned no choices"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}
