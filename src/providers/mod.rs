//! Chat-completion backends used by the [`crate::generator::Generator`].

use anyhow::Result;

mod anthropic;
mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::{OpenAiProvider, GROQ_BASE_URL};

/// Trait implemented by concrete LLM providers. One call, one answer.
pub trait CompletionProvider: Send + Sync {
    /// Model identifier, for logs.
    fn model(&self) -> &str;

    /// Sends the request and returns the assistant text verbatim.
    fn complete(&self, request: &ProviderRequest) -> Result<String>;
}

/// Request envelope shared by the various providers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProviderRequest<'a> {
    /// Fixed system instruction.
    pub system: &'a str,
    /// User turn carrying the query and references.
    pub user: &'a str,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token cap.
    pub max_tokens: usize,
}
