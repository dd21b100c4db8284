//! Grounded answer generation: one completion call per request.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::providers::{CompletionProvider, ProviderRequest};

/// Fixed instruction framing every completion.
pub const SYSTEM_PROMPT: &str = "You are a helpful medical assistant AI. Provide information based on references. Do not diagnose. Do not use any markdown formatting such as bold, italics, or bullet symbols; respond in plain text only.";

/// Low temperature keeps phrasing conservative and repeatable.
pub const GENERATION_TEMPERATURE: f32 = 0.2;

/// Default completion model (served by Groq).
pub const DEFAULT_COMPLETION_MODEL: &str = "llama-3.1-8b-instant";

/// Default cap on generated tokens.
pub const DEFAULT_MAX_TOKENS: usize = 1024;

/// Builds the user turn from the raw query and the joined references.
pub fn build_user_prompt(query: &str, contexts: &[String]) -> String {
    let references = contexts.join("\n\n");
    let mut prompt = String::new();
    prompt.push_str("Patient symptoms: ");
    prompt.push_str(query);
    prompt.push_str("\n\nMedical references:\n");
    prompt.push_str(&references);
    prompt.push_str("\n\nBased on the references above, provide possible conditions and general advice.\n");
    prompt.push_str("1. Do not provide a final diagnosis.\n");
    prompt.push_str("2. Always recommend consulting a healthcare professional.\n");
    prompt
}

/// Turns query + retrieved passages into one answer. The plain-text rule is an
/// instruction to the model only; output is returned unmodified.
#[derive(Clone)]
pub struct Generator {
    provider: Arc<dyn CompletionProvider>,
    max_tokens: usize,
}

impl Generator {
    /// Wraps a completion provider.
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            provider,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Overrides the completion token cap.
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens.max(1);
        self
    }

    /// Issues exactly one completion request. Not retried.
    pub fn generate(&self, query: &str, contexts: &[String]) -> Result<String> {
        let started = Instant::now();
        let user = build_user_prompt(query, contexts);
        let request = ProviderRequest {
            system: SYSTEM_PROMPT,
            user: &user,
            temperature: GENERATION_TEMPERATURE,
            max_tokens: self.max_tokens,
        };
        let answer = self
            .provider
            .complete(&request)
            .map_err(PipelineError::generation)?;
        debug!(
            model = self.provider.model(),
            contexts = contexts.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generated answer"
        );
        Ok(answer)
    }
}
