//! Command-line and environment configuration shared by the binaries.
//!
//! Each concern is an `Args` group flattened into the binaries that need it.
//! Builders fail on missing keys and malformed endpoints so misconfiguration
//! surfaces at startup rather than on the first request.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use url::Url;

use crate::embedder::huggingface::{HfInferenceEmbedder, DEFAULT_HF_MODEL};
use crate::embedder::openai::OpenAiEmbedder;
use crate::embedder::Embedder;
use crate::error::PipelineError;
use crate::generator::{Generator, DEFAULT_COMPLETION_MODEL, DEFAULT_MAX_TOKENS};
use crate::index::{PineconeIndex, VectorIndex};
use crate::pipeline::Pipeline;
use crate::providers::{AnthropicProvider, CompletionProvider, OpenAiProvider, GROQ_BASE_URL};
use crate::retriever::{Retriever, DEFAULT_TOP_K};
use crate::validator::QueryValidator;

/// Default Anthropic model when that provider is selected.
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-haiku-latest";

const MINILM_DIMENSIONS: usize = 384;
const OPENAI_SMALL_DIMENSIONS: usize = 1536;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
/// Embedding backend selected for a deployment.
pub enum EmbedderKind {
    /// OpenAI-compatible `/embeddings` endpoint.
    Openai,
    /// Hugging Face hosted feature-extraction pipeline.
    Huggingface,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
/// Chat-completion backend selected for a deployment.
pub enum CompletionKind {
    /// OpenAI-compatible chat completions (Groq by default).
    Openai,
    /// Anthropic messages API.
    Anthropic,
}

/// Embedding client settings.
#[derive(Args, Debug, Clone)]
pub struct EmbedderArgs {
    /// Embedding backend
    #[arg(long, env = "PULSE_EMBEDDER", value_enum, default_value = "huggingface")]
    pub embedder: EmbedderKind,

    /// OpenAI API key (required with --embedder openai)
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Base URL for OpenAI-compatible embedding endpoints
    #[arg(long, env = "PULSE_OPENAI_BASE", default_value = "https://api.openai.com/v1")]
    pub openai_base_url: String,

    /// OpenAI embedding model
    #[arg(long, env = "PULSE_OPENAI_MODEL", default_value = "text-embedding-3-small")]
    pub openai_model: String,

    /// Optional embedding dimension override for OpenAI models
    #[arg(long, env = "PULSE_OPENAI_DIMENSIONS")]
    pub openai_dimensions: Option<usize>,

    /// Hugging Face API token (required with --embedder huggingface)
    #[arg(long, env = "HF_API_TOKEN", hide_env_values = true)]
    pub hf_api_token: Option<String>,

    /// Hugging Face inference host
    #[arg(
        long,
        env = "PULSE_HF_ENDPOINT",
        default_value = "https://router.huggingface.co/hf-inference/models"
    )]
    pub hf_endpoint: String,

    /// Hugging Face sentence-embedding model
    #[arg(long, env = "PULSE_HF_MODEL", default_value = DEFAULT_HF_MODEL)]
    pub hf_model: String,

    /// Seconds before embedding requests time out
    #[arg(long, env = "PULSE_EMBED_TIMEOUT_SECS", default_value_t = 30)]
    pub embed_timeout_secs: u64,

    /// Attempts per embedding request (1 disables retries)
    #[arg(long, env = "PULSE_EMBED_MAX_ATTEMPTS", default_value_t = 1)]
    pub embed_max_attempts: usize,

    /// Max inputs per embedding request
    #[arg(long, env = "PULSE_EMBED_BATCH", default_value_t = 32)]
    pub embed_batch: usize,
}

impl EmbedderArgs {
    /// Vector dimension the configured model is known to produce, if any.
    pub fn expected_dimensions(&self) -> Option<usize> {
        match self.embedder {
            EmbedderKind::Openai => match self.openai_dimensions {
                Some(dims) => Some(dims),
                None if self.openai_model == "text-embedding-3-small" => {
                    Some(OPENAI_SMALL_DIMENSIONS)
                }
                None => None,
            },
            EmbedderKind::Huggingface => {
                (self.hf_model == DEFAULT_HF_MODEL).then_some(MINILM_DIMENSIONS)
            }
        }
    }

    /// Builds the selected embedding client.
    pub fn build(&self) -> Result<Arc<dyn Embedder>> {
        let timeout = Duration::from_secs(self.embed_timeout_secs.max(1));
        let embedder: Arc<dyn Embedder> = match self.embedder {
            EmbedderKind::Openai => {
                let key = require(&self.openai_api_key, "OPENAI_API_KEY", "PULSE_EMBEDDER=openai")?;
                let base = endpoint(&self.openai_base_url, "PULSE_OPENAI_BASE")?;
                Arc::new(OpenAiEmbedder::new(
                    key,
                    base,
                    self.openai_model.clone(),
                    self.openai_dimensions,
                    timeout,
                    self.embed_max_attempts,
                    self.embed_batch,
                )?)
            }
            EmbedderKind::Huggingface => {
                let token = require(&self.hf_api_token, "HF_API_TOKEN", "PULSE_EMBEDDER=huggingface")?;
                let base = endpoint(&self.hf_endpoint, "PULSE_HF_ENDPOINT")?;
                Arc::new(HfInferenceEmbedder::new(
                    token,
                    base,
                    self.hf_model.clone(),
                    self.expected_dimensions(),
                    timeout,
                    self.embed_max_attempts,
                    self.embed_batch,
                )?)
            }
        };
        Ok(embedder)
    }
}

/// Pinecone index settings.
#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    /// Pinecone API key
    #[arg(long, env = "PINECONE_API_KEY", hide_env_values = true)]
    pub pinecone_api_key: Option<String>,

    /// Pinecone index name
    #[arg(long, env = "PULSE_INDEX_NAME", default_value = "pulse-ai")]
    pub index_name: String,

    /// Namespace holding the corpus
    #[arg(long, env = "PULSE_NAMESPACE", default_value = "pubmed-data")]
    pub namespace: String,

    /// Data-plane host; skips the control-plane lookup when set
    #[arg(long, env = "PULSE_INDEX_HOST")]
    pub index_host: Option<String>,

    /// Seconds before index requests time out
    #[arg(long, env = "PULSE_INDEX_TIMEOUT_SECS", default_value_t = 30)]
    pub index_timeout_secs: u64,
}

impl IndexArgs {
    fn timeout(&self) -> Duration {
        Duration::from_secs(self.index_timeout_secs.max(1))
    }

    fn api_key(&self) -> Result<String> {
        require(&self.pinecone_api_key, "PINECONE_API_KEY", "using the Pinecone index")
    }

    /// Connects to an existing index.
    pub fn connect(&self) -> Result<PineconeIndex> {
        let key = self.api_key()?;
        match &self.index_host {
            Some(host) => {
                PineconeIndex::with_host(&key, &self.index_name, host, self.timeout())
            }
            None => PineconeIndex::connect(&key, &self.index_name, self.timeout()),
        }
        .with_context(|| format!("failed to connect to Pinecone index '{}'", self.index_name))
    }

    /// Connects to the index, creating it from `spec` when it does not exist.
    pub fn ensure(
        &self,
        spec: &crate::index::pinecone::ServerlessSpec,
        ready_timeout: Duration,
    ) -> Result<PineconeIndex> {
        let key = self.api_key()?;
        PineconeIndex::ensure(&key, &self.index_name, spec, self.timeout(), ready_timeout)
            .with_context(|| format!("failed to prepare Pinecone index '{}'", self.index_name))
    }
}

/// Completion provider settings.
#[derive(Args, Debug, Clone)]
pub struct CompletionArgs {
    /// Completion backend
    #[arg(long, env = "PULSE_COMPLETION_PROVIDER", value_enum, default_value = "openai")]
    pub completion_provider: CompletionKind,

    /// API key for the OpenAI-compatible completion endpoint
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    pub completion_api_key: Option<String>,

    /// Anthropic API key (required with --completion-provider anthropic)
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,

    /// Base URL for the OpenAI-compatible completion endpoint
    #[arg(long, env = "PULSE_COMPLETION_BASE", default_value = GROQ_BASE_URL)]
    pub completion_base_url: String,

    /// Completion model (defaults per provider)
    #[arg(long, env = "PULSE_COMPLETION_MODEL")]
    pub completion_model: Option<String>,

    /// Seconds before completion requests time out
    #[arg(long, env = "PULSE_COMPLETION_TIMEOUT_SECS", default_value_t = 60)]
    pub completion_timeout_secs: u64,

    /// Max tokens generated per answer
    #[arg(long, env = "PULSE_MAX_TOKENS", default_value_t = DEFAULT_MAX_TOKENS)]
    pub max_tokens: usize,
}

impl CompletionArgs {
    /// Model name after applying the per-provider default.
    pub fn model(&self) -> String {
        match (&self.completion_model, self.completion_provider) {
            (Some(model), _) => model.clone(),
            (None, CompletionKind::Openai) => DEFAULT_COMPLETION_MODEL.to_string(),
            (None, CompletionKind::Anthropic) => DEFAULT_ANTHROPIC_MODEL.to_string(),
        }
    }

    /// Builds the generator around the selected provider.
    pub fn build(&self) -> Result<Generator> {
        let timeout = Duration::from_secs(self.completion_timeout_secs.max(1));
        let provider: Arc<dyn CompletionProvider> = match self.completion_provider {
            CompletionKind::Openai => {
                let key = require(&self.completion_api_key, "GROQ_API_KEY", "PULSE_COMPLETION_PROVIDER=openai")?;
                let base = endpoint(&self.completion_base_url, "PULSE_COMPLETION_BASE")?;
                Arc::new(OpenAiProvider::new(&key, &base, self.model(), timeout)?)
            }
            CompletionKind::Anthropic => {
                let key = require(&self.anthropic_api_key, "ANTHROPIC_API_KEY", "PULSE_COMPLETION_PROVIDER=anthropic")?;
                Arc::new(AnthropicProvider::new(&key, self.model(), timeout)?)
            }
        };
        Ok(Generator::new(provider).with_max_tokens(self.max_tokens))
    }
}

/// Symptom vocabulary settings.
#[derive(Args, Debug, Clone, Default)]
pub struct ValidatorArgs {
    /// Symptom keywords, comma separated (overrides the built-in list)
    #[arg(long, env = "PULSE_SYMPTOM_KEYWORDS", conflicts_with = "symptom_keywords_file")]
    pub symptom_keywords: Option<String>,

    /// File with one symptom keyword per line
    #[arg(long, env = "PULSE_SYMPTOM_KEYWORDS_FILE")]
    pub symptom_keywords_file: Option<PathBuf>,
}

impl ValidatorArgs {
    /// Builds the validator, falling back to the built-in vocabulary.
    pub fn build(&self) -> Result<QueryValidator> {
        if let Some(list) = &self.symptom_keywords {
            return Ok(QueryValidator::from_list(list)?);
        }
        if let Some(path) = &self.symptom_keywords_file {
            return QueryValidator::from_file(path);
        }
        Ok(QueryValidator::default())
    }
}

/// Everything needed to assemble a [`Pipeline`].
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    /// Embedding client.
    #[command(flatten)]
    pub embedder: EmbedderArgs,

    /// Vector index.
    #[command(flatten)]
    pub index: IndexArgs,

    /// Completion provider.
    #[command(flatten)]
    pub completion: CompletionArgs,

    /// Query validator.
    #[command(flatten)]
    pub validator: ValidatorArgs,

    /// Passages retrieved per query
    #[arg(long, env = "PULSE_TOP_K", default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,
}

impl PipelineArgs {
    /// Builds every client and connects to the configured Pinecone index.
    pub fn build(&self) -> Result<Pipeline> {
        let embedder = self.embedder.build()?;
        let index: Arc<dyn VectorIndex> = Arc::new(self.index.connect()?);
        self.assemble(embedder, index)
    }

    /// Wires the pipeline around an already-built embedder and index.
    pub fn assemble(
        &self,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
    ) -> Result<Pipeline> {
        if self.top_k == 0 {
            return Err(PipelineError::config("PULSE_TOP_K must be at least 1").into());
        }
        let validator = self.validator.build()?;
        let retriever =
            Retriever::new(embedder, index, self.index.namespace.clone()).with_top_k(self.top_k);
        let generator = self.completion.build()?;
        Ok(Pipeline::new(validator, retriever, generator))
    }
}

fn require(value: &Option<String>, name: &str, when: &str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(PipelineError::config(format!("{name} is required when {when}")).into()),
    }
}

/// Parses an absolute http(s) endpoint and returns it without a trailing slash.
pub fn endpoint(raw: &str, name: &str) -> Result<String> {
    let url = Url::parse(raw.trim())
        .map_err(|err| PipelineError::config(format!("{name} is not a valid URL ({err})")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(PipelineError::config(format!("{name} must use http or https")).into());
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}
