#![warn(missing_docs)]
//! Core library for Pulse AI: symptom-query validation, retrieval over a
//! PubMedQA vector index, and grounded answer generation.

pub mod chunker;
pub mod config;
pub mod dataset;
pub mod embedder;
pub mod error;
pub mod generator;
pub mod index;
pub mod ingest;
pub mod logging;
pub mod pipeline;
pub mod providers;
pub mod records;
pub mod retriever;
pub mod server;
pub mod validator;

#[cfg(test)]
mod test_support;

pub use chunker::{chunk_text, Chunk, ChunkConfig};
pub use config::PipelineArgs;
pub use dataset::SourceDocument;
pub use embedder::Embedder;
pub use error::{PipelineError, Result};
pub use generator::Generator;
pub use index::{MemoryIndex, PineconeIndex, VectorIndex};
pub use ingest::{IngestConfig, IngestReport, Ingestor};
pub use pipeline::{Outcome, Pipeline, NO_CONTEXT_MESSAGE, REJECTION_MESSAGE};
pub use providers::CompletionProvider;
pub use records::{IndexedRecord, QueryMatch, RecordMetadata};
pub use retriever::Retriever;
pub use validator::QueryValidator;
