//! Request orchestration: validate, retrieve, then generate.
//!
//! ```text
//! START → VALIDATE → REJECTED
//!                  → RETRIEVE → NO_CONTEXT
//!                             → GENERATE → DONE
//! ```
//!
//! Rejection and empty retrieval resolve to fixed advisory messages; every
//! collaborator failure propagates as a [`PipelineError`](crate::PipelineError).

use std::time::Instant;

use tracing::{info, warn};

use crate::error::{fingerprint, Result};
use crate::generator::Generator;
use crate::retriever::Retriever;
use crate::validator::QueryValidator;

/// Returned when the query fails validation.
pub const REJECTION_MESSAGE: &str =
    "Please enter valid medical symptoms (e.g., 'I have a persistent cough and fever').";

/// Returned when retrieval finds nothing.
pub const NO_CONTEXT_MESSAGE: &str =
    "I couldn't find relevant medical data. Please consult a doctor.";

/// Terminal state of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The validator rejected the query; nothing remote was called.
    Rejected,
    /// Retrieval returned no passages; the generator was not called.
    NoContext,
    /// The generator produced an answer from the listed contexts.
    Answered {
        /// Generated text, unmodified.
        answer: String,
        /// Number of passages supplied to the generator.
        contexts: usize,
    },
}

impl Outcome {
    /// User-facing text for this outcome.
    pub fn message(&self) -> &str {
        match self {
            Self::Rejected => REJECTION_MESSAGE,
            Self::NoContext => NO_CONTEXT_MESSAGE,
            Self::Answered { answer, .. } => answer,
        }
    }

    /// Consumes the outcome into its user-facing text.
    pub fn into_message(self) -> String {
        match self {
            Self::Answered { answer, .. } => answer,
            other => other.message().to_string(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::NoContext => "no_context",
            Self::Answered { .. } => "answered",
        }
    }
}

/// Stateless orchestrator; safe to share across concurrent requests.
#[derive(Clone)]
pub struct Pipeline {
    validator: QueryValidator,
    retriever: Retriever,
    generator: Generator,
}

impl Pipeline {
    /// Assembles the pipeline from its stages.
    pub fn new(validator: QueryValidator, retriever: Retriever, generator: Generator) -> Self {
        Self {
            validator,
            retriever,
            generator,
        }
    }

    /// Retriever stage, for callers that only need context lookup.
    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Runs the state machine and reports which terminal state was reached.
    pub fn run(&self, query: &str) -> Result<Outcome> {
        let started = Instant::now();
        let input_id = fingerprint(query);
        let result = self.advance(query);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(outcome) => info!(%input_id, outcome = outcome.label(), elapsed_ms, "pipeline finished"),
            Err(err) => warn!(%input_id, kind = err.kind(), error = %err, elapsed_ms, "pipeline failed"),
        }
        result
    }

    /// Answers a query with generated text or one of the fixed fallbacks.
    pub fn answer(&self, query: &str) -> Result<String> {
        self.run(query).map(Outcome::into_message)
    }

    fn advance(&self, query: &str) -> Result<Outcome> {
        if !self.validator.is_valid(query) {
            return Ok(Outcome::Rejected);
        }
        let contexts = self.retriever.retrieve_default(query)?;
        if contexts.is_empty() {
            return Ok(Outcome::NoContext);
        }
        let answer = self.generator.generate(query, &contexts)?;
        Ok(Outcome::Answered {
            answer,
            contexts: contexts.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::test_support::{RecordingEmbedder, RecordingProvider, ScriptedIndex};
    use crate::generator::build_user_prompt;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    struct Harness {
        embedder: Arc<RecordingEmbedder>,
        index: Arc<ScriptedIndex>,
        provider: Arc<RecordingProvider>,
        pipeline: Pipeline,
    }

    fn harness(index: ScriptedIndex, provider: RecordingProvider) -> Harness {
        let embedder = Arc::new(RecordingEmbedder::new(vec![0.3, 0.4]));
        let index = Arc::new(index);
        let provider = Arc::new(provider);
        let pipeline = Pipeline::new(
            QueryValidator::default(),
            Retriever::new(embedder.clone(), index.clone(), "pubmed-data"),
            Generator::new(provider.clone()),
        );
        Harness {
            embedder,
            index,
            provider,
            pipeline,
        }
    }

    #[test]
    fn invalid_query_short_circuits_without_side_effects() {
        let h = harness(ScriptedIndex::returning(&["ctx"]), RecordingProvider::answering("x"));
        for query in ["fever", "12345", "ab cd", "   "] {
            assert_eq!(h.pipeline.answer(query).expect("answer"), REJECTION_MESSAGE);
        }
        assert_eq!(h.pipeline.run("hello there").expect("run"), Outcome::Rejected);
        assert_eq!(h.embedder.call_count(), 0);
        assert_eq!(h.index.query_count(), 0);
        assert!(h.provider.requests().is_empty());
    }

    #[test]
    fn empty_retrieval_returns_no_data_message() {
        let h = harness(ScriptedIndex::returning(&[]), RecordingProvider::answering("x"));
        assert_eq!(
            h.pipeline.answer("I have a fever").expect("answer"),
            NO_CONTEXT_MESSAGE
        );
        assert_eq!(h.embedder.call_count(), 1);
        assert!(h.provider.requests().is_empty());
    }

    #[test]
    fn valid_query_generates_once_with_all_contexts() {
        let h = harness(
            ScriptedIndex::returning(&["Flu causes fever.", "Colds cause cough.", "Rest."]),
            RecordingProvider::answering("Possible flu. Please see a clinician."),
        );
        let outcome = h.pipeline.run("persistent cough and fever").expect("run");
        assert_eq!(
            outcome,
            Outcome::Answered {
                answer: "Possible flu. Please see a clinician.".to_string(),
                contexts: 3
            }
        );
        let requests = h.provider.requests();
        assert_eq!(requests.len(), 1);
        let contexts: Vec<String> = ["Flu causes fever.", "Colds cause cough.", "Rest."]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            requests[0].user,
            build_user_prompt("persistent cough and fever", &contexts)
        );
        let queries = h.index.queries.lock().unwrap();
        assert_eq!(queries[0].1, crate::retriever::DEFAULT_TOP_K);
    }

    #[test]
    fn collaborator_failures_propagate() {
        let h = harness(ScriptedIndex::failing(), RecordingProvider::answering("x"));
        assert!(matches!(
            h.pipeline.answer("fever and chills"),
            Err(PipelineError::IndexQuery { .. })
        ));
        assert!(h.provider.requests().is_empty());

        let h = harness(ScriptedIndex::returning(&["ctx"]), RecordingProvider::failing());
        assert!(matches!(
            h.pipeline.answer("fever and chills"),
            Err(PipelineError::GenerationService(_))
        ));
    }

    #[test]
    fn outcome_messages() {
        assert_eq!(Outcome::Rejected.message(), REJECTION_MESSAGE);
        assert_eq!(Outcome::NoContext.into_message(), NO_CONTEXT_MESSAGE);
        let answered = Outcome::Answered {
            answer: "text".into(),
            contexts: 1,
        };
        assert_eq!(answered.message(), "text");
    }
}
