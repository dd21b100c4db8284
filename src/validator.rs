//! Allow-list gate applied to user queries before any remote call.

use std::fs;
use std::path::Path;

use anyhow::Context;

use crate::error::{PipelineError, Result};

/// Symptom vocabulary accepted when no override is configured.
pub const DEFAULT_SYMPTOM_KEYWORDS: &[&str] = &[
    "fever",
    "cough",
    "pain",
    "headache",
    "nausea",
    "vomiting",
    "fatigue",
    "chills",
    "rash",
    "breathing",
    "weakness",
    "tiredness",
    "muscle",
];

const MIN_QUERY_CHARS: usize = 5;
const MIN_QUERY_TOKENS: usize = 2;

/// Conservative keyword gate. Valid symptom phrasing that avoids every listed
/// keyword is rejected; extend the vocabulary instead of loosening the rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryValidator {
    keywords: Vec<String>,
}

impl Default for QueryValidator {
    fn default() -> Self {
        Self {
            keywords: DEFAULT_SYMPTOM_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
        }
    }
}

impl QueryValidator {
    /// Builds a validator from a custom vocabulary. Keywords are lowercased and
    /// trimmed; blanks and duplicates are dropped.
    pub fn with_keywords<I, S>(keywords: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for keyword in keywords {
            let keyword = keyword.as_ref().trim().to_lowercase();
            if !keyword.is_empty() && !normalized.contains(&keyword) {
                normalized.push(keyword);
            }
        }
        if normalized.is_empty() {
            return Err(PipelineError::config(
                "symptom keyword set is empty; every query would be rejected",
            ));
        }
        Ok(Self {
            keywords: normalized,
        })
    }

    /// Parses a comma-separated keyword list.
    pub fn from_list(list: &str) -> Result<Self> {
        Self::with_keywords(list.split(','))
    }

    /// Loads one keyword per line; `#` starts a comment line.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read keyword file {}", path.display()))?;
        let keywords = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.starts_with('#'));
        Ok(Self::with_keywords(keywords)?)
    }

    /// Active vocabulary.
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Returns true when the query passes every rule, checked in order.
    pub fn is_valid(&self, query: &str) -> bool {
        let normalized = query.trim().to_lowercase();
        if normalized.chars().count() < MIN_QUERY_CHARS {
            return false;
        }
        if !normalized.chars().any(|ch| ch.is_alphabetic()) {
            return false;
        }
        if normalized.split_whitespace().count() < MIN_QUERY_TOKENS {
            return false;
        }
        self.keywords
            .iter()
            .any(|keyword| normalized.contains(keyword.as_str()))
    }
}
