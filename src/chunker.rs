//! Word-window chunking for plain-text corpora.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;

use crate::error::{PipelineError, Result};

/// Retrieval unit produced by [`chunk_text`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// Space-joined words of the window.
    pub text: String,
    /// Zero-based position of the window in the source document.
    pub ordinal: usize,
}

/// Window size and overlap, both measured in whitespace-separated words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Words per chunk.
    pub chunk_size: usize,
    /// Words shared between consecutive chunks.
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            overlap: 20,
        }
    }
}

impl ChunkConfig {
    /// Builds a validated config.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        let config = Self {
            chunk_size,
            overlap,
        };
        config.step()?;
        Ok(config)
    }

    /// Distance between consecutive window starts.
    pub fn step(&self) -> Result<usize> {
        if self.chunk_size == 0 {
            return Err(PipelineError::config("chunk_size must be positive"));
        }
        if self.overlap >= self.chunk_size {
            return Err(PipelineError::config(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(self.chunk_size - self.overlap)
    }
}

/// Splits `text` into overlapping word windows.
///
/// Windows start every `chunk_size - overlap` words and stop as soon as one
/// reaches the last word, so the final chunk may be shorter than `chunk_size`
/// but is never wholly contained in its predecessor.
pub fn chunk_text(text: &str, config: &ChunkConfig) -> Result<Vec<Chunk>> {
    let step = config.step()?;
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < words.len() {
        let end = (start + config.chunk_size).min(words.len());
        chunks.push(Chunk {
            text: words[start..end].join(" "),
            ordinal: chunks.len(),
        });
        if end == words.len() {
            break;
        }
        start += step;
    }
    Ok(chunks)
}

/// Reads a UTF-8 corpus file.
pub fn load_text(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read corpus {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn numbered_words(count: usize) -> String {
        (0..count)
            .map(|i| format!("w{i}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn expected_count(n: usize, c: usize, o: usize) -> usize {
        if n == 0 {
            return 0;
        }
        let span = n.saturating_sub(o);
        span.div_ceil(c - o).max(1)
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let chunks = chunk_text("  \n\t ", &ChunkConfig::default()).expect("chunk");
        assert!(chunks.is_empty());
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        assert!(matches!(
            chunk_text("a b c", &ChunkConfig { chunk_size: 3, overlap: 3 }),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            ChunkConfig::new(2, 5),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            ChunkConfig::new(0, 0),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunk_text("persistent dry cough", &ChunkConfig::default()).expect("chunk");
        assert_eq!(
            chunks,
            vec![Chunk {
                text: "persistent dry cough".to_string(),
                ordinal: 0
            }]
        );
    }

    #[test]
    fn windows_overlap_and_collapse_whitespace() {
        let config = ChunkConfig::new(4, 1).expect("config");
        let chunks = chunk_text("a  b\nc d\te f g h i j", &config).expect("chunk");
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a b c d", "d e f g", "g h i j"]);
        assert_eq!(
            chunks.iter().map(|c| c.ordinal).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn chunk_count_matches_window_formula() {
        for (c, o) in [(4, 1), (5, 0), (10, 3), (100, 20), (3, 2)] {
            let config = ChunkConfig::new(c, o).expect("config");
            for n in 0..60 {
                let chunks = chunk_text(&numbered_words(n), &config).expect("chunk");
                assert_eq!(
                    chunks.len(),
                    expected_count(n, c, o),
                    "n={n} chunk_size={c} overlap={o}"
                );
            }
        }
    }

    #[test]
    fn consecutive_chunks_share_exactly_overlap_words() {
        let config = ChunkConfig::new(7, 3).expect("config");
        let chunks = chunk_text(&numbered_words(40), &config).expect("chunk");
        for pair in chunks.windows(2) {
            let prev: Vec<&str> = pair[0].text.split(' ').collect();
            let next: Vec<&str> = pair[1].text.split(' ').collect();
            assert_eq!(&prev[prev.len() - 3..], &next[..3]);
        }
    }

    #[test]
    fn non_overlapping_parts_reconstruct_the_text() {
        for (c, o) in [(7, 3), (4, 0), (6, 5)] {
            let config = ChunkConfig::new(c, o).expect("config");
            let text = numbered_words(33);
            let chunks = chunk_text(&text, &config).expect("chunk");
            let mut rebuilt: Vec<String> = Vec::new();
            for (idx, chunk) in chunks.iter().enumerate() {
                let skip = if idx == 0 { 0 } else { o };
                rebuilt.extend(chunk.text.split(' ').skip(skip).map(str::to_string));
            }
            assert_eq!(rebuilt.join(" "), text, "chunk_size={c} overlap={o}");
        }
    }

    #[test]
    fn load_text_reports_missing_file() {
        let err = load_text(Path::new("does/not/exist.txt")).unwrap_err();
        assert!(err.to_string().contains("does/not/exist.txt"));
    }
}
