//! BM25 Document Index
//!
//! Okapi BM25 ranking over paragraph chunks. The index is built once and
//! never mutated during serving; re-indexing replaces the whole corpus.

use crate::context::ScoredChunk;
use crate::error::Result;
use crate::retrieval::corpus::{self, DocumentChunk};
use itertools::Itertools;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

const K1: f64 = 1.5;
const B: f64 = 0.75;

/// Immutable BM25 index over a document corpus. Safe for concurrent reads.
pub struct DocumentIndex {
    chunks: Vec<DocumentChunk>,
    /// Per-chunk term frequencies, parallel to `chunks`.
    term_frequencies: Vec<HashMap<String, u32>>,
    /// Number of chunks each term occurs in.
    document_frequencies: HashMap<String, usize>,
    chunk_lengths: Vec<usize>,
    average_length: f64,
}

impl DocumentIndex {
    /// Build an index from every text document directly under `corpus_dir`.
    /// A directory that yields zero chunks produces a valid empty index.
    pub fn build(corpus_dir: &Path) -> Result<Self> {
        let chunks = corpus::load_chunks(corpus_dir)?;
        info!(
            "Indexed {} chunks from {}",
            chunks.len(),
            corpus_dir.display()
        );
        Ok(Self::from_chunks(chunks))
    }

    pub fn from_chunks(chunks: Vec<DocumentChunk>) -> Self {
        let mut term_frequencies = Vec::with_capacity(chunks.len());
        let mut document_frequencies: HashMap<String, usize> = HashMap::new();
        let mut chunk_lengths = Vec::with_capacity(chunks.len());

        for chunk in &chunks {
            let tokens = tokenize(&chunk.content);
            chunk_lengths.push(tokens.len());
            let mut frequencies: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *frequencies.entry(token).or_insert(0) += 1;
            }
            for term in frequencies.keys() {
                *document_frequencies.entry(term.clone()).or_insert(0) += 1;
            }
            term_frequencies.push(frequencies);
        }

        let average_length = if chunk_lengths.is_empty() {
            0.0
        } else {
            chunk_lengths.iter().sum::<usize>() as f64 / chunk_lengths.len() as f64
        };

        Self {
            chunks,
            term_frequencies,
            document_frequencies,
            chunk_lengths,
            average_length,
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Rank every indexed chunk against the query and return the top `k`,
    /// ordered by descending score with ties broken by insertion order.
    /// Deterministic: the same query against the same index always yields the
    /// same ordering. An empty index yields an empty result, never an error.
    pub fn retrieve(&self, query: &str, k: usize) -> Vec<ScoredChunk> {
        if self.chunks.is_empty() || k == 0 {
            return Vec::new();
        }

        let query_tokens = tokenize(query);
        let total = self.chunks.len() as f64;

        let mut scored: Vec<(usize, f64)> = Vec::with_capacity(self.chunks.len());
        for (i, frequencies) in self.term_frequencies.iter().enumerate() {
            let length = self.chunk_lengths[i] as f64;
            let mut score = 0.0;
            for token in &query_tokens {
                let tf = match frequencies.get(token) {
                    Some(tf) => *tf as f64,
                    None => continue,
                };
                let df = self.document_frequencies.get(token).copied().unwrap_or(0) as f64;
                let idf = (1.0 + (total - df + 0.5) / (df + 0.5)).ln();
                let denominator = tf + K1 * (1.0 - B + B * length / self.average_length.max(f64::MIN_POSITIVE));
                score += idf * tf * (K1 + 1.0) / denominator;
            }
            scored.push((i, score));
        }

        scored
            .into_iter()
            .sorted_by(|(ia, sa), (ib, sb)| {
                sb.partial_cmp(sa)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(ia.cmp(ib))
            })
            .take(k)
            .map(|(i, score)| ScoredChunk {
                id: self.chunks[i].id.clone(),
                content: self.chunks[i].content.clone(),
                score,
            })
            .collect()
    }
}

/// Query and corpus tokenization: lowercase, whitespace-split.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, content: &str) -> DocumentChunk {
        DocumentChunk {
            id: id.to_string(),
            content: content.to_string(),
            source: "test".to_string(),
        }
    }

    fn sample_index() -> DocumentIndex {
        DocumentIndex::from_chunks(vec![
            chunk("a::chunk0", "returns are accepted within thirty days"),
            chunk("a::chunk1", "beverages unopened returns window is thirty days"),
            chunk("b::chunk0", "average order value is revenue divided by order count"),
            chunk("b::chunk1", "gross margin is revenue minus cost of goods"),
        ])
    }

    #[test]
    fn test_empty_index_returns_empty() {
        let index = DocumentIndex::from_chunks(Vec::new());
        assert!(index.retrieve("anything at all", 5).is_empty());
    }

    #[test]
    fn test_rare_terms_rank_their_chunk_first() {
        let index = sample_index();
        let results = index.retrieve("beverages unopened window", 2);
        assert_eq!(results[0].id, "a::chunk1");
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn test_retrieval_is_deterministic() {
        let index = sample_index();
        let first: Vec<String> = index
            .retrieve("revenue order value", 4)
            .into_iter()
            .map(|c| c.id)
            .collect();
        for _ in 0..10 {
            let again: Vec<String> = index
                .retrieve("revenue order value", 4)
                .into_iter()
                .map(|c| c.id)
                .collect();
            assert_eq!(first, again);
        }
    }

    #[test]
    fn test_ties_break_by_insertion_order() {
        let index = DocumentIndex::from_chunks(vec![
            chunk("x::chunk0", "alpha beta"),
            chunk("x::chunk1", "alpha beta"),
        ]);
        let results = index.retrieve("alpha", 2);
        assert_eq!(results[0].id, "x::chunk0");
        assert_eq!(results[1].id, "x::chunk1");
    }

    #[test]
    fn test_top_k_truncates() {
        let index = sample_index();
        assert_eq!(index.retrieve("revenue", 2).len(), 2);
        assert_eq!(index.retrieve("revenue", 10).len(), 4);
    }
}
