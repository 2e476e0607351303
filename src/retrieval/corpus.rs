//! Corpus loading and chunking
//!
//! Loads plain-text documents from a single directory level and splits them
//! into paragraph chunks with stable ids.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// A paragraph-sized unit of a source document, the unit of retrieval.
/// The id is `<source>::chunk<index>`, stable for the lifetime of the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub content: String,
    pub source: String,
}

const TEXT_EXTENSIONS: [&str; 2] = ["md", "txt"];

/// Load every text document directly under `corpus_dir` and split each into
/// paragraph chunks. Files are visited in sorted filename order so chunk ids
/// and insertion order are deterministic across rebuilds. Unreadable files
/// are skipped with a warning rather than failing the whole corpus.
pub fn load_chunks(corpus_dir: &Path) -> Result<Vec<DocumentChunk>> {
    let mut paths: Vec<_> = std::fs::read_dir(corpus_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| TEXT_EXTENSIONS.contains(&ext))
                    .unwrap_or(false)
        })
        .collect();
    paths.sort();

    let mut chunks = Vec::new();
    for path in &paths {
        let source = match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem.to_string(),
            None => continue,
        };
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Skipping unreadable document {}: {}", path.display(), e);
                continue;
            }
        };
        chunks.extend(split_document(&source, &content));
    }
    Ok(chunks)
}

/// Split a document on blank-line boundaries, discarding whitespace-only
/// chunks. Chunk indices count only the kept paragraphs.
pub fn split_document(source: &str, content: &str) -> Vec<DocumentChunk> {
    let normalized = content.replace("\r\n", "\n");
    normalized
        .split("\n\n")
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
        .enumerate()
        .map(|(i, paragraph)| DocumentChunk {
            id: format!("{}::chunk{}", source, i),
            content: paragraph.to_string(),
            source: source.to_string(),
        })
        .collect()
}
