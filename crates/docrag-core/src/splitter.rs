//! Recursive, delimiter-priority text splitting.
//!
//! Text is cut on the coarsest separator it contains (paragraph, then line,
//! then word, then character). Pieces that are still too long are cut again
//! with the next separator; short pieces are merged back into chunks of at most
//! `chunk_size` characters, and each new chunk re-uses trailing pieces of the
//! previous one until up to `chunk_overlap` characters are shared.
//!
//! Lengths are counted in `char`s. Separators stay attached to the piece that
//! follows them, so merging never has to re-insert anything.
use std::collections::VecDeque;

use tracing::warn;

use crate::error::{Error, Result};
use crate::types::{Chunk, Document, Granularity, SplitParams};

pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        Self::with_separators(chunk_size, chunk_overlap, &DEFAULT_SEPARATORS)
    }

    pub fn with_separators(chunk_size: usize, chunk_overlap: usize, separators: &[&str]) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk size must be at least 1".to_string()));
        }
        if chunk_overlap > chunk_size {
            return Err(Error::InvalidConfig(format!(
                "Got a larger chunk overlap ({chunk_overlap}) than chunk size ({chunk_size}), should be smaller."
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: separators.iter().map(|s| (*s).to_string()).collect(),
        })
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        let separators: Vec<&str> = self.separators.iter().map(String::as_str).collect();
        self.split_recursive(text, &separators)
    }

    /// Split every document, copying its metadata onto each chunk.
    pub fn split_documents(&self, documents: &[Document], granularity: Granularity) -> Vec<Chunk> {
        documents
            .iter()
            .flat_map(|doc| {
                self.split_text(&doc.raw_text).into_iter().map(move |content| Chunk {
                    content,
                    metadata: doc.source_metadata.clone(),
                    granularity,
                })
            })
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut separator = separators.last().copied().unwrap_or("");
        let mut remaining: &[&str] = &[];
        for (i, &sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = sep;
                break;
            }
            if text.contains(sep) {
                separator = sep;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut short: Vec<String> = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            if char_len(&piece) < self.chunk_size {
                short.push(piece);
                continue;
            }
            if !short.is_empty() {
                chunks.extend(self.merge(&short));
                short.clear();
            }
            if remaining.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(self.split_recursive(&piece, remaining));
            }
        }
        if !short.is_empty() {
            chunks.extend(self.merge(&short));
        }
        chunks
    }

    fn merge(&self, pieces: &[String]) -> Vec<String> {
        let mut out = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;
        for piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size {
                if total > self.chunk_size {
                    warn!(total, chunk_size = self.chunk_size, "created a chunk longer than the configured size");
                }
                if !window.is_empty() {
                    if let Some(chunk) = join(&window) {
                        out.push(chunk);
                    }
                    while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                        match window.pop_front() {
                            Some(front) => total -= char_len(front),
                            None => break,
                        }
                    }
                }
            }
            window.push_back(piece.as_str());
            total += len;
        }
        if let Some(chunk) = join(&window) {
            out.push(chunk);
        }
        out
    }
}

/// Produce both granularities over the same documents.
///
/// The two passes share nothing but the input, so changing one size never
/// changes the other sequence. Empty input yields two empty sequences.
pub fn split_documents(documents: &[Document], params: &SplitParams) -> Result<(Vec<Chunk>, Vec<Chunk>)> {
    let small = RecursiveSplitter::new(params.small_chunk_size, params.small_chunk_overlap)?;
    let large = RecursiveSplitter::new(params.large_chunk_size, params.large_chunk_overlap)?;
    if documents.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }
    Ok((
        small.split_documents(documents, Granularity::Small),
        large.split_documents(documents, Granularity::Large),
    ))
}

fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }
    let mut parts = text.split(separator);
    let mut out = Vec::new();
    if let Some(first) = parts.next() {
        out.push(first.to_string());
    }
    out.extend(parts.map(|p| format!("{separator}{p}")));
    out.retain(|s| !s.is_empty());
    out
}

fn join(window: &VecDeque<&str>) -> Option<String> {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
