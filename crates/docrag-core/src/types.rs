//! Domain types shared by the chunker, caches, vector store and RAG layer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered so that rendered metadata is stable across runs.
pub type Meta = BTreeMap<String, String>;

/// Raw text of one source file plus what is known about where it came from.
///
/// Produced once per file by a loader and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub raw_text: String,
    pub source_metadata: Meta,
}

impl Document {
    pub fn new(raw_text: impl Into<String>, source: impl Into<String>) -> Self {
        let mut source_metadata = Meta::new();
        source_metadata.insert("source".to_string(), source.into());
        Self { raw_text: raw_text.into(), source_metadata }
    }
}

/// Which of the two chunking configurations produced a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Small,
    Large,
}

/// A bounded span of a source document.
///
/// Chunks carry no id of their own: identity is the position inside the
/// sequence produced by one chunking call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub metadata: Meta,
    pub granularity: Granularity,
}

/// Size/overlap pairs (in characters) for both granularities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitParams {
    pub small_chunk_size: usize,
    pub small_chunk_overlap: usize,
    pub large_chunk_size: usize,
    pub large_chunk_overlap: usize,
}

impl SplitParams {
    /// Request field names, in the order they are validated.
    pub const FIELDS: [&'static str; 4] =
        ["small_chunk_size", "small_chunk_overlap", "large_chunk_size", "large_chunk_overlap"];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterParams {
    pub num_clusters: usize,
    pub cluster_samples: usize,
}

/// Selects one of the cached derived sequences of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextType {
    #[serde(rename = "small_texts")]
    Small,
    #[serde(rename = "large_texts")]
    Large,
    #[serde(rename = "clusters")]
    Clusters,
}
