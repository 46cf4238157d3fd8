use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Chunk, Document};

/// Turns texts into fixed-length vectors, one per input, order preserved.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Single-shot text generation.
pub trait InferenceEngine: Send + Sync {
    fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Parses one file format into a [`Document`].
pub trait DocumentLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Document>;
}

/// Resolves a collection key to the documents it names.
pub trait DocumentSource: Send + Sync {
    fn enumerate(&self, source_dir: &Path) -> Vec<PathBuf>;
    fn load_collection(&self, key: &str) -> Result<Vec<Document>>;
}

/// An opened, persisted nearest-neighbour index over embedded chunks.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<Chunk>>;
    async fn count(&self) -> Result<usize>;
}

/// Persistent storage for vector indexes, addressed by a location name.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn exists(&self, location: &str) -> Result<bool>;
    async fn open(&self, location: &str) -> Result<Arc<dyn VectorIndex>>;
    async fn build(&self, location: &str, chunks: &[Chunk]) -> Result<Arc<dyn VectorIndex>>;
}
