//! [`VectorStore`] backed by one LanceDB database per directory name.
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use docrag_core::config::confine;
use docrag_core::error::{Error, Result};
use docrag_core::traits::{Embedder, VectorIndex, VectorStore};
use docrag_core::types::Chunk;

use crate::schema::TABLE_NAME;
use crate::search::LanceIndex;
use crate::table::{open_db, table_exists};
use crate::writer::LanceDbIndexer;

pub struct LanceVectorStore {
    persist_root: PathBuf,
    embedder: Arc<dyn Embedder>,
}

impl LanceVectorStore {
    pub fn new(persist_root: impl Into<PathBuf>, embedder: Arc<dyn Embedder>) -> Self {
        Self { persist_root: persist_root.into(), embedder }
    }

    pub fn persist_root(&self) -> &Path {
        &self.persist_root
    }

    fn location(&self, name: &str) -> Result<PathBuf> {
        confine(&self.persist_root, name)
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn exists(&self, location: &str) -> Result<bool> {
        let path = self.location(location)?;
        if !path.is_dir() {
            return Ok(false);
        }
        let conn = open_db(&path).await.map_err(|e| Error::IndexBuild(e.to_string()))?;
        table_exists(&conn, TABLE_NAME).await.map_err(|e| Error::IndexBuild(e.to_string()))
    }

    async fn open(&self, location: &str) -> Result<Arc<dyn VectorIndex>> {
        let path = self.location(location)?;
        let conn = open_db(&path).await.map_err(|e| Error::IndexBuild(e.to_string()))?;
        let table = conn
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e| Error::IndexBuild(format!("opening {}: {e}", path.display())))?;
        info!(path = %path.display(), "opened vector index");
        Ok(Arc::new(LanceIndex::new(table, Arc::clone(&self.embedder))))
    }

    async fn build(&self, location: &str, chunks: &[Chunk]) -> Result<Arc<dyn VectorIndex>> {
        if chunks.is_empty() {
            warn!(location = %location, "refusing to build an index from zero chunks");
            return Err(Error::IndexBuild(format!("no chunks to index for '{location}'")));
        }
        let path = self.location(location)?;
        std::fs::create_dir_all(&path).map_err(|e| Error::IndexBuild(format!("creating {}: {e}", path.display())))?;

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self
            .embedder
            .embed_batch(&texts)
            .map_err(|e| Error::IndexBuild(format!("embedding failed: {e}")))?;
        let indexer = LanceDbIndexer::new(&path, TABLE_NAME, self.embedder.dim())
            .await
            .map_err(|e| Error::IndexBuild(e.to_string()))?;
        indexer.index(chunks, &embeddings).await.map_err(|e| Error::IndexBuild(e.to_string()))?;
        self.open(location).await
    }
}
