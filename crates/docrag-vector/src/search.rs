use anyhow::{anyhow, Result};
use arrow_array::{Array, RecordBatch, StringArray};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::Table;
use std::sync::Arc;
use tracing::debug;

use docrag_core::error::Error;
use docrag_core::traits::{Embedder, VectorIndex};
use docrag_core::types::{Chunk, Granularity, Meta};

/// Handle over one persisted `chunks` table. Queries are embedded with the
/// same embedder the table was built with.
pub struct LanceIndex {
    table: Table,
    embedder: Arc<dyn Embedder>,
}

impl LanceIndex {
    pub fn new(table: Table, embedder: Arc<dyn Embedder>) -> Self {
        Self { table, embedder }
    }

    /// Nearest chunks to `query_text`, closest first.
    pub async fn search(&self, query_text: &str, limit: usize) -> Result<Vec<Chunk>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self
            .embedder
            .embed_batch(&[query_text.to_string()])?
            .pop()
            .ok_or_else(|| anyhow!("embedder returned no vector for the query"))?;
        let mut results = self.table.vector_search(query_embedding)?.limit(limit).execute().await?;
        let mut hits = Vec::new();
        while let Some(batch) = results.try_next().await? {
            hits.extend(batch_to_chunks(&batch)?);
        }
        debug!(query_len = query_text.len(), hits = hits.len(), "vector search");
        hits.truncate(limit);
        Ok(hits)
    }
}

#[async_trait]
impl VectorIndex for LanceIndex {
    async fn similarity_search(&self, query: &str, k: usize) -> docrag_core::error::Result<Vec<Chunk>> {
        self.search(query, k).await.map_err(|e| Error::Operation(format!("vector search failed: {e}")))
    }

    async fn count(&self) -> docrag_core::error::Result<usize> {
        self.table
            .count_rows(None)
            .await
            .map_err(|e| Error::Operation(format!("counting rows failed: {e}")))
    }
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| anyhow!("{name} column missing"))
}

/// Rows come back in distance order; stored chunks are always small-granularity.
fn batch_to_chunks(batch: &RecordBatch) -> Result<Vec<Chunk>> {
    let contents = column::<StringArray>(batch, "content")?;
    let metadata = column::<StringArray>(batch, "metadata")?;
    (0..batch.num_rows())
        .map(|i| {
            let meta: Meta = if metadata.is_null(i) { Meta::new() } else { serde_json::from_str(metadata.value(i))? };
            Ok(Chunk { content: contents.value(i).to_string(), metadata: meta, granularity: Granularity::Small })
        })
        .collect()
}
