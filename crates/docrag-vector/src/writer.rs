//! Turns embedded chunks into Arrow record batches and persists them.
use anyhow::{anyhow, ensure, Result};
use arrow_array::{FixedSizeListArray, Int32Array, RecordBatch, RecordBatchIterator, StringArray};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use lancedb::Connection;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use docrag_core::types::Chunk;

use crate::schema::build_chunk_schema;
use crate::table::open_db;

const BATCH_SIZE: usize = 1000;

pub struct LanceDbIndexer {
    pub(crate) db: Connection,
    pub(crate) table_name: String,
    dim: i32,
}

impl LanceDbIndexer {
    pub async fn new(db_path: &Path, table_name: &str, dim: usize) -> Result<Self> {
        let dim = i32::try_from(dim).map_err(|_| anyhow!("embedding dimension {dim} does not fit the schema"))?;
        let db = open_db(db_path).await?;
        Ok(Self { db, table_name: table_name.to_string(), dim })
    }

    /// Create the table from `chunks` in a single write, `BATCH_SIZE` rows per
    /// record batch. Returns the number of rows written.
    pub async fn index(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<usize> {
        ensure!(!chunks.is_empty(), "no chunks to index");
        ensure!(
            chunks.len() == embeddings.len(),
            "chunks and embeddings length must match ({} vs {})",
            chunks.len(),
            embeddings.len()
        );
        info!(chunks = chunks.len(), table = %self.table_name, "indexing chunks into LanceDB");

        let pb = ProgressBar::with_draw_target(Some(chunks.len() as u64), ProgressDrawTarget::stderr());
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({percent}%)")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        let mut batches = Vec::with_capacity(chunks.len().div_ceil(BATCH_SIZE));
        for (n, (chunk_batch, emb_batch)) in chunks.chunks(BATCH_SIZE).zip(embeddings.chunks(BATCH_SIZE)).enumerate() {
            batches.push(self.to_record_batch(n * BATCH_SIZE, chunk_batch, emb_batch)?);
            pb.inc(chunk_batch.len() as u64);
        }
        pb.finish_and_clear();

        let schema = build_chunk_schema(self.dim);
        let reader = Box::new(RecordBatchIterator::new(batches.into_iter().map(Ok), schema));
        self.db.create_table(&self.table_name, reader).execute().await?;
        info!(rows = chunks.len(), table = %self.table_name, "LanceDB indexing completed");
        Ok(chunks.len())
    }

    fn to_record_batch(&self, offset: usize, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<RecordBatch> {
        let expected = usize::try_from(self.dim)?;
        let mut ids = Vec::with_capacity(chunks.len());
        let mut contents = Vec::with_capacity(chunks.len());
        let mut metadata = Vec::with_capacity(chunks.len());
        let mut chunk_indices = Vec::with_capacity(chunks.len());
        let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(chunks.len());
        for (i, (chunk, embedding)) in chunks.iter().zip(embeddings).enumerate() {
            ensure!(
                embedding.len() == expected,
                "embedding of chunk {} has {} dims, expected {expected}",
                offset + i,
                embedding.len()
            );
            let position = offset + i;
            ids.push(format!("chunk-{position:06}"));
            contents.push(chunk.content.clone());
            metadata.push(serde_json::to_string(&chunk.metadata)?);
            chunk_indices.push(i32::try_from(position)?);
            vectors.push(Some(embedding.iter().map(|&x| Some(x)).collect()));
        }
        let record_batch = RecordBatch::try_new(
            build_chunk_schema(self.dim),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(contents)),
                Arc::new(StringArray::from(metadata)),
                Arc::new(Int32Array::from(chunk_indices)),
                Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(
                    vectors.into_iter(),
                    self.dim,
                )),
            ],
        )?;
        Ok(record_batch)
    }
}
