//! Process-lifetime memo of processed collections.
//!
//! A [`DocumentCache`] is an owned value handed to whoever needs it (the HTTP
//! state holds one), never a global. Entries are never evicted.
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::splitter::split_documents;
use crate::traits::DocumentSource;
use crate::types::{Chunk, SplitParams, TextType};

pub type Clusters = Arc<Vec<Vec<Chunk>>>;

/// Both chunk sequences of one collection plus its lazily computed clusters.
#[derive(Debug)]
pub struct ProcessedCollection {
    key: String,
    pub small_chunks: Vec<Chunk>,
    /// Each large chunk wrapped on its own so an index lookup yields a group.
    pub large_chunks: Vec<Vec<Chunk>>,
    clusters: Mutex<Option<Clusters>>,
}

impl ProcessedCollection {
    pub fn new(key: impl Into<String>, small_chunks: Vec<Chunk>, large_chunks: Vec<Chunk>) -> Self {
        Self {
            key: key.into(),
            small_chunks,
            large_chunks: large_chunks.into_iter().map(|c| vec![c]).collect(),
            clusters: Mutex::new(None),
        }
    }

    /// The collection key this was processed from.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn clusters(&self) -> Option<Clusters> {
        self.clusters.lock().clone()
    }

    /// Return the cached clusters, computing them from the small chunks on
    /// first use. The lock is held while computing so the work runs at most
    /// once; a failed computation leaves the slot as it was.
    pub fn clusters_or_compute<F>(&self, compute: F) -> Result<Clusters>
    where
        F: FnOnce(&[Chunk]) -> Result<Vec<Vec<Chunk>>>,
    {
        let mut slot = self.clusters.lock();
        if let Some(existing) = slot.as_ref() {
            debug!(groups = existing.len(), "clusters already computed");
            return Ok(Arc::clone(existing));
        }
        let groups = Arc::new(compute(&self.small_chunks)?);
        *slot = Some(Arc::clone(&groups));
        Ok(groups)
    }

    /// One group of chunks by position.
    ///
    /// Small chunks come back as a one-element group so all three text types
    /// share a shape.
    pub fn group(&self, text_type: TextType, index: usize) -> Result<Vec<Chunk>> {
        let out_of_range = |len: usize| Error::NotFound(format!("{text_type:?} group {index} (have {len})"));
        match text_type {
            TextType::Small => self
                .small_chunks
                .get(index)
                .map(|c| vec![c.clone()])
                .ok_or_else(|| out_of_range(self.small_chunks.len())),
            TextType::Large => self
                .large_chunks
                .get(index)
                .cloned()
                .ok_or_else(|| out_of_range(self.large_chunks.len())),
            TextType::Clusters => {
                let clusters = self.clusters().ok_or_else(|| Error::ClustersNotComputed(self.key.clone()))?;
                clusters.get(index).cloned().ok_or_else(|| out_of_range(clusters.len()))
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct DocumentCache {
    entries: RwLock<HashMap<String, Arc<ProcessedCollection>>>,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Arc<ProcessedCollection>> {
        self.entries.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Memoize `producer` under `key`.
    ///
    /// The producer runs without holding the lock, so two callers racing on
    /// the same missing key may both compute; the later insert wins. Errors
    /// are returned and nothing is stored.
    pub fn get_or_compute<F>(&self, key: &str, producer: F) -> Result<Arc<ProcessedCollection>>
    where
        F: FnOnce() -> Result<ProcessedCollection>,
    {
        if let Some(hit) = self.get(key) {
            debug!(key = %key, "document cache hit");
            return Ok(hit);
        }
        let value = Arc::new(producer()?);
        self.entries.write().insert(key.to_string(), Arc::clone(&value));
        Ok(value)
    }

    /// Load and split the collection `key` unless it was already processed.
    ///
    /// A collection with no loadable documents is cached as two empty
    /// sequences; only load or split failures leave the key absent.
    pub fn ensure_processed(
        &self,
        key: &str,
        source: &dyn DocumentSource,
        params: &SplitParams,
    ) -> Result<Arc<ProcessedCollection>> {
        self.get_or_compute(key, || {
            let documents = source.load_collection(key)?;
            if documents.is_empty() {
                info!(key = %key, "no documents to load");
            }
            let (small, large) = split_documents(&documents, params)?;
            info!(key = %key, documents = documents.len(), small = small.len(), large = large.len(), "processed collection");
            Ok(ProcessedCollection::new(key, small, large))
        })
    }
}
