//! Find-or-build for named vector indexes.
//!
//! Each directory name owns a slot guarded by an async mutex, so two requests
//! for the same unbuilt index never write it concurrently; different names do
//! not block each other.
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

use docrag_core::error::{Error, Result};
use docrag_core::traits::{VectorIndex, VectorStore};
use docrag_core::types::Chunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    /// Already open in this process or already persisted on disk.
    Found,
    Created,
}

type Slot = Arc<tokio::sync::Mutex<Option<Arc<dyn VectorIndex>>>>;

pub struct VectorIndexManager {
    store: Arc<dyn VectorStore>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl VectorIndexManager {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store, slots: Mutex::new(HashMap::new()) }
    }

    fn slot(&self, dir_name: &str) -> Slot {
        Arc::clone(self.slots.lock().entry(dir_name.to_string()).or_default())
    }

    /// The handle opened for `dir_name` in this process, if any. Never waits
    /// on an in-flight build.
    pub fn cached(&self, dir_name: &str) -> Option<Arc<dyn VectorIndex>> {
        let slot = self.slots.lock().get(dir_name).cloned()?;
        let guard = slot.try_lock().ok()?;
        guard.clone()
    }

    /// Open the index persisted under `dir_name`, or build it from `chunks`.
    ///
    /// When an index already exists `chunks` is ignored entirely, so a changed
    /// document set never refreshes it. A failed build leaves the slot empty
    /// and the next call tries again.
    pub async fn get_or_create(&self, dir_name: &str, chunks: &[Chunk]) -> Result<(Arc<dyn VectorIndex>, IndexStatus)> {
        let slot = self.slot(dir_name);
        let mut guard = slot.lock().await;
        if let Some(index) = guard.as_ref() {
            return Ok((Arc::clone(index), IndexStatus::Found));
        }

        let result = match self.store.exists(dir_name).await {
            Ok(true) => self.store.open(dir_name).await.map(|i| (i, IndexStatus::Found)),
            Ok(false) => self.store.build(dir_name, chunks).await.map(|i| (i, IndexStatus::Created)),
            Err(e) => Err(e),
        };
        match result {
            Ok((index, status)) => {
                info!(dir_name = %dir_name, ?status, "vector index ready");
                *guard = Some(Arc::clone(&index));
                Ok((index, status))
            }
            Err(e) => {
                error!(dir_name = %dir_name, error = %e, "vector index unavailable");
                Err(as_index_error(e))
            }
        }
    }

    /// The index for `dir_name` if one is open or persisted; never builds.
    pub async fn open_existing(&self, dir_name: &str) -> Result<Option<Arc<dyn VectorIndex>>> {
        let slot = self.slot(dir_name);
        let mut guard = slot.lock().await;
        if let Some(index) = guard.as_ref() {
            return Ok(Some(Arc::clone(index)));
        }
        if !self.store.exists(dir_name).await.map_err(as_index_error)? {
            return Ok(None);
        }
        let index = self.store.open(dir_name).await.map_err(as_index_error)?;
        info!(dir_name = %dir_name, "opened persisted vector index");
        *guard = Some(Arc::clone(&index));
        Ok(Some(index))
    }
}

fn as_index_error(e: Error) -> Error {
    match e {
        Error::IndexBuild(_) | Error::InvalidConfig(_) => e,
        other => Error::IndexBuild(other.to_string()),
    }
}
