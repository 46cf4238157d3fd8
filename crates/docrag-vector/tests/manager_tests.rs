use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use docrag_core::error::{Error, Result};
use docrag_core::traits::{VectorIndex, VectorStore};
use docrag_core::types::{Chunk, Granularity};
use docrag_vector::{IndexStatus, VectorIndexManager};

struct MemoryIndex {
    chunks: Vec<Chunk>,
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn similarity_search(&self, _query: &str, k: usize) -> Result<Vec<Chunk>> {
        Ok(self.chunks.iter().take(k).cloned().collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.chunks.len())
    }
}

/// In-memory store that counts builds and can be told to fail the next one.
#[derive(Default)]
struct MemoryStore {
    persisted: Mutex<HashMap<String, Vec<Chunk>>>,
    builds: AtomicUsize,
    fail_next: Mutex<bool>,
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn exists(&self, location: &str) -> Result<bool> {
        Ok(self.persisted.lock().contains_key(location))
    }

    async fn open(&self, location: &str) -> Result<Arc<dyn VectorIndex>> {
        let chunks = self.persisted.lock().get(location).cloned().ok_or_else(|| Error::NotFound(location.to_string()))?;
        Ok(Arc::new(MemoryIndex { chunks }))
    }

    async fn build(&self, location: &str, chunks: &[Chunk]) -> Result<Arc<dyn VectorIndex>> {
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.builds.fetch_add(1, Ordering::SeqCst);
        if std::mem::take(&mut *self.fail_next.lock()) {
            return Err(Error::Operation("embedding service unreachable".to_string()));
        }
        self.persisted.lock().insert(location.to_string(), chunks.to_vec());
        Ok(Arc::new(MemoryIndex { chunks: chunks.to_vec() }))
    }
}

fn chunks(texts: &[&str]) -> Vec<Chunk> {
    texts
        .iter()
        .map(|t| Chunk { content: (*t).to_string(), metadata: Default::default(), granularity: Granularity::Small })
        .collect()
}

#[tokio::test]
async fn first_call_creates_then_found() {
    let store = Arc::new(MemoryStore::default());
    let manager = VectorIndexManager::new(store.clone());

    let (_, status) = manager.get_or_create("docs_db", &chunks(&["a", "b"])).await.expect("create");
    assert_eq!(status, IndexStatus::Created);
    let (index, status) = manager.get_or_create("docs_db", &chunks(&["x"])).await.expect("found");
    assert_eq!(status, IndexStatus::Found);
    assert_eq!(index.count().await.expect("count"), 2);
    assert_eq!(store.builds.load(Ordering::SeqCst), 1);
    assert!(manager.cached("docs_db").is_some());
    assert!(manager.cached("other_db").is_none());
}

#[tokio::test]
async fn persisted_index_is_found_and_new_chunks_are_ignored() {
    let store = Arc::new(MemoryStore::default());
    store.persisted.lock().insert("docs_db".to_string(), chunks(&["original"]));
    let manager = VectorIndexManager::new(store.clone());

    let (index, status) = manager.get_or_create("docs_db", &chunks(&["new", "content"])).await.expect("found");
    assert_eq!(status, IndexStatus::Found);
    let hits = index.similarity_search("anything", 5).await.expect("search");
    assert_eq!(hits, chunks(&["original"]));
    assert_eq!(store.builds.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_build_leaves_slot_empty_for_retry() {
    let store = Arc::new(MemoryStore::default());
    *store.fail_next.lock() = true;
    let manager = VectorIndexManager::new(store.clone());

    let err = manager.get_or_create("docs_db", &chunks(&["a"])).await.err().expect("first build fails");
    assert!(matches!(err, Error::IndexBuild(ref msg) if msg.contains("unreachable")));
    assert!(manager.cached("docs_db").is_none());

    let (_, status) = manager.get_or_create("docs_db", &chunks(&["a"])).await.expect("retry");
    assert_eq!(status, IndexStatus::Created);
    assert_eq!(store.builds.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_calls_build_once() {
    let store = Arc::new(MemoryStore::default());
    let manager = Arc::new(VectorIndexManager::new(store.clone()));

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.get_or_create("shared_db", &chunks(&["a", "b", "c"])).await.map(|(_, s)| s) })
        })
        .collect();
    let mut statuses = Vec::new();
    for task in tasks {
        statuses.push(task.await.expect("join").expect("index"));
    }

    assert_eq!(store.builds.load(Ordering::SeqCst), 1);
    assert_eq!(statuses.iter().filter(|s| **s == IndexStatus::Created).count(), 1);
    assert_eq!(statuses.iter().filter(|s| **s == IndexStatus::Found).count(), 3);
}

#[tokio::test]
async fn distinct_names_get_distinct_indexes() {
    let store = Arc::new(MemoryStore::default());
    let manager = VectorIndexManager::new(store.clone());
    manager.get_or_create("a_db", &chunks(&["a"])).await.expect("a");
    let (b, status) = manager.get_or_create("b_db", &chunks(&["b1", "b2"])).await.expect("b");
    assert_eq!(status, IndexStatus::Created);
    assert_eq!(b.count().await.expect("count"), 2);
    assert_eq!(store.builds.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn open_existing_never_builds() {
    let store = Arc::new(MemoryStore::default());
    let manager = VectorIndexManager::new(store.clone());
    assert!(manager.open_existing("docs_db").await.expect("lookup").is_none());

    store.persisted.lock().insert("docs_db".to_string(), chunks(&["kept"]));
    let index = manager.open_existing("docs_db").await.expect("lookup").expect("persisted");
    assert_eq!(index.count().await.expect("count"), 1);
    assert!(manager.cached("docs_db").is_some());
    assert_eq!(store.builds.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn open_existing_reports_store_failures() {
    struct BrokenStore;

    #[async_trait]
    impl VectorStore for BrokenStore {
        async fn exists(&self, _location: &str) -> Result<bool> {
            Ok(true)
        }

        async fn open(&self, location: &str) -> Result<Arc<dyn VectorIndex>> {
            Err(Error::Operation(format!("{location}: manifest is corrupt")))
        }

        async fn build(&self, _location: &str, _chunks: &[Chunk]) -> Result<Arc<dyn VectorIndex>> {
            Err(Error::Operation("unused".to_string()))
        }
    }

    let manager = VectorIndexManager::new(Arc::new(BrokenStore));
    let err = manager.open_existing("docs_db").await.err().expect("open fails");
    assert!(matches!(err, Error::IndexBuild(ref msg) if msg.contains("manifest is corrupt")));
}
